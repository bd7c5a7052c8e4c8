//! Persistent change cache.
//!
//! Between runs the engine keeps a JSON snapshot of the source events it
//! last published, keyed by signature. A run that finds a valid cache
//! and no source-side changes skips the target event fetch and the
//! reconciliation pass; only the occurrence exception pass still runs,
//! since instance edits are never snapshotted here. The cache is
//! strictly an optimization: a missing, corrupt, or expired cache just
//! means the next run does a full reconciliation.

use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::Path;
use std::time::Duration;

use calsync_core::{event_signature, Event};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::SyncError;

/// Bumped when the on-disk layout changes; a mismatch invalidates the
/// cache wholesale.
pub const CACHE_VERSION: &str = "1.0";

/// Source-side changes since the cached snapshot, by signature.
#[derive(Debug, Default)]
pub struct ChangeSet {
    pub added: Vec<String>,
    pub updated: Vec<String>,
    pub deleted: Vec<String>,
    pub unchanged: usize,
}

impl ChangeSet {
    /// Returns `true` when the source matches the snapshot exactly.
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.updated.is_empty() && self.deleted.is_empty()
    }

    pub fn total_changes(&self) -> usize {
        self.added.len() + self.updated.len() + self.deleted.len()
    }
}

/// Summary of the cache contents, for status reporting.
#[derive(Debug, Clone, Serialize)]
pub struct CacheStats {
    pub entries: usize,
    pub last_sync_time: Option<DateTime<Utc>>,
    pub cache_version: String,
}

/// The cached snapshot of published source events.
#[derive(Debug, Serialize, Deserialize)]
pub struct ChangeCache {
    events: HashMap<String, Event>,
    last_sync_time: Option<DateTime<Utc>>,
    cache_version: String,
}

impl Default for ChangeCache {
    fn default() -> Self {
        Self::new()
    }
}

impl ChangeCache {
    /// An empty cache. Never valid until a sync records into it.
    pub fn new() -> Self {
        Self {
            events: HashMap::new(),
            last_sync_time: None,
            cache_version: CACHE_VERSION.to_string(),
        }
    }

    /// Loads the cache from disk. A missing or unreadable document
    /// yields a fresh cache rather than an error; the engine then falls
    /// back to a full reconciliation.
    pub fn load(path: &Path) -> Self {
        let raw = match fs::read_to_string(path) {
            Ok(raw) => raw,
            Err(err) => {
                debug!(path = %path.display(), %err, "no usable cache; starting fresh");
                return Self::new();
            }
        };
        match serde_json::from_str::<Self>(&raw) {
            Ok(cache) => cache,
            Err(err) => {
                warn!(path = %path.display(), %err, "cache document corrupt; starting fresh");
                Self::new()
            }
        }
    }

    /// Persists the cache, creating parent directories as needed.
    pub fn save(&self, path: &Path) -> Result<(), SyncError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .map_err(|e| SyncError::Cache(format!("create {}: {e}", parent.display())))?;
        }
        let raw = serde_json::to_string_pretty(self)
            .map_err(|e| SyncError::Cache(format!("serialize cache: {e}")))?;
        fs::write(path, raw)
            .map_err(|e| SyncError::Cache(format!("write {}: {e}", path.display())))?;
        Ok(())
    }

    /// A cache is valid when its layout version matches and its last
    /// sync is within the TTL.
    pub fn is_valid(&self, ttl: Duration) -> bool {
        if self.cache_version != CACHE_VERSION {
            return false;
        }
        match self.last_sync_time {
            Some(last) => {
                let age = Utc::now().signed_duration_since(last);
                age >= chrono::Duration::zero()
                    && age.to_std().map(|a| a <= ttl).unwrap_or(false)
            }
            None => false,
        }
    }

    /// Diffs the current source events against the snapshot. Source
    /// occurrences are ignored here just as the reconciler ignores
    /// them.
    pub fn detect_changes(&self, source_events: &[Event]) -> ChangeSet {
        let mut changes = ChangeSet::default();
        let mut seen: HashSet<String> = HashSet::new();

        for event in source_events {
            if event.is_occurrence() {
                continue;
            }
            let signature = event_signature(event);
            match self.events.get(&signature) {
                Some(cached) if event_content_changed(cached, event) => {
                    changes.updated.push(signature.clone());
                }
                Some(_) => changes.unchanged += 1,
                None => changes.added.push(signature.clone()),
            }
            seen.insert(signature);
        }

        for signature in self.events.keys() {
            if !seen.contains(signature) {
                changes.deleted.push(signature.clone());
            }
        }

        changes
    }

    /// Replaces the snapshot with the current source events and stamps
    /// the sync time.
    pub fn record_sync(&mut self, source_events: &[Event]) {
        self.events = source_events
            .iter()
            .filter(|e| !e.is_occurrence())
            .map(|e| (event_signature(e), e.clone()))
            .collect();
        self.last_sync_time = Some(Utc::now());
        self.cache_version = CACHE_VERSION.to_string();
    }

    /// Empties the snapshot, forcing the next run to reconcile fully.
    pub fn clear(&mut self) {
        self.events.clear();
        self.last_sync_time = None;
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            entries: self.events.len(),
            last_sync_time: self.last_sync_time,
            cache_version: self.cache_version.clone(),
        }
    }
}

/// Whether a cached source event diverged from its current form.
///
/// Content comparison only. Modification timestamps are deliberately
/// ignored here: a metadata-only touch upstream must not invalidate the
/// skip path, and the snapshot's stamps are not trusted across
/// restarts.
fn event_content_changed(cached: &Event, current: &Event) -> bool {
    cached.subject != current.subject
        || cached.start != current.start
        || cached.end != current.end
        || cached.is_all_day != current.is_all_day
        || cached.location != current.location
        || cached.body != current.body
        || cached.categories != current.categories
        || cached.kind != current.kind
}
