//! The sync marker that tags managed events.
//!
//! Every event the engine creates on the target calendar carries a
//! hidden HTML comment in its body. The marker is how the engine tells
//! its own events apart from events a human created directly on the
//! public calendar: only marked events are ever updated or deleted,
//! unmarked events are left alone even when their signature collides
//! with a source event.

/// Opening tag of the marker comment; the source event id follows.
pub const MARKER_PREFIX: &str = "<!-- CALSYNC_ID:";

/// Closing tag of the marker comment.
pub const MARKER_SUFFIX: &str = " -->";

/// Marker text used by earlier deployments; still honored on read so
/// previously synced events are not orphaned.
pub const LEGACY_MARKER: &str = "Auto-synced from";

/// Appends the marker comment to a body, recording the source event id.
pub fn embed(body: &str, source_event_id: &str) -> String {
    format!("{body}{MARKER_PREFIX}{source_event_id}{MARKER_SUFFIX}")
}

/// Returns `true` if the body carries a sync marker (current or legacy).
pub fn is_managed(body: &str) -> bool {
    body.contains(MARKER_PREFIX) || body.contains(LEGACY_MARKER)
}

/// Extracts the source event id recorded in the marker, if any.
pub fn source_id(body: &str) -> Option<&str> {
    let start = body.find(MARKER_PREFIX)? + MARKER_PREFIX.len();
    let end = body[start..].find(MARKER_SUFFIX)? + start;
    Some(&body[start..end])
}

/// Label preceding the display location in a published event body.
pub const LOCATION_LABEL: &str = "<strong>Location:</strong>";

/// Extracts the display location embedded in a published body.
///
/// Publishing clears the location field for privacy and moves the text
/// into the body; signature matching reads it back from here so source
/// and mirror keep identical identity keys.
pub fn embedded_location(body: &str) -> Option<&str> {
    let start = body.find(LOCATION_LABEL)? + LOCATION_LABEL.len();
    let rest = &body[start..];
    let end = rest.find("</p>").or_else(|| rest.find('<')).unwrap_or(rest.len());
    let location = rest[..end].trim();
    (!location.is_empty()).then_some(location)
}

/// Removes the marker comment from a body, leaving the visible content.
///
/// Content comparisons between source and target bodies go through this
/// so the marker itself never registers as a difference.
pub fn strip(body: &str) -> String {
    match body.find(MARKER_PREFIX) {
        Some(start) => {
            let rest = &body[start..];
            match rest.find(MARKER_SUFFIX) {
                Some(end) => {
                    let after = &rest[end + MARKER_SUFFIX.len()..];
                    format!("{}{}", &body[..start], after)
                }
                None => body[..start].to_string(),
            }
        }
        None => body.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn embed_and_detect() {
        let body = embed("<p>Location: Hall A</p>", "src123");
        assert!(is_managed(&body));
        assert_eq!(source_id(&body), Some("src123"));
    }

    #[test]
    fn plain_body_is_not_managed() {
        assert!(!is_managed("<p>Manually created event</p>"));
        assert!(!is_managed(""));
    }

    #[test]
    fn legacy_marker_is_still_recognized() {
        assert!(is_managed("Auto-synced from main calendar"));
        assert_eq!(source_id("Auto-synced from main calendar"), None);
    }

    #[test]
    fn strip_removes_only_the_marker() {
        let body = embed("<p>Details</p>", "src123");
        assert_eq!(strip(&body), "<p>Details</p>");
        assert_eq!(strip("no marker here"), "no marker here");
    }

    #[test]
    fn embedded_location_round_trips() {
        let body = embed("<p><strong>Location:</strong> Hall A</p>", "src123");
        assert_eq!(embedded_location(&body), Some("Hall A"));
        assert_eq!(embedded_location("<p>no location here</p>"), None);
        assert_eq!(embedded_location("<p><strong>Location:</strong> </p>"), None);
    }

    #[test]
    fn strip_handles_marker_mid_body() {
        let body = format!(
            "before {MARKER_PREFIX}abc{MARKER_SUFFIX} after"
        );
        assert_eq!(strip(&body), "before  after");
    }
}
