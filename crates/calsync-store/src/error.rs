//! Error types for event store operations.
//!
//! The transient/permanent split drives the retry policy: the engine
//! retries transient failures with backoff and gives up immediately on
//! everything else. Auth failures get one token refresh inside the
//! store implementation before they surface here; the engine never
//! retries them.

use std::fmt;
use thiserror::Error;

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// The category of a store error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreErrorCode {
    /// Authentication failed or credentials expired.
    AuthFailed,
    /// Network error: connection failed, timeout, DNS resolution.
    Network,
    /// The remote service returned a 5xx-class error.
    Server,
    /// The remote service throttled the request.
    Throttled,
    /// The referenced calendar does not exist.
    CalendarNotFound,
    /// The referenced event or occurrence does not exist.
    EventNotFound,
    /// The request was rejected as invalid (4xx-class, non-auth).
    BadRequest,
    /// Unexpected or unparsable response from the remote service.
    InvalidResponse,
}

impl StoreErrorCode {
    /// Returns `true` if an operation failing with this code may be
    /// retried.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Network | Self::Server | Self::Throttled)
    }

    /// Returns a stable name for this error code.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AuthFailed => "auth_failed",
            Self::Network => "network",
            Self::Server => "server",
            Self::Throttled => "throttled",
            Self::CalendarNotFound => "calendar_not_found",
            Self::EventNotFound => "event_not_found",
            Self::BadRequest => "bad_request",
            Self::InvalidResponse => "invalid_response",
        }
    }
}

impl fmt::Display for StoreErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// An error from an event store operation.
#[derive(Debug, Error)]
#[error("{code}: {message}")]
pub struct StoreError {
    code: StoreErrorCode,
    message: String,
    #[source]
    source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl StoreError {
    /// Creates a new store error with the given code and message.
    pub fn new(code: StoreErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            source: None,
        }
    }

    /// Creates an authentication error.
    pub fn auth(message: impl Into<String>) -> Self {
        Self::new(StoreErrorCode::AuthFailed, message)
    }

    /// Creates a network error.
    pub fn network(message: impl Into<String>) -> Self {
        Self::new(StoreErrorCode::Network, message)
    }

    /// Creates a server error.
    pub fn server(message: impl Into<String>) -> Self {
        Self::new(StoreErrorCode::Server, message)
    }

    /// Creates a calendar-not-found error.
    pub fn calendar_not_found(name: impl Into<String>) -> Self {
        Self::new(StoreErrorCode::CalendarNotFound, name)
    }

    /// Creates an event-not-found error.
    pub fn event_not_found(id: impl Into<String>) -> Self {
        Self::new(StoreErrorCode::EventNotFound, id)
    }

    /// Creates a bad-request error.
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StoreErrorCode::BadRequest, message)
    }

    /// Attaches an underlying cause.
    pub fn with_source(
        mut self,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        self.source = Some(Box::new(source));
        self
    }

    /// Returns the error code.
    pub fn code(&self) -> StoreErrorCode {
        self.code
    }

    /// Returns the error message.
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Returns `true` if the operation may be retried.
    pub fn is_transient(&self) -> bool {
        self.code.is_transient()
    }
}
