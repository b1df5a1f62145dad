//! Error taxonomy shared by the challenge bridge, the sources and the queues.
//!
//! Adapters only ever raise [`SourceError`]. The challenge bridge folds every
//! way a browser attempt can go wrong into a single [`ChallengeError`] value
//! so callers have exactly one thing to map to a user-visible message.

use std::fmt;

/// Why a challenge attempt ended without a usable session
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChallengeFailure {
    /// The surface could not load the target page
    Navigation(String),
    /// The attempt was aborted, or dropped from the wait queue
    Cancelled,
    /// The proof-of-work challenge kept re-appearing
    RetryBoundExceeded { attempts: u32 },
    /// No `ready` signal before the deadline
    Timeout,
    /// The site answered with the `error` signal (outdated browser, ban page...)
    Rejected,
    /// The browser engine itself failed
    Browser(String),
}

impl fmt::Display for ChallengeFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChallengeFailure::Navigation(e) => write!(f, "navigation failed: {}", e),
            ChallengeFailure::Cancelled => write!(f, "cancelled"),
            ChallengeFailure::RetryBoundExceeded { attempts } => {
                write!(f, "proof-of-work retried {} times", attempts)
            }
            ChallengeFailure::Timeout => write!(f, "timed out"),
            ChallengeFailure::Rejected => write!(f, "site rejected the browser"),
            ChallengeFailure::Browser(e) => write!(f, "browser error: {}", e),
        }
    }
}

/// A challenge could not be completed
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("challenge could not be completed ({reason})")]
pub struct ChallengeError {
    pub reason: ChallengeFailure,
}

impl ChallengeError {
    pub fn new(reason: ChallengeFailure) -> Self {
        Self { reason }
    }

    pub fn cancelled() -> Self {
        Self::new(ChallengeFailure::Cancelled)
    }
}

/// Errors raised by content sources
#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    #[error("resource not found")]
    NotFound,

    #[error("source temporarily unavailable: {0}")]
    Transient(String),

    /// The site answered with an anti-automation page instead of content
    #[error("source requires a challenge to be solved")]
    ChallengeRequired,

    #[error("archive unreadable: {0}")]
    Archive(String),

    /// Page did not have the expected structure
    #[error("unexpected page layout: {0}")]
    Layout(String),

    #[error(transparent)]
    Challenge(#[from] ChallengeError),
}

impl SourceError {
    /// Errors after which the source should not be hit again during a run
    pub fn marks_source_down(&self) -> bool {
        matches!(
            self,
            SourceError::Transient(_)
                | SourceError::Layout(_)
                | SourceError::Challenge(_)
                | SourceError::ChallengeRequired
        )
    }
}

impl From<reqwest::Error> for SourceError {
    fn from(e: reqwest::Error) -> Self {
        match e.status() {
            Some(status) if status == reqwest::StatusCode::NOT_FOUND => SourceError::NotFound,
            _ => SourceError::Transient(e.to_string()),
        }
    }
}

impl From<zip::result::ZipError> for SourceError {
    fn from(e: zip::result::ZipError) -> Self {
        SourceError::Archive(e.to_string())
    }
}

/// Errors raised by the local database layer
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("corrupt JSON column: {0}")]
    Json(#[from] serde_json::Error),

    #[error("no {kind} with id {id}")]
    Missing { kind: &'static str, id: i64 },
}

/// Top-level error for library operations
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error(transparent)]
    Source(#[from] SourceError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("unknown source: {0}")]
    UnknownSource(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<ChallengeError> for CoreError {
    fn from(e: ChallengeError) -> Self {
        CoreError::Source(SourceError::Challenge(e))
    }
}

impl CoreError {
    /// Stable message key the presentation layer translates
    pub fn user_message(&self) -> &'static str {
        match self {
            CoreError::Source(SourceError::NotFound) => "error.not_found",
            CoreError::Source(SourceError::Transient(_)) => "error.source_unavailable",
            CoreError::Source(SourceError::ChallengeRequired)
            | CoreError::Source(SourceError::Challenge(_)) => "error.challenge_failed",
            CoreError::Source(SourceError::Archive(_)) => "error.archive_unreadable",
            CoreError::Source(SourceError::Layout(_)) => "error.source_changed",
            CoreError::Store(_) | CoreError::Io(_) => "error.local_storage",
            CoreError::UnknownSource(_) => "error.unknown_source",
        }
    }

    /// Whether this failure should blacklist the source for the rest of a run
    pub fn marks_source_down(&self) -> bool {
        matches!(self, CoreError::Source(e) if e.marks_source_down())
    }
}
