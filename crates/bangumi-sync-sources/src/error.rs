use bangumi_sync_models::Scope;
use thiserror::Error;

/// Page-level fetch failures.
///
/// Every variant carries the offset of the page that could not be fetched,
/// which is also the last confirmed cursor position for the scope.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("rate limited on {scope} at offset {offset}, gave up after {retries} retries")]
    RateLimitExceeded { scope: Scope, offset: u32, retries: u32 },

    #[error("transient failure on {scope} at offset {offset} after {retries} retries: {reason}")]
    Transient { scope: Scope, offset: u32, retries: u32, reason: String },

    #[error("fatal failure on {scope} at offset {offset}: {reason}")]
    Fatal { scope: Scope, offset: u32, status: Option<u16>, reason: String },

    #[error("fetch cancelled on {scope} at offset {offset}")]
    Cancelled { scope: Scope, offset: u32 },
}

impl FetchError {
    pub fn scope(&self) -> Scope {
        match self {
            FetchError::RateLimitExceeded { scope, .. }
            | FetchError::Transient { scope, .. }
            | FetchError::Fatal { scope, .. }
            | FetchError::Cancelled { scope, .. } => *scope,
        }
    }

    pub fn offset(&self) -> u32 {
        match self {
            FetchError::RateLimitExceeded { offset, .. }
            | FetchError::Transient { offset, .. }
            | FetchError::Fatal { offset, .. }
            | FetchError::Cancelled { offset, .. } => *offset,
        }
    }

    /// Fatal errors abort the whole run; everything else only stops one scope
    pub fn is_fatal(&self) -> bool {
        matches!(self, FetchError::Fatal { .. })
    }
}

/// Failures below the HTTP status level
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("request timed out: {0}")]
    Timeout(String),

    #[error("connection failed: {0}")]
    Connection(String),

    /// The request itself is invalid and retrying cannot help
    #[error("invalid request: {0}")]
    InvalidRequest(String),
}
