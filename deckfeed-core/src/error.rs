use thiserror::Error;

/// Errors surfaced by the loading layer and its providers.
///
/// The type is `Clone` so a single pending fetch can hand the same outcome to
/// every caller waiting on it.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FeedError {
    /// An index could not be resolved, or a node is not part of the index.
    #[error("not found: {0}")]
    NotFound(String),

    #[error("index not loaded")]
    IndexNotLoaded,

    #[error("ordinal {ordinal} out of range for index of {len} nodes")]
    OrdinalOutOfRange { ordinal: usize, len: usize },

    /// A provider response broke the loader's contract. Never retried.
    #[error("invariant violated: {0}")]
    InvariantViolation(String),

    /// A single transient failure talking to the backend.
    #[error("transport error: {0}")]
    Transport(String),

    #[error("failed to decode backend payload: {0}")]
    Decode(String),

    /// Transient failures persisted past the retry budget.
    #[error("content unavailable after {attempts} attempts: {message}")]
    Unavailable { attempts: u32, message: String },

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("io error: {0}")]
    Io(String),
}

impl FeedError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, FeedError::Transport(_))
    }
}

impl From<std::io::Error> for FeedError {
    fn from(err: std::io::Error) -> Self {
        FeedError::Io(err.to_string())
    }
}

impl From<serde_json::Error> for FeedError {
    fn from(err: serde_json::Error) -> Self {
        FeedError::Decode(err.to_string())
    }
}

pub type Result<T, E = FeedError> = std::result::Result<T, E>;
