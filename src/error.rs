use thiserror::Error;

pub type FeedResult<T> = Result<T, FeedError>;

/// Failures the feed can run into. None of them are fatal: fetch and
/// transport problems leave state untouched with a retry available, stale
/// responses and mismatched undos are dropped.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FeedError {
    #[error("fetch failed: {0}")]
    FetchFailure(String),

    #[error("stale response for conversation {conversation_id}")]
    StaleResponse { conversation_id: String },

    #[error("no pending undo for message {0}")]
    InvalidUndo(String),

    #[error("no conversation is open")]
    NoConversation,

    #[error("message {message_id} belongs to conversation {conversation_id}")]
    ForeignMessage {
        message_id: String,
        conversation_id: String,
    },

    #[error("configuration error: {0}")]
    Config(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("feed task has stopped")]
    Closed,
}

impl FeedError {
    /// Whether the caller can reasonably try the same operation again.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            FeedError::FetchFailure(_) | FeedError::Transport(_) | FeedError::Storage(_)
        )
    }
}

impl From<reqwest::Error> for FeedError {
    fn from(e: reqwest::Error) -> Self {
        FeedError::FetchFailure(e.to_string())
    }
}

impl From<rusqlite::Error> for FeedError {
    fn from(e: rusqlite::Error) -> Self {
        FeedError::Storage(e.to_string())
    }
}

impl From<toml::de::Error> for FeedError {
    fn from(e: toml::de::Error) -> Self {
        FeedError::Config(e.to_string())
    }
}

impl From<toml::ser::Error> for FeedError {
    fn from(e: toml::ser::Error) -> Self {
        FeedError::Config(e.to_string())
    }
}

impl From<serde_json::Error> for FeedError {
    fn from(e: serde_json::Error) -> Self {
        FeedError::Transport(e.to_string())
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for FeedError {
    fn from(e: tokio_tungstenite::tungstenite::Error) -> Self {
        FeedError::Transport(e.to_string())
    }
}

impl From<url::ParseError> for FeedError {
    fn from(e: url::ParseError) -> Self {
        FeedError::Config(e.to_string())
    }
}
