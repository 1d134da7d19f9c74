use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    /// A precondition on scores, counts or item fields was violated
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Item not found: {0}")]
    NotFound(i64),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Stored millisecond timestamp outside chrono's range
    #[error("Invalid timestamp: {0}")]
    InvalidTimestamp(i64),

    #[error("Database lock poisoned")]
    LockPoisoned,
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub fn invalid(msg: impl Into<String>) -> Self {
        Error::InvalidInput(msg.into())
    }
}
