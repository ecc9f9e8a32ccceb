use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    /// Lookup against the local store failed.
    #[error("store error: {0}")]
    Store(String),

    #[error("invalid configuration: {0}")]
    Config(String),
}

impl CoreError {
    pub fn store(message: impl Into<String>) -> Self {
        CoreError::Store(message.into())
    }

    pub fn config(message: impl Into<String>) -> Self {
        CoreError::Config(message.into())
    }
}

pub type Result<T> = std::result::Result<T, CoreError>;
