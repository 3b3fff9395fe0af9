use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("invalid config: {0}")]
    Config(String),
    #[error("invalid topic: {0:?}")]
    InvalidTopic(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("store error: {0}")]
    Store(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("internal error: {0}")]
    Internal(String),
}

impl CoreError {
    pub fn internal<E: std::fmt::Display>(err: E) -> Self {
        CoreError::Internal(err.to_string())
    }
}
