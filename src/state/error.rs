use thiserror::Error;

use crate::core::errors::CoreError;

#[derive(Debug, Error)]
pub enum InitializationError {
    #[error("Failed to load configuration: {0}")]
    Config(#[source] CoreError),

    #[error("Failed to initialize generation provider: {0}")]
    Provider(#[source] CoreError),

    #[error("Failed to subscribe ingestor: {0}")]
    Ingestor(#[source] CoreError),

    #[error("Failed to attach audit trail: {0}")]
    Audit(#[source] CoreError),
}
