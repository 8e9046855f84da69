use std::io;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CliError {
    #[error(transparent)]
    Core(#[from] errand_core::Error),
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Serialization(#[from] serde_json::Error),
    #[error("Action ID cannot be empty")]
    EmptyActionId,
    #[error("Action not found for id/prefix: {0}")]
    ActionNotFound(String),
    #[error("{0}")]
    AmbiguousActionId(String),
    #[error("Payload is not valid JSON: {0}")]
    InvalidPayload(String),
    #[error("Configuration error: {0}")]
    Config(String),
    #[error(
        "No backend configured. Run `errand config init --api-base-url <URL>` or set ERRAND_API_BASE_URL."
    )]
    BackendNotConfigured,
    #[error("Backend at {0} is unreachable; queued actions were left untouched")]
    BackendUnreachable(String),
}
