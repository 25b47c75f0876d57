//! Promotion gate error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum GateError {
    #[error("Failed to read {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid metrics JSON in {path}: {source}")]
    Json {
        path: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Metrics summary must be a JSON object")]
    NotAnObject,
}

pub type GateResult<T> = Result<T, GateError>;
