use index::StoreError;
use thiserror::Error;

/// The run-level error taxonomy. Transient errors were retried and
/// exhausted; schema errors are recorded per chunk; conflicts are
/// flagged for review; fatal errors abort a run before any external
/// call is made.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("transient failure in {operation}: {message}")]
    Transient { operation: String, message: String },

    #[error("schema violation in {operation}: {message}")]
    Schema { operation: String, message: String },

    #[error("unresolved conflict: {0}")]
    Conflict(String),

    #[error("fatal configuration error: {0}")]
    Fatal(String),
}

impl PipelineError {
    pub fn transient(operation: &str, message: impl Into<String>) -> Self {
        Self::Transient {
            operation: operation.to_string(),
            message: message.into(),
        }
    }

    pub fn store(operation: &str, error: StoreError) -> Self {
        match error {
            StoreError::Transient(message) => Self::Transient {
                operation: operation.to_string(),
                message,
            },
            StoreError::Permanent(message) => Self::Schema {
                operation: operation.to_string(),
                message,
            },
        }
    }
}
