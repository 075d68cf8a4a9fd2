//! Orchestrator error types

use convoy_core::domain::lifecycle::TransitionError;
use convoy_ssh::RemoteError;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, OrchestratorError>;

#[derive(Debug, Error)]
pub enum OrchestratorError {
    /// Request rejected before any remote work was attempted
    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: String },

    #[error(transparent)]
    Remote(#[from] RemoteError),

    /// A remote command ran and reported failure
    #[error("Step {step} failed with exit code {exit_code}: {stderr}")]
    CommandFailure {
        step: String,
        exit_code: i32,
        stderr: String,
    },

    #[error("Ledger error: {0}")]
    Ledger(#[from] sqlx::Error),

    #[error("Ledger unavailable: {0}")]
    LedgerUnavailable(String),

    /// Aggregated failure of a background operation
    #[error("Failed to {operation} {entity} {id}: {cause}")]
    OperationFailed {
        entity: &'static str,
        id: String,
        operation: String,
        cause: String,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid inventory {path}: {reason}")]
    Inventory { path: String, reason: String },
}

impl OrchestratorError {
    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    /// Whether the error comes from the task ledger rather than a machine
    pub fn is_ledger(&self) -> bool {
        matches!(self, Self::Ledger(_) | Self::LedgerUnavailable(_))
    }
}

impl From<TransitionError> for OrchestratorError {
    fn from(err: TransitionError) -> Self {
        Self::Validation(err.to_string())
    }
}
