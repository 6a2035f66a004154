use thiserror::Error;

use crate::config::validator::ValidationError;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Validation failed: {}", format_validation(.0))]
    Validation(Vec<ValidationError>),

    #[error("Workflow not found: {0}")]
    WorkflowNotFound(String),

    #[error("Composition not found: {0}")]
    CompositionNotFound(String),

    #[error("Execution not found: {0}")]
    ExecutionNotFound(String),

    #[error("Cost budget exceeded: spent {spent:.4} of {limit:.4}")]
    BudgetExceeded { spent: f64, limit: f64 },

    #[error("Execution cancelled")]
    Cancelled,

    #[error("Global timeout of {0}s exceeded")]
    GlobalTimeout(u64),

    #[error("Step '{step_id}' failed: {reason}")]
    StepFailed { step_id: String, reason: String },
}

fn format_validation(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(|e| e.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

impl From<Vec<ValidationError>> for EngineError {
    fn from(errors: Vec<ValidationError>) -> Self {
        EngineError::Validation(errors)
    }
}

pub type EngineResult<T> = Result<T, EngineError>;
