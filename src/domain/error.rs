use thiserror::Error;

/// Failures raised by the pure rubric and calendar logic.
///
/// All of them are deterministic functions of their input, so callers
/// report them and never retry.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum DomainError {
    #[error("{0}")]
    Parse(String),
    #[error("{0}")]
    Validation(String),
    #[error("{0}")]
    Computation(String),
}

impl DomainError {
    pub fn kind(&self) -> &'static str {
        match self {
            DomainError::Parse(_) => "parse_error",
            DomainError::Validation(_) => "validation_error",
            DomainError::Computation(_) => "computation_error",
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        DomainError::Validation(message.into())
    }
}
