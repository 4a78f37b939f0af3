//! Domain errors

use thiserror::Error;

/// Result of a domain operation
pub type Result<T> = std::result::Result<T, DomainError>;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DomainError {
    #[error("Invalid state transition: {0}")]
    InvalidStateTransition(String),

    #[error("Invalid operation: {0}")]
    InvalidOperation(String),

    #[error("Entity not found: {0}")]
    NotFound(String),

    #[error("Collaborator failure: {0}")]
    Collaborator(String),
}

impl DomainError {
    /// True for errors caused by calling an operation in the wrong state
    pub fn is_state_error(&self) -> bool {
        matches!(
            self,
            DomainError::InvalidStateTransition(_) | DomainError::InvalidOperation(_)
        )
    }
}
