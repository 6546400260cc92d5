//! Domain error model.

use thiserror::Error;

pub type DomainResult<T> = Result<T, DomainError>;

/// Deterministic failures raised by pure domain code. IO failures never
/// appear here.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// Caller-supplied input was rejected.
    #[error("validation failed: {0}")]
    Validation(String),

    /// An identifier did not parse or was out of range.
    #[error("invalid identifier: {0}")]
    InvalidId(String),

    /// A persisted value no longer decodes, e.g. an unknown status string.
    #[error("corrupt stored value: {0}")]
    Corrupt(String),
}

impl DomainError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn invalid_id(msg: impl Into<String>) -> Self {
        Self::InvalidId(msg.into())
    }

    pub fn corrupt(msg: impl Into<String>) -> Self {
        Self::Corrupt(msg.into())
    }

    /// The message without the category prefix.
    pub fn detail(&self) -> &str {
        match self {
            DomainError::Validation(msg) | DomainError::InvalidId(msg) | DomainError::Corrupt(msg) => msg,
        }
    }

    /// `true` when the caller can fix the failure by changing the input.
    pub fn is_caller_fault(&self) -> bool {
        !matches!(self, DomainError::Corrupt(_))
    }
}
