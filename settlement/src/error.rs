//! Error types for settlement

use ledger_core::ErrorKind;
use thiserror::Error;

/// Result type for settlement operations
pub type Result<T> = std::result::Result<T, Error>;

/// Settlement errors
#[derive(Error, Debug)]
pub enum Error {
    /// Ledger or storage error
    #[error("Ledger error: {0}")]
    Ledger(#[from] ledger_core::Error),

    /// Malformed period, fuel on a restaurant, negative amounts
    #[error("Validation error: {0}")]
    Validation(String),

    /// Settlement or entity not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Overlapping period or invalid status transition
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Actor not allowed to run the workflow
    #[error("Forbidden: {0}")]
    Forbidden(String),

    /// Settlement already paid
    #[error("Settlement is immutable: {0}")]
    Immutable(String),

    /// Orders or directory collaborator failed
    #[error("Collaborator error: {0}")]
    Collaborator(String),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Classify for the calling layer
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Ledger(e) => e.kind(),
            Error::Validation(_) => ErrorKind::Validation,
            Error::NotFound(_) => ErrorKind::NotFound,
            Error::Conflict(_) => ErrorKind::Conflict,
            Error::Forbidden(_) => ErrorKind::Forbidden,
            Error::Immutable(_) => ErrorKind::Immutable,
            Error::Collaborator(_) | Error::Config(_) | Error::Io(_) => ErrorKind::Infrastructure,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ledger_errors_keep_their_kind() {
        let err: Error = ledger_core::Error::Conflict("dup".into()).into();
        assert_eq!(err.kind(), ErrorKind::Conflict);
        assert_eq!(Error::Immutable("paid".into()).kind(), ErrorKind::Immutable);
        assert_eq!(Error::Collaborator("timeout".into()).kind(), ErrorKind::Infrastructure);
    }
}
