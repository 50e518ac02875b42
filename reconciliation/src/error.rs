//! Error types for reconciliation

use ledger_core::ErrorKind;
use thiserror::Error;

/// Result type for reconciliation operations
pub type Result<T> = std::result::Result<T, Error>;

/// Reconciliation errors
#[derive(Error, Debug)]
pub enum Error {
    /// Ledger or storage error
    #[error("Ledger error: {0}")]
    Ledger(#[from] ledger_core::Error),

    /// Settlement crate error (calendar, orders model)
    #[error("Settlement error: {0}")]
    Settlement(#[from] settlement::Error),

    /// Negative declarations, missing notes, bad shift times
    #[error("Validation error: {0}")]
    Validation(String),

    /// Report not found
    #[error("Report not found: {0}")]
    NotFound(String),

    /// Invalid status transition or blocked approval
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Actor not allowed
    #[error("Forbidden: {0}")]
    Forbidden(String),

    /// Orders or roster collaborator failed
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
            Error::Settlement(e) => e.kind(),
            Error::Validation(_) => ErrorKind::Validation,
            Error::NotFound(_) => ErrorKind::NotFound,
            Error::Conflict(_) => ErrorKind::Conflict,
            Error::Forbidden(_) => ErrorKind::Forbidden,
            Error::Collaborator(_) | Error::Config(_) | Error::Io(_) => ErrorKind::Infrastructure,
        }
    }
}
