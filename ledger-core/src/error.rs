//! Error types for the ledger

use crate::types::{AccountId, Cents};
use thiserror::Error;

/// Result type for ledger operations
pub type Result<T> = std::result::Result<T, Error>;

/// Caller-facing classification shared by every crate in the workspace
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Non-positive amount, malformed period, bad token, missing notes
    Validation,
    /// Debit would drive the balance negative
    InsufficientBalance,
    /// Referenced row does not exist
    NotFound,
    /// Duplicate period, code already consumed, invalid state transition
    Conflict,
    /// Wrong actor role or wrong intended rider
    Forbidden,
    /// Mutation attempted on a paid settlement
    Immutable,
    /// Balance differs from ledger sum; internal and fatal
    InvariantViolation,
    /// Storage, serialization, actor or collaborator failure; retry with the same request
    Infrastructure,
}

/// Ledger errors
#[derive(Error, Debug)]
pub enum Error {
    /// Input rejected before touching state
    #[error("Validation error: {0}")]
    Validation(String),

    /// Debit larger than the available balance
    #[error("Insufficient balance on {account}: balance {balance_cents}, requested {requested_cents}")]
    InsufficientBalance {
        /// Account that was debited
        account: AccountId,
        /// Balance at the time of the attempt
        balance_cents: Cents,
        /// Requested debit
        requested_cents: Cents,
    },

    /// Account not found
    #[error("Account not found: {0}")]
    AccountNotFound(AccountId),

    /// Recharge code not found
    #[error("Recharge code not found: {0}")]
    CodeNotFound(String),

    /// Conflicting state (already exists, already consumed)
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Actor not allowed to perform the operation
    #[error("Forbidden: {0}")]
    Forbidden(String),

    /// Invariant violation (balance != Σ entries, etc.)
    #[error("Invariant violation: {0}")]
    InvariantViolation(String),

    /// Storage error (RocksDB)
    #[error("Storage error: {0}")]
    Storage(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] bincode::Error),

    /// Concurrency error (actor mailbox closed, etc.)
    #[error("Concurrency error: {0}")]
    Concurrency(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Classify for the calling layer
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Validation(_) => ErrorKind::Validation,
            Error::InsufficientBalance { .. } => ErrorKind::InsufficientBalance,
            Error::AccountNotFound(_) | Error::CodeNotFound(_) => ErrorKind::NotFound,
            Error::Conflict(_) => ErrorKind::Conflict,
            Error::Forbidden(_) => ErrorKind::Forbidden,
            Error::InvariantViolation(_) => ErrorKind::InvariantViolation,
            Error::Storage(_)
            | Error::Serialization(_)
            | Error::Concurrency(_)
            | Error::Config(_)
            | Error::Io(_) => ErrorKind::Infrastructure,
        }
    }
}

impl From<rocksdb::Error> for Error {
    fn from(err: rocksdb::Error) -> Self {
        Error::Storage(err.to_string())
    }
}
