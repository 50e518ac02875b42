//! YUMI Ledger Core
//!
//! Prepaid rider credit ledger with single-use recharge codes.
//!
//! # Architecture
//!
//! - **Append-only history**: every balance change is an immutable entry
//! - **Single Writer**: one actor task serializes balance and code mutations
//! - **Atomic batches**: entry, account row and indices commit together
//! - **Audit**: every committed mutation emits one audit event
//!
//! # Invariants
//!
//! - Balance equals Σ(entry deltas) for every account, at all times
//! - Balances never go below zero
//! - A recharge code leaves `Pending` exactly once

#![forbid(unsafe_code)]
#![warn(
    missing_docs,
    rust_2018_idioms,
    missing_debug_implementations,
    clippy::all
)]

pub mod types;
pub mod storage;
pub mod ledger;
pub mod recharge;
pub mod audit;
pub mod error;
pub mod actor;
pub mod config;
pub mod metrics;

// Re-exports
pub use error::{Error, ErrorKind, Result};
pub use types::{
    Account, AccountId, AccountType, Actor, ActorRole, Cents, CodeStatus, EntryReason,
    LedgerEntry, RechargeCode,
};
pub use audit::{AuditEvent, AuditTrail, EntityRef, MemoryAuditTrail, TracingAuditTrail};
pub use storage::{ReadSnapshot, Storage, Table, Transaction};
pub use ledger::Ledger;
pub use recharge::RechargeCodeIssuer;
pub use metrics::Metrics;
pub use config::Config;
