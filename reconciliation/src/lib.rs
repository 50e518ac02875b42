//! Daily Reconciliation
//!
//! Riders who collect cash on behalf of the platform declare their totals at
//! the end of each business day. The declaration is compared with the totals
//! of the orders they delivered; a cash difference above tolerance blocks
//! approval and routes the report to rejection with admin notes.
//!
//! # Lifecycle
//!
//! ```text
//! (first shift start) -> Draft --submit--> Submitted --approve--> Approved
//!                                                    \--reject---> Rejected
//! ```
//!
//! Reports live in the `daily_reports` column family of the ledger database
//! and every transition emits one audit event.

#![forbid(unsafe_code)]
#![warn(
    missing_docs,
    rust_2018_idioms,
    missing_debug_implementations,
    clippy::all
)]

pub mod types;
pub mod service;
pub mod scheduler;
pub mod error;
pub mod config;

// Re-exports
pub use error::{Error, Result};
pub use types::{DailyReport, ReportAction, ReportStatus};
pub use service::DailyReconciliation;
pub use scheduler::{AutoOpenJob, InMemoryRoster, RiderRoster, ShiftStart};
pub use config::Config;
