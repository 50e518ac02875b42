//! Settlement Engine
//!
//! Periodic payout computation for restaurants and riders, and the payout
//! workflow around it.
//!
//! # Architecture
//!
//! 1. **Collection**: delivered orders of the period come from the Orders collaborator
//! 2. **Computation**: [`computer::compute`] turns orders and the entity profile into figures
//! 3. **Persistence**: [`SettlementWorkflow`] stores the settlement next to the ledger
//! 4. **Payout**: admins mark settlements paid, disputed or reopened
//!
//! # Example
//!
//! ```no_run
//! use settlement::{EntityType, SettlementPeriod, SettlementWorkflow};
//! # async fn run(workflow: SettlementWorkflow, period: SettlementPeriod) -> settlement::Result<()> {
//! let admin = ledger_core::Actor::admin("admin-1");
//! let figures = workflow.preview(EntityType::Rider, "rider-42", period, Some(1_000)).await?;
//! println!("net payout {}", figures.net_payout_cents());
//!
//! let settlement = workflow
//!     .create(EntityType::Rider, "rider-42", period, Some(1_000), "", &admin)
//!     .await?;
//! workflow.mark_paid(settlement.id, &admin)?;
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(
    missing_docs,
    rust_2018_idioms,
    missing_debug_implementations,
    clippy::all
)]

pub mod types;
pub mod orders;
pub mod computer;
pub mod workflow;
pub mod error;
pub mod config;

// Re-exports
pub use error::{Error, Result};
pub use types::*;
pub use orders::{
    BusinessCalendar, EntityDirectory, InMemoryOrders, Order, OrderQuery, OrderSource,
    OrderStatus, PaymentMethod, StaticDirectory,
};
pub use config::Config;
pub use workflow::SettlementWorkflow;
