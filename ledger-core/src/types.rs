//! Core types for the ledger
//!
//! All types are designed for:
//! - Deterministic serialization (bincode)
//! - Exact arithmetic (integer cents for money)

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Monetary amount in integer cents
pub type Cents = i64;

/// Account identifier (rider or restaurant id issued by the identity collaborator)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AccountId(String);

impl AccountId {
    /// Create new account ID
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Get as string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Kind of entity that owns an account
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AccountType {
    /// Delivery rider with prepaid credit
    Rider,
    /// Partner restaurant
    Restaurant,
}

impl fmt::Display for AccountType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AccountType::Rider => write!(f, "rider"),
            AccountType::Restaurant => write!(f, "restaurant"),
        }
    }
}

/// Account row. `balance_cents` caches the sum of the account's entries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    /// Account ID
    pub id: AccountId,
    /// Owner kind
    pub account_type: AccountType,
    /// Cached balance
    pub balance_cents: Cents,
    /// Number of entries appended so far
    pub entry_count: u64,
    /// Created timestamp
    pub created_at: DateTime<Utc>,
    /// Last mutation timestamp
    pub updated_at: DateTime<Utc>,
}

/// Why a ledger entry was written
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EntryReason {
    /// Recharge code redemption or cash top-up
    Recharge,
    /// Per-delivery platform fee charged to a commission rider
    PlatformFee,
    /// Settlement payout movement
    Settlement,
    /// Manual correction by an admin
    Adjustment,
    /// Anything else, described by the reference
    Other,
}

/// Immutable, append-only balance mutation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEntry {
    /// Unique entry ID (UUIDv7 for time-ordering)
    pub id: Uuid,
    /// Account mutated
    pub account_id: AccountId,
    /// Signed amount: positive for deposits, negative for debits
    pub delta_cents: Cents,
    /// Balance after applying this entry
    pub balance_after_cents: Cents,
    /// Reason
    pub reason: EntryReason,
    /// External reference (order id, recharge code, settlement id)
    pub ref_id: String,
    /// Actor that caused the mutation
    pub actor_id: String,
    /// Position of this entry in the account's history
    pub sequence: u64,
    /// Entry timestamp
    pub created_at: DateTime<Utc>,
}

/// Role of the caller performing an operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ActorRole {
    /// Back-office administrator
    Admin,
    /// Sales/recharge agent
    Agent,
    /// Delivery rider
    Rider,
    /// Restaurant operator
    Restaurant,
    /// Internal job
    System,
}

/// Caller identity, passed explicitly into every mutating operation
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Actor {
    /// Identity ID
    pub id: String,
    /// Role
    pub role: ActorRole,
}

impl Actor {
    /// Create new actor
    pub fn new(id: impl Into<String>, role: ActorRole) -> Self {
        Self {
            id: id.into(),
            role,
        }
    }

    /// Administrator shorthand
    pub fn admin(id: impl Into<String>) -> Self {
        Self::new(id, ActorRole::Admin)
    }

    /// Rider shorthand
    pub fn rider(id: impl Into<String>) -> Self {
        Self::new(id, ActorRole::Rider)
    }

    /// Internal job identity
    pub fn system() -> Self {
        Self::new("system", ActorRole::System)
    }

    /// Whether this actor is the given rider
    pub fn is_rider(&self, rider: &AccountId) -> bool {
        self.role == ActorRole::Rider && self.id == rider.as_str()
    }
}

/// Recharge code status. Moves out of `Pending` exactly once.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CodeStatus {
    /// Issued, not yet consumed
    Pending,
    /// Deposited into a rider account (terminal)
    Redeemed,
    /// Cancelled before use (terminal)
    Voided,
}

impl CodeStatus {
    /// Terminal states never change again
    pub fn is_terminal(&self) -> bool {
        !matches!(self, CodeStatus::Pending)
    }
}

/// Single-use voucher that deposits a fixed amount into a rider account
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RechargeCode {
    /// Canonical token (`XXXX-XXXX-XXXX-C`)
    pub code: String,
    /// Amount deposited on redemption
    pub amount_cents: Cents,
    /// Status
    pub status: CodeStatus,
    /// Rider the code is reserved for, if any
    pub intended_rider_id: Option<AccountId>,
    /// Agent that issued the code
    pub created_by: String,
    /// Rider that redeemed the code
    pub redeemed_by: Option<AccountId>,
    /// Redemption timestamp
    pub redeemed_at: Option<DateTime<Utc>>,
    /// Void timestamp
    pub voided_at: Option<DateTime<Utc>>,
    /// Why the code was voided
    pub void_reason: Option<String>,
    /// Free-form issuer notes
    pub notes: String,
    /// Issue timestamp
    pub created_at: DateTime<Utc>,
}
