//! Core types for settlement

use crate::{Error, Result};
use chrono::{DateTime, NaiveDate, Utc};
use ledger_core::Cents;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Which side of the marketplace a settlement pays
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EntityType {
    /// Partner restaurant
    Restaurant,
    /// Delivery rider
    Rider,
}

impl EntityType {
    /// Stable name used in storage keys and audit refs
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityType::Restaurant => "restaurant",
            EntityType::Rider => "rider",
        }
    }
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Inclusive range of business days
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SettlementPeriod {
    /// First day (inclusive)
    pub start: NaiveDate,
    /// Last day (inclusive)
    pub end: NaiveDate,
}

impl SettlementPeriod {
    /// Create a period, rejecting `start > end`
    pub fn new(start: NaiveDate, end: NaiveDate) -> Result<Self> {
        if start > end {
            return Err(Error::Validation(format!(
                "Period start {} is after end {}",
                start, end
            )));
        }
        Ok(Self { start, end })
    }

    /// Whether two inclusive periods share at least one day
    pub fn overlaps(&self, other: &SettlementPeriod) -> bool {
        self.start <= other.end && other.start <= self.end
    }

    /// Whether `date` falls inside the period
    pub fn contains(&self, date: NaiveDate) -> bool {
        self.start <= date && date <= self.end
    }
}

impl fmt::Display for SettlementPeriod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}..={}", self.start, self.end)
    }
}

/// How a rider is paid
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PayPlan {
    /// Keeps delivery fees and bonuses
    Commission,
    /// Fixed amount per settlement period plus bonuses
    FixedSalary {
        /// Salary for one settlement period
        fixed_salary_cents: Cents,
    },
}

/// What the directory knows about an entity, as far as settlement cares
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum EntityProfile {
    /// Restaurant with its platform commission
    Restaurant {
        /// Commission taken by the platform, in percent (10 = 10%)
        commission_percentage: Decimal,
    },
    /// Rider with their pay plan
    Rider {
        /// Pay plan
        pay_plan: PayPlan,
    },
}

impl EntityProfile {
    /// Entity type this profile describes
    pub fn entity_type(&self) -> EntityType {
        match self {
            EntityProfile::Restaurant { .. } => EntityType::Restaurant,
            EntityProfile::Rider { .. } => EntityType::Rider,
        }
    }
}

/// Order totals a rider collected, by effective payment method
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectedTotals {
    /// Cash
    pub cash_cents: Cents,
    /// Card terminal
    pub pos_cents: Cents,
    /// Yape / Plin wallet transfers
    pub yape_plin_cents: Cents,
}

/// Restaurant settlement money fields
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RestaurantFigures {
    /// Delivered orders counted
    pub order_count: u32,
    /// Σ order subtotals
    pub gross_sales_cents: Cents,
    /// Commission rate applied
    pub commission_percentage: Decimal,
    /// Platform commission, rounded half-up to the cent
    pub commission_cents: Cents,
    /// gross - commission
    pub net_payout_cents: Cents,
}

/// Rider settlement money fields
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RiderFigures {
    /// Pay plan applied
    pub pay_plan: PayPlan,
    /// Delivered orders counted
    pub delivery_count: u32,
    /// Σ delivery fees
    pub delivery_fees_cents: Cents,
    /// Σ rider bonuses
    pub bonuses_cents: Cents,
    /// Fuel reimbursement granted by an admin
    pub fuel_reimbursement_cents: Cents,
    /// Amount owed to the rider
    pub net_payout_cents: Cents,
    /// Informational collected totals
    pub collected: CollectedTotals,
}

/// Derived money totals of a settlement
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SettlementFigures {
    /// Restaurant payout
    Restaurant(RestaurantFigures),
    /// Rider payout
    Rider(RiderFigures),
}

impl SettlementFigures {
    /// Amount to pay out
    pub fn net_payout_cents(&self) -> Cents {
        match self {
            SettlementFigures::Restaurant(f) => f.net_payout_cents,
            SettlementFigures::Rider(f) => f.net_payout_cents,
        }
    }
}

/// Settlement payout status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SettlementStatus {
    /// Computed, awaiting payout
    Pending,
    /// Paid out (terminal, monetary fields frozen)
    Paid,
    /// Contested by the entity or an admin
    Disputed,
}

/// Workflow action on a settlement
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SettlementAction {
    /// Record the payout
    MarkPaid,
    /// Raise a dispute
    Dispute,
    /// Resolve a dispute back to pending
    Reopen,
}

impl SettlementAction {
    /// Audit event suffix
    pub fn as_str(&self) -> &'static str {
        match self {
            SettlementAction::MarkPaid => "paid",
            SettlementAction::Dispute => "disputed",
            SettlementAction::Reopen => "reopened",
        }
    }
}

/// Allowed transitions: (from, action, to)
const TRANSITIONS: &[(SettlementStatus, SettlementAction, SettlementStatus)] = &[
    (SettlementStatus::Pending, SettlementAction::MarkPaid, SettlementStatus::Paid),
    (SettlementStatus::Pending, SettlementAction::Dispute, SettlementStatus::Disputed),
    (SettlementStatus::Disputed, SettlementAction::Reopen, SettlementStatus::Pending),
    (SettlementStatus::Disputed, SettlementAction::MarkPaid, SettlementStatus::Paid),
];

impl SettlementStatus {
    /// Next status for `action`, if the transition is allowed
    pub fn apply(self, action: SettlementAction) -> Option<SettlementStatus> {
        TRANSITIONS
            .iter()
            .find(|(from, a, _)| *from == self && *a == action)
            .map(|(_, _, to)| *to)
    }
}

/// Persisted settlement
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settlement {
    /// Settlement ID (UUIDv7)
    pub id: Uuid,
    /// Entity kind
    pub entity_type: EntityType,
    /// Entity ID
    pub entity_id: String,
    /// Settled business days
    pub period: SettlementPeriod,
    /// Payout status
    pub status: SettlementStatus,
    /// Derived money totals
    pub figures: SettlementFigures,
    /// When the payout was recorded
    pub paid_at: Option<DateTime<Utc>>,
    /// Admin notes, dispute reasons appended
    pub notes: String,
    /// Admin who created it
    pub created_by: String,
    /// Created timestamp
    pub created_at: DateTime<Utc>,
    /// Last change timestamp
    pub updated_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    #[test]
    fn test_period_validation() {
        assert!(SettlementPeriod::new(d("2024-03-02"), d("2024-03-01")).is_err());
        assert!(SettlementPeriod::new(d("2024-03-01"), d("2024-03-01")).is_ok());
    }

    #[test]
    fn test_period_overlap_is_inclusive() {
        let march = SettlementPeriod::new(d("2024-03-01"), d("2024-03-15")).unwrap();
        let touching = SettlementPeriod::new(d("2024-03-15"), d("2024-03-31")).unwrap();
        let after = SettlementPeriod::new(d("2024-03-16"), d("2024-03-31")).unwrap();

        assert!(march.overlaps(&touching));
        assert!(touching.overlaps(&march));
        assert!(!march.overlaps(&after));
        assert!(march.contains(d("2024-03-15")));
    }

    #[test]
    fn test_transition_table() {
        use SettlementAction::*;
        use SettlementStatus::*;

        assert_eq!(Pending.apply(MarkPaid), Some(Paid));
        assert_eq!(Pending.apply(Dispute), Some(Disputed));
        assert_eq!(Disputed.apply(Reopen), Some(Pending));
        assert_eq!(Disputed.apply(MarkPaid), Some(Paid));

        assert_eq!(Pending.apply(Reopen), None);
        assert_eq!(Disputed.apply(Dispute), None);
        for action in [MarkPaid, Dispute, Reopen] {
            assert_eq!(Paid.apply(action), None);
        }
    }
}
