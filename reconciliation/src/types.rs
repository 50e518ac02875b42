//! Daily report types

use chrono::{DateTime, NaiveDate, Utc};
use ledger_core::Cents;
use serde::{Deserialize, Serialize};
use settlement::CollectedTotals;

/// Report status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ReportStatus {
    /// Open for the rider's shift
    Draft,
    /// Declared by the rider, awaiting review
    Submitted,
    /// Accepted by an admin (terminal)
    Approved,
    /// Refused by an admin (terminal)
    Rejected,
}

/// Workflow action on a report
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ReportAction {
    /// Rider declares collected totals
    Submit,
    /// Admin accepts
    Approve,
    /// Admin refuses
    Reject,
}

impl ReportAction {
    /// Audit event suffix
    pub fn as_str(&self) -> &'static str {
        match self {
            ReportAction::Submit => "submitted",
            ReportAction::Approve => "approved",
            ReportAction::Reject => "rejected",
        }
    }
}

const TRANSITIONS: &[(ReportStatus, ReportAction, ReportStatus)] = &[
    (ReportStatus::Draft, ReportAction::Submit, ReportStatus::Submitted),
    (ReportStatus::Submitted, ReportAction::Approve, ReportStatus::Approved),
    (ReportStatus::Submitted, ReportAction::Reject, ReportStatus::Rejected),
];

impl ReportStatus {
    /// Next status for `action`, if allowed
    pub fn apply(self, action: ReportAction) -> Option<ReportStatus> {
        TRANSITIONS
            .iter()
            .find(|(from, a, _)| *from == self && *a == action)
            .map(|(_, _, to)| *to)
    }
}

/// One rider's cash reconciliation for one business day
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DailyReport {
    /// Rider ID
    pub rider_id: String,
    /// Business day
    pub date: NaiveDate,
    /// First shift start of the day
    pub shift_started_at: DateTime<Utc>,
    /// Shift end, once recorded
    pub shift_ended_at: Option<DateTime<Utc>>,
    /// Totals the rider declared
    pub declared: CollectedTotals,
    /// Totals computed from delivered orders at submission
    pub expected: CollectedTotals,
    /// declared cash - expected cash
    pub cash_discrepancy_cents: Cents,
    /// |cash discrepancy| above tolerance
    pub has_discrepancy: bool,
    /// Status
    pub status: ReportStatus,
    /// Rider notes
    pub rider_notes: String,
    /// Reviewer notes
    pub admin_notes: String,
    /// Submission instant
    pub submitted_at: Option<DateTime<Utc>>,
    /// Review instant
    pub reviewed_at: Option<DateTime<Utc>>,
    /// Reviewing admin
    pub reviewed_by: Option<String>,
    /// Created timestamp
    pub created_at: DateTime<Utc>,
    /// Last change timestamp
    pub updated_at: DateTime<Utc>,
}

impl DailyReport {
    /// Fresh draft for a shift start
    pub fn draft(rider_id: &str, date: NaiveDate, started_at: DateTime<Utc>) -> Self {
        let now = Utc::now();
        Self {
            rider_id: rider_id.to_string(),
            date,
            shift_started_at: started_at,
            shift_ended_at: None,
            declared: CollectedTotals::default(),
            expected: CollectedTotals::default(),
            cash_discrepancy_cents: 0,
            has_discrepancy: false,
            status: ReportStatus::Draft,
            rider_notes: String::new(),
            admin_notes: String::new(),
            submitted_at: None,
            reviewed_at: None,
            reviewed_by: None,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Whether a cash discrepancy is flagged
pub fn exceeds_tolerance(discrepancy_cents: Cents, tolerance_cents: Cents) -> bool {
    discrepancy_cents.saturating_abs() > tolerance_cents
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transitions() {
        use ReportAction::*;
        use ReportStatus::*;

        assert_eq!(Draft.apply(Submit), Some(Submitted));
        assert_eq!(Submitted.apply(Approve), Some(Approved));
        assert_eq!(Submitted.apply(Reject), Some(Rejected));

        assert_eq!(Draft.apply(Approve), None);
        assert_eq!(Submitted.apply(Submit), None);
        // No resubmission path after rejection
        assert_eq!(Rejected.apply(Submit), None);
        assert_eq!(Approved.apply(Reject), None);
    }

    #[test]
    fn test_tolerance_is_strict() {
        assert!(!exceeds_tolerance(50, 50));
        assert!(!exceeds_tolerance(-50, 50));
        assert!(exceeds_tolerance(51, 50));
        assert!(exceeds_tolerance(-100, 50));
        assert!(exceeds_tolerance(100, 50));
    }
}
