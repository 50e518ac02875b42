//! Daily cash reconciliation
//!
//! A report opens at a rider's first shift start of the day, is submitted by
//! the rider with the totals they collected, and is approved or rejected by an
//! admin. Only cash is gated by the tolerance; POS and Yape/Plin totals are
//! recorded for reference.

use crate::types::{exceeds_tolerance, DailyReport, ReportAction, ReportStatus};
use crate::{Config, Error, Result};
use chrono::{DateTime, NaiveDate, Utc};
use ledger_core::storage::{composite_key, Table, Transaction};
use ledger_core::{Actor, ActorRole, AuditEvent, AuditTrail, EntityRef, Storage};
use settlement::{
    BusinessCalendar, CollectedTotals, EntityType, OrderQuery, OrderSource, PaymentMethod,
    SettlementPeriod,
};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Daily reconciliation service
pub struct DailyReconciliation {
    storage: Arc<Storage>,
    audit: Arc<dyn AuditTrail>,
    orders: Arc<dyn OrderSource>,
    calendar: BusinessCalendar,
    config: Config,
}

impl std::fmt::Debug for DailyReconciliation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DailyReconciliation")
            .field("storage", &self.storage)
            .field("config", &self.config)
            .finish()
    }
}

impl DailyReconciliation {
    /// Create service over the shared ledger storage
    pub fn new(
        config: Config,
        storage: Arc<Storage>,
        audit: Arc<dyn AuditTrail>,
        orders: Arc<dyn OrderSource>,
    ) -> Result<Self> {
        Ok(Self {
            storage,
            audit,
            orders,
            calendar: BusinessCalendar::new(config.utc_offset_minutes)?,
            config,
        })
    }

    /// Business calendar used for report dates
    pub fn calendar(&self) -> BusinessCalendar {
        self.calendar
    }

    /// Open the day's draft report, or return the one already open
    pub fn open_report(
        &self,
        rider_id: &str,
        date: NaiveDate,
        started_at: DateTime<Utc>,
        actor: &Actor,
    ) -> Result<DailyReport> {
        require_rider_or_staff(actor, rider_id)?;
        if rider_id.trim().is_empty() || rider_id.contains('|') {
            return Err(Error::Validation(format!("Invalid rider id {:?}", rider_id)));
        }
        let shift_day = self.calendar.local_date(started_at);
        if shift_day != date {
            return Err(Error::Validation(format!(
                "Shift started at {} falls on {}, not {}",
                started_at, shift_day, date
            )));
        }

        let (report, created) = self.storage.transaction(|txn| {
            if let Some(existing) = txn.get::<DailyReport>(Table::DailyReports, &report_key(rider_id, date))? {
                return Ok::<_, Error>((existing, false));
            }
            let report = DailyReport::draft(rider_id, date, started_at);
            txn.put(Table::DailyReports, &report_key(rider_id, date), &report)?;
            Ok((report, true))
        })?;

        if created {
            info!(rider_id, date = %date, "Daily report opened");
            self.audit.emit(AuditEvent::new::<DailyReport, _>(
                "daily_report.opened",
                actor,
                entity_ref(rider_id, date),
                None,
                &report,
            ));
        } else {
            debug!(rider_id, date = %date, "Daily report already open");
        }

        Ok(report)
    }

    /// Record the end of the rider's shift on a draft report
    pub fn close_shift(
        &self,
        rider_id: &str,
        date: NaiveDate,
        ended_at: DateTime<Utc>,
        actor: &Actor,
    ) -> Result<DailyReport> {
        require_rider_or_staff(actor, rider_id)?;

        let (before, after) = self.storage.transaction(|txn| {
            let before = load(txn, rider_id, date)?;
            if before.status != ReportStatus::Draft {
                return Err(Error::Conflict(format!(
                    "Report {} {} is {:?}, shift can only close on a draft",
                    rider_id, date, before.status
                )));
            }
            if ended_at < before.shift_started_at {
                return Err(Error::Validation(format!(
                    "Shift end {} is before start {}",
                    ended_at, before.shift_started_at
                )));
            }

            let mut after = before.clone();
            after.shift_ended_at = Some(ended_at);
            after.updated_at = Utc::now();
            txn.put(Table::DailyReports, &report_key(rider_id, date), &after)?;
            Ok((before, after))
        })?;

        info!(rider_id, date = %date, "Shift closed");
        self.audit.emit(AuditEvent::new(
            "daily_report.shift_closed",
            actor,
            entity_ref(rider_id, date),
            Some(&before),
            &after,
        ));

        Ok(after)
    }

    /// Totals of the rider's delivered orders for the day, by effective payment method
    pub async fn compute_expected(&self, rider_id: &str, date: NaiveDate) -> Result<CollectedTotals> {
        let period = SettlementPeriod { start: date, end: date };
        let (from, until) = self.calendar.bounds(&period)?;
        let query = OrderQuery {
            entity_type: EntityType::Rider,
            entity_id: rider_id.to_string(),
            from,
            until,
        };

        let orders = self
            .orders
            .delivered_orders(&query)
            .await
            .map_err(|e| Error::Collaborator(format!("Order fetch failed: {:#}", e)))?;

        let mut totals = CollectedTotals::default();
        for order in orders.iter().filter(|o| {
            o.belongs_to(EntityType::Rider, rider_id)
                && o.delivered_at.map_or(false, |t| self.calendar.local_date(t) == date)
        }) {
            let slot = match order.effective_payment_method() {
                PaymentMethod::Cash => &mut totals.cash_cents,
                PaymentMethod::Pos => &mut totals.pos_cents,
                PaymentMethod::YapePlin => &mut totals.yape_plin_cents,
            };
            *slot = slot
                .checked_add(order.total_cents)
                .ok_or_else(|| Error::Validation("Amount overflow".to_string()))?;
        }

        Ok(totals)
    }

    /// Rider declares collected totals; expected totals and the discrepancy are recomputed
    pub async fn submit(
        &self,
        rider_id: &str,
        date: NaiveDate,
        declared: CollectedTotals,
        notes: &str,
        actor: &Actor,
    ) -> Result<DailyReport> {
        if !actor.is_rider(&ledger_core::AccountId::new(rider_id)) {
            return Err(Error::Forbidden(format!(
                "{} may not submit the report of rider {}",
                actor.id, rider_id
            )));
        }
        if declared.cash_cents < 0 || declared.pos_cents < 0 || declared.yape_plin_cents < 0 {
            return Err(Error::Validation("Declared totals must not be negative".to_string()));
        }

        let expected = self.compute_expected(rider_id, date).await?;
        let discrepancy = declared
            .cash_cents
            .checked_sub(expected.cash_cents)
            .ok_or_else(|| Error::Validation("Amount overflow".to_string()))?;
        let has_discrepancy = exceeds_tolerance(discrepancy, self.config.tolerance_cents);

        let after = self.transition(rider_id, date, ReportAction::Submit, actor, |r| {
            let now = Utc::now();
            r.declared = declared;
            r.expected = expected;
            r.cash_discrepancy_cents = discrepancy;
            r.has_discrepancy = has_discrepancy;
            r.rider_notes = notes.trim().to_string();
            r.submitted_at = Some(now);
            Ok(())
        })?;

        if has_discrepancy {
            warn!(
                rider_id,
                date = %date,
                declared_cash_cents = declared.cash_cents,
                expected_cash_cents = expected.cash_cents,
                cash_discrepancy_cents = discrepancy,
                "Cash discrepancy above tolerance"
            );
        }

        Ok(after)
    }

    /// Admin accepts a submitted report
    pub fn approve(&self, rider_id: &str, date: NaiveDate, actor: &Actor) -> Result<DailyReport> {
        require_admin(actor)?;
        let allow_discrepancy = self.config.approve_with_discrepancy;

        self.transition(rider_id, date, ReportAction::Approve, actor, |r| {
            if r.has_discrepancy && !allow_discrepancy {
                return Err(Error::Conflict(format!(
                    "Report {} {} has a cash discrepancy of {}; reject it instead",
                    r.rider_id, r.date, r.cash_discrepancy_cents
                )));
            }
            r.reviewed_at = Some(Utc::now());
            r.reviewed_by = Some(actor.id.clone());
            Ok(())
        })
    }

    /// Admin refuses a submitted report; notes are required
    pub fn reject(
        &self,
        rider_id: &str,
        date: NaiveDate,
        admin_notes: &str,
        actor: &Actor,
    ) -> Result<DailyReport> {
        require_admin(actor)?;
        let admin_notes = admin_notes.trim();
        if admin_notes.is_empty() {
            return Err(Error::Validation("Rejection requires admin notes".to_string()));
        }

        self.transition(rider_id, date, ReportAction::Reject, actor, |r| {
            r.admin_notes = admin_notes.to_string();
            r.reviewed_at = Some(Utc::now());
            r.reviewed_by = Some(actor.id.clone());
            Ok(())
        })
    }

    /// Report of a rider for a day
    pub fn get(&self, rider_id: &str, date: NaiveDate) -> Result<DailyReport> {
        self.storage
            .get(Table::DailyReports, &report_key(rider_id, date))?
            .ok_or_else(|| Error::NotFound(format!("{} {}", rider_id, date)))
    }

    /// Reports in a status, oldest day first
    pub fn list_by_status(&self, status: ReportStatus) -> Result<Vec<DailyReport>> {
        let mut reports: Vec<DailyReport> = self
            .storage
            .scan_all::<DailyReport>(Table::DailyReports)?
            .into_iter()
            .filter(|r| r.status == status)
            .collect();
        reports.sort_by(|a, b| a.date.cmp(&b.date).then_with(|| a.rider_id.cmp(&b.rider_id)));
        Ok(reports)
    }

    fn transition<F>(
        &self,
        rider_id: &str,
        date: NaiveDate,
        action: ReportAction,
        actor: &Actor,
        mutate: F,
    ) -> Result<DailyReport>
    where
        F: FnOnce(&mut DailyReport) -> Result<()>,
    {
        let result: Result<(DailyReport, DailyReport)> = self.storage.transaction(|txn| {
            let before = load(txn, rider_id, date)?;
            let next = before.status.apply(action).ok_or_else(|| {
                Error::Conflict(format!(
                    "Report {} {} cannot go from {:?} via {:?}",
                    rider_id, date, before.status, action
                ))
            })?;

            let mut after = before.clone();
            mutate(&mut after)?;
            after.status = next;
            after.updated_at = Utc::now();
            txn.put(Table::DailyReports, &report_key(rider_id, date), &after)?;
            Ok((before, after))
        });

        let (before, after) = match result {
            Ok(pair) => pair,
            Err(e) => {
                warn!(rider_id, date = %date, action = ?action, error = %e, "Report transition rejected");
                return Err(e);
            }
        };

        info!(
            rider_id,
            date = %date,
            from = ?before.status,
            to = ?after.status,
            actor = %actor.id,
            "Daily report status changed"
        );
        self.audit.emit(AuditEvent::new(
            format!("daily_report.{}", action.as_str()),
            actor,
            entity_ref(rider_id, date),
            Some(&before),
            &after,
        ));

        Ok(after)
    }
}

fn require_admin(actor: &Actor) -> Result<()> {
    if actor.role != ActorRole::Admin {
        return Err(Error::Forbidden(format!(
            "{} ({:?}) may not review daily reports",
            actor.id, actor.role
        )));
    }
    Ok(())
}

fn require_rider_or_staff(actor: &Actor, rider_id: &str) -> Result<()> {
    match actor.role {
        ActorRole::Admin | ActorRole::System => Ok(()),
        ActorRole::Rider if actor.id == rider_id => Ok(()),
        _ => Err(Error::Forbidden(format!(
            "{} ({:?}) may not manage the shift of rider {}",
            actor.id, actor.role, rider_id
        ))),
    }
}

fn report_key(rider_id: &str, date: NaiveDate) -> Vec<u8> {
    composite_key(&[rider_id.as_bytes(), date.to_string().as_bytes()])
}

fn load(txn: &Transaction<'_>, rider_id: &str, date: NaiveDate) -> Result<DailyReport> {
    txn.get(Table::DailyReports, &report_key(rider_id, date))?
        .ok_or_else(|| Error::NotFound(format!("{} {}", rider_id, date)))
}

fn entity_ref(rider_id: &str, date: NaiveDate) -> EntityRef {
    EntityRef::new("daily_report", format!("{}|{}", rider_id, date))
}

#[cfg(test)]
mod tests {
    use super::*;
    use ledger_core::{ErrorKind, MemoryAuditTrail};
    use settlement::{InMemoryOrders, Order, OrderStatus};

    struct Fixture {
        service: DailyReconciliation,
        orders: Arc<InMemoryOrders>,
        audit: Arc<MemoryAuditTrail>,
        _temp: tempfile::TempDir,
    }

    fn fixture(config: Config) -> Fixture {
        let temp = tempfile::tempdir().unwrap();
        let mut ledger_config = ledger_core::Config::default();
        ledger_config.data_dir = temp.path().to_path_buf();
        let storage = Arc::new(Storage::open(&ledger_config).unwrap());

        let orders = Arc::new(InMemoryOrders::new());
        let audit = Arc::new(MemoryAuditTrail::new());
        let service =
            DailyReconciliation::new(config, storage, audit.clone(), orders.clone()).unwrap();

        Fixture {
            service,
            orders,
            audit,
            _temp: temp,
        }
    }

    fn day() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 3, 5).unwrap()
    }

    fn at(s: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc)
    }

    fn delivered(id: &str, total: i64, method: PaymentMethod, when: &str) -> Order {
        Order {
            id: id.into(),
            restaurant_id: "rest-1".into(),
            assigned_rider_id: Some("rider-1".into()),
            subtotal_cents: total,
            delivery_fee_cents: 0,
            rider_bonus_cents: 0,
            total_cents: total,
            payment_method: method,
            actual_payment_method: None,
            status: OrderStatus::Delivered,
            delivered_at: Some(at(when)),
        }
    }

    fn cash(cents: i64) -> CollectedTotals {
        CollectedTotals {
            cash_cents: cents,
            ..CollectedTotals::default()
        }
    }

    #[test]
    fn test_open_report_is_idempotent() {
        let f = fixture(Config::default());
        let rider = Actor::rider("rider-1");
        let first = f
            .service
            .open_report("rider-1", day(), at("2024-03-05T13:00:00Z"), &rider)
            .unwrap();
        let second = f
            .service
            .open_report("rider-1", day(), at("2024-03-05T15:00:00Z"), &rider)
            .unwrap();

        assert_eq!(first, second);
        assert_eq!(second.shift_started_at, at("2024-03-05T13:00:00Z"));
        assert_eq!(f.audit.of_type("daily_report.opened").len(), 1);
    }

    #[test]
    fn test_open_report_requires_shift_on_that_day() {
        let f = fixture(Config::default());
        let rider = Actor::rider("rider-1");

        // 03:00 UTC on the 6th is still the 5th in Lima
        f.service
            .open_report("rider-1", day(), at("2024-03-06T03:00:00Z"), &rider)
            .unwrap();

        for started in ["2024-03-05T04:59:00Z", "2024-03-06T05:00:00Z"] {
            let err = f
                .service
                .open_report("rider-2", day(), at(started), &Actor::rider("rider-2"))
                .unwrap_err();
            assert_eq!(err.kind(), ErrorKind::Validation);
        }
        assert!(f.service.get("rider-2", day()).is_err());
    }

    #[tokio::test]
    async fn test_expected_uses_effective_method_and_local_day() {
        let f = fixture(Config::default());
        f.orders.upsert(delivered("o-1", 4_000, PaymentMethod::Cash, "2024-03-05T14:00:00Z"));
        let mut switched = delivered("o-2", 2_500, PaymentMethod::Cash, "2024-03-05T16:00:00Z");
        switched.actual_payment_method = Some(PaymentMethod::YapePlin);
        f.orders.upsert(switched);
        f.orders.upsert(delivered("o-3", 1_000, PaymentMethod::Pos, "2024-03-06T02:00:00Z"));
        // Next local day in Lima
        f.orders.upsert(delivered("o-4", 9_999, PaymentMethod::Cash, "2024-03-06T06:00:00Z"));

        let expected = f.service.compute_expected("rider-1", day()).await.unwrap();
        assert_eq!(expected.cash_cents, 4_000);
        assert_eq!(expected.yape_plin_cents, 2_500);
        assert_eq!(expected.pos_cents, 1_000);
    }

    #[tokio::test]
    async fn test_submit_flags_discrepancy_and_blocks_approval() {
        let f = fixture(Config::default());
        f.orders.upsert(delivered("o-1", 14_900, PaymentMethod::Cash, "2024-03-05T14:00:00Z"));
        let rider = Actor::rider("rider-1");
        let admin = Actor::admin("admin-1");

        f.service
            .open_report("rider-1", day(), at("2024-03-05T13:00:00Z"), &rider)
            .unwrap();
        let submitted = f
            .service
            .submit("rider-1", day(), cash(15_000), "tips mixed in", &rider)
            .await
            .unwrap();

        assert_eq!(submitted.status, ReportStatus::Submitted);
        assert_eq!(submitted.expected.cash_cents, 14_900);
        assert_eq!(submitted.cash_discrepancy_cents, 100);
        assert!(submitted.has_discrepancy);

        let err = f.service.approve("rider-1", day(), &admin).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Conflict);
        assert_eq!(f.service.get("rider-1", day()).unwrap().status, ReportStatus::Submitted);

        let err = f.service.reject("rider-1", day(), "   ", &admin).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);

        let rejected = f
            .service
            .reject("rider-1", day(), "return 1.00 to the office", &admin)
            .unwrap();
        assert_eq!(rejected.status, ReportStatus::Rejected);
        assert_eq!(rejected.reviewed_by.as_deref(), Some("admin-1"));

        let err = f
            .service
            .submit("rider-1", day(), cash(14_900), "", &rider)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Conflict);
    }

    #[tokio::test]
    async fn test_within_tolerance_approves() {
        let f = fixture(Config::default());
        f.orders.upsert(delivered("o-1", 14_900, PaymentMethod::Cash, "2024-03-05T14:00:00Z"));
        let rider = Actor::rider("rider-1");

        f.service
            .open_report("rider-1", day(), at("2024-03-05T13:00:00Z"), &rider)
            .unwrap();
        let submitted = f
            .service
            .submit("rider-1", day(), cash(14_850), "", &rider)
            .await
            .unwrap();
        assert_eq!(submitted.cash_discrepancy_cents, -50);
        assert!(!submitted.has_discrepancy);

        let approved = f
            .service
            .approve("rider-1", day(), &Actor::admin("admin-1"))
            .unwrap();
        assert_eq!(approved.status, ReportStatus::Approved);
        assert_eq!(f.service.list_by_status(ReportStatus::Approved).unwrap().len(), 1);
        assert!(f.service.list_by_status(ReportStatus::Submitted).unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_approve_with_discrepancy_when_configured() {
        let config = Config {
            approve_with_discrepancy: true,
            ..Config::default()
        };
        let f = fixture(config);
        let rider = Actor::rider("rider-1");

        f.service
            .open_report("rider-1", day(), at("2024-03-05T13:00:00Z"), &rider)
            .unwrap();
        f.service
            .submit("rider-1", day(), cash(5_000), "", &rider)
            .await
            .unwrap();
        let approved = f
            .service
            .approve("rider-1", day(), &Actor::admin("admin-1"))
            .unwrap();
        assert!(approved.has_discrepancy);
        assert_eq!(approved.status, ReportStatus::Approved);
    }

    #[tokio::test]
    async fn test_submit_rules() {
        let f = fixture(Config::default());
        let rider = Actor::rider("rider-1");

        let err = f
            .service
            .submit("rider-1", day(), cash(0), "", &rider)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);

        f.service
            .open_report("rider-1", day(), at("2024-03-05T13:00:00Z"), &rider)
            .unwrap();

        let err = f
            .service
            .submit("rider-1", day(), cash(0), "", &Actor::rider("rider-2"))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Forbidden);

        let err = f
            .service
            .submit("rider-1", day(), cash(-1), "", &rider)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);

        let err = f.service.approve("rider-1", day(), &rider).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Forbidden);

        let err = f
            .service
            .approve("rider-1", day(), &Actor::admin("admin-1"))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Conflict);
    }

    #[test]
    fn test_close_shift() {
        let f = fixture(Config::default());
        let rider = Actor::rider("rider-1");
        f.service
            .open_report("rider-1", day(), at("2024-03-05T13:00:00Z"), &rider)
            .unwrap();

        let err = f
            .service
            .close_shift("rider-1", day(), at("2024-03-05T12:00:00Z"), &rider)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);

        let closed = f
            .service
            .close_shift("rider-1", day(), at("2024-03-05T22:00:00Z"), &rider)
            .unwrap();
        assert_eq!(closed.shift_ended_at, Some(at("2024-03-05T22:00:00Z")));
        assert_eq!(f.audit.of_type("daily_report.shift_closed").len(), 1);

        let err = f
            .service
            .close_shift("rider-1", day(), at("2024-03-05T22:00:00Z"), &Actor::rider("rider-2"))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Forbidden);
    }
}
