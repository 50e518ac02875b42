//! Settlement workflow
//!
//! Wraps [`compute`](crate::computer::compute) with persistence and payout
//! status. Creation checks overlap and inserts inside one storage transaction,
//! with a per-entity period index as the uniqueness guard:
//!
//! ```text
//! indices: settlement_period|<entity_type>|<entity_id>|<start>|<end>|<settlement_id>
//! ```
//!
//! Paid settlements are frozen; every later mutation fails `Immutable`.

use crate::computer::{compute, ComputeInput};
use crate::orders::{BusinessCalendar, EntityDirectory, OrderQuery, OrderSource};
use crate::types::{
    EntityType, Settlement, SettlementAction, SettlementFigures, SettlementPeriod,
    SettlementStatus,
};
use crate::{Config, Error, Result};
use chrono::{NaiveDate, Utc};
use ledger_core::storage::{composite_key, Table, Transaction};
use ledger_core::{Actor, ActorRole, AuditEvent, AuditTrail, Cents, EntityRef, Storage};
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

const PERIOD_INDEX: &[u8] = b"settlement_period";

/// Settlement service
pub struct SettlementWorkflow {
    storage: Arc<Storage>,
    audit: Arc<dyn AuditTrail>,
    orders: Arc<dyn OrderSource>,
    directory: Arc<dyn EntityDirectory>,
    calendar: BusinessCalendar,
}

impl std::fmt::Debug for SettlementWorkflow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SettlementWorkflow")
            .field("storage", &self.storage)
            .field("calendar", &self.calendar)
            .finish()
    }
}

impl SettlementWorkflow {
    /// Create workflow over the shared ledger storage
    pub fn new(
        config: &Config,
        storage: Arc<Storage>,
        audit: Arc<dyn AuditTrail>,
        orders: Arc<dyn OrderSource>,
        directory: Arc<dyn EntityDirectory>,
    ) -> Result<Self> {
        let calendar = BusinessCalendar::new(config.utc_offset_minutes)?;
        info!(
            service = %config.service_name,
            utc_offset_minutes = config.utc_offset_minutes,
            "Settlement workflow ready"
        );

        Ok(Self {
            storage,
            audit,
            orders,
            directory,
            calendar,
        })
    }

    /// Compute figures without persisting anything
    pub async fn preview(
        &self,
        entity_type: EntityType,
        entity_id: &str,
        period: SettlementPeriod,
        fuel_reimbursement_cents: Option<Cents>,
    ) -> Result<SettlementFigures> {
        self.compute_figures(entity_type, entity_id, period, fuel_reimbursement_cents)
            .await
    }

    /// Compute and persist a pending settlement
    pub async fn create(
        &self,
        entity_type: EntityType,
        entity_id: &str,
        period: SettlementPeriod,
        fuel_reimbursement_cents: Option<Cents>,
        notes: &str,
        actor: &Actor,
    ) -> Result<Settlement> {
        require_admin(actor)?;
        if entity_id.trim().is_empty() || entity_id.contains('|') {
            return Err(Error::Validation(format!("Invalid entity id {:?}", entity_id)));
        }

        let figures = self
            .compute_figures(entity_type, entity_id, period, fuel_reimbursement_cents)
            .await?;

        let now = Utc::now();
        let settlement = Settlement {
            id: Uuid::now_v7(),
            entity_type,
            entity_id: entity_id.to_string(),
            period,
            status: SettlementStatus::Pending,
            figures,
            paid_at: None,
            notes: notes.trim().to_string(),
            created_by: actor.id.clone(),
            created_at: now,
            updated_at: now,
        };

        self.storage.transaction(|txn| {
            if let Some(existing) = find_overlap(txn, entity_type, entity_id, &period)? {
                warn!(
                    entity = %entity_type,
                    entity_id,
                    period = %period,
                    existing = %existing,
                    "Overlapping settlement rejected"
                );
                return Err(Error::Conflict(format!(
                    "{} {} already has settlement {} overlapping {}",
                    entity_type, entity_id, existing, period
                )));
            }

            txn.put(Table::Settlements, settlement.id.to_string().as_bytes(), &settlement)?;
            txn.put_index(&period_index_key(&settlement))?;
            Ok(())
        })?;

        info!(
            settlement_id = %settlement.id,
            entity = %entity_type,
            entity_id,
            period = %period,
            net_payout_cents = settlement.figures.net_payout_cents(),
            "Settlement created"
        );
        self.audit.emit(AuditEvent::new::<Settlement, _>(
            "settlement.created",
            actor,
            entity_ref(&settlement.id),
            None,
            &settlement,
        ));

        Ok(settlement)
    }

    /// Record the payout; freezes the settlement
    pub fn mark_paid(&self, settlement_id: Uuid, actor: &Actor) -> Result<Settlement> {
        self.transition(settlement_id, SettlementAction::MarkPaid, actor, |s| {
            s.paid_at = Some(Utc::now());
        })
    }

    /// Raise a dispute; a non-blank reason is appended to the notes
    pub fn mark_disputed(
        &self,
        settlement_id: Uuid,
        reason: &str,
        actor: &Actor,
    ) -> Result<Settlement> {
        let reason = reason.trim();

        self.transition(settlement_id, SettlementAction::Dispute, actor, |s| {
            if reason.is_empty() {
                return;
            }
            if !s.notes.is_empty() {
                s.notes.push('\n');
            }
            s.notes.push_str("Disputed: ");
            s.notes.push_str(reason);
        })
    }

    /// Move a disputed settlement back to pending
    pub fn reopen(&self, settlement_id: Uuid, actor: &Actor) -> Result<Settlement> {
        self.transition(settlement_id, SettlementAction::Reopen, actor, |_| {})
    }

    /// Replace the fuel reimbursement and recompute every derived figure
    pub async fn adjust_fuel_reimbursement(
        &self,
        settlement_id: Uuid,
        new_amount_cents: Cents,
        actor: &Actor,
    ) -> Result<Settlement> {
        require_admin(actor)?;

        let current = self.get(settlement_id)?;
        ensure_mutable(&current)?;

        let figures = self
            .compute_figures(
                current.entity_type,
                &current.entity_id,
                current.period,
                Some(new_amount_cents),
            )
            .await?;

        let (before, after) = self.storage.transaction(|txn| {
            // Re-read under the write section; it may have been paid meanwhile
            let before = load(txn, settlement_id)?;
            ensure_mutable(&before)?;

            let mut after = before.clone();
            after.figures = figures;
            after.updated_at = Utc::now();
            txn.put(Table::Settlements, settlement_id.to_string().as_bytes(), &after)?;
            Ok::<_, Error>((before, after))
        })?;

        info!(
            settlement_id = %settlement_id,
            fuel_reimbursement_cents = new_amount_cents,
            net_payout_cents = after.figures.net_payout_cents(),
            "Settlement fuel reimbursement adjusted"
        );
        self.audit.emit(AuditEvent::new(
            "settlement.fuel_adjusted",
            actor,
            entity_ref(&settlement_id),
            Some(&before),
            &after,
        ));

        Ok(after)
    }

    /// Settlement by ID
    pub fn get(&self, settlement_id: Uuid) -> Result<Settlement> {
        self.storage
            .get(Table::Settlements, settlement_id.to_string().as_bytes())?
            .ok_or_else(|| Error::NotFound(format!("Settlement {}", settlement_id)))
    }

    /// Settlements of one entity ordered by period start
    pub fn list_for_entity(&self, entity_type: EntityType, entity_id: &str) -> Result<Vec<Settlement>> {
        let prefix = entity_prefix(entity_type, entity_id);
        let mut settlements = Vec::new();
        for key in self.storage.scan_prefix_keys(Table::Indices, &prefix)? {
            let (_, id) = parse_period_key(&key[prefix.len()..])?;
            settlements.push(self.get(id)?);
        }
        Ok(settlements)
    }

    fn transition<F>(
        &self,
        settlement_id: Uuid,
        action: SettlementAction,
        actor: &Actor,
        mutate: F,
    ) -> Result<Settlement>
    where
        F: FnOnce(&mut Settlement),
    {
        require_admin(actor)?;

        let (before, after) = self.storage.transaction(|txn| {
            let before = load(txn, settlement_id)?;
            ensure_mutable(&before)?;

            let next = before.status.apply(action).ok_or_else(|| {
                Error::Conflict(format!(
                    "Settlement {} cannot go from {:?} via {:?}",
                    settlement_id, before.status, action
                ))
            })?;

            let mut after = before.clone();
            after.status = next;
            after.updated_at = Utc::now();
            mutate(&mut after);
            txn.put(Table::Settlements, settlement_id.to_string().as_bytes(), &after)?;
            Ok::<_, Error>((before, after))
        })?;

        info!(
            settlement_id = %settlement_id,
            from = ?before.status,
            to = ?after.status,
            actor = %actor.id,
            "Settlement status changed"
        );
        self.audit.emit(AuditEvent::new(
            format!("settlement.{}", action.as_str()),
            actor,
            entity_ref(&settlement_id),
            Some(&before),
            &after,
        ));

        Ok(after)
    }

    async fn compute_figures(
        &self,
        entity_type: EntityType,
        entity_id: &str,
        period: SettlementPeriod,
        fuel_reimbursement_cents: Option<Cents>,
    ) -> Result<SettlementFigures> {
        let profile = self
            .directory
            .profile(entity_type, entity_id)
            .await
            .map_err(|e| Error::Collaborator(format!("Directory lookup failed: {:#}", e)))?
            .ok_or_else(|| Error::NotFound(format!("{} {}", entity_type, entity_id)))?;

        let (from, until) = self.calendar.bounds(&period)?;
        let query = OrderQuery {
            entity_type,
            entity_id: entity_id.to_string(),
            from,
            until,
        };
        let orders = self
            .orders
            .delivered_orders(&query)
            .await
            .map_err(|e| Error::Collaborator(format!("Order fetch failed: {:#}", e)))?;

        compute(ComputeInput {
            entity_type,
            entity_id,
            period,
            profile: &profile,
            orders: &orders,
            fuel_reimbursement_cents,
            calendar: self.calendar,
        })
    }
}

fn require_admin(actor: &Actor) -> Result<()> {
    if actor.role != ActorRole::Admin {
        return Err(Error::Forbidden(format!(
            "{} ({:?}) may not run settlement workflow",
            actor.id, actor.role
        )));
    }
    Ok(())
}

fn ensure_mutable(settlement: &Settlement) -> Result<()> {
    if settlement.status == SettlementStatus::Paid {
        return Err(Error::Immutable(format!("Settlement {} is paid", settlement.id)));
    }
    Ok(())
}

fn load(txn: &Transaction<'_>, settlement_id: Uuid) -> Result<Settlement> {
    txn.get(Table::Settlements, settlement_id.to_string().as_bytes())?
        .ok_or_else(|| Error::NotFound(format!("Settlement {}", settlement_id)))
}

fn entity_ref(settlement_id: &Uuid) -> EntityRef {
    EntityRef::new("settlement", settlement_id.to_string())
}

fn entity_prefix(entity_type: EntityType, entity_id: &str) -> Vec<u8> {
    let mut prefix = composite_key(&[PERIOD_INDEX, entity_type.as_str().as_bytes(), entity_id.as_bytes()]);
    prefix.push(b'|');
    prefix
}

fn period_index_key(settlement: &Settlement) -> Vec<u8> {
    let mut key = entity_prefix(settlement.entity_type, &settlement.entity_id);
    key.extend_from_slice(&composite_key(&[
        settlement.period.start.to_string().as_bytes(),
        settlement.period.end.to_string().as_bytes(),
        settlement.id.to_string().as_bytes(),
    ]));
    key
}

/// Parse `<start>|<end>|<id>` back out of an index key suffix
fn parse_period_key(suffix: &[u8]) -> Result<(SettlementPeriod, Uuid)> {
    let corrupt = || Error::Ledger(ledger_core::Error::InvariantViolation(format!(
        "Corrupt settlement index key {:?}",
        String::from_utf8_lossy(suffix)
    )));

    let text = std::str::from_utf8(suffix).map_err(|_| corrupt())?;
    let mut parts = text.split('|');
    let (Some(start), Some(end), Some(id), None) = (parts.next(), parts.next(), parts.next(), parts.next()) else {
        return Err(corrupt());
    };

    let start = NaiveDate::parse_from_str(start, "%Y-%m-%d").map_err(|_| corrupt())?;
    let end = NaiveDate::parse_from_str(end, "%Y-%m-%d").map_err(|_| corrupt())?;
    let id = Uuid::parse_str(id).map_err(|_| corrupt())?;
    Ok((SettlementPeriod { start, end }, id))
}

fn find_overlap(
    txn: &Transaction<'_>,
    entity_type: EntityType,
    entity_id: &str,
    period: &SettlementPeriod,
) -> Result<Option<Uuid>> {
    let prefix = entity_prefix(entity_type, entity_id);
    for key in txn.scan_prefix_keys(Table::Indices, &prefix)? {
        let (existing, id) = parse_period_key(&key[prefix.len()..])?;
        if existing.overlaps(period) {
            return Ok(Some(id));
        }
    }
    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::orders::{InMemoryOrders, Order, OrderStatus, PaymentMethod, StaticDirectory};
    use crate::types::{EntityProfile, PayPlan};
    use chrono::{DateTime, NaiveDate};
    use ledger_core::{ErrorKind, MemoryAuditTrail};
    use rust_decimal::Decimal;

    struct Fixture {
        workflow: SettlementWorkflow,
        audit: Arc<MemoryAuditTrail>,
        _temp: tempfile::TempDir,
    }

    fn d(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    fn march() -> SettlementPeriod {
        SettlementPeriod::new(d("2024-03-01"), d("2024-03-15")).unwrap()
    }

    fn admin() -> Actor {
        Actor::admin("admin-1")
    }

    fn fixture() -> Fixture {
        let temp = tempfile::tempdir().unwrap();
        let mut ledger_config = ledger_core::Config::default();
        ledger_config.data_dir = temp.path().to_path_buf();
        let storage = Arc::new(Storage::open(&ledger_config).unwrap());

        let orders = Arc::new(InMemoryOrders::new());
        for (i, fee) in [12_000, 12_000].iter().enumerate() {
            orders.upsert(Order {
                id: format!("o-{}", i),
                restaurant_id: "rest-1".into(),
                assigned_rider_id: Some("rider-1".into()),
                subtotal_cents: 50_000,
                delivery_fee_cents: *fee,
                rider_bonus_cents: 250,
                total_cents: 50_000 + *fee,
                payment_method: PaymentMethod::Cash,
                actual_payment_method: None,
                status: OrderStatus::Delivered,
                delivered_at: Some(
                    DateTime::parse_from_rfc3339("2024-03-05T18:00:00Z")
                        .unwrap()
                        .with_timezone(&Utc),
                ),
            });
        }

        let directory = Arc::new(StaticDirectory::new());
        directory.insert(
            "rest-1",
            EntityProfile::Restaurant {
                commission_percentage: Decimal::from(10),
            },
        );
        directory.insert(
            "rider-1",
            EntityProfile::Rider {
                pay_plan: PayPlan::Commission,
            },
        );

        let audit = Arc::new(MemoryAuditTrail::new());
        let workflow =
            SettlementWorkflow::new(&Config::default(), storage, audit.clone(), orders, directory)
                .unwrap();

        Fixture {
            workflow,
            audit,
            _temp: temp,
        }
    }

    #[tokio::test]
    async fn test_preview_matches_create() {
        let f = fixture();
        let preview = f
            .workflow
            .preview(EntityType::Restaurant, "rest-1", march(), None)
            .await
            .unwrap();
        let created = f
            .workflow
            .create(EntityType::Restaurant, "rest-1", march(), None, "", &admin())
            .await
            .unwrap();

        assert_eq!(preview, created.figures);
        assert_eq!(created.figures.net_payout_cents(), 90_000);
        assert_eq!(created.status, SettlementStatus::Pending);
        assert_eq!(f.workflow.get(created.id).unwrap(), created);
        assert_eq!(f.audit.of_type("settlement.created").len(), 1);
    }

    #[tokio::test]
    async fn test_overlapping_create_conflicts() {
        let f = fixture();
        let first = f
            .workflow
            .create(EntityType::Rider, "rider-1", march(), Some(1_000), "", &admin())
            .await
            .unwrap();

        let retry = f
            .workflow
            .create(EntityType::Rider, "rider-1", march(), Some(1_000), "", &admin())
            .await
            .unwrap_err();
        assert_eq!(retry.kind(), ErrorKind::Conflict);

        let touching = SettlementPeriod::new(d("2024-03-15"), d("2024-03-31")).unwrap();
        let err = f
            .workflow
            .create(EntityType::Rider, "rider-1", touching, None, "", &admin())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Conflict);

        // Next period and the restaurant side are independent
        let next = SettlementPeriod::new(d("2024-03-16"), d("2024-03-31")).unwrap();
        f.workflow
            .create(EntityType::Rider, "rider-1", next, None, "", &admin())
            .await
            .unwrap();
        f.workflow
            .create(EntityType::Restaurant, "rest-1", march(), None, "", &admin())
            .await
            .unwrap();

        let listed = f.workflow.list_for_entity(EntityType::Rider, "rider-1").unwrap();
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].id, first.id);
    }

    #[tokio::test]
    async fn test_paid_settlement_is_immutable() {
        let f = fixture();
        let created = f
            .workflow
            .create(EntityType::Rider, "rider-1", march(), Some(1_000), "", &admin())
            .await
            .unwrap();
        assert_eq!(created.figures.net_payout_cents(), 25_500);

        let paid = f.workflow.mark_paid(created.id, &admin()).unwrap();
        assert_eq!(paid.status, SettlementStatus::Paid);
        assert!(paid.paid_at.is_some());

        let err = f
            .workflow
            .adjust_fuel_reimbursement(created.id, 500, &admin())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Immutable);
        assert_eq!(f.workflow.get(created.id).unwrap(), paid);

        for result in [
            f.workflow.mark_paid(created.id, &admin()),
            f.workflow.mark_disputed(created.id, "late", &admin()),
            f.workflow.reopen(created.id, &admin()),
        ] {
            assert_eq!(result.unwrap_err().kind(), ErrorKind::Immutable);
        }
    }

    #[tokio::test]
    async fn test_dispute_reopen_and_adjust() {
        let f = fixture();
        let created = f
            .workflow
            .create(EntityType::Rider, "rider-1", march(), None, "first half", &admin())
            .await
            .unwrap();

        let disputed = f
            .workflow
            .mark_disputed(created.id, "missing fuel", &admin())
            .unwrap();
        assert_eq!(disputed.status, SettlementStatus::Disputed);
        assert!(disputed.notes.contains("missing fuel"));
        assert!(disputed.notes.starts_with("first half"));

        let err = f.workflow.mark_disputed(created.id, "again", &admin()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Conflict);

        let adjusted = f
            .workflow
            .adjust_fuel_reimbursement(created.id, 800, &admin())
            .await
            .unwrap();
        assert_eq!(adjusted.figures.net_payout_cents(), 24_000 + 500 + 800);
        assert_eq!(adjusted.status, SettlementStatus::Disputed);

        let reopened = f.workflow.reopen(created.id, &admin()).unwrap();
        assert_eq!(reopened.status, SettlementStatus::Pending);

        let err = f.workflow.reopen(created.id, &admin()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Conflict);

        assert_eq!(f.audit.of_type("settlement.disputed").len(), 1);
        assert_eq!(f.audit.of_type("settlement.reopened").len(), 1);
        assert_eq!(f.audit.of_type("settlement.fuel_adjusted").len(), 1);
    }

    #[tokio::test]
    async fn test_dispute_without_reason_keeps_notes() {
        let f = fixture();
        let created = f
            .workflow
            .create(EntityType::Restaurant, "rest-1", march(), None, "weekly", &admin())
            .await
            .unwrap();

        let disputed = f.workflow.mark_disputed(created.id, "  ", &admin()).unwrap();
        assert_eq!(disputed.status, SettlementStatus::Disputed);
        assert_eq!(disputed.notes, "weekly");
        assert_eq!(f.audit.of_type("settlement.disputed").len(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_create_has_one_winner() {
        let f = fixture();
        let workflow = Arc::new(f.workflow);

        let mut tasks = Vec::new();
        for _ in 0..8 {
            let workflow = workflow.clone();
            tasks.push(tokio::spawn(async move {
                workflow
                    .create(EntityType::Rider, "rider-1", march(), Some(1_000), "", &admin())
                    .await
            }));
        }

        let mut created = 0;
        for task in tasks {
            match task.await.unwrap() {
                Ok(_) => created += 1,
                Err(e) => assert_eq!(e.kind(), ErrorKind::Conflict),
            }
        }

        assert_eq!(created, 1);
        assert_eq!(workflow.list_for_entity(EntityType::Rider, "rider-1").unwrap().len(), 1);
        assert_eq!(f.audit.of_type("settlement.created").len(), 1);
    }

    #[tokio::test]
    async fn test_workflow_is_admin_only() {
        let f = fixture();
        let rider = Actor::rider("rider-1");
        let err = f
            .workflow
            .create(EntityType::Rider, "rider-1", march(), None, "", &rider)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Forbidden);

        let created = f
            .workflow
            .create(EntityType::Rider, "rider-1", march(), None, "", &admin())
            .await
            .unwrap();
        assert_eq!(
            f.workflow.mark_paid(created.id, &rider).unwrap_err().kind(),
            ErrorKind::Forbidden
        );
    }

    #[tokio::test]
    async fn test_unknown_entity_and_settlement() {
        let f = fixture();
        let err = f
            .workflow
            .preview(EntityType::Restaurant, "rest-404", march(), None)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);

        let err = f.workflow.mark_paid(Uuid::now_v7(), &admin()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn test_fuel_on_restaurant_rejected() {
        let f = fixture();
        let err = f
            .workflow
            .create(EntityType::Restaurant, "rest-1", march(), Some(500), "", &admin())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
        assert!(f
            .workflow
            .list_for_entity(EntityType::Restaurant, "rest-1")
            .unwrap()
            .is_empty());
    }
}
