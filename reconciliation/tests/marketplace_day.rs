//! End-to-end day in the marketplace: credit, settlement and reconciliation
//! sharing one ledger database.

use chrono::{DateTime, NaiveDate, Utc};
use ledger_core::{
    AccountId, AccountType, Actor, ActorRole, Config as LedgerConfig, EntryReason, ErrorKind,
    Ledger, MemoryAuditTrail,
};
use reconciliation::{AutoOpenJob, DailyReconciliation, InMemoryRoster, ReportStatus};
use rust_decimal::Decimal;
use settlement::{
    CollectedTotals, EntityProfile, EntityType, InMemoryOrders, Order, OrderStatus, PayPlan,
    PaymentMethod, SettlementPeriod, SettlementStatus, SettlementWorkflow, StaticDirectory,
};
use std::sync::Arc;
use std::time::Duration;

struct Marketplace {
    ledger: Ledger,
    audit: Arc<MemoryAuditTrail>,
    orders: Arc<InMemoryOrders>,
    settlements: SettlementWorkflow,
    reconciliation: Arc<DailyReconciliation>,
    _temp: tempfile::TempDir,
}

async fn marketplace() -> Marketplace {
    let temp = tempfile::tempdir().unwrap();
    let mut config = LedgerConfig::default();
    config.data_dir = temp.path().to_path_buf();

    let audit = Arc::new(MemoryAuditTrail::new());
    let ledger = Ledger::open(config, audit.clone()).await.unwrap();

    let orders = Arc::new(InMemoryOrders::new());
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

    let settlements = SettlementWorkflow::new(
        &settlement::Config::default(),
        ledger.storage(),
        ledger.audit(),
        orders.clone(),
        directory,
    )
    .unwrap();

    let reconciliation = Arc::new(
        DailyReconciliation::new(
            reconciliation::Config::default(),
            ledger.storage(),
            ledger.audit(),
            orders.clone(),
        )
        .unwrap(),
    );

    Marketplace {
        ledger,
        audit,
        orders,
        settlements,
        reconciliation,
        _temp: temp,
    }
}

fn day() -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 3, 5).unwrap()
}

fn at(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc)
}

fn delivered(id: &str, subtotal: i64, fee: i64, method: PaymentMethod, when: &str) -> Order {
    Order {
        id: id.into(),
        restaurant_id: "rest-1".into(),
        assigned_rider_id: Some("rider-1".into()),
        subtotal_cents: subtotal,
        delivery_fee_cents: fee,
        rider_bonus_cents: 0,
        total_cents: subtotal + fee,
        payment_method: method,
        actual_payment_method: None,
        status: OrderStatus::Delivered,
        delivered_at: Some(at(when)),
    }
}

#[tokio::test]
async fn test_full_day() {
    let m = marketplace().await;
    let admin = Actor::admin("admin-1");
    let agent = Actor::new("agent-1", ActorRole::Agent);
    let rider_actor = Actor::rider("rider-1");
    let rider = AccountId::new("rider-1");

    // Morning: rider tops up prepaid credit
    m.ledger
        .open_account(rider.clone(), AccountType::Rider, &Actor::system())
        .await
        .unwrap();
    let issuer = m.ledger.recharge_codes();
    let code = issuer.issue(3_000, Some(rider.clone()), "cash at office", &agent).await.unwrap();
    issuer.redeem(&code.code, &rider, &rider_actor).await.unwrap();

    // Shift starts; report opens via the roster job
    let roster = Arc::new(InMemoryRoster::new());
    roster.start_shift(day(), "rider-1", at("2024-03-05T13:00:00Z"));
    let job = AutoOpenJob::new(m.reconciliation.clone(), roster, Duration::from_secs(300));
    assert_eq!(job.run_once(day()).await.unwrap(), 1);

    // Deliveries, each charging a platform fee against the rider's credit
    m.orders.upsert(delivered("o-1", 9_000, 900, PaymentMethod::Cash, "2024-03-05T15:00:00Z"));
    m.orders.upsert(delivered("o-2", 4_500, 500, PaymentMethod::Cash, "2024-03-05T17:00:00Z"));
    m.orders.upsert(delivered("o-3", 6_000, 600, PaymentMethod::Pos, "2024-03-05T19:00:00Z"));
    for order in ["o-1", "o-2", "o-3"] {
        m.ledger
            .debit(&rider, 150, EntryReason::PlatformFee, order, &Actor::system())
            .await
            .unwrap();
    }
    assert_eq!(m.ledger.get_balance(&rider).unwrap(), 3_000 - 450);
    assert_eq!(m.ledger.verify_balance(&rider).unwrap(), 2_550);

    // End of day: rider declares 15000 cash against 14900 expected
    m.reconciliation
        .close_shift("rider-1", day(), at("2024-03-06T02:00:00Z"), &rider_actor)
        .unwrap();
    let declared = CollectedTotals {
        cash_cents: 15_000,
        pos_cents: 6_600,
        yape_plin_cents: 0,
    };
    let report = m
        .reconciliation
        .submit("rider-1", day(), declared, "", &rider_actor)
        .await
        .unwrap();
    assert_eq!(report.expected.cash_cents, 14_900);
    assert_eq!(report.expected.pos_cents, 6_600);
    assert_eq!(report.cash_discrepancy_cents, 100);
    assert!(report.has_discrepancy);

    let err = m.reconciliation.approve("rider-1", day(), &admin).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Conflict);
    let report = m
        .reconciliation
        .reject("rider-1", day(), "cash over by 1.00, recount", &admin)
        .unwrap();
    assert_eq!(report.status, ReportStatus::Rejected);

    // Settlement for the restaurant and the rider
    let period = SettlementPeriod::new(day(), day()).unwrap();
    let restaurant = m
        .settlements
        .create(EntityType::Restaurant, "rest-1", period, None, "", &admin)
        .await
        .unwrap();
    assert_eq!(restaurant.figures.net_payout_cents(), 19_500 - 1_950);

    let rider_settlement = m
        .settlements
        .create(EntityType::Rider, "rider-1", period, Some(300), "", &admin)
        .await
        .unwrap();
    assert_eq!(rider_settlement.figures.net_payout_cents(), 2_000 + 300);

    let paid = m.settlements.mark_paid(rider_settlement.id, &admin).unwrap();
    assert_eq!(paid.status, SettlementStatus::Paid);

    // Every mutation left one audit event
    assert_eq!(m.audit.of_type("recharge.redeemed").len(), 1);
    assert_eq!(m.audit.of_type("ledger.debit").len(), 3);
    assert_eq!(m.audit.of_type("daily_report.rejected").len(), 1);
    assert_eq!(m.audit.of_type("settlement.created").len(), 2);
    assert_eq!(m.audit.of_type("settlement.paid").len(), 1);

    assert_eq!(m.ledger.verify_all_balances().unwrap(), 1);
    m.ledger.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_paid_settlement_survives_fuel_adjustment_attempt() {
    let m = marketplace().await;
    let admin = Actor::admin("admin-1");
    m.orders.upsert(delivered("o-1", 10_000, 1_200, PaymentMethod::Cash, "2024-03-05T15:00:00Z"));

    let period = SettlementPeriod::new(day(), day()).unwrap();
    let created = m
        .settlements
        .create(EntityType::Rider, "rider-1", period, Some(1_000), "", &admin)
        .await
        .unwrap();
    let paid = m.settlements.mark_paid(created.id, &admin).unwrap();

    let err = m
        .settlements
        .adjust_fuel_reimbursement(created.id, 500, &admin)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Immutable);
    assert_eq!(m.settlements.get(created.id).unwrap(), paid);
    assert_eq!(m.settlements.get(created.id).unwrap().figures.net_payout_cents(), 2_200);
}
