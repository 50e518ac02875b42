//! Orders and entity directory collaborators
//!
//! Settlement and reconciliation only read orders and profiles. Both sources
//! live outside this workspace and are reached through async traits; the
//! in-memory implementations here back tests and demos.

use crate::types::{EntityProfile, EntityType, SettlementPeriod};
use async_trait::async_trait;
use chrono::{DateTime, Duration, FixedOffset, NaiveDate, NaiveTime, TimeZone, Utc};
use dashmap::DashMap;
use ledger_core::Cents;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

/// Order lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OrderStatus {
    /// Placed, not accepted
    Pending,
    /// Accepted by the restaurant
    Accepted,
    /// Being prepared
    Preparing,
    /// Ready for pickup
    Ready,
    /// Picked up by the rider
    PickedUp,
    /// Handed to the customer
    Delivered,
    /// Cancelled
    Cancelled,
}

/// How the customer paid the rider
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PaymentMethod {
    /// Cash
    Cash,
    /// Card terminal carried by the rider
    Pos,
    /// Yape / Plin wallet transfer
    YapePlin,
}

/// Order as exposed by the Orders collaborator
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    /// Order ID
    pub id: String,
    /// Restaurant that prepared it
    pub restaurant_id: String,
    /// Rider that delivered it
    pub assigned_rider_id: Option<String>,
    /// Food subtotal
    pub subtotal_cents: Cents,
    /// Delivery fee charged to the customer
    pub delivery_fee_cents: Cents,
    /// Bonus paid to the rider
    pub rider_bonus_cents: Cents,
    /// Amount charged to the customer
    pub total_cents: Cents,
    /// Method chosen at checkout
    pub payment_method: PaymentMethod,
    /// Method actually used at the door, if it differed
    pub actual_payment_method: Option<PaymentMethod>,
    /// Status
    pub status: OrderStatus,
    /// Delivery instant
    pub delivered_at: Option<DateTime<Utc>>,
}

impl Order {
    /// Method the money actually arrived through
    pub fn effective_payment_method(&self) -> PaymentMethod {
        self.actual_payment_method.unwrap_or(self.payment_method)
    }

    /// Whether the order belongs to the entity
    pub fn belongs_to(&self, entity_type: EntityType, entity_id: &str) -> bool {
        match entity_type {
            EntityType::Restaurant => self.restaurant_id == entity_id,
            EntityType::Rider => self.assigned_rider_id.as_deref() == Some(entity_id),
        }
    }
}

/// Maps instants to business days in a fixed UTC offset
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BusinessCalendar {
    offset: FixedOffset,
}

impl BusinessCalendar {
    /// Calendar for an offset in minutes east of UTC (negative for the Americas)
    pub fn new(utc_offset_minutes: i32) -> crate::Result<Self> {
        let offset = FixedOffset::east_opt(utc_offset_minutes * 60).ok_or_else(|| {
            crate::Error::Config(format!("Invalid UTC offset {} minutes", utc_offset_minutes))
        })?;
        Ok(Self { offset })
    }

    /// Local business day of an instant
    pub fn local_date(&self, instant: DateTime<Utc>) -> NaiveDate {
        instant.with_timezone(&self.offset).date_naive()
    }

    /// Local business day right now
    pub fn today(&self) -> NaiveDate {
        self.local_date(Utc::now())
    }

    /// Half-open UTC range `[from, until)` covering every local day of the period
    ///
    /// Fails `Validation` when the range does not fit the calendar.
    pub fn bounds(&self, period: &SettlementPeriod) -> crate::Result<(DateTime<Utc>, DateTime<Utc>)> {
        let start = period.start.and_time(NaiveTime::default());
        let from = self
            .offset
            .from_local_datetime(&start)
            .single()
            .map(|t| t.with_timezone(&Utc))
            .unwrap_or_else(|| Utc.from_utc_datetime(&start));
        let days = (period.end - period.start).num_days() + 1;
        let until = from
            .checked_add_signed(Duration::days(days))
            .ok_or_else(|| {
                crate::Error::Validation(format!("Period {} is out of calendar range", period))
            })?;
        Ok((from, until))
    }
}

/// Query for delivered orders of one entity
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderQuery {
    /// Entity kind
    pub entity_type: EntityType,
    /// Entity ID
    pub entity_id: String,
    /// Lower bound of `delivered_at` (inclusive)
    pub from: DateTime<Utc>,
    /// Upper bound of `delivered_at` (exclusive)
    pub until: DateTime<Utc>,
}

/// Orders collaborator
#[async_trait]
pub trait OrderSource: Send + Sync {
    /// Delivered orders of the entity with `delivered_at` in the query range
    async fn delivered_orders(&self, query: &OrderQuery) -> anyhow::Result<Vec<Order>>;
}

/// Account/identity collaborator
#[async_trait]
pub trait EntityDirectory: Send + Sync {
    /// Profile of the entity, `None` if it does not exist
    async fn profile(
        &self,
        entity_type: EntityType,
        entity_id: &str,
    ) -> anyhow::Result<Option<EntityProfile>>;
}

/// Order store kept in memory
#[derive(Debug, Default)]
pub struct InMemoryOrders {
    orders: RwLock<Vec<Order>>,
}

impl InMemoryOrders {
    /// Create empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace an order by ID
    pub fn upsert(&self, order: Order) {
        let mut orders = self.orders.write();
        match orders.iter_mut().find(|o| o.id == order.id) {
            Some(existing) => *existing = order,
            None => orders.push(order),
        }
    }
}

#[async_trait]
impl OrderSource for InMemoryOrders {
    async fn delivered_orders(&self, query: &OrderQuery) -> anyhow::Result<Vec<Order>> {
        Ok(self
            .orders
            .read()
            .iter()
            .filter(|o| o.status == OrderStatus::Delivered)
            .filter(|o| o.belongs_to(query.entity_type, &query.entity_id))
            .filter(|o| {
                o.delivered_at
                    .map_or(false, |t| query.from <= t && t < query.until)
            })
            .cloned()
            .collect())
    }
}

/// Directory backed by a concurrent map
#[derive(Debug, Default)]
pub struct StaticDirectory {
    profiles: DashMap<(EntityType, String), EntityProfile>,
}

impl StaticDirectory {
    /// Create empty directory
    pub fn new() -> Self {
        Self::default()
    }

    /// Register or replace a profile
    pub fn insert(&self, entity_id: impl Into<String>, profile: EntityProfile) {
        self.profiles
            .insert((profile.entity_type(), entity_id.into()), profile);
    }
}

#[async_trait]
impl EntityDirectory for StaticDirectory {
    async fn profile(
        &self,
        entity_type: EntityType,
        entity_id: &str,
    ) -> anyhow::Result<Option<EntityProfile>> {
        Ok(self
            .profiles
            .get(&(entity_type, entity_id.to_string()))
            .map(|p| p.value().clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::PayPlan;

    fn d(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    fn at(s: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc)
    }

    #[test]
    fn test_local_date_uses_offset() {
        let lima = BusinessCalendar::new(-300).unwrap();
        // 02:00 UTC on the 2nd is still 21:00 on the 1st in Lima
        assert_eq!(lima.local_date(at("2024-03-02T02:00:00Z")), d("2024-03-01"));
        assert_eq!(lima.local_date(at("2024-03-02T05:00:00Z")), d("2024-03-02"));
    }

    #[test]
    fn test_bounds_cover_whole_local_days() {
        let lima = BusinessCalendar::new(-300).unwrap();
        let period = SettlementPeriod::new(d("2024-03-01"), d("2024-03-02")).unwrap();
        let (from, until) = lima.bounds(&period).unwrap();
        assert_eq!(from, at("2024-03-01T05:00:00Z"));
        assert_eq!(until, at("2024-03-03T05:00:00Z"));
    }

    #[test]
    fn test_bounds_past_calendar_end_is_rejected() {
        let lima = BusinessCalendar::new(-300).unwrap();
        let period = SettlementPeriod::new(NaiveDate::MAX, NaiveDate::MAX).unwrap();
        let err = lima.bounds(&period).unwrap_err();
        assert_eq!(err.kind(), ledger_core::ErrorKind::Validation);
    }

    #[test]
    fn test_effective_payment_method() {
        let mut order = Order {
            id: "o-1".into(),
            restaurant_id: "rest-1".into(),
            assigned_rider_id: Some("rider-1".into()),
            subtotal_cents: 1000,
            delivery_fee_cents: 500,
            rider_bonus_cents: 0,
            total_cents: 1500,
            payment_method: PaymentMethod::Cash,
            actual_payment_method: None,
            status: OrderStatus::Delivered,
            delivered_at: None,
        };
        assert_eq!(order.effective_payment_method(), PaymentMethod::Cash);
        order.actual_payment_method = Some(PaymentMethod::YapePlin);
        assert_eq!(order.effective_payment_method(), PaymentMethod::YapePlin);
        assert!(order.belongs_to(EntityType::Rider, "rider-1"));
        assert!(!order.belongs_to(EntityType::Restaurant, "rider-1"));
    }

    #[tokio::test]
    async fn test_static_directory() {
        let directory = StaticDirectory::new();
        directory.insert(
            "rider-1",
            EntityProfile::Rider {
                pay_plan: PayPlan::Commission,
            },
        );

        assert!(directory
            .profile(EntityType::Rider, "rider-1")
            .await
            .unwrap()
            .is_some());
        assert!(directory
            .profile(EntityType::Restaurant, "rider-1")
            .await
            .unwrap()
            .is_none());
    }
}
