//! Settlement computation
//!
//! Pure aggregation of a period's delivered orders into payout figures. The
//! workflow calls [`compute`] for previews, creation and fuel adjustments, so
//! identical inputs always produce identical figures.

use crate::orders::{BusinessCalendar, Order, OrderStatus, PaymentMethod};
use crate::types::{
    CollectedTotals, EntityProfile, EntityType, PayPlan, RestaurantFigures, RiderFigures,
    SettlementFigures, SettlementPeriod,
};
use crate::{Error, Result};
use ledger_core::Cents;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};

/// Everything the computation reads
#[derive(Debug, Clone, Copy)]
pub struct ComputeInput<'a> {
    /// Entity kind
    pub entity_type: EntityType,
    /// Entity ID
    pub entity_id: &'a str,
    /// Settled business days
    pub period: SettlementPeriod,
    /// Directory profile of the entity
    pub profile: &'a EntityProfile,
    /// Candidate orders; anything outside the period or not delivered is ignored
    pub orders: &'a [Order],
    /// Fuel reimbursement (riders only)
    pub fuel_reimbursement_cents: Option<Cents>,
    /// Business-day mapping for `delivered_at`
    pub calendar: BusinessCalendar,
}

/// Compute settlement figures
pub fn compute(input: ComputeInput<'_>) -> Result<SettlementFigures> {
    if input.profile.entity_type() != input.entity_type {
        return Err(Error::Validation(format!(
            "{} {} has a {} profile",
            input.entity_type,
            input.entity_id,
            input.profile.entity_type()
        )));
    }

    let orders: Vec<&Order> = input
        .orders
        .iter()
        .filter(|o| o.status == OrderStatus::Delivered)
        .filter(|o| o.belongs_to(input.entity_type, input.entity_id))
        .filter(|o| {
            o.delivered_at
                .map_or(false, |t| input.period.contains(input.calendar.local_date(t)))
        })
        .collect();

    match input.profile {
        EntityProfile::Restaurant {
            commission_percentage,
        } => {
            if input.fuel_reimbursement_cents.unwrap_or(0) != 0 {
                return Err(Error::Validation(
                    "Fuel reimbursement does not apply to restaurants".to_string(),
                ));
            }
            restaurant_figures(&orders, *commission_percentage)
        }
        EntityProfile::Rider { pay_plan } => {
            let fuel = input.fuel_reimbursement_cents.unwrap_or(0);
            if fuel < 0 {
                return Err(Error::Validation(format!(
                    "Fuel reimbursement must not be negative, got {}",
                    fuel
                )));
            }
            rider_figures(&orders, *pay_plan, fuel)
        }
    }
}

fn restaurant_figures(orders: &[&Order], commission_percentage: Decimal) -> Result<SettlementFigures> {
    if commission_percentage < Decimal::ZERO || commission_percentage > Decimal::ONE_HUNDRED {
        return Err(Error::Validation(format!(
            "Commission percentage {} outside 0..=100",
            commission_percentage
        )));
    }

    let gross_sales_cents = sum(orders.iter().map(|o| o.subtotal_cents))?;
    let commission_cents = (Decimal::from(gross_sales_cents) * commission_percentage
        / Decimal::ONE_HUNDRED)
        .round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero)
        .to_i64()
        .ok_or_else(|| Error::Validation("Commission out of range".to_string()))?;

    Ok(SettlementFigures::Restaurant(RestaurantFigures {
        order_count: orders.len() as u32,
        gross_sales_cents,
        commission_percentage,
        commission_cents,
        net_payout_cents: gross_sales_cents - commission_cents,
    }))
}

fn rider_figures(orders: &[&Order], pay_plan: PayPlan, fuel: Cents) -> Result<SettlementFigures> {
    let delivery_fees_cents = sum(orders.iter().map(|o| o.delivery_fee_cents))?;
    let bonuses_cents = sum(orders.iter().map(|o| o.rider_bonus_cents))?;

    let base = match pay_plan {
        PayPlan::Commission => delivery_fees_cents,
        PayPlan::FixedSalary { fixed_salary_cents } => fixed_salary_cents,
    };
    let net_payout_cents = sum([base, bonuses_cents, fuel])?;

    let collected_by = |method: PaymentMethod| {
        sum(orders
            .iter()
            .filter(|o| o.effective_payment_method() == method)
            .map(|o| o.total_cents))
    };

    Ok(SettlementFigures::Rider(RiderFigures {
        pay_plan,
        delivery_count: orders.len() as u32,
        delivery_fees_cents,
        bonuses_cents,
        fuel_reimbursement_cents: fuel,
        net_payout_cents,
        collected: CollectedTotals {
            cash_cents: collected_by(PaymentMethod::Cash)?,
            pos_cents: collected_by(PaymentMethod::Pos)?,
            yape_plin_cents: collected_by(PaymentMethod::YapePlin)?,
        },
    }))
}

fn sum(values: impl IntoIterator<Item = Cents>) -> Result<Cents> {
    values
        .into_iter()
        .try_fold(0i64, |acc, v| acc.checked_add(v))
        .ok_or_else(|| Error::Validation("Amount overflow".to_string()))
}
