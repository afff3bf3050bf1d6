//! Fee, discount and deposit arithmetic. Amounts are integer minor currency
//! units; every division rounds half up.

use crate::errors::{AppError, AppResult};
use crate::models::{PaymentMethod, ServiceUnit, TimeSlot};

/// Longest billable duration for one hourly service line.
pub const MAX_SERVICE_MINUTES: i64 = 24 * 60;
pub const MAX_SERVICE_QUANTITY: u32 = 1_000;

/// `numerator / denominator` rounded half up, for non-negative numerators.
fn div_round_half_up(numerator: i128, denominator: i128) -> i128 {
    numerator / denominator + i128::from((numerator % denominator) * 2 >= denominator)
}

fn checked_product(factors: &[i64]) -> Option<i128> {
    factors
        .iter()
        .try_fold(1i128, |acc, f| acc.checked_mul(i128::from(*f)))
}

fn to_amount(value: Option<i128>, what: &str) -> AppResult<i64> {
    value
        .and_then(|v| i64::try_from(v).ok())
        .ok_or_else(|| AppError::Validation(format!("{what} is too large to bill")))
}

pub fn court_fee(price_per_hour: i64, slots: &[TimeSlot]) -> AppResult<i64> {
    let minutes: i64 = slots.iter().map(TimeSlot::duration_minutes).sum();
    let fee = checked_product(&[price_per_hour, minutes]).map(|n| div_round_half_up(n, 60));
    to_amount(fee, "court fee")
}

/// One billable service on an invoice.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServiceCharge {
    pub unit: ServiceUnit,
    pub price: i64,
    pub quantity: u32,
    /// Only meaningful for hourly services.
    pub duration_minutes: i64,
}

impl ServiceCharge {
    pub fn amount(&self) -> AppResult<i64> {
        let quantity = i64::from(self.quantity);
        let amount = match self.unit {
            ServiceUnit::Hour => checked_product(&[self.price, quantity, self.duration_minutes])
                .map(|n| div_round_half_up(n, 60)),
            ServiceUnit::Use => checked_product(&[self.price, quantity]),
            ServiceUnit::Free => Some(0),
        };
        to_amount(amount, "service charge")
    }
}

/// Sum of line amounts, rejecting totals that do not fit.
pub fn total(amounts: impl IntoIterator<Item = i64>) -> AppResult<i64> {
    amounts
        .into_iter()
        .try_fold(0i64, |acc, a| acc.checked_add(a))
        .ok_or_else(|| AppError::Validation("invoice total is too large to bill".into()))
}

pub fn service_fee(items: &[ServiceCharge]) -> AppResult<i64> {
    items
        .iter()
        .map(ServiceCharge::amount)
        .collect::<AppResult<Vec<_>>>()
        .and_then(|amounts| total(amounts))
}

pub fn discount(subtotal: i64, percent: u32) -> i64 {
    // never exceeds `subtotal` for percents up to 100
    div_round_half_up(i128::from(subtotal) * i128::from(percent), 100) as i64
}

pub fn deposit(
    court_fee: i64,
    ratio: f64,
    method: PaymentMethod,
    minutes_until_start: i64,
    cancel_window_minutes: i64,
) -> i64 {
    if method != PaymentMethod::Counter || minutes_until_start <= cancel_window_minutes {
        return 0;
    }
    (court_fee as f64 * ratio).round() as i64
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DepositPolicy {
    pub ratio: f64,
    pub cancel_window_minutes: i64,
}

impl DepositPolicy {
    pub fn validate(&self) -> AppResult<()> {
        if !(0.0..=1.0).contains(&self.ratio) {
            return Err(AppError::Config(format!(
                "deposit ratio {} must be between 0 and 1",
                self.ratio
            )));
        }
        if self.cancel_window_minutes < 0 {
            return Err(AppError::Config("cancel window must not be negative".into()));
        }
        Ok(())
    }

    pub fn deposit_for(&self, court_fee: i64, method: PaymentMethod, minutes_until_start: i64) -> i64 {
        deposit(
            court_fee,
            self.ratio,
            method,
            minutes_until_start,
            self.cancel_window_minutes,
        )
    }
}

/// The discount percents the business hands out.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscountPolicy {
    tiers: Vec<u32>,
}

impl DiscountPolicy {
    pub fn new(mut tiers: Vec<u32>) -> Self {
        if !tiers.contains(&0) {
            tiers.push(0);
        }
        tiers.sort_unstable();
        tiers.dedup();
        Self { tiers }
    }

    pub fn tiers(&self) -> &[u32] {
        &self.tiers
    }

    pub fn validate(&self, percent: u32) -> AppResult<u32> {
        if self.tiers.contains(&percent) {
            Ok(percent)
        } else {
            Err(AppError::Validation(format!(
                "discount of {percent}% is not one of the offered tiers {:?}",
                self.tiers
            )))
        }
    }
}

impl Default for DiscountPolicy {
    fn default() -> Self {
        Self::new(vec![0, 10, 20])
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Quote {
    pub court_fee: i64,
    pub service_fee: i64,
    pub subtotal: i64,
    pub discount_amount: i64,
    pub total: i64,
}

pub fn quote(court_fee: i64, services: &[ServiceCharge], discount_percent: u32) -> AppResult<Quote> {
    let service_fee = service_fee(services)?;
    let subtotal = total([court_fee, service_fee])?;
    let discount_amount = discount(subtotal, discount_percent);
    Ok(Quote {
        court_fee,
        service_fee,
        subtotal,
        discount_amount,
        total: subtotal - discount_amount,
    })
}
