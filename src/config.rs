use std::env;
use std::str::FromStr;

use chrono::{FixedOffset, Offset, Utc};

use crate::models::time::parse_utc_offset;
use crate::services::pricing::{DepositPolicy, DiscountPolicy};

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub port: u16,
    pub database_url: String,
    pub hold_ttl_minutes: i64,
    pub hold_sweep_interval_secs: u64,
    pub deposit_ratio: f64,
    pub cancel_window_minutes: i64,
    pub discount_tiers: Vec<u32>,
    pub default_open_time: String,
    pub default_close_time: String,
    pub default_slot_minutes: i64,
    pub booking_code_prefix: String,
    /// Offset of the facility's wall clock; slot times and "now" use it.
    pub facility_utc_offset: FixedOffset,
}

impl AppConfig {
    pub fn from_env() -> Self {
        Self {
            port: parse_var("PORT", 3000),
            database_url: env::var("DATABASE_URL").unwrap_or_else(|_| "courtbook.db".to_string()),
            hold_ttl_minutes: parse_var("HOLD_TTL_MINUTES", 15),
            hold_sweep_interval_secs: parse_var("HOLD_SWEEP_INTERVAL_SECS", 60),
            deposit_ratio: parse_var("DEPOSIT_RATIO", 0.5),
            cancel_window_minutes: parse_var("CANCEL_WINDOW_MINUTES", 60),
            discount_tiers: env::var("DISCOUNT_TIERS")
                .ok()
                .and_then(|v| parse_tiers(&v))
                .unwrap_or_else(|| vec![0, 10, 20]),
            default_open_time: env::var("DEFAULT_OPEN_TIME").unwrap_or_else(|_| "06:00".to_string()),
            default_close_time: env::var("DEFAULT_CLOSE_TIME")
                .unwrap_or_else(|_| "22:00".to_string()),
            default_slot_minutes: parse_var("DEFAULT_SLOT_MINUTES", 60),
            booking_code_prefix: env::var("BOOKING_CODE_PREFIX").unwrap_or_else(|_| "BK".to_string()),
            facility_utc_offset: env::var("FACILITY_UTC_OFFSET")
                .ok()
                .and_then(|v| parse_utc_offset(&v))
                .unwrap_or_else(|| Utc.fix()),
        }
    }

    pub fn deposit_policy(&self) -> DepositPolicy {
        DepositPolicy {
            ratio: self.deposit_ratio,
            cancel_window_minutes: self.cancel_window_minutes,
        }
    }

    pub fn discount_policy(&self) -> DiscountPolicy {
        DiscountPolicy::new(self.discount_tiers.clone())
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            port: 3000,
            database_url: ":memory:".to_string(),
            hold_ttl_minutes: 15,
            hold_sweep_interval_secs: 60,
            deposit_ratio: 0.5,
            cancel_window_minutes: 60,
            discount_tiers: vec![0, 10, 20],
            default_open_time: "06:00".to_string(),
            default_close_time: "22:00".to_string(),
            default_slot_minutes: 60,
            booking_code_prefix: "BK".to_string(),
            facility_utc_offset: Utc.fix(),
        }
    }
}

fn parse_var<T: FromStr>(name: &str, default: T) -> T {
    env::var(name)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

fn parse_tiers(raw: &str) -> Option<Vec<u32>> {
    let tiers: Vec<u32> = raw
        .split(',')
        .filter_map(|t| t.trim().parse().ok())
        .filter(|t| *t <= 100)
        .collect();
    if tiers.is_empty() {
        None
    } else {
        Some(tiers)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_tiers() {
        assert_eq!(parse_tiers("0, 10,20"), Some(vec![0, 10, 20]));
        assert_eq!(parse_tiers("5,abc,150"), Some(vec![5]));
        assert_eq!(parse_tiers("nope"), None);
    }
}
