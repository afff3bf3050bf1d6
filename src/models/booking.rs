use std::fmt;

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use crate::models::availability::TimeSlot;

/// A court reservation. `slots` is ordered, non-empty and internally
/// non-overlapping.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CourtReservation {
    pub id: String,
    pub code: String,
    pub court_id: String,
    pub customer_id: String,
    pub status: BookingStatus,
    pub slots: Vec<TimeSlot>,
    /// Only set while Held.
    pub expires_at: Option<NaiveDateTime>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
    pub version: i64,
}

impl CourtReservation {
    pub fn is_active(&self) -> bool {
        self.status.is_active()
    }

    pub fn first_start(&self) -> Option<NaiveDateTime> {
        self.slots.first().map(|s| s.start)
    }

    pub fn overlaps(&self, start: &NaiveDateTime, end: &NaiveDateTime) -> bool {
        self.slots.iter().any(|slot| slot.overlaps(start, end))
    }

    pub fn total_minutes(&self) -> i64 {
        self.slots.iter().map(TimeSlot::duration_minutes).sum()
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum BookingStatus {
    Held,
    Booked,
    Paid,
    Cancelled,
}

impl BookingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BookingStatus::Held => "held",
            BookingStatus::Booked => "booked",
            BookingStatus::Paid => "paid",
            BookingStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "held" => Some(BookingStatus::Held),
            "booked" => Some(BookingStatus::Booked),
            "paid" => Some(BookingStatus::Paid),
            "cancelled" => Some(BookingStatus::Cancelled),
            _ => None,
        }
    }

    /// Active reservations occupy their slots.
    pub fn is_active(&self) -> bool {
        !matches!(self, BookingStatus::Cancelled)
    }
}

impl fmt::Display for BookingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_round_trip() {
        for status in [
            BookingStatus::Held,
            BookingStatus::Booked,
            BookingStatus::Paid,
            BookingStatus::Cancelled,
        ] {
            assert_eq!(BookingStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(BookingStatus::parse("pending"), None);
    }

    #[test]
    fn test_only_cancelled_is_inactive() {
        assert!(BookingStatus::Held.is_active());
        assert!(BookingStatus::Paid.is_active());
        assert!(!BookingStatus::Cancelled.is_active());
    }
}
