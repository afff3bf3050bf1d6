use chrono::{Duration, NaiveDate, NaiveDateTime, NaiveTime};
use serde::{Deserialize, Serialize};

use crate::errors::{AppError, AppResult};
use crate::models::time::parse_time_of_day;

/// A half-open interval `[start, end)` on one court and one day.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
pub struct TimeSlot {
    pub start: NaiveDateTime,
    pub end: NaiveDateTime,
}

impl TimeSlot {
    pub fn new(start: NaiveDateTime, end: NaiveDateTime) -> AppResult<Self> {
        if start >= end {
            return Err(AppError::Validation(format!(
                "slot must start before it ends: {start} - {end}"
            )));
        }
        if start.date() != end.date() && end.time() != NaiveTime::MIN {
            return Err(AppError::Validation(format!(
                "slot must stay within one day: {start} - {end}"
            )));
        }
        Ok(Self { start, end })
    }

    pub fn overlaps(&self, start: &NaiveDateTime, end: &NaiveDateTime) -> bool {
        self.start < *end && self.end > *start
    }

    pub fn duration_minutes(&self) -> i64 {
        (self.end - self.start).num_minutes()
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SlotStatus {
    Available,
    Pending,
    Booked,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SlotAvailability {
    pub start: NaiveDateTime,
    pub end: NaiveDateTime,
    pub status: SlotStatus,
}

/// Daily opening window of a court.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OperatingHours {
    pub open: NaiveTime,
    pub close: NaiveTime,
}

impl OperatingHours {
    /// Missing, malformed or inverted catalog values fall back to `fallback`
    /// instead of failing.
    pub fn resolve(open: Option<&str>, close: Option<&str>, fallback: OperatingHours) -> Self {
        let open = open
            .and_then(|s| parse_time_of_day(s).ok())
            .unwrap_or(fallback.open);
        let close = close
            .and_then(|s| parse_time_of_day(s).ok())
            .unwrap_or(fallback.close);

        if open < close {
            Self { open, close }
        } else {
            tracing::warn!(%open, %close, "inverted operating hours, using defaults");
            fallback
        }
    }

    pub fn from_strings(open: &str, close: &str) -> AppResult<Self> {
        let open = parse_time_of_day(open)?;
        let close = parse_time_of_day(close)?;
        if open >= close {
            return Err(AppError::Config(format!(
                "opening time {open} must precede closing time {close}"
            )));
        }
        Ok(Self { open, close })
    }

    pub fn window(&self, date: NaiveDate) -> (NaiveDateTime, NaiveDateTime) {
        (date.and_time(self.open), date.and_time(self.close))
    }

    pub fn contains(&self, slot: &TimeSlot) -> bool {
        let (open, close) = self.window(slot.start.date());
        slot.start >= open && slot.end <= close
    }

    /// Consecutive slots of `slot_minutes` from opening to closing. A trailing
    /// slot that would run past closing is dropped.
    pub fn candidate_slots(&self, date: NaiveDate, slot_minutes: i64) -> Vec<TimeSlot> {
        if slot_minutes <= 0 {
            return vec![];
        }
        let (open, close) = self.window(date);
        let step = Duration::minutes(slot_minutes);

        let mut slots = vec![];
        let mut start = open;
        while start + step <= close {
            slots.push(TimeSlot {
                start,
                end: start + step,
            });
            start += step;
        }
        slots
    }
}

impl Default for OperatingHours {
    fn default() -> Self {
        Self {
            open: NaiveTime::from_hms_opt(6, 0, 0).unwrap_or(NaiveTime::MIN),
            close: NaiveTime::from_hms_opt(22, 0, 0).unwrap_or(NaiveTime::MIN),
        }
    }
}
