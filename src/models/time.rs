//! Boundary parsers. Every timestamp entering the core goes through here and
//! comes out as a wall-clock `NaiveDateTime`/`NaiveDate`/`NaiveTime`.

use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime, Offset, SubsecRound, Utc};

use crate::errors::{AppError, AppResult};

pub const STORAGE_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

const NAIVE_FORMATS: [&str; 4] = [
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%d %H:%M",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%dT%H:%M",
];

fn parse_naive(s: &str) -> Option<NaiveDateTime> {
    NAIVE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(s, fmt).ok())
}

pub fn parse_date(s: &str) -> AppResult<NaiveDate> {
    let s = s.trim();
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .or_else(|| parse_naive(s).map(|dt| dt.date()))
        .ok_or_else(|| AppError::Validation(format!("invalid date: {s}")))
}

pub fn parse_time_of_day(s: &str) -> AppResult<NaiveTime> {
    let s = s.trim();
    NaiveTime::parse_from_str(s, "%H:%M")
        .or_else(|_| NaiveTime::parse_from_str(s, "%H:%M:%S"))
        .map_err(|_| AppError::Validation(format!("invalid time of day: {s}")))
}

/// Accepts `YYYY-MM-DD HH:mm[:ss]`, `YYYY-MM-DDTHH:mm[:ss]` and RFC 3339.
/// Naive shapes are taken as facility wall-clock time; an explicit offset is
/// converted to the facility's `offset` first.
pub fn parse_datetime(s: &str, offset: &FixedOffset) -> AppResult<NaiveDateTime> {
    let s = s.trim();
    if let Some(dt) = parse_naive(s) {
        return Ok(dt);
    }

    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(offset).naive_local())
        .map_err(|_| AppError::Validation(format!("invalid datetime: {s}")))
}

/// `+07:00`, `-0530`, `+7` or `Z`/`UTC`.
pub fn parse_utc_offset(s: &str) -> Option<FixedOffset> {
    let s = s.trim();
    if s.is_empty() || s.eq_ignore_ascii_case("z") || s.eq_ignore_ascii_case("utc") {
        return Some(Utc.fix());
    }

    let (sign, rest) = match s.as_bytes()[0] {
        b'+' => (1, &s[1..]),
        b'-' => (-1, &s[1..]),
        _ => return None,
    };
    let (hours, minutes) = match rest.split_once(':') {
        Some((h, m)) => (h, m),
        None if rest.len() == 4 => rest.split_at(2),
        None => (rest, "0"),
    };
    let hours: i32 = hours.parse().ok()?;
    let minutes: i32 = minutes.parse().ok()?;
    if hours > 14 || minutes >= 60 {
        return None;
    }
    FixedOffset::east_opt(sign * (hours * 3600 + minutes * 60))
}

/// The facility's current wall-clock time, to whole seconds so it survives
/// a trip through storage unchanged.
pub fn facility_now(offset: &FixedOffset) -> NaiveDateTime {
    Utc::now().with_timezone(offset).naive_local().trunc_subsecs(0)
}

pub fn format_datetime(dt: &NaiveDateTime) -> String {
    dt.format(STORAGE_FORMAT).to_string()
}

/// Stored values are written by `format_datetime`; anything else is corrupt data.
pub fn parse_stored(s: &str) -> AppResult<NaiveDateTime> {
    NaiveDateTime::parse_from_str(s, STORAGE_FORMAT)
        .map_err(|_| AppError::Validation(format!("corrupt stored timestamp: {s}")))
}
