use chrono::{Duration, NaiveDate, NaiveDateTime};
use rusqlite::Connection;

use crate::errors::{AppError, AppResult};
use crate::db::queries;
use crate::models::{
    BookingStatus, Court, CourtReservation, OperatingHours, SlotAvailability, SlotStatus, TimeSlot,
};

/// Fallbacks for courts whose catalog entry lacks usable hours or slot length.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScheduleDefaults {
    pub hours: OperatingHours,
    pub slot_minutes: i64,
}

impl Default for ScheduleDefaults {
    fn default() -> Self {
        Self {
            hours: OperatingHours::default(),
            slot_minutes: 60,
        }
    }
}

/// A court with its resolved opening hours and slot length.
#[derive(Debug, Clone)]
pub struct CourtSchedule {
    pub court: Court,
    pub hours: OperatingHours,
    pub slot_minutes: i64,
}

pub fn court_schedule(
    conn: &Connection,
    court_id: &str,
    defaults: &ScheduleDefaults,
) -> AppResult<CourtSchedule> {
    let court = queries::get_court(conn, court_id)?
        .ok_or_else(|| AppError::NotFound(format!("court {court_id}")))?;
    let slot_minutes = queries::get_court_type(conn, &court.court_type_id)?
        .map(|t| t.slot_minutes)
        .filter(|m| *m > 0)
        .unwrap_or(defaults.slot_minutes);
    let hours = OperatingHours::resolve(
        court.open_time.as_deref(),
        court.close_time.as_deref(),
        defaults.hours,
    );

    Ok(CourtSchedule {
        court,
        hours,
        slot_minutes,
    })
}

pub fn day_range(date: NaiveDate) -> (NaiveDateTime, NaiveDateTime) {
    let start = date.and_time(chrono::NaiveTime::MIN);
    (start, start + Duration::days(1))
}

/// Labels each candidate slot. Overlapping a held reservation reads as
/// pending, overlapping any other active reservation as booked.
pub fn annotate_slots(
    candidates: &[TimeSlot],
    reservations: &[CourtReservation],
) -> Vec<SlotAvailability> {
    candidates
        .iter()
        .map(|slot| {
            let mut status = SlotStatus::Available;
            for reservation in reservations.iter().filter(|r| r.is_active()) {
                if !reservation.overlaps(&slot.start, &slot.end) {
                    continue;
                }
                if reservation.status == BookingStatus::Held {
                    status = SlotStatus::Pending;
                } else {
                    status = SlotStatus::Booked;
                    break;
                }
            }
            SlotAvailability {
                start: slot.start,
                end: slot.end,
                status,
            }
        })
        .collect()
}

pub fn generate_availability(
    date: NaiveDate,
    hours: &OperatingHours,
    slot_minutes: i64,
    reservations: &[CourtReservation],
) -> Vec<SlotAvailability> {
    annotate_slots(&hours.candidate_slots(date, slot_minutes), reservations)
}

pub fn court_availability(
    conn: &Connection,
    court_id: &str,
    date: NaiveDate,
    defaults: &ScheduleDefaults,
) -> AppResult<Vec<SlotAvailability>> {
    let schedule = court_schedule(conn, court_id, defaults)?;
    let (from, to) = day_range(date);
    let reservations = queries::list_reservations(conn, court_id, &from, &to)?;
    Ok(generate_availability(
        date,
        &schedule.hours,
        schedule.slot_minutes,
        &reservations,
    ))
}

/// The first active reservation on `court_id`, other than `exclude`, that
/// overlaps `[start, end)`.
pub fn find_conflict(
    conn: &Connection,
    court_id: &str,
    start: &NaiveDateTime,
    end: &NaiveDateTime,
    exclude: Option<&str>,
) -> AppResult<Option<CourtReservation>> {
    let reservations = queries::list_reservations(conn, court_id, start, end)?;
    Ok(reservations
        .into_iter()
        .filter(|r| exclude != Some(r.id.as_str()))
        .find(|r| r.overlaps(start, end)))
}

pub fn has_conflict(
    conn: &Connection,
    court_id: &str,
    start: &NaiveDateTime,
    end: &NaiveDateTime,
    exclude: Option<&str>,
) -> AppResult<bool> {
    Ok(find_conflict(conn, court_id, start, end, exclude)?.is_some())
}

/// Fails with `Conflict` naming the first proposed slot that is taken.
pub fn ensure_slots_free(
    conn: &Connection,
    court_id: &str,
    slots: &[TimeSlot],
    exclude: Option<&str>,
) -> AppResult<()> {
    for slot in slots {
        if let Some(existing) = find_conflict(conn, court_id, &slot.start, &slot.end, exclude)? {
            tracing::warn!(
                court_id,
                start = %slot.start,
                existing = %existing.id,
                "slot already booked"
            );
            return Err(AppError::Conflict(format!(
                "slot {} - {} on court {court_id} is already booked",
                slot.start.format("%Y-%m-%d %H:%M"),
                slot.end.format("%H:%M"),
            )));
        }
    }
    Ok(())
}
