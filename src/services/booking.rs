use std::sync::Arc;

use chrono::{Duration, NaiveDate, NaiveDateTime};
use rusqlite::{Connection, Transaction};

use crate::config::AppConfig;
use crate::db::{queries, Store};
use crate::errors::{AppError, AppResult};
use crate::models::{BookingStatus, CourtReservation, SlotAvailability, TimeSlot};
use crate::services::locks::{court_key, KeyedLocks};
use crate::services::scheduling::{
    self, court_schedule, day_range, ensure_slots_free, CourtSchedule, ScheduleDefaults,
};

#[derive(Debug, Clone)]
pub struct HoldRequest {
    pub court_id: String,
    pub customer_id: String,
    pub slots: Vec<TimeSlot>,
}

#[derive(Debug, Clone)]
pub struct EditRequest {
    pub court_id: Option<String>,
    pub slots: Vec<TimeSlot>,
}

/// Owns every state change of a court reservation. Slot-mutating operations
/// run under the court's lock and inside one store transaction.
pub struct BookingManager {
    store: Store,
    locks: Arc<KeyedLocks>,
    defaults: ScheduleDefaults,
    hold_ttl: Duration,
    code_prefix: String,
}

impl BookingManager {
    pub fn new(store: Store, locks: Arc<KeyedLocks>, config: &AppConfig) -> AppResult<Self> {
        if config.hold_ttl_minutes <= 0 {
            return Err(AppError::Config("hold TTL must be positive".into()));
        }
        let hours = crate::models::OperatingHours::from_strings(
            &config.default_open_time,
            &config.default_close_time,
        )?;
        if config.default_slot_minutes <= 0 {
            return Err(AppError::Config("default slot length must be positive".into()));
        }

        Ok(Self {
            store,
            locks,
            defaults: ScheduleDefaults {
                hours,
                slot_minutes: config.default_slot_minutes,
            },
            hold_ttl: Duration::minutes(config.hold_ttl_minutes),
            code_prefix: config.booking_code_prefix.clone(),
        })
    }

    pub fn get(&self, id: &str) -> AppResult<CourtReservation> {
        self.store.read(|conn| load(conn, id))
    }

    pub fn list_for_court(&self, court_id: &str, date: NaiveDate) -> AppResult<Vec<CourtReservation>> {
        let (from, to) = day_range(date);
        self.store
            .read(|conn| queries::list_reservations(conn, court_id, &from, &to))
    }

    pub fn availability(&self, court_id: &str, date: NaiveDate) -> AppResult<Vec<SlotAvailability>> {
        self.store
            .read(|conn| scheduling::court_availability(conn, court_id, date, &self.defaults))
    }

    pub fn has_conflict(
        &self,
        court_id: &str,
        start: &NaiveDateTime,
        end: &NaiveDateTime,
        exclude: Option<&str>,
    ) -> AppResult<bool> {
        self.store
            .read(|conn| scheduling::has_conflict(conn, court_id, start, end, exclude))
    }

    /// Claims the slots as a Held reservation that expires after the hold TTL.
    pub fn hold(&self, request: HoldRequest, now: NaiveDateTime) -> AppResult<CourtReservation> {
        let slots = normalize_slots(request.slots)?;

        let locks = self.locks.set(&[court_key(&request.court_id).as_str()]);
        let _held = locks.acquire();

        let reservation = self.store.atomically(|tx| {
            let schedule = court_schedule(tx, &request.court_id, &self.defaults)?;
            if queries::get_customer(tx, &request.customer_id)?.is_none() {
                return Err(AppError::NotFound(format!("customer {}", request.customer_id)));
            }
            fit_schedule(&slots, &schedule)?;
            ensure_slots_free(tx, &request.court_id, &slots, None)?;

            let reservation = CourtReservation {
                id: uuid::Uuid::new_v4().to_string(),
                code: self.booking_code(&request.court_id, &slots),
                court_id: request.court_id.clone(),
                customer_id: request.customer_id.clone(),
                status: BookingStatus::Held,
                slots: slots.clone(),
                expires_at: Some(now + self.hold_ttl),
                created_at: now,
                updated_at: now,
                version: 0,
            };
            queries::save_reservation(tx, &reservation)
        })?;

        tracing::info!(
            booking_id = %reservation.id,
            code = %reservation.code,
            court_id = %reservation.court_id,
            slots = reservation.slots.len(),
            "reservation held"
        );
        Ok(reservation)
    }

    pub fn confirm(&self, id: &str, now: NaiveDateTime) -> AppResult<CourtReservation> {
        let reservation = self.with_reservation(id, None, |tx, mut reservation| {
            if reservation.status != BookingStatus::Held {
                return Err(AppError::transition("booking", reservation.status, "confirm"));
            }
            if reservation.expires_at.is_some_and(|at| at <= now) {
                return Err(AppError::transition("booking", "its hold has expired", "confirm"));
            }
            reservation.status = BookingStatus::Booked;
            reservation.expires_at = None;
            reservation.updated_at = now;
            queries::save_reservation(tx, &reservation)
        })?;

        tracing::info!(booking_id = %reservation.id, "reservation confirmed");
        Ok(reservation)
    }

    /// Moves a reservation to other slots and optionally another court. Every
    /// proposed slot is checked with the reservation itself excluded; one
    /// conflict rejects the whole edit.
    pub fn edit(&self, id: &str, request: EditRequest, now: NaiveDateTime) -> AppResult<CourtReservation> {
        let slots = normalize_slots(request.slots)?;
        let target_court = request.court_id.as_deref();

        let reservation = self.with_reservation(id, target_court, |tx, mut reservation| {
            if !matches!(reservation.status, BookingStatus::Held | BookingStatus::Booked) {
                return Err(AppError::transition("booking", reservation.status, "edit"));
            }
            let court_id = target_court.unwrap_or(&reservation.court_id).to_string();
            let schedule = court_schedule(tx, &court_id, &self.defaults)?;
            fit_schedule(&slots, &schedule)?;
            ensure_slots_free(tx, &court_id, &slots, Some(&reservation.id))?;

            reservation.court_id = court_id;
            reservation.slots = slots.clone();
            reservation.updated_at = now;
            queries::save_reservation(tx, &reservation)
        })?;

        tracing::info!(
            booking_id = %reservation.id,
            court_id = %reservation.court_id,
            slots = reservation.slots.len(),
            "reservation edited"
        );
        Ok(reservation)
    }

    /// Releases the reservation's slots. Cancelling a cancelled reservation
    /// returns it unchanged.
    pub fn cancel(&self, id: &str, actor: &str, now: NaiveDateTime) -> AppResult<CourtReservation> {
        let reservation =
            self.with_reservation(id, None, |tx, reservation| cancel_in(tx, reservation, now))?;
        tracing::info!(booking_id = %reservation.id, actor, "reservation cancelled");
        Ok(reservation)
    }

    /// Cancels every hold whose TTL has lapsed by `now`. Returns how many were
    /// released.
    pub fn expire_holds(&self, now: NaiveDateTime) -> AppResult<usize> {
        let expired = self.store.read(|conn| queries::list_expired_holds(conn, &now))?;

        let mut released = 0;
        for (id, _court_id) in expired {
            let outcome = self.with_reservation(&id, None, |tx, reservation| {
                let lapsed = reservation.status == BookingStatus::Held
                    && reservation.expires_at.is_some_and(|at| at <= now);
                if lapsed {
                    cancel_in(tx, reservation, now).map(|_| true)
                } else {
                    Ok(false)
                }
            });
            match outcome {
                Ok(true) => {
                    tracing::info!(booking_id = %id, "expired hold released");
                    released += 1;
                }
                Ok(false) => {}
                Err(e) => tracing::error!(booking_id = %id, error = %e, "failed to release expired hold"),
            }
        }
        Ok(released)
    }

    /// Runs `op` on the freshly loaded reservation inside one transaction while
    /// holding its court's lock (and `extra_court`'s, if given). If the
    /// reservation moves to another court while waiting, the locks are
    /// re-acquired for the new court.
    pub(crate) fn with_reservation<T, F>(
        &self,
        id: &str,
        extra_court: Option<&str>,
        mut op: F,
    ) -> AppResult<T>
    where
        F: FnMut(&Transaction<'_>, CourtReservation) -> AppResult<T>,
    {
        loop {
            let court_id = self.get(id)?.court_id;
            let mut keys = vec![court_key(&court_id)];
            if let Some(extra) = extra_court {
                keys.push(court_key(extra));
            }
            let keys: Vec<&str> = keys.iter().map(String::as_str).collect();
            let locks = self.locks.set(&keys);
            let _held = locks.acquire();

            let outcome = self.store.atomically(|tx| {
                let reservation = load(tx, id)?;
                if reservation.court_id != court_id {
                    return Ok(None);
                }
                op(tx, reservation).map(Some)
            })?;

            if let Some(value) = outcome {
                return Ok(value);
            }
            tracing::debug!(booking_id = %id, "reservation changed court while locking, retrying");
        }
    }

    fn booking_code(&self, court_id: &str, slots: &[TimeSlot]) -> String {
        let day = slots
            .first()
            .map(|s| s.start.format("%Y%m%d").to_string())
            .unwrap_or_default();
        let random: String = uuid::Uuid::new_v4()
            .simple()
            .to_string()
            .chars()
            .take(4)
            .collect::<String>()
            .to_uppercase();
        format!("{}-{court_id}-{day}-{random}", self.code_prefix)
    }
}

fn load(conn: &Connection, id: &str) -> AppResult<CourtReservation> {
    queries::get_reservation(conn, id)?.ok_or_else(|| AppError::NotFound(format!("booking {id}")))
}

pub(crate) fn cancel_in(
    conn: &Connection,
    mut reservation: CourtReservation,
    now: NaiveDateTime,
) -> AppResult<CourtReservation> {
    if reservation.status == BookingStatus::Cancelled {
        return Ok(reservation);
    }
    reservation.status = BookingStatus::Cancelled;
    reservation.expires_at = None;
    reservation.updated_at = now;
    queries::save_reservation(conn, &reservation)
}

pub(crate) fn mark_paid_in(
    conn: &Connection,
    mut reservation: CourtReservation,
    now: NaiveDateTime,
) -> AppResult<CourtReservation> {
    match reservation.status {
        BookingStatus::Paid => Ok(reservation),
        BookingStatus::Held | BookingStatus::Booked => {
            reservation.status = BookingStatus::Paid;
            reservation.expires_at = None;
            reservation.updated_at = now;
            queries::save_reservation(conn, &reservation)
        }
        BookingStatus::Cancelled => Err(AppError::transition("booking", reservation.status, "be paid")),
    }
}

/// Sorts the slots and rejects empty, malformed or self-overlapping lists.
fn normalize_slots(slots: Vec<TimeSlot>) -> AppResult<Vec<TimeSlot>> {
    if slots.is_empty() {
        return Err(AppError::Validation("a booking needs at least one slot".into()));
    }
    let mut slots = slots
        .into_iter()
        .map(|s| TimeSlot::new(s.start, s.end))
        .collect::<AppResult<Vec<_>>>()?;
    slots.sort();

    for pair in slots.windows(2) {
        if pair[0].end > pair[1].start {
            return Err(AppError::Validation(format!(
                "slots {} and {} overlap each other",
                pair[0].start, pair[1].start
            )));
        }
    }
    Ok(slots)
}

fn fit_schedule(slots: &[TimeSlot], schedule: &CourtSchedule) -> AppResult<()> {
    for slot in slots {
        if slot.duration_minutes() != schedule.slot_minutes {
            return Err(AppError::Validation(format!(
                "court {} books in {} minute slots, got {} minutes",
                schedule.court.id,
                schedule.slot_minutes,
                slot.duration_minutes()
            )));
        }
        if !schedule.hours.contains(slot) {
            return Err(AppError::Validation(format!(
                "slot {} - {} is outside opening hours {} - {}",
                slot.start.format("%Y-%m-%d %H:%M"),
                slot.end.format("%H:%M"),
                schedule.hours.open.format("%H:%M"),
                schedule.hours.close.format("%H:%M"),
            )));
        }
    }
    Ok(())
}
