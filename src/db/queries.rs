use chrono::NaiveDateTime;
use rusqlite::{params, Connection, OptionalExtension};

use crate::errors::{AppError, AppResult};
use crate::models::time::{format_datetime, parse_stored};
use crate::models::{
    BookingStatus, Court, CourtReservation, CourtType, Customer, Invoice, InvoiceStatus,
    PaymentMethod, Service, ServiceUnit, TimeSlot,
};

// ── Catalog ──

pub fn get_court(conn: &Connection, id: &str) -> AppResult<Option<Court>> {
    let court = conn
        .query_row(
            "SELECT id, branch_id, court_type_id, name, price_per_hour, open_time, close_time
             FROM courts WHERE id = ?1",
            params![id],
            |row| {
                Ok(Court {
                    id: row.get(0)?,
                    branch_id: row.get(1)?,
                    court_type_id: row.get(2)?,
                    name: row.get(3)?,
                    price_per_hour: row.get(4)?,
                    open_time: row.get(5)?,
                    close_time: row.get(6)?,
                })
            },
        )
        .optional()?;
    Ok(court)
}

pub fn get_court_type(conn: &Connection, id: &str) -> AppResult<Option<CourtType>> {
    let court_type = conn
        .query_row(
            "SELECT id, name, slot_minutes FROM court_types WHERE id = ?1",
            params![id],
            |row| {
                Ok(CourtType {
                    id: row.get(0)?,
                    name: row.get(1)?,
                    slot_minutes: row.get(2)?,
                })
            },
        )
        .optional()?;
    Ok(court_type)
}

pub fn get_service(conn: &Connection, id: &str) -> AppResult<Option<Service>> {
    let row = conn
        .query_row(
            "SELECT id, branch_id, name, unit, price FROM services WHERE id = ?1",
            params![id],
            |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, i64>(4)?,
                ))
            },
        )
        .optional()?;

    row.map(|(id, branch_id, name, unit, price)| {
        let unit = ServiceUnit::parse(&unit)
            .ok_or_else(|| AppError::Validation(format!("service {id} has unknown unit {unit}")))?;
        Ok(Service {
            id,
            branch_id,
            name,
            unit,
            price,
        })
    })
    .transpose()
}

pub fn get_customer(conn: &Connection, id: &str) -> AppResult<Option<Customer>> {
    let customer = conn
        .query_row(
            "SELECT id, name, phone FROM customers WHERE id = ?1",
            params![id],
            |row| {
                Ok(Customer {
                    id: row.get(0)?,
                    name: row.get(1)?,
                    phone: row.get(2)?,
                })
            },
        )
        .optional()?;
    Ok(customer)
}

pub fn insert_court_type(conn: &Connection, court_type: &CourtType) -> AppResult<()> {
    conn.execute(
        "INSERT INTO court_types (id, name, slot_minutes) VALUES (?1, ?2, ?3)",
        params![court_type.id, court_type.name, court_type.slot_minutes],
    )?;
    Ok(())
}

pub fn insert_court(conn: &Connection, court: &Court) -> AppResult<()> {
    conn.execute(
        "INSERT INTO courts (id, branch_id, court_type_id, name, price_per_hour, open_time, close_time)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            court.id,
            court.branch_id,
            court.court_type_id,
            court.name,
            court.price_per_hour,
            court.open_time,
            court.close_time,
        ],
    )?;
    Ok(())
}

pub fn insert_service(conn: &Connection, service: &Service) -> AppResult<()> {
    conn.execute(
        "INSERT INTO services (id, branch_id, name, unit, price) VALUES (?1, ?2, ?3, ?4, ?5)",
        params![
            service.id,
            service.branch_id,
            service.name,
            service.unit.as_str(),
            service.price,
        ],
    )?;
    Ok(())
}

pub fn insert_customer(conn: &Connection, customer: &Customer) -> AppResult<()> {
    conn.execute(
        "INSERT INTO customers (id, name, phone) VALUES (?1, ?2, ?3)",
        params![customer.id, customer.name, customer.phone],
    )?;
    Ok(())
}

// ── Reservations ──

const RESERVATION_COLUMNS: &str =
    "r.id, r.code, r.court_id, r.customer_id, r.status, r.expires_at, r.created_at, r.updated_at, r.version";

/// Active reservations on `court_id` with at least one slot intersecting
/// `[from, to)`, ordered by their first slot.
pub fn list_reservations(
    conn: &Connection,
    court_id: &str,
    from: &NaiveDateTime,
    to: &NaiveDateTime,
) -> AppResult<Vec<CourtReservation>> {
    let sql = format!(
        "SELECT DISTINCT {RESERVATION_COLUMNS}
         FROM reservations r
         JOIN reservation_slots s ON s.reservation_id = r.id
         WHERE r.court_id = ?1 AND r.status != 'cancelled'
           AND s.start_at < ?3 AND s.end_at > ?2"
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(
        params![court_id, format_datetime(from), format_datetime(to)],
        |row| Ok(parse_reservation_row(row)),
    )?;

    let mut reservations = vec![];
    for row in rows {
        let mut reservation = row??;
        reservation.slots = load_slots(conn, &reservation.id)?;
        reservations.push(reservation);
    }
    reservations.sort_by_key(|r| r.first_start());
    Ok(reservations)
}

pub fn get_reservation(conn: &Connection, id: &str) -> AppResult<Option<CourtReservation>> {
    let sql = format!("SELECT {RESERVATION_COLUMNS} FROM reservations r WHERE r.id = ?1");
    let result = conn
        .query_row(&sql, params![id], |row| Ok(parse_reservation_row(row)))
        .optional()?;

    match result {
        Some(reservation) => {
            let mut reservation = reservation?;
            reservation.slots = load_slots(conn, &reservation.id)?;
            Ok(Some(reservation))
        }
        None => Ok(None),
    }
}

/// Held reservations whose hold lapsed at or before `now`, as `(id, court_id)`.
pub fn list_expired_holds(
    conn: &Connection,
    now: &NaiveDateTime,
) -> AppResult<Vec<(String, String)>> {
    let mut stmt = conn.prepare(
        "SELECT id, court_id FROM reservations
         WHERE status = 'held' AND expires_at IS NOT NULL AND expires_at <= ?1
         ORDER BY court_id, expires_at",
    )?;
    let rows = stmt.query_map(params![format_datetime(now)], |row| {
        Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
    })?;

    let mut expired = vec![];
    for row in rows {
        expired.push(row?);
    }
    Ok(expired)
}

/// Inserts a new reservation (`version == 0`) or updates an existing one with
/// a compare-and-set on `version`. Slots are rewritten in full.
pub fn save_reservation(
    conn: &Connection,
    reservation: &CourtReservation,
) -> AppResult<CourtReservation> {
    let expires_at = reservation.expires_at.as_ref().map(format_datetime);

    if reservation.version == 0 {
        conn.execute(
            "INSERT INTO reservations (id, code, court_id, customer_id, status, expires_at, created_at, updated_at, version)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, 1)",
            params![
                reservation.id,
                reservation.code,
                reservation.court_id,
                reservation.customer_id,
                reservation.status.as_str(),
                expires_at,
                format_datetime(&reservation.created_at),
                format_datetime(&reservation.updated_at),
            ],
        )?;
    } else {
        let count = conn.execute(
            "UPDATE reservations
             SET court_id = ?1, status = ?2, expires_at = ?3, updated_at = ?4, version = version + 1
             WHERE id = ?5 AND version = ?6",
            params![
                reservation.court_id,
                reservation.status.as_str(),
                expires_at,
                format_datetime(&reservation.updated_at),
                reservation.id,
                reservation.version,
            ],
        )?;
        if count == 0 {
            return Err(AppError::WriteConflict);
        }
        conn.execute(
            "DELETE FROM reservation_slots WHERE reservation_id = ?1",
            params![reservation.id],
        )?;
    }

    let mut stmt = conn.prepare(
        "INSERT INTO reservation_slots (reservation_id, court_id, start_at, end_at) VALUES (?1, ?2, ?3, ?4)",
    )?;
    for slot in &reservation.slots {
        stmt.execute(params![
            reservation.id,
            reservation.court_id,
            format_datetime(&slot.start),
            format_datetime(&slot.end),
        ])?;
    }

    let mut saved = reservation.clone();
    saved.version += 1;
    Ok(saved)
}

fn load_slots(conn: &Connection, reservation_id: &str) -> AppResult<Vec<TimeSlot>> {
    let mut stmt = conn.prepare(
        "SELECT start_at, end_at FROM reservation_slots WHERE reservation_id = ?1 ORDER BY start_at ASC",
    )?;
    let rows = stmt.query_map(params![reservation_id], |row| {
        Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
    })?;

    let mut slots = vec![];
    for row in rows {
        let (start, end) = row?;
        slots.push(TimeSlot {
            start: parse_stored(&start)?,
            end: parse_stored(&end)?,
        });
    }
    Ok(slots)
}

fn parse_reservation_row(row: &rusqlite::Row) -> AppResult<CourtReservation> {
    let status_str: String = row.get(4)?;
    let expires_at: Option<String> = row.get(5)?;
    let created_at: String = row.get(6)?;
    let updated_at: String = row.get(7)?;

    Ok(CourtReservation {
        id: row.get(0)?,
        code: row.get(1)?,
        court_id: row.get(2)?,
        customer_id: row.get(3)?,
        status: BookingStatus::parse(&status_str)
            .ok_or_else(|| AppError::Validation(format!("unknown booking status {status_str}")))?,
        slots: vec![],
        expires_at: expires_at.as_deref().map(parse_stored).transpose()?,
        created_at: parse_stored(&created_at)?,
        updated_at: parse_stored(&updated_at)?,
        version: row.get(8)?,
    })
}

// ── Invoices ──

const INVOICE_COLUMNS: &str = "id, booking_id, customer_id, line_items, subtotal, discount_percent, \
     discount_amount, total_amount, deposit_amount, status, payment_method, refunds, history, note, \
     created_at, updated_at, version";

pub fn get_invoice(conn: &Connection, id: &str) -> AppResult<Option<Invoice>> {
    let sql = format!("SELECT {INVOICE_COLUMNS} FROM invoices WHERE id = ?1");
    let result = conn
        .query_row(&sql, params![id], |row| Ok(parse_invoice_row(row)))
        .optional()?;
    result.transpose()
}

/// The invoice currently billing `booking_id`, ignoring cancelled ones.
pub fn find_active_invoice_for_booking(
    conn: &Connection,
    booking_id: &str,
) -> AppResult<Option<Invoice>> {
    let sql = format!(
        "SELECT {INVOICE_COLUMNS} FROM invoices
         WHERE booking_id = ?1 AND status != 'cancelled'
         ORDER BY created_at DESC LIMIT 1"
    );
    let result = conn
        .query_row(&sql, params![booking_id], |row| Ok(parse_invoice_row(row)))
        .optional()?;
    result.transpose()
}

/// Same insert-or-compare-and-set contract as `save_reservation`.
pub fn save_invoice(conn: &Connection, invoice: &Invoice) -> AppResult<Invoice> {
    let line_items = serde_json::to_string(&invoice.line_items)?;
    let refunds = serde_json::to_string(&invoice.refunds)?;
    let history = serde_json::to_string(&invoice.history)?;

    if invoice.version == 0 {
        conn.execute(
            "INSERT INTO invoices (id, booking_id, customer_id, line_items, subtotal, discount_percent,
                 discount_amount, total_amount, deposit_amount, status, payment_method, refunds, history,
                 note, created_at, updated_at, version)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, 1)",
            params![
                invoice.id,
                invoice.booking_id,
                invoice.customer_id,
                line_items,
                invoice.subtotal,
                invoice.discount_percent,
                invoice.discount_amount,
                invoice.total_amount,
                invoice.deposit_amount,
                invoice.status.as_str(),
                invoice.payment_method.as_str(),
                refunds,
                history,
                invoice.note,
                format_datetime(&invoice.created_at),
                format_datetime(&invoice.updated_at),
            ],
        )?;
    } else {
        let count = conn.execute(
            "UPDATE invoices
             SET line_items = ?1, subtotal = ?2, discount_percent = ?3, discount_amount = ?4,
                 total_amount = ?5, deposit_amount = ?6, status = ?7, payment_method = ?8,
                 refunds = ?9, history = ?10, note = ?11, updated_at = ?12, version = version + 1
             WHERE id = ?13 AND version = ?14",
            params![
                line_items,
                invoice.subtotal,
                invoice.discount_percent,
                invoice.discount_amount,
                invoice.total_amount,
                invoice.deposit_amount,
                invoice.status.as_str(),
                invoice.payment_method.as_str(),
                refunds,
                history,
                invoice.note,
                format_datetime(&invoice.updated_at),
                invoice.id,
                invoice.version,
            ],
        )?;
        if count == 0 {
            return Err(AppError::WriteConflict);
        }
    }

    let mut saved = invoice.clone();
    saved.version += 1;
    Ok(saved)
}

fn parse_invoice_row(row: &rusqlite::Row) -> AppResult<Invoice> {
    let line_items: String = row.get(3)?;
    let status_str: String = row.get(9)?;
    let method_str: String = row.get(10)?;
    let refunds: String = row.get(11)?;
    let history: String = row.get(12)?;
    let created_at: String = row.get(14)?;
    let updated_at: String = row.get(15)?;

    Ok(Invoice {
        id: row.get(0)?,
        booking_id: row.get(1)?,
        customer_id: row.get(2)?,
        line_items: serde_json::from_str(&line_items)?,
        subtotal: row.get(4)?,
        discount_percent: row.get(5)?,
        discount_amount: row.get(6)?,
        total_amount: row.get(7)?,
        deposit_amount: row.get(8)?,
        status: InvoiceStatus::parse(&status_str)
            .ok_or_else(|| AppError::Validation(format!("unknown invoice status {status_str}")))?,
        payment_method: PaymentMethod::parse(&method_str)
            .ok_or_else(|| AppError::Validation(format!("unknown payment method {method_str}")))?,
        refunds: serde_json::from_str(&refunds)?,
        history: serde_json::from_str(&history)?,
        note: row.get(13)?,
        created_at: parse_stored(&created_at)?,
        updated_at: parse_stored(&updated_at)?,
        version: row.get(16)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;

    fn setup_db() -> Connection {
        db::init_db(":memory:").unwrap()
    }

    fn dt(s: &str) -> NaiveDateTime {
        NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M").unwrap()
    }

    fn reservation(id: &str, start: &str, end: &str) -> CourtReservation {
        let now = dt("2025-06-01 09:00");
        CourtReservation {
            id: id.to_string(),
            code: format!("BK-B1-20250616-{id}"),
            court_id: "B1".to_string(),
            customer_id: "walk-in".to_string(),
            status: BookingStatus::Held,
            slots: vec![TimeSlot {
                start: dt(start),
                end: dt(end),
            }],
            expires_at: Some(dt("2025-06-01 09:15")),
            created_at: now,
            updated_at: now,
            version: 0,
        }
    }

    #[test]
    fn test_seeded_catalog_lookup() {
        let conn = setup_db();
        let court = get_court(&conn, "B1").unwrap().unwrap();
        assert_eq!(court.price_per_hour, 50000);
        let court_type = get_court_type(&conn, &court.court_type_id).unwrap().unwrap();
        assert_eq!(court_type.slot_minutes, 60);
        let service = get_service(&conn, "racket").unwrap().unwrap();
        assert_eq!(service.unit, ServiceUnit::Use);
        assert!(get_customer(&conn, "nobody").unwrap().is_none());
    }

    #[test]
    fn test_save_and_get_reservation() {
        let conn = setup_db();
        let saved = save_reservation(&conn, &reservation("r1", "2025-06-16 10:00", "2025-06-16 11:00"))
            .unwrap();
        assert_eq!(saved.version, 1);

        let loaded = get_reservation(&conn, "r1").unwrap().unwrap();
        assert_eq!(loaded, saved);
    }

    #[test]
    fn test_stale_version_is_a_write_conflict() {
        let conn = setup_db();
        let saved = save_reservation(&conn, &reservation("r1", "2025-06-16 10:00", "2025-06-16 11:00"))
            .unwrap();

        let mut first = saved.clone();
        first.status = BookingStatus::Booked;
        save_reservation(&conn, &first).unwrap();

        let mut stale = saved;
        stale.status = BookingStatus::Cancelled;
        let err = save_reservation(&conn, &stale).unwrap_err();
        assert!(matches!(err, AppError::WriteConflict));
    }

    #[test]
    fn test_list_reservations_filters_range_and_cancelled() {
        let conn = setup_db();
        save_reservation(&conn, &reservation("r1", "2025-06-16 10:00", "2025-06-16 11:00")).unwrap();
        save_reservation(&conn, &reservation("r2", "2025-06-17 10:00", "2025-06-17 11:00")).unwrap();
        let mut cancelled = reservation("r3", "2025-06-16 12:00", "2025-06-16 13:00");
        cancelled.status = BookingStatus::Cancelled;
        save_reservation(&conn, &cancelled).unwrap();

        let found =
            list_reservations(&conn, "B1", &dt("2025-06-16 00:00"), &dt("2025-06-17 00:00")).unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, "r1");
        assert_eq!(found[0].slots.len(), 1);
    }

    #[test]
    fn test_list_expired_holds() {
        let conn = setup_db();
        save_reservation(&conn, &reservation("r1", "2025-06-16 10:00", "2025-06-16 11:00")).unwrap();

        assert!(list_expired_holds(&conn, &dt("2025-06-01 09:10")).unwrap().is_empty());
        let expired = list_expired_holds(&conn, &dt("2025-06-01 09:15")).unwrap();
        assert_eq!(expired, vec![("r1".to_string(), "B1".to_string())]);
    }
}
