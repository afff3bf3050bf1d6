use std::sync::Arc;

use chrono::NaiveDateTime;
use rusqlite::{Connection, Transaction};
use serde::Deserialize;

use crate::db::{queries, Store};
use crate::errors::{AppError, AppResult};
use crate::models::{
    BookingStatus, CourtReservation, Invoice, InvoicePatch, InvoiceStatus, LineItem, LineItemKind,
    PaymentMethod, RefundReasonType, RefundRecord, ServiceUnit,
};
use crate::services::booking::{cancel_in, mark_paid_in, BookingManager};
use crate::services::locks::{invoice_key, KeyedLocks};
use crate::services::pricing::{self, DepositPolicy, DiscountPolicy, ServiceCharge};

#[derive(Debug, Clone, Deserialize)]
pub struct ServiceItemRequest {
    pub service_id: String,
    pub quantity: u32,
    /// Hourly services default to the booking's length when omitted.
    pub duration_minutes: Option<i64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateInvoiceRequest {
    pub booking_id: Option<String>,
    /// Required for service-only invoices.
    pub customer_id: Option<String>,
    #[serde(default)]
    pub services: Vec<ServiceItemRequest>,
    pub discount_percent: Option<u32>,
    pub payment_method: PaymentMethod,
    /// Settled on the spot, e.g. card payment at the desk.
    #[serde(default)]
    pub settle_now: bool,
    pub note: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RefundRequest {
    pub amount: i64,
    pub reason: String,
    pub reason_type: RefundReasonType,
}

/// Billing state machine. Every mutation holds the invoice's lock and, when
/// the invoice bills a booking, that booking's court lock, in that order.
pub struct InvoiceManager {
    store: Store,
    locks: Arc<KeyedLocks>,
    bookings: Arc<BookingManager>,
    deposits: DepositPolicy,
    discounts: DiscountPolicy,
}

impl InvoiceManager {
    pub fn new(
        store: Store,
        locks: Arc<KeyedLocks>,
        bookings: Arc<BookingManager>,
        deposits: DepositPolicy,
        discounts: DiscountPolicy,
    ) -> AppResult<Self> {
        deposits.validate()?;
        Ok(Self {
            store,
            locks,
            bookings,
            deposits,
            discounts,
        })
    }

    pub fn get(&self, id: &str) -> AppResult<Invoice> {
        self.store.read(|conn| load(conn, id))
    }

    pub fn create(
        &self,
        request: CreateInvoiceRequest,
        actor: &str,
        now: NaiveDateTime,
    ) -> AppResult<Invoice> {
        let discount_percent = self.discounts.validate(request.discount_percent.unwrap_or(0))?;
        if let Some(item) = request
            .services
            .iter()
            .find(|s| !(1..=pricing::MAX_SERVICE_QUANTITY).contains(&s.quantity))
        {
            return Err(AppError::Validation(format!(
                "quantity of {} must be between 1 and {}",
                item.service_id,
                pricing::MAX_SERVICE_QUANTITY
            )));
        }

        let invoice = match request.booking_id.as_deref() {
            Some(booking_id) => self.bookings.with_reservation(booking_id, None, |tx, reservation| {
                self.create_for_booking(tx, &request, discount_percent, reservation, actor, now)
            })?,
            None => self.store.atomically(|tx| {
                self.create_service_only(tx, &request, discount_percent, actor, now)
            })?,
        };

        tracing::info!(
            invoice_id = %invoice.id,
            booking_id = ?invoice.booking_id,
            total = invoice.total_amount,
            deposit = invoice.deposit_amount,
            status = %invoice.status,
            "invoice created"
        );
        Ok(invoice)
    }

    fn create_for_booking(
        &self,
        tx: &Transaction<'_>,
        request: &CreateInvoiceRequest,
        discount_percent: u32,
        reservation: CourtReservation,
        actor: &str,
        now: NaiveDateTime,
    ) -> AppResult<Invoice> {
        if !reservation.is_active() {
            return Err(AppError::transition("booking", reservation.status, "be invoiced"));
        }
        if reservation.status == BookingStatus::Held
            && reservation.expires_at.is_some_and(|expires| expires <= now)
        {
            return Err(AppError::transition("booking", "its hold has expired", "be invoiced"));
        }
        if let Some(customer_id) = request.customer_id.as_deref() {
            if customer_id != reservation.customer_id {
                return Err(AppError::Validation(format!(
                    "booking {} belongs to another customer",
                    reservation.id
                )));
            }
        }
        if let Some(existing) = queries::find_active_invoice_for_booking(tx, &reservation.id)? {
            return Err(AppError::Validation(format!(
                "booking {} is already billed by invoice {}",
                reservation.id, existing.id
            )));
        }

        let court = queries::get_court(tx, &reservation.court_id)?
            .ok_or_else(|| AppError::NotFound(format!("court {}", reservation.court_id)))?;
        let court_fee = pricing::court_fee(court.price_per_hour, &reservation.slots)?;

        let mut line_items = vec![LineItem {
            kind: LineItemKind::CourtFee,
            description: format!("{} ({})", court.name, reservation.code),
            service_id: None,
            unit: None,
            unit_price: court.price_per_hour,
            quantity: reservation.slots.len() as u32,
            duration_minutes: Some(reservation.total_minutes()),
            amount: court_fee,
        }];
        line_items.extend(service_lines(tx, &request.services, Some(reservation.total_minutes()))?);

        let minutes_until_start = reservation
            .first_start()
            .map(|start| (start - now).num_minutes())
            .unwrap_or(0);
        let deposit_amount =
            self.deposits
                .deposit_for(court_fee, request.payment_method, minutes_until_start);

        let mut invoice = new_invoice(
            Some(reservation.id.clone()),
            reservation.customer_id.clone(),
            line_items,
            discount_percent,
            deposit_amount,
            request,
            now,
        )?;

        if request.settle_now {
            invoice.record_transition(InvoiceStatus::Paid, actor, None, now);
            mark_paid_in(tx, reservation, now)?;
        }

        invoice.validate()?;
        queries::save_invoice(tx, &invoice)
    }

    fn create_service_only(
        &self,
        tx: &Transaction<'_>,
        request: &CreateInvoiceRequest,
        discount_percent: u32,
        actor: &str,
        now: NaiveDateTime,
    ) -> AppResult<Invoice> {
        let customer_id = request.customer_id.clone().ok_or_else(|| {
            AppError::Validation("a service-only invoice needs a customer".into())
        })?;
        if queries::get_customer(tx, &customer_id)?.is_none() {
            return Err(AppError::NotFound(format!("customer {customer_id}")));
        }
        if request.services.is_empty() {
            return Err(AppError::Validation(
                "an invoice without a booking needs at least one service".into(),
            ));
        }

        let line_items = service_lines(tx, &request.services, None)?;
        let mut invoice =
            new_invoice(None, customer_id, line_items, discount_percent, 0, request, now)?;
        if request.settle_now {
            invoice.record_transition(InvoiceStatus::Paid, actor, None, now);
        }

        invoice.validate()?;
        queries::save_invoice(tx, &invoice)
    }

    pub fn mark_paid(
        &self,
        id: &str,
        method: Option<PaymentMethod>,
        actor: &str,
        now: NaiveDateTime,
    ) -> AppResult<Invoice> {
        let invoice = self.with_invoice(id, |tx, mut invoice, reservation| {
            if invoice.status != InvoiceStatus::Unpaid {
                return Err(AppError::transition("invoice", invoice.status, "be paid"));
            }
            if let Some(method) = method {
                invoice.payment_method = method;
            }
            invoice.record_transition(InvoiceStatus::Paid, actor, None, now);
            if let Some(reservation) = reservation {
                mark_paid_in(tx, reservation, now)?;
            }
            invoice.validate()?;
            queries::save_invoice(tx, &invoice)
        })?;

        tracing::info!(invoice_id = %invoice.id, actor, "invoice paid");
        Ok(invoice)
    }

    /// Cancels an unpaid invoice and the booking it bills.
    pub fn cancel(&self, id: &str, reason: &str, actor: &str, now: NaiveDateTime) -> AppResult<Invoice> {
        let invoice = self.with_invoice(id, |tx, mut invoice, reservation| {
            if invoice.status != InvoiceStatus::Unpaid {
                return Err(AppError::transition("invoice", invoice.status, "be cancelled"));
            }
            invoice.record_transition(InvoiceStatus::Cancelled, actor, Some(reason.to_string()), now);
            if let Some(reservation) = reservation {
                cancel_in(tx, reservation, now)?;
            }
            invoice.validate()?;
            queries::save_invoice(tx, &invoice)
        })?;

        tracing::info!(invoice_id = %invoice.id, actor, reason, "invoice cancelled");
        Ok(invoice)
    }

    pub fn refund(
        &self,
        id: &str,
        request: RefundRequest,
        actor: &str,
        now: NaiveDateTime,
    ) -> AppResult<Invoice> {
        let invoice = self.with_invoice(id, |tx, mut invoice, _reservation| {
            if !invoice.status.is_refundable() {
                return Err(AppError::transition("invoice", invoice.status, "refund"));
            }
            let remaining = invoice.refundable_balance();
            if request.amount <= 0 {
                return Err(AppError::Validation("refund amount must be positive".into()));
            }
            if request.amount > remaining {
                tracing::warn!(invoice_id = %invoice.id, amount = request.amount, remaining, "refund rejected");
                return Err(AppError::Validation(format!(
                    "refund of {} exceeds remaining balance {remaining}",
                    request.amount
                )));
            }

            invoice.refunds.push(RefundRecord {
                id: uuid::Uuid::new_v4().to_string(),
                amount: request.amount,
                reason: request.reason.clone(),
                reason_type: request.reason_type,
                actor: actor.to_string(),
                created_at: now,
            });
            let status = invoice.settled_status();
            if status != invoice.status {
                invoice.record_transition(status, actor, Some(request.reason.clone()), now);
            } else {
                invoice.updated_at = now;
            }

            invoice.validate()?;
            queries::save_invoice(tx, &invoice)
        })?;

        tracing::info!(
            invoice_id = %invoice.id,
            amount = request.amount,
            refunded = invoice.refunded_amount(),
            status = %invoice.status,
            actor,
            "refund recorded"
        );
        Ok(invoice)
    }

    /// Administrative correction. Status changes follow the same rules as
    /// `mark_paid` and `cancel`; refund states are derived and cannot be set.
    pub fn adjust(
        &self,
        id: &str,
        patch: InvoicePatch,
        actor: &str,
        now: NaiveDateTime,
    ) -> AppResult<Invoice> {
        let invoice = self.with_invoice(id, |tx, mut invoice, reservation| {
            let unpaid = invoice.status == InvoiceStatus::Unpaid;

            if let Some(percent) = patch.discount_percent {
                if percent != invoice.discount_percent {
                    if !unpaid {
                        return Err(AppError::transition("invoice", invoice.status, "change its discount"));
                    }
                    invoice.discount_percent = self.discounts.validate(percent)?;
                    invoice.discount_amount = pricing::discount(invoice.subtotal, percent);
                    invoice.total_amount = invoice.subtotal - invoice.discount_amount;
                }
            }

            if let Some(method) = patch.payment_method {
                if method != invoice.payment_method {
                    if !unpaid {
                        return Err(AppError::transition(
                            "invoice",
                            invoice.status,
                            "change its payment method",
                        ));
                    }
                    invoice.payment_method = method;
                    invoice.deposit_amount = self.deposit_for(&invoice, reservation.as_ref(), now);
                }
            }

            if let Some(note) = patch.note.clone() {
                invoice.note = Some(note);
            }

            match patch.status {
                Some(to) if to != invoice.status => match (invoice.status, to) {
                    (InvoiceStatus::Unpaid, InvoiceStatus::Paid) => {
                        invoice.record_transition(to, actor, patch.note.clone(), now);
                        if let Some(reservation) = reservation {
                            mark_paid_in(tx, reservation, now)?;
                        }
                    }
                    (InvoiceStatus::Unpaid, InvoiceStatus::Cancelled) => {
                        invoice.record_transition(to, actor, patch.note.clone(), now);
                        if let Some(reservation) = reservation {
                            cancel_in(tx, reservation, now)?;
                        }
                    }
                    (from, _) => {
                        return Err(AppError::transition("invoice", from, "change to that status"));
                    }
                },
                _ => {}
            }

            invoice.updated_at = now;
            invoice.validate()?;
            queries::save_invoice(tx, &invoice)
        })?;

        tracing::info!(invoice_id = %invoice.id, actor, status = %invoice.status, "invoice adjusted");
        Ok(invoice)
    }

    fn deposit_for(
        &self,
        invoice: &Invoice,
        reservation: Option<&CourtReservation>,
        now: NaiveDateTime,
    ) -> i64 {
        let Some(start) = reservation.and_then(CourtReservation::first_start) else {
            return 0;
        };
        let court_fee: i64 = invoice
            .line_items
            .iter()
            .filter(|l| l.kind == LineItemKind::CourtFee)
            .map(|l| l.amount)
            .sum();
        self.deposits
            .deposit_for(court_fee, invoice.payment_method, (start - now).num_minutes())
    }

    /// Loads the invoice and, when it bills a booking, that booking, then runs
    /// `op` in one transaction under the invoice lock and the court lock.
    fn with_invoice<T, F>(&self, id: &str, mut op: F) -> AppResult<T>
    where
        F: FnMut(&Transaction<'_>, Invoice, Option<CourtReservation>) -> AppResult<T>,
    {
        let locks = self.locks.set(&[invoice_key(id).as_str()]);
        let _held = locks.acquire();

        match self.get(id)?.booking_id {
            Some(booking_id) => self.bookings.with_reservation(&booking_id, None, |tx, reservation| {
                let invoice = load(tx, id)?;
                op(tx, invoice, Some(reservation))
            }),
            None => self.store.atomically(|tx| {
                let invoice = load(tx, id)?;
                op(tx, invoice, None)
            }),
        }
    }
}

fn load(conn: &Connection, id: &str) -> AppResult<Invoice> {
    queries::get_invoice(conn, id)?.ok_or_else(|| AppError::NotFound(format!("invoice {id}")))
}

fn service_lines(
    conn: &Connection,
    items: &[ServiceItemRequest],
    booking_minutes: Option<i64>,
) -> AppResult<Vec<LineItem>> {
    items
        .iter()
        .map(|item| {
            let service = queries::get_service(conn, &item.service_id)?
                .ok_or_else(|| AppError::NotFound(format!("service {}", item.service_id)))?;

            let duration_minutes = match service.unit {
                ServiceUnit::Hour => {
                    let minutes = item.duration_minutes.or(booking_minutes).ok_or_else(|| {
                        AppError::Validation(format!("hourly service {} needs a duration", service.id))
                    })?;
                    if !(1..=pricing::MAX_SERVICE_MINUTES).contains(&minutes) {
                        return Err(AppError::Validation(format!(
                            "duration for {} must be between 1 and {} minutes",
                            service.id,
                            pricing::MAX_SERVICE_MINUTES
                        )));
                    }
                    Some(minutes)
                }
                ServiceUnit::Use | ServiceUnit::Free => None,
            };

            let charge = ServiceCharge {
                unit: service.unit,
                price: service.price,
                quantity: item.quantity,
                duration_minutes: duration_minutes.unwrap_or(0),
            };
            Ok(LineItem {
                kind: LineItemKind::Service,
                description: service.name,
                service_id: Some(service.id),
                unit: Some(service.unit),
                unit_price: service.price,
                quantity: item.quantity,
                duration_minutes,
                amount: charge.amount()?,
            })
        })
        .collect()
}

fn new_invoice(
    booking_id: Option<String>,
    customer_id: String,
    line_items: Vec<LineItem>,
    discount_percent: u32,
    deposit_amount: i64,
    request: &CreateInvoiceRequest,
    now: NaiveDateTime,
) -> AppResult<Invoice> {
    let subtotal = pricing::total(line_items.iter().map(|l| l.amount))?;
    let discount_amount = pricing::discount(subtotal, discount_percent);

    Ok(Invoice {
        id: uuid::Uuid::new_v4().to_string(),
        booking_id,
        customer_id,
        line_items,
        subtotal,
        discount_percent,
        discount_amount,
        total_amount: subtotal - discount_amount,
        deposit_amount,
        status: InvoiceStatus::Unpaid,
        payment_method: request.payment_method,
        refunds: vec![],
        history: vec![],
        note: request.note.clone(),
        created_at: now,
        updated_at: now,
        version: 0,
    })
}

#[cfg(test)]
mod tests {
    use std::thread;

    use chrono::Duration;

    use super::*;
    use crate::config::AppConfig;
    use crate::models::{Customer, TimeSlot};
    use crate::services::booking::HoldRequest;

    fn dt(s: &str) -> NaiveDateTime {
        NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M").unwrap()
    }

    fn now() -> NaiveDateTime {
        dt("2025-06-16 08:00")
    }

    struct Fixture {
        bookings: Arc<BookingManager>,
        invoices: Arc<InvoiceManager>,
    }

    fn fixture_with(deposits: DepositPolicy) -> Fixture {
        let store = Store::open(":memory:").unwrap();
        store
            .atomically(|tx| {
                queries::insert_customer(
                    tx,
                    &Customer {
                        id: "alice".to_string(),
                        name: "Alice".to_string(),
                        phone: Some("+84900000000".to_string()),
                    },
                )
            })
            .unwrap();
        let locks = Arc::new(KeyedLocks::new());
        let bookings = Arc::new(
            BookingManager::new(store.clone(), Arc::clone(&locks), &AppConfig::default()).unwrap(),
        );
        let invoices = Arc::new(
            InvoiceManager::new(
                store,
                locks,
                Arc::clone(&bookings),
                deposits,
                DiscountPolicy::default(),
            )
            .unwrap(),
        );
        Fixture { bookings, invoices }
    }

    fn fixture() -> Fixture {
        fixture_with(DepositPolicy {
            ratio: 0.5,
            cancel_window_minutes: 30,
        })
    }

    /// Two one-hour slots on B1 (50,000 per hour) starting at `start_hour`.
    fn two_hour_booking(fx: &Fixture, start_hour: u32) -> CourtReservation {
        booking_held_at(fx, start_hour, now())
    }

    fn booking_held_at(fx: &Fixture, start_hour: u32, held_at: NaiveDateTime) -> CourtReservation {
        let at = |h: u32| dt(&format!("2025-06-16 {h:02}:00"));
        fx.bookings
            .hold(
                HoldRequest {
                    court_id: "B1".to_string(),
                    customer_id: "alice".to_string(),
                    slots: vec![
                        TimeSlot {
                            start: at(start_hour),
                            end: at(start_hour + 1),
                        },
                        TimeSlot {
                            start: at(start_hour + 1),
                            end: at(start_hour + 2),
                        },
                    ],
                },
                held_at,
            )
            .unwrap()
    }

    fn request(booking_id: Option<&str>, method: PaymentMethod) -> CreateInvoiceRequest {
        CreateInvoiceRequest {
            booking_id: booking_id.map(str::to_string),
            customer_id: None,
            services: vec![],
            discount_percent: None,
            payment_method: method,
            settle_now: false,
            note: None,
        }
    }

    fn refund(amount: i64) -> RefundRequest {
        RefundRequest {
            amount,
            reason: "court flooded".to_string(),
            reason_type: RefundReasonType::FacilityIssue,
        }
    }

    #[test]
    fn test_create_invoice_totals() {
        let fx = fixture();
        let booking = two_hour_booking(&fx, 10);
        let mut req = request(Some(&booking.id), PaymentMethod::Card);
        req.services = vec![ServiceItemRequest {
            service_id: "racket".to_string(),
            quantity: 2,
            duration_minutes: None,
        }];
        req.discount_percent = Some(10);

        let invoice = fx.invoices.create(req, "staff-1", now()).unwrap();
        assert_eq!(invoice.line_items.len(), 2);
        assert_eq!(invoice.line_items[0].amount, 100_000);
        assert_eq!(invoice.line_items[1].amount, 40_000);
        assert_eq!(invoice.subtotal, 140_000);
        assert_eq!(invoice.discount_amount, 14_000);
        assert_eq!(invoice.total_amount, 126_000);
        assert_eq!(invoice.status, InvoiceStatus::Unpaid);
        assert_eq!(invoice.deposit_amount, 0);
        assert_eq!(invoice.customer_id, "alice");
    }

    #[test]
    fn test_hourly_service_defaults_to_booking_length() {
        let fx = fixture();
        let booking = two_hour_booking(&fx, 10);
        let mut req = request(Some(&booking.id), PaymentMethod::Card);
        req.services = vec![ServiceItemRequest {
            service_id: "coach".to_string(),
            quantity: 1,
            duration_minutes: None,
        }];
        let invoice = fx.invoices.create(req, "staff-1", now()).unwrap();
        assert_eq!(invoice.line_items[1].amount, 300_000);
    }

    #[test]
    fn test_counter_deposit_depends_on_cancel_window() {
        let fx = fixture();
        // starts 45 minutes after creation: outside the 30 minute window
        let at = dt("2025-06-16 09:15");
        let booking = booking_held_at(&fx, 10, at);
        let invoice = fx
            .invoices
            .create(request(Some(&booking.id), PaymentMethod::Counter), "staff-1", at)
            .unwrap();
        assert_eq!(invoice.deposit_amount, 50_000);

        // starts 20 minutes after creation: inside the window
        let at = dt("2025-06-16 12:40");
        let late = booking_held_at(&fx, 13, at);
        let invoice = fx
            .invoices
            .create(request(Some(&late.id), PaymentMethod::Counter), "staff-1", at)
            .unwrap();
        assert_eq!(invoice.deposit_amount, 0);
    }

    #[test]
    fn test_lapsed_hold_cannot_be_invoiced() {
        let fx = fixture();
        let booking = two_hour_booking(&fx, 10);
        let err = fx
            .invoices
            .create(
                request(Some(&booking.id), PaymentMethod::Card),
                "staff-1",
                now() + Duration::minutes(20),
            )
            .unwrap_err();
        assert!(matches!(err, AppError::InvalidStateTransition { .. }));
    }

    #[test]
    fn test_oversized_service_lines_rejected() {
        let fx = fixture();
        let booking = two_hour_booking(&fx, 10);

        let mut req = request(Some(&booking.id), PaymentMethod::Card);
        req.services = vec![ServiceItemRequest {
            service_id: "coach".to_string(),
            quantity: u32::MAX,
            duration_minutes: Some(100_000),
        }];
        let err = fx.invoices.create(req, "staff-1", now()).unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));

        let mut req = request(Some(&booking.id), PaymentMethod::Card);
        req.services = vec![ServiceItemRequest {
            service_id: "coach".to_string(),
            quantity: 1,
            duration_minutes: Some(pricing::MAX_SERVICE_MINUTES + 1),
        }];
        let err = fx.invoices.create(req, "staff-1", now()).unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));

        // nothing was written, so the booking can still be invoiced
        fx.invoices
            .create(request(Some(&booking.id), PaymentMethod::Card), "staff-1", now())
            .unwrap();
    }

    #[test]
    fn test_discount_outside_tiers_rejected() {
        let fx = fixture();
        let booking = two_hour_booking(&fx, 10);
        let mut req = request(Some(&booking.id), PaymentMethod::Card);
        req.discount_percent = Some(15);
        let err = fx.invoices.create(req, "staff-1", now()).unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
    }

    #[test]
    fn test_second_invoice_for_booking_rejected() {
        let fx = fixture();
        let booking = two_hour_booking(&fx, 10);
        fx.invoices
            .create(request(Some(&booking.id), PaymentMethod::Card), "staff-1", now())
            .unwrap();
        let err = fx
            .invoices
            .create(request(Some(&booking.id), PaymentMethod::Card), "staff-1", now())
            .unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
    }

    #[test]
    fn test_invoice_for_missing_or_cancelled_booking() {
        let fx = fixture();
        let err = fx
            .invoices
            .create(request(Some("missing"), PaymentMethod::Card), "staff-1", now())
            .unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));

        let booking = two_hour_booking(&fx, 10);
        fx.bookings.cancel(&booking.id, "cashier-1", now()).unwrap();
        let err = fx
            .invoices
            .create(request(Some(&booking.id), PaymentMethod::Card), "staff-1", now())
            .unwrap_err();
        assert!(matches!(err, AppError::InvalidStateTransition { .. }));
    }

    #[test]
    fn test_settle_now_marks_booking_paid() {
        let fx = fixture();
        let booking = two_hour_booking(&fx, 10);
        let mut req = request(Some(&booking.id), PaymentMethod::Card);
        req.settle_now = true;
        let invoice = fx.invoices.create(req, "cashier-1", now()).unwrap();
        assert_eq!(invoice.status, InvoiceStatus::Paid);
        assert_eq!(invoice.history.len(), 1);
        assert_eq!(fx.bookings.get(&booking.id).unwrap().status, BookingStatus::Paid);
    }

    #[test]
    fn test_mark_paid_cascades_and_only_from_unpaid() {
        let fx = fixture();
        let booking = two_hour_booking(&fx, 10);
        fx.bookings.confirm(&booking.id, now()).unwrap();
        let invoice = fx
            .invoices
            .create(request(Some(&booking.id), PaymentMethod::Counter), "staff-1", now())
            .unwrap();

        let paid = fx
            .invoices
            .mark_paid(&invoice.id, Some(PaymentMethod::BankTransfer), "cashier-1", now())
            .unwrap();
        assert_eq!(paid.status, InvoiceStatus::Paid);
        assert_eq!(paid.payment_method, PaymentMethod::BankTransfer);
        assert_eq!(fx.bookings.get(&booking.id).unwrap().status, BookingStatus::Paid);

        let err = fx.invoices.mark_paid(&invoice.id, None, "cashier-1", now()).unwrap_err();
        assert!(matches!(err, AppError::InvalidStateTransition { .. }));
    }

    #[test]
    fn test_cancel_cascades_to_booking() {
        let fx = fixture();
        let booking = two_hour_booking(&fx, 10);
        let invoice = fx
            .invoices
            .create(request(Some(&booking.id), PaymentMethod::Card), "staff-1", now())
            .unwrap();

        let cancelled = fx
            .invoices
            .cancel(&invoice.id, "customer changed plans", "cashier-1", now())
            .unwrap();
        assert_eq!(cancelled.status, InvoiceStatus::Cancelled);
        assert_eq!(cancelled.history[0].reason.as_deref(), Some("customer changed plans"));
        assert_eq!(fx.bookings.get(&booking.id).unwrap().status, BookingStatus::Cancelled);

        let err = fx.invoices.cancel(&invoice.id, "again", "cashier-1", now()).unwrap_err();
        assert!(matches!(err, AppError::InvalidStateTransition { .. }));
    }

    #[test]
    fn test_cancel_paid_invoice_rejected_and_booking_untouched() {
        let fx = fixture();
        let booking = two_hour_booking(&fx, 10);
        let mut req = request(Some(&booking.id), PaymentMethod::Card);
        req.settle_now = true;
        let invoice = fx.invoices.create(req, "cashier-1", now()).unwrap();

        let err = fx.invoices.cancel(&invoice.id, "oops", "cashier-1", now()).unwrap_err();
        assert!(matches!(err, AppError::InvalidStateTransition { .. }));
        assert_eq!(fx.bookings.get(&booking.id).unwrap().status, BookingStatus::Paid);
        assert_eq!(fx.invoices.get(&invoice.id).unwrap(), invoice);
    }

    #[test]
    fn test_refund_scenario() {
        let fx = fixture();
        let booking = fx
            .bookings
            .hold(
                HoldRequest {
                    court_id: "B1".to_string(),
                    customer_id: "alice".to_string(),
                    slots: (0..4)
                        .map(|i| TimeSlot {
                            start: dt(&format!("2025-06-16 {:02}:00", 10 + i)),
                            end: dt(&format!("2025-06-16 {:02}:00", 11 + i)),
                        })
                        .collect(),
                },
                now(),
            )
            .unwrap();
        let mut req = request(Some(&booking.id), PaymentMethod::Card);
        req.settle_now = true;
        let invoice = fx.invoices.create(req, "cashier-1", now()).unwrap();
        assert_eq!(invoice.total_amount, 200_000);

        let err = fx.invoices.refund(&invoice.id, refund(250_000), "cashier-1", now()).unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));

        let refunded = fx.invoices.refund(&invoice.id, refund(200_000), "cashier-1", now()).unwrap();
        assert_eq!(refunded.status, InvoiceStatus::Refunded);
        assert_eq!(refunded.refunded_amount(), 200_000);

        let err = fx.invoices.refund(&invoice.id, refund(1), "cashier-1", now()).unwrap_err();
        assert!(matches!(err, AppError::InvalidStateTransition { .. }));
    }

    #[test]
    fn test_partial_refunds() {
        let fx = fixture();
        let booking = two_hour_booking(&fx, 10);
        let mut req = request(Some(&booking.id), PaymentMethod::Card);
        req.settle_now = true;
        let invoice = fx.invoices.create(req, "cashier-1", now()).unwrap();

        let partial = fx.invoices.refund(&invoice.id, refund(30_000), "cashier-1", now()).unwrap();
        assert_eq!(partial.status, InvoiceStatus::PartiallyRefunded);
        let partial = fx.invoices.refund(&invoice.id, refund(30_000), "cashier-1", now()).unwrap();
        assert_eq!(partial.status, InvoiceStatus::PartiallyRefunded);
        assert_eq!(partial.refunds.len(), 2);
        assert_eq!(partial.history.len(), 2);

        let err = fx.invoices.refund(&invoice.id, refund(40_001), "cashier-1", now()).unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
        let done = fx.invoices.refund(&invoice.id, refund(40_000), "cashier-1", now()).unwrap();
        assert_eq!(done.status, InvoiceStatus::Refunded);
    }

    #[test]
    fn test_refund_unpaid_or_non_positive_rejected() {
        let fx = fixture();
        let booking = two_hour_booking(&fx, 10);
        let invoice = fx
            .invoices
            .create(request(Some(&booking.id), PaymentMethod::Card), "staff-1", now())
            .unwrap();
        let err = fx.invoices.refund(&invoice.id, refund(1), "cashier-1", now()).unwrap_err();
        assert!(matches!(err, AppError::InvalidStateTransition { .. }));

        fx.invoices.mark_paid(&invoice.id, None, "cashier-1", now()).unwrap();
        let err = fx.invoices.refund(&invoice.id, refund(0), "cashier-1", now()).unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
    }

    #[test]
    fn test_concurrent_refunds_never_exceed_total() {
        let fx = fixture();
        let booking = two_hour_booking(&fx, 10);
        let mut req = request(Some(&booking.id), PaymentMethod::Card);
        req.settle_now = true;
        let invoice = fx.invoices.create(req, "cashier-1", now()).unwrap();

        let handles: Vec<_> = (0..6)
            .map(|_| {
                let invoices = Arc::clone(&fx.invoices);
                let id = invoice.id.clone();
                thread::spawn(move || invoices.refund(&id, refund(30_000), "cashier-1", now()))
            })
            .collect();
        let wins = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|r| r.is_ok())
            .count();

        assert_eq!(wins, 3);
        let settled = fx.invoices.get(&invoice.id).unwrap();
        assert_eq!(settled.refunded_amount(), 90_000);
        assert!(settled.refunded_amount() <= settled.total_amount);
        assert_eq!(settled.status, InvoiceStatus::PartiallyRefunded);
    }

    #[test]
    fn test_service_only_invoice() {
        let fx = fixture();
        let mut req = request(None, PaymentMethod::Card);
        req.customer_id = Some("alice".to_string());
        req.services = vec![
            ServiceItemRequest {
                service_id: "coach".to_string(),
                quantity: 1,
                duration_minutes: Some(30),
            },
            ServiceItemRequest {
                service_id: "shower".to_string(),
                quantity: 1,
                duration_minutes: None,
            },
        ];
        let invoice = fx.invoices.create(req, "staff-1", now()).unwrap();
        assert_eq!(invoice.booking_id, None);
        assert_eq!(invoice.total_amount, 75_000);

        let cancelled = fx.invoices.cancel(&invoice.id, "no show", "cashier-1", now()).unwrap();
        assert_eq!(cancelled.status, InvoiceStatus::Cancelled);
    }

    #[test]
    fn test_service_only_invoice_validation() {
        let fx = fixture();
        let err = fx
            .invoices
            .create(request(None, PaymentMethod::Card), "staff-1", now())
            .unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));

        let mut req = request(None, PaymentMethod::Card);
        req.customer_id = Some("alice".to_string());
        req.services = vec![ServiceItemRequest {
            service_id: "coach".to_string(),
            quantity: 1,
            duration_minutes: None,
        }];
        let err = fx.invoices.create(req, "staff-1", now()).unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
    }

    #[test]
    fn test_adjust_manual_payment_and_discount() {
        let fx = fixture();
        let booking = two_hour_booking(&fx, 10);
        let invoice = fx
            .invoices
            .create(request(Some(&booking.id), PaymentMethod::Counter), "staff-1", now())
            .unwrap();

        let adjusted = fx
            .invoices
            .adjust(
                &invoice.id,
                InvoicePatch {
                    discount_percent: Some(20),
                    payment_method: Some(PaymentMethod::Card),
                    ..InvoicePatch::default()
                },
                "cashier-1",
                now(),
            )
            .unwrap();
        assert_eq!(adjusted.total_amount, 80_000);
        assert_eq!(adjusted.deposit_amount, 0);
        assert_eq!(adjusted.status, InvoiceStatus::Unpaid);

        let paid = fx
            .invoices
            .adjust(
                &invoice.id,
                InvoicePatch {
                    status: Some(InvoiceStatus::Paid),
                    note: Some("paid cash at desk".to_string()),
                    ..InvoicePatch::default()
                },
                "cashier-1",
                now() + Duration::minutes(5),
            )
            .unwrap();
        assert_eq!(paid.status, InvoiceStatus::Paid);
        assert_eq!(paid.note.as_deref(), Some("paid cash at desk"));
        assert_eq!(fx.bookings.get(&booking.id).unwrap().status, BookingStatus::Paid);
    }

    #[test]
    fn test_adjust_cannot_bypass_transition_rules() {
        let fx = fixture();
        let booking = two_hour_booking(&fx, 10);
        let mut req = request(Some(&booking.id), PaymentMethod::Card);
        req.settle_now = true;
        let invoice = fx.invoices.create(req, "cashier-1", now()).unwrap();

        for patch in [
            InvoicePatch {
                status: Some(InvoiceStatus::Refunded),
                ..InvoicePatch::default()
            },
            InvoicePatch {
                status: Some(InvoiceStatus::Cancelled),
                ..InvoicePatch::default()
            },
            InvoicePatch {
                discount_percent: Some(10),
                ..InvoicePatch::default()
            },
        ] {
            let err = fx.invoices.adjust(&invoice.id, patch, "manager-1", now()).unwrap_err();
            assert!(matches!(err, AppError::InvalidStateTransition { .. }), "{err}");
        }
        assert_eq!(fx.invoices.get(&invoice.id).unwrap(), invoice);
    }

    #[test]
    fn test_missing_invoice() {
        let fx = fixture();
        let err = fx.invoices.mark_paid("nope", None, "cashier-1", now()).unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
    }
}
