use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::Json;
use chrono::FixedOffset;
use serde::Deserialize;

use crate::errors::AppResult;
use crate::models::time::parse_datetime;
use crate::models::{Action, CourtReservation, TimeSlot};
use crate::services::booking::{EditRequest, HoldRequest};
use crate::state::AppState;

use super::{authorize, blocking, ensure_owner};

/// A slot as sent by clients. Both ends go through the boundary parser, so
/// `YYYY-MM-DD HH:mm`, ISO and RFC 3339 forms are all accepted.
#[derive(Deserialize)]
pub struct SlotInput {
    pub start: String,
    pub end: String,
}

fn parse_slots(slots: &[SlotInput], offset: &FixedOffset) -> AppResult<Vec<TimeSlot>> {
    slots
        .iter()
        .map(|s| {
            TimeSlot::new(
                parse_datetime(&s.start, offset)?,
                parse_datetime(&s.end, offset)?,
            )
        })
        .collect()
}

// POST /api/bookings
#[derive(Deserialize)]
pub struct HoldBody {
    pub court_id: String,
    pub customer_id: String,
    pub slots: Vec<SlotInput>,
}

pub async fn hold_booking(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(body): Json<HoldBody>,
) -> AppResult<(StatusCode, Json<CourtReservation>)> {
    let principal = authorize(&headers, Action::HoldBooking)?;
    ensure_owner(&principal, &body.customer_id)?;

    let request = HoldRequest {
        slots: parse_slots(&body.slots, &state.config.facility_utc_offset)?,
        court_id: body.court_id,
        customer_id: body.customer_id,
    };
    let reservation = blocking(&state, move |s| s.bookings.hold(request, s.now())).await?;
    Ok((StatusCode::CREATED, Json(reservation)))
}

// GET /api/bookings/:id
pub async fn get_booking(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> AppResult<Json<CourtReservation>> {
    let principal = authorize(&headers, Action::ViewBooking)?;
    let reservation = blocking(&state, move |s| s.bookings.get(&id)).await?;
    ensure_owner(&principal, &reservation.customer_id)?;
    Ok(Json(reservation))
}

// PUT /api/bookings/:id
#[derive(Deserialize)]
pub struct EditBody {
    pub court_id: Option<String>,
    pub slots: Vec<SlotInput>,
}

pub async fn edit_booking(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Json(body): Json<EditBody>,
) -> AppResult<Json<CourtReservation>> {
    authorize(&headers, Action::EditBooking)?;
    let request = EditRequest {
        slots: parse_slots(&body.slots, &state.config.facility_utc_offset)?,
        court_id: body.court_id,
    };
    let reservation = blocking(&state, move |s| s.bookings.edit(&id, request, s.now())).await?;
    Ok(Json(reservation))
}

// POST /api/bookings/:id/confirm
pub async fn confirm_booking(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> AppResult<Json<CourtReservation>> {
    let principal = authorize(&headers, Action::ConfirmBooking)?;
    let reservation = blocking(&state, move |s| {
        ensure_owner(&principal, &s.bookings.get(&id)?.customer_id)?;
        s.bookings.confirm(&id, s.now())
    })
    .await?;
    Ok(Json(reservation))
}

// POST /api/bookings/:id/cancel
pub async fn cancel_booking(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> AppResult<Json<CourtReservation>> {
    let principal = authorize(&headers, Action::CancelBooking)?;
    let reservation =
        blocking(&state, move |s| s.bookings.cancel(&id, &principal.id, s.now())).await?;
    Ok(Json(reservation))
}
