use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::HeaderMap;
use axum::Json;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::errors::AppResult;
use crate::models::time::parse_date;
use crate::models::{Action, SlotAvailability};
use crate::state::AppState;

use super::{authorize, blocking};

// GET /api/courts/:court_id/availability?date=YYYY-MM-DD
#[derive(Deserialize)]
pub struct AvailabilityQuery {
    pub date: String,
}

#[derive(Serialize)]
pub struct AvailabilityResponse {
    court_id: String,
    date: NaiveDate,
    slots: Vec<SlotAvailability>,
}

pub async fn court_availability(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(court_id): Path<String>,
    Query(query): Query<AvailabilityQuery>,
) -> AppResult<Json<AvailabilityResponse>> {
    authorize(&headers, Action::ViewAvailability)?;
    let date = parse_date(&query.date)?;
    let id = court_id.clone();
    let slots = blocking(&state, move |s| s.bookings.availability(&id, date)).await?;

    Ok(Json(AvailabilityResponse {
        court_id,
        date,
        slots,
    }))
}
