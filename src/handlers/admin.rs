use std::sync::Arc;

use axum::extract::State;
use axum::http::HeaderMap;
use axum::Json;
use serde::Serialize;

use crate::errors::AppResult;
use crate::models::Action;
use crate::state::AppState;

use super::{authorize, blocking};

// POST /api/admin/holds/sweep
#[derive(Serialize)]
pub struct SweepResponse {
    released: usize,
}

pub async fn sweep_holds(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> AppResult<Json<SweepResponse>> {
    let principal = authorize(&headers, Action::SweepHolds)?;
    let released = blocking(&state, |s| s.bookings.expire_holds(s.now())).await?;
    tracing::info!(actor = %principal.id, released, "manual hold sweep");
    Ok(Json(SweepResponse { released }))
}
