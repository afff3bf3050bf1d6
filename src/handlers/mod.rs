pub mod admin;
pub mod availability;
pub mod bookings;
pub mod health;
pub mod invoices;

use std::sync::Arc;

use axum::http::HeaderMap;
use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::errors::{AppError, AppResult};
use crate::models::{can_perform, Action, Principal, Role};
use crate::state::AppState;

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health::health))
        .route(
            "/api/courts/:court_id/availability",
            get(availability::court_availability),
        )
        .route("/api/bookings", post(bookings::hold_booking))
        .route(
            "/api/bookings/:id",
            get(bookings::get_booking).put(bookings::edit_booking),
        )
        .route("/api/bookings/:id/confirm", post(bookings::confirm_booking))
        .route("/api/bookings/:id/cancel", post(bookings::cancel_booking))
        .route("/api/invoices", post(invoices::create_invoice))
        .route(
            "/api/invoices/:id",
            get(invoices::get_invoice).patch(invoices::adjust_invoice),
        )
        .route("/api/invoices/:id/pay", post(invoices::pay_invoice))
        .route("/api/invoices/:id/cancel", post(invoices::cancel_invoice))
        .route("/api/invoices/:id/refunds", post(invoices::refund_invoice))
        .route("/api/admin/holds/sweep", post(admin::sweep_holds))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Reads the caller from the `x-actor-id` / `x-actor-role` headers and checks
/// that their role may perform `action`.
fn authorize(headers: &HeaderMap, action: Action) -> AppResult<Principal> {
    let header = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
    };

    let id = header("x-actor-id").ok_or(AppError::Unauthorized)?;
    let role = header("x-actor-role")
        .and_then(Role::parse)
        .ok_or(AppError::Unauthorized)?;
    let principal = Principal {
        id: id.to_string(),
        role,
    };

    if !can_perform(action, &principal) {
        tracing::warn!(actor = %principal.id, ?role, ?action, "action not permitted");
        return Err(AppError::Forbidden(format!("{action:?} is not permitted for this role")));
    }
    Ok(principal)
}

/// Runs a manager call on the blocking pool. Store operations wait on keyed
/// locks and sleep between write retries.
async fn blocking<T, F>(state: &Arc<AppState>, op: F) -> AppResult<T>
where
    F: FnOnce(&AppState) -> AppResult<T> + Send + 'static,
    T: Send + 'static,
{
    let state = Arc::clone(state);
    tokio::task::spawn_blocking(move || op(&state))
        .await
        .map_err(|e| AppError::Internal(format!("request worker failed: {e}")))?
}

/// Customers may only act on their own bookings.
fn ensure_owner(principal: &Principal, customer_id: &str) -> AppResult<()> {
    if principal.role == Role::Customer && principal.id != customer_id {
        return Err(AppError::Forbidden("booking belongs to another customer".into()));
    }
    Ok(())
}
