use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::Json;
use serde::Deserialize;

use crate::errors::AppResult;
use crate::models::{Action, Invoice, InvoicePatch, PaymentMethod};
use crate::services::invoice::{CreateInvoiceRequest, RefundRequest};
use crate::state::AppState;

use super::{authorize, blocking};

// POST /api/invoices
pub async fn create_invoice(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(request): Json<CreateInvoiceRequest>,
) -> AppResult<(StatusCode, Json<Invoice>)> {
    let principal = authorize(&headers, Action::CreateInvoice)?;
    let invoice =
        blocking(&state, move |s| s.invoices.create(request, &principal.id, s.now())).await?;
    Ok((StatusCode::CREATED, Json(invoice)))
}

// GET /api/invoices/:id
pub async fn get_invoice(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> AppResult<Json<Invoice>> {
    authorize(&headers, Action::ViewInvoice)?;
    let invoice = blocking(&state, move |s| s.invoices.get(&id)).await?;
    Ok(Json(invoice))
}

// POST /api/invoices/:id/pay
#[derive(Deserialize, Default)]
pub struct PayRequest {
    pub payment_method: Option<PaymentMethod>,
}

pub async fn pay_invoice(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
    body: Option<Json<PayRequest>>,
) -> AppResult<Json<Invoice>> {
    let principal = authorize(&headers, Action::MarkInvoicePaid)?;
    let Json(request) = body.unwrap_or_default();
    let invoice = blocking(&state, move |s| {
        s.invoices
            .mark_paid(&id, request.payment_method, &principal.id, s.now())
    })
    .await?;
    Ok(Json(invoice))
}

// POST /api/invoices/:id/cancel
#[derive(Deserialize)]
pub struct CancelRequest {
    pub reason: String,
}

pub async fn cancel_invoice(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Json(request): Json<CancelRequest>,
) -> AppResult<Json<Invoice>> {
    let principal = authorize(&headers, Action::CancelInvoice)?;
    let invoice = blocking(&state, move |s| {
        s.invoices
            .cancel(&id, &request.reason, &principal.id, s.now())
    })
    .await?;
    Ok(Json(invoice))
}

// POST /api/invoices/:id/refunds
pub async fn refund_invoice(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Json(request): Json<RefundRequest>,
) -> AppResult<Json<Invoice>> {
    let principal = authorize(&headers, Action::RefundInvoice)?;
    let invoice =
        blocking(&state, move |s| s.invoices.refund(&id, request, &principal.id, s.now())).await?;
    Ok(Json(invoice))
}

// PATCH /api/invoices/:id
pub async fn adjust_invoice(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Json(patch): Json<InvoicePatch>,
) -> AppResult<Json<Invoice>> {
    let principal = authorize(&headers, Action::AdjustInvoice)?;
    let invoice =
        blocking(&state, move |s| s.invoices.adjust(&id, patch, &principal.id, s.now())).await?;
    Ok(Json(invoice))
}
