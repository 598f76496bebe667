use axum::{
    extract::{Path, Query, State},
    http::HeaderMap,
    Json,
};
use serde_json::{json, Value};
use uuid::Uuid;

use crate::{
    auth::{require_operator, require_user, Role},
    error::{AppError, AppResult},
    models::Invoice,
    schemas::{
        clamp_limit_in_range, validate_input, CreateInvoiceBatchInput, DraftPeriodQuery,
        InvoicesQuery,
    },
    services::{invoicing, reconciler},
    state::AppState,
};

pub fn router() -> axum::Router<AppState> {
    axum::Router::new()
        .route("/invoices", axum::routing::get(list_invoices))
        .route("/invoices/drafts", axum::routing::get(get_draft_lines))
        .route("/invoices/batch", axum::routing::post(create_invoice_batch))
        .route("/invoices/{invoice_id}", axum::routing::get(get_invoice))
        .route(
            "/invoices/{invoice_id}/mark-paid",
            axum::routing::post(mark_invoice_paid),
        )
}

#[derive(Debug, serde::Deserialize)]
struct InvoicePath {
    invoice_id: Uuid,
}

/// Billing batch preparation: one editable draft line per rented rental,
/// old index pre-filled from meter history, fee defaults from the current
/// settings snapshot.
async fn get_draft_lines(
    State(state): State<AppState>,
    Query(query): Query<DraftPeriodQuery>,
    headers: HeaderMap,
) -> AppResult<Json<Value>> {
    require_operator(&state, &headers)?;
    validate_input(&query)?;

    let settings = invoicing::load_or_init_settings(
        &state.db_pool,
        state.config.default_common_fee,
        state.config.default_cleaning_fee,
        state.config.default_electricity_price,
    )
    .await?;

    let drafts = invoicing::prepare_drafts(&state.db_pool, &settings).await?;

    Ok(Json(json!({
        "month": query.month,
        "year": query.year,
        "settings": settings,
        "lines": drafts,
    })))
}

/// Create invoices from edited draft lines. One invalid line is skipped,
/// not fatal to the batch; the response reports the count actually created.
async fn create_invoice_batch(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<CreateInvoiceBatchInput>,
) -> AppResult<Json<Value>> {
    require_operator(&state, &headers)?;
    validate_input(&payload)?;

    let report = invoicing::create_invoice_batch(
        &state.db_pool,
        &payload.lines,
        payload.month,
        payload.year,
    )
    .await;

    Ok(Json(json!({
        "created": report.created,
        "skipped": report.skipped,
    })))
}

/// Operators see every invoice; residents only their own.
async fn list_invoices(
    State(state): State<AppState>,
    Query(query): Query<InvoicesQuery>,
    headers: HeaderMap,
) -> AppResult<Json<Value>> {
    let user = require_user(&state, &headers)?;
    let limit = clamp_limit_in_range(query.limit, 1, 500);

    let resident_filter = match user.role {
        Role::Operator => None,
        Role::Resident => Some(user.user_id),
    };

    let rows: Vec<Invoice> = sqlx::query_as(
        "SELECT * FROM invoices
         WHERE ($1::uuid IS NULL OR resident_id = $1)
           AND ($2::uuid IS NULL OR rental_id = $2)
           AND ($3::invoice_status IS NULL OR status = $3::invoice_status)
         ORDER BY created_at DESC
         LIMIT $4",
    )
    .bind(resident_filter)
    .bind(query.rental_id)
    .bind(
        query
            .status
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty()),
    )
    .bind(limit)
    .fetch_all(&state.db_pool)
    .await
    .map_err(|e| match e {
        sqlx::Error::Database(db) if db.code().as_deref() == Some("22P02") => {
            AppError::BadRequest("Unknown invoice status filter.".to_string())
        }
        other => AppError::from(other),
    })?;

    Ok(Json(json!({ "data": rows })))
}

async fn get_invoice(
    State(state): State<AppState>,
    Path(path): Path<InvoicePath>,
    headers: HeaderMap,
) -> AppResult<Json<Invoice>> {
    let user = require_user(&state, &headers)?;

    let invoice: Invoice = sqlx::query_as("SELECT * FROM invoices WHERE id = $1")
        .bind(path.invoice_id)
        .fetch_optional(&state.db_pool)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Invoice {} not found.", path.invoice_id)))?;

    if user.role != Role::Operator && invoice.resident_id != user.user_id {
        return Err(AppError::Forbidden(
            "You may only view your own invoices.".to_string(),
        ));
    }
    Ok(Json(invoice))
}

/// Manual settlement for cash payments. Same idempotent transition as the
/// gateway path; marking twice is a safe no-op.
async fn mark_invoice_paid(
    State(state): State<AppState>,
    Path(path): Path<InvoicePath>,
    headers: HeaderMap,
) -> AppResult<Json<Value>> {
    require_operator(&state, &headers)?;

    let applied = reconciler::settle_invoice(&state, path.invoice_id).await?;

    let invoice: Invoice = sqlx::query_as("SELECT * FROM invoices WHERE id = $1")
        .bind(path.invoice_id)
        .fetch_one(&state.db_pool)
        .await?;

    Ok(Json(json!({ "applied": applied, "invoice": invoice })))
}
