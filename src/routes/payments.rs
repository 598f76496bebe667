use std::collections::HashMap;
use std::net::SocketAddr;

use axum::{
    extract::{ConnectInfo, Path, Query, State},
    http::HeaderMap,
    response::Redirect,
    Json,
};
use chrono::Utc;
use uuid::Uuid;

use crate::{
    auth::{require_user, Role},
    error::{AppError, AppResult},
    models::{Invoice, InvoiceStatus, RentalStatus},
    schemas::PaymentUrlResponse,
    services::{
        gateway::{self, PaymentTarget},
        reconciler, rental_lifecycle,
    },
    state::AppState,
};

pub fn router() -> axum::Router<AppState> {
    axum::Router::new()
        .route(
            "/payments/rentals/{rental_id}/url",
            axum::routing::post(create_rental_payment_url),
        )
        .route(
            "/payments/invoices/{invoice_id}/url",
            axum::routing::post(create_invoice_payment_url),
        )
        .route("/payments/callback", axum::routing::get(payment_callback))
}

#[derive(Debug, serde::Deserialize)]
struct RentalPath {
    rental_id: Uuid,
}

#[derive(Debug, serde::Deserialize)]
struct InvoicePath {
    invoice_id: Uuid,
}

/// Signed redirect URL for a contract payment. The rental must be signed
/// and not yet paid; amount is the frozen contract total.
async fn create_rental_payment_url(
    State(state): State<AppState>,
    Path(path): Path<RentalPath>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
) -> AppResult<Json<PaymentUrlResponse>> {
    let user = require_user(&state, &headers)?;
    let rental = rental_lifecycle::get_rental(&state.db_pool, path.rental_id).await?;

    if user.role != Role::Operator && rental.resident_id != user.user_id {
        return Err(AppError::Forbidden(
            "You may only pay for your own rental.".to_string(),
        ));
    }
    if !rental.contract_signed {
        return Err(AppError::InvalidState(
            "The contract must be signed before payment.".to_string(),
        ));
    }
    if rental.payment_done {
        return Err(AppError::InvalidState(
            "This contract has already been paid.".to_string(),
        ));
    }
    if !matches!(rental.status, RentalStatus::Approved | RentalStatus::Rented) {
        return Err(AppError::InvalidState(format!(
            "Rental in status {:?} is not payable.",
            rental.status
        )));
    }

    let url = gateway::build_payment_url(
        &state.config,
        PaymentTarget::Rental(rental.id),
        rental.total_price,
        &format!("Contract payment for rental {}", rental.id),
        &client_ip(&headers, addr),
        Utc::now(),
    )?;

    Ok(Json(PaymentUrlResponse { url }))
}

/// Signed redirect URL for an invoice payment; the reference is the
/// `INV-` prefixed invoice id.
async fn create_invoice_payment_url(
    State(state): State<AppState>,
    Path(path): Path<InvoicePath>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
) -> AppResult<Json<PaymentUrlResponse>> {
    let user = require_user(&state, &headers)?;

    let invoice: Invoice = sqlx::query_as("SELECT * FROM invoices WHERE id = $1")
        .bind(path.invoice_id)
        .fetch_optional(&state.db_pool)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Invoice {} not found.", path.invoice_id)))?;

    if user.role != Role::Operator && invoice.resident_id != user.user_id {
        return Err(AppError::Forbidden(
            "You may only pay your own invoices.".to_string(),
        ));
    }
    if invoice.status != InvoiceStatus::Unpaid {
        return Err(AppError::InvalidState(format!(
            "Invoice in status {:?} is not payable.",
            invoice.status
        )));
    }

    let url = gateway::build_payment_url(
        &state.config,
        PaymentTarget::Invoice(invoice.id),
        invoice.total_amount,
        &format!(
            "Utility invoice {}/{} for rental {}",
            invoice.month, invoice.year, invoice.rental_id
        ),
        &client_ip(&headers, addr),
        Utc::now(),
    )?;

    Ok(Json(PaymentUrlResponse { url }))
}

/// Gateway callback: unauthenticated GET protected only by its signature.
/// Always answers with a redirect to the client result page: the gateway
/// expects one regardless of outcome, and rejected callbacks must not leak
/// an error surface.
async fn payment_callback(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
) -> Redirect {
    let outcome = reconciler::handle_callback(&state, &params).await;

    Redirect::to(&format!(
        "{}?status={}",
        state.config.client_payment_result_url,
        outcome.as_query_value()
    ))
}

fn client_ip(headers: &HeaderMap, addr: SocketAddr) -> String {
    headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(ToOwned::to_owned)
        .unwrap_or_else(|| addr.ip().to_string())
}
