use std::collections::HashMap;

use chrono::Utc;
use sqlx::PgPool;
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::models::{Invoice, InvoiceStatus};
use crate::services::gateway::{self, PaymentTarget};
use crate::services::notifications::{self, NotificationKind};
use crate::services::rental_lifecycle;
use crate::state::AppState;

/// Where the callback handler sends the payer's browser. The gateway
/// expects an HTTP redirect for every outcome, including rejected ones.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RedirectOutcome {
    /// Contract payment applied (or already applied).
    Success,
    /// Invoice payment applied (or already applied).
    InvoiceSuccess,
    /// Valid signature, but the gateway reported a failed payment.
    Failed,
    /// Signature verification failed; nothing was touched.
    Invalid,
    /// Valid, successful callback referencing an unknown or unpayable entity.
    Error,
}

impl RedirectOutcome {
    pub fn as_query_value(self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::InvoiceSuccess => "invoice_success",
            Self::Failed => "failed",
            Self::Invalid => "invalid",
            Self::Error => "error",
        }
    }
}

/// Apply one gateway callback to the entity it references, exactly once.
///
/// Duplicate deliveries of the same successful callback are expected
/// (gateway retries); the conditional updates underneath make the second
/// application a no-op, and notifications are only dispatched when a
/// transition actually applied.
pub async fn handle_callback(
    state: &AppState,
    params: &HashMap<String, String>,
) -> RedirectOutcome {
    let callback = match gateway::verify_callback(&state.config.gateway_hash_secret, params) {
        Ok(callback) => callback,
        Err(e) => {
            tracing::warn!(error = %e, "Rejected payment callback");
            return RedirectOutcome::Invalid;
        }
    };

    if !callback.is_success() {
        tracing::info!(
            reference = %callback.raw_reference,
            response_code = %callback.response_code,
            "Gateway reported a failed payment"
        );
        return RedirectOutcome::Failed;
    }

    let Some(target) = callback.target else {
        tracing::warn!(
            reference = %callback.raw_reference,
            "Successful callback carries an unparseable reference"
        );
        return RedirectOutcome::Error;
    };

    match target {
        PaymentTarget::Invoice(invoice_id) => match settle_invoice(state, invoice_id).await {
            Ok(_) => RedirectOutcome::InvoiceSuccess,
            Err(e) => {
                tracing::warn!(invoice_id = %invoice_id, error = %e, "Invoice callback not applied");
                RedirectOutcome::Error
            }
        },
        PaymentTarget::Rental(rental_id) => match settle_rental(state, rental_id).await {
            Ok(_) => RedirectOutcome::Success,
            Err(e) => {
                tracing::warn!(rental_id = %rental_id, error = %e, "Rental callback not applied");
                RedirectOutcome::Error
            }
        },
    }
}

/// Mark an invoice paid. Returns whether the transition applied now;
/// an already-paid invoice is a benign `Ok(false)` and is not re-notified.
/// A cancelled invoice is not payable.
pub async fn settle_invoice(state: &AppState, invoice_id: Uuid) -> AppResult<bool> {
    let pool = &state.db_pool;

    let applied = sqlx::query(
        "UPDATE invoices
         SET status = 'paid', payment_date = $2, seen_by_operator = false
         WHERE id = $1 AND status = 'unpaid'",
    )
    .bind(invoice_id)
    .bind(Utc::now())
    .execute(pool)
    .await?;

    let invoice = get_invoice(pool, invoice_id).await?;

    if applied.rows_affected() == 0 {
        return match invoice.status {
            InvoiceStatus::Paid => {
                tracing::info!(invoice_id = %invoice_id, "Invoice already paid, no-op");
                Ok(false)
            }
            InvoiceStatus::Cancelled => Err(AppError::InvalidState(format!(
                "Invoice {invoice_id} is cancelled and cannot be paid."
            ))),
            InvoiceStatus::Unpaid => {
                // Conditional update said no but the row still reads unpaid;
                // another writer is mid-flight. Treat as already applied.
                tracing::warn!(invoice_id = %invoice_id, "Invoice settle lost a race");
                Ok(false)
            }
        };
    }

    tracing::info!(
        invoice_id = %invoice_id,
        rental_id = %invoice.rental_id,
        total_amount = invoice.total_amount,
        "Invoice marked paid"
    );

    notifications::dispatch(
        state,
        invoice.resident_id,
        NotificationKind::InvoicePaid,
        format!(
            "Your utility invoice for {}/{} ({} units of electricity, total {}) has been paid.",
            invoice.month, invoice.year, invoice.electric_usage, invoice.total_amount
        ),
    )
    .await;

    Ok(true)
}

/// Confirm a rental's contract payment through the lifecycle service.
/// Returns whether the transition applied now; duplicates are `Ok(false)`
/// and not re-notified.
pub async fn settle_rental(state: &AppState, rental_id: Uuid) -> AppResult<bool> {
    let applied = rental_lifecycle::confirm_payment(&state.db_pool, rental_id).await?;
    if !applied {
        return Ok(false);
    }

    let rental = rental_lifecycle::get_rental(&state.db_pool, rental_id).await?;
    notifications::dispatch(
        state,
        rental.resident_id,
        NotificationKind::ContractPaymentConfirmed,
        format!(
            "Your contract payment of {} has been received; the apartment is now yours through {}.",
            rental.total_price,
            rental
                .end_date
                .map(|d| d.to_string())
                .unwrap_or_else(|| "the contract term".to_string())
        ),
    )
    .await;

    Ok(true)
}

async fn get_invoice(pool: &PgPool, invoice_id: Uuid) -> AppResult<Invoice> {
    sqlx::query_as::<_, Invoice>("SELECT * FROM invoices WHERE id = $1")
        .bind(invoice_id)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Invoice {invoice_id} not found.")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn outcomes_encode_to_client_status_values() {
        assert_eq!(RedirectOutcome::Success.as_query_value(), "success");
        assert_eq!(
            RedirectOutcome::InvoiceSuccess.as_query_value(),
            "invoice_success"
        );
        assert_eq!(RedirectOutcome::Failed.as_query_value(), "failed");
        assert_eq!(RedirectOutcome::Invalid.as_query_value(), "invalid");
        assert_eq!(RedirectOutcome::Error.as_query_value(), "error");
    }
}
