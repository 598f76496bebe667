use serde_json::json;
use uuid::Uuid;

use crate::state::AppState;

/// What a dispatched notification is about. Rendering (email templates,
/// localization) belongs to the downstream sender behind the webhook.
#[derive(Debug, Clone, Copy)]
pub enum NotificationKind {
    ContractPaymentConfirmed,
    InvoicePaid,
}

impl NotificationKind {
    fn as_str(self) -> &'static str {
        match self {
            Self::ContractPaymentConfirmed => "contract_payment_confirmed",
            Self::InvoicePaid => "invoice_paid",
        }
    }
}

/// Fire-and-forget dispatch: record the notification and hand it to the
/// downstream sender. Failure is logged and swallowed; it must never roll
/// back or block the state transition that triggered it.
pub async fn dispatch(state: &AppState, resident_id: Uuid, kind: NotificationKind, body: String) {
    let queued = sqlx::query(
        "INSERT INTO notification_logs (recipient_id, kind, body, status)
         VALUES ($1, $2, $3, 'queued')",
    )
    .bind(resident_id)
    .bind(kind.as_str())
    .bind(&body)
    .execute(&state.db_pool)
    .await;

    if let Err(e) = queued {
        tracing::warn!(
            recipient_id = %resident_id,
            kind = kind.as_str(),
            error = %e,
            "Failed to record notification"
        );
    }

    let Some(webhook_url) = state.config.notification_webhook_url.as_deref() else {
        return;
    };

    let result = state
        .http_client
        .post(webhook_url)
        .json(&json!({
            "recipient_id": resident_id,
            "kind": kind.as_str(),
            "body": body,
        }))
        .send()
        .await;

    match result {
        Ok(response) if response.status().is_success() => {}
        Ok(response) => {
            tracing::warn!(
                recipient_id = %resident_id,
                kind = kind.as_str(),
                status = %response.status(),
                "Notification webhook rejected the dispatch"
            );
        }
        Err(e) => {
            tracing::warn!(
                recipient_id = %resident_id,
                kind = kind.as_str(),
                error = %e,
                "Notification webhook unreachable"
            );
        }
    }
}
