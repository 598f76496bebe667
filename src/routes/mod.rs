use axum::{routing::get, Router};

use crate::state::AppState;

pub mod apartments;
pub mod health;
pub mod invoices;
pub mod payments;
pub mod rentals;
pub mod settings;

pub fn v1_router() -> Router<AppState> {
    Router::new()
        .route("/health", get(health::health))
        .merge(apartments::router())
        .merge(rentals::router())
        .merge(invoices::router())
        .merge(payments::router())
        .merge(settings::router())
}
