use axum::{routing::get, Router};

use crate::state::AppState;

pub mod availability;
pub mod bookings;
pub mod health;
pub mod inquiries;
pub mod payments;
pub mod wallet;

pub fn v1_router() -> Router<AppState> {
    Router::new()
        .route("/health", get(health::health))
        .merge(bookings::router())
        .merge(inquiries::router())
        .merge(payments::router())
        .merge(wallet::router())
        .merge(availability::router())
}
