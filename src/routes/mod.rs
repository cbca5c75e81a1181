use axum::{routing::get, Router};

use crate::state::AppState;

pub mod admin;
pub mod complexes;
pub mod health;
pub mod plans;
pub mod portfolio;

pub fn v1_router() -> Router<AppState> {
    Router::new()
        .route("/health", get(health::health))
        .merge(admin::router())
        .merge(portfolio::router())
        .merge(complexes::router())
        .merge(plans::router())
}
