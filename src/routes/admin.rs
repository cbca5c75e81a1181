use axum::{extract::State, http::HeaderMap, Json};

use crate::{
    auth::require_admin_key,
    error::AppResult,
    services::{collector::TenantMetrics, finance, portfolio},
    state::AppState,
};

pub fn router() -> axum::Router<AppState> {
    axum::Router::new()
        .route(
            "/admin/metrics/operative",
            axum::routing::get(operative_metrics),
        )
        .route(
            "/admin/metrics/complexes",
            axum::routing::get(complex_metrics),
        )
}

/// Platform KPIs for the app-admin dashboard: complex/user counts, recurring
/// revenue, and the plan distribution.
async fn operative_metrics(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> AppResult<Json<finance::OperativeMetrics>> {
    require_admin_key(&state, &headers)?;
    finance::operative_metrics(&state).await.map(Json)
}

/// Per-complex metric breakdown. Complexes whose schema could not be queried
/// appear in the list with an `error` field instead of being dropped.
async fn complex_metrics(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> AppResult<Json<Vec<TenantMetrics>>> {
    require_admin_key(&state, &headers)?;
    portfolio::complex_metrics(&state).await.map(Json)
}
