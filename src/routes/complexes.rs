use axum::{
    extract::{Path, Query, State},
    http::HeaderMap,
    Json,
};
use serde_json::{json, Value};
use uuid::Uuid;

use crate::{
    auth::require_admin_key,
    error::AppResult,
    repository::tenant_store::ScopedStore,
    schemas::{clamp_limit_in_range, validate_input, PeriodQuery, RecentTransactionsQuery},
    services::finance,
    state::AppState,
    tenancy,
};

pub fn router() -> axum::Router<AppState> {
    axum::Router::new()
        .route(
            "/complexes/{complex_id}/financial-summary",
            axum::routing::get(complex_financial_summary),
        )
        .route(
            "/complexes/{complex_id}/transactions/recent",
            axum::routing::get(complex_recent_transactions),
        )
}

#[derive(Debug, serde::Deserialize)]
struct ComplexPath {
    complex_id: Uuid,
}

/// Period income/expense summary for one complex.
async fn complex_financial_summary(
    State(state): State<AppState>,
    Path(path): Path<ComplexPath>,
    Query(query): Query<PeriodQuery>,
    headers: HeaderMap,
) -> AppResult<Json<Value>> {
    require_admin_key(&state, &headers)?;
    let range = query.parse()?;

    let tenant = tenancy::get_active_tenant(&state, path.complex_id).await?;
    let report = finance::tenant_period_summary(&state, &tenant, range).await?;

    Ok(Json(json!({
        "startDate": range.start.to_string(),
        "endDate": range.end.to_string(),
        "report": report,
    })))
}

/// Latest completed payments and paid expenses for one complex, merged
/// newest-first.
async fn complex_recent_transactions(
    State(state): State<AppState>,
    Path(path): Path<ComplexPath>,
    Query(query): Query<RecentTransactionsQuery>,
    headers: HeaderMap,
) -> AppResult<Json<Value>> {
    require_admin_key(&state, &headers)?;
    validate_input(&query)?;
    let limit = clamp_limit_in_range(query.limit, 1, 50);

    let tenant = tenancy::get_active_tenant(&state, path.complex_id).await?;
    let pool = tenancy::db_pool(&state)?.clone();
    let store = ScopedStore::new(pool, &tenant.schema_name)?;

    let transactions = finance::recent_transactions(&store, limit).await?;
    Ok(Json(json!({ "data": transactions })))
}
