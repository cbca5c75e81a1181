use axum::{
    extract::{Query, State},
    http::HeaderMap,
    Json,
};

use crate::{
    auth::require_admin_key,
    error::AppResult,
    schemas::PeriodQuery,
    services::{finance, portfolio},
    state::AppState,
};

pub fn router() -> axum::Router<AppState> {
    axum::Router::new()
        .route("/portfolio/metrics", axum::routing::get(portfolio_metrics))
        .route(
            "/portfolio/financial-summary",
            axum::routing::get(financial_summary).post(financial_summary_post),
        )
        .route(
            "/portfolio/reports/consolidated",
            axum::routing::get(consolidated_report),
        )
}

/// Portfolio-wide totals across every active complex.
async fn portfolio_metrics(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> AppResult<Json<portfolio::PortfolioTotals>> {
    require_admin_key(&state, &headers)?;
    portfolio::portfolio_totals(&state).await.map(Json)
}

async fn financial_summary(
    State(state): State<AppState>,
    Query(query): Query<PeriodQuery>,
    headers: HeaderMap,
) -> AppResult<Json<finance::ConsolidatedFinancialReport>> {
    require_admin_key(&state, &headers)?;
    let range = query.parse()?;
    finance::consolidated_financial_report(&state, range)
        .await
        .map(Json)
}

async fn financial_summary_post(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<PeriodQuery>,
) -> AppResult<Json<finance::ConsolidatedFinancialReport>> {
    require_admin_key(&state, &headers)?;
    let range = payload.parse()?;
    finance::consolidated_financial_report(&state, range)
        .await
        .map(Json)
}

/// Same aggregation as the financial summary; consumed by the PDF renderer,
/// which lives outside this service.
async fn consolidated_report(
    State(state): State<AppState>,
    Query(query): Query<PeriodQuery>,
    headers: HeaderMap,
) -> AppResult<Json<finance::ConsolidatedFinancialReport>> {
    require_admin_key(&state, &headers)?;
    let range = query.parse()?;
    finance::consolidated_financial_report(&state, range)
        .await
        .map(Json)
}
