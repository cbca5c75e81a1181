use axum::{extract::State, Json};
use rust_decimal::Decimal;
use serde_json::{json, Value};
use uuid::Uuid;

use crate::{error::AppResult, state::AppState, tenancy};

pub fn router() -> axum::Router<AppState> {
    axum::Router::new().route("/public/plans", axum::routing::get(list_public_plans))
}

#[derive(Debug, serde::Serialize)]
#[serde(rename_all = "camelCase")]
struct PublicPlan {
    id: Uuid,
    name: String,
    price: Decimal,
    billing_cycle: String,
}

/// Active plans for the landing/registration flow. No auth: this is the
/// public pricing table.
async fn list_public_plans(State(state): State<AppState>) -> AppResult<Json<Value>> {
    let pool = tenancy::db_pool(&state)?;

    let rows = sqlx::query_as::<_, (Uuid, String, Decimal, String)>(
        "SELECT id, name, price::numeric, billing_cycle::text
         FROM plans
         WHERE is_active = true
         ORDER BY price ASC
         LIMIT 50",
    )
    .fetch_all(pool)
    .await
    .map_err(|error| {
        tracing::error!(db_error = %error, "Public plan listing failed");
        crate::error::AppError::Dependency("Registry query failed.".to_string())
    })?;

    let plans = rows
        .into_iter()
        .map(|(id, name, price, billing_cycle)| PublicPlan {
            id,
            name,
            price,
            billing_cycle,
        })
        .collect::<Vec<_>>();

    Ok(Json(json!({ "data": plans })))
}
