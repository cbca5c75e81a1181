use std::sync::Arc;

use sqlx::{PgPool, Row};
use uuid::Uuid;

use crate::error::AppError;
use crate::state::AppState;

const ACTIVE_TENANTS_KEY: &str = "active_tenants";

/// One row of the shared tenant registry (`public.residential_complexes`).
/// Read-only for this service; onboarding writes it elsewhere.
#[derive(Debug, Clone, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TenantRef {
    pub id: Uuid,
    pub name: String,
    pub schema_name: String,
    pub plan_id: Option<Uuid>,
}

pub fn db_pool(state: &AppState) -> Result<&PgPool, AppError> {
    state.db_pool.as_ref().ok_or_else(|| {
        AppError::Dependency("Database is not configured. Set DATABASE_URL.".to_string())
    })
}

/// List all active tenants, served from the short-TTL registry cache.
///
/// A registry failure is not tenant-scoped: it aborts the whole request.
pub async fn list_active_tenants(state: &AppState) -> Result<Arc<Vec<TenantRef>>, AppError> {
    if let Some(cached) = state.tenant_cache.get(ACTIVE_TENANTS_KEY).await {
        return Ok(cached);
    }

    let pool = db_pool(state)?;
    let tenants = Arc::new(fetch_active_tenants(pool).await?);
    state
        .tenant_cache
        .insert(ACTIVE_TENANTS_KEY, tenants.clone())
        .await;
    Ok(tenants)
}

/// Resolve a single active tenant by id, bypassing nothing: inactive or
/// unknown complexes are a 404.
pub async fn get_active_tenant(state: &AppState, complex_id: Uuid) -> Result<TenantRef, AppError> {
    let pool = db_pool(state)?;
    let row = sqlx::query(
        "SELECT id, name, schema_name, plan_id
         FROM residential_complexes
         WHERE id = $1 AND is_active = true
         LIMIT 1",
    )
    .bind(complex_id)
    .fetch_optional(pool)
    .await
    .map_err(|error| AppError::Dependency(format!("Tenant registry read failed: {error}")))?;

    row.map(read_tenant_row).transpose()?.ok_or_else(|| {
        AppError::NotFound(format!("Residential complex {complex_id} not found."))
    })
}

async fn fetch_active_tenants(pool: &PgPool) -> Result<Vec<TenantRef>, AppError> {
    let rows = sqlx::query(
        "SELECT id, name, schema_name, plan_id
         FROM residential_complexes
         WHERE is_active = true
         ORDER BY name ASC
         LIMIT 500",
    )
    .fetch_all(pool)
    .await
    .map_err(|error| AppError::Dependency(format!("Tenant registry read failed: {error}")))?;

    rows.into_iter().map(read_tenant_row).collect()
}

fn read_tenant_row(row: sqlx::postgres::PgRow) -> Result<TenantRef, AppError> {
    let id: Uuid = row
        .try_get("id")
        .map_err(|error| AppError::Dependency(format!("Malformed registry row: {error}")))?;
    let name: String = row
        .try_get("name")
        .map_err(|error| AppError::Dependency(format!("Malformed registry row: {error}")))?;
    let schema_name: String = row
        .try_get("schema_name")
        .map_err(|error| AppError::Dependency(format!("Malformed registry row: {error}")))?;
    let plan_id: Option<Uuid> = row.try_get("plan_id").unwrap_or(None);

    Ok(TenantRef {
        id,
        name,
        schema_name,
        plan_id,
    })
}
