use std::sync::Arc;
use std::time::Duration;

use moka::future::Cache;
use sqlx::PgPool;

use crate::config::AppConfig;
use crate::db::build_db_pool;
use crate::tenancy::TenantRef;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub db_pool: Option<PgPool>,
    /// Short-lived cache for the active-tenant registry list, so a burst of
    /// dashboard requests does not re-read the registry on every call.
    pub tenant_cache: Cache<&'static str, Arc<Vec<TenantRef>>>,
}

impl AppState {
    pub fn build(config: AppConfig) -> Result<Self, Box<dyn std::error::Error>> {
        let db_pool = build_db_pool(&config);

        let tenant_cache = Cache::builder()
            .time_to_live(Duration::from_secs(config.tenant_registry_cache_ttl_seconds))
            .max_capacity(config.tenant_registry_cache_max_entries)
            .build();

        Ok(Self {
            config: Arc::new(config),
            db_pool,
            tenant_cache,
        })
    }
}
