use std::time::Duration;

use rust_decimal::Decimal;
use serde::Serialize;
use tokio::task::JoinSet;

use crate::error::AppResult;
use crate::repository::tenant_store::ScopedStore;
use crate::services::collector::{collect_tenant_metrics, TenantMetrics};
use crate::state::AppState;
use crate::tenancy::{self, TenantRef};

/// Portfolio-wide totals across all active tenants. Failed tenants
/// contribute zero to every field.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PortfolioTotals {
    pub total_properties: i64,
    pub total_residents: i64,
    pub total_pending_fees: Decimal,
    pub total_income: Decimal,
    pub total_open_tickets: i64,
    pub total_budgets_approved: Decimal,
    pub total_expenses: Decimal,
}

/// Summary mode: reduce every tenant's snapshot into one totals record.
pub async fn portfolio_totals(state: &AppState) -> AppResult<PortfolioTotals> {
    let results = collect_all_tenants(state).await?;
    Ok(reduce_totals(&results))
}

/// Detail mode: one entry per active tenant, registry order, failures
/// included with their error message.
pub async fn complex_metrics(state: &AppState) -> AppResult<Vec<TenantMetrics>> {
    collect_all_tenants(state).await
}

/// Fan out the collector across every active tenant.
///
/// Each tenant runs in its own task under a bounded timeout, so one slow or
/// unreachable schema cannot stall the pass. The join below is the barrier:
/// nothing is reduced until every tenant has resolved one way or the other.
/// Exactly one result per tenant comes back, in registry order.
async fn collect_all_tenants(state: &AppState) -> AppResult<Vec<TenantMetrics>> {
    let tenants = tenancy::list_active_tenants(state).await?;
    if tenants.is_empty() {
        return Ok(Vec::new());
    }

    let pool = tenancy::db_pool(state)?.clone();
    let timeout = Duration::from_secs(state.config.tenant_query_timeout_seconds.max(1));

    let mut tasks = JoinSet::new();
    for (index, tenant) in tenants.iter().cloned().enumerate() {
        let pool = pool.clone();
        tasks.spawn(async move {
            (index, collect_with_timeout(pool, tenant, timeout).await)
        });
    }

    let mut ordered: Vec<Option<TenantMetrics>> = vec![None; tenants.len()];
    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok((index, metrics)) => ordered[index] = Some(metrics),
            Err(join_error) => {
                tracing::error!(error = %join_error, "Tenant collection task aborted");
            }
        }
    }

    Ok(ordered
        .into_iter()
        .enumerate()
        .map(|(index, slot)| {
            slot.unwrap_or_else(|| {
                TenantMetrics::failed(&tenants[index], "tenant collection task aborted")
            })
        })
        .collect())
}

async fn collect_with_timeout(
    pool: sqlx::PgPool,
    tenant: TenantRef,
    timeout: Duration,
) -> TenantMetrics {
    let store = match ScopedStore::new(pool, &tenant.schema_name) {
        Ok(store) => store,
        Err(error) => return TenantMetrics::failed(&tenant, error.to_string()),
    };

    match tokio::time::timeout(timeout, collect_tenant_metrics(&store, &tenant)).await {
        Ok(metrics) => metrics,
        Err(_) => {
            tracing::warn!(
                complex = %tenant.name,
                timeout_seconds = timeout.as_secs(),
                "Tenant metric collection timed out"
            );
            TenantMetrics::failed(
                &tenant,
                format!("tenant store timed out after {}s", timeout.as_secs()),
            )
        }
    }
}

/// Reduce per-tenant results into portfolio totals. Plain addition, no
/// rounding mid-stream; failed tenants are skipped entirely.
pub fn reduce_totals(results: &[TenantMetrics]) -> PortfolioTotals {
    let mut totals = PortfolioTotals::default();
    for item in results {
        let TenantMetrics::Collected(snapshot) = item else {
            continue;
        };
        totals.total_properties += snapshot.properties;
        totals.total_residents += snapshot.residents;
        totals.total_pending_fees += snapshot.pending_fees;
        totals.total_income += snapshot.income;
        totals.total_open_tickets += snapshot.open_tickets;
        totals.total_budgets_approved += snapshot.budget_approved;
        totals.total_expenses += snapshot.expenses;
    }
    totals
}

#[cfg(test)]
mod tests {
    use rust_decimal::Decimal;
    use uuid::Uuid;

    use super::{reduce_totals, PortfolioTotals};
    use crate::services::collector::{TenantFailure, TenantMetricSnapshot, TenantMetrics};

    fn snapshot(name: &str, residents: i64, pending_fees: i64, income: i64) -> TenantMetrics {
        TenantMetrics::Collected(TenantMetricSnapshot {
            id: Uuid::new_v4(),
            name: name.to_string(),
            properties: residents / 2,
            residents,
            pending_fees: Decimal::from(pending_fees),
            income: Decimal::from(income),
            open_tickets: 1,
            budget_approved: Decimal::ZERO,
            expenses: Decimal::ZERO,
        })
    }

    fn failure(name: &str) -> TenantMetrics {
        TenantMetrics::Failed(TenantFailure {
            id: Uuid::new_v4(),
            name: name.to_string(),
            error: "connection refused".to_string(),
        })
    }

    #[test]
    fn zero_tenants_yield_all_zero_totals() {
        let totals = reduce_totals(&[]);
        assert_eq!(totals, PortfolioTotals::default());
        assert_eq!(totals.total_residents, 0);
        assert_eq!(totals.total_pending_fees, Decimal::ZERO);
    }

    #[test]
    fn failed_tenants_contribute_nothing_but_stay_listed() {
        let results = vec![
            snapshot("Altos del Parque", 10, 50, 1000),
            failure("Conjunto Norte"),
            snapshot("Mirador del Sur", 5, 0, 500),
        ];

        let totals = reduce_totals(&results);
        assert_eq!(results.len(), 3);
        assert_eq!(results.iter().filter(|r| r.is_failed()).count(), 1);
        assert_eq!(totals.total_residents, 15);
        assert_eq!(totals.total_pending_fees, Decimal::from(50));
        assert_eq!(totals.total_income, Decimal::from(1500));
    }

    #[test]
    fn reduction_is_idempotent() {
        let results = vec![
            snapshot("Altos del Parque", 8, 120, 900),
            snapshot("Mirador del Sur", 3, 0, 150),
        ];
        assert_eq!(reduce_totals(&results), reduce_totals(&results));
    }
}
