use rust_decimal::Decimal;
use serde::Serialize;
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::error::AppError;
use crate::repository::tenant_store::ScopedStore;
use crate::tenancy::TenantRef;

const RESIDENT_ROLE: &str = "RESIDENT";
const PENDING_FEE_STATUS: &str = "PENDING";
const COMPLETED_PAYMENT_STATUS: &str = "COMPLETED";
const APPROVED_BUDGET_STATUS: &str = "APPROVED";
const PAID_EXPENSE_STATUS: &str = "PAID";
const TERMINAL_TICKET_STATUSES: &[&str] = &["RESOLVED", "CLOSED"];

/// One tenant's metrics, or the reason they could not be collected.
///
/// The failed arm carries no numeric fields, so aggregation code cannot read
/// a number off a tenant that was never queried successfully. Serialized
/// untagged: a snapshot renders its metrics, a failure renders `error`.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum TenantMetrics {
    Collected(TenantMetricSnapshot),
    Failed(TenantFailure),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TenantMetricSnapshot {
    pub id: Uuid,
    pub name: String,
    pub properties: i64,
    pub residents: i64,
    pub pending_fees: Decimal,
    pub income: Decimal,
    pub open_tickets: i64,
    pub budget_approved: Decimal,
    pub expenses: Decimal,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TenantFailure {
    pub id: Uuid,
    pub name: String,
    pub error: String,
}

impl TenantMetrics {
    pub fn failed(tenant: &TenantRef, error: impl Into<String>) -> Self {
        Self::Failed(TenantFailure {
            id: tenant.id,
            name: tenant.name.clone(),
            error: error.into(),
        })
    }

    pub fn name(&self) -> &str {
        match self {
            Self::Collected(snapshot) => &snapshot.name,
            Self::Failed(failure) => &failure.name,
        }
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, Self::Failed(_))
    }
}

/// Collect the fixed metric battery for one tenant.
///
/// A failure on any read degrades the whole tenant to `Failed`; it never
/// propagates to the caller, so one broken schema cannot abort a portfolio
/// pass.
pub async fn collect_tenant_metrics(store: &ScopedStore, tenant: &TenantRef) -> TenantMetrics {
    match run_metric_battery(store).await {
        Ok(battery) => TenantMetrics::Collected(TenantMetricSnapshot {
            id: tenant.id,
            name: tenant.name.clone(),
            properties: battery.properties,
            residents: battery.residents,
            pending_fees: battery.pending_fees.unwrap_or(Decimal::ZERO),
            income: battery.income.unwrap_or(Decimal::ZERO),
            open_tickets: battery.open_tickets,
            budget_approved: battery.budget_approved.unwrap_or(Decimal::ZERO),
            expenses: battery.expenses.unwrap_or(Decimal::ZERO),
        }),
        Err(error) => {
            tracing::warn!(
                complex = %tenant.name,
                schema = %store.schema(),
                error = %error,
                "Tenant metric collection failed"
            );
            TenantMetrics::failed(tenant, error.to_string())
        }
    }
}

struct MetricBattery {
    properties: i64,
    residents: i64,
    pending_fees: Option<Decimal>,
    income: Option<Decimal>,
    open_tickets: i64,
    budget_approved: Option<Decimal>,
    expenses: Option<Decimal>,
}

/// The seven reads have no ordering dependency; run them concurrently and
/// fail fast on the first error.
async fn run_metric_battery(store: &ScopedStore) -> Result<MetricBattery, AppError> {
    let resident_filter = filter_map(&[("role", Value::String(RESIDENT_ROLE.to_string()))]);
    let pending_fees_filter = status_filter(PENDING_FEE_STATUS);
    let income_filter = status_filter(COMPLETED_PAYMENT_STATUS);
    let open_ticket_filter = filter_map(&[(
        "status__not_in",
        Value::Array(
            TERMINAL_TICKET_STATUSES
                .iter()
                .map(|status| Value::String((*status).to_string()))
                .collect(),
        ),
    )]);
    let budget_filter = status_filter(APPROVED_BUDGET_STATUS);
    let expense_filter = status_filter(PAID_EXPENSE_STATUS);

    let (properties, residents, pending_fees, income, open_tickets, budget_approved, expenses) =
        tokio::try_join!(
            store.count("properties", None),
            store.count("users", Some(&resident_filter)),
            store.aggregate_sum("fees", "amount", Some(&pending_fees_filter)),
            store.aggregate_sum("payments", "amount", Some(&income_filter)),
            store.count("pqrs", Some(&open_ticket_filter)),
            store.aggregate_sum("budgets", "total_amount", Some(&budget_filter)),
            store.aggregate_sum("expenses", "amount", Some(&expense_filter)),
        )?;

    Ok(MetricBattery {
        properties,
        residents,
        pending_fees,
        income,
        open_tickets,
        budget_approved,
        expenses,
    })
}

pub(crate) fn status_filter(status: &str) -> Map<String, Value> {
    filter_map(&[("status", Value::String(status.to_string()))])
}

pub(crate) fn filter_map(entries: &[(&str, Value)]) -> Map<String, Value> {
    let mut map = Map::new();
    for (key, value) in entries {
        map.insert((*key).to_string(), value.clone());
    }
    map
}

#[cfg(test)]
mod tests {
    use super::{TenantFailure, TenantMetricSnapshot, TenantMetrics};
    use rust_decimal::Decimal;
    use uuid::Uuid;

    fn snapshot(name: &str, residents: i64, pending_fees: i64, income: i64) -> TenantMetrics {
        TenantMetrics::Collected(TenantMetricSnapshot {
            id: Uuid::new_v4(),
            name: name.to_string(),
            properties: 0,
            residents,
            pending_fees: Decimal::from(pending_fees),
            income: Decimal::from(income),
            open_tickets: 0,
            budget_approved: Decimal::ZERO,
            expenses: Decimal::ZERO,
        })
    }

    #[test]
    fn failed_metrics_serialize_without_numeric_fields() {
        let failed = TenantMetrics::Failed(TenantFailure {
            id: Uuid::new_v4(),
            name: "Conjunto Norte".to_string(),
            error: "connection refused".to_string(),
        });
        let value = serde_json::to_value(&failed).expect("serializes");
        let object = value.as_object().expect("object");
        assert_eq!(
            object.get("error").and_then(|v| v.as_str()),
            Some("connection refused")
        );
        assert!(object.get("residents").is_none());
        assert!(object.get("income").is_none());
    }

    #[test]
    fn collected_metrics_serialize_camel_case() {
        let value = serde_json::to_value(snapshot("Altos del Parque", 10, 50, 1000))
            .expect("serializes");
        let object = value.as_object().expect("object");
        assert!(object.get("pendingFees").is_some());
        assert!(object.get("openTickets").is_some());
        assert!(object.get("budgetApproved").is_some());
        assert!(object.get("error").is_none());
    }
}
