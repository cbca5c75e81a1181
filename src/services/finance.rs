use std::collections::HashMap;
use std::time::Duration;

use rust_decimal::Decimal;
use serde::Serialize;
use serde_json::Value;
use tokio::task::JoinSet;
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::repository::tenant_store::ScopedStore;
use crate::schemas::PeriodRange;
use crate::services::collector::{filter_map, status_filter};
use crate::state::AppState;
use crate::tenancy::{self, TenantRef};

const ACTIVE_SUBSCRIPTION_STATUS: &str = "ACTIVE";
const UNKNOWN_PLAN_NAME: &str = "Unknown";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BillingCycle {
    Monthly,
    Quarterly,
    Yearly,
}

impl BillingCycle {
    pub fn parse(value: &str) -> Self {
        match value.trim().to_ascii_uppercase().as_str() {
            "QUARTERLY" => Self::Quarterly,
            "YEARLY" => Self::Yearly,
            _ => Self::Monthly,
        }
    }
}

/// Platform-level operating metrics for the app-admin dashboard.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OperativeMetrics {
    pub total_complexes: i64,
    pub total_users: i64,
    pub mrr: Decimal,
    pub arr: Decimal,
    /// Reserved; period-over-period comparison is not implemented.
    pub mrr_change: Decimal,
    pub complexes_by_plan: Vec<PlanBucket>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlanBucket {
    pub name: String,
    pub count: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FinancialPeriodReport {
    pub complex_name: String,
    pub income: Decimal,
    pub expenses: Decimal,
    pub net_balance: Decimal,
}

impl FinancialPeriodReport {
    pub fn new(complex_name: String, income: Decimal, expenses: Decimal) -> Self {
        Self {
            complex_name,
            income,
            expenses,
            net_balance: income - expenses,
        }
    }
}

/// Per-complex entry of the consolidated report. Mirrors the collector's
/// failure policy: a failed tenant carries only its name and error.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum ComplexPeriodReport {
    Ok(FinancialPeriodReport),
    Failed(ComplexReportFailure),
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ComplexReportFailure {
    pub complex_name: String,
    pub error: String,
}

impl ComplexPeriodReport {
    fn failed(tenant: &TenantRef, error: impl Into<String>) -> Self {
        Self::Failed(ComplexReportFailure {
            complex_name: tenant.name.clone(),
            error: error.into(),
        })
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsolidatedFinancialReport {
    pub start_date: String,
    pub end_date: String,
    pub total_income_all_complexes: Decimal,
    pub total_expenses_all_complexes: Decimal,
    pub net_balance_all_complexes: Decimal,
    pub complex_reports: Vec<ComplexPeriodReport>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionEntry {
    pub id: Value,
    pub date: String,
    pub description: String,
    pub amount: Value,
    #[serde(rename = "type")]
    pub kind: &'static str,
}

/// Compute MRR/ARR and the plan distribution from the shared registry.
pub async fn operative_metrics(state: &AppState) -> AppResult<OperativeMetrics> {
    let pool = tenancy::db_pool(state)?;

    let (total_complexes, total_users, subscriptions, plan_counts, plan_names) = tokio::try_join!(
        count_active_complexes(pool),
        count_platform_users(pool),
        fetch_active_subscriptions(pool),
        fetch_complex_counts_by_plan(pool),
        fetch_plan_names(pool),
    )?;

    let (mrr, arr) = recurring_revenue(&subscriptions);

    Ok(OperativeMetrics {
        total_complexes,
        total_users,
        mrr,
        arr,
        mrr_change: Decimal::ZERO,
        complexes_by_plan: plan_buckets(plan_counts, &plan_names),
    })
}

/// Normalize one subscription's price to its monthly figure.
pub fn monthly_contribution(price: Decimal, cycle: BillingCycle) -> Decimal {
    match cycle {
        BillingCycle::Monthly => price,
        BillingCycle::Quarterly => price / Decimal::from(3),
        BillingCycle::Yearly => price / Decimal::from(12),
    }
}

/// Sum monthly contributions, then round once at the presentation boundary.
/// `arr` is derived from the rounded `mrr` so the `arr = mrr * 12` identity
/// holds exactly on the wire.
pub fn recurring_revenue(subscriptions: &[(Decimal, BillingCycle)]) -> (Decimal, Decimal) {
    let total: Decimal = subscriptions
        .iter()
        .map(|(price, cycle)| monthly_contribution(*price, *cycle))
        .sum();
    // rescale pins the scale to exactly two digits so an integral total
    // still renders as e.g. "300.00"
    let mut mrr = total.round_dp(2);
    mrr.rescale(2);
    let mut arr = mrr * Decimal::from(12);
    arr.rescale(2);
    (mrr, arr)
}

/// Every plan id present among active complexes appears exactly once; a plan
/// id with no matching plan row renders under the "Unknown" label instead of
/// being dropped.
pub fn plan_buckets(counts: Vec<(Uuid, i64)>, names: &HashMap<Uuid, String>) -> Vec<PlanBucket> {
    counts
        .into_iter()
        .map(|(plan_id, count)| PlanBucket {
            name: names
                .get(&plan_id)
                .cloned()
                .unwrap_or_else(|| UNKNOWN_PLAN_NAME.to_string()),
            count,
        })
        .collect()
}

/// Consolidated income/expense report over an inclusive date window, fanned
/// out across all active tenants with the same barrier and failure isolation
/// as the portfolio aggregator.
pub async fn consolidated_financial_report(
    state: &AppState,
    range: PeriodRange,
) -> AppResult<ConsolidatedFinancialReport> {
    let tenants = tenancy::list_active_tenants(state).await?;
    let reports = if tenants.is_empty() {
        Vec::new()
    } else {
        let pool = tenancy::db_pool(state)?.clone();
        let timeout = Duration::from_secs(state.config.tenant_query_timeout_seconds.max(1));

        let mut tasks = JoinSet::new();
        for (index, tenant) in tenants.iter().cloned().enumerate() {
            let pool = pool.clone();
            tasks.spawn(async move {
                (index, period_report_with_timeout(pool, tenant, range, timeout).await)
            });
        }

        let mut ordered: Vec<Option<ComplexPeriodReport>> = vec![None; tenants.len()];
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((index, report)) => ordered[index] = Some(report),
                Err(join_error) => {
                    tracing::error!(error = %join_error, "Period report task aborted");
                }
            }
        }

        ordered
            .into_iter()
            .enumerate()
            .map(|(index, slot)| {
                slot.unwrap_or_else(|| {
                    ComplexPeriodReport::failed(&tenants[index], "period report task aborted")
                })
            })
            .collect()
    };

    Ok(reduce_consolidated(range, reports))
}

/// Period summary for a single tenant. Here the caller asked for this exact
/// complex, so a store failure surfaces as a request-level error instead of
/// degrading silently.
pub async fn tenant_period_summary(
    state: &AppState,
    tenant: &TenantRef,
    range: PeriodRange,
) -> AppResult<FinancialPeriodReport> {
    let pool = tenancy::db_pool(state)?.clone();
    let store = ScopedStore::new(pool, &tenant.schema_name)?;
    let (income, expenses) = period_sums(&store, range).await?;
    Ok(FinancialPeriodReport::new(
        tenant.name.clone(),
        income,
        expenses,
    ))
}

/// Most recent completed payments and paid expenses, merged newest-first.
pub async fn recent_transactions(
    store: &ScopedStore,
    limit: i64,
) -> AppResult<Vec<TransactionEntry>> {
    let payment_filter = status_filter("COMPLETED");
    let expense_filter = status_filter("PAID");

    let (payments, expenses) = tokio::try_join!(
        store.find_many("payments", Some(&payment_filter), limit, "paid_date", false),
        store.find_many("expenses", Some(&expense_filter), limit, "expense_date", false),
    )?;

    Ok(merge_recent(payments, expenses, limit as usize))
}

pub fn reduce_consolidated(
    range: PeriodRange,
    reports: Vec<ComplexPeriodReport>,
) -> ConsolidatedFinancialReport {
    let mut total_income = Decimal::ZERO;
    let mut total_expenses = Decimal::ZERO;
    for report in &reports {
        let ComplexPeriodReport::Ok(entry) = report else {
            continue;
        };
        total_income += entry.income;
        total_expenses += entry.expenses;
    }

    ConsolidatedFinancialReport {
        start_date: range.start.to_string(),
        end_date: range.end.to_string(),
        total_income_all_complexes: total_income,
        total_expenses_all_complexes: total_expenses,
        net_balance_all_complexes: total_income - total_expenses,
        complex_reports: reports,
    }
}

async fn period_report_with_timeout(
    pool: sqlx::PgPool,
    tenant: TenantRef,
    range: PeriodRange,
    timeout: Duration,
) -> ComplexPeriodReport {
    let store = match ScopedStore::new(pool, &tenant.schema_name) {
        Ok(store) => store,
        Err(error) => return ComplexPeriodReport::failed(&tenant, error.to_string()),
    };

    match tokio::time::timeout(timeout, period_sums(&store, range)).await {
        Ok(Ok((income, expenses))) => ComplexPeriodReport::Ok(FinancialPeriodReport::new(
            tenant.name.clone(),
            income,
            expenses,
        )),
        Ok(Err(error)) => {
            tracing::warn!(
                complex = %tenant.name,
                error = %error,
                "Tenant period report failed"
            );
            ComplexPeriodReport::failed(&tenant, error.to_string())
        }
        Err(_) => ComplexPeriodReport::failed(
            &tenant,
            format!("tenant store timed out after {}s", timeout.as_secs()),
        ),
    }
}

async fn period_sums(
    store: &ScopedStore,
    range: PeriodRange,
) -> Result<(Decimal, Decimal), AppError> {
    let income_filter = filter_map(&[
        ("status", Value::String("COMPLETED".to_string())),
        ("paid_date__gte", Value::String(range.start.to_string())),
        ("paid_date__lte", Value::String(range.end.to_string())),
    ]);
    let expense_filter = filter_map(&[
        ("status", Value::String("PAID".to_string())),
        ("expense_date__gte", Value::String(range.start.to_string())),
        ("expense_date__lte", Value::String(range.end.to_string())),
    ]);

    let (income, expenses) = tokio::try_join!(
        store.aggregate_sum("payments", "amount", Some(&income_filter)),
        store.aggregate_sum("expenses", "amount", Some(&expense_filter)),
    )?;

    Ok((
        income.unwrap_or(Decimal::ZERO),
        expenses.unwrap_or(Decimal::ZERO),
    ))
}

fn merge_recent(payments: Vec<Value>, expenses: Vec<Value>, limit: usize) -> Vec<TransactionEntry> {
    let mut entries = Vec::with_capacity(payments.len() + expenses.len());

    for payment in payments {
        entries.push(TransactionEntry {
            id: payment.get("id").cloned().unwrap_or(Value::Null),
            date: val_str(&payment, "paid_date"),
            description: non_empty_or(val_str(&payment, "concept"), "Pago recibido"),
            amount: payment.get("amount").cloned().unwrap_or(Value::Null),
            kind: "income",
        });
    }
    for expense in expenses {
        entries.push(TransactionEntry {
            id: expense.get("id").cloned().unwrap_or(Value::Null),
            date: val_str(&expense, "expense_date"),
            description: non_empty_or(val_str(&expense, "description"), "Gasto"),
            amount: expense.get("amount").cloned().unwrap_or(Value::Null),
            kind: "expense",
        });
    }

    // ISO dates sort lexicographically
    entries.sort_by(|left, right| right.date.cmp(&left.date));
    entries.truncate(limit);
    entries
}

async fn count_active_complexes(pool: &sqlx::PgPool) -> Result<i64, AppError> {
    sqlx::query_scalar::<_, i64>(
        "SELECT COUNT(*)::bigint FROM residential_complexes WHERE is_active = true",
    )
    .fetch_one(pool)
    .await
    .map_err(registry_error)
}

async fn count_platform_users(pool: &sqlx::PgPool) -> Result<i64, AppError> {
    sqlx::query_scalar::<_, i64>("SELECT COUNT(*)::bigint FROM users")
        .fetch_one(pool)
        .await
        .map_err(registry_error)
}

async fn fetch_active_subscriptions(
    pool: &sqlx::PgPool,
) -> Result<Vec<(Decimal, BillingCycle)>, AppError> {
    let rows = sqlx::query_as::<_, (Decimal, String)>(
        "SELECT p.price::numeric, p.billing_cycle::text
         FROM subscriptions s
         JOIN plans p ON p.id = s.plan_id
         WHERE s.status = $1",
    )
    .bind(ACTIVE_SUBSCRIPTION_STATUS)
    .fetch_all(pool)
    .await
    .map_err(registry_error)?;

    Ok(rows
        .into_iter()
        .map(|(price, cycle)| (price, BillingCycle::parse(&cycle)))
        .collect())
}

async fn fetch_complex_counts_by_plan(pool: &sqlx::PgPool) -> Result<Vec<(Uuid, i64)>, AppError> {
    sqlx::query_as::<_, (Uuid, i64)>(
        "SELECT plan_id, COUNT(*)::bigint
         FROM residential_complexes
         WHERE is_active = true AND plan_id IS NOT NULL
         GROUP BY plan_id
         ORDER BY COUNT(*) DESC",
    )
    .fetch_all(pool)
    .await
    .map_err(registry_error)
}

async fn fetch_plan_names(pool: &sqlx::PgPool) -> Result<HashMap<Uuid, String>, AppError> {
    let rows = sqlx::query_as::<_, (Uuid, String)>("SELECT id, name FROM plans")
        .fetch_all(pool)
        .await
        .map_err(registry_error)?;
    Ok(rows.into_iter().collect())
}

fn registry_error(error: sqlx::Error) -> AppError {
    tracing::error!(db_error = %error, "Registry query failed");
    AppError::Dependency("Registry query failed.".to_string())
}

fn val_str(row: &Value, key: &str) -> String {
    row.as_object()
        .and_then(|obj| obj.get(key))
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(ToOwned::to_owned)
        .unwrap_or_default()
}

fn non_empty_or(value: String, fallback: &str) -> String {
    if value.is_empty() {
        fallback.to_string()
    } else {
        value
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use rust_decimal::Decimal;
    use serde_json::json;
    use uuid::Uuid;

    use super::{
        merge_recent, monthly_contribution, plan_buckets, recurring_revenue, reduce_consolidated,
        BillingCycle, ComplexPeriodReport, ComplexReportFailure, FinancialPeriodReport,
    };
    use crate::schemas::PeriodRange;

    fn decimal(value: &str) -> Decimal {
        value.parse().expect("valid decimal literal")
    }

    fn january() -> PeriodRange {
        PeriodRange {
            start: "2026-01-01".parse().unwrap(),
            end: "2026-01-31".parse().unwrap(),
        }
    }

    #[test]
    fn billing_cycles_normalize_to_monthly_figures() {
        assert_eq!(
            monthly_contribution(decimal("100"), BillingCycle::Monthly),
            decimal("100")
        );
        assert_eq!(
            monthly_contribution(decimal("1200"), BillingCycle::Yearly),
            decimal("100")
        );
        assert_eq!(
            monthly_contribution(decimal("300"), BillingCycle::Quarterly),
            decimal("100")
        );
    }

    #[test]
    fn mrr_and_arr_round_to_cents() {
        let subscriptions = vec![
            (decimal("100"), BillingCycle::Monthly),
            (decimal("1200"), BillingCycle::Yearly),
            (decimal("300"), BillingCycle::Quarterly),
        ];
        let (mrr, arr) = recurring_revenue(&subscriptions);
        assert_eq!(mrr.to_string(), "300.00");
        assert_eq!(arr.to_string(), "3600.00");
        assert_eq!(arr, mrr * Decimal::from(12));
    }

    #[test]
    fn recurring_revenue_over_no_subscriptions_is_zero() {
        let (mrr, arr) = recurring_revenue(&[]);
        assert_eq!(mrr, Decimal::ZERO);
        assert_eq!(arr, Decimal::ZERO);
    }

    #[test]
    fn uneven_cycles_do_not_drift() {
        // 100 / 12 has no exact cent representation; the rounding happens
        // once on the total, not per subscription.
        let subscriptions = vec![
            (decimal("100"), BillingCycle::Yearly),
            (decimal("100"), BillingCycle::Yearly),
            (decimal("100"), BillingCycle::Yearly),
        ];
        let (mrr, _) = recurring_revenue(&subscriptions);
        assert_eq!(mrr.to_string(), "25.00");
    }

    #[test]
    fn plan_buckets_keep_orphans_with_fallback_name() {
        let basic = Uuid::new_v4();
        let orphan = Uuid::new_v4();
        let names = HashMap::from([(basic, "Basico".to_string())]);

        let buckets = plan_buckets(vec![(basic, 7), (orphan, 2)], &names);
        assert_eq!(buckets.len(), 2);
        assert_eq!(buckets[0].name, "Basico");
        assert_eq!(buckets[0].count, 7);
        assert_eq!(buckets[1].name, "Unknown");
        assert_eq!(buckets[1].count, 2);
    }

    #[test]
    fn net_balance_is_income_minus_expenses() {
        let report = FinancialPeriodReport::new(
            "Altos del Parque".to_string(),
            decimal("1500.50"),
            decimal("420.25"),
        );
        assert_eq!(report.net_balance, decimal("1080.25"));
    }

    #[test]
    fn consolidated_report_excludes_failed_complexes_from_totals() {
        let reports = vec![
            ComplexPeriodReport::Ok(FinancialPeriodReport::new(
                "Altos del Parque".to_string(),
                decimal("1000"),
                decimal("300"),
            )),
            ComplexPeriodReport::Failed(ComplexReportFailure {
                complex_name: "Conjunto Norte".to_string(),
                error: "connection refused".to_string(),
            }),
            ComplexPeriodReport::Ok(FinancialPeriodReport::new(
                "Mirador del Sur".to_string(),
                decimal("500"),
                decimal("200"),
            )),
        ];

        let consolidated = reduce_consolidated(january(), reports);
        assert_eq!(consolidated.total_income_all_complexes, decimal("1500"));
        assert_eq!(consolidated.total_expenses_all_complexes, decimal("500"));
        assert_eq!(consolidated.net_balance_all_complexes, decimal("1000"));
        assert_eq!(consolidated.complex_reports.len(), 3);
        assert_eq!(consolidated.start_date, "2026-01-01");
        assert_eq!(consolidated.end_date, "2026-01-31");
    }

    #[test]
    fn consolidated_report_over_zero_tenants_is_all_zero() {
        let consolidated = reduce_consolidated(january(), Vec::new());
        assert_eq!(consolidated.total_income_all_complexes, Decimal::ZERO);
        assert_eq!(consolidated.net_balance_all_complexes, Decimal::ZERO);
        assert!(consolidated.complex_reports.is_empty());
    }

    #[test]
    fn recent_transactions_merge_newest_first() {
        let payments = vec![
            json!({"id": 1, "paid_date": "2026-03-10", "concept": "Cuota marzo", "amount": 150}),
            json!({"id": 2, "paid_date": "2026-03-01", "amount": 150}),
        ];
        let expenses = vec![
            json!({"id": 3, "expense_date": "2026-03-05", "description": "Jardineria", "amount": 80}),
        ];

        let merged = merge_recent(payments, expenses, 5);
        assert_eq!(merged.len(), 3);
        assert_eq!(merged[0].date, "2026-03-10");
        assert_eq!(merged[0].kind, "income");
        assert_eq!(merged[1].date, "2026-03-05");
        assert_eq!(merged[1].kind, "expense");
        assert_eq!(merged[2].description, "Pago recibido");
    }

    #[test]
    fn recent_transactions_respect_the_limit() {
        let payments = (0..4)
            .map(|day| json!({"id": day, "paid_date": format!("2026-03-0{}", day + 1), "amount": 10}))
            .collect();
        let merged = merge_recent(payments, Vec::new(), 2);
        assert_eq!(merged.len(), 2);
        assert_eq!(merged[0].date, "2026-03-04");
    }
}
