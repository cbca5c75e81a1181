use chrono::{DateTime, FixedOffset, NaiveDate};
use rust_decimal::Decimal;
use serde_json::{Map, Value};
use sqlx::{postgres::PgRow, PgPool, Postgres, QueryBuilder, Row};

use crate::error::AppError;

/// Tables this service may read inside a tenant schema. The aggregation core
/// is read-only, so there is no insert/update/delete surface at all.
const TENANT_TABLES: &[&str] = &[
    "budgets",
    "expenses",
    "fees",
    "payments",
    "pqrs",
    "properties",
    "users",
];

/// A query handle scoped to one tenant's schema.
///
/// Constructed per request and per tenant, then passed down explicitly —
/// there is no process-global client. Exposes the accessor contract consumed
/// by the collectors: `count`, `aggregate_sum`, `find_many`.
#[derive(Debug, Clone)]
pub struct ScopedStore {
    pool: PgPool,
    schema: String,
}

impl ScopedStore {
    pub fn new(pool: PgPool, schema_name: &str) -> Result<Self, AppError> {
        let schema = validate_identifier(schema_name)?.to_string();
        Ok(Self { pool, schema })
    }

    pub fn schema(&self) -> &str {
        &self.schema
    }

    /// Count rows matching the filters.
    pub async fn count(
        &self,
        table: &str,
        filters: Option<&Map<String, Value>>,
    ) -> Result<i64, AppError> {
        let mut query = QueryBuilder::<Postgres>::new("SELECT COUNT(*)::bigint AS total FROM ");
        self.push_table(&mut query, table)?;
        query.push(" t WHERE 1=1");
        push_filters(&mut query, filters)?;

        let row = query.build().fetch_one(&self.pool).await.map_err(map_db_error)?;
        Ok(row.try_get::<i64, _>("total").unwrap_or(0))
    }

    /// Sum a numeric column over the matching rows.
    ///
    /// Returns `None` when no row matched — callers decide whether an empty
    /// aggregate means zero. Money columns are `numeric` and come back as
    /// `Decimal`, never as binary floating point.
    pub async fn aggregate_sum(
        &self,
        table: &str,
        column: &str,
        filters: Option<&Map<String, Value>>,
    ) -> Result<Option<Decimal>, AppError> {
        let column_name = validate_identifier(column)?;

        let mut query = QueryBuilder::<Postgres>::new("SELECT SUM(t.");
        query.push(column_name).push(")::numeric AS total FROM ");
        self.push_table(&mut query, table)?;
        query.push(" t WHERE 1=1");
        push_filters(&mut query, filters)?;

        let row = query.build().fetch_one(&self.pool).await.map_err(map_db_error)?;
        Ok(row.try_get::<Option<Decimal>, _>("total").unwrap_or(None))
    }

    /// Fetch matching rows as JSON objects, newest-first by default.
    pub async fn find_many(
        &self,
        table: &str,
        filters: Option<&Map<String, Value>>,
        limit: i64,
        order_by: &str,
        ascending: bool,
    ) -> Result<Vec<Value>, AppError> {
        let order_name = validate_identifier(order_by)?;

        let mut query = QueryBuilder::<Postgres>::new("SELECT row_to_json(t) AS row FROM ");
        self.push_table(&mut query, table)?;
        query.push(" t WHERE 1=1");
        push_filters(&mut query, filters)?;

        query.push(" ORDER BY t.").push(order_name);
        if ascending {
            query.push(" ASC");
        } else {
            query.push(" DESC");
        }
        query.push(" LIMIT ").push_bind(limit.clamp(1, 1000));

        let rows = query
            .build()
            .fetch_all(&self.pool)
            .await
            .map_err(map_db_error)?;
        Ok(read_rows(rows))
    }

    fn push_table<'a>(
        &self,
        query: &mut QueryBuilder<'a, Postgres>,
        table: &str,
    ) -> Result<(), AppError> {
        let table_name = validate_table(table)?;
        query.push(self.schema.clone()).push(".").push(table_name);
        Ok(())
    }
}

fn read_rows(rows: Vec<PgRow>) -> Vec<Value> {
    rows.into_iter()
        .filter_map(|row| row.try_get::<Option<Value>, _>("row").ok().flatten())
        .collect()
}

fn validate_table(table: &str) -> Result<&str, AppError> {
    let normalized = validate_identifier(table)?;
    if TENANT_TABLES.contains(&normalized) {
        return Ok(normalized);
    }
    Err(AppError::Forbidden(format!(
        "Table '{normalized}' is not allowed."
    )))
}

pub(crate) fn validate_identifier(identifier: &str) -> Result<&str, AppError> {
    let trimmed = identifier.trim();
    if trimmed.is_empty() {
        return Err(AppError::BadRequest(
            "Identifier cannot be empty.".to_string(),
        ));
    }
    if !trimmed.chars().all(|character| {
        character.is_ascii_lowercase() || character.is_ascii_digit() || character == '_'
    }) {
        return Err(AppError::BadRequest(format!(
            "Invalid identifier '{trimmed}'."
        )));
    }
    if trimmed
        .chars()
        .next()
        .is_some_and(|first| first.is_ascii_digit())
    {
        return Err(AppError::BadRequest(format!(
            "Invalid identifier '{trimmed}'."
        )));
    }
    Ok(trimmed)
}

#[derive(Debug, Clone)]
enum ScalarFilter {
    Text(String),
    Uuid(uuid::Uuid),
    Bool(bool),
    I64(i64),
    F64(f64),
    Date(NaiveDate),
    Timestamp(DateTime<FixedOffset>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FilterOperator {
    Eq,
    Gt,
    Gte,
    Lt,
    Lte,
    In,
    NotIn,
}

/// Filters are keyed `column` or `column__op` with op one of
/// gt/gte/lt/lte/in/not_in. Array values require `in`/`not_in` (a bare
/// array is treated as `in`).
fn parse_filter_key(filter_key: &str) -> Result<(&str, FilterOperator), AppError> {
    if let Some((column, suffix)) = filter_key.rsplit_once("__") {
        let operator = match suffix {
            "gt" => Some(FilterOperator::Gt),
            "gte" => Some(FilterOperator::Gte),
            "lt" => Some(FilterOperator::Lt),
            "lte" => Some(FilterOperator::Lte),
            "in" => Some(FilterOperator::In),
            "not_in" => Some(FilterOperator::NotIn),
            _ => None,
        };
        if let Some(operator) = operator {
            return Ok((validate_identifier(column)?, operator));
        }
    }
    Ok((validate_identifier(filter_key)?, FilterOperator::Eq))
}

fn push_filters(
    query: &mut QueryBuilder<Postgres>,
    filters: Option<&Map<String, Value>>,
) -> Result<(), AppError> {
    let Some(filter_map) = filters else {
        return Ok(());
    };
    for (key, value) in filter_map {
        push_filter_clause(query, key, value)?;
    }
    Ok(())
}

fn push_filter_clause(
    query: &mut QueryBuilder<Postgres>,
    filter_key: &str,
    value: &Value,
) -> Result<(), AppError> {
    let (column, operator) = parse_filter_key(filter_key)?;

    match value {
        Value::Null => Ok(()),
        Value::Array(items) => {
            let negated = match operator {
                FilterOperator::In | FilterOperator::Eq => false,
                FilterOperator::NotIn => true,
                _ => {
                    return Err(AppError::BadRequest(format!(
                        "Filter '{filter_key}' does not support array values."
                    )))
                }
            };
            if items.is_empty() {
                return Ok(());
            }
            push_array_filter(query, column, items, negated);
            Ok(())
        }
        _ => {
            if matches!(operator, FilterOperator::In | FilterOperator::NotIn) {
                return Err(AppError::BadRequest(format!(
                    "Filter '{filter_key}' requires an array value."
                )));
            }
            let filter = infer_scalar_filter(column, value);
            push_scalar_filter(query, column, operator, &filter);
            Ok(())
        }
    }
}

fn push_scalar_filter(
    query: &mut QueryBuilder<Postgres>,
    column: &str,
    operator: FilterOperator,
    value: &ScalarFilter,
) {
    let sql_operator = match operator {
        FilterOperator::Eq => " = ",
        FilterOperator::Gt => " > ",
        FilterOperator::Gte => " >= ",
        FilterOperator::Lt => " < ",
        FilterOperator::Lte => " <= ",
        FilterOperator::In | FilterOperator::NotIn => " = ",
    };

    query.push(" AND t.").push(column);
    match value {
        ScalarFilter::Text(text) => {
            // Cast so enum-typed status columns compare as text
            query
                .push("::text")
                .push(sql_operator)
                .push_bind(text.clone());
        }
        ScalarFilter::Uuid(id) => {
            query.push(sql_operator).push_bind(*id);
        }
        ScalarFilter::Bool(flag) => {
            query.push(sql_operator).push_bind(*flag);
        }
        ScalarFilter::I64(number) => {
            query.push(sql_operator).push_bind(*number);
        }
        ScalarFilter::F64(number) => {
            query.push(sql_operator).push_bind(*number);
        }
        ScalarFilter::Date(date) => {
            query.push(sql_operator).push_bind(*date);
        }
        ScalarFilter::Timestamp(timestamp) => {
            query.push(sql_operator).push_bind(timestamp.to_owned());
        }
    }
}

fn push_array_filter(
    query: &mut QueryBuilder<Postgres>,
    column: &str,
    items: &[Value],
    negated: bool,
) {
    if is_uuid_identifier(column) {
        let parsed = items
            .iter()
            .filter_map(Value::as_str)
            .filter_map(|text| uuid::Uuid::parse_str(text.trim()).ok())
            .collect::<Vec<_>>();
        if parsed.len() == items.len() {
            query.push(" AND ");
            if negated {
                query.push("NOT (");
            }
            query
                .push("t.")
                .push(column)
                .push(" = ANY(")
                .push_bind(parsed)
                .push(")");
            if negated {
                query.push(")");
            }
            return;
        }
    }

    let values = items.iter().map(render_scalar).collect::<Vec<_>>();
    query.push(" AND ");
    if negated {
        query.push("NOT (");
    }
    query
        .push("t.")
        .push(column)
        .push("::text = ANY(")
        .push_bind(values)
        .push(")");
    if negated {
        query.push(")");
    }
}

fn infer_scalar_filter(filter_key: &str, value: &Value) -> ScalarFilter {
    match value {
        Value::Bool(flag) => ScalarFilter::Bool(*flag),
        Value::Number(number) => {
            if let Some(as_i64) = number.as_i64() {
                return ScalarFilter::I64(as_i64);
            }
            if let Some(as_f64) = number.as_f64() {
                return ScalarFilter::F64(as_f64);
            }
            ScalarFilter::Text(number.to_string())
        }
        Value::String(text) => {
            let trimmed = text.trim();
            if is_uuid_identifier(filter_key) {
                if let Ok(parsed) = uuid::Uuid::parse_str(trimmed) {
                    return ScalarFilter::Uuid(parsed);
                }
            }
            if is_timestamp_identifier(filter_key) {
                if let Ok(parsed) = DateTime::parse_from_rfc3339(trimmed) {
                    return ScalarFilter::Timestamp(parsed);
                }
            }
            if is_date_identifier(filter_key) {
                if let Ok(parsed) = NaiveDate::parse_from_str(trimmed, "%Y-%m-%d") {
                    return ScalarFilter::Date(parsed);
                }
            }
            ScalarFilter::Text(text.clone())
        }
        _ => ScalarFilter::Text(render_scalar(value)),
    }
}

fn render_scalar(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(text) => text.clone(),
        Value::Bool(flag) => flag.to_string(),
        Value::Number(number) => number.to_string(),
        Value::Array(_) | Value::Object(_) => value.to_string(),
    }
}

fn is_uuid_identifier(identifier: &str) -> bool {
    let normalized = identifier.trim();
    normalized == "id" || normalized.ends_with("_id")
}

fn is_date_identifier(identifier: &str) -> bool {
    let normalized = identifier.trim();
    normalized.ends_with("_date") || normalized.ends_with("_on")
}

fn is_timestamp_identifier(identifier: &str) -> bool {
    identifier.trim().ends_with("_at")
}

fn map_db_error(error: sqlx::Error) -> AppError {
    let message = error.to_string();
    tracing::error!(db_error = %message, "Tenant store query failed");
    AppError::Dependency("Tenant store operation failed.".to_string())
}

#[cfg(test)]
mod tests {
    use serde_json::{json, Map, Value};
    use sqlx::{Postgres, QueryBuilder};

    use super::{
        parse_filter_key, push_filter_clause, validate_identifier, validate_table, FilterOperator,
    };

    fn filters(entries: &[(&str, Value)]) -> Map<String, Value> {
        entries
            .iter()
            .map(|(key, value)| ((*key).to_string(), value.clone()))
            .collect()
    }

    #[test]
    fn identifier_validation() {
        assert!(validate_identifier("tenant_cj0042").is_ok());
        assert!(validate_identifier("paid_date").is_ok());
        assert!(validate_identifier("1bad").is_err());
        assert!(validate_identifier("Bad-Name").is_err());
        assert!(validate_identifier("drop table").is_err());
        assert!(validate_identifier("").is_err());
    }

    #[test]
    fn table_allowlist_is_enforced() {
        assert!(validate_table("payments").is_ok());
        assert!(validate_table("residential_complexes").is_err());
        assert!(validate_table("pg_catalog").is_err());
    }

    #[test]
    fn filter_keys_parse_operator_suffixes() {
        assert_eq!(
            parse_filter_key("status").unwrap(),
            ("status", FilterOperator::Eq)
        );
        assert_eq!(
            parse_filter_key("paid_date__gte").unwrap(),
            ("paid_date", FilterOperator::Gte)
        );
        assert_eq!(
            parse_filter_key("status__not_in").unwrap(),
            ("status", FilterOperator::NotIn)
        );
        assert!(parse_filter_key("bad column__gte").is_err());
    }

    #[test]
    fn not_in_filter_renders_negated_any() {
        let mut query = QueryBuilder::<Postgres>::new("SELECT COUNT(*) FROM tenant_a.pqrs t WHERE 1=1");
        push_filter_clause(
            &mut query,
            "status__not_in",
            &json!(["RESOLVED", "CLOSED"]),
        )
        .unwrap();
        let sql = query.sql();
        assert!(
            sql.contains("NOT (t.status::text = ANY("),
            "expected negated ANY clause, got: {sql}"
        );
    }

    #[test]
    fn date_range_filters_bind_dates() {
        let mut query =
            QueryBuilder::<Postgres>::new("SELECT SUM(t.amount) FROM tenant_a.payments t WHERE 1=1");
        for (key, value) in filters(&[
            ("status", json!("COMPLETED")),
            ("paid_date__gte", json!("2026-01-01")),
            ("paid_date__lte", json!("2026-01-31")),
        ]) {
            push_filter_clause(&mut query, &key, &value).unwrap();
        }
        let sql = query.sql();
        assert!(sql.contains("t.status::text = "), "got: {sql}");
        assert!(sql.contains("t.paid_date >= "), "got: {sql}");
        assert!(sql.contains("t.paid_date <= "), "got: {sql}");
    }

    #[test]
    fn scalar_filters_reject_in_operator() {
        let mut query = QueryBuilder::<Postgres>::new("SELECT 1 WHERE 1=1");
        assert!(push_filter_clause(&mut query, "status__in", &json!("PENDING")).is_err());
    }

    #[test]
    fn empty_array_filters_are_dropped() {
        let mut query = QueryBuilder::<Postgres>::new("SELECT 1 WHERE 1=1");
        push_filter_clause(&mut query, "status__in", &json!([])).unwrap();
        assert_eq!(query.sql(), "SELECT 1 WHERE 1=1");
    }
}
