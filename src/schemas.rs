use chrono::NaiveDate;
use serde::Deserialize;
use validator::Validate;

use crate::error::{AppError, AppResult};

pub fn validate_input<T: Validate>(input: &T) -> Result<(), AppError> {
    input
        .validate()
        .map_err(|errors| AppError::UnprocessableEntity(format!("Validation failed: {errors}")))
}

fn default_recent_limit() -> i64 {
    5
}

/// Inclusive reporting window, accepted as `?startDate=YYYY-MM-DD&endDate=...`
/// on GET requests or as a JSON body on POST.
#[derive(Debug, Clone, Deserialize, serde::Serialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct PeriodQuery {
    #[validate(length(min = 1, max = 32))]
    pub start_date: String,
    #[validate(length(min = 1, max = 32))]
    pub end_date: String,
}

#[derive(Debug, Clone, Copy)]
pub struct PeriodRange {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl PeriodQuery {
    /// Validate and parse the window. Runs before any per-tenant fan-out so a
    /// malformed range never costs a registry read.
    pub fn parse(&self) -> AppResult<PeriodRange> {
        validate_input(self)?;
        let start = parse_iso_date(&self.start_date)?;
        let end = parse_iso_date(&self.end_date)?;
        if end < start {
            return Err(AppError::BadRequest(
                "endDate must not precede startDate.".to_string(),
            ));
        }
        Ok(PeriodRange { start, end })
    }
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct RecentTransactionsQuery {
    #[serde(default = "default_recent_limit")]
    #[validate(range(min = 1, max = 50))]
    pub limit: i64,
}

pub fn parse_iso_date(value: &str) -> AppResult<NaiveDate> {
    NaiveDate::parse_from_str(value.trim(), "%Y-%m-%d")
        .map_err(|_| AppError::BadRequest("Invalid ISO date.".to_string()))
}

pub fn clamp_limit_in_range(limit: i64, minimum: i64, maximum: i64) -> i64 {
    limit.clamp(minimum, maximum)
}

#[cfg(test)]
mod tests {
    use super::{parse_iso_date, PeriodQuery};

    #[test]
    fn parses_valid_period() {
        let query = PeriodQuery {
            start_date: "2026-01-01".to_string(),
            end_date: "2026-01-31".to_string(),
        };
        let range = query.parse().expect("valid range");
        assert_eq!(range.start.to_string(), "2026-01-01");
        assert_eq!(range.end.to_string(), "2026-01-31");
    }

    #[test]
    fn rejects_inverted_period() {
        let query = PeriodQuery {
            start_date: "2026-02-01".to_string(),
            end_date: "2026-01-01".to_string(),
        };
        assert!(query.parse().is_err());
    }

    #[test]
    fn rejects_malformed_dates() {
        assert!(parse_iso_date("01/02/2026").is_err());
        assert!(parse_iso_date("2026-13-01").is_err());
        assert!(parse_iso_date("").is_err());
        assert!(parse_iso_date(" 2026-01-05 ").is_ok());
    }
}
