use axum::http::HeaderMap;

use crate::error::AppError;
use crate::state::AppState;

const ADMIN_KEY_HEADER: &str = "x-admin-key";

/// Require the platform admin API key on admin/portfolio endpoints.
///
/// Full user authentication lives in the gateway in front of this service;
/// this guard only protects the cross-tenant surface from direct access.
pub fn require_admin_key(state: &AppState, headers: &HeaderMap) -> Result<(), AppError> {
    if state.config.auth_dev_overrides_enabled() {
        return Ok(());
    }

    let Some(expected) = state.config.admin_api_key.as_deref() else {
        return Err(AppError::Dependency(
            "Admin access is not configured. Set ADMIN_API_KEY.".to_string(),
        ));
    };

    let provided = headers
        .get(ADMIN_KEY_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .unwrap_or_default();

    if provided.is_empty() {
        return Err(AppError::Unauthorized(
            "Missing admin API key.".to_string(),
        ));
    }
    if provided != expected {
        return Err(AppError::Forbidden("Invalid admin API key.".to_string()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::require_admin_key;
    use crate::config::AppConfig;
    use crate::state::AppState;
    use axum::http::{HeaderMap, HeaderValue};

    fn state_with_key(key: Option<&str>) -> AppState {
        let mut config = AppConfig::from_env();
        config.environment = "production".to_string();
        config.admin_api_key = key.map(ToOwned::to_owned);
        config.database_url = None;
        AppState::build(config).expect("state builds")
    }

    #[test]
    fn rejects_missing_and_wrong_key() {
        let state = state_with_key(Some("secret"));

        let empty = HeaderMap::new();
        assert!(require_admin_key(&state, &empty).is_err());

        let mut wrong = HeaderMap::new();
        wrong.insert("x-admin-key", HeaderValue::from_static("nope"));
        assert!(require_admin_key(&state, &wrong).is_err());
    }

    #[test]
    fn accepts_matching_key() {
        let state = state_with_key(Some("secret"));
        let mut headers = HeaderMap::new();
        headers.insert("x-admin-key", HeaderValue::from_static("secret"));
        assert!(require_admin_key(&state, &headers).is_ok());
    }

    #[test]
    fn unconfigured_key_is_a_dependency_error() {
        let state = state_with_key(None);
        let headers = HeaderMap::new();
        assert!(require_admin_key(&state, &headers).is_err());
    }
}
