//! HTTP error mapping: every failure surfaces as `{error, kind}` JSON with
//! a 4xx/5xx status.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use ransomeye_bundle::BundleError;
use ransomeye_registry::RegistryError;
use ransomeye_validator::ValidatorError;
use serde_json::json;

#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub kind: String,
    pub message: String,
}

impl ApiError {
    pub fn new(status: StatusCode, kind: &str, message: impl Into<String>) -> Self {
        Self {
            status,
            kind: kind.to_string(),
            message: message.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, "internal_error", message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, "not_found", message)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = Json(json!({
            "error": self.message,
            "kind": self.kind,
        }));
        (self.status, body).into_response()
    }
}

impl From<RegistryError> for ApiError {
    fn from(e: RegistryError) -> Self {
        let status = match &e {
            RegistryError::UnknownId(_) => StatusCode::NOT_FOUND,
            RegistryError::ActiveDelete(_) | RegistryError::DuplicateHash(_) => {
                StatusCode::CONFLICT
            }
            RegistryError::Database(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        ApiError::new(status, e.kind(), e.to_string())
    }
}

impl From<BundleError> for ApiError {
    fn from(e: BundleError) -> Self {
        let status = match &e {
            BundleError::Io(_) | BundleError::Crypto(_) => StatusCode::INTERNAL_SERVER_ERROR,
            BundleError::SizeExceeded(_) => StatusCode::PAYLOAD_TOO_LARGE,
            _ => StatusCode::BAD_REQUEST,
        };
        ApiError::new(status, e.kind(), e.to_string())
    }
}

impl From<ValidatorError> for ApiError {
    fn from(e: ValidatorError) -> Self {
        let status = match &e {
            ValidatorError::RunNotFound(_) => StatusCode::NOT_FOUND,
            ValidatorError::TimedOut { .. } => StatusCode::GATEWAY_TIMEOUT,
            ValidatorError::ScenarioFailed { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        ApiError::new(status, e.kind(), e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_error_statuses() {
        let e: ApiError = RegistryError::UnknownId("x".into()).into();
        assert_eq!(e.status, StatusCode::NOT_FOUND);
        assert_eq!(e.kind, "unknown_id");

        let e: ApiError = RegistryError::ActiveDelete("x".into()).into();
        assert_eq!(e.status, StatusCode::CONFLICT);
    }

    #[test]
    fn test_bundle_error_statuses() {
        let e: ApiError = BundleError::MissingManifest.into();
        assert_eq!(e.status, StatusCode::BAD_REQUEST);
        assert_eq!(e.kind, "missing_manifest");

        let e: ApiError = BundleError::SizeExceeded("too big".into()).into();
        assert_eq!(e.status, StatusCode::PAYLOAD_TOO_LARGE);
    }

    #[test]
    fn test_validator_error_statuses() {
        let e: ApiError = ValidatorError::RunNotFound("r".into()).into();
        assert_eq!(e.status, StatusCode::NOT_FOUND);

        let e: ApiError = ValidatorError::ScenarioFailed { run_id: "r".into() }.into();
        assert_eq!(e.status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(e.kind, "scenario_failed");
    }
}
