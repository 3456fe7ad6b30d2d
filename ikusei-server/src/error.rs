//! API errors rendered as the `{success: false, error}` envelope.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::{json, Value};
use thiserror::Error;

use ikusei_core::{IkuseiError, StoreError};
use ikusei_ingest::IngestError;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    Validation(String),

    #[error("{message}")]
    Auth { message: String, mfa_required: bool },

    #[error("{0}")]
    Forbidden(String),

    #[error("{0}")]
    NotFound(String),

    #[error("Method not allowed")]
    MethodNotAllowed,

    /// `details` is only rendered in development.
    #[error("{message}")]
    Internal {
        message: String,
        details: Option<String>,
    },
}

impl ApiError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn auth(msg: impl Into<String>) -> Self {
        Self::Auth {
            message: msg.into(),
            mfa_required: false,
        }
    }

    pub fn mfa_required() -> Self {
        Self::Auth {
            message: ikusei_core::auth::MSG_MFA_REQUIRED.to_string(),
            mfa_required: true,
        }
    }

    pub fn forbidden() -> Self {
        Self::Forbidden("Access denied".to_string())
    }

    pub fn internal(details: impl std::fmt::Display) -> Self {
        Self::Internal {
            message: "Internal server error".to_string(),
            details: Some(details.to_string()),
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Validation(_) => StatusCode::BAD_REQUEST,
            ApiError::Auth { .. } => StatusCode::UNAUTHORIZED,
            ApiError::Forbidden(_) => StatusCode::FORBIDDEN,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::MethodNotAllowed => StatusCode::METHOD_NOT_ALLOWED,
            ApiError::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Drop internal details unless running in development.
    pub fn redact(self, development: bool) -> Self {
        match self {
            ApiError::Internal { message, .. } if !development => ApiError::Internal {
                message,
                details: None,
            },
            other => other,
        }
    }

    pub fn body(&self) -> Value {
        let mut body = json!({
            "success": false,
            "error": self.to_string(),
        });
        match self {
            ApiError::Auth {
                mfa_required: true, ..
            } => {
                body["mfa_required"] = Value::Bool(true);
            }
            ApiError::Internal {
                details: Some(details),
                ..
            } => {
                body["details"] = Value::String(details.clone());
            }
            _ => {}
        }
        body
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status(), Json(self.body())).into_response()
    }
}

impl From<StoreError> for ApiError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound(msg) => ApiError::NotFound(msg),
            StoreError::Conflict(msg) | StoreError::Immutable(msg) => ApiError::Validation(msg),
            other => ApiError::internal(other),
        }
    }
}

impl From<IkuseiError> for ApiError {
    fn from(e: IkuseiError) -> Self {
        match e {
            IkuseiError::Validation(msg) => ApiError::Validation(msg),
            IkuseiError::Auth(msg) => ApiError::auth(msg),
            IkuseiError::NotFound(msg) => ApiError::NotFound(msg),
            IkuseiError::Store(e) => e.into(),
            other => ApiError::internal(other),
        }
    }
}

impl From<IngestError> for ApiError {
    fn from(e: IngestError) -> Self {
        ApiError::Validation(e.to_string())
    }
}

impl From<serde_json::Error> for ApiError {
    fn from(e: serde_json::Error) -> Self {
        ApiError::internal(e)
    }
}

impl From<std::io::Error> for ApiError {
    fn from(e: std::io::Error) -> Self {
        ApiError::internal(e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes() {
        assert_eq!(ApiError::validation("x").status(), StatusCode::BAD_REQUEST);
        assert_eq!(ApiError::mfa_required().status(), StatusCode::UNAUTHORIZED);
        assert_eq!(ApiError::forbidden().status(), StatusCode::FORBIDDEN);
        assert_eq!(ApiError::not_found("x").status(), StatusCode::NOT_FOUND);
        assert_eq!(ApiError::MethodNotAllowed.status(), StatusCode::METHOD_NOT_ALLOWED);
        assert_eq!(ApiError::internal("boom").status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn test_mfa_body() {
        let body = ApiError::mfa_required().body();
        assert_eq!(body["success"], false);
        assert_eq!(body["mfa_required"], true);
        assert_eq!(body["error"], "MFA code or backup code is required");
    }

    #[test]
    fn test_internal_details_only_in_development() {
        let dev = ApiError::internal("pool timed out").redact(true).body();
        assert_eq!(dev["details"], "pool timed out");
        assert_eq!(dev["error"], "Internal server error");

        let prod = ApiError::internal("pool timed out").redact(false).body();
        assert!(prod.get("details").is_none());
    }

    #[test]
    fn test_store_error_mapping() {
        let e: ApiError = StoreError::not_found("Worker").into();
        assert!(matches!(e, ApiError::NotFound(ref m) if m == "Worker not found"));

        let e: ApiError = StoreError::Immutable("ended".into()).into();
        assert_eq!(e.status(), StatusCode::BAD_REQUEST);

        let e: ApiError = StoreError::Backend("down".into()).into();
        assert_eq!(e.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
