// src/api/error.rs
// Error responses for the HTTP surface

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use std::fmt;
use tracing::error;

use crate::error::RelayError;

/// Standard API error response format
#[derive(Debug)]
pub struct ApiError {
    pub message: String,
    pub status_code: StatusCode,
    pub error_code: Option<String>,
}

impl ApiError {
    pub fn internal(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            status_code: StatusCode::INTERNAL_SERVER_ERROR,
            error_code: Some("INTERNAL_ERROR".to_string()),
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            status_code: StatusCode::BAD_REQUEST,
            error_code: Some("BAD_REQUEST".to_string()),
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            status_code: StatusCode::NOT_FOUND,
            error_code: Some("NOT_FOUND".to_string()),
        }
    }

    pub fn gone(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            status_code: StatusCode::GONE,
            error_code: Some("GONE".to_string()),
        }
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            status_code: StatusCode::FORBIDDEN,
            error_code: Some("FORBIDDEN".to_string()),
        }
    }
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for ApiError {}

impl From<RelayError> for ApiError {
    fn from(err: RelayError) -> Self {
        match &err {
            RelayError::NotFound(_) => ApiError::not_found(err.to_string()),
            RelayError::Delivery(_) => ApiError::gone(err.to_string()),
            RelayError::InvalidInput(_) | RelayError::InvalidReference(_) | RelayError::InvalidId(_) => {
                ApiError::bad_request(err.to_string())
            }
            _ => {
                error!("Request failed: {}", err);
                ApiError::internal(err.to_string())
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let mut response_json = json!({
            "error": true,
            "message": self.message,
            "status": self.status_code.as_u16()
        });

        if let Some(error_code) = self.error_code {
            response_json["error_code"] = json!(error_code);
        }

        (self.status_code, Json(response_json)).into_response()
    }
}

pub type ApiResult<T> = Result<T, ApiError>;

/// Option to 404, for lookups by id
pub trait IntoApiErrorOption<T> {
    fn ok_or_not_found(self, message: &str) -> Result<T, ApiError>;
}

impl<T> IntoApiErrorOption<T> for Option<T> {
    fn ok_or_not_found(self, message: &str) -> Result<T, ApiError> {
        self.ok_or_else(|| ApiError::not_found(message))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        let e: ApiError = RelayError::NotFound("function x".into()).into();
        assert_eq!(e.status_code, StatusCode::NOT_FOUND);

        let e: ApiError = RelayError::Delivery("disconnected device d-1".into()).into();
        assert_eq!(e.status_code, StatusCode::GONE);

        let e: ApiError = RelayError::InvalidReference("alpine".into()).into();
        assert_eq!(e.status_code, StatusCode::BAD_REQUEST);

        let e: ApiError = RelayError::Runtime("daemon down".into()).into();
        assert_eq!(e.status_code, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(e.error_code.as_deref(), Some("INTERNAL_ERROR"));
    }

    #[test]
    fn test_option_to_not_found() {
        let missing: Option<u8> = None;
        let err = missing.ok_or_not_found("run log not found").unwrap_err();
        assert_eq!(err.message, "run log not found");
    }
}
