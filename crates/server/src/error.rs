use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;

use crate::protocol::anthropic;

/// Result alias for OpenAI-dialect handlers.
pub type ApiResult<T> = std::result::Result<T, ApiError>;

/// Result alias for Anthropic-dialect handlers.
pub type AnthropicResult<T> = std::result::Result<T, AnthropicApiError>;

/// An inference error dressed for the OpenAI dialect.
#[derive(Debug)]
pub struct ApiError(pub inference::Error);

impl ApiError {
    fn status_code(&self) -> StatusCode {
        match &self.0 {
            inference::Error::InvalidInput(_) => StatusCode::BAD_REQUEST,
            inference::Error::NotReady => StatusCode::SERVICE_UNAVAILABLE,
            // Closest standard expression of "client went away".
            inference::Error::Cancelled => StatusCode::from_u16(499).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR),
            inference::Error::ContextOverflow { .. }
            | inference::Error::Memory(_)
            | inference::Error::Transient(_)
            | inference::Error::Unknown(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_type(&self) -> &'static str {
        match &self.0 {
            inference::Error::InvalidInput(_) => "invalid_request_error",
            _ => "server_error",
        }
    }
}

impl From<inference::Error> for ApiError {
    fn from(error: inference::Error) -> Self {
        Self(error)
    }
}

impl From<harmony::HarmonyError> for ApiError {
    fn from(error: harmony::HarmonyError) -> Self {
        Self(error.into())
    }
}

/// Error envelope compatible with the OpenAI API.
#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: ErrorBody,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    message: String,
    r#type: String,
    code: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();

        log::debug!("request failed with {status}: {}", self.0);

        let body = ErrorResponse {
            error: ErrorBody {
                message: self.0.to_string(),
                r#type: self.error_type().to_string(),
                code: self.0.code().to_string(),
            },
        };

        (status, Json(body)).into_response()
    }
}

/// An inference error dressed for the Anthropic dialect.
#[derive(Debug)]
pub struct AnthropicApiError(pub inference::Error);

impl From<inference::Error> for AnthropicApiError {
    fn from(error: inference::Error) -> Self {
        Self(error)
    }
}

impl From<harmony::HarmonyError> for AnthropicApiError {
    fn from(error: harmony::HarmonyError) -> Self {
        Self(error.into())
    }
}

/// Error envelope in the Anthropic format.
#[derive(Debug, Serialize)]
struct AnthropicErrorResponse {
    r#type: String,
    error: anthropic::ErrorDetails,
}

impl IntoResponse for AnthropicApiError {
    fn into_response(self) -> Response {
        let inner = ApiError(self.0);
        let status = inner.status_code();

        let error_type = match &inner.0 {
            inference::Error::InvalidInput(_) => "invalid_request_error",
            inference::Error::NotReady | inference::Error::Transient(_) => "overloaded_error",
            _ => "api_error",
        };

        let body = AnthropicErrorResponse {
            r#type: "error".to_string(),
            error: anthropic::ErrorDetails {
                error_type: error_type.to_string(),
                message: inner.0.to_string(),
            },
        };

        (status, Json(body)).into_response()
    }
}
