//! services/api/src/error.rs
//!
//! Defines the primary error type for the entire API service and how it is
//! rendered to HTTP clients.
//!
//! Every failure leaves the server as `{ "error": { "code", "message" } }`.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use scribe_market_core::{MarketError, PortError};
use serde::Serialize;
use tracing::error;
use utoipa::ToSchema;

use crate::config::ConfigError;

/// The primary error type for the `api` service.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// Represents an error that occurred during configuration loading.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// A workflow operation refused or failed.
    #[error(transparent)]
    Market(#[from] MarketError),

    /// Represents an error that propagated up from one of the core service ports.
    #[error("Service Port Error: {0}")]
    Port(#[from] PortError),

    /// Represents an error from the underlying database library.
    #[error("Database Error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration Error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// Represents a standard Input/Output error (e.g., binding to a network socket).
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// No valid session cookie accompanied the request.
    #[error("Authentication required")]
    Unauthenticated,

    /// The request body or path could not be understood.
    #[error("Bad request: {0}")]
    BadRequest(String),

    /// A catch-all for any other unexpected errors.
    #[error("An unexpected internal error occurred: {0}")]
    Internal(String),
}

/// The inner error object in the response.
#[derive(Debug, Serialize, ToSchema)]
pub struct ErrorBody {
    /// Machine-readable error code.
    pub code: String,
    /// Human-readable error message.
    pub message: String,
}

/// The full error response envelope.
#[derive(Debug, Serialize, ToSchema)]
pub struct ErrorResponse {
    pub error: ErrorBody,
}

impl ApiError {
    /// The status and machine-readable code this error is reported with.
    pub fn classify(&self) -> (StatusCode, &'static str) {
        match self {
            ApiError::Market(err) => classify_market(err),
            ApiError::Port(PortError::NotFound(_)) => (StatusCode::NOT_FOUND, "not_found"),
            ApiError::Port(PortError::Conflict(_)) => (StatusCode::CONFLICT, "conflict"),
            ApiError::Port(PortError::LimitReached(_)) => {
                (StatusCode::BAD_REQUEST, "validation_error")
            }
            ApiError::Port(PortError::Unauthorized) | ApiError::Unauthenticated => {
                (StatusCode::UNAUTHORIZED, "unauthorized")
            }
            ApiError::BadRequest(_) => (StatusCode::BAD_REQUEST, "bad_request"),
            _ => (StatusCode::INTERNAL_SERVER_ERROR, "internal_error"),
        }
    }
}

fn classify_market(err: &MarketError) -> (StatusCode, &'static str) {
    match err {
        MarketError::Validation(_) => (StatusCode::BAD_REQUEST, "validation_error"),
        MarketError::Authorization(_) => (StatusCode::FORBIDDEN, "forbidden"),
        MarketError::NotFound(_) => (StatusCode::NOT_FOUND, "not_found"),
        MarketError::Conflict(_) => (StatusCode::CONFLICT, "conflict"),
        MarketError::Expired(_) => (StatusCode::GONE, "expired"),
        MarketError::Port(_) => (StatusCode::INTERNAL_SERVER_ERROR, "internal_error"),
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code) = self.classify();
        let message = if status.is_server_error() {
            error!("Request failed: {:?}", self);
            "An internal error occurred".to_string()
        } else {
            match &self {
                ApiError::Market(MarketError::Validation(m))
                | ApiError::Market(MarketError::Authorization(m))
                | ApiError::Market(MarketError::NotFound(m))
                | ApiError::Market(MarketError::Conflict(m))
                | ApiError::Port(PortError::NotFound(m))
                | ApiError::Port(PortError::Conflict(m))
                | ApiError::Port(PortError::LimitReached(m))
                | ApiError::BadRequest(m) => m.clone(),
                other => other.to_string(),
            }
        };
        let body = ErrorResponse {
            error: ErrorBody {
                code: code.to_string(),
                message,
            },
        };
        (status, Json(body)).into_response()
    }
}

pub type ApiResult<T> = Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn market_errors_map_to_statuses() {
        let cases = [
            (MarketError::Validation("x".into()), StatusCode::BAD_REQUEST),
            (MarketError::Authorization("x".into()), StatusCode::FORBIDDEN),
            (MarketError::NotFound("x".into()), StatusCode::NOT_FOUND),
            (MarketError::Conflict("x".into()), StatusCode::CONFLICT),
            (MarketError::Expired(Uuid::new_v4()), StatusCode::GONE),
            (
                MarketError::Port(PortError::Unexpected("db".into())),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];
        for (err, status) in cases {
            assert_eq!(ApiError::from(err).classify().0, status);
        }
    }

    #[test]
    fn missing_session_is_unauthorized() {
        assert_eq!(ApiError::Unauthenticated.classify().0, StatusCode::UNAUTHORIZED);
        assert_eq!(
            ApiError::Port(PortError::Unauthorized).into_response().status(),
            StatusCode::UNAUTHORIZED
        );
    }

    async fn body_json(response: Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn envelope_keeps_domain_message() {
        let response =
            ApiError::from(MarketError::Conflict("already assigned".into())).into_response();
        assert_eq!(response.status(), StatusCode::CONFLICT);
        let body = body_json(response).await;
        assert_eq!(body["error"]["code"], "conflict");
        assert_eq!(body["error"]["message"], "already assigned");
    }

    #[tokio::test]
    async fn internal_details_are_hidden() {
        let response = ApiError::Internal("pool exhausted".into()).into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body = body_json(response).await;
        assert_eq!(body["error"]["code"], "internal_error");
        assert_eq!(body["error"]["message"], "An internal error occurred");
    }
}
