//! Error taxonomy for the risk pipeline and HTTP API (spec.md §7).

use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use chrono::Utc;
use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RiskError {
    #[error("validation error: {0}")]
    Validation(String),

    #[error("decode error: {0}")]
    Decode(String),

    #[error("compute error: {0}")]
    Compute(String),

    #[error("cache error: {0}")]
    Cache(#[from] redis::RedisError),

    #[error("message bus error: {0}")]
    Bus(#[from] rdkafka::error::KafkaError),

    #[error("portfolio not found: {0}")]
    NotFound(String),

    #[error("cache unavailable")]
    CacheUnavailable,

    #[error("message bus unavailable")]
    BusUnavailable,
}

#[derive(Serialize)]
struct ErrorEnvelope {
    error: String,
    detail: Option<String>,
    timestamp: String,
}

impl IntoResponse for RiskError {
    fn into_response(self) -> Response {
        let (status, error, detail) = match &self {
            RiskError::Validation(msg) => {
                (StatusCode::BAD_REQUEST, "validation_error", Some(msg.clone()))
            }
            RiskError::Decode(msg) => (StatusCode::BAD_REQUEST, "decode_error", Some(msg.clone())),
            RiskError::NotFound(id) => (
                StatusCode::NOT_FOUND,
                "not_found",
                Some(format!("no risk data found for portfolio {id}")),
            ),
            RiskError::Cache(e) => (
                StatusCode::SERVICE_UNAVAILABLE,
                "cache_unavailable",
                Some(e.to_string()),
            ),
            RiskError::CacheUnavailable => {
                (StatusCode::SERVICE_UNAVAILABLE, "cache_unavailable", None)
            }
            RiskError::Bus(e) => (
                StatusCode::SERVICE_UNAVAILABLE,
                "bus_unavailable",
                Some(e.to_string()),
            ),
            RiskError::BusUnavailable => {
                (StatusCode::SERVICE_UNAVAILABLE, "bus_unavailable", None)
            }
            RiskError::Compute(msg) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "compute_error", Some(msg.clone()))
            }
        };

        let body = ErrorEnvelope {
            error: error.to_string(),
            detail,
            timestamp: Utc::now().to_rfc3339(),
        };

        (status, Json(body)).into_response()
    }
}
