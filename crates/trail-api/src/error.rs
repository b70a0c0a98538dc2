//! API error type and [`axum::response::IntoResponse`] implementation.

use axum::{
  Json,
  http::StatusCode,
  response::{IntoResponse, Response},
};
use serde_json::json;
use thiserror::Error;
use trail_core::{
  ValidationError,
  audit::TamperFinding,
  store::{ErrorClass, StoreError},
};

/// An error returned by an API handler.
#[derive(Debug, Error)]
pub enum ApiError {
  #[error("not found: {0}")]
  NotFound(String),

  #[error("bad request: {0}")]
  BadRequest(String),

  /// The submission failed validation; nothing was persisted.
  #[error("{0}")]
  Invalid(ValidationError),

  /// Unknown type, unsupported version or another rejection without a
  /// single offending field.
  #[error("{0}")]
  Unprocessable(String),

  /// A race, reused idempotency key or illegal conflict transition.
  #[error("{0}")]
  Conflict(String),

  #[error("{0}")]
  Tamper(TamperFinding),

  #[error("storage unavailable: {0}")]
  Unavailable(String),

  #[error("store error: {0}")]
  Store(#[source] Box<dyn std::error::Error + Send + Sync>),
}

impl ApiError {
  /// Classify a backend error without knowing the backend.
  pub fn from_store<E: StoreError>(err: E) -> Self {
    match err.class() {
      ErrorClass::Validation => match err.validation() {
        Some(v) => Self::Invalid(v.clone()),
        None => Self::Unprocessable(err.to_string()),
      },
      ErrorClass::NotFound => Self::NotFound(err.to_string()),
      ErrorClass::Conflict => Self::Conflict(err.to_string()),
      ErrorClass::Tamper => match err.tamper() {
        Some(finding) => Self::Tamper(finding.clone()),
        None => Self::Conflict(err.to_string()),
      },
      ErrorClass::Unavailable => Self::Unavailable(err.to_string()),
      ErrorClass::Internal => Self::Store(Box::new(err)),
    }
  }
}

impl From<trail_core::Error> for ApiError {
  fn from(err: trail_core::Error) -> Self { Self::from_store(err) }
}

impl IntoResponse for ApiError {
  fn into_response(self) -> Response {
    let (status, body) = match &self {
      ApiError::NotFound(m) => (StatusCode::NOT_FOUND, json!({ "error": m })),
      ApiError::BadRequest(m) => (StatusCode::BAD_REQUEST, json!({ "error": m })),
      ApiError::Invalid(v) => (
        StatusCode::UNPROCESSABLE_ENTITY,
        json!({ "error": "validation failed", "field": v.field, "reason": v.reason }),
      ),
      ApiError::Unprocessable(m) => (StatusCode::UNPROCESSABLE_ENTITY, json!({ "error": m })),
      ApiError::Conflict(m) => (StatusCode::CONFLICT, json!({ "error": m })),
      ApiError::Tamper(finding) => (
        StatusCode::CONFLICT,
        json!({ "error": finding.to_string(), "finding": finding }),
      ),
      ApiError::Unavailable(m) => (StatusCode::SERVICE_UNAVAILABLE, json!({ "error": m })),
      ApiError::Store(e) => {
        tracing::error!(error = %e, "store error");
        (StatusCode::INTERNAL_SERVER_ERROR, json!({ "error": e.to_string() }))
      }
    };
    (status, Json(body)).into_response()
  }
}
