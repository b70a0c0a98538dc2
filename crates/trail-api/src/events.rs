//! Handlers for `/events` and `/validate`.
//!
//! | Method | Path | Notes |
//! |--------|------|-------|
//! | `POST` | `/events` | Body: [`SubmitBody`]; 201 applied or converged, 202 conflicted |
//! | `GET`  | `/events/:event_id` | 404 if not found |
//! | `POST` | `/validate` | Body: [`ValidateBody`]; runs the validator only |

use std::sync::Arc;

use axum::{
  Json,
  extract::{Path, State},
  http::StatusCode,
  response::IntoResponse,
};
use serde::Deserialize;
use serde_json::{Value, json};
use trail_core::{
  event::{CandidateEvent, PersistedEvent},
  store::EventStore,
  validate,
};
use uuid::Uuid;

use crate::{
  attribution::{AttributionBody, SourceIp},
  error::ApiError,
};

// ─── Submit ──────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct SubmitBody {
  /// Idempotency key chosen by the device. Generated when absent, in which
  /// case a retry appends a second event.
  pub event_id:       Option<Uuid>,
  pub aggregate_id:   Uuid,
  pub versioned_type: String,
  pub payload:        Value,
  pub attribution:    AttributionBody,
  /// The aggregate version the device last saw.
  pub base_version:   Option<u64>,
}

/// `POST /events`
pub async fn submit<S: EventStore>(
  State(store): State<Arc<S>>,
  source_ip: SourceIp,
  Json(body): Json<SubmitBody>,
) -> Result<impl IntoResponse, ApiError> {
  let event = CandidateEvent {
    event_id:       body.event_id.unwrap_or_else(Uuid::new_v4),
    aggregate_id:   body.aggregate_id,
    versioned_type: body.versioned_type,
    payload:        body.payload,
    attribution:    body.attribution.observed_from(source_ip),
    base_version:   body.base_version,
  };

  let receipt = store.submit(event).await.map_err(ApiError::from_store)?;
  let status = if receipt.projection.is_conflicted() {
    StatusCode::ACCEPTED
  } else {
    StatusCode::CREATED
  };
  Ok((status, Json(receipt)))
}

// ─── Get one ─────────────────────────────────────────────────────────────────

/// `GET /events/:event_id`
pub async fn get_one<S: EventStore>(
  State(store): State<Arc<S>>,
  Path(event_id): Path<Uuid>,
) -> Result<Json<PersistedEvent>, ApiError> {
  let event = store
    .get_event(event_id)
    .await
    .map_err(ApiError::from_store)?
    .ok_or_else(|| ApiError::NotFound(format!("event {event_id} not found")))?;
  Ok(Json(event))
}

// ─── Validate ────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct ValidateBody {
  pub versioned_type: String,
  pub payload:        Value,
}

/// `POST /validate`: the same rules as `POST /events`, without persisting.
pub async fn validate_only(Json(body): Json<ValidateBody>) -> Result<Json<Value>, ApiError> {
  validate::validate(&body.versioned_type, &body.payload)?;
  Ok(Json(json!({ "valid": true })))
}
