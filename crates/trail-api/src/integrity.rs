//! Handlers for `/integrity` endpoints.
//!
//! A tampered chain answers 409 with the finding. The sweep over all
//! aggregates always answers 200; its `tampered` list says what failed.

use std::sync::Arc;

use axum::{
  Json,
  extract::{Path, State},
};
use trail_core::{
  audit::{IntegritySummary, VerificationReport},
  store::EventStore,
};
use uuid::Uuid;

use crate::error::ApiError;

/// `GET /integrity/:aggregate_id`
pub async fn verify_one<S: EventStore>(
  State(store): State<Arc<S>>,
  Path(aggregate_id): Path<Uuid>,
) -> Result<Json<VerificationReport>, ApiError> {
  let report = store
    .verify_chain(aggregate_id)
    .await
    .map_err(ApiError::from_store)?;
  Ok(Json(report))
}

/// `GET /integrity`
pub async fn verify_all<S: EventStore>(
  State(store): State<Arc<S>>,
) -> Result<Json<IntegritySummary>, ApiError> {
  let summary = store.verify_all().await.map_err(ApiError::from_store)?;
  Ok(Json(summary))
}
