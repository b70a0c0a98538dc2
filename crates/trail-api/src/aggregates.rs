//! Handlers for `/aggregates/:id/...` endpoints.

use std::sync::Arc;

use axum::{
  Json,
  extract::{Path, State},
};
use trail_core::{event::PersistedEvent, state::State as AggregateState, store::EventStore};
use uuid::Uuid;

use crate::error::ApiError;

/// `GET /aggregates/:id/state`: the projected current state.
pub async fn state<S: EventStore>(
  State(store): State<Arc<S>>,
  Path(aggregate_id): Path<Uuid>,
) -> Result<Json<AggregateState>, ApiError> {
  let state = store
    .read_state(aggregate_id)
    .await
    .map_err(ApiError::from_store)?
    .ok_or_else(|| ApiError::NotFound(format!("aggregate {aggregate_id} has no state")))?;
  Ok(Json(state))
}

/// `GET /aggregates/:id/events`: the full log in sequence order. Empty for
/// an unknown aggregate.
pub async fn events<S: EventStore>(
  State(store): State<Arc<S>>,
  Path(aggregate_id): Path<Uuid>,
) -> Result<Json<Vec<PersistedEvent>>, ApiError> {
  let events = store
    .list_events(aggregate_id)
    .await
    .map_err(ApiError::from_store)?;
  Ok(Json(events))
}
