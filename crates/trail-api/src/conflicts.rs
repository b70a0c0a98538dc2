//! Handlers for `/conflicts` endpoints.
//!
//! | Method | Path | Notes |
//! |--------|------|-------|
//! | `GET`  | `/conflicts` | Optional `?aggregate_id=<id>&status=open\|resolved` |
//! | `GET`  | `/conflicts/:id` | 404 if not found |
//! | `POST` | `/conflicts/:id/resolve` | Body: [`ResolveBody`] |

use std::sync::Arc;

use axum::{
  Json,
  extract::{Path, Query, State},
};
use serde::Deserialize;
use trail_core::{
  conflict::{Conflict, ConflictFilter, Resolution, ResolutionRequest, ResolvedState},
  store::EventStore,
};
use uuid::Uuid;

use crate::{
  attribution::{AttributionBody, SourceIp},
  error::ApiError,
};

/// `GET /conflicts[?aggregate_id=<id>][&status=<status>]`
pub async fn list<S: EventStore>(
  State(store): State<Arc<S>>,
  Query(filter): Query<ConflictFilter>,
) -> Result<Json<Vec<Conflict>>, ApiError> {
  let conflicts = store
    .list_conflicts(&filter)
    .await
    .map_err(ApiError::from_store)?;
  Ok(Json(conflicts))
}

/// `GET /conflicts/:id`
pub async fn get_one<S: EventStore>(
  State(store): State<Arc<S>>,
  Path(conflict_id): Path<Uuid>,
) -> Result<Json<Conflict>, ApiError> {
  let conflict = store
    .get_conflict(conflict_id)
    .await
    .map_err(ApiError::from_store)?
    .ok_or_else(|| ApiError::NotFound(format!("conflict {conflict_id} not found")))?;
  Ok(Json(conflict))
}

// ─── Resolve ─────────────────────────────────────────────────────────────────

/// Body: `{"resolution":{"strategy":"manual_merge","payload":{...}},
/// "resolver":{...},"note":"..."}`
#[derive(Debug, Deserialize)]
pub struct ResolveBody {
  pub resolution: Resolution,
  pub resolver:   AttributionBody,
  pub note:       Option<String>,
}

/// `POST /conflicts/:id/resolve`
pub async fn resolve<S: EventStore>(
  State(store): State<Arc<S>>,
  Path(conflict_id): Path<Uuid>,
  source_ip: SourceIp,
  Json(body): Json<ResolveBody>,
) -> Result<Json<ResolvedState>, ApiError> {
  let request = ResolutionRequest {
    resolution: body.resolution,
    resolver:   body.resolver.observed_from(source_ip),
    note:       body.note,
  };
  let resolved = store
    .resolve_conflict(conflict_id, request)
    .await
    .map_err(ApiError::from_store)?;
  Ok(Json(resolved))
}
