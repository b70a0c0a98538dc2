//! Materialised state: the derived, cache-like current view of an aggregate.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{event::PersistedEvent, reduce::Reduction};

/// One row per aggregate. Never the system of record: replaying the
/// aggregate's events reproduces it exactly.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct State {
  pub aggregate_id:    Uuid,
  pub current_payload: serde_json::Value,
  /// The `sequence_number` of the last applied event.
  pub version:         u64,
  pub last_event_id:   Uuid,
  /// The server timestamp of the last applied event, so that replay yields
  /// the same row.
  pub updated_at:      DateTime<Utc>,
}

impl State {
  /// The state after applying `event` on top of `previous` (or from nothing).
  pub fn advance(previous: Option<&State>, event: &PersistedEvent, reduction: Reduction) -> State {
    State {
      aggregate_id:    event.aggregate_id,
      current_payload: reduction.apply(previous.map(|s| &s.current_payload), &event.payload),
      version:         event.sequence_number,
      last_event_id:   event.event_id,
      updated_at:      event.server_timestamp,
    }
  }
}
