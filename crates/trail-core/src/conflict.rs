//! Conflicts and their resolution.
//!
//! A conflict records that a persisted event assumed a base version the
//! aggregate had already moved past. It is closed only by an explicit
//! resolution, which is itself an appended event. `open → resolved` is the
//! only transition.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumString};
use uuid::Uuid;

use crate::{
  event::{Attribution, PersistedEvent},
  state::State,
};

#[derive(
  Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString, AsRefStr,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum ConflictStatus {
  Open,
  Resolved,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Conflict {
  pub conflict_id:         Uuid,
  pub aggregate_id:        Uuid,
  /// The version the losing event assumed.
  pub base_version:        u64,
  pub incoming_event_id:   Uuid,
  /// Where the incoming event sits in the log.
  pub incoming_sequence:   u64,
  /// Unset until resolved.
  pub winning_event_id:    Option<Uuid>,
  pub status:              ConflictStatus,
  /// The corrective event that closed this conflict.
  pub resolution_event_id: Option<Uuid>,
  pub resolution_note:     Option<String>,
  pub resolved_by:         Option<String>,
  pub created_at:          DateTime<Utc>,
  pub resolved_at:         Option<DateTime<Utc>>,
}

impl Conflict {
  pub fn is_open(&self) -> bool { self.status == ConflictStatus::Open }
}

/// Parameters for listing conflicts; unset fields do not filter.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConflictFilter {
  pub aggregate_id: Option<Uuid>,
  pub status:       Option<ConflictStatus>,
}

// ─── Resolution ──────────────────────────────────────────────────────────────

/// How the resolver wants the aggregate to end up.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "strategy", content = "payload", rename_all = "snake_case")]
pub enum Resolution {
  /// Fold the conflicting event into the current state as if it had won.
  KeepIncoming,
  /// Re-assert the current state.
  KeepExisting,
  /// Replace the state with a hand-merged payload, validated against the
  /// conflicting event's type.
  ManualMerge(serde_json::Value),
}

impl Resolution {
  /// The `strategy` value written into the corrective event.
  pub fn strategy(&self) -> &'static str {
    match self {
      Self::KeepIncoming => "keep_incoming",
      Self::KeepExisting => "keep_existing",
      Self::ManualMerge(_) => "manual_merge",
    }
  }
}

/// Input to [`crate::store::EventStore::resolve_conflict`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolutionRequest {
  pub resolution: Resolution,
  /// The resolver's identity (`created_by`) and where they acted from. The
  /// corrective event is attributed to it.
  pub resolver:   Attribution,
  pub note:       Option<String>,
}

/// The outcome of a resolution: the closed conflict, the corrective event
/// and the state it produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolvedState {
  pub conflict: Conflict,
  pub event:    PersistedEvent,
  pub state:    State,
}
