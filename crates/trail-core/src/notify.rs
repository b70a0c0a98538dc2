//! Outbound notifications for real-time subscribers and alerting.
//!
//! Delivery is at-least-once: an idempotent retry of an append announces the
//! same event again, so subscribers must de-duplicate on `event_id`.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::audit::TamperFinding;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Notification {
  EventAppended {
    event_id:        Uuid,
    aggregate_id:    Uuid,
    sequence_number: u64,
    versioned_type:  String,
  },
  ConflictOpened {
    conflict_id:       Uuid,
    aggregate_id:      Uuid,
    incoming_event_id: Uuid,
  },
  ConflictResolved {
    conflict_id:         Uuid,
    aggregate_id:        Uuid,
    resolution_event_id: Uuid,
    resolved_by:         String,
  },
  TamperDetected(TamperFinding),
}
