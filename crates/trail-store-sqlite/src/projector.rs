//! The state projector.
//!
//! Runs inside the append transaction. The only code path that lifts the
//! storage guard on the `states` table; everything else that touches a
//! state row is rejected by SQLite while the store is protected.

use chrono::Utc;
use rusqlite::{Connection, OptionalExtension as _, params};
use trail_core::{
  conflict::{Conflict, ConflictStatus},
  event::{PersistedEvent, ProjectionOutcome},
  hash::AuthoredContent,
  projection::{self, AppliedEvent, Decision},
  reduce::Reduction,
  state::State,
};
use uuid::Uuid;

use crate::{
  Result,
  encode::{
    CONFLICT_COLUMNS, EVENT_COLUMNS, RawConflict, RawEvent, RawProjection, RawState, encode_dt,
    encode_outcome, encode_u64, encode_uuid,
  },
};

/// What projecting one event changed.
#[derive(Debug, Clone)]
pub struct Projection {
  pub outcome:  ProjectionOutcome,
  /// Set when the event opened a conflict.
  pub conflict: Option<Conflict>,
}

/// Decide and apply the fate of a freshly appended event, and record the
/// outcome for idempotent retries.
pub fn project(conn: &Connection, event: &PersistedEvent, reduction: Reduction) -> Result<Projection> {
  let state = read_state(conn, event.aggregate_id)?;
  let decision = projection::decide(state.as_ref(), event, |base| {
    first_applied_after(conn, event.aggregate_id, base)
  })?;

  let projection = match decision {
    Decision::Create | Decision::Apply => {
      let next = State::advance(state.as_ref(), event, reduction);
      write_as_projector(conn, &next)?;
      Projection {
        outcome:  ProjectionOutcome::Applied { version: next.version },
        conflict: None,
      }
    }
    Decision::Converge { matched_sequence } => Projection {
      outcome:  ProjectionOutcome::Converged { matched_sequence },
      conflict: None,
    },
    Decision::Conflict { base_version } => {
      let conflict = Conflict {
        conflict_id: Uuid::new_v4(),
        aggregate_id: event.aggregate_id,
        base_version,
        incoming_event_id: event.event_id,
        incoming_sequence: event.sequence_number,
        winning_event_id: None,
        status: ConflictStatus::Open,
        resolution_event_id: None,
        resolution_note: None,
        resolved_by: None,
        created_at: Utc::now(),
        resolved_at: None,
      };
      insert_conflict(conn, &conflict)?;
      Projection {
        outcome:  ProjectionOutcome::Conflicted { conflict_id: conflict.conflict_id },
        conflict: Some(conflict),
      }
    }
  };

  record_outcome(conn, event.event_id, &projection.outcome)?;
  Ok(projection)
}

/// The applied event that advanced the state from version `base`: the
/// first event above `base` whose recorded outcome is `applied`.
fn first_applied_after(conn: &Connection, aggregate_id: Uuid, base: u64) -> Result<Option<AppliedEvent>> {
  let raw = conn
    .query_row(
      &format!(
        "SELECT {EVENT_COLUMNS} FROM events
         WHERE aggregate_id = ?1 AND sequence_number = (
           SELECT MIN(e.sequence_number)
           FROM events e JOIN projections p ON p.event_id = e.event_id
           WHERE e.aggregate_id = ?1 AND e.sequence_number > ?2 AND p.outcome = 'applied'
         )"
      ),
      params![encode_uuid(aggregate_id), encode_u64(base)],
      RawEvent::from_row,
    )
    .optional()?;

  let Some(event) = raw.map(RawEvent::into_event).transpose()? else {
    return Ok(None);
  };
  Ok(Some(AppliedEvent {
    sequence_number: event.sequence_number,
    authored:        AuthoredContent::of_persisted(&event).digest(),
  }))
}

// ─── States ──────────────────────────────────────────────────────────────────

pub fn read_state(conn: &Connection, aggregate_id: Uuid) -> Result<Option<State>> {
  let raw = conn
    .query_row(
      "SELECT aggregate_id, current_payload, version, last_event_id, updated_at
       FROM states WHERE aggregate_id = ?1",
      params![encode_uuid(aggregate_id)],
      RawState::from_row,
    )
    .optional()?;
  raw.map(RawState::into_state).transpose()
}

/// Every aggregate with a state row.
pub fn aggregate_ids(conn: &Connection) -> Result<Vec<String>> {
  let mut stmt = conn.prepare("SELECT aggregate_id FROM states")?;
  let ids = stmt
    .query_map([], |row| row.get(0))?
    .collect::<rusqlite::Result<Vec<_>>>()?;
  Ok(ids)
}

/// Upsert a state row with no guard handling. Succeeds only while the
/// guard is down, either because the store is permissive or because the
/// projector raised it.
pub fn write_state(conn: &Connection, state: &State) -> rusqlite::Result<()> {
  let payload = serde_json::to_string(&state.current_payload)
    .map_err(|e| rusqlite::Error::ToSqlConversionFailure(Box::new(e)))?;
  conn.execute(
    "INSERT INTO states (aggregate_id, current_payload, version, last_event_id, updated_at)
     VALUES (?1, ?2, ?3, ?4, ?5)
     ON CONFLICT (aggregate_id) DO UPDATE SET
       current_payload = excluded.current_payload,
       version         = excluded.version,
       last_event_id   = excluded.last_event_id,
       updated_at      = excluded.updated_at",
    params![
      encode_uuid(state.aggregate_id),
      payload,
      encode_u64(state.version),
      encode_uuid(state.last_event_id),
      encode_dt(state.updated_at),
    ],
  )?;
  Ok(())
}

fn write_as_projector(conn: &Connection, state: &State) -> Result<()> {
  set_projector_active(conn, true)?;
  write_state(conn, state)?;
  set_projector_active(conn, false)?;
  Ok(())
}

fn set_projector_active(conn: &Connection, active: bool) -> Result<()> {
  conn.execute(
    "UPDATE write_guard SET projector_active = ?1 WHERE id = 1",
    params![active],
  )?;
  Ok(())
}

// ─── Projection records ──────────────────────────────────────────────────────

fn record_outcome(conn: &Connection, event_id: Uuid, outcome: &ProjectionOutcome) -> Result<()> {
  let (kind, version, matched_sequence, conflict_id) = encode_outcome(outcome);
  conn.execute(
    "INSERT INTO projections (event_id, outcome, version, matched_sequence, conflict_id)
     VALUES (?1, ?2, ?3, ?4, ?5)",
    params![encode_uuid(event_id), kind, version, matched_sequence, conflict_id],
  )?;
  Ok(())
}

/// The outcome recorded when `event_id` was first projected.
pub fn recorded_outcome(conn: &Connection, event_id: Uuid) -> Result<Option<ProjectionOutcome>> {
  let raw = conn
    .query_row(
      "SELECT outcome, version, matched_sequence, conflict_id
       FROM projections WHERE event_id = ?1",
      params![encode_uuid(event_id)],
      |row| {
        Ok(RawProjection {
          outcome:          row.get(0)?,
          version:          row.get(1)?,
          matched_sequence: row.get(2)?,
          conflict_id:      row.get(3)?,
        })
      },
    )
    .optional()?;
  raw.map(RawProjection::into_outcome).transpose()
}

// ─── Conflicts ───────────────────────────────────────────────────────────────

fn insert_conflict(conn: &Connection, conflict: &Conflict) -> Result<()> {
  conn.execute(
    "INSERT INTO conflicts (
       conflict_id, aggregate_id, base_version, incoming_event_id,
       incoming_sequence, status, created_at
     ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
    params![
      encode_uuid(conflict.conflict_id),
      encode_uuid(conflict.aggregate_id),
      encode_u64(conflict.base_version),
      encode_uuid(conflict.incoming_event_id),
      encode_u64(conflict.incoming_sequence),
      conflict.status.as_ref(),
      encode_dt(conflict.created_at),
    ],
  )?;
  Ok(())
}

pub fn find_conflict(conn: &Connection, conflict_id: Uuid) -> Result<Option<Conflict>> {
  let raw = conn
    .query_row(
      &format!("SELECT {CONFLICT_COLUMNS} FROM conflicts WHERE conflict_id = ?1"),
      params![encode_uuid(conflict_id)],
      RawConflict::from_row,
    )
    .optional()?;
  raw.map(RawConflict::into_conflict).transpose()
}
