//! Conflict resolution and integrity bookkeeping.
//!
//! Resolution never edits the log: it appends a corrective
//! `conflict-resolution` event, lets the projector apply it, and closes the
//! conflict. The `conflicts` table triggers reject every other transition.

use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension as _, params};
use serde_json::{Map, Value};
use trail_core::{
  ValidationError,
  audit::TamperFinding,
  conflict::{Conflict, ConflictFilter, ConflictStatus, Resolution, ResolutionRequest},
  event::{CandidateEvent, PersistedEvent},
  validate::{self, RESOLUTION_TYPE},
};
use uuid::Uuid;

use crate::{
  Error, Result,
  encode::{
    CONFLICT_COLUMNS, RawConflict, decode_dt, decode_u64, decode_uuid, encode_dt, encode_u64,
    encode_uuid,
  },
  log, projector,
};

// ─── Conflicts ───────────────────────────────────────────────────────────────

pub fn list_conflicts(conn: &Connection, filter: &ConflictFilter) -> Result<Vec<Conflict>> {
  let mut stmt = conn.prepare(&format!(
    "SELECT {CONFLICT_COLUMNS} FROM conflicts
     WHERE (?1 IS NULL OR aggregate_id = ?1)
       AND (?2 IS NULL OR status = ?2)
     ORDER BY created_at, rowid"
  ))?;
  let raws = stmt
    .query_map(
      params![
        filter.aggregate_id.map(encode_uuid),
        filter.status.map(|s| s.to_string()),
      ],
      RawConflict::from_row,
    )?
    .collect::<rusqlite::Result<Vec<_>>>()?;
  raws.into_iter().map(RawConflict::into_conflict).collect()
}

/// The conflict, provided it exists and is still open.
pub fn open_conflict(conn: &Connection, conflict_id: Uuid) -> Result<Conflict> {
  let conflict =
    projector::find_conflict(conn, conflict_id)?.ok_or(Error::ConflictNotFound(conflict_id))?;
  if !conflict.is_open() {
    return Err(Error::ConflictAlreadyResolved(conflict_id));
  }
  Ok(conflict)
}

/// The closed conflict and the corrective event that closed it.
pub struct Resolved {
  pub conflict: Conflict,
  pub event:    PersistedEvent,
}

/// Append the corrective event for `conflict_id`, project it and close the
/// conflict. The caller holds the aggregate lock and an `IMMEDIATE`
/// transaction.
pub fn resolve(conn: &Connection, conflict_id: Uuid, request: &ResolutionRequest) -> Result<Resolved> {
  let conflict = open_conflict(conn, conflict_id)?;
  let incoming = log::find_event(conn, conflict.incoming_event_id)?.ok_or_else(|| {
    Error::Decode(format!("conflict {conflict_id} names a missing incoming event"))
  })?;
  let state = projector::read_state(conn, conflict.aggregate_id)?;

  let (resolved_payload, winner) = match &request.resolution {
    Resolution::KeepIncoming => {
      let reduction = validate::lookup(&incoming.versioned_type)?.reduction;
      let payload = reduction.apply(state.as_ref().map(|s| &s.current_payload), &incoming.payload);
      (payload, Some(incoming.event_id))
    }
    Resolution::KeepExisting => {
      let state = state.as_ref().ok_or_else(|| {
        ValidationError::new(
          "resolution.strategy",
          "keep_existing requires the aggregate to have a current state",
        )
      })?;
      (state.current_payload.clone(), Some(state.last_event_id))
    }
    Resolution::ManualMerge(payload) => {
      validate::lookup(&incoming.versioned_type)?
        .check(payload)
        .map_err(|e| ValidationError::new(format!("resolution.payload.{}", e.field), e.reason))?;
      (payload.clone(), None)
    }
  };

  let current_version = state.map_or(0, |s| s.version);
  let candidate = corrective_event(&conflict, request, resolved_payload, current_version);
  let event_type = validate::validate_candidate(&candidate)?;
  let event = log::append(conn, candidate)?;
  projector::project(conn, &event, event_type.reduction)?;

  let winning_event_id = winner.unwrap_or(event.event_id);
  let resolved_at = Utc::now();
  conn.execute(
    "UPDATE conflicts SET
       status = 'resolved',
       winning_event_id = ?2,
       resolution_event_id = ?3,
       resolution_note = ?4,
       resolved_by = ?5,
       resolved_at = ?6
     WHERE conflict_id = ?1",
    params![
      encode_uuid(conflict_id),
      encode_uuid(winning_event_id),
      encode_uuid(event.event_id),
      request.note,
      request.resolver.created_by,
      encode_dt(resolved_at),
    ],
  )?;

  let conflict = Conflict {
    winning_event_id: Some(winning_event_id),
    status: ConflictStatus::Resolved,
    resolution_event_id: Some(event.event_id),
    resolution_note: request.note.clone(),
    resolved_by: Some(request.resolver.created_by.clone()),
    resolved_at: Some(resolved_at),
    ..conflict
  };

  Ok(Resolved { conflict, event })
}

/// The `conflict-resolution` event closing `conflict`, based on the
/// aggregate's current version.
fn corrective_event(
  conflict: &Conflict,
  request: &ResolutionRequest,
  resolved_payload: Value,
  current_version: u64,
) -> CandidateEvent {
  let mut payload = Map::new();
  payload.insert("conflictId".into(), Value::String(conflict.conflict_id.to_string()));
  payload.insert("strategy".into(), Value::String(request.resolution.strategy().into()));
  payload.insert("resolvedPayload".into(), resolved_payload);
  if let Some(note) = &request.note {
    payload.insert("note".into(), Value::String(note.clone()));
  }

  CandidateEvent::new(
    conflict.aggregate_id,
    RESOLUTION_TYPE,
    Value::Object(payload),
    request.resolver.clone(),
  )
  .assuming_version(current_version)
}

// ─── Verification support ────────────────────────────────────────────────────

/// What a verification scan commits to before it starts reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Snapshot {
  pub head:          u64,
  pub state_version: Option<u64>,
}

pub fn snapshot(conn: &Connection, aggregate_id: Uuid) -> Result<Snapshot> {
  let id = encode_uuid(aggregate_id);
  let head: Option<i64> = conn.query_row(
    "SELECT MAX(sequence_number) FROM events WHERE aggregate_id = ?1",
    params![id],
    |row| row.get(0),
  )?;
  let state_version: Option<i64> = conn
    .query_row(
      "SELECT version FROM states WHERE aggregate_id = ?1",
      params![id],
      |row| row.get(0),
    )
    .optional()?;

  Ok(Snapshot {
    head:          head.map(decode_u64).transpose()?.unwrap_or(0),
    state_version: state_version.map(decode_u64).transpose()?,
  })
}

// ─── Compliance flags ────────────────────────────────────────────────────────

/// A tamper finding as persisted for compliance review.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComplianceFlag {
  pub aggregate_id: Uuid,
  pub at_sequence:  u64,
  pub detected_at:  DateTime<Utc>,
  pub detail:       String,
}

pub fn record_flag(conn: &Connection, finding: &TamperFinding) -> Result<()> {
  conn.execute(
    "INSERT INTO compliance_flags (aggregate_id, at_sequence, detected_at, detail)
     VALUES (?1, ?2, ?3, ?4)",
    params![
      encode_uuid(finding.aggregate_id),
      encode_u64(finding.at_sequence),
      encode_dt(Utc::now()),
      finding.to_string(),
    ],
  )?;
  Ok(())
}

pub fn list_flags(conn: &Connection, aggregate_id: Option<Uuid>) -> Result<Vec<ComplianceFlag>> {
  let mut stmt = conn.prepare(
    "SELECT aggregate_id, at_sequence, detected_at, detail FROM compliance_flags
     WHERE (?1 IS NULL OR aggregate_id = ?1)
     ORDER BY flag_id",
  )?;
  let rows = stmt
    .query_map(params![aggregate_id.map(encode_uuid)], |row| {
      Ok((
        row.get::<_, String>(0)?,
        row.get::<_, i64>(1)?,
        row.get::<_, String>(2)?,
        row.get::<_, String>(3)?,
      ))
    })?
    .collect::<rusqlite::Result<Vec<_>>>()?;

  rows
    .into_iter()
    .map(|(aggregate_id, at_sequence, detected_at, detail)| {
      Ok(ComplianceFlag {
        aggregate_id: decode_uuid(&aggregate_id)?,
        at_sequence: decode_u64(at_sequence)?,
        detected_at: decode_dt(&detected_at)?,
        detail,
      })
    })
    .collect()
}
