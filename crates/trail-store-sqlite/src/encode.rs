//! Encoding and decoding helpers between Rust domain types and the plain-text
//! representations stored in SQLite columns.
//!
//! Server timestamps are stored as RFC 3339 UTC strings; client timestamps
//! keep the device's offset. Payloads are stored as JSON. UUIDs are stored
//! as hyphenated lowercase strings. Sequence numbers and versions are SQLite
//! integers and are range-checked on the way out.

use std::net::IpAddr;

use chrono::{DateTime, FixedOffset, SecondsFormat, Utc};
use rusqlite::Row;
use trail_core::{
  conflict::{Conflict, ConflictStatus},
  event::{Attribution, PersistedEvent, ProjectionOutcome},
  state::State,
};
use uuid::Uuid;

use crate::{Error, Result};

// ─── Scalars ─────────────────────────────────────────────────────────────────

pub fn encode_uuid(id: Uuid) -> String { id.hyphenated().to_string() }

pub fn decode_uuid(s: &str) -> Result<Uuid> { Ok(Uuid::parse_str(s)?) }

pub fn encode_dt(dt: DateTime<Utc>) -> String { dt.to_rfc3339() }

pub fn decode_dt(s: &str) -> Result<DateTime<Utc>> {
  DateTime::parse_from_rfc3339(s)
    .map(|dt| dt.with_timezone(&Utc))
    .map_err(|e| Error::Decode(format!("timestamp {s:?}: {e}")))
}

pub fn encode_client_dt(dt: &DateTime<FixedOffset>) -> String {
  dt.to_rfc3339_opts(SecondsFormat::AutoSi, false)
}

pub fn decode_client_dt(s: &str) -> Result<DateTime<FixedOffset>> {
  DateTime::parse_from_rfc3339(s).map_err(|e| Error::Decode(format!("timestamp {s:?}: {e}")))
}

pub fn decode_ip(s: &str) -> Result<IpAddr> {
  s.parse()
    .map_err(|_| Error::Decode(format!("ip address {s:?}")))
}

pub fn encode_u64(n: u64) -> i64 { n as i64 }

pub fn decode_u64(n: i64) -> Result<u64> {
  u64::try_from(n).map_err(|_| Error::Decode(format!("negative counter {n}")))
}

// ─── Events ──────────────────────────────────────────────────────────────────

/// Column list matching [`RawEvent::from_row`].
pub const EVENT_COLUMNS: &str = "event_id, aggregate_id, sequence_number, versioned_type, \
                                 payload_json, created_by, device_id, client_timestamp, \
                                 server_timestamp, session_id, source_ip, base_version, \
                                 content_hash, chain_hash";

/// Raw values read directly from an `events` row.
pub struct RawEvent {
  pub event_id:         String,
  pub aggregate_id:     String,
  pub sequence_number:  i64,
  pub versioned_type:   String,
  pub payload_json:     String,
  pub created_by:       String,
  pub device_id:        String,
  pub client_timestamp: String,
  pub server_timestamp: String,
  pub session_id:       String,
  pub source_ip:        String,
  pub base_version:     Option<i64>,
  pub content_hash:     String,
  pub chain_hash:       String,
}

impl RawEvent {
  pub fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      event_id:         row.get(0)?,
      aggregate_id:     row.get(1)?,
      sequence_number:  row.get(2)?,
      versioned_type:   row.get(3)?,
      payload_json:     row.get(4)?,
      created_by:       row.get(5)?,
      device_id:        row.get(6)?,
      client_timestamp: row.get(7)?,
      server_timestamp: row.get(8)?,
      session_id:       row.get(9)?,
      source_ip:        row.get(10)?,
      base_version:     row.get(11)?,
      content_hash:     row.get(12)?,
      chain_hash:       row.get(13)?,
    })
  }

  pub fn into_event(self) -> Result<PersistedEvent> {
    Ok(PersistedEvent {
      event_id:         decode_uuid(&self.event_id)?,
      aggregate_id:     decode_uuid(&self.aggregate_id)?,
      versioned_type:   self.versioned_type,
      payload:          serde_json::from_str(&self.payload_json)?,
      attribution:      Attribution {
        created_by:       self.created_by,
        device_id:        self.device_id,
        client_timestamp: decode_client_dt(&self.client_timestamp)?,
        session_id:       self.session_id,
        source_ip:        decode_ip(&self.source_ip)?,
      },
      server_timestamp: decode_dt(&self.server_timestamp)?,
      sequence_number:  decode_u64(self.sequence_number)?,
      base_version:     self.base_version.map(decode_u64).transpose()?,
      content_hash:     self.content_hash,
      chain_hash:       self.chain_hash,
    })
  }
}

// ─── States ──────────────────────────────────────────────────────────────────

/// Raw values read directly from a `states` row.
pub struct RawState {
  pub aggregate_id:    String,
  pub current_payload: String,
  pub version:         i64,
  pub last_event_id:   String,
  pub updated_at:      String,
}

impl RawState {
  pub fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      aggregate_id:    row.get(0)?,
      current_payload: row.get(1)?,
      version:         row.get(2)?,
      last_event_id:   row.get(3)?,
      updated_at:      row.get(4)?,
    })
  }

  pub fn into_state(self) -> Result<State> {
    Ok(State {
      aggregate_id:    decode_uuid(&self.aggregate_id)?,
      current_payload: serde_json::from_str(&self.current_payload)?,
      version:         decode_u64(self.version)?,
      last_event_id:   decode_uuid(&self.last_event_id)?,
      updated_at:      decode_dt(&self.updated_at)?,
    })
  }
}

// ─── Conflicts ───────────────────────────────────────────────────────────────

pub const CONFLICT_COLUMNS: &str = "conflict_id, aggregate_id, base_version, incoming_event_id, \
                                    incoming_sequence, winning_event_id, status, \
                                    resolution_event_id, resolution_note, resolved_by, \
                                    created_at, resolved_at";

/// Raw values read directly from a `conflicts` row.
pub struct RawConflict {
  pub conflict_id:         String,
  pub aggregate_id:        String,
  pub base_version:        i64,
  pub incoming_event_id:   String,
  pub incoming_sequence:   i64,
  pub winning_event_id:    Option<String>,
  pub status:              String,
  pub resolution_event_id: Option<String>,
  pub resolution_note:     Option<String>,
  pub resolved_by:         Option<String>,
  pub created_at:          String,
  pub resolved_at:         Option<String>,
}

impl RawConflict {
  pub fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      conflict_id:         row.get(0)?,
      aggregate_id:        row.get(1)?,
      base_version:        row.get(2)?,
      incoming_event_id:   row.get(3)?,
      incoming_sequence:   row.get(4)?,
      winning_event_id:    row.get(5)?,
      status:              row.get(6)?,
      resolution_event_id: row.get(7)?,
      resolution_note:     row.get(8)?,
      resolved_by:         row.get(9)?,
      created_at:          row.get(10)?,
      resolved_at:         row.get(11)?,
    })
  }

  pub fn into_conflict(self) -> Result<Conflict> {
    let status: ConflictStatus = self
      .status
      .parse()
      .map_err(|_| Error::Decode(format!("conflict status {:?}", self.status)))?;

    Ok(Conflict {
      conflict_id: decode_uuid(&self.conflict_id)?,
      aggregate_id: decode_uuid(&self.aggregate_id)?,
      base_version: decode_u64(self.base_version)?,
      incoming_event_id: decode_uuid(&self.incoming_event_id)?,
      incoming_sequence: decode_u64(self.incoming_sequence)?,
      winning_event_id: self.winning_event_id.as_deref().map(decode_uuid).transpose()?,
      status,
      resolution_event_id: self
        .resolution_event_id
        .as_deref()
        .map(decode_uuid)
        .transpose()?,
      resolution_note: self.resolution_note,
      resolved_by: self.resolved_by,
      created_at: decode_dt(&self.created_at)?,
      resolved_at: self.resolved_at.as_deref().map(decode_dt).transpose()?,
    })
  }
}

// ─── Projection records ──────────────────────────────────────────────────────

/// Raw values read directly from a `projections` row.
pub struct RawProjection {
  pub outcome:          String,
  pub version:          Option<i64>,
  pub matched_sequence: Option<i64>,
  pub conflict_id:      Option<String>,
}

impl RawProjection {
  pub fn into_outcome(self) -> Result<ProjectionOutcome> {
    let missing = |column: &str| Error::Decode(format!("{} projection without {column}", self.outcome));
    match self.outcome.as_str() {
      "applied" => Ok(ProjectionOutcome::Applied {
        version: decode_u64(self.version.ok_or_else(|| missing("version"))?)?,
      }),
      "converged" => Ok(ProjectionOutcome::Converged {
        matched_sequence: decode_u64(
          self
            .matched_sequence
            .ok_or_else(|| missing("matched_sequence"))?,
        )?,
      }),
      "conflicted" => Ok(ProjectionOutcome::Conflicted {
        conflict_id: decode_uuid(
          self
            .conflict_id
            .as_deref()
            .ok_or_else(|| missing("conflict_id"))?,
        )?,
      }),
      other => Err(Error::Decode(format!("projection outcome {other:?}"))),
    }
  }
}

/// Column values for a `projections` insert: outcome, version,
/// matched_sequence, conflict_id.
pub fn encode_outcome(
  outcome: &ProjectionOutcome,
) -> (&'static str, Option<i64>, Option<i64>, Option<String>) {
  match outcome {
    ProjectionOutcome::Applied { version } => ("applied", Some(encode_u64(*version)), None, None),
    ProjectionOutcome::Converged { matched_sequence } => {
      ("converged", None, Some(encode_u64(*matched_sequence)), None)
    }
    ProjectionOutcome::Conflicted { conflict_id } => {
      ("conflicted", None, None, Some(encode_uuid(*conflict_id)))
    }
  }
}
