//! The hash-chained append log.
//!
//! Every function here runs on the connection thread, inside whatever
//! transaction the caller holds. Appends require an `IMMEDIATE` transaction
//! so the head read and the insert cannot interleave with another writer.

use chrono::Utc;
use rusqlite::{Connection, OptionalExtension as _, params};
use trail_core::{
  event::{CandidateEvent, PersistedEvent},
  hash::{GENESIS_CHAIN_HASH, chain_hash, content_hash},
};
use uuid::Uuid;

use crate::{
  Error, Result,
  encode::{
    EVENT_COLUMNS, RawEvent, decode_u64, encode_client_dt, encode_dt, encode_u64, encode_uuid,
  },
  error::constraint_message,
};

/// The last sequence number and chain hash of an aggregate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Head {
  pub sequence_number: u64,
  pub chain_hash:      String,
}

impl Head {
  fn genesis() -> Self {
    Self { sequence_number: 0, chain_hash: GENESIS_CHAIN_HASH.to_owned() }
  }
}

// ─── Reads ───────────────────────────────────────────────────────────────────

pub fn find_event(conn: &Connection, event_id: Uuid) -> Result<Option<PersistedEvent>> {
  let raw = conn
    .query_row(
      &format!("SELECT {EVENT_COLUMNS} FROM events WHERE event_id = ?1"),
      params![encode_uuid(event_id)],
      RawEvent::from_row,
    )
    .optional()?;
  raw.map(RawEvent::into_event).transpose()
}

pub fn list_events(conn: &Connection, aggregate_id: Uuid) -> Result<Vec<PersistedEvent>> {
  let mut stmt = conn.prepare(&format!(
    "SELECT {EVENT_COLUMNS} FROM events WHERE aggregate_id = ?1 ORDER BY sequence_number"
  ))?;
  let raws = stmt
    .query_map(params![encode_uuid(aggregate_id)], RawEvent::from_row)?
    .collect::<rusqlite::Result<Vec<_>>>()?;
  raws.into_iter().map(RawEvent::into_event).collect()
}

/// Up to `limit` undecoded rows of an aggregate with sequence numbers in
/// `from..=through`, in order. The auditor decodes them itself so an
/// unreadable row becomes a finding rather than an error.
pub fn raw_page(
  conn: &Connection,
  aggregate_id: Uuid,
  from: u64,
  through: u64,
  limit: usize,
) -> Result<Vec<RawEvent>> {
  let mut stmt = conn.prepare(&format!(
    "SELECT {EVENT_COLUMNS} FROM events
     WHERE aggregate_id = ?1 AND sequence_number >= ?2 AND sequence_number <= ?3
     ORDER BY sequence_number
     LIMIT ?4"
  ))?;
  let rows = stmt
    .query_map(
      params![
        encode_uuid(aggregate_id),
        encode_u64(from),
        encode_u64(through),
        limit as i64
      ],
      RawEvent::from_row,
    )?
    .collect::<rusqlite::Result<Vec<_>>>()?;
  Ok(rows)
}

pub fn head(conn: &Connection, aggregate_id: Uuid) -> Result<Head> {
  let row: Option<(i64, String)> = conn
    .query_row(
      "SELECT sequence_number, chain_hash FROM events
       WHERE aggregate_id = ?1
       ORDER BY sequence_number DESC
       LIMIT 1",
      params![encode_uuid(aggregate_id)],
      |row| Ok((row.get(0)?, row.get(1)?)),
    )
    .optional()?;

  match row {
    Some((sequence_number, chain_hash)) => Ok(Head {
      sequence_number: decode_u64(sequence_number)?,
      chain_hash,
    }),
    None => Ok(Head::genesis()),
  }
}

/// Every aggregate with at least one event.
pub fn aggregate_ids(conn: &Connection) -> Result<Vec<String>> {
  let mut stmt = conn.prepare("SELECT DISTINCT aggregate_id FROM events")?;
  let ids = stmt
    .query_map([], |row| row.get(0))?
    .collect::<rusqlite::Result<Vec<_>>>()?;
  Ok(ids)
}

// ─── Append ──────────────────────────────────────────────────────────────────

/// Sequence, seal and chain a validated candidate, then insert it.
pub fn append(conn: &Connection, event: CandidateEvent) -> Result<PersistedEvent> {
  let head = head(conn, event.aggregate_id)?;

  let mut persisted = PersistedEvent {
    event_id: event.event_id,
    aggregate_id: event.aggregate_id,
    versioned_type: event.versioned_type,
    payload: event.payload,
    attribution: event.attribution,
    server_timestamp: Utc::now(),
    sequence_number: head.sequence_number + 1,
    base_version: event.base_version,
    content_hash: String::new(),
    chain_hash: String::new(),
  };
  persisted.content_hash = content_hash(&persisted);
  persisted.chain_hash = chain_hash(&head.chain_hash, &persisted.content_hash);

  insert_event(conn, &persisted)?;
  Ok(persisted)
}

fn insert_event(conn: &Connection, event: &PersistedEvent) -> Result<()> {
  let result = conn.execute(
    "INSERT INTO events (
       event_id, aggregate_id, sequence_number, versioned_type, payload_json,
       created_by, device_id, client_timestamp, server_timestamp, session_id,
       source_ip, base_version, content_hash, chain_hash
     ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)",
    params![
      encode_uuid(event.event_id),
      encode_uuid(event.aggregate_id),
      encode_u64(event.sequence_number),
      event.versioned_type,
      serde_json::to_string(&event.payload)?,
      event.attribution.created_by,
      event.attribution.device_id,
      encode_client_dt(&event.attribution.client_timestamp),
      encode_dt(event.server_timestamp),
      event.attribution.session_id,
      event.attribution.source_ip.to_string(),
      event.base_version.map(encode_u64),
      event.content_hash,
      event.chain_hash,
    ],
  );

  match result {
    Ok(_) => Ok(()),
    Err(err) if is_sequence_collision(&err) => Err(Error::SequenceRace {
      aggregate_id:    event.aggregate_id,
      sequence_number: event.sequence_number,
    }),
    Err(err) => Err(err.into()),
  }
}

fn is_sequence_collision(err: &rusqlite::Error) -> bool {
  constraint_message(err)
    .is_some_and(|m| m.contains("events.aggregate_id, events.sequence_number"))
}
