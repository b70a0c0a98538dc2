//! Canonical encoding and hash chaining.
//!
//! `content_hash` is SHA-256 over a length-prefixed encoding of the whole
//! persisted record except its two hashes: identity, position, type,
//! attribution, server timestamp, base version and the payload as canonical
//! JSON (object keys sorted, no insignificant whitespace). Each field is
//! prefixed by its byte length as a little-endian `u32`, so no two field
//! layouts can produce the same byte stream. Editing any stored column of an
//! event therefore breaks its content hash.
//!
//! `chain_hash` is SHA-256 over the ASCII hex of the previous chain hash
//! followed by the ASCII hex of this event's content hash. The first event of
//! every aggregate chains from [`GENESIS_CHAIN_HASH`].
//!
//! The [`AuthoredContent`] digest is separate and never stored. It covers
//! only what the author wrote (aggregate, type, author, device, device
//! timestamp, payload) and identifies the same submission arriving twice.

use chrono::{DateTime, FixedOffset, SecondsFormat};
use serde_json::Value;
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::event::{CandidateEvent, PersistedEvent};

/// The `previous_chain_hash` of every aggregate's first event.
pub const GENESIS_CHAIN_HASH: &str =
  "0000000000000000000000000000000000000000000000000000000000000000";

const EVENT_TAG: &[u8] = b"trail.event.v2";
const AUTHORED_TAG: &[u8] = b"trail.authored.v1";

// ─── Persisted record ────────────────────────────────────────────────────────

/// The exact bytes `content_hash` is computed over.
pub fn canonical_bytes(event: &PersistedEvent) -> Vec<u8> {
  let attribution = &event.attribution;
  let mut out = Vec::with_capacity(512);
  push_field(&mut out, EVENT_TAG);
  push_field(&mut out, event.event_id.as_bytes());
  push_field(&mut out, event.aggregate_id.as_bytes());
  push_field(&mut out, &event.sequence_number.to_le_bytes());
  push_field(&mut out, event.versioned_type.as_bytes());
  push_field(&mut out, attribution.created_by.as_bytes());
  push_field(&mut out, attribution.device_id.as_bytes());
  push_field(&mut out, rfc3339(&attribution.client_timestamp).as_bytes());
  push_field(&mut out, attribution.session_id.as_bytes());
  push_field(&mut out, attribution.source_ip.to_string().as_bytes());
  push_field(
    &mut out,
    event
      .server_timestamp
      .to_rfc3339_opts(SecondsFormat::AutoSi, true)
      .as_bytes(),
  );
  // Absent and present base versions must never encode alike.
  match event.base_version {
    Some(base) => {
      push_field(&mut out, &[1]);
      push_field(&mut out, &base.to_le_bytes());
    }
    None => push_field(&mut out, &[0]),
  }
  push_field(&mut out, canonical_json(&event.payload).as_bytes());
  out
}

/// Lowercase hex SHA-256 of [`canonical_bytes`]. Ignores the stored
/// `content_hash` and `chain_hash`.
pub fn content_hash(event: &PersistedEvent) -> String {
  hex::encode(Sha256::digest(canonical_bytes(event)))
}

// ─── Authored content ────────────────────────────────────────────────────────

/// What the author wrote, borrowed from either a candidate or a persisted
/// event. Two submissions with equal digests say the same thing.
#[derive(Debug, Clone, Copy)]
pub struct AuthoredContent<'a> {
  pub aggregate_id:     Uuid,
  pub versioned_type:   &'a str,
  pub payload:          &'a Value,
  pub created_by:       &'a str,
  pub device_id:        &'a str,
  pub client_timestamp: &'a DateTime<FixedOffset>,
}

impl<'a> AuthoredContent<'a> {
  pub fn of_candidate(event: &'a CandidateEvent) -> Self {
    Self {
      aggregate_id:     event.aggregate_id,
      versioned_type:   &event.versioned_type,
      payload:          &event.payload,
      created_by:       &event.attribution.created_by,
      device_id:        &event.attribution.device_id,
      client_timestamp: &event.attribution.client_timestamp,
    }
  }

  pub fn of_persisted(event: &'a PersistedEvent) -> Self {
    Self {
      aggregate_id:     event.aggregate_id,
      versioned_type:   &event.versioned_type,
      payload:          &event.payload,
      created_by:       &event.attribution.created_by,
      device_id:        &event.attribution.device_id,
      client_timestamp: &event.attribution.client_timestamp,
    }
  }

  pub fn digest(&self) -> String {
    let mut out = Vec::with_capacity(256);
    push_field(&mut out, AUTHORED_TAG);
    push_field(&mut out, self.aggregate_id.as_bytes());
    push_field(&mut out, self.versioned_type.as_bytes());
    push_field(&mut out, self.created_by.as_bytes());
    push_field(&mut out, self.device_id.as_bytes());
    push_field(&mut out, rfc3339(self.client_timestamp).as_bytes());
    push_field(&mut out, canonical_json(self.payload).as_bytes());
    hex::encode(Sha256::digest(out))
  }
}

fn rfc3339(dt: &DateTime<FixedOffset>) -> String { dt.to_rfc3339_opts(SecondsFormat::AutoSi, false) }

fn push_field(out: &mut Vec<u8>, bytes: &[u8]) {
  out.extend_from_slice(&(bytes.len() as u32).to_le_bytes());
  out.extend_from_slice(bytes);
}

/// Bind `content_hash` to everything before it in the aggregate's chain.
pub fn chain_hash(previous_chain_hash: &str, content_hash: &str) -> String {
  let mut hasher = Sha256::new();
  hasher.update(previous_chain_hash.as_bytes());
  hasher.update(content_hash.as_bytes());
  hex::encode(hasher.finalize())
}

// ─── Canonical JSON ──────────────────────────────────────────────────────────

/// Serialise `value` with object keys in byte order and no whitespace.
///
/// Does not depend on the `serde_json` map implementation, so enabling
/// `preserve_order` anywhere in the dependency graph cannot change hashes.
pub fn canonical_json(value: &Value) -> String {
  let mut out = String::new();
  write_canonical(value, &mut out);
  out
}

fn write_canonical(value: &Value, out: &mut String) {
  match value {
    Value::Null => out.push_str("null"),
    Value::Bool(b) => out.push_str(if *b { "true" } else { "false" }),
    Value::Number(n) => out.push_str(&n.to_string()),
    Value::String(s) => write_string(s, out),
    Value::Array(items) => {
      out.push('[');
      for (i, item) in items.iter().enumerate() {
        if i > 0 {
          out.push(',');
        }
        write_canonical(item, out);
      }
      out.push(']');
    }
    Value::Object(map) => {
      let mut keys: Vec<&String> = map.keys().collect();
      keys.sort();
      out.push('{');
      for (i, key) in keys.into_iter().enumerate() {
        if i > 0 {
          out.push(',');
        }
        write_string(key, out);
        out.push(':');
        write_canonical(&map[key], out);
      }
      out.push('}');
    }
  }
}

fn write_string(s: &str, out: &mut String) {
  // Serialising a `&str` cannot fail.
  out.push_str(&Value::String(s.to_owned()).to_string());
}
