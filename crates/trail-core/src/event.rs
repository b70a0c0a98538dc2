//! Events: the immutable unit of record.
//!
//! An event is one clinical observation (or a correction, annotation or
//! conflict resolution) about an aggregate. Once persisted, no field is ever
//! updated; corrections are new events against the same aggregate.

use std::{fmt, net::IpAddr, str::FromStr};

use chrono::{DateTime, FixedOffset, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::ValidationError;

// ─── Versioned type ──────────────────────────────────────────────────────────

/// A parsed `{type}-v{major}.{minor}` string.
///
/// The type name may itself contain hyphens (`conflict-resolution-v1.0`);
/// the version is always the last `-v` segment.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct VersionedType {
  pub name:  String,
  pub major: u32,
  pub minor: u32,
}

impl VersionedType {
  pub fn new(name: impl Into<String>, major: u32, minor: u32) -> Self {
    Self { name: name.into(), major, minor }
  }
}

impl FromStr for VersionedType {
  type Err = ValidationError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    let malformed = || {
      ValidationError::new(
        "versioned_type",
        format!("{s:?} is not of the form {{type}}-v{{major}}.{{minor}}"),
      )
    };

    let (name, version) = s.rsplit_once("-v").ok_or_else(malformed)?;
    let (major, minor) = version.split_once('.').ok_or_else(malformed)?;

    let valid_name = !name.is_empty()
      && name
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' || c == '_');
    let numeric = |part: &str| !part.is_empty() && part.chars().all(|c| c.is_ascii_digit());
    if !valid_name || !numeric(major) || !numeric(minor) {
      return Err(malformed());
    }

    Ok(Self {
      name:  name.to_owned(),
      major: major.parse().map_err(|_| malformed())?,
      minor: minor.parse().map_err(|_| malformed())?,
    })
  }
}

impl fmt::Display for VersionedType {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}-v{}.{}", self.name, self.major, self.minor)
  }
}

// ─── Attribution ─────────────────────────────────────────────────────────────

/// Who wrote an event, from where, and when according to their device.
/// Every field is mandatory for compliance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attribution {
  pub created_by:       String,
  pub device_id:        String,
  /// Device-local time of authoring, with its explicit UTC offset.
  pub client_timestamp: DateTime<FixedOffset>,
  pub session_id:       String,
  pub source_ip:        IpAddr,
}

// ─── Candidate ───────────────────────────────────────────────────────────────

/// An event as submitted, before it has been sequenced and chained.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateEvent {
  /// Idempotency key; generated by the origin device or by the server.
  pub event_id:       Uuid,
  pub aggregate_id:   Uuid,
  pub versioned_type: String,
  pub payload:        serde_json::Value,
  pub attribution:    Attribution,
  /// The aggregate version the submitter assumed was current. `None` means
  /// the submitter does not take part in optimistic concurrency.
  pub base_version:   Option<u64>,
}

impl CandidateEvent {
  /// Convenience constructor with a fresh `event_id` and no base version.
  pub fn new(
    aggregate_id: Uuid,
    versioned_type: impl Into<String>,
    payload: serde_json::Value,
    attribution: Attribution,
  ) -> Self {
    Self {
      event_id: Uuid::new_v4(),
      aggregate_id,
      versioned_type: versioned_type.into(),
      payload,
      attribution,
      base_version: None,
    }
  }

  pub fn assuming_version(mut self, version: u64) -> Self {
    self.base_version = Some(version);
    self
  }
}

// ─── Persisted ───────────────────────────────────────────────────────────────

/// A sequenced, hash-chained event as stored in the log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersistedEvent {
  pub event_id:         Uuid,
  pub aggregate_id:     Uuid,
  pub versioned_type:   String,
  pub payload:          serde_json::Value,
  pub attribution:      Attribution,
  /// Server-assigned; never changes after append.
  pub server_timestamp: DateTime<Utc>,
  pub sequence_number:  u64,
  pub base_version:     Option<u64>,
  /// Lowercase hex SHA-256 of every other field of this record, see
  /// [`crate::hash::canonical_bytes`].
  pub content_hash:     String,
  /// Lowercase hex SHA-256 of `previous_chain_hash ‖ content_hash`.
  pub chain_hash:       String,
}

// ─── Receipts ────────────────────────────────────────────────────────────────

/// What the projector did with a freshly appended event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ProjectionOutcome {
  /// The state advanced to `version`.
  Applied { version: u64 },
  /// The event repeats content already chained at `matched_sequence`; the
  /// state was left alone and no conflict was raised.
  Converged { matched_sequence: u64 },
  /// The event was persisted but diverges from the current state.
  Conflicted { conflict_id: Uuid },
}

impl ProjectionOutcome {
  pub fn is_conflicted(&self) -> bool { matches!(self, Self::Conflicted { .. }) }
}

/// Returned for every successful submission, including idempotent retries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventReceipt {
  pub event:      PersistedEvent,
  pub projection: ProjectionOutcome,
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn parses_simple_versioned_type() {
    let vt: VersionedType = "epistaxis-v1.0".parse().unwrap();
    assert_eq!(vt, VersionedType::new("epistaxis", 1, 0));
    assert_eq!(vt.to_string(), "epistaxis-v1.0");
  }

  #[test]
  fn parses_hyphenated_type_name() {
    let vt: VersionedType = "conflict-resolution-v2.13".parse().unwrap();
    assert_eq!(vt.name, "conflict-resolution");
    assert_eq!((vt.major, vt.minor), (2, 13));
  }

  #[test]
  fn rejects_malformed_versioned_types() {
    for bad in ["epistaxis", "epistaxis-v1", "epistaxis-vx.0", "-v1.0", "Epistaxis-v1.0", "epistaxis-v1.0.1"] {
      let err = bad.parse::<VersionedType>().unwrap_err();
      assert_eq!(err.field, "versioned_type", "{bad}");
    }
  }
}
