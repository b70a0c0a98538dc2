//! Chain verification.
//!
//! [`ChainVerifier`] walks one aggregate's events in sequence order from
//! genesis, recomputing both hashes independently of the stored values. It
//! stops at the first break and reports its position; nothing beyond a break
//! is trusted or checked.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
  event::PersistedEvent,
  hash::{GENESIS_CHAIN_HASH, chain_hash, content_hash},
};

// ─── Findings ────────────────────────────────────────────────────────────────

/// What exactly failed to verify.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TamperKind {
  /// The stored content hash does not match the event's content.
  ContentHashMismatch { stored: String, computed: String },
  /// The stored chain hash does not follow from its predecessor.
  ChainHashMismatch { stored: String, computed: String },
  /// A sequence number is missing or out of place.
  SequenceGap { expected: u64, found: Option<u64> },
  /// The stored row cannot be decoded at all.
  Unreadable { detail: String },
  /// The cached state is ahead of the log it was derived from.
  StateAheadOfLog { state_version: u64, log_head: u64 },
  /// A stored aggregate id is not a UUID, so its chain cannot be located.
  /// Reported against the nil aggregate.
  UnreadableAggregate { stored: String, detail: String },
}

/// A verification failure, localised to one event of one aggregate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TamperFinding {
  pub aggregate_id: Uuid,
  pub at_sequence:  u64,
  pub kind:         TamperKind,
}

impl fmt::Display for TamperFinding {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(
      f,
      "tamper detected in aggregate {} at sequence {}: ",
      self.aggregate_id, self.at_sequence
    )?;
    match &self.kind {
      TamperKind::ContentHashMismatch { stored, computed } => {
        write!(f, "content hash {stored} does not match recomputed {computed}")
      }
      TamperKind::ChainHashMismatch { stored, computed } => {
        write!(f, "chain hash {stored} does not match recomputed {computed}")
      }
      TamperKind::SequenceGap { expected, found: Some(found) } => {
        write!(f, "expected sequence {expected}, found {found}")
      }
      TamperKind::SequenceGap { expected, found: None } => {
        write!(f, "sequence {expected} is missing")
      }
      TamperKind::Unreadable { detail } => write!(f, "stored event is unreadable: {detail}"),
      TamperKind::StateAheadOfLog { state_version, log_head } => {
        write!(f, "state is at version {state_version} but the log ends at {log_head}")
      }
      TamperKind::UnreadableAggregate { stored, detail } => {
        write!(f, "stored aggregate id {stored:?} is unreadable: {detail}")
      }
    }
  }
}

// ─── Reports ─────────────────────────────────────────────────────────────────

/// A clean verification of one aggregate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerificationReport {
  pub aggregate_id:     Uuid,
  pub events_verified:  u64,
  /// The head sequence observed when the scan started; later appends are
  /// outside this report.
  pub verified_through: u64,
  pub head_chain_hash:  String,
  /// Whether the cached state equals the replayed state. `None` when the
  /// state moved past the snapshot during the scan.
  pub state_consistent: Option<bool>,
  pub verified_at:      DateTime<Utc>,
}

/// The result of verifying every aggregate in a store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntegritySummary {
  pub verified_at: DateTime<Utc>,
  pub reports:     Vec<VerificationReport>,
  pub tampered:    Vec<TamperFinding>,
}

impl IntegritySummary {
  pub fn is_clean(&self) -> bool {
    self.tampered.is_empty()
      && self
        .reports
        .iter()
        .all(|r| r.state_consistent != Some(false))
  }
}

// ─── Verifier ────────────────────────────────────────────────────────────────

/// Incremental verifier, fed one event at a time so callers can stream the
/// log in batches.
#[derive(Debug, Clone)]
pub struct ChainVerifier {
  aggregate_id:  Uuid,
  next_sequence: u64,
  previous:      String,
}

impl ChainVerifier {
  pub fn new(aggregate_id: Uuid) -> Self {
    Self {
      aggregate_id,
      next_sequence: 1,
      previous: GENESIS_CHAIN_HASH.to_owned(),
    }
  }

  /// The next sequence number this verifier expects.
  pub fn next_sequence(&self) -> u64 { self.next_sequence }

  pub fn finding(&self, kind: TamperKind) -> TamperFinding {
    TamperFinding {
      aggregate_id: self.aggregate_id,
      at_sequence: self.next_sequence,
      kind,
    }
  }

  /// Verify the next event of the chain.
  pub fn check(&mut self, event: &PersistedEvent) -> Result<(), TamperFinding> {
    if event.sequence_number != self.next_sequence || event.aggregate_id != self.aggregate_id {
      return Err(self.finding(TamperKind::SequenceGap {
        expected: self.next_sequence,
        found:    Some(event.sequence_number),
      }));
    }

    let computed = content_hash(event);
    if computed != event.content_hash {
      return Err(self.finding(TamperKind::ContentHashMismatch {
        stored: event.content_hash.clone(),
        computed,
      }));
    }

    let computed = chain_hash(&self.previous, &computed);
    if computed != event.chain_hash {
      return Err(self.finding(TamperKind::ChainHashMismatch {
        stored: event.chain_hash.clone(),
        computed,
      }));
    }

    self.previous = computed;
    self.next_sequence += 1;
    Ok(())
  }

  /// Close the walk. Every sequence up to `head` must have been checked.
  pub fn finish(
    self,
    head: u64,
    state_consistent: Option<bool>,
  ) -> Result<VerificationReport, TamperFinding> {
    if self.next_sequence <= head {
      return Err(self.finding(TamperKind::SequenceGap {
        expected: self.next_sequence,
        found:    None,
      }));
    }
    Ok(VerificationReport {
      aggregate_id: self.aggregate_id,
      events_verified: self.next_sequence - 1,
      verified_through: head,
      head_chain_hash: self.previous,
      state_consistent,
      verified_at: Utc::now(),
    })
  }
}
