//! The `EventStore` trait and the error contract its backends share.
//!
//! The trait is implemented by storage backends (e.g. `trail-store-sqlite`).
//! The API layer depends on this abstraction, not on any concrete backend.

use std::future::Future;

use uuid::Uuid;

use crate::{
  ValidationError,
  audit::{IntegritySummary, TamperFinding, VerificationReport},
  conflict::{Conflict, ConflictFilter, ResolutionRequest, ResolvedState},
  event::{CandidateEvent, EventReceipt, PersistedEvent},
  state::State,
};

// ─── Error contract ──────────────────────────────────────────────────────────

/// Coarse classification of a store failure, for callers that must react
/// differently (retry, surface to the user, escalate).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
  /// Bad input; recoverable by the caller, never persisted.
  Validation,
  NotFound,
  /// Lost a race or an illegal transition; retry with fresh state.
  Conflict,
  /// Integrity failure; must escalate to an operator.
  Tamper,
  /// Transient storage failure; retry with the same idempotency key.
  Unavailable,
  Internal,
}

/// Implemented by backend error types so higher layers can classify them
/// without knowing the backend.
pub trait StoreError: std::error::Error + Send + Sync + 'static {
  fn class(&self) -> ErrorClass;

  fn validation(&self) -> Option<&ValidationError> { None }

  fn tamper(&self) -> Option<&TamperFinding> { None }
}

impl StoreError for crate::Error {
  fn class(&self) -> ErrorClass {
    match self {
      Self::Validation(_) | Self::UnknownEventType(_) | Self::UnsupportedVersion { .. } => {
        ErrorClass::Validation
      }
      Self::TamperDetected(_) => ErrorClass::Tamper,
      Self::Serialization(_) => ErrorClass::Internal,
    }
  }

  fn validation(&self) -> Option<&ValidationError> {
    match self {
      Self::Validation(v) => Some(v),
      _ => None,
    }
  }

  fn tamper(&self) -> Option<&TamperFinding> {
    match self {
      Self::TamperDetected(finding) => Some(finding),
      _ => None,
    }
  }
}

// ─── Trait ───────────────────────────────────────────────────────────────────

/// Abstraction over a Trail event store backend.
///
/// Events are append-only. State rows are derived by the backend's projector
/// and are never written through this trait.
///
/// All methods return `Send` futures so the trait can be used in
/// multi-threaded async runtimes (e.g. tokio with `axum`).
pub trait EventStore: Send + Sync {
  type Error: StoreError;

  // ── Writes ────────────────────────────────────────────────────────────

  /// Validate, append and project one event.
  ///
  /// Re-submitting an already persisted `event_id` returns the original
  /// receipt without appending again. A conflicted projection is a
  /// successful submission.
  fn submit(
    &self,
    event: CandidateEvent,
  ) -> impl Future<Output = Result<EventReceipt, Self::Error>> + Send + '_;

  /// Close an open conflict by appending a corrective event.
  fn resolve_conflict(
    &self,
    conflict_id: Uuid,
    request: ResolutionRequest,
  ) -> impl Future<Output = Result<ResolvedState, Self::Error>> + Send + '_;

  // ── Reads ─────────────────────────────────────────────────────────────

  fn get_event(
    &self,
    event_id: Uuid,
  ) -> impl Future<Output = Result<Option<PersistedEvent>, Self::Error>> + Send + '_;

  /// All events of an aggregate in sequence order.
  fn list_events(
    &self,
    aggregate_id: Uuid,
  ) -> impl Future<Output = Result<Vec<PersistedEvent>, Self::Error>> + Send + '_;

  /// The cached state row. Returns `None` if nothing has been applied yet.
  fn read_state(
    &self,
    aggregate_id: Uuid,
  ) -> impl Future<Output = Result<Option<State>, Self::Error>> + Send + '_;

  /// Re-derive the state from the log without consulting the cache.
  fn replay_state(
    &self,
    aggregate_id: Uuid,
  ) -> impl Future<Output = Result<Option<State>, Self::Error>> + Send + '_;

  fn get_conflict(
    &self,
    conflict_id: Uuid,
  ) -> impl Future<Output = Result<Option<Conflict>, Self::Error>> + Send + '_;

  fn list_conflicts<'a>(
    &'a self,
    filter: &'a ConflictFilter,
  ) -> impl Future<Output = Result<Vec<Conflict>, Self::Error>> + Send + 'a;

  // ── Integrity ─────────────────────────────────────────────────────────

  /// Recompute one aggregate's chain from genesis. Tampering is reported as
  /// an error whose [`StoreError::tamper`] is set.
  fn verify_chain(
    &self,
    aggregate_id: Uuid,
  ) -> impl Future<Output = Result<VerificationReport, Self::Error>> + Send + '_;

  /// Verify every aggregate, collecting tamper findings instead of stopping
  /// at the first.
  fn verify_all(&self) -> impl Future<Output = Result<IntegritySummary, Self::Error>> + Send + '_;
}
