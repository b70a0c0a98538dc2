//! The SQLite implementation of [`EventStore`], [`SqliteStore`].

use std::{path::Path, sync::Arc};

use chrono::Utc;
use rusqlite::{Connection, TransactionBehavior, params};
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use trail_core::{
  audit::{ChainVerifier, IntegritySummary, TamperFinding, TamperKind, VerificationReport},
  config::{StoreConfig, WriteMode},
  conflict::{Conflict, ConflictFilter, ResolutionRequest, ResolvedState},
  event::{CandidateEvent, EventReceipt, PersistedEvent},
  hash::AuthoredContent,
  notify::Notification,
  projection::{self, Replay},
  reduce::Reduction,
  state::State,
  store::{EventStore, StoreError},
  validate,
};

use crate::{
  Error, Result,
  auditor::{self, ComplianceFlag, Resolved},
  encode::decode_uuid,
  error::constraint_message,
  locks::AggregateLocks,
  log, projector,
  schema::SCHEMA,
};

// ─── Store ───────────────────────────────────────────────────────────────────

/// A Trail event store backed by a single SQLite file.
///
/// Cloning is cheap; clones share the connection, the aggregate locks and
/// the notification channel.
#[derive(Clone)]
pub struct SqliteStore {
  conn:          tokio_rusqlite::Connection,
  config:        StoreConfig,
  locks:         Arc<AggregateLocks>,
  notifications: broadcast::Sender<Notification>,
}

/// A committed submission and whether it was an idempotent retry.
struct Submitted {
  receipt:  EventReceipt,
  conflict: Option<Conflict>,
  retried:  bool,
}

impl SqliteStore {
  /// Open (or create) a store at `path` and run schema initialisation.
  pub async fn open(path: impl AsRef<Path>, config: StoreConfig) -> Result<Self> {
    let conn = tokio_rusqlite::Connection::open(path).await?;
    Self::init(conn, config).await
  }

  /// Open an in-memory store: useful for testing.
  pub async fn open_in_memory(config: StoreConfig) -> Result<Self> {
    let conn = tokio_rusqlite::Connection::open_in_memory().await?;
    Self::init(conn, config).await
  }

  async fn init(conn: tokio_rusqlite::Connection, config: StoreConfig) -> Result<Self> {
    let (notifications, _) = broadcast::channel(config.notification_capacity.max(1));
    let write_mode = config.write_mode;
    let store = Self {
      conn,
      config,
      locks: Arc::new(AggregateLocks::default()),
      notifications,
    };

    let protected = write_mode == WriteMode::Protected;
    store
      .with_conn(move |conn| {
        conn.execute_batch(SCHEMA)?;
        conn.execute(
          "UPDATE write_guard SET protected = ?1, projector_active = 0 WHERE id = 1",
          params![protected],
        )?;
        Ok(())
      })
      .await?;

    info!(%write_mode, "trail store opened");
    Ok(store)
  }

  pub fn config(&self) -> &StoreConfig { &self.config }

  /// Receive every notification emitted after this call. Delivery is
  /// at-least-once; idempotent retries announce their event again.
  pub fn subscribe(&self) -> broadcast::Receiver<Notification> { self.notifications.subscribe() }

  /// Write a state row directly, bypassing the projector.
  ///
  /// Only succeeds in [`WriteMode::Permissive`]; a protected store rejects
  /// the write inside SQLite with [`Error::StateWriteRejected`].
  pub async fn seed_state(&self, state: State) -> Result<()> {
    let aggregate_id = state.aggregate_id;
    self
      .with_conn(move |conn| match projector::write_state(conn, &state) {
        Ok(()) => Ok(()),
        Err(err) if constraint_message(&err).is_some() => Err(Error::StateWriteRejected(aggregate_id)),
        Err(err) => Err(err.into()),
      })
      .await
      .inspect_err(|err| warn!(%aggregate_id, error = %err, "state seed rejected"))
  }

  /// Compliance flags raised by verification, oldest first.
  pub async fn compliance_flags(&self, aggregate_id: Option<Uuid>) -> Result<Vec<ComplianceFlag>> {
    self
      .with_conn(move |conn| auditor::list_flags(conn, aggregate_id))
      .await
  }

  /// Run `f` on the connection thread, flattening both error layers.
  async fn with_conn<T, F>(&self, f: F) -> Result<T>
  where
    F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
    T: Send + 'static,
  {
    self.conn.call(move |conn| Ok(f(conn))).await?
  }

  /// Execute raw SQL against the store, bypassing every code path above.
  #[cfg(test)]
  pub(crate) async fn execute_raw(&self, sql: impl Into<String>) -> Result<()> {
    let sql = sql.into();
    self
      .with_conn(move |conn| Ok(conn.execute_batch(&sql)?))
      .await
  }

  fn announce(&self, notification: Notification) {
    // No subscribers is not an error.
    let _ = self.notifications.send(notification);
  }

  // ── Integrity ─────────────────────────────────────────────────────────────

  /// Walk one chain. The outer error is a storage failure; the inner one a
  /// tamper finding.
  async fn scan(&self, aggregate_id: Uuid) -> Result<Result<VerificationReport, TamperFinding>> {
    let snapshot = self
      .with_conn(move |conn| auditor::snapshot(conn, aggregate_id))
      .await?;

    if let Some(state_version) = snapshot.state_version.filter(|v| *v > snapshot.head) {
      return Ok(Err(TamperFinding {
        aggregate_id,
        at_sequence: state_version,
        kind: TamperKind::StateAheadOfLog { state_version, log_head: snapshot.head },
      }));
    }

    let mut verifier = ChainVerifier::new(aggregate_id);
    let mut replay = Some(Replay::new());
    let batch = self.config.verify_batch_size.max(1);

    while verifier.next_sequence() <= snapshot.head {
      let from = verifier.next_sequence();
      let through = snapshot.head;
      let rows = self
        .with_conn(move |conn| log::raw_page(conn, aggregate_id, from, through, batch))
        .await?;
      if rows.is_empty() {
        break;
      }

      for raw in rows {
        let event = match raw.into_event() {
          Ok(event) => event,
          Err(err) => {
            return Ok(Err(verifier.finding(TamperKind::Unreadable { detail: err.to_string() })));
          }
        };
        if let Err(finding) = verifier.check(&event) {
          return Ok(Err(finding));
        }
        let replay_failure = replay.as_mut().and_then(|r| r.feed(&event).err());
        if let Some(err) = replay_failure {
          warn!(%aggregate_id, error = %err, "replay stopped; state consistency unknown");
          replay = None;
        }
      }
    }

    let cached = self
      .with_conn(move |conn| projector::read_state(conn, aggregate_id))
      .await?;
    let state_consistent = match replay {
      Some(replay) if cached.as_ref().map(|s| s.version) == snapshot.state_version => {
        Some(cached.as_ref() == replay.state())
      }
      _ => None,
    };
    if state_consistent == Some(false) {
      warn!(%aggregate_id, "cached state differs from replayed state");
    }

    Ok(verifier.finish(snapshot.head, state_consistent))
  }

  /// Record and announce a tamper finding. Never retries or repairs.
  async fn escalate(&self, finding: TamperFinding) -> Error {
    error!(
      target: "trail::audit",
      aggregate_id = %finding.aggregate_id,
      at_sequence = finding.at_sequence,
      "{finding}"
    );

    let flagged = finding.clone();
    if let Err(err) = self
      .with_conn(move |conn| auditor::record_flag(conn, &flagged))
      .await
    {
      error!(target: "trail::audit", error = %err, "failed to record compliance flag");
    }

    self.announce(Notification::TamperDetected(finding.clone()));
    trail_core::Error::TamperDetected(finding).into()
  }
}

// ─── Pipelines ───────────────────────────────────────────────────────────────

/// Idempotency check, append and projection in one `IMMEDIATE` transaction.
fn submit_in(
  conn: &mut Connection,
  event: CandidateEvent,
  authored: String,
  reduction: Reduction,
) -> Result<Submitted> {
  let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

  if let Some(existing) = log::find_event(&tx, event.event_id)? {
    if AuthoredContent::of_persisted(&existing).digest() != authored {
      return Err(Error::EventIdReused(event.event_id));
    }
    let projection = projector::recorded_outcome(&tx, event.event_id)?.ok_or_else(|| {
      Error::Decode(format!("event {} has no projection record", event.event_id))
    })?;
    return Ok(Submitted {
      receipt:  EventReceipt { event: existing, projection },
      conflict: None,
      retried:  true,
    });
  }

  let persisted = log::append(&tx, event)?;
  let projection = projector::project(&tx, &persisted, reduction)?;
  tx.commit()?;

  Ok(Submitted {
    receipt:  EventReceipt { event: persisted, projection: projection.outcome },
    conflict: projection.conflict,
    retried:  false,
  })
}

fn resolve_in(
  conn: &mut Connection,
  conflict_id: Uuid,
  request: &ResolutionRequest,
) -> Result<ResolvedState> {
  let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
  let Resolved { conflict, event } = auditor::resolve(&tx, conflict_id, request)?;
  let state = projector::read_state(&tx, conflict.aggregate_id)?.ok_or_else(|| {
    Error::Decode(format!("aggregate {} has no state after resolution", conflict.aggregate_id))
  })?;
  tx.commit()?;
  Ok(ResolvedState { conflict, event, state })
}

// ─── EventStore impl ─────────────────────────────────────────────────────────

impl EventStore for SqliteStore {
  type Error = Error;

  // ── Writes ────────────────────────────────────────────────────────────────

  async fn submit(&self, event: CandidateEvent) -> Result<EventReceipt> {
    let event_type = validate::validate_candidate(&event)?;
    let reduction = event_type.reduction;
    let authored = AuthoredContent::of_candidate(&event).digest();
    let aggregate_id = event.aggregate_id;

    let submitted = {
      let _guard = self.locks.acquire(aggregate_id).await;
      self
        .with_conn(move |conn| submit_in(conn, event, authored, reduction))
        .await?
    };

    let receipt = &submitted.receipt;
    let persisted = &receipt.event;
    debug!(
      event_id = %persisted.event_id,
      %aggregate_id,
      sequence_number = persisted.sequence_number,
      versioned_type = %persisted.versioned_type,
      retried = submitted.retried,
      "event appended"
    );

    self.announce(Notification::EventAppended {
      event_id:        persisted.event_id,
      aggregate_id,
      sequence_number: persisted.sequence_number,
      versioned_type:  persisted.versioned_type.clone(),
    });

    if let Some(conflict) = &submitted.conflict {
      info!(
        conflict_id = %conflict.conflict_id,
        %aggregate_id,
        base_version = conflict.base_version,
        incoming_event_id = %conflict.incoming_event_id,
        "conflict opened"
      );
      self.announce(Notification::ConflictOpened {
        conflict_id:       conflict.conflict_id,
        aggregate_id,
        incoming_event_id: conflict.incoming_event_id,
      });
    }

    Ok(submitted.receipt)
  }

  async fn resolve_conflict(
    &self,
    conflict_id: Uuid,
    request: ResolutionRequest,
  ) -> Result<ResolvedState> {
    validate::validate_attribution(&request.resolver)?;

    let conflict = self
      .with_conn(move |conn| auditor::open_conflict(conn, conflict_id))
      .await?;

    let resolved = {
      let _guard = self.locks.acquire(conflict.aggregate_id).await;
      self
        .with_conn(move |conn| resolve_in(conn, conflict_id, &request))
        .await?
    };

    let closed = &resolved.conflict;
    info!(
      %conflict_id,
      aggregate_id = %closed.aggregate_id,
      resolution_event_id = %resolved.event.event_id,
      resolved_by = closed.resolved_by.as_deref().unwrap_or_default(),
      "conflict resolved"
    );

    self.announce(Notification::EventAppended {
      event_id:        resolved.event.event_id,
      aggregate_id:    closed.aggregate_id,
      sequence_number: resolved.event.sequence_number,
      versioned_type:  resolved.event.versioned_type.clone(),
    });
    self.announce(Notification::ConflictResolved {
      conflict_id,
      aggregate_id: closed.aggregate_id,
      resolution_event_id: resolved.event.event_id,
      resolved_by: closed.resolved_by.clone().unwrap_or_default(),
    });

    Ok(resolved)
  }

  // ── Reads ─────────────────────────────────────────────────────────────────

  async fn get_event(&self, event_id: Uuid) -> Result<Option<PersistedEvent>> {
    self
      .with_conn(move |conn| log::find_event(conn, event_id))
      .await
  }

  async fn list_events(&self, aggregate_id: Uuid) -> Result<Vec<PersistedEvent>> {
    self
      .with_conn(move |conn| log::list_events(conn, aggregate_id))
      .await
  }

  async fn read_state(&self, aggregate_id: Uuid) -> Result<Option<State>> {
    self
      .with_conn(move |conn| projector::read_state(conn, aggregate_id))
      .await
  }

  async fn replay_state(&self, aggregate_id: Uuid) -> Result<Option<State>> {
    let events = self.list_events(aggregate_id).await?;
    Ok(projection::replay(&events)?)
  }

  async fn get_conflict(&self, conflict_id: Uuid) -> Result<Option<Conflict>> {
    self
      .with_conn(move |conn| projector::find_conflict(conn, conflict_id))
      .await
  }

  async fn list_conflicts(&self, filter: &ConflictFilter) -> Result<Vec<Conflict>> {
    let filter = filter.clone();
    self
      .with_conn(move |conn| auditor::list_conflicts(conn, &filter))
      .await
  }

  // ── Integrity ─────────────────────────────────────────────────────────────

  async fn verify_chain(&self, aggregate_id: Uuid) -> Result<VerificationReport> {
    match self.scan(aggregate_id).await? {
      Ok(report) => {
        debug!(
          %aggregate_id,
          events_verified = report.events_verified,
          state_consistent = ?report.state_consistent,
          "chain verified"
        );
        Ok(report)
      }
      Err(finding) => Err(self.escalate(finding).await),
    }
  }

  async fn verify_all(&self) -> Result<IntegritySummary> {
    let ids = self
      .with_conn(|conn| {
        let mut ids = log::aggregate_ids(conn)?;
        ids.extend(projector::aggregate_ids(conn)?);
        ids.sort();
        ids.dedup();
        Ok(ids)
      })
      .await?;

    let mut reports = Vec::with_capacity(ids.len());
    let mut tampered = Vec::new();
    for id in ids {
      let aggregate_id = match decode_uuid(&id) {
        Ok(aggregate_id) => aggregate_id,
        Err(err) => {
          let finding = TamperFinding {
            aggregate_id: Uuid::nil(),
            at_sequence:  0,
            kind:         TamperKind::UnreadableAggregate { stored: id, detail: err.to_string() },
          };
          let _ = self.escalate(finding.clone()).await;
          tampered.push(finding);
          continue;
        }
      };
      match self.verify_chain(aggregate_id).await {
        Ok(report) => reports.push(report),
        Err(err) => match err.tamper() {
          Some(finding) => tampered.push(finding.clone()),
          None => return Err(err),
        },
      }
    }

    info!(
      aggregates = reports.len() + tampered.len(),
      tampered = tampered.len(),
      "integrity sweep finished"
    );
    Ok(IntegritySummary { verified_at: Utc::now(), reports, tampered })
  }
}
