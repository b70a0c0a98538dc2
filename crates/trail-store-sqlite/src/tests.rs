//! Integration tests for `SqliteStore` against an in-memory database.

use std::net::{IpAddr, Ipv4Addr};

use chrono::{DateTime, Utc};
use serde_json::{Value, json};
use trail_core::{
  audit::TamperKind,
  config::StoreConfig,
  conflict::{ConflictFilter, ConflictStatus, Resolution, ResolutionRequest},
  event::{Attribution, CandidateEvent, ProjectionOutcome},
  hash::{GENESIS_CHAIN_HASH, chain_hash},
  notify::Notification,
  state::State,
  store::{ErrorClass, EventStore, StoreError},
};
use uuid::Uuid;

use crate::{Error, SqliteStore};

async fn store() -> SqliteStore {
  SqliteStore::open_in_memory(StoreConfig::default())
    .await
    .expect("in-memory store")
}

fn attribution(device: &str) -> Attribution {
  Attribution {
    created_by:       "participant-7".into(),
    device_id:        device.into(),
    client_timestamp: DateTime::parse_from_rfc3339("2024-03-01T08:45:00+01:00").unwrap(),
    session_id:       "session-1".into(),
    source_ip:        IpAddr::V4(Ipv4Addr::new(10, 0, 0, 7)),
  }
}

fn resolver() -> Attribution {
  Attribution { created_by: "investigator-2".into(), ..attribution("console") }
}

fn nosebleed(severity: &str) -> Value {
  json!({
    "id":        "6f1c2c1e-8a51-4c61-9a43-0c7e0b7f9a10",
    "startTime": "2024-03-01T08:30:00+01:00",
    "endTime":   "2024-03-01T08:42:00+01:00",
    "severity":  severity,
  })
}

fn epistaxis(aggregate_id: Uuid, severity: &str) -> CandidateEvent {
  CandidateEvent::new(aggregate_id, "epistaxis-v1.0", nosebleed(severity), attribution("phone-1"))
}

fn correction(aggregate_id: Uuid, changes: Value) -> CandidateEvent {
  CandidateEvent::new(
    aggregate_id,
    "correction-v1.0",
    json!({ "reason": "entered wrong value", "changes": changes }),
    attribution("phone-1"),
  )
}

fn annotation(aggregate_id: Uuid, text: &str) -> CandidateEvent {
  CandidateEvent::new(
    aggregate_id,
    "annotation-v1.0",
    json!({
      "annotationId": Uuid::new_v4().to_string(),
      "author":       "investigator-2",
      "createdAt":    "2024-03-02T10:00:00Z",
      "text":         text,
    }),
    resolver(),
  )
}

fn request(resolution: Resolution) -> ResolutionRequest {
  ResolutionRequest { resolution, resolver: resolver(), note: Some("reviewed".into()) }
}

/// Leave `aggregate_id` at version 2 with conflict against version 1 open.
async fn conflicted(s: &SqliteStore, aggregate_id: Uuid) -> Uuid {
  s.submit(epistaxis(aggregate_id, "mild")).await.unwrap();
  s.submit(epistaxis(aggregate_id, "moderate").assuming_version(1))
    .await
    .unwrap();
  let late = s
    .submit(epistaxis(aggregate_id, "severe").assuming_version(1))
    .await
    .unwrap();
  match late.projection {
    ProjectionOutcome::Conflicted { conflict_id } => conflict_id,
    other => panic!("expected a conflict, got {other:?}"),
  }
}

// ─── Append ──────────────────────────────────────────────────────────────────

#[tokio::test]
async fn first_event_creates_state() {
  let s = store().await;
  let aggregate_id = Uuid::new_v4();

  let receipt = s.submit(epistaxis(aggregate_id, "mild")).await.unwrap();
  assert_eq!(receipt.projection, ProjectionOutcome::Applied { version: 1 });
  assert_eq!(receipt.event.sequence_number, 1);
  assert_eq!(
    receipt.event.chain_hash,
    chain_hash(GENESIS_CHAIN_HASH, &receipt.event.content_hash)
  );

  let state = s.read_state(aggregate_id).await.unwrap().unwrap();
  assert_eq!(state.version, 1);
  assert_eq!(state.current_payload, nosebleed("mild"));
  assert_eq!(state.last_event_id, receipt.event.event_id);
  assert_eq!(state.updated_at, receipt.event.server_timestamp);
}

#[tokio::test]
async fn persisted_event_round_trips() {
  let s = store().await;
  let receipt = s.submit(epistaxis(Uuid::new_v4(), "mild")).await.unwrap();
  let fetched = s.get_event(receipt.event.event_id).await.unwrap().unwrap();
  assert_eq!(fetched, receipt.event);
}

#[tokio::test]
async fn sequences_are_per_aggregate_and_chained() {
  let s = store().await;
  let a = Uuid::new_v4();
  let b = Uuid::new_v4();

  s.submit(epistaxis(a, "mild")).await.unwrap();
  s.submit(epistaxis(b, "mild")).await.unwrap();
  s.submit(correction(a, json!({ "severity": "severe" })))
    .await
    .unwrap();

  let events = s.list_events(a).await.unwrap();
  assert_eq!(events.iter().map(|e| e.sequence_number).collect::<Vec<_>>(), [1, 2]);
  assert_eq!(
    events[1].chain_hash,
    chain_hash(&events[0].chain_hash, &events[1].content_hash)
  );
  assert_eq!(s.list_events(b).await.unwrap().len(), 1);
}

#[tokio::test]
async fn invalid_event_is_rejected_before_persisting() {
  let s = store().await;
  let aggregate_id = Uuid::new_v4();
  let mut payload = nosebleed("moderate");
  payload["isNoNosebleedsEvent"] = json!(true);
  let event = CandidateEvent::new(aggregate_id, "epistaxis-v1.0", payload, attribution("phone-1"));

  let err = s.submit(event).await.unwrap_err();
  assert_eq!(err.class(), ErrorClass::Validation);
  let validation = err.validation().expect("validation detail");
  assert_eq!(validation.field, "severity");
  assert!(validation.reason.contains("mutually exclusive"));

  assert!(s.list_events(aggregate_id).await.unwrap().is_empty());
  assert!(s.read_state(aggregate_id).await.unwrap().is_none());
}

#[tokio::test]
async fn unknown_type_is_a_validation_class_error() {
  let s = store().await;
  let event = CandidateEvent::new(Uuid::new_v4(), "sneeze-v1.0", json!({}), attribution("phone-1"));
  let err = s.submit(event).await.unwrap_err();
  assert!(matches!(err, Error::Core(trail_core::Error::UnknownEventType(_))));
  assert_eq!(err.class(), ErrorClass::Validation);
}

#[tokio::test]
async fn missing_attribution_is_rejected() {
  let s = store().await;
  let mut event = epistaxis(Uuid::new_v4(), "mild");
  event.attribution.device_id = " ".into();
  let err = s.submit(event).await.unwrap_err();
  assert_eq!(err.validation().unwrap().field, "attribution.device_id");
}

// ─── Idempotency ─────────────────────────────────────────────────────────────

#[tokio::test]
async fn retry_returns_the_original_receipt() {
  let s = store().await;
  let aggregate_id = Uuid::new_v4();
  let event = epistaxis(aggregate_id, "mild");

  let first = s.submit(event.clone()).await.unwrap();
  let second = s.submit(event).await.unwrap();
  assert_eq!(first, second);
  assert_eq!(s.list_events(aggregate_id).await.unwrap().len(), 1);
}

#[tokio::test]
async fn retry_of_a_conflicted_event_reports_the_same_conflict() {
  let s = store().await;
  let aggregate_id = Uuid::new_v4();
  s.submit(epistaxis(aggregate_id, "mild")).await.unwrap();
  s.submit(epistaxis(aggregate_id, "moderate").assuming_version(1))
    .await
    .unwrap();

  let late = epistaxis(aggregate_id, "severe").assuming_version(1);
  let first = s.submit(late.clone()).await.unwrap();
  let second = s.submit(late).await.unwrap();
  assert!(first.projection.is_conflicted());
  assert_eq!(first.projection, second.projection);

  let open = ConflictFilter { aggregate_id: Some(aggregate_id), status: Some(ConflictStatus::Open) };
  assert_eq!(s.list_conflicts(&open).await.unwrap().len(), 1);
}

#[tokio::test]
async fn reused_event_id_with_other_content_is_refused() {
  let s = store().await;
  let aggregate_id = Uuid::new_v4();
  let original = epistaxis(aggregate_id, "mild");
  s.submit(original.clone()).await.unwrap();

  let imposter = CandidateEvent { event_id: original.event_id, ..epistaxis(aggregate_id, "severe") };
  let err = s.submit(imposter).await.unwrap_err();
  assert!(matches!(err, Error::EventIdReused(id) if id == original.event_id));
  assert_eq!(err.class(), ErrorClass::Conflict);
}

// ─── Projection ──────────────────────────────────────────────────────────────

#[tokio::test]
async fn concurrent_writers_at_the_same_version_yield_one_conflict() {
  let s = store().await;
  let aggregate_id = Uuid::new_v4();
  s.submit(epistaxis(aggregate_id, "mild")).await.unwrap();

  let a = epistaxis(aggregate_id, "moderate").assuming_version(1);
  let b = epistaxis(aggregate_id, "severe").assuming_version(1);
  let (ra, rb) = tokio::join!(s.submit(a), s.submit(b));
  let (ra, rb) = (ra.unwrap(), rb.unwrap());

  let conflicted = [&ra, &rb]
    .into_iter()
    .filter(|r| r.projection.is_conflicted())
    .count();
  assert_eq!(conflicted, 1, "exactly one writer loses: {ra:?} {rb:?}");

  let mut sequences = [ra.event.sequence_number, rb.event.sequence_number];
  sequences.sort();
  assert_eq!(sequences, [2, 3]);

  let state = s.read_state(aggregate_id).await.unwrap().unwrap();
  assert_eq!(state.version, 2);

  let conflicts = s.list_conflicts(&ConflictFilter::default()).await.unwrap();
  assert_eq!(conflicts.len(), 1);
  assert_eq!(conflicts[0].base_version, 1);
  assert_eq!(conflicts[0].incoming_sequence, 3);
  assert!(conflicts[0].is_open());
}

#[tokio::test]
async fn same_device_resubmission_converges() {
  let s = store().await;
  let aggregate_id = Uuid::new_v4();
  let original = epistaxis(aggregate_id, "mild");
  s.submit(original.clone()).await.unwrap();

  // Same authored content under a fresh event id, from before the first
  // event was acknowledged.
  let resubmitted = CandidateEvent { event_id: Uuid::new_v4(), ..original }.assuming_version(0);
  let receipt = s.submit(resubmitted).await.unwrap();
  assert_eq!(receipt.projection, ProjectionOutcome::Converged { matched_sequence: 1 });
  assert_eq!(receipt.event.sequence_number, 2);

  assert!(s.list_conflicts(&ConflictFilter::default()).await.unwrap().is_empty());
  assert_eq!(s.read_state(aggregate_id).await.unwrap().unwrap().version, 1);
}

#[tokio::test]
async fn resubmission_matches_only_the_event_that_was_applied() {
  let s = store().await;
  let aggregate_id = Uuid::new_v4();
  s.submit(epistaxis(aggregate_id, "mild")).await.unwrap();
  s.submit(epistaxis(aggregate_id, "moderate").assuming_version(1))
    .await
    .unwrap();
  let loser = epistaxis(aggregate_id, "gushing").assuming_version(1);
  let lost = s.submit(loser.clone()).await.unwrap();
  assert!(lost.projection.is_conflicted());
  let winner = epistaxis(aggregate_id, "severe").assuming_version(2);
  let won = s.submit(winner.clone()).await.unwrap();
  assert_eq!(won.projection, ProjectionOutcome::Applied { version: 4 });

  // Sequence 3 follows base 2 in the log, but it never advanced the state.
  let again = CandidateEvent { event_id: Uuid::new_v4(), ..loser }.assuming_version(2);
  let receipt = s.submit(again).await.unwrap();
  assert!(receipt.projection.is_conflicted());

  let open = ConflictFilter { status: Some(ConflictStatus::Open), ..ConflictFilter::default() };
  assert_eq!(s.list_conflicts(&open).await.unwrap().len(), 2);

  let repeat = CandidateEvent { event_id: Uuid::new_v4(), ..winner };
  let receipt = s.submit(repeat).await.unwrap();
  assert_eq!(receipt.projection, ProjectionOutcome::Converged { matched_sequence: 4 });

  let state = s.read_state(aggregate_id).await.unwrap().unwrap();
  assert_eq!(state.version, 4);
  assert_eq!(state.current_payload["severity"], "severe");
  assert_eq!(s.replay_state(aggregate_id).await.unwrap(), Some(state));
}

#[tokio::test]
async fn identical_content_from_another_device_conflicts() {
  let s = store().await;
  let aggregate_id = Uuid::new_v4();
  s.submit(epistaxis(aggregate_id, "mild")).await.unwrap();

  let other = CandidateEvent::new(aggregate_id, "epistaxis-v1.0", nosebleed("mild"), attribution("tablet-2"))
    .assuming_version(0);
  let receipt = s.submit(other).await.unwrap();
  assert!(receipt.projection.is_conflicted());
}

#[tokio::test]
async fn future_base_on_an_empty_aggregate_conflicts_without_state() {
  let s = store().await;
  let aggregate_id = Uuid::new_v4();
  let receipt = s
    .submit(epistaxis(aggregate_id, "mild").assuming_version(3))
    .await
    .unwrap();
  assert!(receipt.projection.is_conflicted());
  assert!(s.read_state(aggregate_id).await.unwrap().is_none());
}

#[tokio::test]
async fn reductions_fold_corrections_and_annotations() {
  let s = store().await;
  let aggregate_id = Uuid::new_v4();
  s.submit(epistaxis(aggregate_id, "mild")).await.unwrap();
  s.submit(correction(aggregate_id, json!({ "severity": "severe", "endTime": null })))
    .await
    .unwrap();
  s.submit(annotation(aggregate_id, "confirmed by phone"))
    .await
    .unwrap();

  let state = s.read_state(aggregate_id).await.unwrap().unwrap();
  assert_eq!(state.version, 3);
  assert_eq!(state.current_payload["severity"], "severe");
  assert!(state.current_payload.get("endTime").is_none());
  assert_eq!(state.current_payload["annotations"][0]["text"], "confirmed by phone");
}

#[tokio::test]
async fn replay_reproduces_the_cached_state() {
  let s = store().await;
  let aggregate_id = Uuid::new_v4();
  let conflict_id = conflicted(&s, aggregate_id).await;
  s.submit(correction(aggregate_id, json!({ "notes": "after the fact" })))
    .await
    .unwrap();
  s.resolve_conflict(conflict_id, request(Resolution::KeepIncoming))
    .await
    .unwrap();
  s.submit(annotation(aggregate_id, "checked")).await.unwrap();

  let cached = s.read_state(aggregate_id).await.unwrap();
  let replayed = s.replay_state(aggregate_id).await.unwrap();
  assert!(cached.is_some());
  assert_eq!(cached, replayed);
}

// ─── Storage guards ──────────────────────────────────────────────────────────

#[tokio::test]
async fn events_cannot_be_updated_or_deleted() {
  let s = store().await;
  let receipt = s.submit(epistaxis(Uuid::new_v4(), "mild")).await.unwrap();
  let id = receipt.event.event_id;

  let update = s
    .execute_raw(format!("UPDATE events SET payload_json = '{{}}' WHERE event_id = '{id}'"))
    .await;
  assert!(update.is_err());

  let delete = s
    .execute_raw(format!("DELETE FROM events WHERE event_id = '{id}'"))
    .await;
  assert!(delete.is_err());

  assert_eq!(s.get_event(id).await.unwrap().unwrap(), receipt.event);
}

#[tokio::test]
async fn protected_store_rejects_direct_state_writes() {
  let s = store().await;
  let aggregate_id = Uuid::new_v4();
  s.submit(epistaxis(aggregate_id, "mild")).await.unwrap();

  let mut forged = s.read_state(aggregate_id).await.unwrap().unwrap();
  forged.current_payload = json!({ "severity": "minimal" });
  let err = s.seed_state(forged).await.unwrap_err();
  assert!(matches!(err, Error::StateWriteRejected(id) if id == aggregate_id));

  let raw = s
    .execute_raw(format!("DELETE FROM states WHERE aggregate_id = '{aggregate_id}'"))
    .await;
  assert!(raw.is_err());

  let state = s.read_state(aggregate_id).await.unwrap().unwrap();
  assert_eq!(state.current_payload, nosebleed("mild"));
}

#[tokio::test]
async fn permissive_store_allows_seeding() {
  let s = SqliteStore::open_in_memory(StoreConfig::permissive())
    .await
    .unwrap();
  let seeded = State {
    aggregate_id:    Uuid::new_v4(),
    current_payload: json!({ "fixture": true }),
    version:         0,
    last_event_id:   Uuid::new_v4(),
    updated_at:      Utc::now(),
  };
  s.seed_state(seeded.clone()).await.unwrap();
  assert_eq!(s.read_state(seeded.aggregate_id).await.unwrap(), Some(seeded));
}

#[tokio::test]
async fn resolved_conflicts_cannot_be_reopened() {
  let s = store().await;
  let conflict_id = conflicted(&s, Uuid::new_v4()).await;
  s.resolve_conflict(conflict_id, request(Resolution::KeepExisting))
    .await
    .unwrap();

  let reopen = s
    .execute_raw(format!(
      "UPDATE conflicts SET status = 'open' WHERE conflict_id = '{conflict_id}'"
    ))
    .await;
  assert!(reopen.is_err());
  assert!(!s.get_conflict(conflict_id).await.unwrap().unwrap().is_open());
}

#[tokio::test]
async fn open_conflicts_cannot_be_closed_without_a_resolution_event() {
  let s = store().await;
  let conflict_id = conflicted(&s, Uuid::new_v4()).await;
  let closed = s
    .execute_raw(format!(
      "UPDATE conflicts SET status = 'resolved' WHERE conflict_id = '{conflict_id}'"
    ))
    .await;
  assert!(closed.is_err());
}

// ─── Resolution ──────────────────────────────────────────────────────────────

#[tokio::test]
async fn keep_incoming_applies_the_losing_event() {
  let s = store().await;
  let aggregate_id = Uuid::new_v4();
  let conflict_id = conflicted(&s, aggregate_id).await;
  let incoming_event_id = s
    .get_conflict(conflict_id)
    .await
    .unwrap()
    .unwrap()
    .incoming_event_id;

  let resolved = s
    .resolve_conflict(conflict_id, request(Resolution::KeepIncoming))
    .await
    .unwrap();

  assert_eq!(resolved.conflict.status, ConflictStatus::Resolved);
  assert_eq!(resolved.conflict.winning_event_id, Some(incoming_event_id));
  assert_eq!(resolved.conflict.resolution_event_id, Some(resolved.event.event_id));
  assert_eq!(resolved.conflict.resolved_by.as_deref(), Some("investigator-2"));
  assert_eq!(resolved.conflict.resolution_note.as_deref(), Some("reviewed"));
  assert_eq!(resolved.event.versioned_type, "conflict-resolution-v1.0");
  assert_eq!(resolved.event.attribution.created_by, "investigator-2");
  assert_eq!(resolved.event.base_version, Some(2));
  assert_eq!(resolved.state.current_payload, nosebleed("severe"));
  assert_eq!(resolved.state.version, resolved.event.sequence_number);

  assert_eq!(s.get_conflict(conflict_id).await.unwrap(), Some(resolved.conflict));
}

#[tokio::test]
async fn keep_existing_reasserts_the_current_state() {
  let s = store().await;
  let aggregate_id = Uuid::new_v4();
  let conflict_id = conflicted(&s, aggregate_id).await;
  let before = s.read_state(aggregate_id).await.unwrap().unwrap();

  let resolved = s
    .resolve_conflict(conflict_id, request(Resolution::KeepExisting))
    .await
    .unwrap();
  assert_eq!(resolved.conflict.winning_event_id, Some(before.last_event_id));
  assert_eq!(resolved.state.current_payload, before.current_payload);
  assert!(resolved.state.version > before.version);
}

#[tokio::test]
async fn manual_merge_is_validated_against_the_incoming_type() {
  let s = store().await;
  let aggregate_id = Uuid::new_v4();
  let conflict_id = conflicted(&s, aggregate_id).await;

  let mut invalid = nosebleed("moderate");
  invalid["severity"] = json!("catastrophic");
  let err = s
    .resolve_conflict(conflict_id, request(Resolution::ManualMerge(invalid)))
    .await
    .unwrap_err();
  assert_eq!(err.validation().unwrap().field, "resolution.payload.severity");
  assert!(s.get_conflict(conflict_id).await.unwrap().unwrap().is_open());

  let merged = nosebleed("moderate");
  let resolved = s
    .resolve_conflict(conflict_id, request(Resolution::ManualMerge(merged.clone())))
    .await
    .unwrap();
  assert_eq!(resolved.conflict.winning_event_id, Some(resolved.event.event_id));
  assert_eq!(resolved.state.current_payload, merged);
}

#[tokio::test]
async fn resolving_twice_is_refused() {
  let s = store().await;
  let conflict_id = conflicted(&s, Uuid::new_v4()).await;
  s.resolve_conflict(conflict_id, request(Resolution::KeepExisting))
    .await
    .unwrap();
  let err = s
    .resolve_conflict(conflict_id, request(Resolution::KeepIncoming))
    .await
    .unwrap_err();
  assert!(matches!(err, Error::ConflictAlreadyResolved(id) if id == conflict_id));
}

#[tokio::test]
async fn unknown_conflict_is_not_found() {
  let s = store().await;
  let err = s
    .resolve_conflict(Uuid::new_v4(), request(Resolution::KeepExisting))
    .await
    .unwrap_err();
  assert_eq!(err.class(), ErrorClass::NotFound);
}

#[tokio::test]
async fn empty_resolver_is_rejected() {
  let s = store().await;
  let conflict_id = conflicted(&s, Uuid::new_v4()).await;
  let mut req = request(Resolution::KeepExisting);
  req.resolver.created_by = String::new();
  let err = s.resolve_conflict(conflict_id, req).await.unwrap_err();
  assert_eq!(err.validation().unwrap().field, "attribution.created_by");
}

#[tokio::test]
async fn keep_existing_without_state_is_rejected() {
  let s = store().await;
  let aggregate_id = Uuid::new_v4();
  let receipt = s
    .submit(epistaxis(aggregate_id, "mild").assuming_version(3))
    .await
    .unwrap();
  let ProjectionOutcome::Conflicted { conflict_id } = receipt.projection else {
    panic!("expected a conflict");
  };

  let err = s
    .resolve_conflict(conflict_id, request(Resolution::KeepExisting))
    .await
    .unwrap_err();
  assert_eq!(err.class(), ErrorClass::Validation);

  let resolved = s
    .resolve_conflict(conflict_id, request(Resolution::KeepIncoming))
    .await
    .unwrap();
  assert_eq!(resolved.state.current_payload, nosebleed("mild"));
}

// ─── Integrity ───────────────────────────────────────────────────────────────

#[tokio::test]
async fn untampered_chain_verifies_and_matches_replay() {
  let s = store().await;
  let aggregate_id = Uuid::new_v4();
  conflicted(&s, aggregate_id).await;
  let last = s
    .submit(correction(aggregate_id, json!({ "notes": "n" })))
    .await
    .unwrap();

  let report = s.verify_chain(aggregate_id).await.unwrap();
  assert_eq!(report.events_verified, 4);
  assert_eq!(report.verified_through, 4);
  assert_eq!(report.head_chain_hash, last.event.chain_hash);
  assert_eq!(report.state_consistent, Some(true));
}

#[tokio::test]
async fn verification_streams_in_small_batches() {
  let config = StoreConfig { verify_batch_size: 2, ..StoreConfig::default() };
  let s = SqliteStore::open_in_memory(config).await.unwrap();
  let aggregate_id = Uuid::new_v4();
  s.submit(epistaxis(aggregate_id, "mild")).await.unwrap();
  for n in 0..4 {
    s.submit(correction(aggregate_id, json!({ "n": n })))
      .await
      .unwrap();
  }
  let report = s.verify_chain(aggregate_id).await.unwrap();
  assert_eq!(report.events_verified, 5);
}

/// Rewrite columns of one stored event behind the append-only trigger's
/// back. Foreign keys are off so `event_id` itself can be rewritten.
async fn forge(s: &SqliteStore, event_id: Uuid, assignments: &str) {
  s.execute_raw(format!(
    "PRAGMA foreign_keys = OFF;
     DROP TRIGGER events_no_update;
     UPDATE events SET {assignments} WHERE event_id = '{event_id}';"
  ))
  .await
  .unwrap();
}

async fn tamper(s: &SqliteStore, event_id: Uuid, payload: &str) {
  forge(s, event_id, &format!("payload_json = '{payload}'")).await;
}

/// Three events on one aggregate, returning their receipts' event ids.
async fn three_events(s: &SqliteStore, aggregate_id: Uuid) -> [Uuid; 3] {
  let first = s.submit(epistaxis(aggregate_id, "mild")).await.unwrap();
  let second = s
    .submit(correction(aggregate_id, json!({ "severity": "severe" })))
    .await
    .unwrap();
  let third = s.submit(annotation(aggregate_id, "ok")).await.unwrap();
  [first.event.event_id, second.event.event_id, third.event.event_id]
}

async fn expect_tamper_at(s: &SqliteStore, aggregate_id: Uuid, at_sequence: u64) -> TamperKind {
  let err = s.verify_chain(aggregate_id).await.unwrap_err();
  assert_eq!(err.class(), ErrorClass::Tamper);
  let finding = err.tamper().unwrap().clone();
  assert_eq!(finding.at_sequence, at_sequence);

  let flags = s.compliance_flags(Some(aggregate_id)).await.unwrap();
  assert_eq!(flags.len(), 1);
  assert_eq!(flags[0].at_sequence, at_sequence);
  finding.kind
}

#[tokio::test]
async fn forged_attribution_is_detected() {
  let s = store().await;
  let aggregate_id = Uuid::new_v4();
  let [first, ..] = three_events(&s, aggregate_id).await;
  forge(&s, first, "source_ip = '198.51.100.99', session_id = 'forged'").await;

  let kind = expect_tamper_at(&s, aggregate_id, 1).await;
  assert!(matches!(kind, TamperKind::ContentHashMismatch { .. }));
}

#[tokio::test]
async fn forged_server_timestamp_is_detected() {
  let s = store().await;
  let aggregate_id = Uuid::new_v4();
  let [_, second, _] = three_events(&s, aggregate_id).await;
  forge(&s, second, "server_timestamp = '2020-01-01T00:00:00+00:00'").await;

  let kind = expect_tamper_at(&s, aggregate_id, 2).await;
  assert!(matches!(kind, TamperKind::ContentHashMismatch { .. }));
}

#[tokio::test]
async fn forged_base_version_is_detected() {
  let s = store().await;
  let aggregate_id = Uuid::new_v4();
  let [_, second, _] = three_events(&s, aggregate_id).await;
  forge(&s, second, "base_version = 1").await;

  let kind = expect_tamper_at(&s, aggregate_id, 2).await;
  assert!(matches!(kind, TamperKind::ContentHashMismatch { .. }));
}

#[tokio::test]
async fn rewritten_event_id_is_detected() {
  let s = store().await;
  let aggregate_id = Uuid::new_v4();
  let [_, _, third] = three_events(&s, aggregate_id).await;
  forge(&s, third, &format!("event_id = '{}'", Uuid::new_v4())).await;

  let kind = expect_tamper_at(&s, aggregate_id, 3).await;
  assert!(matches!(kind, TamperKind::ContentHashMismatch { .. }));
}

#[tokio::test]
async fn overwritten_chain_hash_is_detected() {
  let s = store().await;
  let aggregate_id = Uuid::new_v4();
  let [_, second, _] = three_events(&s, aggregate_id).await;
  forge(&s, second, &format!("chain_hash = '{}'", "a".repeat(64))).await;

  let kind = expect_tamper_at(&s, aggregate_id, 2).await;
  assert!(matches!(kind, TamperKind::ChainHashMismatch { .. }));
}

#[tokio::test]
async fn edited_payload_is_detected_at_its_sequence() {
  let s = store().await;
  let aggregate_id = Uuid::new_v4();
  s.submit(epistaxis(aggregate_id, "mild")).await.unwrap();
  let second = s
    .submit(correction(aggregate_id, json!({ "severity": "severe" })))
    .await
    .unwrap();
  s.submit(annotation(aggregate_id, "ok")).await.unwrap();

  let mut notifications = s.subscribe();
  tamper(
    &s,
    second.event.event_id,
    r#"{"reason":"entered wrong value","changes":{"severity":"minimal"}}"#,
  )
  .await;

  let err = s.verify_chain(aggregate_id).await.unwrap_err();
  assert_eq!(err.class(), ErrorClass::Tamper);
  let finding = err.tamper().unwrap().clone();
  assert_eq!(finding.at_sequence, 2);
  assert!(matches!(finding.kind, TamperKind::ContentHashMismatch { .. }));

  let flags = s.compliance_flags(Some(aggregate_id)).await.unwrap();
  assert_eq!(flags.len(), 1);
  assert_eq!(flags[0].at_sequence, 2);

  assert_eq!(
    notifications.recv().await.unwrap(),
    Notification::TamperDetected(finding)
  );
}

#[tokio::test]
async fn unparseable_payload_is_reported_as_unreadable() {
  let s = store().await;
  let aggregate_id = Uuid::new_v4();
  let receipt = s.submit(epistaxis(aggregate_id, "mild")).await.unwrap();
  tamper(&s, receipt.event.event_id, "not json").await;

  let err = s.verify_chain(aggregate_id).await.unwrap_err();
  let finding = err.tamper().unwrap();
  assert_eq!(finding.at_sequence, 1);
  assert!(matches!(finding.kind, TamperKind::Unreadable { .. }));
}

#[tokio::test]
async fn state_ahead_of_log_is_tampering() {
  let s = SqliteStore::open_in_memory(StoreConfig::permissive())
    .await
    .unwrap();
  let aggregate_id = Uuid::new_v4();
  s.seed_state(State {
    aggregate_id,
    current_payload: json!({}),
    version: 5,
    last_event_id: Uuid::new_v4(),
    updated_at: Utc::now(),
  })
  .await
  .unwrap();

  let err = s.verify_chain(aggregate_id).await.unwrap_err();
  assert!(matches!(
    err.tamper().unwrap().kind,
    TamperKind::StateAheadOfLog { state_version: 5, log_head: 0 }
  ));
}

#[tokio::test]
async fn verify_all_collects_findings_without_stopping() {
  let s = store().await;
  let clean = Uuid::new_v4();
  let broken = Uuid::new_v4();
  s.submit(epistaxis(clean, "mild")).await.unwrap();
  let receipt = s.submit(epistaxis(broken, "mild")).await.unwrap();
  tamper(&s, receipt.event.event_id, r#"{"severity":"gushing"}"#).await;

  let summary = s.verify_all().await.unwrap();
  assert!(!summary.is_clean());
  assert_eq!(summary.reports.len(), 1);
  assert_eq!(summary.reports[0].aggregate_id, clean);
  assert_eq!(summary.tampered.len(), 1);
  assert_eq!(summary.tampered[0].aggregate_id, broken);
}

#[tokio::test]
async fn verify_all_reports_an_unreadable_aggregate_id() {
  let s = store().await;
  let clean = Uuid::new_v4();
  s.submit(epistaxis(clean, "mild")).await.unwrap();
  s.execute_raw(format!(
    "INSERT INTO events (
       event_id, aggregate_id, sequence_number, versioned_type, payload_json,
       created_by, device_id, client_timestamp, server_timestamp, session_id,
       source_ip, base_version, content_hash, chain_hash
     ) VALUES (
       '{}', 'not-a-uuid', 1, 'epistaxis-v1.0', '{{}}',
       'participant-7', 'phone-1', '2024-03-01T08:45:00+01:00', '2024-03-01T07:45:00+00:00',
       'session-1', '10.0.0.7', NULL, '{zero}', '{zero}'
     );",
    Uuid::new_v4(),
    zero = GENESIS_CHAIN_HASH,
  ))
  .await
  .unwrap();

  let summary = s.verify_all().await.unwrap();
  assert!(!summary.is_clean());
  assert_eq!(summary.reports.len(), 1);
  assert_eq!(summary.reports[0].aggregate_id, clean);
  assert_eq!(summary.tampered.len(), 1);
  assert!(matches!(
    &summary.tampered[0].kind,
    TamperKind::UnreadableAggregate { stored, .. } if stored == "not-a-uuid"
  ));

  let flags = s.compliance_flags(None).await.unwrap();
  assert_eq!(flags.len(), 1);
  assert!(flags[0].detail.contains("not-a-uuid"));
}

// ─── Notifications ───────────────────────────────────────────────────────────

#[tokio::test]
async fn appends_and_conflicts_are_announced() {
  let s = store().await;
  let mut rx = s.subscribe();
  let aggregate_id = Uuid::new_v4();
  let conflict_id = conflicted(&s, aggregate_id).await;

  let mut appended = 0;
  let mut opened = Vec::new();
  while let Ok(notification) = rx.try_recv() {
    match notification {
      Notification::EventAppended { .. } => appended += 1,
      Notification::ConflictOpened { conflict_id, .. } => opened.push(conflict_id),
      other => panic!("unexpected notification {other:?}"),
    }
  }
  assert_eq!(appended, 3);
  assert_eq!(opened, [conflict_id]);

  s.resolve_conflict(conflict_id, request(Resolution::KeepExisting))
    .await
    .unwrap();
  let resolved = std::iter::from_fn(|| rx.try_recv().ok())
    .find(|n| matches!(n, Notification::ConflictResolved { .. }));
  assert!(matches!(
    resolved,
    Some(Notification::ConflictResolved { resolved_by, .. }) if resolved_by == "investigator-2"
  ));
}
