//! The projection decision: does an appended event advance the state, repeat
//! something already applied, or diverge?
//!
//! An event's *base* is the version its submitter assumed was current. Events
//! submitted without a hint assume whatever is current. The decision only
//! depends on the aggregate's history, so replaying the log reproduces the
//! state exactly.
//!
//! A late event converges only if its authored content equals the applied
//! event that moved the state away from its base. Conflicted and converged
//! events never advanced the state, so matching one of them is a conflict.

use std::collections::BTreeMap;

use crate::{Result, event::PersistedEvent, hash::AuthoredContent, state::State, validate};

/// What the projector does with one event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
  /// First applied event of the aggregate; create the state row.
  Create,
  /// Base matches the current version; apply the reduction.
  Apply,
  /// A late event repeating the applied event at `matched_sequence`, the
  /// one that advanced the state from the late event's base.
  Converge { matched_sequence: u64 },
  /// A late or unknown base with different content.
  Conflict { base_version: u64 },
}

/// An event that advanced an aggregate's state, as the decision needs it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppliedEvent {
  pub sequence_number: u64,
  /// [`AuthoredContent::digest`] of the event.
  pub authored:        String,
}

/// The version `event` assumed, given the aggregate's current version.
pub fn assumed_base(event: &PersistedEvent, current_version: u64) -> u64 {
  event.base_version.unwrap_or(current_version)
}

/// Decide the fate of `event` against `state`.
///
/// `applied_after` returns the first applied event of the same aggregate
/// with a sequence number above the given base. It is only consulted for
/// late events.
pub fn decide<E>(
  state: Option<&State>,
  event: &PersistedEvent,
  applied_after: impl FnOnce(u64) -> Result<Option<AppliedEvent>, E>,
) -> Result<Decision, E> {
  let current = state.map_or(0, |s| s.version);
  let base = assumed_base(event, current);

  if base == current {
    return Ok(if state.is_some() { Decision::Apply } else { Decision::Create });
  }

  if base < current
    && let Some(applied) = applied_after(base)?
    && applied.authored == AuthoredContent::of_persisted(event).digest()
  {
    return Ok(Decision::Converge { matched_sequence: applied.sequence_number });
  }

  Ok(Decision::Conflict { base_version: base })
}

/// Incremental replay, fed one event at a time in sequence order, for
/// callers that stream the log instead of loading it whole.
#[derive(Debug, Clone, Default)]
pub struct Replay {
  state:   Option<State>,
  /// Authored digests of applied events, by sequence number.
  applied: BTreeMap<u64, String>,
}

impl Replay {
  pub fn new() -> Self { Self::default() }

  /// Project the next event, returning the decision the projector made.
  pub fn feed(&mut self, event: &PersistedEvent) -> Result<Decision> {
    let applied = &self.applied;
    let decision = decide(self.state.as_ref(), event, |base| {
      Ok::<_, crate::Error>(applied.range(base + 1..).next().map(|(seq, authored)| {
        AppliedEvent { sequence_number: *seq, authored: authored.clone() }
      }))
    })?;

    if matches!(decision, Decision::Create | Decision::Apply) {
      let reduction = validate::lookup(&event.versioned_type)?.reduction;
      self.state = Some(State::advance(self.state.as_ref(), event, reduction));
      self
        .applied
        .insert(event.sequence_number, AuthoredContent::of_persisted(event).digest());
    }
    Ok(decision)
  }

  pub fn state(&self) -> Option<&State> { self.state.as_ref() }

  pub fn into_state(self) -> Option<State> { self.state }
}

/// Rebuild an aggregate's state from its events in sequence order, using
/// the same decisions the projector made when they were appended.
pub fn replay<'a>(events: impl IntoIterator<Item = &'a PersistedEvent>) -> Result<Option<State>> {
  let mut replay = Replay::new();
  for event in events {
    replay.feed(event)?;
  }
  Ok(replay.into_state())
}
