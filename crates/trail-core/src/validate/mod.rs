//! Event validation.
//!
//! Every event type is registered once, with the major versions it accepts,
//! the checker for its payload and the reduction rule the projector applies.
//! Validation is pure: the same call runs on a device before submission and
//! on the server before append, and it either accepts the whole event or
//! rejects it with the first offending field.

mod annotation;
mod correction;
mod epistaxis;
mod fields;
mod resolution;
mod survey;

use serde_json::Value;

use crate::{
  Error, Result, ValidationError,
  event::{Attribution, CandidateEvent, VersionedType},
  reduce::Reduction,
};

pub use epistaxis::SEVERITIES;
pub use resolution::RESOLUTION_TYPE;

type Checker = fn(&Value) -> Result<(), ValidationError>;

/// A registered event type.
pub struct EventType {
  pub name:      &'static str,
  /// Major versions with a checker; every minor of these is accepted.
  pub majors:    &'static [u32],
  pub reduction: Reduction,
  check:         Checker,
}

impl std::fmt::Debug for EventType {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("EventType")
      .field("name", &self.name)
      .field("majors", &self.majors)
      .field("reduction", &self.reduction)
      .finish_non_exhaustive()
  }
}

impl EventType {
  pub fn check(&self, payload: &Value) -> Result<(), ValidationError> { (self.check)(payload) }
}

static REGISTRY: &[EventType] = &[
  EventType {
    name:      "epistaxis",
    majors:    &[1],
    reduction: Reduction::Replace,
    check:     epistaxis::check,
  },
  EventType {
    name:      "survey",
    majors:    &[1],
    reduction: Reduction::Replace,
    check:     survey::check,
  },
  EventType {
    name:      "annotation",
    majors:    &[1],
    reduction: Reduction::Annotate,
    check:     annotation::check,
  },
  EventType {
    name:      "correction",
    majors:    &[1],
    reduction: Reduction::Merge,
    check:     correction::check,
  },
  EventType {
    name:      "conflict-resolution",
    majors:    &[1],
    reduction: Reduction::Resolve,
    check:     resolution::check,
  },
];

/// All registered event types.
pub fn registry() -> &'static [EventType] { REGISTRY }

/// Resolve a `{type}-v{major}.{minor}` string to its registration.
pub fn lookup(versioned_type: &str) -> Result<&'static EventType> {
  let parsed: VersionedType = versioned_type.parse()?;
  let event_type = REGISTRY
    .iter()
    .find(|t| t.name == parsed.name)
    .ok_or_else(|| Error::UnknownEventType(parsed.name.clone()))?;

  if !event_type.majors.contains(&parsed.major) {
    return Err(Error::UnsupportedVersion {
      event_type: parsed.name,
      major:      parsed.major,
    });
  }
  Ok(event_type)
}

/// Validate a payload against the checker selected by `versioned_type`.
pub fn validate(versioned_type: &str, payload: &Value) -> Result<()> {
  lookup(versioned_type)?.check(payload)?;
  Ok(())
}

/// Attribution metadata must be complete before an event may be chained.
pub fn validate_attribution(attribution: &Attribution) -> Result<(), ValidationError> {
  let fields = [
    ("attribution.created_by", &attribution.created_by),
    ("attribution.device_id", &attribution.device_id),
    ("attribution.session_id", &attribution.session_id),
  ];
  for (field, value) in fields {
    if value.trim().is_empty() {
      return Err(ValidationError::new(field, "must not be empty"));
    }
  }
  Ok(())
}

/// Full server-side admission check for a candidate: type, payload and
/// attribution. Returns the registration so the caller can project with it.
pub fn validate_candidate(event: &CandidateEvent) -> Result<&'static EventType> {
  let event_type = lookup(&event.versioned_type)?;
  event_type.check(&event.payload)?;
  validate_attribution(&event.attribution)?;
  Ok(event_type)
}
