//! Error types for `trail-core`.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::audit::TamperFinding;

/// A payload or attribution field failed a structural or business rule.
///
/// `field` is a path into the submitted document (e.g. `responses[2].index`)
/// so the caller can point at the offending input.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationError {
  pub field:  String,
  pub reason: String,
}

impl ValidationError {
  pub fn new(field: impl Into<String>, reason: impl Into<String>) -> Self {
    Self { field: field.into(), reason: reason.into() }
  }
}

impl fmt::Display for ValidationError {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "`{}`: {}", self.field, self.reason)
  }
}

impl std::error::Error for ValidationError {}

#[derive(Debug, Error)]
pub enum Error {
  #[error("validation failed at {0}")]
  Validation(#[from] ValidationError),

  #[error("unknown event type: {0:?}")]
  UnknownEventType(String),

  #[error("event type {event_type:?} has no validator for major version {major}")]
  UnsupportedVersion { event_type: String, major: u32 },

  #[error("{0}")]
  TamperDetected(TamperFinding),

  #[error("serialization error: {0}")]
  Serialization(#[from] serde_json::Error),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
