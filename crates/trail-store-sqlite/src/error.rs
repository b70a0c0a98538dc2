//! Error type for `trail-store-sqlite`.

use rusqlite::ErrorCode;
use thiserror::Error;
use trail_core::{
  ValidationError,
  audit::TamperFinding,
  store::{ErrorClass, StoreError},
};
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum Error {
  #[error("core error: {0}")]
  Core(#[from] trail_core::Error),

  #[error("database error: {0}")]
  Database(#[from] tokio_rusqlite::Error),

  #[error("sqlite error: {0}")]
  Sqlite(#[from] rusqlite::Error),

  #[error("json error: {0}")]
  Json(#[from] serde_json::Error),

  #[error("uuid parse error: {0}")]
  Uuid(#[from] uuid::Error),

  /// A stored column holds a value the domain types cannot represent.
  #[error("malformed stored value: {0}")]
  Decode(String),

  /// Another writer took the sequence number first. Retry the submission
  /// with the same `event_id`.
  #[error("sequence {sequence_number} of aggregate {aggregate_id} was taken by a concurrent writer")]
  SequenceRace { aggregate_id: Uuid, sequence_number: u64 },

  /// A resubmitted `event_id` carries different content than the original.
  #[error("event id {0} is already used by an event with different content")]
  EventIdReused(Uuid),

  #[error("conflict not found: {0}")]
  ConflictNotFound(Uuid),

  #[error("conflict {0} is already resolved")]
  ConflictAlreadyResolved(Uuid),

  /// The storage guard rejected a state write from outside the projector.
  #[error("state of aggregate {0} may only be written by the projector")]
  StateWriteRejected(Uuid),
}

impl From<ValidationError> for Error {
  fn from(err: ValidationError) -> Self { Self::Core(err.into()) }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

impl StoreError for Error {
  fn class(&self) -> ErrorClass {
    match self {
      Self::Core(err) => err.class(),
      Self::Database(tokio_rusqlite::Error::Rusqlite(err)) | Self::Sqlite(err) => sqlite_class(err),
      Self::Database(_) => ErrorClass::Unavailable,
      Self::SequenceRace { .. }
      | Self::EventIdReused(_)
      | Self::ConflictAlreadyResolved(_)
      | Self::StateWriteRejected(_) => ErrorClass::Conflict,
      Self::ConflictNotFound(_) => ErrorClass::NotFound,
      Self::Json(_) | Self::Uuid(_) | Self::Decode(_) => ErrorClass::Internal,
    }
  }

  fn validation(&self) -> Option<&ValidationError> {
    match self {
      Self::Core(err) => err.validation(),
      _ => None,
    }
  }

  fn tamper(&self) -> Option<&TamperFinding> {
    match self {
      Self::Core(err) => err.tamper(),
      _ => None,
    }
  }
}

fn sqlite_class(err: &rusqlite::Error) -> ErrorClass {
  match err.sqlite_error_code() {
    Some(
      ErrorCode::DatabaseBusy
      | ErrorCode::DatabaseLocked
      | ErrorCode::CannotOpen
      | ErrorCode::SystemIoFailure
      | ErrorCode::DiskFull
      | ErrorCode::FileLockingProtocolFailed,
    ) => ErrorClass::Unavailable,
    _ => ErrorClass::Internal,
  }
}

/// The message a `RAISE(ABORT, ...)` trigger or a failed constraint left on
/// `err`, if any.
pub(crate) fn constraint_message(err: &rusqlite::Error) -> Option<&str> {
  match err {
    rusqlite::Error::SqliteFailure(failure, message)
      if failure.code == ErrorCode::ConstraintViolation =>
    {
      Some(message.as_deref().unwrap_or_default())
    }
    _ => None,
  }
}
