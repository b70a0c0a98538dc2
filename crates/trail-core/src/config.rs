//! Store construction options.

use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumString};

/// Whether state rows may be written outside the projector.
#[derive(
  Debug,
  Clone,
  Copy,
  Default,
  PartialEq,
  Eq,
  Serialize,
  Deserialize,
  Display,
  EnumString,
  AsRefStr,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum WriteMode {
  /// The storage layer rejects every state write that does not come from
  /// the projector. The only mode allowed in production.
  #[default]
  Protected,
  /// Direct state seeding is allowed, for fixtures in development and tests.
  Permissive,
}

/// Passed to a store at construction; never read from ambient globals, so
/// one process can host stores in different modes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
  pub write_mode:            WriteMode,
  /// Events fetched per round-trip while verifying a chain.
  pub verify_batch_size:     usize,
  /// Buffered notifications per subscriber before the slowest lags.
  pub notification_capacity: usize,
}

impl Default for StoreConfig {
  fn default() -> Self {
    Self {
      write_mode:            WriteMode::Protected,
      verify_batch_size:     500,
      notification_capacity: 1024,
    }
  }
}

impl StoreConfig {
  pub fn permissive() -> Self {
    Self { write_mode: WriteMode::Permissive, ..Self::default() }
  }
}
