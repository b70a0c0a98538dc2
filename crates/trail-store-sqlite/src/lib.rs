//! SQLite backend for the Trail event store.
//!
//! Wraps [`tokio_rusqlite`] so all database access runs on a dedicated
//! thread without blocking the async runtime. Appends and projections share
//! one transaction; immutability and the state guard are enforced by
//! SQLite triggers.

mod auditor;
mod encode;
mod locks;
mod log;
mod projector;
mod schema;
mod store;

pub mod error;

pub use auditor::ComplianceFlag;
pub use error::{Error, Result};
pub use store::SqliteStore;

#[cfg(test)]
mod tests;
