//! JSON REST API for Trail.
//!
//! Exposes an axum [`Router`] backed by any [`trail_core::store::EventStore`].
//! Auth, TLS, and transport concerns are the caller's responsibility. The
//! source address recorded in attributions comes from [`SourceIp`], so serve
//! the router with connect info or behind a proxy that sets
//! `X-Forwarded-For`.
//!
//! # Mounting
//!
//! ```rust,ignore
//! .nest("/api", trail_api::api_router(store.clone()))
//! ```

pub mod aggregates;
pub mod attribution;
pub mod conflicts;
pub mod error;
pub mod events;
pub mod integrity;

use std::sync::Arc;

use axum::{
  Router,
  routing::{get, post},
};
use trail_core::store::EventStore;

pub use attribution::SourceIp;
pub use error::ApiError;

/// Build a fully-materialised API router for `store`.
///
/// The returned `Router<()>` can be nested into any parent router regardless
/// of its own state type.
pub fn api_router<S>(store: Arc<S>) -> Router<()>
where
  S: EventStore + 'static,
{
  Router::new()
    // Events
    .route("/events", post(events::submit::<S>))
    .route("/events/{event_id}", get(events::get_one::<S>))
    .route("/validate", post(events::validate_only))
    // Aggregates
    .route("/aggregates/{id}/state", get(aggregates::state::<S>))
    .route("/aggregates/{id}/events", get(aggregates::events::<S>))
    // Conflicts
    .route("/conflicts", get(conflicts::list::<S>))
    .route("/conflicts/{id}", get(conflicts::get_one::<S>))
    .route("/conflicts/{id}/resolve", post(conflicts::resolve::<S>))
    // Integrity
    .route("/integrity", get(integrity::verify_all::<S>))
    .route("/integrity/{aggregate_id}", get(integrity::verify_one::<S>))
    .with_state(store)
}

// ─── Router tests ─────────────────────────────────────────────────────────────
