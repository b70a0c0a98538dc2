//! Core types and trait definitions for the Trail event store.
//!
//! This crate is deliberately free of HTTP and database dependencies. It owns
//! everything that must behave identically wherever it runs: event
//! validation, canonical hashing, reduction rules, the projection decision and
//! chain verification. Storage backends and the API layer depend on it.

// We intentionally use native `async fn` in traits (stabilised in Rust 1.75).
// Suppress the advisory lint about `Send` bounds on the returned futures.
#![allow(async_fn_in_trait)]

pub mod audit;
pub mod config;
pub mod conflict;
pub mod error;
pub mod event;
pub mod hash;
pub mod notify;
pub mod projection;
pub mod reduce;
pub mod state;
pub mod store;
pub mod validate;

pub use error::{Error, Result, ValidationError};
