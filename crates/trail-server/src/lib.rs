//! HTTP server for Trail.
//!
//! Wraps the [`trail_api`] router with a health check and request tracing,
//! and owns the deployment configuration.

pub mod error;

pub use error::Error;

use std::{
  path::{Path, PathBuf},
  sync::Arc,
};

use axum::{Router, routing::get};
use serde::Deserialize;
use tokio::sync::broadcast::{self, error::RecvError};
use tower_http::trace::TraceLayer;
use trail_core::{
  config::{StoreConfig, WriteMode},
  notify::Notification,
  store::EventStore,
};

// ─── Configuration ────────────────────────────────────────────────────────────

/// Where the server runs. Production refuses a permissive store.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
  #[default]
  Production,
  Development,
}

/// Runtime server configuration, deserialised from `config.toml` and
/// `TRAIL_*` environment variables.
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ServerConfig {
  pub host:        String,
  pub port:        u16,
  pub store_path:  PathBuf,
  pub environment: Environment,
  pub write_mode:  WriteMode,
}

impl Default for ServerConfig {
  fn default() -> Self {
    Self {
      host:        "127.0.0.1".to_string(),
      port:        8080,
      store_path:  PathBuf::from("trail.db"),
      environment: Environment::Production,
      write_mode:  WriteMode::Protected,
    }
  }
}

impl ServerConfig {
  pub fn validate(&self) -> Result<(), Error> {
    if self.port == 0 {
      return Err(Error::NoPort);
    }
    if self.store_path.as_os_str().is_empty() {
      return Err(Error::NoStorePath);
    }
    if self.environment == Environment::Production && self.write_mode == WriteMode::Permissive {
      return Err(Error::PermissiveInProduction);
    }
    Ok(())
  }

  pub fn store_config(&self) -> StoreConfig {
    StoreConfig { write_mode: self.write_mode, ..StoreConfig::default() }
  }

  pub fn address(&self) -> String { format!("{}:{}", self.host, self.port) }

  /// `store_path` with a leading `~` expanded to the user's home directory.
  pub fn resolved_store_path(&self) -> PathBuf { expand_tilde(&self.store_path) }
}

fn expand_tilde(path: &Path) -> PathBuf {
  let s = path.to_string_lossy();
  if let Some(rest) = s.strip_prefix("~/")
    && let Ok(home) = std::env::var("HOME")
  {
    return PathBuf::from(home).join(rest);
  }
  path.to_path_buf()
}

// ─── Router ───────────────────────────────────────────────────────────────────

/// The full application: the API under `/api` plus `/health`.
pub fn router<S: EventStore + 'static>(store: Arc<S>) -> Router {
  Router::new()
    .route("/health", get(health))
    .nest("/api", trail_api::api_router(store))
    .layer(TraceLayer::new_for_http())
}

async fn health() -> &'static str { "ok" }

// ─── Notifications ────────────────────────────────────────────────────────────

/// Log every notification until the store is dropped.
pub async fn log_notifications(mut rx: broadcast::Receiver<Notification>) {
  loop {
    match rx.recv().await {
      Ok(Notification::EventAppended { event_id, aggregate_id, sequence_number, versioned_type }) => {
        tracing::debug!(%event_id, %aggregate_id, sequence_number, %versioned_type, "event appended");
      }
      Ok(Notification::ConflictOpened { conflict_id, aggregate_id, incoming_event_id }) => {
        tracing::info!(%conflict_id, %aggregate_id, %incoming_event_id, "conflict opened");
      }
      Ok(Notification::ConflictResolved { conflict_id, aggregate_id, resolved_by, .. }) => {
        tracing::info!(%conflict_id, %aggregate_id, %resolved_by, "conflict resolved");
      }
      Ok(Notification::TamperDetected(finding)) => {
        tracing::error!(target: "trail::audit", %finding, "tamper detected");
      }
      Err(RecvError::Lagged(missed)) => {
        tracing::warn!(missed, "notification subscriber lagged");
      }
      Err(RecvError::Closed) => break,
    }
  }
}

// ─── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
  use super::*;

  use axum::{
    body::Body,
    http::{Request, StatusCode},
  };
  use tower::ServiceExt as _;
  use trail_store_sqlite::SqliteStore;

  async fn app() -> Router {
    let store = SqliteStore::open_in_memory(StoreConfig::default()).await.unwrap();
    router(Arc::new(store))
  }

  #[test]
  fn defaults_are_valid_and_protected() {
    let cfg = ServerConfig::default();
    cfg.validate().unwrap();
    assert_eq!(cfg.store_config().write_mode, WriteMode::Protected);
  }

  #[test]
  fn permissive_is_refused_in_production() {
    let cfg = ServerConfig { write_mode: WriteMode::Permissive, ..ServerConfig::default() };
    assert!(matches!(cfg.validate(), Err(Error::PermissiveInProduction)));

    let dev = ServerConfig { environment: Environment::Development, ..cfg };
    dev.validate().unwrap();
    assert_eq!(dev.store_config().write_mode, WriteMode::Permissive);
  }

  #[test]
  fn zero_port_is_rejected() {
    let cfg = ServerConfig { port: 0, ..ServerConfig::default() };
    assert!(matches!(cfg.validate(), Err(Error::NoPort)));
  }

  #[test]
  fn config_layers_deserialise() {
    let settings = config::Config::builder()
      .set_override("port", 9100)
      .unwrap()
      .set_override("environment", "development")
      .unwrap()
      .set_override("write_mode", "permissive")
      .unwrap()
      .build()
      .unwrap();
    let cfg: ServerConfig = settings.try_deserialize().unwrap();
    assert_eq!(cfg.port, 9100);
    assert_eq!(cfg.host, "127.0.0.1");
    assert_eq!(cfg.environment, Environment::Development);
    assert_eq!(cfg.write_mode, WriteMode::Permissive);
  }

  #[test]
  fn tilde_expands_to_home() {
    let Ok(home) = std::env::var("HOME") else { return };
    let cfg = ServerConfig { store_path: PathBuf::from("~/trail.db"), ..ServerConfig::default() };
    assert_eq!(cfg.resolved_store_path(), PathBuf::from(home).join("trail.db"));
  }

  #[tokio::test]
  async fn health_returns_ok() {
    let req = Request::builder().uri("/health").body(Body::empty()).unwrap();
    let resp = app().await.oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
    assert_eq!(&bytes[..], b"ok");
  }

  #[tokio::test]
  async fn api_is_nested_under_prefix() {
    let req = Request::builder().uri("/api/integrity").body(Body::empty()).unwrap();
    let resp = app().await.oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);

    let req = Request::builder().uri("/integrity").body(Body::empty()).unwrap();
    let resp = app().await.oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
  }
}
