//! trail-server binary.
//!
//! Reads `config.toml` (or the path specified with `--config`) layered under
//! `TRAIL_*` environment variables, opens the SQLite store, and serves the
//! JSON API over HTTP.
//!
//! # Offline integrity sweep
//!
//! ```
//! cargo run -p trail-server -- --verify-all
//! ```
//!
//! Verifies every aggregate's chain, prints the summary as JSON and exits
//! non-zero if anything was tampered with.

use std::{net::SocketAddr, path::PathBuf, sync::Arc};

use anyhow::Context as _;
use clap::Parser;
use tokio::net::TcpListener;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;
use trail_core::store::EventStore;
use trail_server::ServerConfig;
use trail_store_sqlite::SqliteStore;

#[derive(Parser)]
#[command(author, version, about = "Trail clinical event store")]
struct Cli {
  /// Path to the TOML configuration file.
  #[arg(short, long, default_value = "config.toml")]
  config: PathBuf,

  /// Verify the hash chain of every aggregate and exit.
  #[arg(long)]
  verify_all: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
  // Initialise tracing.
  tracing_subscriber::fmt()
    .with_env_filter(
      EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env_lossy(),
    )
    .init();

  let cli = Cli::parse();

  // Load configuration.
  let settings = config::Config::builder()
    .add_source(config::File::from(cli.config).required(false))
    .add_source(config::Environment::with_prefix("TRAIL"))
    .build()
    .context("failed to read config file")?;

  let server_cfg: ServerConfig = settings
    .try_deserialize()
    .context("failed to deserialise ServerConfig")?;
  server_cfg.validate().context("invalid configuration")?;

  let store_path = server_cfg.resolved_store_path();
  let store = SqliteStore::open(&store_path, server_cfg.store_config())
    .await
    .with_context(|| format!("failed to open store at {store_path:?}"))?;

  tracing::info!(
    environment = ?server_cfg.environment,
    write_mode = %server_cfg.write_mode,
    store = %store_path.display(),
    "store opened"
  );

  // Helper mode: verify everything and exit.
  if cli.verify_all {
    let summary = store.verify_all().await.context("integrity sweep failed")?;
    println!("{}", serde_json::to_string_pretty(&summary)?);
    if !summary.is_clean() {
      anyhow::bail!("{} aggregate(s) failed verification", summary.tampered.len());
    }
    return Ok(());
  }

  tokio::spawn(trail_server::log_notifications(store.subscribe()));

  let app = trail_server::router(Arc::new(store));
  let address = server_cfg.address();

  tracing::info!("Listening on http://{address}");
  let listener = TcpListener::bind(&address)
    .await
    .with_context(|| format!("failed to bind {address}"))?;

  axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
    .await
    .context("server error")?;

  Ok(())
}
