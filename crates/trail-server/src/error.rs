//! Startup errors for the server.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
  #[error("write_mode = permissive is not allowed when environment = production")]
  PermissiveInProduction,
  #[error("port must not be 0")]
  NoPort,
  #[error("store_path must not be empty")]
  NoStorePath,
}
