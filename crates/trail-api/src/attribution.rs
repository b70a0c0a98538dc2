//! Attribution as it arrives over HTTP.
//!
//! Clients state who they are, which device they use and when they authored
//! the event. The source address is observed by the server, never taken
//! from the body.

use std::net::{IpAddr, SocketAddr};

use axum::{
  extract::{ConnectInfo, FromRequestParts},
  http::request::Parts,
};
use chrono::{DateTime, FixedOffset};
use serde::Deserialize;
use trail_core::event::Attribution;

use crate::error::ApiError;

/// The client-supplied part of an [`Attribution`].
#[derive(Debug, Clone, Deserialize)]
pub struct AttributionBody {
  pub created_by:       String,
  pub device_id:        String,
  pub client_timestamp: DateTime<FixedOffset>,
  pub session_id:       String,
}

impl AttributionBody {
  pub fn observed_from(self, SourceIp(source_ip): SourceIp) -> Attribution {
    Attribution {
      created_by: self.created_by,
      device_id: self.device_id,
      client_timestamp: self.client_timestamp,
      session_id: self.session_id,
      source_ip,
    }
  }
}

/// The peer address of the request.
///
/// Taken from the connection when the server was started with connect
/// info, otherwise from the first `X-Forwarded-For` hop set by a reverse
/// proxy. A request with neither is rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SourceIp(pub IpAddr);

impl<S: Send + Sync> FromRequestParts<S> for SourceIp {
  type Rejection = ApiError;

  async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
    if let Some(ConnectInfo(addr)) = parts.extensions.get::<ConnectInfo<SocketAddr>>() {
      return Ok(Self(addr.ip()));
    }

    parts
      .headers
      .get("x-forwarded-for")
      .and_then(|v| v.to_str().ok())
      .and_then(|v| v.split(',').next())
      .and_then(|hop| hop.trim().parse().ok())
      .map(Self)
      .ok_or_else(|| ApiError::BadRequest("source address of the request is unknown".into()))
  }
}
