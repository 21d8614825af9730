//! Request and response types for the HTTP API that are not core records.
//!
//! Sandbox records, create requests and endpoints are serialized straight
//! from the sandgate-core types.

use serde::{Deserialize, Serialize};

/// Query string of `GET /v1/sandboxes/{id}/endpoints/{port}`.
#[derive(Debug, Default, Deserialize)]
pub struct EndpointQuery {
    /// Return the control plane's proxy path instead of the raw address.
    #[serde(default)]
    pub use_server_proxy: bool,
}

/// Body of `GET /health`.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    /// Always `healthy` while the server answers.
    pub status: &'static str,
    /// Service name.
    pub service: &'static str,
    /// Crate version.
    pub version: &'static str,
}

impl HealthResponse {
    /// Response for a live server.
    pub fn healthy() -> Self {
        Self {
            status: "healthy",
            service: "sandgate-server",
            version: env!("CARGO_PKG_VERSION"),
        }
    }
}
