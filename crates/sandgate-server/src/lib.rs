//! # sandgate-server
//!
//! HTTP API for the Sandgate control plane. Wraps a
//! [`LifecycleController`](sandgate_core::LifecycleController) with API-key
//! authentication, JSON error bodies and environment-based configuration.

pub mod config;
pub mod error;
pub mod http;
mod server;
pub mod types;

pub use config::{ConfigError, SandgateConfig, API_KEY_HEADER};
pub use error::{ApiError, ErrorBody};
pub use server::SandgateServer;
