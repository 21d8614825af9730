//! # sandgate-core
//!
//! Control-plane logic for ephemeral, network-isolated sandboxes.
//!
//! This crate decides how a sandbox port becomes an external address, gates
//! creation on a bounded readiness probe, validates egress policy, and drives
//! the sandbox lifecycle through an explicit state machine. Provisioning,
//! network enforcement and credential storage are external collaborators
//! reached through traits.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                  sandgate-core (host)                    │
//! ├──────────────────────────────────────────────────────────┤
//! │                                                          │
//! │  ┌─────────────────────┐    ┌────────────────────────┐   │
//! │  │ LifecycleController │───▶│ dyn SandboxBackend     │   │
//! │  │   - create()        │    │   provision / describe │   │
//! │  │   - pause()         │    │   update_state / submit│   │
//! │  │   - resume()        │    │   endpoint ──▶ ingress │   │
//! │  │   - get_endpoint()  │    └────────────────────────┘   │
//! │  └─────────────────────┘               │ LifecycleEvent  │
//! │     │          │      ▲                ▼ (mpsc)          │
//! │     │          │      └───────── run_events()            │
//! │     ▼          ▼                                         │
//! │  ┌──────────┐ ┌──────────────────┐  ┌─────────────────┐  │
//! │  │ policy   │ │ ReadinessProbe   │─▶│ dyn HealthCheck │  │
//! │  │ validate │ │ wait_until_ready │  │ (reqwest)       │  │
//! │  └──────────┘ └──────────────────┘  └─────────────────┘  │
//! │                                                          │
//! └──────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```ignore
//! use sandgate_core::*;
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! # async fn example() -> sandgate_core::Result<()> {
//! let (events_tx, events_rx) = tokio::sync::mpsc::unbounded_channel();
//! let backend = LocalBackend::new(LocalBackendConfig::default()).with_events(events_tx);
//!
//! let controller = Arc::new(LifecycleController::new(
//!     Arc::new(backend),
//!     Arc::new(LocalFabric::new()),
//!     Arc::new(StaticCredentials::new(["secret"])),
//!     Arc::new(HttpHealthCheck::new()),
//!     ControllerConfig::default(),
//! ));
//! tokio::spawn(Arc::clone(&controller).run_events(events_rx));
//!
//! let caller = controller.authenticate(Some("secret")).await?;
//! let policy = NetworkPolicy::default_deny().with_rule(NetworkRule::allow("openrouter.ai"));
//! let request = CreateSandboxRequest::new("ghcr.io/nullclaw/nullclaw:latest", Duration::from_secs(3600))
//!     .with_network_policy(policy);
//!
//! let sandbox = controller.create(&caller, request, &CancellationToken::new()).await?;
//! let endpoint = controller
//!     .get_endpoint(&caller, &sandbox.id, 3000, &EndpointRoute::Direct)
//!     .await?;
//! println!("gateway at {}", endpoint.endpoint);
//!
//! controller.pause(&caller, &sandbox.id).await?;
//! # Ok(())
//! # }
//! ```

mod backend;
mod config;
mod controller;
mod error;
pub mod ingress;
mod lifecycle;
mod local;
pub mod policy;
pub mod probe;
mod sandbox;

pub use backend::{CredentialStore, NetworkFabric, SandboxBackend, StaticCredentials};
pub use config::{ControllerConfig, ControllerConfigBuilder, DEFAULT_CONTROL_PORT};
pub use controller::{Caller, EndpointRoute, LifecycleController};
pub use error::{CoreError, Result};
pub use ingress::{GatewayConfig, IngressConfig, IngressError, RouteConfig, RouteMode};
pub use lifecycle::{LifecycleEvent, LifecycleIntent, SandboxState, TRANSITIONS};
pub use local::{LocalBackend, LocalBackendConfig, LocalFabric};
pub use policy::{Action, NetworkPolicy, NetworkRule};
pub use probe::{HealthCheck, HttpHealthCheck, ProbeConfig, ProbeOutcome, ReadinessProbe};
pub use sandbox::{CreateSandboxRequest, Endpoint, Sandbox, SandboxId, MAX_SANDBOX_TIMEOUT};
pub use tokio_util::sync::CancellationToken;
