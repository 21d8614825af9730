//! SandgateServer - shared state behind the HTTP API.
//!
//! Owns the lifecycle controller and the pieces the HTTP layer needs around
//! it: the server-wide shutdown token, the proxy base for `use_server_proxy`
//! endpoints, and the backend event channel until it is started.

use crate::config::SandgateConfig;
use crate::error::ApiError;

use axum::http::StatusCode;
use sandgate_core::{
    CancellationToken, Caller, CreateSandboxRequest, EndpointRoute, HttpHealthCheck,
    LifecycleController, LifecycleEvent, LocalBackend, LocalFabric, Sandbox, StaticCredentials,
};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex as TokioMutex};

type EventReceiver = mpsc::UnboundedReceiver<LifecycleEvent>;

/// HTTP-facing wrapper around a [`LifecycleController`].
#[derive(Clone)]
pub struct SandgateServer {
    /// Lifecycle controller from sandgate-core
    controller: Arc<LifecycleController>,

    /// Configuration
    config: SandgateConfig,

    /// Cancelled when the server shuts down; in-flight creations stop probing
    shutdown: CancellationToken,

    /// Backend events, taken by `start_events`
    events: Arc<TokioMutex<Option<EventReceiver>>>,
}

impl SandgateServer {
    /// Create a server backed by the in-process backend and fabric.
    pub fn new(config: SandgateConfig) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let backend = LocalBackend::new(config.backend_config()).with_events(events_tx);
        let credentials = StaticCredentials::new(config.api_keys.iter().map(String::as_str));
        tracing::info!(api_keys = credentials.len(), "Credential store loaded");

        let controller = Arc::new(LifecycleController::new(
            Arc::new(backend),
            Arc::new(LocalFabric::new()),
            Arc::new(credentials),
            Arc::new(HttpHealthCheck::new()),
            config.controller_config(),
        ));

        let mut server = Self::with_controller(controller, config);
        server.events = Arc::new(TokioMutex::new(Some(events_rx)));
        server
    }

    /// Create a server around an existing controller.
    ///
    /// The caller is responsible for feeding backend events to the controller.
    pub fn with_controller(controller: Arc<LifecycleController>, config: SandgateConfig) -> Self {
        Self {
            controller,
            config,
            shutdown: CancellationToken::new(),
            events: Arc::new(TokioMutex::new(None)),
        }
    }

    /// Start applying backend lifecycle events.
    ///
    /// Does nothing on the second call or for servers built with
    /// [`with_controller`](Self::with_controller).
    pub async fn start_events(&self) {
        if let Some(events) = self.events.lock().await.take() {
            tokio::spawn(Arc::clone(&self.controller).run_events(events));
            tracing::info!("Lifecycle event loop started");
        }
    }

    /// Cancel in-flight readiness probes.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    /// Get a reference to the lifecycle controller.
    pub fn controller(&self) -> &LifecycleController {
        &self.controller
    }

    /// Get a reference to the configuration.
    pub fn config(&self) -> &SandgateConfig {
        &self.config
    }

    /// Create a sandbox on a detached task.
    ///
    /// The creation keeps running if the HTTP client goes away, so the
    /// sandbox always ends in `Running` or `Failed`.
    pub async fn create(
        &self,
        caller: Caller,
        request: CreateSandboxRequest,
    ) -> Result<Sandbox, ApiError> {
        let controller = Arc::clone(&self.controller);
        let cancel = self.shutdown.child_token();
        let task =
            tokio::spawn(async move { controller.create(&caller, request, &cancel).await });

        match task.await {
            Ok(result) => result.map_err(ApiError::from),
            Err(e) => {
                tracing::error!(error = %e, "Create task aborted");
                Err(ApiError::new(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "INTERNAL_ERROR",
                    "sandbox creation was interrupted",
                ))
            }
        }
    }

    /// Route for an endpoint lookup.
    ///
    /// The proxy base is the configured `SANDGATE_SERVER_PROXY_BASE`, or the
    /// request's `Host` header when none is configured.
    pub fn endpoint_route(
        &self,
        use_server_proxy: bool,
        host: Option<&str>,
    ) -> Result<EndpointRoute, ApiError> {
        if !use_server_proxy {
            return Ok(EndpointRoute::Direct);
        }
        let base = self
            .config
            .server_proxy_base
            .as_deref()
            .or(host)
            .map(str::trim)
            .filter(|b| !b.is_empty())
            .ok_or_else(|| ApiError::invalid_request("use_server_proxy requires a Host header"))?;
        Ok(EndpointRoute::ServerProxy {
            base: base.to_string(),
        })
    }
}
