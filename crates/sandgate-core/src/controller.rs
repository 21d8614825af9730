//! Lifecycle controller: the entry point for every sandbox operation.
//!
//! The controller holds no sandbox state of its own. It reads the current
//! state from the backend, checks the requested move against the lifecycle
//! table, writes the new state back with compare-and-set, and hands slow work
//! (pause, resume) to the backend without waiting for it.

use crate::backend::{CredentialStore, NetworkFabric, SandboxBackend};
use crate::config::ControllerConfig;
use crate::error::CoreError;
use crate::lifecycle::{LifecycleEvent, LifecycleIntent, SandboxState};
use crate::probe::{HealthCheck, ProbeOutcome, ReadinessProbe};
use crate::sandbox::{CreateSandboxRequest, Endpoint, Sandbox, SandboxId};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Proof that the caller presented a valid API key.
///
/// Only [`LifecycleController::authenticate`] can produce one, and every
/// operation requires it.
#[derive(Debug, Clone)]
pub struct Caller {
    _private: (),
}

/// Which address `get_endpoint` hands back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EndpointRoute {
    /// The backend's published address, unmodified.
    Direct,
    /// The control plane's own proxy path under `base`.
    ServerProxy {
        /// Externally visible base of the control plane, without trailing slash
        base: String,
    },
}

/// Orchestrates create, pause, resume and endpoint lookup.
pub struct LifecycleController {
    backend: Arc<dyn SandboxBackend>,
    fabric: Arc<dyn NetworkFabric>,
    credentials: Arc<dyn CredentialStore>,
    health: Arc<dyn HealthCheck>,
    config: ControllerConfig,
}

impl LifecycleController {
    /// Create a controller over the given collaborators.
    pub fn new(
        backend: Arc<dyn SandboxBackend>,
        fabric: Arc<dyn NetworkFabric>,
        credentials: Arc<dyn CredentialStore>,
        health: Arc<dyn HealthCheck>,
        config: ControllerConfig,
    ) -> Self {
        tracing::info!(
            control_port = config.control_port,
            probe_attempts = config.probe.max_attempts,
            "Creating lifecycle controller"
        );
        Self {
            backend,
            fabric,
            credentials,
            health,
            config,
        }
    }

    /// Get the controller configuration.
    pub fn config(&self) -> &ControllerConfig {
        &self.config
    }

    /// Check an API key.
    ///
    /// # Errors
    ///
    /// [`CoreError::MissingApiKey`] if the key is absent, blank or unknown.
    pub async fn authenticate(&self, api_key: Option<&str>) -> Result<Caller, CoreError> {
        match api_key.map(str::trim) {
            Some(key) if !key.is_empty() && self.credentials.is_valid(key).await => {
                Ok(Caller { _private: () })
            }
            Some(_) => {
                tracing::debug!("Rejected unknown API key");
                Err(CoreError::MissingApiKey)
            }
            None => Err(CoreError::MissingApiKey),
        }
    }

    /// Create a sandbox and block until it is ready.
    ///
    /// The request is validated before the backend is contacted. After
    /// provisioning, the network policy (if any) is installed and the
    /// readiness probe runs against the control port. A sandbox that fails
    /// after provisioning is left in `Failed` for inspection, never deleted.
    ///
    /// # Errors
    ///
    /// - [`CoreError::Validation`] for a malformed request
    /// - [`CoreError::Provisioning`] if the backend or fabric fails
    /// - [`CoreError::Ingress`] if the gateway cannot publish the control port
    /// - [`CoreError::ReadinessTimeout`] if the probe does not succeed
    pub async fn create(
        &self,
        _caller: &Caller,
        request: CreateSandboxRequest,
        cancel: &CancellationToken,
    ) -> Result<Sandbox, CoreError> {
        request.validate()?;

        let start = tokio::time::Instant::now();
        tracing::info!(image = %request.image, timeout_secs = request.timeout, "Creating sandbox");
        let id = self.backend.provision(&request).await.map_err(|e| {
            tracing::error!(image = %request.image, error = %e, "Provisioning failed");
            e
        })?;

        if let Some(policy) = &request.network_policy {
            if let Err(e) = self.fabric.apply(&id, policy).await {
                tracing::error!(sandbox_id = %id, error = %e, "Network policy rejected by fabric");
                self.mark_failed(&id, SandboxState::Creating).await;
                return Err(match e {
                    CoreError::Provisioning(_) => e,
                    other => CoreError::Provisioning(format!("network policy: {other}")),
                });
            }
        }

        let port = self.config.control_port;
        let probe = ReadinessProbe::new(self.health.as_ref(), &self.config.probe);
        let outcome = probe
            .wait_until_ready(|| self.backend.endpoint(&id, port), cancel)
            .await;

        match outcome {
            ProbeOutcome::Ready { .. } => {
                let next = SandboxState::Creating.transition(&id, SandboxState::Running)?;
                self.backend
                    .update_state(&id, SandboxState::Creating, next)
                    .await?;
                tracing::info!(
                    sandbox_id = %id,
                    elapsed_ms = start.elapsed().as_millis() as u64,
                    "Sandbox running"
                );
                self.backend.describe(&id).await
            }
            ProbeOutcome::LookupFailed(CoreError::Ingress(e)) => {
                tracing::error!(
                    sandbox_id = %id,
                    error = %e,
                    "Ingress cannot publish sandbox endpoint"
                );
                self.mark_failed(&id, SandboxState::Creating).await;
                Err(CoreError::Ingress(e))
            }
            other => {
                tracing::warn!(sandbox_id = %id, outcome = ?other, "Sandbox did not become ready");
                self.mark_failed(&id, SandboxState::Creating).await;
                Err(CoreError::ReadinessTimeout(id))
            }
        }
    }

    /// Current record of a sandbox.
    pub async fn describe(&self, _caller: &Caller, id: &SandboxId) -> Result<Sandbox, CoreError> {
        self.backend.describe(id).await
    }

    /// Request a pause. Returns once the request is accepted.
    ///
    /// # Errors
    ///
    /// - [`CoreError::SandboxNotFound`] exactly as reported by the backend
    /// - [`CoreError::InvalidTransition`] unless the sandbox is `Running`
    pub async fn pause(&self, _caller: &Caller, id: &SandboxId) -> Result<(), CoreError> {
        self.request_transition(id, SandboxState::Pausing, LifecycleIntent::Pause(id.clone()))
            .await
    }

    /// Request a resume. Returns once the request is accepted.
    ///
    /// # Errors
    ///
    /// - [`CoreError::SandboxNotFound`] exactly as reported by the backend
    /// - [`CoreError::InvalidTransition`] unless the sandbox is `Paused`
    pub async fn resume(&self, _caller: &Caller, id: &SandboxId) -> Result<(), CoreError> {
        self.request_transition(id, SandboxState::Resuming, LifecycleIntent::Resume(id.clone()))
            .await
    }

    /// Address for reaching `port` on sandbox `id`.
    ///
    /// The backend address is always looked up, so an unknown sandbox is
    /// reported even when the proxy route discards it.
    pub async fn get_endpoint(
        &self,
        _caller: &Caller,
        id: &SandboxId,
        port: u16,
        route: &EndpointRoute,
    ) -> Result<Endpoint, CoreError> {
        if port == 0 {
            return Err(CoreError::Validation("port must be in 1..=65535".into()));
        }

        let raw = self.backend.endpoint(id, port).await?;
        let endpoint = match route {
            EndpointRoute::Direct => raw,
            EndpointRoute::ServerProxy { base } => {
                format!("{}/sandboxes/{id}/proxy/{port}", base.trim_end_matches('/'))
            }
        };
        tracing::debug!(sandbox_id = %id, port, endpoint = %endpoint, "Endpoint resolved");
        Ok(Endpoint::new(endpoint))
    }

    /// Apply a completion reported by the backend.
    ///
    /// `Paused` and `Resumed` are only accepted from `Pausing` and
    /// `Resuming` respectively; everything else goes through the table.
    pub async fn apply_event(&self, event: LifecycleEvent) -> Result<(), CoreError> {
        let id = event.sandbox_id();
        let current = self.backend.describe(id).await?.state;
        let target = event.target_state();

        let expected_source = match &event {
            LifecycleEvent::Paused(_) => Some(SandboxState::Pausing),
            LifecycleEvent::Resumed(_) => Some(SandboxState::Resuming),
            LifecycleEvent::Terminated(_) | LifecycleEvent::Failed { .. } => None,
        };
        if expected_source.is_some_and(|source| source != current) {
            return Err(CoreError::InvalidTransition {
                id: id.clone(),
                from: current,
                to: target,
            });
        }

        let next = current.transition(id, target)?;
        self.backend.update_state(id, current, next).await?;
        match &event {
            LifecycleEvent::Failed { reason, .. } => {
                tracing::warn!(sandbox_id = %id, reason = %reason, "Sandbox failed");
            }
            _ => tracing::info!(sandbox_id = %id, from = %current, to = %next, "Backend confirmed transition"),
        }
        Ok(())
    }

    /// Apply backend events until the channel closes.
    pub async fn run_events(self: Arc<Self>, mut events: mpsc::UnboundedReceiver<LifecycleEvent>) {
        tracing::debug!("Lifecycle event loop started");
        while let Some(event) = events.recv().await {
            if let Err(e) = self.apply_event(event.clone()).await {
                tracing::warn!(
                    sandbox_id = %event.sandbox_id(),
                    error = %e,
                    "Dropped lifecycle event"
                );
            }
        }
        tracing::debug!("Lifecycle event loop stopped");
    }

    async fn request_transition(
        &self,
        id: &SandboxId,
        target: SandboxState,
        intent: LifecycleIntent,
    ) -> Result<(), CoreError> {
        let current = self.backend.describe(id).await?.state;
        let next = current.transition(id, target).map_err(|e| {
            tracing::debug!(sandbox_id = %id, from = %current, to = %target, "Transition rejected");
            e
        })?;
        self.backend.update_state(id, current, next).await?;

        if let Err(e) = self.backend.submit(intent).await {
            tracing::error!(sandbox_id = %id, error = %e, "Backend refused lifecycle intent");
            self.mark_failed(id, next).await;
            return Err(e);
        }

        tracing::info!(sandbox_id = %id, from = %current, to = %next, "Transition accepted");
        Ok(())
    }

    async fn mark_failed(&self, id: &SandboxId, from: SandboxState) {
        if let Err(e) = self
            .backend
            .update_state(id, from, SandboxState::Failed)
            .await
        {
            tracing::error!(sandbox_id = %id, error = %e, "Failed to mark sandbox as failed");
        }
    }
}
