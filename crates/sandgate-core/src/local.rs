//! In-process backend and network fabric.
//!
//! `LocalBackend` keeps sandbox records in memory and acknowledges pause and
//! resume intents on the lifecycle event channel after a short delay. It is
//! what the server runs against when no external provisioner is wired in,
//! and what the tests drive the controller with.

use crate::backend::{NetworkFabric, SandboxBackend};
use crate::error::CoreError;
use crate::ingress::{self, IngressConfig};
use crate::lifecycle::{LifecycleEvent, LifecycleIntent, SandboxState};
use crate::policy::NetworkPolicy;
use crate::sandbox::{CreateSandboxRequest, Sandbox, SandboxId};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, RwLock};
use uuid::Uuid;

/// Configuration for [`LocalBackend`].
#[derive(Debug, Clone)]
pub struct LocalBackendConfig {
    /// Host part of raw sandbox addresses.
    pub sandbox_host: String,
    /// Ingress topology used when publishing endpoints.
    pub ingress: Option<IngressConfig>,
    /// Delay before a pause/resume intent is acknowledged.
    pub ack_delay: Duration,
    /// Maximum number of sandboxes (0 = unlimited).
    pub max_sandboxes: usize,
}

impl Default for LocalBackendConfig {
    fn default() -> Self {
        Self {
            sandbox_host: "127.0.0.1".to_string(),
            ingress: None,
            ack_delay: Duration::from_millis(100),
            max_sandboxes: 100,
        }
    }
}

struct Record {
    sandbox: Sandbox,
    endpoints: HashMap<u16, String>,
}

/// In-memory [`SandboxBackend`].
///
/// Records live behind an async `RwLock`; lookups share the lock while
/// provisioning and state updates take it exclusively.
pub struct LocalBackend {
    records: Arc<RwLock<HashMap<SandboxId, Record>>>,
    events: Option<mpsc::UnboundedSender<LifecycleEvent>>,
    config: LocalBackendConfig,
}

impl LocalBackend {
    /// Create a backend that never acknowledges intents.
    pub fn new(config: LocalBackendConfig) -> Self {
        tracing::info!(
            sandbox_host = %config.sandbox_host,
            max_sandboxes = config.max_sandboxes,
            "Creating local sandbox backend"
        );
        Self {
            records: Arc::new(RwLock::new(HashMap::new())),
            events: None,
            config,
        }
    }

    /// Acknowledge pause/resume intents on `events`.
    pub fn with_events(mut self, events: mpsc::UnboundedSender<LifecycleEvent>) -> Self {
        self.events = Some(events);
        self
    }

    /// Get the backend configuration.
    pub fn config(&self) -> &LocalBackendConfig {
        &self.config
    }

    /// Number of known sandboxes, in any state.
    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    /// Whether no sandbox has been provisioned.
    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }

    /// Ids of every known sandbox.
    pub async fn list(&self) -> Vec<SandboxId> {
        self.records.read().await.keys().cloned().collect()
    }
}

#[async_trait]
impl SandboxBackend for LocalBackend {
    async fn provision(&self, request: &CreateSandboxRequest) -> Result<SandboxId, CoreError> {
        let mut records = self.records.write().await;
        if self.config.max_sandboxes > 0 && records.len() >= self.config.max_sandboxes {
            return Err(CoreError::Provisioning(format!(
                "max sandbox limit reached ({})",
                self.config.max_sandboxes
            )));
        }

        let id = SandboxId::new(Uuid::new_v4().to_string());
        let created_at = Utc::now();
        let lifetime = chrono::Duration::from_std(request.timeout())
            .map_err(|e| CoreError::Validation(format!("invalid timeout: {e}")))?;
        let sandbox = Sandbox {
            id: id.clone(),
            image: request.image.clone(),
            state: SandboxState::Creating,
            metadata: request.metadata.clone(),
            created_at,
            expires_at: created_at + lifetime,
        };
        records.insert(
            id.clone(),
            Record {
                sandbox,
                endpoints: HashMap::new(),
            },
        );

        tracing::info!(sandbox_id = %id, image = %request.image, "Sandbox provisioned");
        Ok(id)
    }

    async fn describe(&self, id: &SandboxId) -> Result<Sandbox, CoreError> {
        self.records
            .read()
            .await
            .get(id)
            .map(|r| r.sandbox.clone())
            .ok_or_else(|| CoreError::SandboxNotFound(id.clone()))
    }

    async fn update_state(
        &self,
        id: &SandboxId,
        expected: SandboxState,
        next: SandboxState,
    ) -> Result<(), CoreError> {
        let mut records = self.records.write().await;
        let record = records
            .get_mut(id)
            .ok_or_else(|| CoreError::SandboxNotFound(id.clone()))?;

        if record.sandbox.state != expected {
            return Err(CoreError::InvalidTransition {
                id: id.clone(),
                from: record.sandbox.state,
                to: next,
            });
        }

        tracing::debug!(sandbox_id = %id, from = %expected, to = %next, "State updated");
        record.sandbox.state = next;
        Ok(())
    }

    async fn submit(&self, intent: LifecycleIntent) -> Result<(), CoreError> {
        let id = intent.sandbox_id().clone();
        if !self.records.read().await.contains_key(&id) {
            return Err(CoreError::SandboxNotFound(id));
        }

        let Some(events) = self.events.clone() else {
            tracing::debug!(sandbox_id = %id, ?intent, "Intent accepted, no event channel");
            return Ok(());
        };

        let delay = self.config.ack_delay;
        tracing::debug!(sandbox_id = %id, ?intent, "Intent accepted");
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let event = match intent {
                LifecycleIntent::Pause(id) => LifecycleEvent::Paused(id),
                LifecycleIntent::Resume(id) => LifecycleEvent::Resumed(id),
            };
            if events.send(event).is_err() {
                tracing::warn!(sandbox_id = %id, "Event channel closed, acknowledgement dropped");
            }
        });
        Ok(())
    }

    async fn endpoint(&self, id: &SandboxId, port: u16) -> Result<String, CoreError> {
        {
            let records = self.records.read().await;
            let record = records
                .get(id)
                .ok_or_else(|| CoreError::SandboxNotFound(id.clone()))?;
            if let Some(endpoint) = record.endpoints.get(&port) {
                return Ok(endpoint.clone());
            }
        }

        let published = ingress::resolve(self.config.ingress.as_ref(), id, port)?
            .unwrap_or_else(|| format!("{}:{port}", self.config.sandbox_host));

        let mut records = self.records.write().await;
        let record = records
            .get_mut(id)
            .ok_or_else(|| CoreError::SandboxNotFound(id.clone()))?;
        let endpoint = record.endpoints.entry(port).or_insert(published);
        tracing::debug!(sandbox_id = %id, port, endpoint = %endpoint, "Endpoint published");
        Ok(endpoint.clone())
    }
}

/// [`NetworkFabric`] that records the policies it is given.
#[derive(Default)]
pub struct LocalFabric {
    applied: RwLock<HashMap<SandboxId, NetworkPolicy>>,
}

impl LocalFabric {
    /// Create an empty fabric.
    pub fn new() -> Self {
        Self::default()
    }

    /// Policy currently installed for `id`.
    pub async fn policy_for(&self, id: &SandboxId) -> Option<NetworkPolicy> {
        self.applied.read().await.get(id).cloned()
    }
}

#[async_trait]
impl NetworkFabric for LocalFabric {
    async fn apply(&self, id: &SandboxId, policy: &NetworkPolicy) -> Result<(), CoreError> {
        tracing::debug!(
            sandbox_id = %id,
            default_action = ?policy.default_action,
            rules = policy.egress.len(),
            "Network policy applied"
        );
        self.applied.write().await.insert(id.clone(), policy.clone());
        Ok(())
    }
}
