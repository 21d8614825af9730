//! Interfaces to the collaborators the control plane drives.
//!
//! The controller never talks to a concrete provisioner, network fabric or
//! key store; it is handed trait objects at construction time.

use crate::error::CoreError;
use crate::lifecycle::{LifecycleIntent, SandboxState};
use crate::policy::NetworkPolicy;
use crate::sandbox::{CreateSandboxRequest, Sandbox, SandboxId};
use async_trait::async_trait;
use std::collections::HashSet;

/// Provisioning backend and owner of sandbox state.
#[async_trait]
pub trait SandboxBackend: Send + Sync {
    /// Start provisioning a sandbox. It must be recorded as `Creating`.
    async fn provision(&self, request: &CreateSandboxRequest) -> Result<SandboxId, CoreError>;

    /// Current record for `id`, or [`CoreError::SandboxNotFound`].
    async fn describe(&self, id: &SandboxId) -> Result<Sandbox, CoreError>;

    /// Move `id` from `expected` to `next`.
    ///
    /// Compare-and-set: if the stored state is no longer `expected` the
    /// backend returns [`CoreError::InvalidTransition`] and changes nothing.
    async fn update_state(
        &self,
        id: &SandboxId,
        expected: SandboxState,
        next: SandboxState,
    ) -> Result<(), CoreError>;

    /// Hand off pause/resume work. Returns once accepted, not once done.
    async fn submit(&self, intent: LifecycleIntent) -> Result<(), CoreError>;

    /// Published address of `port` on `id`.
    async fn endpoint(&self, id: &SandboxId, port: u16) -> Result<String, CoreError>;
}

/// Network layer that enforces egress policy.
#[async_trait]
pub trait NetworkFabric: Send + Sync {
    /// Install `policy` for sandbox `id`. The policy has been validated.
    async fn apply(&self, id: &SandboxId, policy: &NetworkPolicy) -> Result<(), CoreError>;
}

/// API key store.
#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// Whether `key` is a valid API key.
    async fn is_valid(&self, key: &str) -> bool;
}

/// Fixed set of API keys, typically loaded from configuration.
#[derive(Debug, Clone, Default)]
pub struct StaticCredentials {
    keys: HashSet<String>,
}

impl StaticCredentials {
    /// Build a store from `keys`; blank entries are dropped.
    pub fn new<I, S>(keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            keys: keys
                .into_iter()
                .map(Into::into)
                .filter(|k: &String| !k.trim().is_empty())
                .collect(),
        }
    }

    /// Number of configured keys.
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    /// Whether no key is configured (every request will be rejected).
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

#[async_trait]
impl CredentialStore for StaticCredentials {
    async fn is_valid(&self, key: &str) -> bool {
        self.keys.contains(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_static_credentials() {
        let store = StaticCredentials::new(["secret", " ", ""]);
        assert_eq!(store.len(), 1);
        assert!(store.is_valid("secret").await);
        assert!(!store.is_valid("Secret").await);
        assert!(!store.is_valid("").await);
    }

    #[tokio::test]
    async fn test_empty_store_rejects_everything() {
        let store = StaticCredentials::default();
        assert!(store.is_empty());
        assert!(!store.is_valid("anything").await);
    }
}
