//! Sandbox identity and the records exchanged with the provisioning backend.

use crate::error::CoreError;
use crate::lifecycle::SandboxState;
use crate::policy::NetworkPolicy;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

/// Upper bound on a sandbox's requested lifetime (24 hours).
pub const MAX_SANDBOX_TIMEOUT: Duration = Duration::from_secs(24 * 60 * 60);

/// Opaque identifier assigned to a sandbox by the provisioning backend.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SandboxId(String);

impl SandboxId {
    /// Wrap a backend-assigned identifier.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Get the identifier as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SandboxId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SandboxId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for SandboxId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// Parameters for creating a sandbox.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateSandboxRequest {
    /// Container image the sandbox runs.
    pub image: String,

    /// Lifetime of the sandbox in seconds.
    pub timeout: u64,

    /// Free-form labels attached to the sandbox.
    #[serde(default)]
    pub metadata: HashMap<String, String>,

    /// Egress policy handed to the network fabric after validation.
    #[serde(default)]
    pub network_policy: Option<NetworkPolicy>,
}

impl CreateSandboxRequest {
    /// Create a request for `image` with the given lifetime.
    pub fn new(image: impl Into<String>, timeout: Duration) -> Self {
        Self {
            image: image.into(),
            timeout: timeout.as_secs(),
            metadata: HashMap::new(),
            network_policy: None,
        }
    }

    /// Attach a metadata label.
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Attach an egress policy.
    pub fn with_network_policy(mut self, policy: NetworkPolicy) -> Self {
        self.network_policy = Some(policy);
        self
    }

    /// Requested lifetime as a duration.
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout)
    }

    /// Validate everything that can be checked without the backend.
    pub fn validate(&self) -> Result<(), CoreError> {
        if self.image.trim().is_empty() {
            return Err(CoreError::Validation("image is required".into()));
        }
        if self.timeout == 0 {
            return Err(CoreError::Validation("timeout must be > 0".into()));
        }
        if self.timeout() > MAX_SANDBOX_TIMEOUT {
            return Err(CoreError::Validation(format!(
                "timeout exceeds maximum ({}s > {}s)",
                self.timeout,
                MAX_SANDBOX_TIMEOUT.as_secs()
            )));
        }
        if let Some(policy) = &self.network_policy {
            policy.validate()?;
        }
        Ok(())
    }
}

/// A sandbox as reported by the backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Sandbox {
    /// Backend-assigned identifier.
    pub id: SandboxId,
    /// Image the sandbox was created from.
    pub image: String,
    /// Current lifecycle state.
    pub state: SandboxState,
    /// Labels supplied at creation.
    pub metadata: HashMap<String, String>,
    /// When the sandbox was created.
    pub created_at: DateTime<Utc>,
    /// When the sandbox's lifetime runs out.
    pub expires_at: DateTime<Utc>,
}

/// Address a client should use to reach a sandbox port.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Endpoint {
    /// Host/path form of the address, without scheme.
    pub endpoint: String,
}

impl Endpoint {
    /// Wrap an address.
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
        }
    }
}
