//! Error types for sandgate-core.

use crate::ingress::IngressError;
use crate::lifecycle::SandboxState;
use crate::SandboxId;
use thiserror::Error;

/// Result type alias for sandgate-core operations.
pub type Result<T> = std::result::Result<T, CoreError>;

/// Errors that can occur during control-plane operations.
///
/// Every variant maps to one stable machine-readable code (see [`CoreError::code`]).
/// The controller passes these through untouched once they exist, so a
/// `SandboxNotFound` raised by a backend reaches the caller exactly as raised.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Malformed request input (port, network policy, image, timeout).
    #[error("{0}")]
    Validation(String),

    /// API key missing or not recognised by the credential store.
    #[error("missing or invalid API key")]
    MissingApiKey,

    /// Sandbox not found
    #[error("Sandbox {0} not found")]
    SandboxNotFound(SandboxId),

    /// Requested lifecycle transition is not legal from the current state.
    #[error("sandbox {id} cannot move from {from} to {to}")]
    InvalidTransition {
        /// Sandbox the request targeted
        id: SandboxId,
        /// State observed at request time
        from: SandboxState,
        /// State the request asked for
        to: SandboxState,
    },

    /// The backend failed to create the sandbox or attach its network policy.
    #[error("provisioning failed: {0}")]
    Provisioning(String),

    /// The sandbox never answered its health endpoint within the probe bound.
    #[error("sandbox {0} did not become ready in time")]
    ReadinessTimeout(SandboxId),

    /// The backend rejected or failed a request for an existing sandbox.
    #[error("backend error: {0}")]
    Backend(String),

    /// Gateway ingress configuration cannot produce an address.
    #[error(transparent)]
    Ingress(#[from] IngressError),
}

impl CoreError {
    /// Stable code reported to API clients.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Validation(_) => "INVALID_REQUEST",
            Self::MissingApiKey => "MISSING_API_KEY",
            Self::SandboxNotFound(_) => "SANDBOX_NOT_FOUND",
            Self::InvalidTransition { .. } => "INVALID_STATE_TRANSITION",
            Self::Provisioning(_) => "PROVISIONING_FAILED",
            Self::ReadinessTimeout(_) => "SANDBOX_NOT_READY",
            Self::Backend(_) => "BACKEND_UNAVAILABLE",
            Self::Ingress(_) => "INGRESS_MISCONFIGURED",
        }
    }
}
