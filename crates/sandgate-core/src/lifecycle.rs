//! Sandbox lifecycle state machine.
//!
//! All state changes, whether requested by a caller (pause, resume) or
//! reported by the backend (paused, resumed, failed), go through
//! [`SandboxState::transition`], which checks them against [`TRANSITIONS`].
//!
//! ```text
//!              probe ok              pause                ack
//!  Creating ──────────────▶ Running ───────▶ Pausing ─────────▶ Paused
//!     │                      ▲   │                                │ │
//!     │ probe timeout        │   │ delete              resume     │ │ delete
//!     ▼                      │   ▼                                ▼ ▼
//!   Failed          ack      │ Terminated ◀──────────── Resuming  Terminated
//!                 Resuming ──┘
//! ```
//!
//! Any non-terminal state may also move to `Failed` on an unrecoverable
//! backend error.

use crate::error::CoreError;
use crate::sandbox::SandboxId;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle state of a sandbox, as owned by the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SandboxState {
    /// Provisioned, waiting for the readiness probe.
    Creating,
    /// Healthy and serving.
    Running,
    /// Pause requested, backend has not confirmed yet.
    Pausing,
    /// Paused by the backend.
    Paused,
    /// Resume requested, backend has not confirmed yet.
    Resuming,
    /// Deleted.
    Terminated,
    /// Creation or the backend failed; left in place for inspection.
    Failed,
}

use SandboxState::*;

/// Every legal `(from, to)` pair apart from the implicit `* -> Failed`.
pub const TRANSITIONS: &[(SandboxState, SandboxState)] = &[
    (Creating, Running),
    (Running, Pausing),
    (Pausing, Paused),
    (Paused, Resuming),
    (Resuming, Running),
    (Running, Terminated),
    (Paused, Terminated),
];

impl SandboxState {
    /// Whether the sandbox can never change state again.
    pub fn is_terminal(self) -> bool {
        matches!(self, Terminated | Failed)
    }

    /// Whether `self -> next` is a legal transition.
    pub fn can_transition_to(self, next: SandboxState) -> bool {
        if next == Failed {
            return !self.is_terminal();
        }
        TRANSITIONS.contains(&(self, next))
    }

    /// Check `self -> next` for sandbox `id`, returning `next` when legal.
    pub fn transition(self, id: &SandboxId, next: SandboxState) -> Result<SandboxState, CoreError> {
        if self.can_transition_to(next) {
            Ok(next)
        } else {
            Err(CoreError::InvalidTransition {
                id: id.clone(),
                from: self,
                to: next,
            })
        }
    }
}

impl fmt::Display for SandboxState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Creating => "Creating",
            Running => "Running",
            Pausing => "Pausing",
            Paused => "Paused",
            Resuming => "Resuming",
            Terminated => "Terminated",
            Failed => "Failed",
        };
        f.write_str(name)
    }
}

/// Work the controller asks the backend to carry out asynchronously.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LifecycleIntent {
    /// Freeze the sandbox; completion arrives as [`LifecycleEvent::Paused`].
    Pause(SandboxId),
    /// Thaw the sandbox; completion arrives as [`LifecycleEvent::Resumed`].
    Resume(SandboxId),
}

impl LifecycleIntent {
    /// Sandbox the intent targets.
    pub fn sandbox_id(&self) -> &SandboxId {
        match self {
            Self::Pause(id) | Self::Resume(id) => id,
        }
    }
}

/// Completion reported by the backend out of band.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LifecycleEvent {
    /// A pause finished.
    Paused(SandboxId),
    /// A resume finished.
    Resumed(SandboxId),
    /// The sandbox was deleted.
    Terminated(SandboxId),
    /// The backend gave up on the sandbox.
    Failed {
        /// Affected sandbox
        id: SandboxId,
        /// Backend-supplied reason
        reason: String,
    },
}

impl LifecycleEvent {
    /// Sandbox the event concerns.
    pub fn sandbox_id(&self) -> &SandboxId {
        match self {
            Self::Paused(id) | Self::Resumed(id) | Self::Terminated(id) => id,
            Self::Failed { id, .. } => id,
        }
    }

    /// State the sandbox should end up in.
    pub fn target_state(&self) -> SandboxState {
        match self {
            Self::Paused(_) => Paused,
            Self::Resumed(_) => Running,
            Self::Terminated(_) => Terminated,
            Self::Failed { .. } => Failed,
        }
    }
}
