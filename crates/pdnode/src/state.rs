//! Bridge lifecycle state.

use std::fmt;

/// Lifecycle state of a [`Bridge`](crate::Bridge).
///
/// ```text
/// Created → Spawning → AwaitingReady → Ready → Terminating → Terminated
///               ↓            ↓           ↓
///             Failed ←───────┴───────────┘
/// ```
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum BridgeState {
    /// Constructed, nothing spawned yet
    #[default]
    Created,
    /// Spawning the child process
    Spawning,
    /// Child running, waiting for its `ready` message
    AwaitingReady,
    /// Child accepts messages
    Ready,
    /// Shutdown in progress
    Terminating,
    /// Shut down on request
    Terminated,
    /// Spawn failed or the child died unexpectedly
    Failed,
}

impl BridgeState {
    /// `Terminated` and `Failed` never change again.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Terminated | Self::Failed)
    }

    /// A child process exists and is being pumped.
    pub fn is_running(&self) -> bool {
        matches!(self, Self::AwaitingReady | Self::Ready)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Spawning => "spawning",
            Self::AwaitingReady => "awaiting_ready",
            Self::Ready => "ready",
            Self::Terminating => "terminating",
            Self::Terminated => "terminated",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for BridgeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
