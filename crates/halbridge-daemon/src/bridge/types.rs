//! Types for the bridge event loop.

use halbridge_core::CorrelatorStats;

use crate::subprocess::SubprocessError;

/// What to do with the subprocess line that answers a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PendingReply {
    /// Say `"<nick>: <line>"` on `channel`.
    Reply { channel: String, nick: String },
    /// Consume the line silently.
    Discard,
}

/// Final state reported when the event loop stops.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BridgeSummary {
    pub stats: CorrelatorStats,
    /// Handlers still waiting when the loop stopped.
    pub abandoned: usize,
    pub checkpoints: u64,
}

/// Errors that end the bridge event loop.
#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    #[error("Subprocess exited unexpectedly")]
    SubprocessExited,

    #[error(transparent)]
    Subprocess(#[from] SubprocessError),
}
