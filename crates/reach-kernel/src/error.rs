//! Kernel-specific error types.

use reach_types::ReachError;
use reach_wire::WireError;
use thiserror::Error;

/// Kernel error type wrapping ReachError with kernel-specific context.
#[derive(Error, Debug)]
pub enum KernelError {
    /// A wrapped ReachError.
    #[error(transparent)]
    Reach(#[from] ReachError),

    /// The service failed to start.
    #[error("Start failed: {0}")]
    StartFailed(String),

    /// `start` was called on a service that is not stopped.
    #[error("agent-reach service already running")]
    AlreadyRunning,
}

impl From<WireError> for KernelError {
    fn from(e: WireError) -> Self {
        Self::Reach(e.into())
    }
}

/// Alias for kernel results.
pub type KernelResult<T> = Result<T, KernelError>;
