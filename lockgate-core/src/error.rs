use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Failure taxonomy for a gate run. Every variant maps to process exit
/// code 1; the `Display` line is what ends up on stderr.
#[derive(Debug, Error)]
pub enum GateError {
    /// The protected binary is absent. An expected, user-facing condition
    /// (nothing is locked behind this gate), not an internal failure.
    #[error("App is not locked. Nothing to launch.")]
    NotLocked { path: PathBuf },

    /// Interactive authentication failed, was cancelled, or could not be
    /// performed. All denial reasons collapse here; the gate fails closed
    /// with no retry.
    #[error("authentication denied")]
    AuthDenied,

    /// Granting execute permission failed. The target was never unlocked,
    /// so no cleanup is owed.
    #[error("failed to grant execute permission: {source}")]
    ElevateFailed {
        #[source]
        source: io::Error,
    },

    /// Revoking execute permission failed after the target had been made
    /// executable. The most severe kind: the protected binary is left
    /// runnable on disk and an operator has to re-lock it by hand.
    #[error("failed to revoke execute permission, target remains executable: {source}")]
    RevokeFailed {
        #[source]
        source: io::Error,
    },

    /// The run-lock file serializing concurrent gate invocations could not
    /// be created or locked.
    #[error("failed to acquire run lock at {path}: {source}")]
    LockFailed {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// The gate configuration file or environment overrides were invalid.
    #[error("invalid gate configuration: {0}")]
    Config(String),
}

impl GateError {
    /// True for the one failure that leaves the system insecure.
    pub fn leaves_target_executable(&self) -> bool {
        matches!(self, GateError::RevokeFailed { .. })
    }
}
