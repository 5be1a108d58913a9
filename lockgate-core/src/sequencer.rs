//! The launch sequencer: one linear pass through resolve → lock →
//! authenticate → elevate → spawn-and-wait → revoke. Its defining
//! property is that once elevation succeeds, exactly one revocation
//! attempt follows on every path out — a child crash, a spawn failure, or
//! a wait error never skips the re-lock.

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Command;

use crate::auth::{Authenticator, AuthorizationHandle};
use crate::config::GateConfig;
use crate::error::GateError;
use crate::runlock::RunLock;
use crate::target::ProtectedTarget;
use crate::toggle::PrivilegeToggle;

/// The original invocation, captured once and passed to the child
/// unmodified except for argv[0], which becomes the resolved target path.
#[derive(Debug, Clone)]
pub struct LaunchRequest {
    /// argv[0] of the gate itself; locates the gate on disk.
    pub gate_path: PathBuf,
    /// Everything after argv[0], forwarded to the child verbatim.
    pub args: Vec<OsString>,
}

impl LaunchRequest {
    /// Capture the process argv.
    pub fn from_env() -> Self {
        let mut argv = std::env::args_os();
        let gate_path = argv
            .next()
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("lockgate"));
        Self {
            gate_path,
            args: argv.collect(),
        }
    }
}

/// Terminal result of a run that reached the spawn step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitOutcome {
    /// The child exited normally with this code.
    Exited(i32),
    /// The child was killed by a signal or never started.
    Abnormal,
}

impl ExitOutcome {
    /// Fixed code reported for every gate failure and abnormal child end.
    pub const FAILURE_CODE: i32 = 1;

    /// The gate's own exit code for this outcome.
    pub fn code(self) -> i32 {
        match self {
            ExitOutcome::Exited(code) => code,
            ExitOutcome::Abnormal => Self::FAILURE_CODE,
        }
    }
}

/// Orchestrates a single gated launch. Parameterized over the two
/// deployment-specific capabilities so direct and delegated installs share
/// this one code path.
pub struct LaunchSequencer<'a> {
    config: &'a GateConfig,
    authenticator: &'a dyn Authenticator,
    toggle: &'a dyn PrivilegeToggle,
}

impl<'a> LaunchSequencer<'a> {
    pub fn new(
        config: &'a GateConfig,
        authenticator: &'a dyn Authenticator,
        toggle: &'a dyn PrivilegeToggle,
    ) -> Self {
        Self {
            config,
            authenticator,
            toggle,
        }
    }

    /// Drive the full state machine. A missing target short-circuits
    /// before any prompt or permission mutation; any error after a
    /// successful elevation still revokes before surfacing.
    pub fn run(&self, request: &LaunchRequest) -> Result<ExitOutcome, GateError> {
        let target = ProtectedTarget::resolve(&request.gate_path, self.config)?;

        // Taken before the prompt so two racing gates cannot stack two
        // dialogs and interleave their critical sections.
        let lock_path = self
            .config
            .lock_file
            .clone()
            .unwrap_or_else(|| RunLock::path_for(target.path()));
        let _run_lock = RunLock::acquire(&lock_path)?;

        let handle = self.authenticator.authenticate()?;

        self.toggle.set_executable(&handle, target.path(), true)?;
        let mut guard = ElevationGuard::armed(self.toggle, &handle, target.path());

        let outcome = self.spawn_and_wait(&target, request);

        // Revocation is owed however the child ended. The guard covers
        // unwinding; the explicit call makes a revoke failure reportable.
        guard.disarm();
        self.toggle.set_executable(&handle, target.path(), false)?;

        tracing::info!(code = outcome.code(), "gated run finished");
        Ok(outcome)
    }

    fn spawn_and_wait(&self, target: &ProtectedTarget, request: &LaunchRequest) -> ExitOutcome {
        let status = match Command::new(target.path()).args(&request.args).status() {
            Ok(status) => status,
            Err(err) => {
                tracing::error!(
                    %err,
                    target_path = %target.path().display(),
                    "failed to spawn protected binary"
                );
                return ExitOutcome::Abnormal;
            }
        };
        match status.code() {
            Some(code) => ExitOutcome::Exited(code),
            None => {
                #[cfg(unix)]
                {
                    use std::os::unix::process::ExitStatusExt;
                    tracing::warn!(
                        signal = status.signal(),
                        "protected binary terminated by signal"
                    );
                }
                ExitOutcome::Abnormal
            }
        }
    }
}

/// Re-locks the target if the sequencer unwinds between elevation and the
/// explicit revoke. The success path disarms it first so that a revoke
/// failure surfaces as [`GateError::RevokeFailed`] instead of being
/// swallowed by a drop.
struct ElevationGuard<'a> {
    toggle: &'a dyn PrivilegeToggle,
    handle: &'a AuthorizationHandle,
    path: &'a Path,
    armed: bool,
}

impl<'a> ElevationGuard<'a> {
    fn armed(
        toggle: &'a dyn PrivilegeToggle,
        handle: &'a AuthorizationHandle,
        path: &'a Path,
    ) -> Self {
        Self {
            toggle,
            handle,
            path,
            armed: true,
        }
    }

    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for ElevationGuard<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        if let Err(err) = self.toggle.set_executable(self.handle, self.path, false) {
            tracing::error!(
                %err,
                path = %self.path.display(),
                "could not re-lock target while unwinding"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::StaticAuthenticator;
    use std::sync::Mutex;

    /// Records toggle directions without touching the filesystem.
    struct RecordingToggle {
        calls: Mutex<Vec<bool>>,
    }

    impl RecordingToggle {
        fn new() -> Self {
            Self {
                calls: Mutex::new(Vec::new()),
            }
        }

        fn calls(&self) -> Vec<bool> {
            self.calls.lock().unwrap().clone()
        }
    }

    impl PrivilegeToggle for RecordingToggle {
        fn set_executable(
            &self,
            _handle: &AuthorizationHandle,
            _path: &Path,
            on: bool,
        ) -> Result<(), GateError> {
            self.calls.lock().unwrap().push(on);
            Ok(())
        }
    }

    #[test]
    fn guard_revokes_when_dropped_armed() {
        let toggle = RecordingToggle::new();
        let handle = StaticAuthenticator::granting().authenticate().unwrap();
        let path = Path::new("/tmp/app.real");

        drop(ElevationGuard::armed(&toggle, &handle, path));
        assert_eq!(toggle.calls(), vec![false]);
    }

    #[test]
    fn disarmed_guard_stays_quiet() {
        let toggle = RecordingToggle::new();
        let handle = StaticAuthenticator::granting().authenticate().unwrap();
        let path = Path::new("/tmp/app.real");

        let mut guard = ElevationGuard::armed(&toggle, &handle, path);
        guard.disarm();
        drop(guard);
        assert!(toggle.calls().is_empty());
    }

    #[test]
    fn outcome_codes() {
        assert_eq!(ExitOutcome::Exited(0).code(), 0);
        assert_eq!(ExitOutcome::Exited(42).code(), 42);
        assert_eq!(ExitOutcome::Abnormal.code(), ExitOutcome::FAILURE_CODE);
    }
}
