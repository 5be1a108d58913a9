//! Privilege toggling: flipping the protected binary between mode `0000`
//! (at rest) and owner read+execute (for the duration of one run). Two
//! interchangeable strategies implement the same contract so the
//! sequencer never branches on deployment: a direct `chmod` with the
//! gate's own credentials, and a delegated one that runs the fixed
//! trusted helper with elevated privileges.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use crate::auth::AuthorizationHandle;
use crate::config::{GateConfig, ToggleStrategy};
use crate::error::GateError;

/// Mode granted for the duration of a run: owner read + execute only.
pub const UNLOCKED_MODE: u32 = 0o500;

/// Mode the target rests at: no access for anyone.
pub const LOCKED_MODE: u32 = 0o000;

#[cfg(all(unix, not(target_os = "macos")))]
pub(crate) const PKEXEC: &str = "/usr/bin/pkexec";

/// Sets or clears the protected binary's execute permission.
///
/// Requesting a state the target is already in must be a safe no-op; the
/// underlying permission primitive is naturally idempotent and both
/// implementations preserve that.
pub trait PrivilegeToggle {
    fn set_executable(
        &self,
        handle: &AuthorizationHandle,
        path: &Path,
        on: bool,
    ) -> Result<(), GateError>;
}

fn mode_for(on: bool) -> u32 {
    if on { UNLOCKED_MODE } else { LOCKED_MODE }
}

fn toggle_error(on: bool, source: io::Error) -> GateError {
    if on {
        GateError::ElevateFailed { source }
    } else {
        GateError::RevokeFailed { source }
    }
}

/// Changes the mode with the calling process's own credentials. Enough
/// when the gate's effective uid owns the target, since only owner bits
/// are ever granted.
pub struct DirectToggle;

impl PrivilegeToggle for DirectToggle {
    #[cfg(unix)]
    fn set_executable(
        &self,
        _handle: &AuthorizationHandle,
        path: &Path,
        on: bool,
    ) -> Result<(), GateError> {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(path, fs::Permissions::from_mode(mode_for(on)))
            .map_err(|source| toggle_error(on, source))?;
        tracing::debug!(
            path = %path.display(),
            mode = format_args!("{:04o}", mode_for(on)),
            "changed target mode"
        );
        Ok(())
    }

    #[cfg(not(unix))]
    fn set_executable(
        &self,
        _handle: &AuthorizationHandle,
        _path: &Path,
        on: bool,
    ) -> Result<(), GateError> {
        Err(toggle_error(
            on,
            io::Error::other("permission toggling requires a Unix filesystem"),
        ))
    }
}

/// Delegates the mode change to the fixed trusted helper, run with
/// elevated privileges. The helper receives exactly two arguments — the
/// octal mode string and the target path — and its output is discarded.
///
/// The elevation facility only reports whether the helper was launched,
/// not whether it succeeded, so after a nominally successful call the
/// target's permission bits are re-read and compared against the
/// requested state; a mismatch is reported as the toggle failing.
pub struct DelegatedToggle {
    helper: PathBuf,
}

impl DelegatedToggle {
    pub fn new(helper: impl Into<PathBuf>) -> Self {
        Self {
            helper: helper.into(),
        }
    }

    #[cfg(target_os = "macos")]
    fn run_helper(
        &self,
        handle: &AuthorizationHandle,
        mode: &str,
        path: &Path,
    ) -> io::Result<()> {
        use std::ffi::OsStr;

        use crate::auth::macos;

        let auth_ref = handle.security_ref().ok_or_else(|| {
            io::Error::other("authorization handle carries no security session")
        })?;
        macos::execute_with_privileges(
            auth_ref,
            &self.helper,
            &[OsStr::new(mode), path.as_os_str()],
        )
    }

    #[cfg(all(unix, not(target_os = "macos")))]
    fn run_helper(
        &self,
        _handle: &AuthorizationHandle,
        mode: &str,
        path: &Path,
    ) -> io::Result<()> {
        use std::process::{Command, Stdio};

        let status = Command::new(PKEXEC)
            .arg(&self.helper)
            .arg(mode)
            .arg(path)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()?;
        if status.success() {
            Ok(())
        } else {
            Err(io::Error::other(format!(
                "privileged helper invocation exited with {status}"
            )))
        }
    }

    #[cfg(not(unix))]
    fn run_helper(
        &self,
        _handle: &AuthorizationHandle,
        _mode: &str,
        _path: &Path,
    ) -> io::Result<()> {
        Err(io::Error::other(
            "privileged helper execution requires a Unix system",
        ))
    }

    /// The helper launch status alone is not trusted; the observed mode
    /// must match what was asked for.
    fn verify(path: &Path, on: bool) -> io::Result<()> {
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = fs::metadata(path)?.permissions().mode() & 0o777;
            if (mode & 0o100 != 0) == on {
                Ok(())
            } else {
                Err(io::Error::other(format!(
                    "helper ran but target mode is {mode:04o}"
                )))
            }
        }
        #[cfg(not(unix))]
        {
            let _ = (path, on);
            Ok(())
        }
    }
}

impl PrivilegeToggle for DelegatedToggle {
    fn set_executable(
        &self,
        handle: &AuthorizationHandle,
        path: &Path,
        on: bool,
    ) -> Result<(), GateError> {
        let mode = format!("{:04o}", mode_for(on));
        self.run_helper(handle, &mode, path)
            .and_then(|()| Self::verify(path, on))
            .map_err(|source| toggle_error(on, source))
    }
}

/// Build the toggle for this run. `Auto` resolves to [`DirectToggle`] when
/// the gate's effective uid can change the target's mode itself, otherwise
/// to [`DelegatedToggle`] with the configured helper.
pub fn toggle_for(config: &GateConfig, target_path: &Path) -> Box<dyn PrivilegeToggle> {
    let strategy = match config.strategy {
        ToggleStrategy::Auto => {
            if owns_target(target_path) {
                ToggleStrategy::Direct
            } else {
                ToggleStrategy::Delegated
            }
        }
        fixed => fixed,
    };
    tracing::debug!(?strategy, "selected privilege toggle strategy");
    match strategy {
        ToggleStrategy::Direct => Box::new(DirectToggle),
        _ => Box::new(DelegatedToggle::new(&config.helper)),
    }
}

#[cfg(unix)]
fn owns_target(path: &Path) -> bool {
    use std::os::unix::fs::MetadataExt;
    let euid = nix::unistd::Uid::effective();
    match fs::metadata(path) {
        Ok(meta) => euid.is_root() || euid.as_raw() == meta.uid(),
        Err(_) => false,
    }
}

#[cfg(not(unix))]
fn owns_target(_path: &Path) -> bool {
    false
}
