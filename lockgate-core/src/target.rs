use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use crate::config::GateConfig;
use crate::error::GateError;

/// Permission state of the protected binary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockState {
    /// No execute bit set; the binary cannot be launched.
    Locked,
    /// At least one execute bit set.
    Unlocked,
}

/// The real executable guarded by the gate. Resolved once at startup; the
/// sequencer flips its permission bits exactly once in each direction per
/// run.
#[derive(Debug, Clone)]
pub struct ProtectedTarget {
    path: PathBuf,
}

impl ProtectedTarget {
    /// Locate the protected binary for the gate installed at `gate_path`.
    /// A missing target means nothing is locked behind this gate — the
    /// expected condition after an uninstall, reported as
    /// [`GateError::NotLocked`] before any authentication prompt.
    pub fn resolve(gate_path: &Path, config: &GateConfig) -> Result<Self, GateError> {
        let path = config.target_path(gate_path);
        if !path.exists() {
            return Err(GateError::NotLocked { path });
        }
        tracing::debug!(target_path = %path.display(), "resolved protected target");
        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// True when any execute bit is set on the target.
    #[cfg(unix)]
    pub fn is_executable(&self) -> io::Result<bool> {
        use std::os::unix::fs::PermissionsExt;
        let mode = fs::metadata(&self.path)?.permissions().mode();
        Ok(mode & 0o111 != 0)
    }

    #[cfg(not(unix))]
    pub fn is_executable(&self) -> io::Result<bool> {
        // Without Unix mode bits there is nothing to gate on.
        Ok(true)
    }

    pub fn lock_state(&self) -> io::Result<LockState> {
        Ok(if self.is_executable()? {
            LockState::Unlocked
        } else {
            LockState::Locked
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn fixture() -> (tempfile::TempDir, PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let gate = dir.path().join("app");
        (dir, gate)
    }

    #[test]
    fn resolves_sibling_real_file() {
        let (_dir, gate) = fixture();
        let real = PathBuf::from(format!("{}.real", gate.display()));
        fs::write(&real, b"#!/bin/sh\n").unwrap();

        let target = ProtectedTarget::resolve(&gate, &GateConfig::default()).unwrap();
        assert_eq!(target.path(), real.as_path());
    }

    #[test]
    fn missing_target_is_not_locked() {
        let (_dir, gate) = fixture();
        let err = ProtectedTarget::resolve(&gate, &GateConfig::default()).unwrap_err();
        assert!(matches!(err, GateError::NotLocked { .. }));
        assert_eq!(err.to_string(), "App is not locked. Nothing to launch.");
    }

    #[cfg(unix)]
    #[test]
    fn lock_state_tracks_mode_bits() {
        use std::os::unix::fs::PermissionsExt;

        let (dir, gate) = fixture();
        let real = dir.path().join("app.real");
        fs::write(&real, b"#!/bin/sh\n").unwrap();
        fs::set_permissions(&real, fs::Permissions::from_mode(0o000)).unwrap();

        let target = ProtectedTarget::resolve(&gate, &GateConfig::default()).unwrap();
        assert_eq!(target.lock_state().unwrap(), LockState::Locked);

        fs::set_permissions(&real, fs::Permissions::from_mode(0o500)).unwrap();
        assert_eq!(target.lock_state().unwrap(), LockState::Unlocked);
    }
}
