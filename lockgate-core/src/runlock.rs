use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};

use fs2::FileExt;

use crate::error::GateError;

/// Exclusive lock held across the whole authenticate→elevate→run→revoke
/// critical section. Two gates racing for the same target serialize here
/// instead of interleaving their permission flips and leaving the target
/// executable after both finish. Released on drop.
#[derive(Debug)]
pub struct RunLock {
    file: File,
    path: PathBuf,
}

impl RunLock {
    /// Default lock-file location: sibling of the protected binary.
    pub fn path_for(target: &Path) -> PathBuf {
        let mut os = target.as_os_str().to_os_string();
        os.push(".lock");
        PathBuf::from(os)
    }

    /// Open (creating if needed) and exclusively lock the file, blocking
    /// until any competing gate releases it.
    pub fn acquire(path: &Path) -> Result<Self, GateError> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)
            .map_err(|source| GateError::LockFailed {
                path: path.to_owned(),
                source,
            })?;
        file.lock_exclusive().map_err(|source| GateError::LockFailed {
            path: path.to_owned(),
            source,
        })?;
        tracing::debug!(lock = %path.display(), "run lock acquired");
        Ok(Self {
            file,
            path: path.to_owned(),
        })
    }
}

impl Drop for RunLock {
    fn drop(&mut self) {
        // Fully qualified: std::fs::File grew its own `unlock`.
        if let Err(err) = fs2::FileExt::unlock(&self.file) {
            tracing::warn!(lock = %self.path.display(), %err, "failed to release run lock");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lock_path_is_sibling_of_target() {
        assert_eq!(
            RunLock::path_for(Path::new("/opt/app.real")),
            PathBuf::from("/opt/app.real.lock")
        );
    }

    #[test]
    fn second_acquire_blocks_until_first_drops() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("gate.lock");

        let held = RunLock::acquire(&path).unwrap();

        // A second descriptor cannot take the lock while the first holds it.
        let probe = File::open(&path).unwrap();
        assert!(probe.try_lock_exclusive().is_err());

        drop(held);
        assert!(probe.try_lock_exclusive().is_ok());
        fs2::FileExt::unlock(&probe).unwrap();
    }

    #[test]
    fn unwritable_lock_path_fails_closed() {
        let err = RunLock::acquire(Path::new("/nonexistent/dir/gate.lock")).unwrap_err();
        assert!(matches!(err, GateError::LockFailed { .. }));
    }
}
