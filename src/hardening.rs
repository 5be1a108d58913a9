//! Process hardening applied before any privileged work. The gate holds a
//! live authorization session and briefly makes a protected binary
//! executable, so it must not be debuggable, must not leave core dumps
//! with authorization state, and must not let loader environment
//! variables ride into the child it spawns.

#![allow(unsafe_code)]

use anyhow::{Context, Result};

pub fn apply() -> Result<()> {
    #[cfg(any(target_os = "linux", target_os = "android"))]
    harden_linux().context("Linux hardening")?;

    #[cfg(target_os = "macos")]
    harden_macos().context("macOS hardening")?;

    Ok(())
}

#[cfg(any(target_os = "linux", target_os = "android"))]
fn harden_linux() -> Result<()> {
    // Non-dumpable also blocks ptrace attach from non-root peers.
    if unsafe { libc::prctl(libc::PR_SET_DUMPABLE, 0, 0, 0, 0) } != 0 {
        return Err(std::io::Error::last_os_error()).context("prctl(PR_SET_DUMPABLE, 0)");
    }
    zero_core_limit()?;
    strip_env_prefix("LD_");
    Ok(())
}

#[cfg(target_os = "macos")]
fn harden_macos() -> Result<()> {
    if unsafe { libc::ptrace(libc::PT_DENY_ATTACH, 0, std::ptr::null_mut(), 0) } == -1 {
        return Err(std::io::Error::last_os_error()).context("ptrace(PT_DENY_ATTACH)");
    }
    zero_core_limit()?;
    strip_env_prefix("DYLD_");
    Ok(())
}

#[cfg(unix)]
fn zero_core_limit() -> Result<()> {
    let rlim = libc::rlimit {
        rlim_cur: 0,
        rlim_max: 0,
    };
    if unsafe { libc::setrlimit(libc::RLIMIT_CORE, &rlim) } != 0 {
        return Err(std::io::Error::last_os_error()).context("setrlimit(RLIMIT_CORE, 0)");
    }
    Ok(())
}

/// Drop every environment variable starting with `prefix` so the child
/// cannot be hijacked through dynamic-loader injection.
#[cfg(unix)]
fn strip_env_prefix(prefix: &str) {
    let keys: Vec<String> = std::env::vars()
        .map(|(key, _)| key)
        .filter(|key| key.starts_with(prefix))
        .collect();
    for key in keys {
        tracing::debug!(%key, "removing loader environment variable");
        unsafe {
            std::env::remove_var(key);
        }
    }
}
