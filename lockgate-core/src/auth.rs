//! Interactive authentication in front of the launch. The sequencer only
//! sees the [`Authenticator`] trait and the opaque [`AuthorizationHandle`]
//! it hands back; what actually prompts the user differs per platform. On
//! macOS this is the Security framework's authorization services (the
//! handle wraps a live `AuthorizationRef` that the delegated toggle reuses
//! to run the privileged helper without a second prompt). On other Unix
//! systems the prompt is polkit's, raised when the delegated helper runs.

use crate::error::GateError;

/// Opaque token proving the user passed the interactive challenge for the
/// execute right. Only authenticators construct one; it is deliberately
/// neither `Clone` nor serializable and dies with the process.
pub struct AuthorizationHandle {
    #[cfg(target_os = "macos")]
    security: Option<macos::SecuritySession>,
}

impl AuthorizationHandle {
    /// A handle whose interactive check either already happened or is
    /// deferred to the privileged helper invocation (polkit).
    fn session() -> Self {
        Self {
            #[cfg(target_os = "macos")]
            security: None,
        }
    }

    #[cfg(target_os = "macos")]
    fn with_security(session: macos::SecuritySession) -> Self {
        Self {
            security: Some(session),
        }
    }

    /// Raw authorization reference for privileged-helper execution, when
    /// this handle carries a Security framework session.
    #[cfg(target_os = "macos")]
    pub(crate) fn security_ref(&self) -> Option<macos::AuthorizationRef> {
        self.security.as_ref().map(|session| session.raw())
    }
}

impl std::fmt::Debug for AuthorizationHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthorizationHandle").finish_non_exhaustive()
    }
}

/// Presents the interactive challenge for the right to execute the
/// protected binary. Implementations must fail closed: every non-success
/// outcome of the underlying primitive collapses into
/// [`GateError::AuthDenied`] with no retry and no reason distinction.
pub trait Authenticator {
    fn authenticate(&self) -> Result<AuthorizationHandle, GateError>;
}

/// The production authenticator for the build target. Unsupported
/// platforms always deny.
pub fn platform_authenticator() -> Box<dyn Authenticator> {
    #[cfg(target_os = "macos")]
    {
        Box::new(SecurityAuthenticator)
    }
    #[cfg(all(unix, not(target_os = "macos")))]
    {
        Box::new(PolkitAuthenticator::new())
    }
    #[cfg(not(unix))]
    {
        Box::new(StaticAuthenticator::denying())
    }
}

/// Fixed-verdict authenticator for tests and unsupported platforms.
pub struct StaticAuthenticator {
    grant: bool,
}

impl StaticAuthenticator {
    pub fn granting() -> Self {
        Self { grant: true }
    }

    pub fn denying() -> Self {
        Self { grant: false }
    }
}

impl Authenticator for StaticAuthenticator {
    fn authenticate(&self) -> Result<AuthorizationHandle, GateError> {
        if self.grant {
            Ok(AuthorizationHandle::session())
        } else {
            Err(GateError::AuthDenied)
        }
    }
}

/// Authenticator for polkit systems. The interactive prompt itself is
/// raised by the polkit agent when `pkexec` runs the privileged helper, so
/// this only verifies that `pkexec` is present; a refusal at helper time
/// surfaces as a toggle failure rather than `AuthDenied`.
#[cfg(all(unix, not(target_os = "macos")))]
pub struct PolkitAuthenticator {
    pkexec: std::path::PathBuf,
}

#[cfg(all(unix, not(target_os = "macos")))]
impl PolkitAuthenticator {
    pub fn new() -> Self {
        Self {
            pkexec: std::path::PathBuf::from(crate::toggle::PKEXEC),
        }
    }
}

#[cfg(all(unix, not(target_os = "macos")))]
impl Default for PolkitAuthenticator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(all(unix, not(target_os = "macos")))]
impl Authenticator for PolkitAuthenticator {
    fn authenticate(&self) -> Result<AuthorizationHandle, GateError> {
        if self.pkexec.exists() {
            Ok(AuthorizationHandle::session())
        } else {
            tracing::warn!(pkexec = %self.pkexec.display(), "no polkit agent available");
            Err(GateError::AuthDenied)
        }
    }
}

/// Authenticator backed by macOS authorization services: requests the
/// `system.privilege.admin` right with interaction allowed, which makes
/// the security agent raise the password or biometric dialog and blocks
/// until the user answers.
#[cfg(target_os = "macos")]
pub struct SecurityAuthenticator;

#[cfg(target_os = "macos")]
impl Authenticator for SecurityAuthenticator {
    fn authenticate(&self) -> Result<AuthorizationHandle, GateError> {
        match macos::request_execute_right() {
            Ok(session) => Ok(AuthorizationHandle::with_security(session)),
            Err(status) => {
                tracing::warn!(status, "authorization request refused");
                Err(GateError::AuthDenied)
            }
        }
    }
}

#[cfg(target_os = "macos")]
pub(crate) mod macos {
    //! Raw Security.framework authorization bindings. Kept to the three
    //! calls the gate needs; all pointers stay inside this module except
    //! the `AuthorizationRef` the delegated toggle borrows.

    #![allow(unsafe_code)]

    use std::ffi::{CStr, CString};
    use std::io;
    use std::os::raw::{c_char, c_void};
    use std::os::unix::ffi::OsStrExt;
    use std::path::Path;
    use std::ptr;

    pub(crate) type AuthorizationRef = *mut c_void;
    type OSStatus = i32;

    const ERR_AUTHORIZATION_SUCCESS: OSStatus = 0;

    const FLAG_DEFAULTS: u32 = 0;
    const FLAG_INTERACTION_ALLOWED: u32 = 1 << 0;
    const FLAG_EXTEND_RIGHTS: u32 = 1 << 1;
    const FLAG_DESTROY_RIGHTS: u32 = 1 << 3;

    /// `kAuthorizationRightExecute` from `AuthorizationTags.h`.
    const EXECUTE_RIGHT: &CStr = c"system.privilege.admin";

    #[repr(C)]
    struct AuthorizationItem {
        name: *const c_char,
        value_length: usize,
        value: *mut c_void,
        flags: u32,
    }

    #[repr(C)]
    struct AuthorizationItemSet {
        count: u32,
        items: *mut AuthorizationItem,
    }

    #[link(name = "Security", kind = "framework")]
    extern "C" {
        fn AuthorizationCreate(
            rights: *const AuthorizationItemSet,
            environment: *const AuthorizationItemSet,
            flags: u32,
            authorization: *mut AuthorizationRef,
        ) -> OSStatus;
        fn AuthorizationCopyRights(
            authorization: AuthorizationRef,
            rights: *const AuthorizationItemSet,
            environment: *const AuthorizationItemSet,
            flags: u32,
            authorized_rights: *mut *mut AuthorizationItemSet,
        ) -> OSStatus;
        fn AuthorizationFree(authorization: AuthorizationRef, flags: u32) -> OSStatus;
        fn AuthorizationExecuteWithPrivileges(
            authorization: AuthorizationRef,
            path_to_tool: *const c_char,
            options: u32,
            arguments: *const *mut c_char,
            communications_pipe: *mut *mut libc::FILE,
        ) -> OSStatus;
    }

    /// Owns a live `AuthorizationRef`; rights are destroyed on drop so a
    /// granted session never outlives the process.
    pub(crate) struct SecuritySession {
        auth_ref: AuthorizationRef,
    }

    impl SecuritySession {
        pub(crate) fn raw(&self) -> AuthorizationRef {
            self.auth_ref
        }
    }

    impl Drop for SecuritySession {
        fn drop(&mut self) {
            let status = unsafe { AuthorizationFree(self.auth_ref, FLAG_DESTROY_RIGHTS) };
            if status != ERR_AUTHORIZATION_SUCCESS {
                tracing::warn!(status, "AuthorizationFree failed");
            }
        }
    }

    /// Create an authorization and acquire the execute right, letting the
    /// security agent interact with the user. Returns the failing
    /// `OSStatus` on any denial.
    pub(super) fn request_execute_right() -> Result<SecuritySession, OSStatus> {
        let mut auth_ref: AuthorizationRef = ptr::null_mut();
        let status =
            unsafe { AuthorizationCreate(ptr::null(), ptr::null(), FLAG_DEFAULTS, &mut auth_ref) };
        if status != ERR_AUTHORIZATION_SUCCESS {
            return Err(status);
        }
        let session = SecuritySession { auth_ref };

        let mut item = AuthorizationItem {
            name: EXECUTE_RIGHT.as_ptr(),
            value_length: 0,
            value: ptr::null_mut(),
            flags: 0,
        };
        let rights = AuthorizationItemSet {
            count: 1,
            items: &mut item,
        };
        let status = unsafe {
            AuthorizationCopyRights(
                session.raw(),
                &rights,
                ptr::null(),
                FLAG_INTERACTION_ALLOWED | FLAG_EXTEND_RIGHTS,
                ptr::null_mut(),
            )
        };
        if status != ERR_AUTHORIZATION_SUCCESS {
            return Err(status);
        }
        Ok(session)
    }

    /// Run `tool` with the given arguments through the authorization's
    /// execute-with-privileges facility. The helper's output pipe is
    /// drained and discarded; only the launch status is reported. The
    /// caller re-checks the filesystem for the effect it asked for.
    pub(crate) fn execute_with_privileges(
        auth_ref: AuthorizationRef,
        tool: &Path,
        args: &[&std::ffi::OsStr],
    ) -> io::Result<()> {
        let tool_c = CString::new(tool.as_os_str().as_bytes())?;
        let arg_storage: Vec<CString> = args
            .iter()
            .map(|arg| CString::new(arg.as_bytes()))
            .collect::<Result<_, _>>()?;
        let mut argv: Vec<*mut c_char> = arg_storage
            .iter()
            .map(|arg| arg.as_ptr().cast_mut())
            .collect();
        argv.push(ptr::null_mut());

        let mut pipe: *mut libc::FILE = ptr::null_mut();
        let status = unsafe {
            AuthorizationExecuteWithPrivileges(
                auth_ref,
                tool_c.as_ptr(),
                FLAG_DEFAULTS,
                argv.as_ptr(),
                &mut pipe,
            )
        };
        if status != ERR_AUTHORIZATION_SUCCESS {
            return Err(io::Error::other(format!(
                "AuthorizationExecuteWithPrivileges failed with OSStatus {status}"
            )));
        }

        if !pipe.is_null() {
            let mut buffer = [0u8; 128];
            unsafe {
                while libc::fread(buffer.as_mut_ptr().cast(), 1, buffer.len(), pipe) > 0 {}
                libc::fclose(pipe);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn static_authenticator_grants_and_denies() {
        assert!(StaticAuthenticator::granting().authenticate().is_ok());
        assert!(matches!(
            StaticAuthenticator::denying().authenticate(),
            Err(GateError::AuthDenied)
        ));
    }

    #[test]
    fn handle_debug_is_opaque() {
        let handle = StaticAuthenticator::granting().authenticate().unwrap();
        assert_eq!(format!("{handle:?}"), "AuthorizationHandle { .. }");
    }
}
