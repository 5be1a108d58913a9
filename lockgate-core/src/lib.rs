//! Launch sequencing for a permission-locked executable. The protected
//! binary rests at mode `0000` and only becomes runnable for the duration
//! of a single authenticated launch: authenticate, grant owner-execute,
//! spawn and wait, revoke. The crate exposes trait seams for the two
//! pieces that differ between deployments — how the user is authenticated
//! and how the permission bit is flipped — so the sequencer itself stays a
//! single orchestration path.

pub mod auth;
pub mod config;
pub mod error;
pub mod runlock;
pub mod sequencer;
pub mod target;
pub mod toggle;

pub use auth::{Authenticator, AuthorizationHandle, StaticAuthenticator, platform_authenticator};
pub use config::{GateConfig, ToggleStrategy};
pub use error::GateError;
pub use runlock::RunLock;
pub use sequencer::{ExitOutcome, LaunchRequest, LaunchSequencer};
pub use target::{LockState, ProtectedTarget};
pub use toggle::{
    DelegatedToggle, DirectToggle, LOCKED_MODE, PrivilegeToggle, UNLOCKED_MODE, toggle_for,
};
