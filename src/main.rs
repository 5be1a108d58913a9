//! lockgate — authorization-gated launcher for a protected executable.
//!
//! Installed in place of an application whose real binary sits beside it
//! as `<name>.real` at mode `0000`. Invoked with the argv intended for
//! that application: everything after argv[0] is forwarded to the child
//! untouched, and the gate's exit code is the child's.

use lockgate_core::{ExitOutcome, GateConfig, GateError, LaunchRequest, LaunchSequencer};

mod hardening;

fn main() {
    init_tracing();

    // A gate that cannot harden itself does not run the protected app.
    if let Err(err) = hardening::apply() {
        eprintln!("lockgate: process hardening failed: {err:#}");
        std::process::exit(ExitOutcome::FAILURE_CODE);
    }

    let request = LaunchRequest::from_env();
    let code = match run(&request) {
        Ok(outcome) => outcome.code(),
        Err(err) => {
            report(&err);
            ExitOutcome::FAILURE_CODE
        }
    };
    std::process::exit(code);
}

fn run(request: &LaunchRequest) -> Result<ExitOutcome, GateError> {
    let config = GateConfig::load(&request.gate_path)?;
    let authenticator = lockgate_core::platform_authenticator();
    let target_path = config.target_path(&request.gate_path);
    let toggle = lockgate_core::toggle_for(&config, &target_path);
    LaunchSequencer::new(&config, authenticator.as_ref(), toggle.as_ref()).run(request)
}

/// One human-readable line per failure kind. A failed revocation is the
/// one state an operator must act on, so it gets more than one line.
fn report(err: &GateError) {
    if err.leaves_target_executable() {
        eprintln!("lockgate: SECURITY: {err}");
        eprintln!("lockgate: the protected binary is still executable; re-lock it manually with chmod 0000");
    } else {
        eprintln!("lockgate: {err}");
    }
    tracing::error!(%err, "gate run failed");
}

fn init_tracing() {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("lockgate=warn,lockgate_core=warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}
