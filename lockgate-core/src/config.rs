//! Gate configuration. The mapping from the gate's own path to the
//! protected binary is a convention (`<gate-path>.real`) but never an
//! assumption baked into the sequencer: an explicit target can be set in
//! the optional TOML sibling file or through environment variables, which
//! is also what makes the sequencer testable against arbitrary layouts.

use std::env;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::GateError;

/// Suffix appended to the gate path to find the protected binary.
pub const DEFAULT_TARGET_SUFFIX: &str = ".real";

/// Fixed trusted helper used by the delegated toggle strategy.
pub const DEFAULT_HELPER: &str = "/bin/chmod";

/// Which privilege-toggle implementation drives the run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ToggleStrategy {
    /// `Direct` when the gate's effective uid owns the target, otherwise
    /// `Delegated`.
    #[default]
    Auto,
    /// Flip the mode with the gate's own credentials.
    Direct,
    /// Flip the mode through the privileged helper.
    Delegated,
}

impl ToggleStrategy {
    fn parse(value: &str) -> Result<Self, GateError> {
        match value.trim().to_ascii_lowercase().as_str() {
            "auto" => Ok(ToggleStrategy::Auto),
            "direct" => Ok(ToggleStrategy::Direct),
            "delegated" => Ok(ToggleStrategy::Delegated),
            other => Err(GateError::Config(format!(
                "unknown toggle strategy `{other}` (expected auto, direct, or delegated)"
            ))),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "kebab-case", default)]
pub struct GateConfig {
    /// Explicit protected-binary path. When unset the target is derived
    /// from the gate path plus `target_suffix`.
    pub target: Option<PathBuf>,
    pub target_suffix: String,
    pub strategy: ToggleStrategy,
    /// Helper binary the delegated strategy runs with elevated privileges.
    pub helper: PathBuf,
    /// Run-lock file location; defaults to `<target>.lock`.
    pub lock_file: Option<PathBuf>,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            target: None,
            target_suffix: DEFAULT_TARGET_SUFFIX.to_string(),
            strategy: ToggleStrategy::default(),
            helper: PathBuf::from(DEFAULT_HELPER),
            lock_file: None,
        }
    }
}

impl GateConfig {
    /// Load the configuration for the gate installed at `gate_path`:
    /// built-in defaults, then the optional `<gate-path>.toml` sibling
    /// file, then `LOCKGATE_TARGET` / `LOCKGATE_STRATEGY` /
    /// `LOCKGATE_HELPER` environment overrides.
    pub fn load(gate_path: &Path) -> Result<Self, GateError> {
        let mut config =
            Self::read_file(&Self::sibling_file(gate_path))?.unwrap_or_default();
        config.apply_env_overrides()?;
        Ok(config)
    }

    /// Path of the optional configuration file next to the gate binary.
    pub fn sibling_file(gate_path: &Path) -> PathBuf {
        append_suffix(gate_path, ".toml")
    }

    /// Where the protected binary is expected for a gate at `gate_path`.
    /// Existence is not checked here; that is the sequencer's first step.
    pub fn target_path(&self, gate_path: &Path) -> PathBuf {
        match &self.target {
            Some(path) => path.clone(),
            None => append_suffix(gate_path, &self.target_suffix),
        }
    }

    fn read_file(path: &Path) -> Result<Option<Self>, GateError> {
        let raw = match fs::read_to_string(path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(err) => {
                return Err(GateError::Config(format!(
                    "cannot read {}: {err}",
                    path.display()
                )));
            }
        };
        tracing::debug!(config = %path.display(), "loading gate configuration file");
        toml::from_str(&raw).map(Some).map_err(|err| {
            GateError::Config(format!("cannot parse {}: {err}", path.display()))
        })
    }

    fn apply_env_overrides(&mut self) -> Result<(), GateError> {
        if let Ok(target) = env::var("LOCKGATE_TARGET") {
            if !target.is_empty() {
                self.target = Some(PathBuf::from(target));
            }
        }
        if let Ok(strategy) = env::var("LOCKGATE_STRATEGY") {
            self.strategy = ToggleStrategy::parse(&strategy)?;
        }
        if let Ok(helper) = env::var("LOCKGATE_HELPER") {
            if !helper.is_empty() {
                self.helper = PathBuf::from(helper);
            }
        }
        Ok(())
    }
}

fn append_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut os = path.as_os_str().to_os_string();
    os.push(suffix);
    PathBuf::from(os)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn defaults_follow_the_real_suffix_convention() {
        let config = GateConfig::default();
        assert_eq!(
            config.target_path(Path::new("/Applications/Safari")),
            PathBuf::from("/Applications/Safari.real")
        );
        assert_eq!(config.helper, PathBuf::from("/bin/chmod"));
        assert_eq!(config.strategy, ToggleStrategy::Auto);
    }

    #[test]
    fn explicit_target_wins_over_suffix_derivation() {
        let config = GateConfig {
            target: Some(PathBuf::from("/opt/app/bin/app")),
            ..GateConfig::default()
        };
        assert_eq!(
            config.target_path(Path::new("/usr/local/bin/gate")),
            PathBuf::from("/opt/app/bin/app")
        );
    }

    #[test]
    fn parses_sibling_toml() {
        let dir = tempfile::tempdir().unwrap();
        let gate = dir.path().join("gate");
        fs::write(
            GateConfig::sibling_file(&gate),
            "target = \"/srv/app\"\nstrategy = \"delegated\"\nhelper = \"/usr/bin/chmod\"\n",
        )
        .unwrap();

        let config = GateConfig::read_file(&GateConfig::sibling_file(&gate))
            .unwrap()
            .unwrap();
        assert_eq!(config.target, Some(PathBuf::from("/srv/app")));
        assert_eq!(config.strategy, ToggleStrategy::Delegated);
        assert_eq!(config.helper, PathBuf::from("/usr/bin/chmod"));
    }

    #[test]
    fn rejects_unknown_keys() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("gate.toml");
        fs::write(&file, "not-a-key = true\n").unwrap();
        assert!(matches!(
            GateConfig::read_file(&file),
            Err(GateError::Config(_))
        ));
    }

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let loaded = GateConfig::read_file(Path::new("/nonexistent/gate.toml")).unwrap();
        assert!(loaded.is_none());
    }

    #[test]
    fn env_overrides_take_precedence() {
        // The only test that touches LOCKGATE_* variables; keeps them set
        // for as short a window as possible.
        env::set_var("LOCKGATE_TARGET", "/env/app");
        env::set_var("LOCKGATE_STRATEGY", "direct");
        env::set_var("LOCKGATE_HELPER", "/sbin/chmod");

        let mut config = GateConfig {
            target: Some(PathBuf::from("/file/app")),
            ..GateConfig::default()
        };
        let result = config.apply_env_overrides();

        env::remove_var("LOCKGATE_TARGET");
        env::remove_var("LOCKGATE_STRATEGY");
        env::remove_var("LOCKGATE_HELPER");

        result.unwrap();
        assert_eq!(config.target, Some(PathBuf::from("/env/app")));
        assert_eq!(config.strategy, ToggleStrategy::Direct);
        assert_eq!(config.helper, PathBuf::from("/sbin/chmod"));
    }

    #[test]
    fn strategy_parsing_is_case_insensitive_and_strict() {
        assert_eq!(
            ToggleStrategy::parse("Direct").unwrap(),
            ToggleStrategy::Direct
        );
        assert_eq!(
            ToggleStrategy::parse(" delegated ").unwrap(),
            ToggleStrategy::Delegated
        );
        assert!(ToggleStrategy::parse("sudo").is_err());
    }
}
