//! Service-manager runner.
//!
//! Executes a small whitelisted set of systemctl-class subcommands against a
//! hard whitelist of units. Failures from the underlying manager come back
//! as command output, never as a session fault.

use std::path::PathBuf;
use std::sync::LazyLock;

use regex::Regex;
use tracing::info;

use crate::error::{Error, Result};
use crate::process;

/// Subcommands that may be executed.
pub const ALLOWED_SUBCOMMANDS: &[&str] = &[
    "status", "restart", "start", "stop", "reload", "enable", "disable",
];

/// Units administrators may manage, bare names without the `.service`
/// suffix.
pub const ALLOWED_UNITS: &[&str] = &["nginx", "ssh", "sshd", "cron", "webcli"];

static UNIT_NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9_.@-]+$").expect("static regex"));

/// Strip a trailing `.service` so whitelist checks see the bare name.
pub fn strip_unit_suffix(unit: &str) -> &str {
    unit.strip_suffix(".service").unwrap_or(unit)
}

/// Service runner configuration.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub binary: PathBuf,
    pub timeout_secs: u64,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            binary: PathBuf::from("/usr/bin/systemctl"),
            timeout_secs: 30,
        }
    }
}

/// Runner for the system service manager.
#[derive(Debug, Clone)]
pub struct ServiceRunner {
    config: ServiceConfig,
}

impl ServiceRunner {
    pub fn new(config: ServiceConfig) -> Self {
        Self { config }
    }

    /// Validate, execute, and return the manager's combined output.
    pub async fn run(&self, subcommand: &str, unit: &str) -> Result<String> {
        let subcommand = subcommand.to_ascii_lowercase();
        if !ALLOWED_SUBCOMMANDS.contains(&subcommand.as_str()) {
            return Err(Error::Rejected(format!(
                "subcommand '{subcommand}' is not allowed"
            )));
        }

        if !UNIT_NAME.is_match(unit) {
            return Err(Error::Rejected(format!("invalid unit name '{unit}'")));
        }
        let bare = strip_unit_suffix(unit);
        if !ALLOWED_UNITS.contains(&bare) {
            return Err(Error::Rejected(format!(
                "unit '{unit}' is not in the whitelist (allowed: {})",
                ALLOWED_UNITS.join(", ")
            )));
        }

        let argv = vec![subcommand.clone(), format!("{bare}.service")];
        info!(subcommand = %subcommand, unit = %bare, "service command");

        let out = process::run_captured(
            &self.config.binary,
            &argv,
            "systemctl",
            self.config.timeout_secs,
        )
        .await?;

        let mut text = String::new();
        if !out.stdout.is_empty() {
            text.push_str(out.stdout.trim_end());
        }
        if !out.stderr.is_empty() {
            if !text.is_empty() {
                text.push('\n');
            }
            text.push_str(out.stderr.trim_end());
        }
        if out.exit_code != 0 {
            if !text.is_empty() {
                text.push('\n');
            }
            text.push_str(&format!("(exit code {})", out.exit_code));
        }
        Ok(text)
    }
}
