//! Explicit validator registry for config writes.
//!
//! Every writable (file, section, key) triple is registered here at
//! startup with a help string and a predicate. A key without a validator
//! is never writable: unknown keys fail closed. Section and key names are
//! normalized so lookups tolerate the source file's casing.

use std::collections::HashMap;

/// Outcome of a validator predicate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Pass,
    /// Reject, optionally with a custom message; without one the key's
    /// help text is shown instead.
    Fail(Option<String>),
}

/// Help text plus predicate gating one config key.
pub struct Validator {
    pub help: &'static str,
    pub check: fn(&str) -> Verdict,
}

/// Normalize a section or key name: lowercase, runs of non-alphanumerics
/// collapse to a single underscore, trimmed at both ends.
pub fn normalize(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut pending_sep = false;
    for c in name.chars() {
        if c.is_ascii_alphanumeric() {
            if pending_sep && !out.is_empty() {
                out.push('_');
            }
            out.push(c.to_ascii_lowercase());
            pending_sep = false;
        } else {
            pending_sep = true;
        }
    }
    out
}

type Key = (String, String, String);

/// Registry of every writable config key.
#[derive(Default)]
pub struct ValidatorRegistry {
    map: HashMap<Key, Validator>,
}

impl ValidatorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, file: &str, section: &str, key: &str, validator: Validator) {
        self.map.insert(
            (file.to_string(), normalize(section), normalize(key)),
            validator,
        );
    }

    pub fn lookup(&self, file: &str, section: &str, key: &str) -> Option<&Validator> {
        self.map
            .get(&(file.to_string(), normalize(section), normalize(key)))
    }

    pub fn help(&self, file: &str, section: &str, key: &str) -> Option<&'static str> {
        self.lookup(file, section, key).map(|v| v.help)
    }

    /// Gate a candidate value. `Err` carries the user-facing reason.
    pub fn validate(
        &self,
        file: &str,
        section: &str,
        key: &str,
        value: &str,
    ) -> std::result::Result<(), String> {
        let Some(validator) = self.lookup(file, section, key) else {
            return Err(format!(
                "no validator registered for [{section}].{key} in '{file}'"
            ));
        };
        match (validator.check)(value) {
            Verdict::Pass => Ok(()),
            Verdict::Fail(Some(message)) => Err(message),
            Verdict::Fail(None) => Err(format!("invalid value. {}", validator.help)),
        }
    }

    /// The registry shipped with the product's own config files.
    pub fn builtin() -> Self {
        let mut registry = Self::new();
        registry.register(
            "settings.toml",
            "general",
            "log_level",
            Validator {
                help: "log level: one of trace, debug, info, warn, error.",
                check: check_log_level,
            },
        );
        registry.register(
            "settings.toml",
            "capture",
            "default_interface",
            Validator {
                help: "network interface name, e.g. eth0.",
                check: check_interface,
            },
        );
        registry.register(
            "settings.toml",
            "session",
            "idle_timeout_secs",
            Validator {
                help: "seconds between 0 and 86400; 0 disables the idle timeout.",
                check: check_idle_timeout,
            },
        );
        registry.register(
            "settings.toml",
            "session",
            "max_auth_attempts",
            Validator {
                help: "login attempts between 1 and 10.",
                check: check_auth_attempts,
            },
        );
        registry.register(
            "limits.json",
            "-",
            "max_sessions",
            Validator {
                help: "concurrent sessions between 1 and 1024.",
                check: check_max_sessions,
            },
        );
        registry.register(
            "limits.json",
            "-",
            "history_limit",
            Validator {
                help: "history entries between 10 and 10000.",
                check: check_history_limit,
            },
        );
        registry
    }
}

fn int_in_range(value: &str, min: i64, max: i64) -> bool {
    value
        .trim()
        .parse::<i64>()
        .is_ok_and(|n| (min..=max).contains(&n))
}

fn check_log_level(value: &str) -> Verdict {
    const LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];
    if LEVELS.contains(&value.trim().to_ascii_lowercase().as_str()) {
        Verdict::Pass
    } else {
        Verdict::Fail(None)
    }
}

fn check_interface(value: &str) -> Verdict {
    let v = value.trim();
    let ok = !v.is_empty()
        && v.len() <= 15
        && v.chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | ':' | '-'));
    if ok {
        Verdict::Pass
    } else {
        Verdict::Fail(None)
    }
}

fn check_idle_timeout(value: &str) -> Verdict {
    if int_in_range(value, 0, 86_400) {
        Verdict::Pass
    } else {
        Verdict::Fail(None)
    }
}

fn check_auth_attempts(value: &str) -> Verdict {
    if int_in_range(value, 1, 10) {
        Verdict::Pass
    } else {
        Verdict::Fail(None)
    }
}

fn check_max_sessions(value: &str) -> Verdict {
    if int_in_range(value, 1, 1024) {
        Verdict::Pass
    } else {
        Verdict::Fail(Some(
            "max_sessions must be a number between 1 and 1024.".to_string(),
        ))
    }
}

fn check_history_limit(value: &str) -> Verdict {
    if int_in_range(value, 10, 10_000) {
        Verdict::Pass
    } else {
        Verdict::Fail(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalization_rules() {
        assert_eq!(normalize("CatSleep"), "catsleep");
        assert_eq!(normalize("Max-Retries"), "max_retries");
        assert_eq!(normalize("__a__b__"), "a_b");
        assert_eq!(normalize("log level!"), "log_level");
        assert_eq!(normalize("-"), "");
        assert_eq!(normalize(""), "");
    }

    #[test]
    fn unknown_keys_fail_closed() {
        let registry = ValidatorRegistry::builtin();
        let err = registry
            .validate("settings.toml", "general", "no_such_key", "1")
            .unwrap_err();
        assert!(err.contains("no validator registered"));
    }

    #[test]
    fn unknown_files_fail_closed() {
        let registry = ValidatorRegistry::builtin();
        assert!(registry
            .validate("other.toml", "general", "log_level", "info")
            .is_err());
    }

    #[test]
    fn rejection_without_custom_message_falls_back_to_help() {
        let registry = ValidatorRegistry::builtin();
        let err = registry
            .validate("settings.toml", "general", "log_level", "loud")
            .unwrap_err();
        assert_eq!(
            err,
            "invalid value. log level: one of trace, debug, info, warn, error."
        );
    }

    #[test]
    fn custom_messages_win_over_help() {
        let registry = ValidatorRegistry::builtin();
        let err = registry
            .validate("limits.json", "-", "max_sessions", "a-lot")
            .unwrap_err();
        assert_eq!(err, "max_sessions must be a number between 1 and 1024.");
    }

    #[test]
    fn lookups_tolerate_source_casing() {
        let registry = ValidatorRegistry::builtin();
        assert!(registry
            .validate("settings.toml", "General", "Log-Level", "debug")
            .is_ok());
        assert!(registry.help("settings.toml", "GENERAL", "LOG_LEVEL").is_some());
    }

    #[test]
    fn range_validators_accept_bounds() {
        let registry = ValidatorRegistry::builtin();
        for (value, ok) in [("0", true), ("86400", true), ("86401", false), ("-1", false)] {
            let result = registry.validate("settings.toml", "session", "idle_timeout_secs", value);
            assert_eq!(result.is_ok(), ok, "value {value}");
        }
    }
}
