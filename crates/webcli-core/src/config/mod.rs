//! Structured config-file editing behind the validator registry.
//!
//! The manager touches only the files listed in [`MANAGED_FILES`]. Every
//! write is gated by the registry and persisted as an atomic whole-file
//! replacement; a rejected value leaves the stored file byte-identical.
//! TOML files are edited with `toml_edit` so unrelated formatting and
//! comments survive.

pub mod validators;

use std::path::PathBuf;

use toml_edit::DocumentMut;
use tracing::{info, warn};

use crate::atomic::atomic_write;
use crate::error::{Error, Result};
use crate::role::Role;
use crate::session::{Services, SessionIo};
use crate::users::Principal;

pub use validators::{normalize, Validator, ValidatorRegistry, Verdict};

/// Formats the manager understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileFormat {
    Toml,
    Json,
}

/// The files the manager may touch, fixed at compile time. The builtin
/// validator registry covers exactly these.
pub const MANAGED_FILES: &[(&str, FileFormat)] = &[
    ("settings.toml", FileFormat::Toml),
    ("limits.json", FileFormat::Json),
];

/// `config` subcommands, shared with the autocomplete engine.
pub(crate) const SUBCOMMANDS: &[&str] = &["describe", "list", "set", "show"];

/// One listed entry of a config file. Flat files use an empty section.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigEntry {
    pub section: String,
    pub key: String,
    pub value: String,
}

/// Lists, reads, and edits the managed config files.
pub struct ConfigManager {
    dir: PathBuf,
    registry: ValidatorRegistry,
}

impl ConfigManager {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            registry: ValidatorRegistry::builtin(),
        }
    }

    /// Files visible to a role. Config editing is an admin-tier surface.
    pub fn list_files(&self, role: Role) -> Vec<&'static str> {
        if role >= Role::Admin {
            MANAGED_FILES.iter().map(|(name, _)| *name).collect()
        } else {
            Vec::new()
        }
    }

    fn format_of(file: &str) -> Option<FileFormat> {
        MANAGED_FILES
            .iter()
            .find(|(name, _)| *name == file)
            .map(|(_, format)| *format)
    }

    fn read(&self, file: &str) -> Result<(FileFormat, String)> {
        let format = Self::format_of(file)
            .ok_or_else(|| Error::Rejected(format!("unknown config file '{file}'")))?;
        let raw = std::fs::read_to_string(self.dir.join(file)).map_err(|e| {
            warn!(file, error = %e, "config file unreadable");
            Error::Rejected(format!("config file '{file}' is not available"))
        })?;
        Ok((format, raw))
    }

    /// List (section, key, current value) tuples.
    pub fn entries(&self, file: &str) -> Result<Vec<ConfigEntry>> {
        let (format, raw) = self.read(file)?;
        match format {
            FileFormat::Toml => toml_entries(&raw),
            FileFormat::Json => json_entries(&raw),
        }
    }

    /// Help text for one key, if a validator is registered.
    pub fn describe(&self, file: &str, section: &str, key: &str) -> Option<&'static str> {
        self.registry.help(file, section, key)
    }

    /// Validate and persist one value. The stored file is untouched unless
    /// the validator passes and the rewrite succeeds.
    pub fn set(&self, file: &str, section: &str, key: &str, value: &str) -> Result<()> {
        self.registry
            .validate(file, section, key, value)
            .map_err(Error::Rejected)?;
        let (format, raw) = self.read(file)?;
        let updated = match format {
            FileFormat::Toml => set_toml(&raw, section, key, value)?,
            FileFormat::Json => set_json(&raw, key, value)?,
        };
        atomic_write(&self.dir.join(file), &updated).map_err(|e| {
            warn!(file, error = %e, "config write failed");
            Error::Persistence(e.to_string())
        })?;
        info!(file, section, key, "config updated");
        Ok(())
    }
}

fn toml_entries(raw: &str) -> Result<Vec<ConfigEntry>> {
    let doc = parse_toml(raw)?;
    let mut entries = Vec::new();
    for (section, item) in doc.iter() {
        if let Some(table) = item.as_table() {
            for (key, item) in table.iter() {
                if let Some(value) = item.as_value() {
                    entries.push(ConfigEntry {
                        section: section.to_string(),
                        key: key.to_string(),
                        value: display_toml(value),
                    });
                }
            }
        }
    }
    Ok(entries)
}

fn json_entries(raw: &str) -> Result<Vec<ConfigEntry>> {
    let root = parse_json(raw)?;
    let Some(object) = root.as_object() else {
        return Err(Error::Rejected("config file has no top-level object".into()));
    };
    Ok(object
        .iter()
        .map(|(key, value)| ConfigEntry {
            section: String::new(),
            key: key.clone(),
            value: display_json(value),
        })
        .collect())
}

fn set_toml(raw: &str, section: &str, key: &str, value: &str) -> Result<String> {
    let mut doc = parse_toml(raw)?;

    // Tolerate the file's own casing: reuse the existing section/key whose
    // normalized name matches the requested one.
    let section_name = doc
        .iter()
        .map(|(name, _)| name.to_string())
        .find(|name| normalize(name) == normalize(section))
        .unwrap_or_else(|| section.to_string());
    let key_name = doc
        .get(&section_name)
        .and_then(|item| item.as_table())
        .and_then(|table| {
            table
                .iter()
                .map(|(k, _)| k.to_string())
                .find(|k| normalize(k) == normalize(key))
        })
        .unwrap_or_else(|| key.to_string());

    doc[section_name.as_str()][key_name.as_str()] = toml_edit::value(coerce_toml(value));
    Ok(doc.to_string())
}

fn set_json(raw: &str, key: &str, value: &str) -> Result<String> {
    let mut root = parse_json(raw)?;
    let Some(object) = root.as_object_mut() else {
        return Err(Error::Rejected("config file has no top-level object".into()));
    };
    let key_name = object
        .keys()
        .find(|k| normalize(k) == normalize(key))
        .cloned()
        .unwrap_or_else(|| key.to_string());
    object.insert(key_name, coerce_json(value));

    let mut out = serde_json::to_string_pretty(&root).map_err(|e| {
        warn!(error = %e, "config serialization failed");
        Error::Persistence(e.to_string())
    })?;
    out.push('\n');
    Ok(out)
}

fn parse_toml(raw: &str) -> Result<DocumentMut> {
    raw.parse::<DocumentMut>().map_err(|e| {
        warn!(error = %e, "config file is not valid TOML");
        Error::Rejected("config file is not valid TOML".into())
    })
}

fn parse_json(raw: &str) -> Result<serde_json::Value> {
    serde_json::from_str(raw).map_err(|e| {
        warn!(error = %e, "config file is not valid JSON");
        Error::Rejected("config file is not valid JSON".into())
    })
}

fn display_toml(value: &toml_edit::Value) -> String {
    match value {
        toml_edit::Value::String(s) => s.value().clone(),
        other => other.to_string().trim().to_string(),
    }
}

fn display_json(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn coerce_toml(value: &str) -> toml_edit::Value {
    if let Ok(b) = value.parse::<bool>() {
        return b.into();
    }
    if let Ok(i) = value.parse::<i64>() {
        return i.into();
    }
    value.into()
}

fn coerce_json(value: &str) -> serde_json::Value {
    if let Ok(b) = value.parse::<bool>() {
        return b.into();
    }
    if let Ok(i) = value.parse::<i64>() {
        return i.into();
    }
    value.into()
}

// ---------------------------------------------------------------------------
// config command surface
// ---------------------------------------------------------------------------

/// Entry point for the `config` command.
pub async fn run_config(
    io: &mut SessionIo,
    services: &Services,
    actor: &Principal,
    args: &[String],
) -> Result<()> {
    let manager = &services.config;
    match (args.first().map(String::as_str), args.len()) {
        (None, _) | (Some("list"), 1) => {
            let files = manager.list_files(actor.role);
            if files.is_empty() {
                io.send_line("no config files available to your role.");
            } else {
                io.send_line("📄 config files:");
                for file in files {
                    io.send_line(format!("  {file}"));
                }
            }
            Ok(())
        }
        (Some("show"), 2) => {
            let entries = manager.entries(&args[1])?;
            if entries.is_empty() {
                io.send_line("no entries.");
                return Ok(());
            }
            let mut current_section: Option<&str> = None;
            for entry in &entries {
                if !entry.section.is_empty() && current_section != Some(entry.section.as_str()) {
                    io.send_line(format!("[{}]", entry.section));
                    current_section = Some(entry.section.as_str());
                }
                io.send_line(format!("  {} = {}", entry.key, entry.value));
            }
            Ok(())
        }
        (Some("describe"), 4) => {
            match manager.describe(&args[1], &args[2], &args[3]) {
                Some(help) => io.send_line(format!("ℹ️ {help}")),
                None => io.send_line(format!(
                    "no help available for [{}].{}",
                    args[2], args[3]
                )),
            }
            Ok(())
        }
        (Some("set"), 5) => {
            manager.set(&args[1], &args[2], &args[3], &args[4])?;
            io.send_line(format!("✅ updated: {} = {}", args[3], args[4]));
            Ok(())
        }
        _ => {
            io.send_line(
                "usage: config <list | show <file> | describe <file> <section> <key> | set <file> <section> <key> <value>>",
            );
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    const SETTINGS: &str = "\
# webcli runtime settings
[general]
log_level = \"info\"

[capture]
default_interface = \"eth0\"

[Session]
idle_timeout_secs = 900
max_auth_attempts = 3
";

    const LIMITS: &str = "{\n  \"max_sessions\": 16,\n  \"history_limit\": 500\n}\n";

    fn manager(dir: &tempfile::TempDir) -> ConfigManager {
        fs::write(dir.path().join("settings.toml"), SETTINGS).unwrap();
        fs::write(dir.path().join("limits.json"), LIMITS).unwrap();
        ConfigManager::new(dir.path())
    }

    #[test]
    fn listing_is_role_gated() {
        let dir = tempfile::tempdir().unwrap();
        let m = manager(&dir);
        assert_eq!(m.list_files(Role::Root).len(), 2);
        assert_eq!(m.list_files(Role::Admin).len(), 2);
        assert!(m.list_files(Role::Operator).is_empty());
        assert!(m.list_files(Role::Viewer).is_empty());
    }

    #[test]
    fn entries_walk_sections_and_keys() {
        let dir = tempfile::tempdir().unwrap();
        let m = manager(&dir);
        let entries = m.entries("settings.toml").unwrap();
        assert!(entries.contains(&ConfigEntry {
            section: "general".into(),
            key: "log_level".into(),
            value: "info".into(),
        }));
        assert!(entries.contains(&ConfigEntry {
            section: "Session".into(),
            key: "idle_timeout_secs".into(),
            value: "900".into(),
        }));

        let entries = m.entries("limits.json").unwrap();
        assert!(entries.contains(&ConfigEntry {
            section: String::new(),
            key: "max_sessions".into(),
            value: "16".into(),
        }));
    }

    #[test]
    fn set_updates_the_value_and_keeps_comments() {
        let dir = tempfile::tempdir().unwrap();
        let m = manager(&dir);
        m.set("settings.toml", "general", "log_level", "debug")
            .unwrap();

        let raw = fs::read_to_string(dir.path().join("settings.toml")).unwrap();
        assert!(raw.contains("log_level = \"debug\""));
        assert!(raw.contains("# webcli runtime settings"));
        // untouched keys keep their exact rendering
        assert!(raw.contains("default_interface = \"eth0\""));
    }

    #[test]
    fn integers_are_written_unquoted() {
        let dir = tempfile::tempdir().unwrap();
        let m = manager(&dir);
        m.set("settings.toml", "session", "idle_timeout_secs", "1200")
            .unwrap();
        let raw = fs::read_to_string(dir.path().join("settings.toml")).unwrap();
        assert!(raw.contains("idle_timeout_secs = 1200"));
    }

    #[test]
    fn rejected_values_leave_the_file_byte_identical() {
        let dir = tempfile::tempdir().unwrap();
        let m = manager(&dir);
        let before = fs::read(dir.path().join("settings.toml")).unwrap();

        let err = m
            .set("settings.toml", "general", "log_level", "loud")
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "invalid value. log level: one of trace, debug, info, warn, error."
        );

        let after = fs::read(dir.path().join("settings.toml")).unwrap();
        assert_eq!(before, after);
    }

    #[test]
    fn unregistered_keys_are_never_writable() {
        let dir = tempfile::tempdir().unwrap();
        let m = manager(&dir);
        let before = fs::read(dir.path().join("settings.toml")).unwrap();

        let err = m
            .set("settings.toml", "general", "secret_mode", "on")
            .unwrap_err();
        assert!(err.to_string().contains("no validator registered"));
        assert_eq!(before, fs::read(dir.path().join("settings.toml")).unwrap());
    }

    #[test]
    fn lookups_tolerate_file_casing() {
        let dir = tempfile::tempdir().unwrap();
        let m = manager(&dir);
        // the fixture spells the section `[Session]`
        m.set("settings.toml", "session", "max_auth_attempts", "5")
            .unwrap();
        let raw = fs::read_to_string(dir.path().join("settings.toml")).unwrap();
        assert!(raw.contains("[Session]"));
        assert!(raw.contains("max_auth_attempts = 5"));
        // no duplicate section was created
        assert!(!raw.contains("[session]"));
    }

    #[test]
    fn json_set_roundtrips() {
        let dir = tempfile::tempdir().unwrap();
        let m = manager(&dir);
        m.set("limits.json", "-", "max_sessions", "64").unwrap();

        let raw = fs::read_to_string(dir.path().join("limits.json")).unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(parsed["max_sessions"], 64);
        assert_eq!(parsed["history_limit"], 500);
    }

    #[test]
    fn json_rejection_uses_the_custom_message() {
        let dir = tempfile::tempdir().unwrap();
        let m = manager(&dir);
        let before = fs::read(dir.path().join("limits.json")).unwrap();

        let err = m.set("limits.json", "-", "max_sessions", "maybe").unwrap_err();
        assert_eq!(
            err.to_string(),
            "max_sessions must be a number between 1 and 1024."
        );
        assert_eq!(before, fs::read(dir.path().join("limits.json")).unwrap());
    }

    #[test]
    fn unknown_files_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let m = manager(&dir);
        assert!(m.entries("passwd").is_err());
        assert!(m.set("passwd", "a", "b", "c").is_err());
    }

    #[test]
    fn describe_returns_registered_help() {
        let dir = tempfile::tempdir().unwrap();
        let m = manager(&dir);
        assert_eq!(
            m.describe("settings.toml", "general", "log_level"),
            Some("log level: one of trace, debug, info, warn, error.")
        );
        assert!(m.describe("settings.toml", "general", "nope").is_none());
    }
}
