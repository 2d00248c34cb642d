//! Server configuration.
//!
//! One TOML file; every section has serde defaults so a missing or partial
//! file still yields a runnable configuration.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Default config location, alongside the data files.
const DEFAULT_CONFIG_PATH: &str = "/etc/webcli/server.toml";

/// Top-level application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub security: SecurityConfig,
    #[serde(default)]
    pub paths: PathsConfig,
    #[serde(default)]
    pub tools: ToolsConfig,
}

impl AppConfig {
    /// Load from an explicit path (must exist), or from the default
    /// location, falling back to defaults when it is absent.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::read(path)
                .with_context(|| format!("failed to load config from {}", path.display())),
            None => {
                let default = Path::new(DEFAULT_CONFIG_PATH);
                if default.exists() {
                    Self::read(default).context("failed to load default config")
                } else {
                    Ok(Self::default())
                }
            }
        }
    }

    fn read(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)?;
        Ok(toml::from_str(&raw)?)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecurityConfig {
    /// Browser origins allowed to open the WebSocket.
    #[serde(default = "default_origins")]
    pub allowed_origins: Vec<String>,
    /// Accept connections without an Origin header (non-browser clients).
    #[serde(default = "default_true")]
    pub allow_missing_origin: bool,
    /// Failed logins before the connection is closed.
    #[serde(default = "default_auth_attempts")]
    pub max_auth_attempts: u32,
    /// Idle seconds before a connection is dropped; 0 disables.
    #[serde(default)]
    pub idle_timeout_secs: u64,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            allowed_origins: default_origins(),
            allow_missing_origin: true,
            max_auth_attempts: default_auth_attempts(),
            idle_timeout_secs: 0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathsConfig {
    /// Directory holding the user store and config files.
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    /// The only directory captures may write into.
    #[serde(default = "default_capture_dir")]
    pub capture_dir: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            capture_dir: default_capture_dir(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolsConfig {
    #[serde(default = "default_capture_binary")]
    pub capture_binary: PathBuf,
    #[serde(default = "default_service_binary")]
    pub service_binary: PathBuf,
    #[serde(default = "default_firewall_binary")]
    pub firewall_binary: PathBuf,
    /// Timeout for short-lived tool invocations.
    #[serde(default = "default_tool_timeout")]
    pub timeout_secs: u64,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            capture_binary: default_capture_binary(),
            service_binary: default_service_binary(),
            firewall_binary: default_firewall_binary(),
            timeout_secs: default_tool_timeout(),
        }
    }
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8990
}

fn default_origins() -> Vec<String> {
    vec![
        "http://localhost:8080".to_string(),
        "http://127.0.0.1:8080".to_string(),
    ]
}

fn default_true() -> bool {
    true
}

fn default_auth_attempts() -> u32 {
    3
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("/etc/webcli")
}

fn default_capture_dir() -> PathBuf {
    PathBuf::from("/var/log/webcli")
}

fn default_capture_binary() -> PathBuf {
    PathBuf::from("/usr/sbin/tcpdump")
}

fn default_service_binary() -> PathBuf {
    PathBuf::from("/usr/bin/systemctl")
}

fn default_firewall_binary() -> PathBuf {
    PathBuf::from("/usr/sbin/iptables")
}

fn default_tool_timeout() -> u64 {
    30
}
