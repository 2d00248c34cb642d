//! Server assembly: shared state, router, lifecycle.

pub mod config;

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::http::HeaderValue;
use axum::{routing::get, Extension, Router};
use serde::Deserialize;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use webcli_core::{ConfigManager, Services, SessionLimits, UserStore};
use webcli_tools::{
    CaptureConfig, CaptureRunner, FirewallConfig, FirewallRunner, ServiceConfig, ServiceRunner,
};

use crate::websocket;
use config::AppConfig;

const DEFAULT_MAX_SESSIONS: usize = 64;

/// Shared per-process state.
pub struct AppState {
    pub services: Arc<Services>,
    pub config: AppConfig,
    max_sessions: usize,
    active_sessions: AtomicUsize,
}

impl AppState {
    /// Origin allowlist check, applied before the WebSocket upgrade.
    pub fn origin_allowed(&self, origin: Option<&str>) -> bool {
        match origin {
            Some(origin) => self
                .config
                .security
                .allowed_origins
                .iter()
                .any(|allowed| allowed == origin),
            None => self.config.security.allow_missing_origin,
        }
    }

    /// Claim a connection slot. `None` once `max_sessions` is reached; the
    /// permit releases the slot on drop.
    pub fn try_acquire_session(self: &Arc<Self>) -> Option<SessionPermit> {
        let previous = self.active_sessions.fetch_add(1, Ordering::SeqCst);
        if previous >= self.max_sessions {
            self.active_sessions.fetch_sub(1, Ordering::SeqCst);
            return None;
        }
        Some(SessionPermit {
            state: Arc::clone(self),
        })
    }
}

/// RAII slot in the per-process session budget.
pub struct SessionPermit {
    state: Arc<AppState>,
}

impl Drop for SessionPermit {
    fn drop(&mut self) {
        self.state.active_sessions.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Run the server until shutdown.
pub async fn run(mut config: AppConfig) -> Result<()> {
    info!("starting webcli v{}", env!("CARGO_PKG_VERSION"));

    if !config.paths.data_dir.join("users.json").exists() {
        warn!(
            data_dir = %config.paths.data_dir.display(),
            "user store not found; logins will fail until it is provisioned"
        );
    }
    apply_runtime_settings(&mut config);
    let max_sessions = load_max_sessions(&config);

    let state = Arc::new(AppState {
        services: Arc::new(build_services(&config)),
        config: config.clone(),
        max_sessions,
        active_sessions: AtomicUsize::new(0),
    });

    let app = Router::new()
        .route("/", get(|| async { "webcli" }))
        .route("/health", get(|| async { "ok" }))
        .route("/ws", get(websocket::ws_handler))
        .layer(Extension(state))
        .layer(TraceLayer::new_for_http())
        .layer(cors_layer(&config));

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port)
        .parse()
        .context("invalid listen address")?;
    info!("listening on http://{addr}");

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .context("failed to bind listen address")?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    info!("webcli shutdown complete");
    Ok(())
}

fn build_services(config: &AppConfig) -> Services {
    Services {
        users: UserStore::new(&config.paths.data_dir),
        config: ConfigManager::new(&config.paths.data_dir),
        capture: CaptureRunner::new(CaptureConfig {
            binary: config.tools.capture_binary.clone(),
            capture_dir: config.paths.capture_dir.clone(),
        }),
        service: ServiceRunner::new(ServiceConfig {
            binary: config.tools.service_binary.clone(),
            timeout_secs: config.tools.timeout_secs,
        }),
        firewall: FirewallRunner::new(FirewallConfig {
            binary: config.tools.firewall_binary.clone(),
            timeout_secs: config.tools.timeout_secs,
        }),
        limits: SessionLimits {
            max_auth_attempts: config.security.max_auth_attempts,
        },
    }
}

/// Operator-editable session policy from `settings.toml` (the file the
/// in-shell `config` command edits) overrides the static server config.
#[derive(Debug, Default, Deserialize)]
struct RuntimeSettings {
    #[serde(default)]
    session: RuntimeSession,
}

#[derive(Debug, Default, Deserialize)]
struct RuntimeSession {
    idle_timeout_secs: Option<u64>,
    max_auth_attempts: Option<u32>,
}

fn apply_runtime_settings(config: &mut AppConfig) {
    let path = config.paths.data_dir.join("settings.toml");
    let Ok(raw) = std::fs::read_to_string(&path) else {
        return;
    };
    match toml::from_str::<RuntimeSettings>(&raw) {
        Ok(settings) => {
            if let Some(secs) = settings.session.idle_timeout_secs {
                config.security.idle_timeout_secs = secs;
            }
            if let Some(attempts) = settings.session.max_auth_attempts {
                config.security.max_auth_attempts = attempts;
            }
        }
        Err(e) => warn!(error = %e, "settings.toml unreadable; using server defaults"),
    }
}

#[derive(Debug, Deserialize)]
struct RuntimeLimits {
    max_sessions: Option<usize>,
}

fn load_max_sessions(config: &AppConfig) -> usize {
    let path = config.paths.data_dir.join("limits.json");
    let Ok(raw) = std::fs::read_to_string(&path) else {
        return DEFAULT_MAX_SESSIONS;
    };
    match serde_json::from_str::<RuntimeLimits>(&raw) {
        Ok(limits) => limits.max_sessions.unwrap_or(DEFAULT_MAX_SESSIONS),
        Err(e) => {
            warn!(error = %e, "limits.json unreadable; using default session limit");
            DEFAULT_MAX_SESSIONS
        }
    }
}

fn cors_layer(config: &AppConfig) -> CorsLayer {
    let origins: Vec<HeaderValue> = config
        .security
        .allowed_origins
        .iter()
        .filter_map(|origin| origin.parse().ok())
        .collect();
    CorsLayer::new().allow_origin(AllowOrigin::list(origins))
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "failed to install ctrl-c handler");
    }
}
