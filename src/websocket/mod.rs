//! WebSocket endpoint: origin gate, session budget, upgrade.

mod connection;

use std::sync::Arc;

use axum::extract::ws::WebSocketUpgrade;
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Extension;
use tracing::warn;

use crate::server::AppState;

/// Upgrade handler for `/ws`. The Origin allowlist and the session budget
/// are both enforced before the handshake is accepted.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    headers: HeaderMap,
    Extension(state): Extension<Arc<AppState>>,
) -> Response {
    let origin = headers
        .get(header::ORIGIN)
        .and_then(|value| value.to_str().ok());
    if !state.origin_allowed(origin) {
        warn!(
            origin = origin.unwrap_or("<none>"),
            "rejected connection from disallowed origin"
        );
        return StatusCode::FORBIDDEN.into_response();
    }

    let Some(permit) = state.try_acquire_session() else {
        warn!("rejected connection: session limit reached");
        return StatusCode::SERVICE_UNAVAILABLE.into_response();
    };

    ws.on_upgrade(move |socket| connection::handle_socket(socket, state, permit))
}
