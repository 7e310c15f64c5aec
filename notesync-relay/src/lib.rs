//! # Notesync Relay
//!
//! Room-based WebSocket relay for notesync sessions.
//!
//! ## Endpoints
//!
//! - `GET /ws` - WebSocket upgrade carrying wire events
//! - `GET /health/live` - Liveness probe
//! - `GET /health/ready` - Readiness probe
//! - `GET /metrics` - Prometheus metrics (binary only)
//!
//! The relay keeps no document state. It only tracks which peers are in
//! which rooms and forwards frames between them.

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![deny(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod health;
pub mod metrics;
pub mod relay;

use std::future::Future;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};

use axum::{
    extract::{ws::WebSocketUpgrade, State},
    http::{header, HeaderMap},
    response::IntoResponse,
    routing::get,
    Router,
};
use clap::Parser;
use tokio::net::TcpListener;
use tower_http::trace::{DefaultMakeSpan, DefaultOnRequest, DefaultOnResponse, TraceLayer};
use tracing::Level;

pub use relay::{handle_relay_socket, RelayState};

/// Default port for the relay.
pub const DEFAULT_PORT: u16 = 9474;

/// Errors that can occur while running the relay.
#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    /// Binding or serving failed.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Relay command-line configuration.
#[derive(Debug, Clone, Parser)]
#[command(name = "notesync-relay")]
#[command(about = "Room-based WebSocket relay for notesync collaboration")]
#[command(version)]
pub struct RelayConfig {
    /// Address to bind
    #[arg(long, env = "NOTESYNC_RELAY_BIND", default_value_t = IpAddr::V4(Ipv4Addr::LOCALHOST))]
    pub bind: IpAddr,

    /// Port to listen on
    #[arg(long, env = "NOTESYNC_RELAY_PORT", default_value_t = DEFAULT_PORT)]
    pub port: u16,

    /// Reflect document updates back to their sender
    #[arg(long, env = "NOTESYNC_RELAY_ECHO_TO_SENDER")]
    pub echo_to_sender: bool,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            bind: IpAddr::V4(Ipv4Addr::LOCALHOST),
            port: DEFAULT_PORT,
            echo_to_sender: false,
        }
    }
}

impl RelayConfig {
    /// Socket address to bind.
    #[must_use]
    pub fn addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind, self.port)
    }
}

/// Build the relay router.
pub fn router(state: RelayState) -> Router {
    Router::new()
        .route("/health/live", get(health::liveness))
        .route("/health/ready", get(health::readiness))
        .route("/ws", get(websocket_handler))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                .on_request(DefaultOnRequest::new().level(Level::DEBUG))
                .on_response(DefaultOnResponse::new().level(Level::DEBUG)),
        )
        .with_state(state)
}

/// Serve the relay on `listener` until `shutdown` resolves.
///
/// On shutdown every open connection is closed before this returns.
///
/// # Errors
///
/// Returns [`RelayError::Io`] if the server fails.
pub async fn serve<F>(
    listener: TcpListener,
    state: RelayState,
    shutdown: F,
) -> Result<(), RelayError>
where
    F: Future<Output = ()> + Send + 'static,
{
    serve_app(listener, router(state.clone()), state, shutdown).await
}

/// Serve `app` on `listener` until `shutdown` resolves.
///
/// `app` is expected to contain [`router`] for `state`, optionally merged
/// with other routes such as [`metrics::metrics_router`].
///
/// # Errors
///
/// Returns [`RelayError::Io`] if the server fails.
pub async fn serve_app<F>(
    listener: TcpListener,
    app: Router,
    state: RelayState,
    shutdown: F,
) -> Result<(), RelayError>
where
    F: Future<Output = ()> + Send + 'static,
{
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown.await;
            state.shutdown();
        })
        .await?;
    Ok(())
}

#[tracing::instrument(name = "websocket_connect", skip_all)]
async fn websocket_handler(
    ws: WebSocketUpgrade,
    headers: HeaderMap,
    State(state): State<RelayState>,
) -> impl IntoResponse {
    let authenticated = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.starts_with("Bearer "));
    tracing::info!(authenticated, "WebSocket connection upgrade requested");
    ws.on_upgrade(move |socket| handle_relay_socket(socket, state))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_defaults() {
        let config = RelayConfig::try_parse_from(["notesync-relay"]).expect("should parse");
        assert_eq!(config.port, DEFAULT_PORT);
        assert!(!config.echo_to_sender);
        assert_eq!(config.addr(), RelayConfig::default().addr());
    }

    #[test]
    fn test_config_flags() {
        let config = RelayConfig::try_parse_from([
            "notesync-relay",
            "--bind",
            "0.0.0.0",
            "--port",
            "8000",
            "--echo-to-sender",
        ])
        .expect("should parse");
        assert_eq!(config.addr(), "0.0.0.0:8000".parse().expect("addr"));
        assert!(config.echo_to_sender);
    }
}
