//! Prometheus metrics for the relay.
//!
//! Provides metrics collection and a Prometheus-compatible `/metrics` endpoint.

use axum::{extract::State, response::IntoResponse, routing::get, Router};
use metrics::{counter, gauge};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};

use notesync_core::EventKind;

const PEERS_ACTIVE: &str = "notesync_relay_peers_active";
const FRAMES_RELAYED_TOTAL: &str = "notesync_relay_frames_relayed_total";
const FRAMES_DROPPED_TOTAL: &str = "notesync_relay_frames_dropped_total";

/// Why an inbound frame was not relayed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    /// The frame did not decode as a wire event.
    Malformed,
    /// The sender is not in the target room.
    NotMember,
}

impl DropReason {
    const fn as_str(self) -> &'static str {
        match self {
            Self::Malformed => "malformed",
            Self::NotMember => "not_member",
        }
    }
}

/// Install the global Prometheus recorder and return its handle.
///
/// # Errors
///
/// Returns an error if the Prometheus recorder cannot be installed
/// (e.g., if another recorder is already installed).
pub fn init_metrics() -> Result<PrometheusHandle, BuildError> {
    PrometheusBuilder::new().install_recorder()
}

/// Router serving `GET /metrics` from `handle`.
#[must_use]
pub fn metrics_router(handle: PrometheusHandle) -> Router {
    Router::new()
        .route("/metrics", get(metrics_handler))
        .with_state(handle)
}

#[tracing::instrument(name = "metrics", skip(handle))]
async fn metrics_handler(State(handle): State<PrometheusHandle>) -> impl IntoResponse {
    handle.render()
}

/// Increment active peers.
pub fn inc_peers() {
    gauge!(PEERS_ACTIVE).increment(1.0);
}

/// Decrement active peers.
pub fn dec_peers() {
    gauge!(PEERS_ACTIVE).decrement(1.0);
}

/// Record a frame forwarded to `delivered` peers.
pub fn record_relayed(kind: EventKind, delivered: usize) {
    counter!(FRAMES_RELAYED_TOTAL, "kind" => kind.as_str()).increment(1);
    tracing::trace!(%kind, delivered, "Recorded relayed frame");
}

/// Record a dropped inbound frame.
pub fn record_dropped(reason: DropReason) {
    counter!(FRAMES_DROPPED_TOTAL, "reason" => reason.as_str()).increment(1);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_render() {
        let recorder = PrometheusBuilder::new().build_recorder();
        let handle = recorder.handle();

        metrics::with_local_recorder(&recorder, || {
            inc_peers();
            inc_peers();
            dec_peers();
            record_relayed(EventKind::SceneUpdate, 3);
            record_dropped(DropReason::Malformed);
        });

        let rendered = handle.render();
        assert!(rendered.contains("notesync_relay_peers_active 1"));
        assert!(rendered.contains(r#"notesync_relay_frames_relayed_total{kind="scene:update"} 1"#));
        assert!(rendered.contains(r#"notesync_relay_frames_dropped_total{reason="malformed"} 1"#));
    }
}
