//! Health check endpoints for container probes.
//!
//! - `/health/live` - Liveness probe (restart if fails)
//! - `/health/ready` - Readiness probe (remove from LB if fails)

use axum::{extract::State, http::StatusCode, Json};
use serde::Serialize;

use crate::RelayState;

/// Health status response.
#[derive(Debug, Serialize)]
pub struct HealthStatus {
    /// Overall status: "healthy" or "unhealthy"
    pub status: &'static str,
    /// Relay version
    pub version: &'static str,
    /// Connected peers
    pub peers: usize,
    /// Whether the relay accepts new connections
    pub accepting: bool,
}

/// Liveness probe - is the process running?
#[tracing::instrument(name = "liveness_probe")]
pub async fn liveness() -> StatusCode {
    StatusCode::OK
}

/// Readiness probe - is the relay accepting connections?
///
/// Reports unavailable once shutdown has begun.
#[tracing::instrument(name = "readiness_probe", skip(state))]
pub async fn readiness(State(state): State<RelayState>) -> (StatusCode, Json<HealthStatus>) {
    let accepting = !state.is_shutting_down();
    let status = HealthStatus {
        status: if accepting { "healthy" } else { "unhealthy" },
        version: env!("CARGO_PKG_VERSION"),
        peers: state.peer_count(),
        accepting,
    };
    let code = if accepting {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (code, Json(status))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_readiness_tracks_shutdown() {
        let state = RelayState::default();
        let (code, Json(status)) = readiness(State(state.clone())).await;
        assert_eq!(code, StatusCode::OK);
        assert_eq!(status.status, "healthy");
        assert_eq!(status.peers, 0);

        state.shutdown();
        let (code, Json(status)) = readiness(State(state)).await;
        assert_eq!(code, StatusCode::SERVICE_UNAVAILABLE);
        assert!(!status.accepting);
    }

    #[test]
    fn test_health_status_serialization() {
        let status = HealthStatus {
            status: "healthy",
            version: "0.2.0",
            peers: 3,
            accepting: true,
        };
        let json = serde_json::to_string(&status).expect("should serialize");
        assert!(json.contains("healthy"));
        assert!(json.contains("\"peers\":3"));
    }
}
