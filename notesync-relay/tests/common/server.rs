//! Test relay harness for integration tests.
//!
//! Spins up a real relay on a random port.

use std::net::SocketAddr;

use metrics_exporter_prometheus::PrometheusHandle;
use notesync_relay::metrics::metrics_router;
use notesync_relay::{router, serve_app, RelayState};
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

/// A running relay with control handles.
pub struct TestRelay {
    addr: SocketAddr,
    state: RelayState,
    shutdown_tx: Option<oneshot::Sender<()>>,
    handle: JoinHandle<()>,
}

impl TestRelay {
    /// Start a relay on a random available port.
    ///
    /// # Panics
    ///
    /// Panics if no port is available or the relay fails to bind.
    pub async fn start(echo_to_sender: bool) -> Self {
        Self::start_inner(echo_to_sender, None).await
    }

    /// Start a relay that also serves `/metrics` from `handle`.
    #[allow(dead_code)]
    pub async fn start_with_metrics(handle: PrometheusHandle) -> Self {
        Self::start_inner(false, Some(handle)).await
    }

    async fn start_inner(echo_to_sender: bool, metrics: Option<PrometheusHandle>) -> Self {
        let port = portpicker::pick_unused_port().expect("no available port");
        let addr = SocketAddr::from(([127, 0, 0, 1], port));
        let listener = TcpListener::bind(addr).await.expect("failed to bind");
        let state = RelayState::new(echo_to_sender);

        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let mut app = router(state.clone());
        if let Some(handle) = metrics {
            app = app.merge(metrics_router(handle));
        }
        let handle = tokio::spawn(serve_app(listener, app, state.clone(), async {
            let _ = shutdown_rx.await;
        }));
        let handle = tokio::spawn(async move {
            handle.await.expect("relay task").expect("relay error");
        });

        Self {
            addr,
            state,
            shutdown_tx: Some(shutdown_tx),
            handle,
        }
    }

    /// WebSocket URL of the relay.
    pub fn ws_url(&self) -> String {
        format!("ws://{}/ws", self.addr)
    }

    /// Socket address of the relay.
    #[allow(dead_code)]
    pub fn http_addr(&self) -> SocketAddr {
        self.addr
    }

    /// Relay state for assertions.
    pub fn state(&self) -> &RelayState {
        &self.state
    }

    /// Shut the relay down, closing every connection.
    pub async fn shutdown(mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        let _ = tokio::time::timeout(tokio::time::Duration::from_secs(5), self.handle).await;
    }
}
