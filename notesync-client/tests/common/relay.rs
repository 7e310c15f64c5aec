//! Relay harness that can be stopped and restarted on the same port.

use std::net::SocketAddr;
use std::time::Duration;

use notesync_relay::{serve, RelayState};
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

/// A running relay.
pub struct RelayHarness {
    port: u16,
    state: RelayState,
    shutdown_tx: Option<oneshot::Sender<()>>,
    handle: JoinHandle<()>,
}

impl RelayHarness {
    /// Start a relay on a random available port.
    pub async fn start() -> Self {
        let port = portpicker::pick_unused_port().expect("no available port");
        Self::start_on(port).await
    }

    /// Start a relay that reflects document updates back to their sender.
    pub async fn start_with_echo() -> Self {
        let port = portpicker::pick_unused_port().expect("no available port");
        Self::start_on_with(port, RelayState::new(true)).await
    }

    /// Start a relay on `port`.
    pub async fn start_on(port: u16) -> Self {
        Self::start_on_with(port, RelayState::default()).await
    }

    async fn start_on_with(port: u16, state: RelayState) -> Self {
        let addr = SocketAddr::from(([127, 0, 0, 1], port));
        let listener = TcpListener::bind(addr).await.expect("failed to bind");

        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let server = tokio::spawn(serve(listener, state.clone(), async {
            let _ = shutdown_rx.await;
        }));
        let handle = tokio::spawn(async move {
            server.await.expect("relay task").expect("relay error");
        });

        Self {
            port,
            state,
            shutdown_tx: Some(shutdown_tx),
            handle,
        }
    }

    /// WebSocket URL of the relay.
    pub fn ws_url(&self) -> String {
        format!("ws://127.0.0.1:{}/ws", self.port)
    }

    /// Listening port.
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Relay state for assertions.
    pub fn state(&self) -> &RelayState {
        &self.state
    }

    /// Stop the relay and wait for the listener to be released.
    pub async fn stop(mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        let _ = tokio::time::timeout(Duration::from_secs(5), self.handle).await;
    }
}
