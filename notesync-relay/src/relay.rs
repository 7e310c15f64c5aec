//! Room registry and WebSocket connection handling.
//!
//! Every connection is a peer. Peers join rooms with `room:join`; document
//! updates are forwarded verbatim to the members of the room named by their
//! `documentId`, and presence goes to every room the sender has joined.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock};

use axum::extract::ws::{Message, WebSocket};
use futures::{SinkExt, StreamExt};
use notesync_core::WireEvent;
use tokio::sync::{mpsc, watch};
use uuid::Uuid;

use crate::metrics::{self, DropReason};

/// A connected peer.
#[derive(Debug)]
struct PeerInfo {
    /// Outbound frames for this peer's socket.
    sender: mpsc::UnboundedSender<String>,
    /// Rooms this peer has joined.
    rooms: HashSet<String>,
}

/// Shared relay state.
#[derive(Debug, Clone)]
pub struct RelayState {
    peers: Arc<RwLock<HashMap<String, PeerInfo>>>,
    echo_to_sender: bool,
    shutdown_tx: Arc<watch::Sender<bool>>,
}

impl Default for RelayState {
    fn default() -> Self {
        Self::new(false)
    }
}

impl RelayState {
    /// Create an empty relay.
    ///
    /// With `echo_to_sender`, document updates are also reflected back to the
    /// peer that sent them.
    #[must_use]
    pub fn new(echo_to_sender: bool) -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            peers: Arc::new(RwLock::new(HashMap::new())),
            echo_to_sender,
            shutdown_tx: Arc::new(shutdown_tx),
        }
    }

    /// Whether updates are reflected back to their sender.
    #[must_use]
    pub const fn echo_to_sender(&self) -> bool {
        self.echo_to_sender
    }

    /// Register a peer and return its outbound frame receiver.
    pub fn register_peer(&self, peer_id: &str) -> mpsc::UnboundedReceiver<String> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut peers = self
            .peers
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        peers.insert(
            peer_id.to_string(),
            PeerInfo {
                sender: tx,
                rooms: HashSet::new(),
            },
        );
        tracing::info!(peer_id, "Registered peer");
        metrics::inc_peers();
        rx
    }

    /// Remove a peer and all of its room memberships.
    pub fn unregister_peer(&self, peer_id: &str) {
        let removed = self
            .peers
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .remove(peer_id);
        if let Some(info) = removed {
            metrics::dec_peers();
            tracing::info!(peer_id, rooms = info.rooms.len(), "Unregistered peer");
        }
    }

    /// Add `peer_id` to `room`. Returns `false` for unknown peers.
    pub fn join_room(&self, peer_id: &str, room: &str) -> bool {
        let mut peers = self
            .peers
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        let Some(info) = peers.get_mut(peer_id) else {
            return false;
        };
        if info.rooms.insert(room.to_string()) {
            tracing::debug!(peer_id, room, "Peer joined room");
        }
        true
    }

    /// Remove `peer_id` from `room`. Returns whether it was a member.
    pub fn leave_room(&self, peer_id: &str, room: &str) -> bool {
        let mut peers = self
            .peers
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        let left = peers
            .get_mut(peer_id)
            .is_some_and(|info| info.rooms.remove(room));
        if left {
            tracing::debug!(peer_id, room, "Peer left room");
        }
        left
    }

    /// Whether `peer_id` has joined `room`.
    #[must_use]
    pub fn is_member(&self, peer_id: &str, room: &str) -> bool {
        self.peers
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .get(peer_id)
            .is_some_and(|info| info.rooms.contains(room))
    }

    /// Rooms `peer_id` has joined.
    #[must_use]
    pub fn rooms_of(&self, peer_id: &str) -> Vec<String> {
        let peers = self
            .peers
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        peers
            .get(peer_id)
            .map(|info| info.rooms.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Number of peers in `room`.
    #[must_use]
    pub fn room_size(&self, room: &str) -> usize {
        let peers = self
            .peers
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        peers.values().filter(|info| info.rooms.contains(room)).count()
    }

    /// Number of connected peers.
    #[must_use]
    pub fn peer_count(&self) -> usize {
        self.peers
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .len()
    }

    /// Forward `frame` to every peer in any of `rooms`, once per peer.
    ///
    /// Returns the number of peers the frame was queued for.
    fn relay_to_rooms(
        &self,
        from: &str,
        rooms: &[String],
        frame: &str,
        include_sender: bool,
    ) -> usize {
        let peers = self
            .peers
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        peers
            .iter()
            .filter(|(id, _)| include_sender || id.as_str() != from)
            .filter(|(_, info)| rooms.iter().any(|room| info.rooms.contains(room)))
            .filter(|(_, info)| info.sender.send(frame.to_string()).is_ok())
            .count()
    }

    /// Process one inbound text frame from `peer_id`.
    pub fn route_frame(&self, peer_id: &str, frame: &str) {
        let event = match WireEvent::decode(frame) {
            Ok(event) => event,
            Err(e) => {
                tracing::warn!(peer_id, "Dropping malformed frame: {e}");
                metrics::record_dropped(DropReason::Malformed);
                return;
            }
        };

        match &event {
            WireEvent::RoomJoin(room) => {
                self.join_room(peer_id, &room.room_id);
            }
            WireEvent::RoomLeave(room) => {
                self.leave_room(peer_id, &room.room_id);
            }
            WireEvent::TextUpdate(_) | WireEvent::SceneUpdate(_) => {
                let Some(document_id) = event.document_id() else {
                    return;
                };
                let room = document_id.room();
                if !self.is_member(peer_id, &room) {
                    tracing::debug!(
                        peer_id,
                        %document_id,
                        "Dropping update from peer outside the room"
                    );
                    metrics::record_dropped(DropReason::NotMember);
                    return;
                }
                let delivered = self.relay_to_rooms(peer_id, &[room], frame, self.echo_to_sender);
                metrics::record_relayed(event.kind(), delivered);
                tracing::debug!(
                    peer_id,
                    %document_id,
                    kind = %event.kind(),
                    delivered,
                    "Relayed document update"
                );
            }
            WireEvent::PresenceStatus(presence) => {
                let rooms = self.rooms_of(peer_id);
                let delivered = self.relay_to_rooms(peer_id, &rooms, frame, false);
                tracing::debug!(peer_id, status = ?presence.status, delivered, "Relayed presence");
                metrics::record_relayed(event.kind(), delivered);
            }
        }
    }

    /// Ask every open connection to close.
    pub fn shutdown(&self) {
        self.shutdown_tx.send_replace(true);
        tracing::info!(peers = self.peer_count(), "Relay shutting down");
    }

    /// Whether [`shutdown`](Self::shutdown) was called.
    #[must_use]
    pub fn is_shutting_down(&self) -> bool {
        *self.shutdown_tx.borrow()
    }

    fn subscribe_shutdown(&self) -> watch::Receiver<bool> {
        self.shutdown_tx.subscribe()
    }
}

/// Drive one relay WebSocket connection until it closes.
pub async fn handle_relay_socket(socket: WebSocket, state: RelayState) {
    let (mut sender, mut receiver) = socket.split();

    let peer_id = Uuid::new_v4().to_string();
    let mut peer_rx = state.register_peer(&peer_id);
    let mut shutdown_rx = state.subscribe_shutdown();
    if *shutdown_rx.borrow_and_update() {
        state.unregister_peer(&peer_id);
        return;
    }

    loop {
        tokio::select! {
            msg = receiver.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        tracing::trace!(peer_id = %peer_id, len = text.len(), "Received frame");
                        state.route_frame(&peer_id, text.as_str());
                    }
                    Some(Ok(Message::Close(_))) => {
                        tracing::info!(peer_id = %peer_id, "Peer disconnected");
                        break;
                    }
                    Some(Err(e)) => {
                        tracing::error!(peer_id = %peer_id, "WebSocket error: {}", e);
                        break;
                    }
                    None => break,
                    _ => {}
                }
            }

            outbound = peer_rx.recv() => {
                match outbound {
                    Some(frame) => {
                        if sender.send(Message::Text(frame.into())).await.is_err() {
                            break;
                        }
                    }
                    None => break,
                }
            }

            _ = shutdown_rx.changed() => {
                let _ = sender.send(Message::Close(None)).await;
                break;
            }
        }
    }

    state.unregister_peer(&peer_id);
    tracing::info!(peer_id = %peer_id, "Relay connection closed");
}

#[cfg(test)]
mod tests {
    use super::*;
    use notesync_core::{DocumentId, Presence, SessionId, TextUpdate};

    fn text_frame(document_id: DocumentId, content: &str) -> String {
        WireEvent::TextUpdate(TextUpdate {
            document_id,
            content: content.into(),
            originator_session_id: SessionId::new(),
            timestamp: 1,
        })
        .encode()
        .expect("encode")
    }

    #[test]
    fn test_join_and_leave() {
        let state = RelayState::default();
        let _rx = state.register_peer("a");
        state.route_frame("a", &WireEvent::join("room-1").encode().expect("encode"));
        assert_eq!(state.rooms_of("a"), vec!["room-1".to_string()]);
        assert_eq!(state.room_size("room-1"), 1);

        state.route_frame("a", &WireEvent::leave("room-1").encode().expect("encode"));
        assert!(state.rooms_of("a").is_empty());
        assert!(!state.join_room("missing", "room-1"));
    }

    #[test]
    fn test_update_goes_to_room_members_only() {
        let state = RelayState::default();
        let doc = DocumentId::new();
        let mut a = state.register_peer("a");
        let mut b = state.register_peer("b");
        let mut c = state.register_peer("c");
        state.join_room("a", &doc.room());
        state.join_room("b", &doc.room());
        state.join_room("c", "elsewhere");

        let frame = text_frame(doc, "hi");
        state.route_frame("a", &frame);

        assert_eq!(b.try_recv().expect("b receives"), frame);
        assert!(a.try_recv().is_err(), "sender excluded");
        assert!(c.try_recv().is_err(), "other room excluded");
    }

    #[test]
    fn test_update_from_non_member_is_dropped() {
        let state = RelayState::default();
        let doc = DocumentId::new();
        let _a = state.register_peer("a");
        let mut b = state.register_peer("b");
        state.join_room("b", &doc.room());

        state.route_frame("a", &text_frame(doc, "never joined"));
        assert!(b.try_recv().is_err());

        state.join_room("a", &doc.room());
        state.leave_room("a", &doc.room());
        state.route_frame("a", &text_frame(doc, "already left"));
        assert!(b.try_recv().is_err());
    }

    #[test]
    fn test_echo_to_sender() {
        let state = RelayState::new(true);
        let doc = DocumentId::new();
        let mut a = state.register_peer("a");
        state.join_room("a", &doc.room());

        let frame = text_frame(doc, "hi");
        state.route_frame("a", &frame);
        assert_eq!(a.try_recv().expect("echo"), frame);
    }

    #[test]
    fn test_presence_reaches_each_peer_once() {
        let state = RelayState::default();
        let _a = state.register_peer("a");
        let mut b = state.register_peer("b");
        for room in ["r1", "r2"] {
            state.join_room("a", room);
            state.join_room("b", room);
        }

        let frame = WireEvent::presence(Presence::Online)
            .encode()
            .expect("encode");
        state.route_frame("a", &frame);
        assert_eq!(b.try_recv().expect("presence"), frame);
        assert!(b.try_recv().is_err());
    }

    #[test]
    fn test_malformed_frame_is_dropped() {
        let state = RelayState::default();
        let _a = state.register_peer("a");
        let mut b = state.register_peer("b");
        state.join_room("a", "r");
        state.join_room("b", "r");
        state.route_frame("a", "{not json");
        state.route_frame("a", r#"{"event":"unknown:thing","data":{}}"#);
        assert!(b.try_recv().is_err());
    }

    #[test]
    fn test_unregister_drops_memberships() {
        let state = RelayState::default();
        let _a = state.register_peer("a");
        state.join_room("a", "r");
        state.unregister_peer("a");
        assert_eq!(state.room_size("r"), 0);
        assert_eq!(state.peer_count(), 0);
    }

    #[test]
    fn test_shutdown_flag() {
        let state = RelayState::default();
        assert!(!state.is_shutting_down());
        state.shutdown();
        assert!(state.is_shutting_down());
    }
}
