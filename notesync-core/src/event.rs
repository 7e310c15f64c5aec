//! # Wire events
//!
//! Room-scoped events exchanged with the collaboration server as JSON text
//! frames of the form `{"event": "<name>", "data": {...}}`.
//!
//! - `{"event": "text:update", "data": {"documentId", "content", "originatorSessionId", "timestamp"}}`
//! - `{"event": "scene:update", "data": {"documentId", "scene", "originatorSessionId", "timestamp"}}`
//! - `{"event": "presence:status", "data": {"status": "online"|"offline", "timestamp"}}`
//! - `{"event": "room:join", "data": {"roomId"}}`
//! - `{"event": "room:leave", "data": {"roomId"}}`

use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{Digest, SceneSnapshot, SyncError, SyncResult};

/// Identity of one collaboration session (one client connection).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(Uuid);

impl SessionId {
    /// Generate a fresh session ID.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identity of a document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DocumentId(Uuid);

impl DocumentId {
    /// Generate a fresh document ID.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// The room that carries this document's updates.
    #[must_use]
    pub fn room(&self) -> String {
        self.0.to_string()
    }

    /// Parse a document ID from its string form.
    ///
    /// # Errors
    ///
    /// Returns an error if `s` is not a valid UUID.
    pub fn parse(s: &str) -> Result<Self, uuid::Error> {
        Uuid::parse_str(s).map(Self)
    }
}

impl Default for DocumentId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for DocumentId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Prose content update.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TextUpdate {
    /// Target document.
    pub document_id: DocumentId,
    /// Full note content.
    pub content: String,
    /// Session that broadcast the update.
    pub originator_session_id: SessionId,
    /// Milliseconds since epoch at emission.
    pub timestamp: u64,
}

impl TextUpdate {
    /// Digest of the carried content.
    #[must_use]
    pub fn digest(&self) -> Digest {
        Digest::of_text(&self.content)
    }
}

/// Whole-scene update.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SceneUpdate {
    /// Target document.
    pub document_id: DocumentId,
    /// Full scene state.
    pub scene: SceneSnapshot,
    /// Session that broadcast the update.
    pub originator_session_id: SessionId,
    /// Milliseconds since epoch at emission.
    pub timestamp: u64,
}

/// Online/offline presence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Presence {
    /// Session connected.
    Online,
    /// Session leaving.
    Offline,
}

/// Presence announcement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PresenceStatus {
    /// Current presence.
    pub status: Presence,
    /// Milliseconds since epoch.
    pub timestamp: u64,
}

/// Room membership change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomRef {
    /// Room identifier.
    pub room_id: String,
}

/// Event kinds handlers can subscribe to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// `text:update`
    TextUpdate,
    /// `scene:update`
    SceneUpdate,
    /// `presence:status`
    PresenceStatus,
    /// `room:join`
    RoomJoin,
    /// `room:leave`
    RoomLeave,
}

impl EventKind {
    /// Wire name of this kind.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::TextUpdate => "text:update",
            Self::SceneUpdate => "scene:update",
            Self::PresenceStatus => "presence:status",
            Self::RoomJoin => "room:join",
            Self::RoomLeave => "room:leave",
        }
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single wire frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum WireEvent {
    /// Prose content changed.
    #[serde(rename = "text:update")]
    TextUpdate(TextUpdate),
    /// Scene changed.
    #[serde(rename = "scene:update")]
    SceneUpdate(SceneUpdate),
    /// Presence changed.
    #[serde(rename = "presence:status")]
    PresenceStatus(PresenceStatus),
    /// Join a room.
    #[serde(rename = "room:join")]
    RoomJoin(RoomRef),
    /// Leave a room.
    #[serde(rename = "room:leave")]
    RoomLeave(RoomRef),
}

impl WireEvent {
    /// The kind of this event.
    #[must_use]
    pub const fn kind(&self) -> EventKind {
        match self {
            Self::TextUpdate(_) => EventKind::TextUpdate,
            Self::SceneUpdate(_) => EventKind::SceneUpdate,
            Self::PresenceStatus(_) => EventKind::PresenceStatus,
            Self::RoomJoin(_) => EventKind::RoomJoin,
            Self::RoomLeave(_) => EventKind::RoomLeave,
        }
    }

    /// The document an update targets, if it is a document update.
    #[must_use]
    pub const fn document_id(&self) -> Option<DocumentId> {
        match self {
            Self::TextUpdate(update) => Some(update.document_id),
            Self::SceneUpdate(update) => Some(update.document_id),
            _ => None,
        }
    }

    /// Build a `room:join` event.
    pub fn join(room_id: impl Into<String>) -> Self {
        Self::RoomJoin(RoomRef {
            room_id: room_id.into(),
        })
    }

    /// Build a `room:leave` event.
    pub fn leave(room_id: impl Into<String>) -> Self {
        Self::RoomLeave(RoomRef {
            room_id: room_id.into(),
        })
    }

    /// Build a `presence:status` event stamped now.
    #[must_use]
    pub fn presence(status: Presence) -> Self {
        Self::PresenceStatus(PresenceStatus {
            status,
            timestamp: current_timestamp(),
        })
    }

    /// Serialize to a JSON text frame.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Serialization`] if serialization fails.
    pub fn encode(&self) -> SyncResult<String> {
        serde_json::to_string(self).map_err(SyncError::Serialization)
    }

    /// Parse a JSON text frame.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::MalformedPayload`] if the frame is not a valid event.
    pub fn decode(frame: &str) -> SyncResult<Self> {
        serde_json::from_str(frame).map_err(|e| SyncError::MalformedPayload(e.to_string()))
    }
}

/// Sink for outbound events.
///
/// Implementations must not block and must never fail: an event that cannot
/// be delivered right now is dropped, and local state stays authoritative.
pub trait Broadcaster {
    /// Send `event` to the event's room.
    fn broadcast(&self, event: WireEvent);
}

/// Get the current Unix timestamp in milliseconds.
#[allow(clippy::cast_possible_truncation)]
#[must_use]
pub fn current_timestamp() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
