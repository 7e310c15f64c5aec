//! # Notesync Core
//!
//! Synchronization engines for collaborative notes with prose content and a
//! drawable scene.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────┐
//! │                notesync-core                │
//! ├─────────────────────────────────────────────┤
//! │  Scene Model     │  Engines                 │
//! │  - Elements      │  - Scene sync (LWW)      │
//! │  - Snapshots     │  - Text reconciliation   │
//! │  - Digests       │  - Undo/redo history     │
//! ├─────────────────────────────────────────────┤
//! │  Wire Events     │  Document Store          │
//! │  - JSON frames   │  - fetch/create/update   │
//! │  - Broadcaster   │  - Debounced writes      │
//! └─────────────────────────────────────────────┘
//! ```
//!
//! Engines are plain state machines driven by explicit [`std::time::Instant`]
//! values; `notesync-client` wires them to a transport and a tokio task.

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![deny(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod config;
pub mod debounce;
pub mod digest;
pub mod document;
pub mod element;
pub mod error;
pub mod event;
pub mod history;
pub mod scene;
pub mod scene_sync;
pub mod schema;
pub mod snapshot;
pub mod text;

pub use config::{
    BackoffConfig, SyncConfig, DEFAULT_HISTORY_CAPACITY, DEFAULT_SCENE_DEBOUNCE_MS,
    DEFAULT_STRUCTURAL_LINE_THRESHOLD, DEFAULT_TEXT_DEBOUNCE_MS,
};
pub use debounce::{Debouncer, EchoGuard, GuardScope, ReentrancyGuard};
pub use digest::Digest;
pub use document::{
    Document, DocumentPatch, DocumentStore, InMemoryDocumentStore, Role, Share, StoreError,
};
pub use element::{Element, ElementId, ElementKind, Point, Style, Transform};
pub use error::{SyncError, SyncResult};
pub use event::{
    current_timestamp, Broadcaster, DocumentId, EventKind, Presence, PresenceStatus, RoomRef,
    SceneUpdate, SessionId, TextUpdate, WireEvent,
};
pub use history::HistoryManager;
pub use scene::Scene;
pub use scene_sync::{SceneOutcome, SceneSurface, SceneSync};
pub use schema::{ElementDocument, SceneDocument};
pub use snapshot::SceneSnapshot;
pub use text::{remap_cursor, PendingWrite, TextOutcome, TextReconciler};

/// Notesync core version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
