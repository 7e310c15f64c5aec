//! # Notesync Client
//!
//! Connects the `notesync-core` engines to a relay.
//!
//! - [`TransportSession`]: one WebSocket connection with authenticated
//!   dialing, room membership, handler dispatch and bounded reconnects.
//! - [`DocumentEditor`]: the engines for one open document, bound to a
//!   render surface.
//! - [`EditorRuntime`]: runs an editor on its own task and hands out an
//!   [`EditorHandle`].
//!
//! ```text
//! UI ──► EditorHandle ──► EditorRuntime task ──► TransportSession ──► relay
//!                                │
//!                                └──► DocumentStore
//! ```

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![deny(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod editor;
pub mod runtime;
pub mod transport;

pub use editor::{DocumentEditor, EditorError, EditorOptions, PendingWrites, Routed};
pub use runtime::{EditorHandle, EditorRuntime, EditorView, HistoryState, Notice};
pub use transport::{ConnectionState, Credentials, HandlerId, TransportError, TransportSession};

/// Notesync client version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
