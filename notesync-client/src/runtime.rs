//! # Editor runtime
//!
//! Runs one [`DocumentEditor`] on its own tokio task. The task owns every
//! piece of editor state and reacts to three sources:
//!
//! ```text
//!  transport handlers ──► inbox ────┐
//!  EditorHandle ────────► commands ─┼──► select! ──► DocumentEditor
//!  debounce deadline ──► sleep_until┘        │
//!                                            └──► writer task ──► DocumentStore
//! ```
//!
//! Store writes go through a separate writer task so a slow store never
//! delays local edits or remote applies.

use std::sync::Arc;

use notesync_core::{
    DocumentId, DocumentPatch, DocumentStore, EventKind, ReentrancyGuard, Scene, SceneOutcome,
    SceneSurface, StoreError, TextOutcome, WireEvent,
};
use tokio::sync::{broadcast, mpsc, oneshot, watch};

use crate::editor::{DocumentEditor, EditorError, EditorOptions, PendingWrites, Routed};
use crate::transport::{HandlerId, TransportSession};

const NOTICE_CAPACITY: usize = 64;

/// Undo/redo availability.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct HistoryState {
    /// An earlier entry exists.
    pub can_undo: bool,
    /// A later entry exists.
    pub can_redo: bool,
}

/// Out-of-band events for the UI.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notice {
    /// A debounced store write failed. Local state is kept.
    PersistenceFailed {
        /// Document that failed to save.
        document_id: DocumentId,
        /// Store error message.
        error: String,
    },
    /// A remote payload could not be applied.
    MalformedPayload {
        /// Kind of the dropped event.
        kind: EventKind,
    },
    /// A remote update replaced local state.
    RemoteApplied {
        /// Kind of the applied event.
        kind: EventKind,
    },
}

/// Read-only view of the editor state.
#[derive(Debug, Clone, PartialEq)]
pub struct EditorView {
    /// Prose buffer.
    pub text: String,
    /// Cursor as a character offset.
    pub cursor: usize,
    /// Scene.
    pub scene: Scene,
}

type Reply<T> = oneshot::Sender<Result<T, EditorError>>;
type SceneEdit = Box<dyn FnOnce(&mut Scene) + Send>;

enum Command {
    TextChange {
        text: String,
        cursor: usize,
        reply: Reply<()>,
    },
    Insert {
        text: String,
        reply: Reply<()>,
    },
    SceneMutation {
        scene: Scene,
        reply: Option<Reply<bool>>,
    },
    EditScene {
        edit: SceneEdit,
        reply: Reply<bool>,
    },
    Undo {
        reply: Reply<bool>,
    },
    Redo {
        reply: Reply<bool>,
    },
    SetFocused {
        focused: bool,
        reply: Reply<()>,
    },
    Save {
        reply: Reply<()>,
    },
    View {
        reply: Reply<EditorView>,
    },
    Close {
        reply: oneshot::Sender<()>,
    },
}

struct WriteJob {
    patch: DocumentPatch,
    immediate: bool,
    reply: Option<oneshot::Sender<Result<(), StoreError>>>,
}

/// Task state for one open document.
pub struct EditorRuntime {
    editor: DocumentEditor,
    transport: TransportSession,
    handlers: Vec<(EventKind, HandlerId)>,
    inbox: mpsc::UnboundedReceiver<WireEvent>,
    commands: mpsc::UnboundedReceiver<Command>,
    writer: mpsc::UnboundedSender<WriteJob>,
    history_tx: watch::Sender<HistoryState>,
    notices_tx: broadcast::Sender<Notice>,
}

impl EditorRuntime {
    /// Open `document_id`: fetch it, join its room and start the editor task.
    ///
    /// # Errors
    ///
    /// Returns an error if the document cannot be fetched or its scene
    /// cannot be loaded.
    pub async fn open(
        transport: TransportSession,
        store: Arc<dyn DocumentStore>,
        document_id: DocumentId,
        options: EditorOptions,
        surface: Box<dyn SceneSurface>,
    ) -> Result<EditorHandle, EditorError> {
        let document = store.fetch(document_id).await?;
        let editor = DocumentEditor::new(&document, transport.session_id(), &options, surface)?;
        let guards = editor.guards();

        let (inbox_tx, inbox) = mpsc::unbounded_channel();
        let handlers = [EventKind::TextUpdate, EventKind::SceneUpdate]
            .into_iter()
            .map(|kind| {
                let inbox_tx = inbox_tx.clone();
                let id = transport.on(kind, move |event: &WireEvent| {
                    if event.document_id() == Some(document_id) {
                        let _ = inbox_tx.send(event.clone());
                    }
                });
                (kind, id)
            })
            .collect();
        transport.join_room(document_id.room());

        let (commands_tx, commands) = mpsc::unbounded_channel();
        let (history_tx, history_rx) = watch::channel(HistoryState {
            can_undo: editor.can_undo(),
            can_redo: editor.can_redo(),
        });
        let (notices_tx, _) = broadcast::channel(NOTICE_CAPACITY);
        let writer = spawn_writer(store, document_id, notices_tx.clone());

        let runtime = Self {
            editor,
            transport,
            handlers,
            inbox,
            commands,
            writer,
            history_tx,
            notices_tx: notices_tx.clone(),
        };
        tokio::spawn(runtime.run());

        tracing::info!(%document_id, "Editor runtime started");
        Ok(EditorHandle {
            document_id,
            can_edit: options.can_edit,
            commands: commands_tx,
            history_rx,
            notices_tx,
            guards,
        })
    }

    async fn run(mut self) {
        loop {
            let deadline = self.editor.next_deadline();
            tokio::select! {
                Some(event) = self.inbox.recv() => self.on_remote(&event),

                command = self.commands.recv() => match command {
                    Some(Command::Close { reply }) => {
                        self.shutdown();
                        let _ = reply.send(());
                        return;
                    }
                    Some(command) => self.on_command(command),
                    None => {
                        self.shutdown();
                        return;
                    }
                },

                () = sleep_until(deadline) => {
                    let writes = self.editor.poll(now(), &self.transport);
                    self.persist(writes);
                }
            }
            self.publish_history();
        }
    }

    fn on_remote(&mut self, event: &WireEvent) {
        let kind = event.kind();
        let notice = match self.editor.route(event) {
            Routed::Scene(SceneOutcome::Applied) | Routed::Text(TextOutcome::Replaced { .. }) => {
                Some(Notice::RemoteApplied { kind })
            }
            Routed::Scene(SceneOutcome::Malformed) => Some(Notice::MalformedPayload { kind }),
            Routed::Text(TextOutcome::Deferred) => {
                tracing::debug!(
                    document_id = %self.editor.document_id(),
                    "Remote text deferred while typing"
                );
                None
            }
            _ => None,
        };
        if let Some(notice) = notice {
            let _ = self.notices_tx.send(notice);
        }
    }

    fn on_command(&mut self, command: Command) {
        let now = now();
        match command {
            Command::TextChange {
                text,
                cursor,
                reply,
            } => {
                let _ = reply.send(self.editor.local_text_change(text, cursor, now));
            }
            Command::Insert { text, reply } => {
                let _ = reply.send(self.editor.insert_at_cursor(&text, now));
            }
            Command::SceneMutation { scene, reply } => {
                let result = self.editor.local_scene_mutation(scene, now);
                match reply {
                    Some(reply) => {
                        let _ = reply.send(result);
                    }
                    None => {
                        if let Err(e) = result {
                            tracing::warn!(
                                document_id = %self.editor.document_id(),
                                "Surface mutation rejected: {}",
                                e
                            );
                        }
                    }
                }
            }
            Command::EditScene { edit, reply } => {
                let _ = reply.send(self.editor.edit_scene(edit, now));
            }
            Command::Undo { reply } => {
                let _ = reply.send(Ok(self.editor.undo()));
            }
            Command::Redo { reply } => {
                let _ = reply.send(Ok(self.editor.redo()));
            }
            Command::SetFocused { focused, reply } => {
                self.editor.set_focused(focused);
                let _ = reply.send(Ok(()));
            }
            Command::Save { reply } => self.save(reply),
            Command::View { reply } => {
                let _ = reply.send(Ok(EditorView {
                    text: self.editor.text().to_string(),
                    cursor: self.editor.cursor(),
                    scene: self.editor.scene().clone(),
                }));
            }
            Command::Close { reply } => {
                let _ = reply.send(());
            }
        }
    }

    fn save(&mut self, reply: Reply<()>) {
        // Pending edits go out to the room before the write.
        self.editor.flush(&self.transport);
        let patch = match self.editor.full_patch() {
            Ok(patch) => patch,
            Err(e) => {
                let _ = reply.send(Err(e));
                return;
            }
        };
        let (done_tx, done_rx) = oneshot::channel();
        let job = WriteJob {
            patch,
            immediate: true,
            reply: Some(done_tx),
        };
        if self.writer.send(job).is_err() {
            let _ = reply.send(Err(EditorError::Closed));
            return;
        }
        tokio::spawn(async move {
            let result = match done_rx.await {
                Ok(result) => result.map_err(EditorError::from),
                Err(_) => Err(EditorError::Closed),
            };
            let _ = reply.send(result);
        });
    }

    fn persist(&self, writes: PendingWrites) {
        if writes.is_empty() {
            return;
        }
        let job = WriteJob {
            patch: writes.into_patch(),
            immediate: false,
            reply: None,
        };
        if self.writer.send(job).is_err() {
            tracing::warn!(document_id = %self.editor.document_id(), "Writer stopped, dropping write");
        }
    }

    fn publish_history(&self) {
        let state = HistoryState {
            can_undo: self.editor.can_undo(),
            can_redo: self.editor.can_redo(),
        };
        self.history_tx.send_if_modified(|current| {
            let changed = *current != state;
            *current = state;
            changed
        });
    }

    fn shutdown(&mut self) {
        self.editor.cancel_pending();
        for (kind, id) in self.handlers.drain(..) {
            self.transport.off(kind, id);
        }
        let document_id = self.editor.document_id();
        self.transport.leave_room(document_id.room());
        tracing::info!(%document_id, "Editor runtime stopped");
    }
}

/// Caller-facing handle on an open document.
///
/// Cloneable. The editor closes when [`close`](Self::close) is called or
/// every handle is dropped.
#[derive(Clone)]
pub struct EditorHandle {
    document_id: DocumentId,
    can_edit: bool,
    commands: mpsc::UnboundedSender<Command>,
    history_rx: watch::Receiver<HistoryState>,
    notices_tx: broadcast::Sender<Notice>,
    guards: [ReentrancyGuard; 2],
}

impl std::fmt::Debug for EditorHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EditorHandle")
            .field("document_id", &self.document_id)
            .field("can_edit", &self.can_edit)
            .field("closed", &self.commands.is_closed())
            .finish_non_exhaustive()
    }
}

impl EditorHandle {
    async fn request<T>(
        &self,
        build: impl FnOnce(Reply<T>) -> Command,
    ) -> Result<T, EditorError> {
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(build(reply))
            .map_err(|_| EditorError::Closed)?;
        rx.await.map_err(|_| EditorError::Closed)?
    }

    /// Replace the prose buffer with local input.
    ///
    /// # Errors
    ///
    /// Returns [`EditorError::ReadOnly`] without edit rights, or
    /// [`EditorError::Closed`] after close.
    pub async fn local_text_change(
        &self,
        text: impl Into<String>,
        cursor: usize,
    ) -> Result<(), EditorError> {
        let text = text.into();
        self.request(|reply| Command::TextChange {
            text,
            cursor,
            reply,
        })
        .await
    }

    /// Insert text at the cursor.
    ///
    /// # Errors
    ///
    /// Same as [`local_text_change`](Self::local_text_change).
    pub async fn insert_at_cursor(&self, text: impl Into<String>) -> Result<(), EditorError> {
        let text = text.into();
        self.request(|reply| Command::Insert { text, reply }).await
    }

    /// Record the surface's new scene after a local mutation.
    ///
    /// Resolves to `false` if the mutation was dropped because a load was in
    /// progress.
    ///
    /// # Errors
    ///
    /// Same as [`local_text_change`](Self::local_text_change).
    pub async fn local_scene_mutation(&self, scene: Scene) -> Result<bool, EditorError> {
        if self.is_loading() {
            return Ok(false);
        }
        self.request(|reply| Command::SceneMutation {
            scene,
            reply: Some(reply),
        })
        .await
    }

    /// Report a mutation from inside a surface callback.
    ///
    /// Non-blocking. Returns `false` if the report was dropped, either
    /// because a remote or undo/redo load is rendering or the editor is
    /// closed.
    pub fn report_scene_mutation(&self, scene: Scene) -> bool {
        if !self.can_edit || self.is_loading() {
            return false;
        }
        self.commands
            .send(Command::SceneMutation { scene, reply: None })
            .is_ok()
    }

    /// Apply `edit` to the current scene as a local mutation.
    ///
    /// # Errors
    ///
    /// Same as [`local_text_change`](Self::local_text_change).
    pub async fn edit_scene<F>(&self, edit: F) -> Result<bool, EditorError>
    where
        F: FnOnce(&mut Scene) + Send + 'static,
    {
        self.request(|reply| Command::EditScene {
            edit: Box::new(edit),
            reply,
        })
        .await
    }

    /// Step back in history. Resolves to whether anything was undone.
    ///
    /// # Errors
    ///
    /// Returns [`EditorError::Closed`] after close.
    pub async fn undo(&self) -> Result<bool, EditorError> {
        self.request(|reply| Command::Undo { reply }).await
    }

    /// Step forward in history. Resolves to whether anything was redone.
    ///
    /// # Errors
    ///
    /// Returns [`EditorError::Closed`] after close.
    pub async fn redo(&self) -> Result<bool, EditorError> {
        self.request(|reply| Command::Redo { reply }).await
    }

    /// Whether an earlier history entry exists.
    #[must_use]
    pub fn can_undo(&self) -> bool {
        self.history_rx.borrow().can_undo
    }

    /// Whether a later history entry exists.
    #[must_use]
    pub fn can_redo(&self) -> bool {
        self.history_rx.borrow().can_redo
    }

    /// Watch undo/redo availability.
    #[must_use]
    pub fn subscribe_history(&self) -> watch::Receiver<HistoryState> {
        self.history_rx.clone()
    }

    /// Subscribe to notices.
    #[must_use]
    pub fn notices(&self) -> broadcast::Receiver<Notice> {
        self.notices_tx.subscribe()
    }

    /// Set whether the text surface has focus.
    ///
    /// # Errors
    ///
    /// Returns [`EditorError::Closed`] after close.
    pub async fn set_focused(&self, focused: bool) -> Result<(), EditorError> {
        self.request(|reply| Command::SetFocused { focused, reply })
            .await
    }

    /// Broadcast pending edits and write the full state through to the store.
    ///
    /// # Errors
    ///
    /// Returns [`EditorError::Store`] if the write fails.
    pub async fn save(&self) -> Result<(), EditorError> {
        self.request(|reply| Command::Save { reply }).await
    }

    /// Current editor state.
    ///
    /// # Errors
    ///
    /// Returns [`EditorError::Closed`] after close.
    pub async fn view(&self) -> Result<EditorView, EditorError> {
        self.request(|reply| Command::View { reply }).await
    }

    /// Cancel pending debounces, leave the room and stop the task.
    pub async fn close(&self) {
        let (reply, rx) = oneshot::channel();
        if self.commands.send(Command::Close { reply }).is_ok() {
            let _ = rx.await;
        }
    }

    /// Whether the editor task has stopped.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.commands.is_closed()
    }

    /// Document being edited.
    #[must_use]
    pub const fn document_id(&self) -> DocumentId {
        self.document_id
    }

    /// Whether local edits are accepted.
    #[must_use]
    pub const fn can_edit(&self) -> bool {
        self.can_edit
    }

    fn is_loading(&self) -> bool {
        self.guards.iter().any(ReentrancyGuard::is_active)
    }
}

fn spawn_writer(
    store: Arc<dyn DocumentStore>,
    document_id: DocumentId,
    notices_tx: broadcast::Sender<Notice>,
) -> mpsc::UnboundedSender<WriteJob> {
    let (tx, mut rx) = mpsc::unbounded_channel::<WriteJob>();
    tokio::spawn(async move {
        while let Some(job) = rx.recv().await {
            let result = store.update(document_id, job.patch, job.immediate).await;
            match job.reply {
                Some(reply) => {
                    let _ = reply.send(result);
                }
                None => {
                    if let Err(e) = result {
                        tracing::warn!(%document_id, "Debounced write failed: {}", e);
                        let _ = notices_tx.send(Notice::PersistenceFailed {
                            document_id,
                            error: e.to_string(),
                        });
                    }
                }
            }
        }
    });
    tx
}

fn now() -> std::time::Instant {
    tokio::time::Instant::now().into_std()
}

async fn sleep_until(deadline: Option<std::time::Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(tokio::time::Instant::from_std(deadline)).await,
        None => std::future::pending().await,
    }
}
