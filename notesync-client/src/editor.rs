//! Per-document editor state.
//!
//! [`DocumentEditor`] ties together the local scene, the text and scene
//! engines, undo/redo history and the rendering surface for one open
//! document. It is synchronous; [`crate::runtime`] drives it from a task.

use std::time::Instant;

use notesync_core::{
    Broadcaster, Document, DocumentId, DocumentPatch, HistoryManager, PendingWrite, Scene,
    SceneOutcome, SceneSnapshot, SceneSurface, SceneSync, SessionId, StoreError, SyncConfig,
    SyncError, TextOutcome, TextReconciler, WireEvent,
};

/// Errors returned by editor operations.
#[derive(Debug, thiserror::Error)]
pub enum EditorError {
    /// The caller may not edit this document.
    #[error("Document is read-only")]
    ReadOnly,
    /// The document store failed.
    #[error("Store error: {0}")]
    Store(#[from] StoreError),
    /// A scene could not be captured or materialized.
    #[error("Sync error: {0}")]
    Sync(#[from] SyncError),
    /// The editor task has stopped.
    #[error("Editor is closed")]
    Closed,
}

/// Options for opening a document.
#[derive(Debug, Clone)]
pub struct EditorOptions {
    /// Engine timings and limits.
    pub config: SyncConfig,
    /// Whether local edits are accepted.
    pub can_edit: bool,
}

impl Default for EditorOptions {
    fn default() -> Self {
        Self {
            config: SyncConfig::default(),
            can_edit: true,
        }
    }
}

impl EditorOptions {
    /// Options for a viewer without edit rights.
    #[must_use]
    pub fn read_only() -> Self {
        Self {
            can_edit: false,
            ..Self::default()
        }
    }
}

/// Writes produced by a debounce firing.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct PendingWrites {
    /// Prose content to store.
    pub text: Option<PendingWrite>,
    /// Scene to store.
    pub scene: Option<SceneSnapshot>,
}

impl PendingWrites {
    /// Whether nothing needs storing.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.text.is_none() && self.scene.is_none()
    }

    /// Merge into one store patch.
    #[must_use]
    pub fn into_patch(self) -> DocumentPatch {
        DocumentPatch {
            title: None,
            content: self.text.map(|write| write.content),
            scene: self.scene,
        }
    }
}

/// Result of routing an inbound event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Routed {
    /// Handled by the text engine.
    Text(TextOutcome),
    /// Handled by the scene engine.
    Scene(SceneOutcome),
    /// Not a document update.
    Ignored,
}

/// One open document.
pub struct DocumentEditor {
    document_id: DocumentId,
    can_edit: bool,
    scene: Scene,
    text: TextReconciler,
    scene_sync: SceneSync,
    history: HistoryManager,
    surface: Box<dyn SceneSurface>,
}

impl std::fmt::Debug for DocumentEditor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DocumentEditor")
            .field("document_id", &self.document_id)
            .field("can_edit", &self.can_edit)
            .field("elements", &self.scene.element_count())
            .field("history", &self.history.len())
            .finish_non_exhaustive()
    }
}

impl DocumentEditor {
    /// Load `document` into a new editor and render it on `surface`.
    ///
    /// # Errors
    ///
    /// Returns an error if the stored scene cannot be materialized.
    pub fn new(
        document: &Document,
        session_id: SessionId,
        options: &EditorOptions,
        mut surface: Box<dyn SceneSurface>,
    ) -> Result<Self, EditorError> {
        let scene = match &document.scene {
            Some(snapshot) => snapshot.to_scene()?,
            None => Scene::new(),
        };
        let config = &options.config;
        let scene_sync = SceneSync::new(document.id, session_id)
            .with_debounce(config.scene_debounce());
        {
            let guard = scene_sync.guard();
            let _scope = guard.enter();
            surface.load(&scene);
        }

        let mut history = HistoryManager::new(config.history_capacity);
        history.push(scene.snapshot()?);

        let text = TextReconciler::new(document.id, session_id, document.content.clone())
            .with_debounce(config.text_debounce())
            .with_structural_threshold(config.structural_line_threshold);

        tracing::debug!(
            document_id = %document.id,
            elements = scene.element_count(),
            can_edit = options.can_edit,
            "Opened document editor"
        );

        Ok(Self {
            document_id: document.id,
            can_edit: options.can_edit,
            scene,
            text,
            scene_sync,
            history,
            surface,
        })
    }

    fn ensure_editable(&self) -> Result<(), EditorError> {
        if self.can_edit {
            Ok(())
        } else {
            Err(EditorError::ReadOnly)
        }
    }

    /// Whether a remote apply or an undo/redo load is in progress.
    #[must_use]
    pub fn is_loading(&self) -> bool {
        self.scene_sync.guard().is_active() || self.history.guard().is_active()
    }

    /// Replace the prose buffer with local input.
    ///
    /// # Errors
    ///
    /// Returns [`EditorError::ReadOnly`] without edit rights.
    pub fn local_text_change(
        &mut self,
        text: impl Into<String>,
        cursor: usize,
        now: Instant,
    ) -> Result<(), EditorError> {
        self.ensure_editable()?;
        self.text.on_local_change(text, cursor, now);
        Ok(())
    }

    /// Insert text at the cursor.
    ///
    /// # Errors
    ///
    /// Returns [`EditorError::ReadOnly`] without edit rights.
    pub fn insert_at_cursor(&mut self, text: &str, now: Instant) -> Result<(), EditorError> {
        self.ensure_editable()?;
        self.text.insert_at_cursor(text, now);
        Ok(())
    }

    /// Record the surface's new scene after a local mutation.
    ///
    /// Returns `false` when the mutation was dropped because a load is in
    /// progress.
    ///
    /// # Errors
    ///
    /// Returns [`EditorError::ReadOnly`] without edit rights, or a sync error
    /// if the scene cannot be captured.
    pub fn local_scene_mutation(&mut self, scene: Scene, now: Instant) -> Result<bool, EditorError> {
        self.ensure_editable()?;
        if self.is_loading() {
            tracing::trace!(document_id = %self.document_id, "Ignoring mutation during load");
            return Ok(false);
        }
        let snapshot = scene.snapshot()?;
        self.scene = scene;
        self.history.push(snapshot.clone());
        Ok(self.scene_sync.on_scene_mutated(snapshot, now))
    }

    /// Mutate the scene in place, then record it like
    /// [`local_scene_mutation`](Self::local_scene_mutation).
    ///
    /// # Errors
    ///
    /// Same as [`local_scene_mutation`](Self::local_scene_mutation).
    pub fn edit_scene<F>(&mut self, edit: F, now: Instant) -> Result<bool, EditorError>
    where
        F: FnOnce(&mut Scene),
    {
        self.ensure_editable()?;
        let mut scene = self.scene.clone();
        edit(&mut scene);
        self.surface.load(&scene);
        self.local_scene_mutation(scene, now)
    }

    /// Step back in history and load the result locally.
    pub fn undo(&mut self) -> bool {
        let Self {
            history,
            scene,
            surface,
            scene_sync,
            document_id,
            ..
        } = self;
        let loaded = history
            .undo(|snapshot| load_snapshot(*document_id, snapshot, scene, surface.as_mut()))
            .is_some();
        if loaded {
            scene_sync.cancel_pending();
        }
        loaded
    }

    /// Step forward in history and load the result locally.
    pub fn redo(&mut self) -> bool {
        let Self {
            history,
            scene,
            surface,
            scene_sync,
            document_id,
            ..
        } = self;
        let loaded = history
            .redo(|snapshot| load_snapshot(*document_id, snapshot, scene, surface.as_mut()))
            .is_some();
        if loaded {
            scene_sync.cancel_pending();
        }
        loaded
    }

    /// Dispatch an inbound event to the matching engine.
    pub fn route(&mut self, event: &WireEvent) -> Routed {
        match event {
            WireEvent::TextUpdate(update) => Routed::Text(self.text.on_remote(update)),
            WireEvent::SceneUpdate(update) => Routed::Scene(self.scene_sync.on_remote(
                update,
                &mut self.scene,
                self.surface.as_mut(),
            )),
            _ => Routed::Ignored,
        }
    }

    /// Fire due debounces.
    pub fn poll(&mut self, now: Instant, sink: &dyn Broadcaster) -> PendingWrites {
        PendingWrites {
            text: self.text.poll(now, sink),
            scene: self.scene_sync.poll(now, sink),
        }
    }

    /// Fire every pending debounce now.
    pub fn flush(&mut self, sink: &dyn Broadcaster) -> PendingWrites {
        PendingWrites {
            text: self.text.flush(sink),
            scene: self.scene_sync.flush(sink),
        }
    }

    /// Earliest pending debounce deadline.
    #[must_use]
    pub fn next_deadline(&self) -> Option<Instant> {
        match (self.text.deadline(), self.scene_sync.deadline()) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    /// Drop pending emissions without sending them.
    pub fn cancel_pending(&mut self) {
        self.text.cancel_pending();
        self.scene_sync.cancel_pending();
    }

    /// Patch holding the full current state, for manual saves.
    ///
    /// # Errors
    ///
    /// Returns an error if the scene cannot be captured.
    pub fn full_patch(&self) -> Result<DocumentPatch, EditorError> {
        Ok(DocumentPatch {
            title: None,
            content: Some(self.text.buffer().to_string()),
            scene: Some(self.scene.snapshot()?),
        })
    }

    /// Set whether the text surface has focus.
    pub fn set_focused(&mut self, focused: bool) {
        self.text.set_focused(focused);
    }

    /// Whether an earlier history entry exists.
    #[must_use]
    pub fn can_undo(&self) -> bool {
        self.history.can_undo()
    }

    /// Whether a later history entry exists.
    #[must_use]
    pub fn can_redo(&self) -> bool {
        self.history.can_redo()
    }

    /// Whether local edits are accepted.
    #[must_use]
    pub const fn can_edit(&self) -> bool {
        self.can_edit
    }

    /// Current scene.
    #[must_use]
    pub const fn scene(&self) -> &Scene {
        &self.scene
    }

    /// Current prose buffer.
    #[must_use]
    pub fn text(&self) -> &str {
        self.text.buffer()
    }

    /// Cursor as a character offset.
    #[must_use]
    pub const fn cursor(&self) -> usize {
        self.text.cursor()
    }

    /// Document being edited.
    #[must_use]
    pub const fn document_id(&self) -> DocumentId {
        self.document_id
    }

    /// Handles on the remote-apply and undo/redo guards.
    #[must_use]
    pub fn guards(&self) -> [notesync_core::ReentrancyGuard; 2] {
        [self.scene_sync.guard(), self.history.guard()]
    }
}

fn load_snapshot(
    document_id: DocumentId,
    snapshot: &SceneSnapshot,
    scene: &mut Scene,
    surface: &mut dyn SceneSurface,
) {
    match snapshot.to_scene() {
        Ok(loaded) => {
            *scene = loaded;
            surface.load(scene);
        }
        Err(e) => {
            tracing::warn!(%document_id, "Failed to load history entry: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::collections::HashSet;
    use std::time::Duration;

    use super::*;
    use notesync_core::{current_timestamp, Element, ElementKind, SceneUpdate};

    #[derive(Default)]
    struct Recorder(RefCell<Vec<WireEvent>>);

    impl Broadcaster for Recorder {
        fn broadcast(&self, event: WireEvent) {
            self.0.borrow_mut().push(event);
        }
    }

    #[derive(Default)]
    struct NullSurface;

    impl SceneSurface for NullSurface {
        fn load(&mut self, _scene: &Scene) {}
    }

    fn document() -> Document {
        Document {
            id: DocumentId::new(),
            container_id: "notebook".into(),
            title: "Test".into(),
            content: "start".into(),
            scene: None,
            author_id: "alice".into(),
            shared_with: HashSet::new(),
            updated_at: current_timestamp(),
        }
    }

    fn editor(options: &EditorOptions) -> DocumentEditor {
        DocumentEditor::new(&document(), SessionId::new(), options, Box::new(NullSurface))
            .expect("editor")
    }

    fn add_shape(editor: &mut DocumentEditor, now: Instant) {
        editor
            .edit_scene(
                |scene| {
                    scene.add_element(Element::new(ElementKind::Ellipse));
                },
                now,
            )
            .expect("editable");
    }

    #[test]
    fn test_read_only_rejects_edits() {
        let mut editor = editor(&EditorOptions::read_only());
        let now = Instant::now();
        assert!(matches!(
            editor.local_text_change("x", 1, now),
            Err(EditorError::ReadOnly)
        ));
        assert!(matches!(
            editor.insert_at_cursor("x", now),
            Err(EditorError::ReadOnly)
        ));
        assert!(matches!(
            editor.local_scene_mutation(Scene::new(), now),
            Err(EditorError::ReadOnly)
        ));
        assert_eq!(editor.text(), "start");
    }

    #[test]
    fn test_undo_returns_to_loaded_state() {
        let mut editor = editor(&EditorOptions::default());
        let now = Instant::now();
        let loaded = editor.scene().clone();
        for _ in 0..3 {
            add_shape(&mut editor, now);
        }
        assert_eq!(editor.scene().element_count(), 3);

        for _ in 0..3 {
            assert!(editor.undo());
        }
        assert!(!editor.undo());
        assert_eq!(editor.scene(), &loaded);

        assert!(editor.redo());
        assert_eq!(editor.scene().element_count(), 1);
    }

    #[test]
    fn test_undo_is_not_broadcast() {
        let sink = Recorder::default();
        let mut editor = editor(&EditorOptions::default());
        let t0 = Instant::now();
        add_shape(&mut editor, t0);
        editor.flush(&sink);
        assert_eq!(sink.0.borrow().len(), 1);

        add_shape(&mut editor, t0);
        assert!(editor.undo());
        assert!(editor.poll(t0 + Duration::from_secs(1), &sink).is_empty());
        assert_eq!(sink.0.borrow().len(), 1);
    }

    #[test]
    fn test_remote_scene_not_pushed_to_history() {
        let mut editor = editor(&EditorOptions::default());
        let mut remote = Scene::new();
        remote.add_element(Element::new(ElementKind::Ellipse));

        let routed = editor.route(&WireEvent::SceneUpdate(SceneUpdate {
            document_id: editor.document_id(),
            scene: remote.snapshot().expect("snapshot"),
            originator_session_id: SessionId::new(),
            timestamp: 0,
        }));
        assert_eq!(routed, Routed::Scene(SceneOutcome::Applied));
        assert_eq!(editor.scene(), &remote);
        assert!(!editor.can_undo());
    }

    #[test]
    fn test_mutation_during_load_ignored() {
        let mut editor = editor(&EditorOptions::default());
        let [remote_guard, _] = editor.guards();
        let scope = remote_guard.enter().expect("inactive");
        let accepted = editor
            .local_scene_mutation(Scene::new(), Instant::now())
            .expect("editable");
        drop(scope);
        assert!(!accepted);
        assert!(editor.next_deadline().is_none());
    }

    #[test]
    fn test_next_deadline_is_earliest() {
        let mut editor = editor(&EditorOptions::default());
        let t0 = Instant::now();
        editor.local_text_change("typing", 6, t0).expect("editable");
        add_shape(&mut editor, t0);
        assert_eq!(editor.next_deadline(), Some(t0 + Duration::from_millis(100)));

        let sink = Recorder::default();
        let writes = editor.poll(t0 + Duration::from_millis(100), &sink);
        assert!(writes.scene.is_some());
        assert!(writes.text.is_none());
        assert_eq!(editor.next_deadline(), Some(t0 + Duration::from_millis(500)));

        let patch = editor
            .poll(t0 + Duration::from_millis(500), &sink)
            .into_patch();
        assert_eq!(patch.content.as_deref(), Some("typing"));
    }

    #[test]
    fn test_route_ignores_room_events() {
        let mut editor = editor(&EditorOptions::default());
        assert_eq!(editor.route(&WireEvent::join("x")), Routed::Ignored);
    }
}
