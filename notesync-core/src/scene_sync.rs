//! # Scene synchronization
//!
//! Debounces local scene mutations into whole-scene broadcasts and applies
//! remote scenes last-writer-wins.
//!
//! Applying a remote scene re-renders the surface, which may itself report
//! mutations. Those reports arrive while [`SceneSync::guard`] is active and
//! are dropped, so a remote apply never turns into a new local broadcast.

use std::time::{Duration, Instant};

use crate::{
    current_timestamp, Broadcaster, Debouncer, Digest, DocumentId, EchoGuard, ReentrancyGuard,
    Scene, SceneSnapshot, SceneUpdate, SessionId, WireEvent, DEFAULT_SCENE_DEBOUNCE_MS,
};

/// Rendering surface that displays the scene.
///
/// Drawing tools and shape rendering live behind this trait.
pub trait SceneSurface: Send {
    /// Replace everything on the surface with `scene` and re-render.
    fn load(&mut self, scene: &Scene);
}

/// What happened to an inbound scene update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SceneOutcome {
    /// Update addressed to another document.
    OtherDocument,
    /// This session sent it.
    SelfOrigin,
    /// Payload matches the last emitted digest.
    Echo,
    /// Payload could not be materialized; local scene untouched.
    Malformed,
    /// Local scene replaced.
    Applied,
}

/// Scene broadcast state for one document.
#[derive(Debug)]
pub struct SceneSync {
    document_id: DocumentId,
    self_id: SessionId,
    applying_remote: ReentrancyGuard,
    echo: EchoGuard,
    debounce: Debouncer<SceneSnapshot>,
}

impl SceneSync {
    /// Create the engine for a document.
    #[must_use]
    pub fn new(document_id: DocumentId, self_id: SessionId) -> Self {
        Self {
            document_id,
            self_id,
            applying_remote: ReentrancyGuard::new(),
            echo: EchoGuard::new(),
            debounce: Debouncer::new(Duration::from_millis(DEFAULT_SCENE_DEBOUNCE_MS)),
        }
    }

    /// Override the debounce window.
    #[must_use]
    pub fn with_debounce(mut self, window: Duration) -> Self {
        self.debounce = Debouncer::new(window);
        self
    }

    /// Record a mutation reported by the surface.
    ///
    /// Returns `false` if the mutation was a side effect of a remote apply.
    pub fn on_scene_mutated(&mut self, snapshot: SceneSnapshot, now: Instant) -> bool {
        if self.applying_remote.is_active() {
            return false;
        }
        self.debounce.schedule(snapshot, now);
        true
    }

    /// Emit the pending snapshot if its debounce window has elapsed.
    ///
    /// Returns the emitted snapshot so the caller can persist it.
    pub fn poll(&mut self, now: Instant, sink: &dyn Broadcaster) -> Option<SceneSnapshot> {
        let snapshot = self.debounce.fire(now)?;
        self.emit(snapshot, sink)
    }

    /// Emit any pending snapshot immediately.
    pub fn flush(&mut self, sink: &dyn Broadcaster) -> Option<SceneSnapshot> {
        let snapshot = self.debounce.flush()?;
        self.emit(snapshot, sink)
    }

    fn emit(&mut self, snapshot: SceneSnapshot, sink: &dyn Broadcaster) -> Option<SceneSnapshot> {
        let digest = snapshot.digest();
        if self.echo.is_echo(digest) {
            tracing::trace!(document_id = %self.document_id, %digest, "Scene unchanged, skipping emit");
            return None;
        }
        self.echo.record(digest);
        tracing::debug!(
            document_id = %self.document_id,
            %digest,
            elements = snapshot.element_count(),
            "Emitting scene update"
        );
        sink.broadcast(WireEvent::SceneUpdate(SceneUpdate {
            document_id: self.document_id,
            scene: snapshot.clone(),
            originator_session_id: self.self_id,
            timestamp: current_timestamp(),
        }));
        Some(snapshot)
    }

    /// Apply an inbound scene update to `scene` and re-render `surface`.
    pub fn on_remote(
        &mut self,
        update: &SceneUpdate,
        scene: &mut Scene,
        surface: &mut dyn SceneSurface,
    ) -> SceneOutcome {
        if update.document_id != self.document_id {
            return SceneOutcome::OtherDocument;
        }
        if update.originator_session_id == self.self_id {
            return SceneOutcome::SelfOrigin;
        }
        let digest = update.scene.digest();
        if self.echo.is_echo(digest) {
            tracing::trace!(document_id = %self.document_id, %digest, "Dropping scene echo");
            return SceneOutcome::Echo;
        }

        let remote = match update.scene.to_scene() {
            Ok(remote) => remote,
            Err(e) => {
                tracing::warn!(
                    document_id = %self.document_id,
                    originator = %update.originator_session_id,
                    "Dropping malformed remote scene: {e}"
                );
                return SceneOutcome::Malformed;
            }
        };

        {
            let Some(_scope) = self.applying_remote.enter() else {
                tracing::warn!(document_id = %self.document_id, "Remote scene arrived during apply");
                return SceneOutcome::Malformed;
            };
            *scene = remote;
            surface.load(scene);
        }

        if self.debounce.cancel() {
            tracing::debug!(
                document_id = %self.document_id,
                "Remote scene overwrote pending local changes"
            );
        }
        SceneOutcome::Applied
    }

    /// Handle on the remote-apply guard, for mutation handlers outside the engine.
    #[must_use]
    pub fn guard(&self) -> ReentrancyGuard {
        self.applying_remote.clone()
    }

    /// When the pending emission is due.
    #[must_use]
    pub fn deadline(&self) -> Option<Instant> {
        self.debounce.deadline()
    }

    /// Drop the pending emission.
    pub fn cancel_pending(&mut self) -> bool {
        self.debounce.cancel()
    }

    /// Digest of the last emitted scene.
    #[must_use]
    pub fn last_emitted(&self) -> Option<Digest> {
        self.echo.last_emitted()
    }

    /// Document this engine tracks.
    #[must_use]
    pub const fn document_id(&self) -> DocumentId {
        self.document_id
    }
}
