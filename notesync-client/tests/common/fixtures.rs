//! Stores, surfaces and wait helpers.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use notesync_client::{ConnectionState, TransportSession};
use notesync_core::{
    Document, DocumentId, DocumentPatch, DocumentStore, InMemoryDocumentStore, Scene,
    SceneSurface, StoreError,
};

/// One recorded `update` call.
#[derive(Debug, Clone)]
pub struct Write {
    pub patch: DocumentPatch,
    pub immediate: bool,
}

/// Document store that records every update and can be told to fail them.
#[derive(Clone, Default)]
pub struct RecordingStore {
    inner: InMemoryDocumentStore,
    writes: Arc<Mutex<Vec<Write>>>,
    fail_updates: Arc<AtomicBool>,
}

impl RecordingStore {
    /// Store holding a single empty document.
    pub fn with_document() -> (Self, DocumentId) {
        let store = Self::default();
        let id = DocumentId::new();
        store.inner.insert(Document {
            id,
            container_id: "notebook".into(),
            title: "Test".into(),
            content: String::new(),
            scene: None,
            author_id: "tester".into(),
            shared_with: Default::default(),
            updated_at: 0,
        });
        (store, id)
    }

    pub fn writes(&self) -> Vec<Write> {
        self.writes.lock().expect("writes lock").clone()
    }

    pub fn fail_updates(&self, fail: bool) {
        self.fail_updates.store(fail, Ordering::SeqCst);
    }

    pub fn document(&self, id: DocumentId) -> Document {
        self.inner.get(id).expect("document exists")
    }
}

#[async_trait]
impl DocumentStore for RecordingStore {
    async fn fetch(&self, id: DocumentId) -> Result<Document, StoreError> {
        self.inner.fetch(id).await
    }

    async fn create(
        &self,
        container_id: &str,
        title: &str,
        content: &str,
    ) -> Result<Document, StoreError> {
        self.inner.create(container_id, title, content).await
    }

    async fn update(
        &self,
        id: DocumentId,
        patch: DocumentPatch,
        immediate: bool,
    ) -> Result<(), StoreError> {
        if self.fail_updates.load(Ordering::SeqCst) {
            return Err(StoreError::Rejected("store offline".into()));
        }
        self.writes.lock().expect("writes lock").push(Write {
            patch: patch.clone(),
            immediate,
        });
        self.inner.update(id, patch, immediate).await
    }

    async fn delete(&self, id: DocumentId) -> Result<(), StoreError> {
        self.inner.delete(id).await
    }
}

/// Surface that remembers every scene it was asked to render.
#[derive(Clone, Default)]
pub struct RecordingSurface {
    loads: Arc<Mutex<Vec<Scene>>>,
}

impl RecordingSurface {
    pub fn load_count(&self) -> usize {
        self.loads.lock().expect("loads lock").len()
    }

    pub fn last(&self) -> Option<Scene> {
        self.loads.lock().expect("loads lock").last().cloned()
    }
}

impl SceneSurface for RecordingSurface {
    fn load(&mut self, scene: &Scene) {
        self.loads.lock().expect("loads lock").push(scene.clone());
    }
}

/// Poll `check` until it returns true or five seconds pass.
pub async fn wait_for(what: &str, mut check: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while tokio::time::Instant::now() < deadline {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("timed out waiting for {what}");
}

/// Wait until the transport's state satisfies `predicate`.
pub async fn wait_for_state(
    transport: &TransportSession,
    predicate: impl Fn(&ConnectionState) -> bool,
) -> ConnectionState {
    let mut rx = transport.subscribe_state();
    let state = tokio::time::timeout(Duration::from_secs(5), rx.wait_for(|s| predicate(s)))
        .await
        .expect("timed out waiting for connection state")
        .expect("state channel closed");
    *state
}
