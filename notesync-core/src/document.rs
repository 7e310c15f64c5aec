//! Documents and the store that owns them.
//!
//! The synchronization core only ever holds a transient copy of a
//! [`Document`]; the authoritative copy lives behind a [`DocumentStore`].

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::{current_timestamp, DocumentId, SceneSnapshot};

/// Errors that can occur during store operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The requested document does not exist.
    #[error("Document not found: {0}")]
    NotFound(DocumentId),
    /// The backing service refused the request.
    #[error("Store rejected request: {0}")]
    Rejected(String),
    /// An I/O error occurred during persistence.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    /// A serialization or deserialization error occurred.
    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Access level granted to a collaborator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Read-only access.
    Viewer,
    /// Read-write access.
    Editor,
}

/// A collaborator entry.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Share {
    /// Collaborator user ID.
    pub user_id: String,
    /// Granted role.
    pub role: Role,
}

/// A note with prose content and an optional drawable scene.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Document {
    /// Document identifier.
    pub id: DocumentId,
    /// Notebook or folder that owns the document.
    pub container_id: String,
    /// Title.
    pub title: String,
    /// Prose content.
    pub content: String,
    /// Drawable scene, absent until first drawn.
    #[serde(default)]
    pub scene: Option<SceneSnapshot>,
    /// Creator user ID.
    pub author_id: String,
    /// Collaborators.
    #[serde(default)]
    pub shared_with: HashSet<Share>,
    /// Last modification in milliseconds since epoch.
    pub updated_at: u64,
}

/// Partial update for [`DocumentStore::update`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DocumentPatch {
    /// New title.
    pub title: Option<String>,
    /// New prose content.
    pub content: Option<String>,
    /// New scene.
    pub scene: Option<SceneSnapshot>,
}

impl DocumentPatch {
    /// Patch only the prose content.
    pub fn content(content: impl Into<String>) -> Self {
        Self {
            content: Some(content.into()),
            ..Self::default()
        }
    }

    /// Patch only the scene.
    #[must_use]
    pub fn scene(scene: SceneSnapshot) -> Self {
        Self {
            scene: Some(scene),
            ..Self::default()
        }
    }

    /// Whether the patch changes nothing.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.title.is_none() && self.content.is_none() && self.scene.is_none()
    }

    /// Apply this patch to `document`.
    pub fn apply_to(self, document: &mut Document) {
        if let Some(title) = self.title {
            document.title = title;
        }
        if let Some(content) = self.content {
            document.content = content;
        }
        if let Some(scene) = self.scene {
            document.scene = Some(scene);
        }
        document.updated_at = current_timestamp();
    }
}

/// External document storage.
///
/// `update` is called by the synchronization engines when a debounce fires
/// (`immediate = false`) and by explicit manual saves (`immediate = true`).
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Load a document.
    async fn fetch(&self, id: DocumentId) -> Result<Document, StoreError>;

    /// Create a new document in `container_id`.
    async fn create(
        &self,
        container_id: &str,
        title: &str,
        content: &str,
    ) -> Result<Document, StoreError>;

    /// Apply a partial update.
    async fn update(
        &self,
        id: DocumentId,
        patch: DocumentPatch,
        immediate: bool,
    ) -> Result<(), StoreError>;

    /// Delete a document.
    async fn delete(&self, id: DocumentId) -> Result<(), StoreError>;
}

/// In-memory document store with optional filesystem persistence.
///
/// With a data directory, each document is kept as `<id>.json`. Immediate
/// updates write through; debounced updates mark the document dirty until
/// [`flush`](Self::flush).
#[derive(Debug, Clone)]
pub struct InMemoryDocumentStore {
    documents: Arc<RwLock<HashMap<DocumentId, Document>>>,
    dirty: Arc<RwLock<HashSet<DocumentId>>>,
    author_id: String,
    data_dir: Option<PathBuf>,
}

impl Default for InMemoryDocumentStore {
    fn default() -> Self {
        Self::new("local")
    }
}

impl InMemoryDocumentStore {
    /// Create a store whose new documents are authored by `author_id`.
    pub fn new(author_id: impl Into<String>) -> Self {
        Self {
            documents: Arc::new(RwLock::new(HashMap::new())),
            dirty: Arc::new(RwLock::new(HashSet::new())),
            author_id: author_id.into(),
            data_dir: None,
        }
    }

    /// Create a store with filesystem persistence.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Io`] if the directory cannot be created.
    pub fn with_data_dir(
        author_id: impl Into<String>,
        data_dir: impl Into<PathBuf>,
    ) -> Result<Self, StoreError> {
        let data_dir = data_dir.into();
        std::fs::create_dir_all(&data_dir)?;
        Ok(Self {
            data_dir: Some(data_dir),
            ..Self::new(author_id)
        })
    }

    /// Insert or replace a document directly.
    pub fn insert(&self, document: Document) {
        let mut documents = self
            .documents
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        documents.insert(document.id, document);
    }

    /// Get a copy of a document if it is loaded.
    #[must_use]
    pub fn get(&self, id: DocumentId) -> Option<Document> {
        let documents = self
            .documents
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        documents.get(&id).cloned()
    }

    /// IDs of documents with unflushed debounced updates.
    #[must_use]
    pub fn dirty_ids(&self) -> Vec<DocumentId> {
        let dirty = self
            .dirty
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        dirty.iter().copied().collect()
    }

    /// Persist every dirty document.
    ///
    /// # Errors
    ///
    /// Returns the first persistence error; remaining documents stay dirty.
    pub fn flush(&self) -> Result<usize, StoreError> {
        let mut flushed = 0;
        for id in self.dirty_ids() {
            self.persist_document(id)?;
            self.dirty
                .write()
                .unwrap_or_else(std::sync::PoisonError::into_inner)
                .remove(&id);
            flushed += 1;
        }
        Ok(flushed)
    }

    // -----------------------------------------------------------------------
    // Persistence
    // -----------------------------------------------------------------------

    fn path_for(&self, id: DocumentId) -> Option<PathBuf> {
        self.data_dir
            .as_ref()
            .map(|dir| dir.join(format!("{id}.json")))
    }

    /// Save a document to disk as JSON.
    ///
    /// No-op if the store was created without a data directory.
    fn persist_document(&self, id: DocumentId) -> Result<(), StoreError> {
        let Some(path) = self.path_for(id) else {
            return Ok(());
        };
        let Some(document) = self.get(id) else {
            return Ok(());
        };
        let json = serde_json::to_string_pretty(&document)
            .map_err(|e| StoreError::Serialization(e.to_string()))?;
        std::fs::write(&path, json)?;
        tracing::debug!(document_id = %id, path = %path.display(), "Persisted document");
        Ok(())
    }

    fn load_from_disk(&self, id: DocumentId) -> Result<Option<Document>, StoreError> {
        let Some(path) = self.path_for(id) else {
            return Ok(None);
        };
        if !path.exists() {
            return Ok(None);
        }
        let contents = std::fs::read_to_string(&path)?;
        let document: Document = serde_json::from_str(&contents)
            .map_err(|e| StoreError::Serialization(e.to_string()))?;
        self.insert(document.clone());
        Ok(Some(document))
    }
}

#[async_trait]
impl DocumentStore for InMemoryDocumentStore {
    async fn fetch(&self, id: DocumentId) -> Result<Document, StoreError> {
        if let Some(document) = self.get(id) {
            return Ok(document);
        }
        self.load_from_disk(id)?.ok_or(StoreError::NotFound(id))
    }

    async fn create(
        &self,
        container_id: &str,
        title: &str,
        content: &str,
    ) -> Result<Document, StoreError> {
        let document = Document {
            id: DocumentId::new(),
            container_id: container_id.to_string(),
            title: title.to_string(),
            content: content.to_string(),
            scene: None,
            author_id: self.author_id.clone(),
            shared_with: HashSet::new(),
            updated_at: current_timestamp(),
        };
        self.insert(document.clone());
        self.persist_document(document.id)?;
        tracing::info!(document_id = %document.id, container_id, "Created document");
        Ok(document)
    }

    async fn update(
        &self,
        id: DocumentId,
        patch: DocumentPatch,
        immediate: bool,
    ) -> Result<(), StoreError> {
        {
            let mut documents = self
                .documents
                .write()
                .unwrap_or_else(std::sync::PoisonError::into_inner);
            let document = documents.get_mut(&id).ok_or(StoreError::NotFound(id))?;
            patch.apply_to(document);
        }
        if immediate {
            self.persist_document(id)?;
            self.dirty
                .write()
                .unwrap_or_else(std::sync::PoisonError::into_inner)
                .remove(&id);
        } else if self.data_dir.is_some() {
            self.dirty
                .write()
                .unwrap_or_else(std::sync::PoisonError::into_inner)
                .insert(id);
        }
        Ok(())
    }

    async fn delete(&self, id: DocumentId) -> Result<(), StoreError> {
        let removed = self
            .documents
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .remove(&id);
        self.dirty
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .remove(&id);
        if let Some(path) = self.path_for(id) {
            if path.exists() {
                std::fs::remove_file(path)?;
            }
        }
        removed.map(|_| ()).ok_or(StoreError::NotFound(id))
    }
}
