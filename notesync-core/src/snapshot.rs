//! Immutable scene snapshots.
//!
//! A [`SceneSnapshot`] is the unit exchanged between the scene engine, the
//! history stack and the wire. It is cheap to clone and compares by digest.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::{Digest, Scene, SceneDocument, SyncError, SyncResult};

/// Full drawable-scene state at one instant.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(try_from = "SceneDocument", into = "SceneDocument")]
pub struct SceneSnapshot {
    document: Arc<SceneDocument>,
    digest: Digest,
}

impl SceneSnapshot {
    /// Snapshot a canonical document.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Serialization`] if the document cannot be serialized.
    pub fn from_document(mut document: SceneDocument) -> SyncResult<Self> {
        document.canonicalize();
        let bytes = serde_json::to_vec(&document)?;
        Ok(Self {
            digest: Digest::of_bytes(&bytes),
            document: Arc::new(document),
        })
    }

    /// Snapshot of an empty scene.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Serialization`] if the document cannot be serialized.
    pub fn empty() -> SyncResult<Self> {
        Self::from_document(SceneDocument::default())
    }

    /// Structural digest of this snapshot.
    #[must_use]
    pub const fn digest(&self) -> Digest {
        self.digest
    }

    /// The canonical document.
    #[must_use]
    pub fn document(&self) -> &SceneDocument {
        &self.document
    }

    /// Number of elements captured.
    #[must_use]
    pub fn element_count(&self) -> usize {
        self.document.elements.len()
    }

    /// Materialize as a runtime scene.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::MalformedPayload`] if an element cannot be materialized.
    pub fn to_scene(&self) -> SyncResult<Scene> {
        self.document.to_scene()
    }
}

impl PartialEq for SceneSnapshot {
    fn eq(&self, other: &Self) -> bool {
        self.digest == other.digest
    }
}

impl Eq for SceneSnapshot {}

impl TryFrom<SceneDocument> for SceneSnapshot {
    type Error = SyncError;

    fn try_from(document: SceneDocument) -> Result<Self, Self::Error> {
        Self::from_document(document)
    }
}

impl From<SceneSnapshot> for SceneDocument {
    fn from(snapshot: SceneSnapshot) -> Self {
        Arc::unwrap_or_clone(snapshot.document)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Element, ElementKind};

    #[test]
    fn test_equal_scenes_equal_digest() {
        let mut a = Scene::new();
        let element = Element::new(ElementKind::Ellipse);
        a.add_element(element.clone());
        let mut b = Scene::new();
        b.add_element(element);

        let sa = a.snapshot().expect("snapshot");
        let sb = b.snapshot().expect("snapshot");
        assert_eq!(sa, sb);
        assert_eq!(sa.digest(), sb.digest());
    }

    #[test]
    fn test_any_change_changes_digest() {
        let mut scene = Scene::new();
        let id = scene.add_element(Element::new(ElementKind::Ellipse));
        let before = scene.snapshot().expect("snapshot");
        scene.translate_element(id, 1.0, 0.0).expect("exists");
        let after = scene.snapshot().expect("snapshot");
        assert_ne!(before, after);
    }

    #[test]
    fn test_wire_form_is_plain_document() {
        let mut scene = Scene::new();
        scene.add_element(Element::new(ElementKind::Text {
            content: "label".into(),
            font_size: 14.0,
        }));
        let snapshot = scene.snapshot().expect("snapshot");

        let json = serde_json::to_string(&snapshot).expect("serialize");
        assert!(json.starts_with(r#"{"elements":["#));

        let back: SceneSnapshot = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(back.digest(), snapshot.digest());
    }

    #[test]
    fn test_hand_built_document_is_canonicalized() {
        let mut scene = Scene::new();
        scene.add_element(Element::new(ElementKind::Ellipse));
        scene.add_element(Element::new(ElementKind::Ellipse));
        let canonical = scene.snapshot().expect("snapshot");

        let mut reversed = canonical.document().clone();
        reversed.elements.reverse();
        let rebuilt = SceneSnapshot::from_document(reversed).expect("snapshot");
        assert_eq!(rebuilt, canonical);
    }
}
