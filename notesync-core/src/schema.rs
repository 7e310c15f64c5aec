//! Canonical serialized representation for scenes shared over the wire, in
//! history, and in the document store.

use serde::{Deserialize, Serialize};

use crate::{Element, ElementId, ElementKind, Scene, Style, SyncError, SyncResult, Transform};

/// Document-friendly element description.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ElementDocument {
    /// Element identifier.
    pub id: String,
    /// Element shape.
    pub kind: ElementKind,
    /// Transform metadata.
    #[serde(default)]
    pub transform: Transform,
    /// Stroke and fill.
    #[serde(default)]
    pub style: Style,
    /// Lock flag.
    #[serde(default)]
    pub locked: bool,
    /// Parent group identifier.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<String>,
}

impl From<&Element> for ElementDocument {
    fn from(element: &Element) -> Self {
        Self {
            id: element.id.to_string(),
            kind: element.kind.clone(),
            transform: element.transform,
            style: element.style.clone(),
            locked: element.locked,
            parent: element.parent.map(|p| p.to_string()),
        }
    }
}

impl ElementDocument {
    /// Convert document to runtime element.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::MalformedPayload`] if an id is not a valid UUID.
    pub fn into_element(self) -> SyncResult<Element> {
        let id = parse_id(&self.id)?;
        let parent = self.parent.as_deref().map(parse_id).transpose()?;
        let mut element = Element::new(self.kind)
            .with_transform(self.transform)
            .with_style(self.style)
            .with_locked(self.locked);
        element.id = id;
        element.parent = parent;
        Ok(element)
    }
}

fn parse_id(id: &str) -> SyncResult<ElementId> {
    ElementId::parse(id).map_err(|e| SyncError::MalformedPayload(format!("element id {id:?}: {e}")))
}

/// Canonical scene document.
///
/// Elements are ordered by z-index, ties broken by id, so two equal scenes
/// always serialize to the same bytes.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SceneDocument {
    /// Canvas background color as hex.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub background: Option<String>,
    /// Elements in z-order.
    #[serde(default)]
    pub elements: Vec<ElementDocument>,
}

impl SceneDocument {
    /// Build a document from a runtime scene.
    #[must_use]
    pub fn from_scene(scene: &Scene) -> Self {
        let mut doc = Self {
            background: scene.background.clone(),
            elements: scene.elements().map(ElementDocument::from).collect(),
        };
        doc.canonicalize();
        doc
    }

    /// Materialize this document as a runtime scene.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::MalformedPayload`] if any element cannot be materialized.
    pub fn to_scene(&self) -> SyncResult<Scene> {
        let mut scene = Scene::new();
        scene.background.clone_from(&self.background);
        for element_doc in &self.elements {
            scene.add_element(element_doc.clone().into_element()?);
        }
        Ok(scene)
    }

    /// Restore canonical ordering after the document was assembled by hand.
    pub fn canonicalize(&mut self) {
        self.elements.sort_by(|a, b| {
            a.transform
                .z_index
                .cmp(&b.transform.z_index)
                .then_with(|| a.id.cmp(&b.id))
        });
    }
}
