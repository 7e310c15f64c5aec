//! Scene graph for managing drawable elements.

use std::collections::HashMap;

use crate::{Element, ElementId, SceneDocument, SceneSnapshot, SyncError, SyncResult};

/// A mutable scene containing all drawable elements of a document.
///
/// Equality ignores insertion order: two scenes are equal when they hold the
/// same elements with the same roots and background.
#[derive(Debug, Clone, Default)]
pub struct Scene {
    /// All elements in the scene, indexed by ID.
    elements: HashMap<ElementId, Element>,
    /// Root-level element IDs (not children of any group).
    root_elements: Vec<ElementId>,
    /// Canvas background color as hex.
    pub background: Option<String>,
}

impl Scene {
    /// Create a new empty scene.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an element to the scene.
    pub fn add_element(&mut self, element: Element) -> ElementId {
        let id = element.id;
        if element.parent.is_none() && !self.root_elements.contains(&id) {
            self.root_elements.push(id);
        }
        self.elements.insert(id, element);
        id
    }

    /// Remove an element from the scene.
    ///
    /// # Errors
    ///
    /// Returns an error if the element is not found.
    pub fn remove_element(&mut self, id: &ElementId) -> SyncResult<Element> {
        self.root_elements.retain(|&eid| eid != *id);
        self.elements
            .remove(id)
            .ok_or_else(|| SyncError::ElementNotFound(id.to_string()))
    }

    /// Get an element by ID.
    #[must_use]
    pub fn get_element(&self, id: ElementId) -> Option<&Element> {
        self.elements.get(&id)
    }

    /// Get a mutable reference to an element by ID.
    pub fn get_element_mut(&mut self, id: ElementId) -> Option<&mut Element> {
        self.elements.get_mut(&id)
    }

    /// Update an element using a closure.
    ///
    /// # Errors
    ///
    /// Returns an error if the element is not found.
    pub fn update_element<F>(&mut self, id: ElementId, f: F) -> SyncResult<()>
    where
        F: FnOnce(&mut Element),
    {
        let element = self
            .elements
            .get_mut(&id)
            .ok_or_else(|| SyncError::ElementNotFound(id.to_string()))?;
        f(element);
        Ok(())
    }

    /// Move an element by the given offset.
    ///
    /// # Errors
    ///
    /// Returns an error if the element is not found.
    pub fn translate_element(&mut self, id: ElementId, dx: f32, dy: f32) -> SyncResult<()> {
        self.update_element(id, |element| element.translate(dx, dy))
    }

    /// Get all elements in the scene.
    pub fn elements(&self) -> impl Iterator<Item = &Element> {
        self.elements.values()
    }

    /// Get root-level elements (not children of groups).
    pub fn root_elements(&self) -> impl Iterator<Item = &Element> {
        self.root_elements
            .iter()
            .filter_map(|id| self.elements.get(id))
    }

    /// Remove every element.
    pub fn clear(&mut self) {
        self.elements.clear();
        self.root_elements.clear();
    }

    /// Get the number of elements in the scene.
    #[must_use]
    pub fn element_count(&self) -> usize {
        self.elements.len()
    }

    /// Check if the scene is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }

    /// Capture an immutable snapshot of the current state.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn snapshot(&self) -> SyncResult<SceneSnapshot> {
        SceneSnapshot::from_document(SceneDocument::from_scene(self))
    }
}

impl PartialEq for Scene {
    fn eq(&self, other: &Self) -> bool {
        self.background == other.background
            && self.elements == other.elements
            && self.root_elements.len() == other.root_elements.len()
            && self
                .root_elements
                .iter()
                .all(|id| other.root_elements.contains(id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ElementKind, Transform};

    #[test]
    fn test_scene_add_remove() {
        let mut scene = Scene::new();
        assert!(scene.is_empty());

        let element = Element::new(ElementKind::Text {
            content: "Hello".to_string(),
            font_size: 16.0,
        });
        let id = scene.add_element(element);

        assert_eq!(scene.element_count(), 1);
        assert!(scene.get_element(id).is_some());

        scene.remove_element(&id).expect("should remove");
        assert!(scene.is_empty());
        assert!(scene.remove_element(&id).is_err());
    }

    #[test]
    fn test_readding_does_not_duplicate_root() {
        let mut scene = Scene::new();
        let element = Element::new(ElementKind::Ellipse);
        scene.add_element(element.clone());
        scene.add_element(element);
        assert_eq!(scene.root_elements().count(), 1);
    }

    #[test]
    fn test_translate_element() {
        let mut scene = Scene::new();
        let id = scene.add_element(Element::new(ElementKind::Ellipse).with_transform(Transform {
            x: 100.0,
            y: 100.0,
            ..Transform::default()
        }));

        scene.translate_element(id, 10.0, -20.0).expect("exists");
        let t = scene.get_element(id).expect("exists").transform;
        assert!((t.x - 110.0).abs() < f32::EPSILON);
        assert!((t.y - 80.0).abs() < f32::EPSILON);

        assert!(matches!(
            scene.translate_element(ElementId::new(), 1.0, 1.0),
            Err(SyncError::ElementNotFound(_))
        ));
    }

    #[test]
    fn test_snapshot_roundtrip_restores_scene() {
        let mut scene = Scene::new();
        scene.background = Some("#fafafa".into());
        scene.add_element(Element::new(ElementKind::Path {
            points: vec![crate::Point { x: 0.0, y: 0.0 }, crate::Point { x: 3.0, y: 4.0 }],
        }));

        let restored = scene.snapshot().expect("snapshot").to_scene().expect("scene");
        assert_eq!(restored, scene);
    }

    #[test]
    fn test_equality_ignores_insertion_order() {
        let first = Element::new(ElementKind::Ellipse);
        let second = Element::new(ElementKind::Rectangle { corner_radius: 4.0 });

        let mut a = Scene::new();
        a.add_element(first.clone());
        a.add_element(second.clone());
        let mut b = Scene::new();
        b.add_element(second);
        b.add_element(first);

        assert_eq!(a, b);
        b.background = Some("#ffffff".into());
        assert_ne!(a, b);
    }
}
