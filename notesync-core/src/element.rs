//! Drawable elements - the building blocks of scenes.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique identifier for an element.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ElementId(Uuid);

impl ElementId {
    /// Create a new unique element ID.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Create from an existing UUID.
    #[must_use]
    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Parse an element ID from its string form.
    ///
    /// # Errors
    ///
    /// Returns an error if `s` is not a valid UUID.
    pub fn parse(s: &str) -> Result<Self, uuid::Error> {
        Uuid::parse_str(s).map(Self)
    }
}

impl Default for ElementId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ElementId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A point in scene coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point {
    /// X coordinate.
    pub x: f32,
    /// Y coordinate.
    pub y: f32,
}

/// The shape an element draws.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum ElementKind {
    /// An axis-aligned rectangle (rotated through the transform).
    Rectangle {
        /// Corner radius in pixels.
        #[serde(default)]
        corner_radius: f32,
    },

    /// An ellipse inscribed in the transform's bounds.
    Ellipse,

    /// A straight line, optionally with an arrow head.
    Line {
        /// Start point relative to the transform origin.
        start: Point,
        /// End point relative to the transform origin.
        end: Point,
        /// Whether to draw an arrow head at `end`.
        #[serde(default)]
        arrow: bool,
    },

    /// A freehand brush stroke.
    Path {
        /// Sampled points relative to the transform origin.
        points: Vec<Point>,
    },

    /// A text label.
    Text {
        /// Text content.
        content: String,
        /// Font size in pixels.
        font_size: f32,
    },

    /// An embedded image.
    Image {
        /// Image source URI or data URL.
        src: String,
    },

    /// A container group for other elements.
    Group {
        /// Child element IDs.
        children: Vec<ElementId>,
    },
}

/// Stroke and fill styling.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Style {
    /// Stroke color as hex.
    pub stroke: String,
    /// Stroke width in pixels.
    pub stroke_width: f32,
    /// Fill color as hex, `None` for transparent.
    #[serde(default)]
    pub fill: Option<String>,
    /// Opacity from 0.0 to 1.0.
    #[serde(default = "Style::default_opacity")]
    pub opacity: f32,
}

impl Style {
    const fn default_opacity() -> f32 {
        1.0
    }
}

impl Default for Style {
    fn default() -> Self {
        Self {
            stroke: "#000000".to_string(),
            stroke_width: 2.0,
            fill: None,
            opacity: 1.0,
        }
    }
}

/// Transform for positioning and sizing elements.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Transform {
    /// X position (pixels from left).
    pub x: f32,
    /// Y position (pixels from top).
    pub y: f32,
    /// Width in pixels.
    pub width: f32,
    /// Height in pixels.
    pub height: f32,
    /// Rotation in radians.
    pub rotation: f32,
    /// Z-index for layering.
    pub z_index: i32,
}

impl Default for Transform {
    fn default() -> Self {
        Self {
            x: 0.0,
            y: 0.0,
            width: 100.0,
            height: 100.0,
            rotation: 0.0,
            z_index: 0,
        }
    }
}

/// A drawable element with shape, style and transform.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Element {
    /// Unique identifier.
    pub id: ElementId,
    /// Element shape.
    pub kind: ElementKind,
    /// Position and size.
    pub transform: Transform,
    /// Stroke and fill.
    pub style: Style,
    /// Locked elements cannot be moved by drawing tools.
    pub locked: bool,
    /// Optional parent element ID (for grouped elements).
    pub parent: Option<ElementId>,
}

impl Element {
    /// Create a new element with the given kind.
    #[must_use]
    pub fn new(kind: ElementKind) -> Self {
        Self {
            id: ElementId::new(),
            kind,
            transform: Transform::default(),
            style: Style::default(),
            locked: false,
            parent: None,
        }
    }

    /// Set the transform.
    #[must_use]
    pub fn with_transform(mut self, transform: Transform) -> Self {
        self.transform = transform;
        self
    }

    /// Set the style.
    #[must_use]
    pub fn with_style(mut self, style: Style) -> Self {
        self.style = style;
        self
    }

    /// Set whether the element is locked.
    #[must_use]
    pub fn with_locked(mut self, locked: bool) -> Self {
        self.locked = locked;
        self
    }

    /// Move the element by the given offset.
    pub fn translate(&mut self, dx: f32, dy: f32) {
        self.transform.x += dx;
        self.transform.y += dy;
    }
}
