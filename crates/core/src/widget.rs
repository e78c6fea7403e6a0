//! Map widget seam
//!
//! The controller never renders. It speaks to whatever draws the map through
//! [`MapWidget`], and receives the widget's draw/delete notifications as
//! [`ShapeEvent`] values.

use map_model::{Annotation, AnnotationId, LatLng, Matcher, Shape};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;

/// Widget-side identity of a drawn shape (the layer object, not the annotation).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(transparent)]
pub struct ShapeHandle(pub u64);

impl fmt::Display for ShapeHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Everything the widget needs to show an annotation.
///
/// Carries the annotation id so the widget can hand it back on deletion.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum ShapeDescriptor {
    Marker {
        annotation: AnnotationId,
        position: LatLng,
        /// Contents of the note editor; `None` when markers carry no note.
        #[serde(skip_serializing_if = "Option::is_none")]
        note: Option<String>,
    },
    Polygon {
        annotation: AnnotationId,
        vertices: Vec<LatLng>,
        color: String,
    },
}

impl ShapeDescriptor {
    pub fn from_annotation(annotation: &Annotation, marker_notes: bool) -> Self {
        match &annotation.shape {
            Shape::Marker { lat, lng, note } => ShapeDescriptor::Marker {
                annotation: annotation.id,
                position: LatLng::new(*lat, *lng),
                note: marker_notes.then(|| note.clone()),
            },
            Shape::Polygon { vertices, color } => ShapeDescriptor::Polygon {
                annotation: annotation.id,
                vertices: vertices.clone(),
                color: color.clone(),
            },
        }
    }

    pub fn annotation(&self) -> AnnotationId {
        match self {
            ShapeDescriptor::Marker { annotation, .. }
            | ShapeDescriptor::Polygon { annotation, .. } => *annotation,
        }
    }
}

pub trait MapWidget {
    /// Draw a shape that did not come from the user (hydration).
    fn add_shape(&mut self, descriptor: ShapeDescriptor) -> ShapeHandle;

    /// Keep a shape the user just drew, styled and tagged per `descriptor`.
    fn retain_shape(&mut self, handle: ShapeHandle, descriptor: &ShapeDescriptor);

    fn remove_shape(&mut self, handle: ShapeHandle);
}

/// What the user drew, before it has an identity.
#[derive(Debug, Clone, PartialEq)]
pub enum ShapeDraft {
    Marker { position: LatLng, note: Option<String> },
    Polygon { vertices: Vec<LatLng>, color: Option<String> },
}

/// Geometry of a shape as the widget reports it on deletion.
#[derive(Debug, Clone, PartialEq)]
pub enum Outline {
    Point(LatLng),
    Ring(Vec<LatLng>),
}

impl Outline {
    pub fn of(annotation: &Annotation) -> Self {
        match &annotation.shape {
            Shape::Marker { lat, lng, .. } => Outline::Point(LatLng::new(*lat, *lng)),
            Shape::Polygon { vertices, .. } => Outline::Ring(vertices.clone()),
        }
    }
}

/// A deleted shape as reported by the widget.
#[derive(Debug, Clone, PartialEq)]
pub struct ShapeRef {
    pub handle: ShapeHandle,
    pub annotation: Option<AnnotationId>,
    pub outline: Outline,
}

impl ShapeRef {
    pub fn structural_matcher(&self) -> Matcher {
        match &self.outline {
            Outline::Point(position) => Matcher::MarkerAt(*position),
            Outline::Ring(vertices) => Matcher::PolygonRing(vertices.clone()),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ShapeEvent {
    Created { handle: ShapeHandle, draft: ShapeDraft },
    Deleted(Vec<ShapeRef>),
    NoteEdited { handle: ShapeHandle, note: String },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum WidgetCommand {
    AddShape { handle: ShapeHandle, shape: ShapeDescriptor },
    RetainShape { handle: ShapeHandle, shape: ShapeDescriptor },
    RemoveShape { handle: ShapeHandle },
}

/// Headless widget that records every command it receives.
///
/// Used by the CLI to print what a map would draw and by tests to observe the
/// controller.
#[derive(Debug, Default)]
pub struct RecordingWidget {
    next_handle: u64,
    shapes: BTreeMap<ShapeHandle, Option<ShapeDescriptor>>,
    commands: Vec<WidgetCommand>,
}

impl RecordingWidget {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate the user drawing a shape; returns the handle the widget assigned.
    pub fn draw(&mut self) -> ShapeHandle {
        let handle = self.allocate();
        self.shapes.insert(handle, None);
        handle
    }

    /// Simulate the user deleting a shape with the edit toolbar.
    pub fn delete(&mut self, handle: ShapeHandle, outline: Outline) -> ShapeRef {
        let annotation = self.shapes.remove(&handle).flatten().map(|shape| shape.annotation());
        ShapeRef { handle, annotation, outline }
    }

    pub fn commands(&self) -> &[WidgetCommand] {
        &self.commands
    }

    pub fn shape(&self, handle: ShapeHandle) -> Option<&ShapeDescriptor> {
        self.shapes.get(&handle).and_then(Option::as_ref)
    }

    pub fn live_shapes(&self) -> usize {
        self.shapes.len()
    }

    fn allocate(&mut self) -> ShapeHandle {
        let handle = ShapeHandle(self.next_handle);
        self.next_handle += 1;
        handle
    }
}

impl MapWidget for RecordingWidget {
    fn add_shape(&mut self, descriptor: ShapeDescriptor) -> ShapeHandle {
        let handle = self.allocate();
        self.shapes.insert(handle, Some(descriptor.clone()));
        self.commands.push(WidgetCommand::AddShape { handle, shape: descriptor });
        handle
    }

    fn retain_shape(&mut self, handle: ShapeHandle, descriptor: &ShapeDescriptor) {
        self.shapes.insert(handle, Some(descriptor.clone()));
        self.commands.push(WidgetCommand::RetainShape { handle, shape: descriptor.clone() });
    }

    fn remove_shape(&mut self, handle: ShapeHandle) {
        self.shapes.remove(&handle);
        self.commands.push(WidgetCommand::RemoveShape { handle });
    }
}
