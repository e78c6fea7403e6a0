//! Shape sync controller
//!
//! Bridges the map widget and the annotation store. Widget events become store
//! intents; stored annotations become widget commands on startup. The controller
//! never edits the annotation set itself.
//!
//! Marker notes are entered after the marker is drawn. Until the note is committed
//! the marker is *pending*; with the single-pending-marker policy enabled, drawing
//! another marker discards the pending one from both the store and the map.

use crate::widget::{MapWidget, ShapeDescriptor, ShapeDraft, ShapeEvent, ShapeHandle, ShapeRef};
use map_model::{Annotation, AnnotationId, LatLng, MapSettings, Matcher};
use std::collections::{HashMap, HashSet};
use storage::{AnnotationStore, KeyValueStore, StoreError};

#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("shape {0} is not linked to an annotation")]
    UnknownShape(ShapeHandle),
}

pub type SyncResult<T> = Result<T, SyncError>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncOptions {
    pub marker_notes: bool,
    pub single_pending_marker: bool,
    pub default_polygon_color: String,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self::from(&MapSettings::default())
    }
}

impl From<&MapSettings> for SyncOptions {
    fn from(settings: &MapSettings) -> Self {
        Self {
            marker_notes: settings.marker_notes,
            single_pending_marker: settings.single_pending_marker,
            default_polygon_color: settings.default_polygon_color.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControllerState {
    Idle,
    AwaitingNote { handle: ShapeHandle, annotation: AnnotationId },
}

pub struct ShapeSyncController<K, W> {
    store: AnnotationStore<K>,
    widget: W,
    options: SyncOptions,
    state: ControllerState,
    links: HashMap<ShapeHandle, AnnotationId>,
    hydrated: bool,
}

impl<K: KeyValueStore, W: MapWidget> ShapeSyncController<K, W> {
    pub fn new(store: AnnotationStore<K>, widget: W, options: SyncOptions) -> Self {
        Self {
            store,
            widget,
            options,
            state: ControllerState::Idle,
            links: HashMap::new(),
            hydrated: false,
        }
    }

    pub fn store(&self) -> &AnnotationStore<K> {
        &self.store
    }

    pub fn widget(&self) -> &W {
        &self.widget
    }

    pub fn widget_mut(&mut self) -> &mut W {
        &mut self.widget
    }

    pub fn state(&self) -> ControllerState {
        self.state
    }

    pub fn annotation_for(&self, handle: ShapeHandle) -> Option<AnnotationId> {
        self.links.get(&handle).copied()
    }

    pub fn handle_for(&self, id: AnnotationId) -> Option<ShapeHandle> {
        self.links.iter().find(|(_, linked)| **linked == id).map(|(handle, _)| *handle)
    }

    pub fn into_parts(self) -> (AnnotationStore<K>, W) {
        (self.store, self.widget)
    }

    /// Load persisted annotations and draw one shape per annotation.
    ///
    /// Returns the number of shapes drawn. Never writes to storage. Only the first
    /// call draws; later calls return 0.
    pub fn hydrate(&mut self) -> usize {
        if self.hydrated {
            log::debug!("hydrate: map already drawn");
            return 0;
        }
        self.hydrated = true;

        let annotations = self.store.load();

        for annotation in &annotations {
            let descriptor =
                ShapeDescriptor::from_annotation(annotation, self.options.marker_notes);
            let handle = self.widget.add_shape(descriptor);
            self.links.insert(handle, annotation.id);
        }

        log::debug!("hydrated {} shapes", annotations.len());
        annotations.len()
    }

    pub fn handle_event(&mut self, event: ShapeEvent) -> SyncResult<()> {
        match event {
            ShapeEvent::Created { handle, draft } => self.on_shape_created(handle, draft).map(drop),
            ShapeEvent::Deleted(refs) => self.on_shape_deleted(&refs).map(drop),
            ShapeEvent::NoteEdited { handle, note } => self.commit_note(handle, note).map(drop),
        }
    }

    /// Persist a freshly drawn shape and tell the widget to keep it.
    ///
    /// On failure the drawn shape is removed from the widget so the map never
    /// shows something storage does not hold.
    pub fn on_shape_created(
        &mut self,
        handle: ShapeHandle,
        draft: ShapeDraft,
    ) -> SyncResult<Annotation> {
        let result = match draft {
            ShapeDraft::Marker { position, note } => self.create_marker(handle, position, note),
            ShapeDraft::Polygon { vertices, color } => {
                let color = color.unwrap_or_else(|| self.options.default_polygon_color.clone());
                self.store.add_polygon(vertices, color).map_err(SyncError::from)
            }
        };

        let annotation = match result {
            Ok(annotation) => annotation,
            Err(err) => {
                log::warn!("discarding drawn shape {handle}: {err}");
                self.widget.remove_shape(handle);
                return Err(err);
            }
        };

        let descriptor = ShapeDescriptor::from_annotation(&annotation, self.options.marker_notes);
        self.widget.retain_shape(handle, &descriptor);
        self.links.insert(handle, annotation.id);

        Ok(annotation)
    }

    /// Drop the annotations behind shapes the user deleted on the map.
    ///
    /// The whole batch is removed in one write, so on error storage and links are
    /// unchanged. A handle listed twice counts once.
    pub fn on_shape_deleted(&mut self, refs: &[ShapeRef]) -> SyncResult<Vec<Annotation>> {
        let mut handles = HashSet::new();
        let mut matchers = Vec::with_capacity(refs.len());

        for shape in refs {
            if !handles.insert(shape.handle) {
                continue;
            }
            matchers.push(match shape.annotation.or_else(|| self.annotation_for(shape.handle)) {
                Some(id) => Matcher::Id(id),
                None => shape.structural_matcher(),
            });
        }

        let removed = self.store.remove_any(&matchers)?;

        for handle in &handles {
            self.links.remove(handle);
        }
        if let ControllerState::AwaitingNote { handle, .. } = self.state {
            if handles.contains(&handle) {
                self.state = ControllerState::Idle;
            }
        }

        Ok(removed)
    }

    /// Store the note typed into a marker's editor.
    pub fn commit_note(
        &mut self,
        handle: ShapeHandle,
        note: impl Into<String>,
    ) -> SyncResult<Annotation> {
        let id = self.annotation_for(handle).ok_or(SyncError::UnknownShape(handle))?;
        let annotation = self.store.update_note(id, note)?;

        if let ControllerState::AwaitingNote { annotation: pending, .. } = self.state {
            if pending == id {
                self.state = ControllerState::Idle;
            }
        }

        Ok(annotation)
    }

    fn create_marker(
        &mut self,
        handle: ShapeHandle,
        position: LatLng,
        note: Option<String>,
    ) -> SyncResult<Annotation> {
        // Reject before the pending marker is touched.
        position.validate().map_err(StoreError::from)?;
        if self.store.next_id().is_none() {
            return Err(StoreError::IdsExhausted.into());
        }

        if self.options.single_pending_marker {
            self.discard_pending_marker()?;
        }

        let awaiting_note = self.options.marker_notes && note.is_none();
        let note = if self.options.marker_notes { note.unwrap_or_default() } else { String::new() };

        let annotation = self.store.add_marker(position.lat, position.lng, note)?;

        self.state = if awaiting_note {
            ControllerState::AwaitingNote { handle, annotation: annotation.id }
        } else {
            ControllerState::Idle
        };

        Ok(annotation)
    }

    fn discard_pending_marker(&mut self) -> SyncResult<()> {
        let ControllerState::AwaitingNote { handle, annotation } = self.state else {
            return Ok(());
        };

        self.store.remove(&Matcher::Id(annotation))?;
        self.widget.remove_shape(handle);
        self.links.remove(&handle);
        self.state = ControllerState::Idle;

        log::debug!("replaced pending marker {annotation}");
        Ok(())
    }
}
