//! Zonemap core library
//!
//! Keeps the map widget and the persisted annotation set in step.

pub mod csv_export;
pub mod sync;
pub mod widget;

pub use csv_export::{export_annotations_csv, export_annotations_csv_string, CsvExportConfig};
pub use sync::{ControllerState, ShapeSyncController, SyncError, SyncOptions, SyncResult};
pub use widget::{
    MapWidget, Outline, RecordingWidget, ShapeDescriptor, ShapeDraft, ShapeEvent, ShapeHandle,
    ShapeRef, WidgetCommand,
};
