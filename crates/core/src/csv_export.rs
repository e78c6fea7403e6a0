//! CSV export for annotations
//!
//! Produces one row per annotation for spreadsheets and the address table.

use map_model::{Annotation, LatLng, Shape, ShapeKind};
use std::io::Write;

/// Error types for CSV export
#[derive(Debug, thiserror::Error)]
pub enum CsvExportError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV serialization error: {0}")]
    Csv(#[from] csv::Error),
}

pub type CsvExportResult<T> = Result<T, CsvExportError>;

/// Configuration for CSV export
#[derive(Debug, Clone)]
pub struct CsvExportConfig {
    /// Include column headers in the output
    pub include_headers: bool,

    /// CSV delimiter character
    pub delimiter: u8,

    /// Export only one kind of shape (None = all)
    pub kind_filter: Option<ShapeKind>,
}

impl Default for CsvExportConfig {
    fn default() -> Self {
        Self { include_headers: true, delimiter: b',', kind_filter: None }
    }
}

/// Export annotations to CSV format
///
/// CSV columns:
/// - ID: Annotation identifier
/// - Type: `marker` or `polygon`
/// - Latitude / Longitude: Marker position, empty for polygons
/// - Vertices: Polygon ring as `lat lng` pairs separated by `;`, empty for markers
/// - Color: Polygon color, empty for markers
/// - Note: Marker note, empty for polygons
pub fn export_annotations_csv<W: Write>(
    writer: W,
    annotations: &[Annotation],
    config: &CsvExportConfig,
) -> CsvExportResult<()> {
    let mut csv_writer = csv::WriterBuilder::new()
        .delimiter(config.delimiter)
        .has_headers(config.include_headers)
        .from_writer(writer);

    if config.include_headers {
        csv_writer
            .write_record(["ID", "Type", "Latitude", "Longitude", "Vertices", "Color", "Note"])?;
    }

    let selected = annotations
        .iter()
        .filter(|a| config.kind_filter.map_or(true, |kind| a.kind() == kind));

    for annotation in selected {
        let record = match &annotation.shape {
            Shape::Marker { lat, lng, note } => [
                annotation.id.to_string(),
                ShapeKind::Marker.to_string(),
                lat.to_string(),
                lng.to_string(),
                String::new(),
                String::new(),
                note.clone(),
            ],
            Shape::Polygon { vertices, color } => [
                annotation.id.to_string(),
                ShapeKind::Polygon.to_string(),
                String::new(),
                String::new(),
                format_ring(vertices),
                color.clone(),
                String::new(),
            ],
        };
        csv_writer.write_record(&record)?;
    }

    csv_writer.flush()?;
    Ok(())
}

/// Export annotations to a CSV string
pub fn export_annotations_csv_string(
    annotations: &[Annotation],
    config: &CsvExportConfig,
) -> CsvExportResult<String> {
    let mut buffer = Vec::new();
    export_annotations_csv(&mut buffer, annotations, config)?;
    Ok(String::from_utf8_lossy(&buffer).into_owned())
}

fn format_ring(vertices: &[LatLng]) -> String {
    vertices
        .iter()
        .map(|vertex| format!("{} {}", vertex.lat, vertex.lng))
        .collect::<Vec<_>>()
        .join("; ")
}
