use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;

pub const DEFAULT_STORAGE_KEY: &str = "mapLayers";
pub const DEFAULT_POLYGON_COLOR: &str = "#ff0000";
pub const MIN_POLYGON_VERTICES: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AnnotationId(pub u64);

impl fmt::Display for AnnotationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ValidationError {
    #[error("coordinate is not a finite number: ({lat}, {lng})")]
    NonFiniteCoordinate { lat: f64, lng: f64 },
    #[error("latitude {0} is outside [-90, 90]")]
    LatitudeOutOfRange(f64),
    #[error("longitude {0} is outside [-180, 180]")]
    LongitudeOutOfRange(f64),
    #[error("polygon needs at least 3 vertices, got {0}")]
    TooFewVertices(usize),
    #[error("polygon color must not be empty")]
    EmptyColor,
    #[error("no annotation with id {0}")]
    UnknownAnnotation(AnnotationId),
    #[error("annotation {0} is not a marker")]
    NotAMarker(AnnotationId),
    #[error("invalid coordinate pair '{0}', expected 'lat,lng'")]
    MalformedPair(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LatLng {
    pub lat: f64,
    pub lng: f64,
}

impl LatLng {
    pub fn new(lat: f64, lng: f64) -> Self {
        Self { lat, lng }
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if !self.lat.is_finite() || !self.lng.is_finite() {
            return Err(ValidationError::NonFiniteCoordinate { lat: self.lat, lng: self.lng });
        }
        if !(-90.0..=90.0).contains(&self.lat) {
            return Err(ValidationError::LatitudeOutOfRange(self.lat));
        }
        if !(-180.0..=180.0).contains(&self.lng) {
            return Err(ValidationError::LongitudeOutOfRange(self.lng));
        }
        Ok(())
    }

    /// Parses the `"lat, lng"` form used by the coordinate input fields.
    pub fn parse_pair(input: &str) -> Result<Self, ValidationError> {
        let malformed = || ValidationError::MalformedPair(input.to_owned());

        let (lat, lng) = input.split_once(',').ok_or_else(malformed)?;
        let lat = lat.trim().parse::<f64>().map_err(|_| malformed())?;
        let lng = lng.trim().parse::<f64>().map_err(|_| malformed())?;

        let point = Self::new(lat, lng);
        point.validate()?;
        Ok(point)
    }
}

impl fmt::Display for LatLng {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}, {}", self.lat, self.lng)
    }
}

pub fn validate_ring(vertices: &[LatLng]) -> Result<(), ValidationError> {
    if vertices.len() < MIN_POLYGON_VERTICES {
        return Err(ValidationError::TooFewVertices(vertices.len()));
    }
    vertices.iter().try_for_each(LatLng::validate)
}

pub fn validate_color(color: &str) -> Result<(), ValidationError> {
    if color.trim().is_empty() {
        return Err(ValidationError::EmptyColor);
    }
    Ok(())
}

/// A persisted map shape. Serializes to one entry of the `mapLayers` array.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Annotation {
    pub id: AnnotationId,
    #[serde(flatten)]
    pub shape: Shape,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Shape {
    Marker {
        lat: f64,
        lng: f64,
        #[serde(rename = "popup", default, deserialize_with = "lenient_note")]
        note: String,
    },
    Polygon {
        #[serde(rename = "latLngs")]
        vertices: Vec<LatLng>,
        color: String,
    },
}

// Older snapshots stored the popup editor element itself, which serialized as `{}`.
fn lenient_note<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    let value = serde_json::Value::deserialize(deserializer)?;
    Ok(match value {
        serde_json::Value::String(text) => text,
        _ => String::new(),
    })
}

impl Annotation {
    pub fn marker(id: AnnotationId, position: LatLng, note: impl Into<String>) -> Self {
        let (lat, lng) = (position.lat, position.lng);
        Self { id, shape: Shape::Marker { lat, lng, note: note.into() } }
    }

    pub fn polygon(id: AnnotationId, vertices: Vec<LatLng>, color: impl Into<String>) -> Self {
        Self { id, shape: Shape::Polygon { vertices, color: color.into() } }
    }

    pub fn kind(&self) -> ShapeKind {
        match self.shape {
            Shape::Marker { .. } => ShapeKind::Marker,
            Shape::Polygon { .. } => ShapeKind::Polygon,
        }
    }

    pub fn position(&self) -> Option<LatLng> {
        match self.shape {
            Shape::Marker { lat, lng, .. } => Some(LatLng::new(lat, lng)),
            Shape::Polygon { .. } => None,
        }
    }

    pub fn note(&self) -> Option<&str> {
        match &self.shape {
            Shape::Marker { note, .. } => Some(note),
            Shape::Polygon { .. } => None,
        }
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        match &self.shape {
            Shape::Marker { lat, lng, .. } => LatLng::new(*lat, *lng).validate(),
            Shape::Polygon { vertices, color } => {
                validate_ring(vertices)?;
                validate_color(color)
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ShapeKind {
    Marker,
    Polygon,
}

impl fmt::Display for ShapeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ShapeKind::Marker => f.write_str("marker"),
            ShapeKind::Polygon => f.write_str("polygon"),
        }
    }
}

/// Selects which annotations a removal applies to.
///
/// `Id` is the normal path. The structural variants compare coordinates with exact
/// float equality and exist for shapes that never received an id.
#[derive(Debug, Clone, PartialEq)]
pub enum Matcher {
    Id(AnnotationId),
    MarkerAt(LatLng),
    PolygonRing(Vec<LatLng>),
}

impl Matcher {
    pub fn matches(&self, annotation: &Annotation) -> bool {
        match (self, &annotation.shape) {
            (Matcher::Id(id), _) => annotation.id == *id,
            (Matcher::MarkerAt(at), Shape::Marker { lat, lng, .. }) => {
                at.lat == *lat && at.lng == *lng
            }
            (Matcher::PolygonRing(ring), Shape::Polygon { vertices, .. }) => ring == vertices,
            _ => false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Zone {
    pub name: String,
    pub center: LatLng,
    pub zoom: u8,
}

impl Zone {
    fn preset(name: &str, lat: f64, lng: f64) -> Self {
        Self { name: name.to_owned(), center: LatLng::new(lat, lng), zoom: 12 }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MapSettings {
    pub storage_key: String,
    pub default_polygon_color: String,
    pub marker_notes: bool,
    pub single_pending_marker: bool,
    pub zones: Vec<Zone>,
    pub geocoder_url: String,
    pub geocoder_user_agent: String,
    pub save_url: String,
}

impl Default for MapSettings {
    fn default() -> Self {
        Self {
            storage_key: DEFAULT_STORAGE_KEY.to_owned(),
            default_polygon_color: DEFAULT_POLYGON_COLOR.to_owned(),
            marker_notes: true,
            single_pending_marker: true,
            zones: vec![
                Zone::preset("playa", 20.6296, -87.0739),
                Zone::preset("puerto", 20.8446, -87.1486),
                Zone::preset("tulum", 20.2115, -87.4658),
            ],
            geocoder_url: "https://nominatim.openstreetmap.org".to_owned(),
            geocoder_user_agent: concat!("zonemap/", env!("CARGO_PKG_VERSION")).to_owned(),
            save_url: "http://localhost:8000/guardar".to_owned(),
        }
    }
}

impl MapSettings {
    pub fn zone(&self, name: &str) -> Option<&Zone> {
        self.zones.iter().find(|zone| zone.name.eq_ignore_ascii_case(name))
    }
}

/// Street address resolved for a point on the map.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddressRecord {
    pub road: Option<String>,
    pub neighborhood: Option<String>,
    pub city: Option<String>,
    pub house_number: Option<String>,
    pub state: Option<String>,
    pub postal_code: Option<String>,
    pub coordinates: String,
}

/// Flat row accepted by the remote save endpoint.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SaveRecord {
    pub calle: String,
    pub colonia: String,
    pub ciudad: String,
    pub numero_casa: String,
    pub estado: String,
    pub codigo_postal: String,
    pub coordenadas: String,
}

impl From<&AddressRecord> for SaveRecord {
    fn from(address: &AddressRecord) -> Self {
        let field = |value: &Option<String>| value.clone().unwrap_or_default();

        Self {
            calle: field(&address.road),
            colonia: field(&address.neighborhood),
            ciudad: field(&address.city),
            numero_casa: field(&address.house_number),
            estado: field(&address.state),
            codigo_postal: field(&address.postal_code),
            coordenadas: address.coordinates.clone(),
        }
    }
}
