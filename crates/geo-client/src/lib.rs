//! HTTP collaborators of the map: reverse geocoding and the remote row sink.
//!
//! Both sit behind traits so the rest of the workspace can run without a network:
//! - `ReverseGeocoder` turns a point into an `AddressRecord` (Nominatim in production).
//! - `RecordSink` accepts a flat `SaveRecord` and inserts it somewhere (an HTTP endpoint).

use map_model::{AddressRecord, LatLng, MapSettings, SaveRecord};
use serde::Deserialize;

#[derive(Debug, thiserror::Error)]
pub enum GeoError {
    #[error("network error: {0}")]
    Network(String),
    #[error("server returned status {status}: {message}")]
    Status { status: u16, message: String },
    #[error("invalid response: {0}")]
    InvalidResponse(String),
    #[error("no address found for {0}")]
    NoAddress(LatLng),
}

pub type GeoResult<T> = Result<T, GeoError>;

pub trait ReverseGeocoder {
    fn reverse(&self, point: LatLng) -> GeoResult<AddressRecord>;
}

pub trait RecordSink {
    fn save(&self, record: &SaveRecord) -> GeoResult<SaveAck>;
}

/// Acknowledgement returned by the save endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SaveAck {
    pub message: String,
    #[serde(default)]
    pub id: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct NominatimReverse {
    #[serde(default)]
    address: Option<NominatimAddress>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct NominatimAddress {
    road: Option<String>,
    neighbourhood: Option<String>,
    suburb: Option<String>,
    village: Option<String>,
    city: Option<String>,
    town: Option<String>,
    house_number: Option<String>,
    state: Option<String>,
    postcode: Option<String>,
}

pub struct NominatimGeocoder {
    base_url: String,
    user_agent: String,
    agent: ureq::Agent,
}

impl NominatimGeocoder {
    pub fn new(base_url: impl Into<String>, user_agent: impl Into<String>) -> Self {
        Self { base_url: base_url.into(), user_agent: user_agent.into(), agent: ureq::agent() }
    }

    pub fn from_settings(settings: &MapSettings) -> Self {
        Self::new(settings.geocoder_url.clone(), settings.geocoder_user_agent.clone())
    }
}

impl ReverseGeocoder for NominatimGeocoder {
    fn reverse(&self, point: LatLng) -> GeoResult<AddressRecord> {
        let url = reverse_url(&self.base_url, point);
        log::debug!("reverse geocoding {point} via {url}");

        let resp = self
            .agent
            .get(&url)
            .set("Accept", "application/json")
            .set("User-Agent", &self.user_agent)
            .call()
            .map_err(map_ureq_error)?;

        let body = resp.into_string().map_err(|e| GeoError::InvalidResponse(e.to_string()))?;

        parse_reverse_response(&body, point)
    }
}

pub struct HttpRecordSink {
    url: String,
    agent: ureq::Agent,
}

impl HttpRecordSink {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into(), agent: ureq::agent() }
    }

    pub fn from_settings(settings: &MapSettings) -> Self {
        Self::new(settings.save_url.clone())
    }
}

impl RecordSink for HttpRecordSink {
    fn save(&self, record: &SaveRecord) -> GeoResult<SaveAck> {
        let payload =
            serde_json::to_string(record).map_err(|e| GeoError::InvalidResponse(e.to_string()))?;
        log::debug!("posting record to {}: {payload}", self.url);

        let resp = self
            .agent
            .post(&self.url)
            .set("Content-Type", "application/json")
            .send_string(&payload)
            .map_err(map_ureq_error)?;

        let body = resp.into_string().map_err(|e| GeoError::InvalidResponse(e.to_string()))?;

        parse_save_ack(&body)
    }
}

pub fn reverse_url(base_url: &str, point: LatLng) -> String {
    format!(
        "{}/reverse?format=json&lat={}&lon={}&addressdetails=1",
        base_url.trim_end_matches('/'),
        point.lat,
        point.lng
    )
}

pub fn parse_reverse_response(body: &str, point: LatLng) -> GeoResult<AddressRecord> {
    let parsed: NominatimReverse =
        serde_json::from_str(body).map_err(|e| GeoError::InvalidResponse(e.to_string()))?;

    if let Some(error) = parsed.error {
        log::debug!("geocoder reported '{error}' for {point}");
        return Err(GeoError::NoAddress(point));
    }
    let address = parsed.address.ok_or(GeoError::NoAddress(point))?;

    Ok(AddressRecord {
        road: address.road,
        neighborhood: address.neighbourhood.or(address.suburb).or(address.village),
        city: address.city.or(address.town),
        house_number: address.house_number,
        state: address.state,
        postal_code: address.postcode,
        coordinates: point.to_string(),
    })
}

pub fn parse_save_ack(body: &str) -> GeoResult<SaveAck> {
    serde_json::from_str(body).map_err(|e| GeoError::InvalidResponse(e.to_string()))
}

fn map_ureq_error(error: ureq::Error) -> GeoError {
    match error {
        ureq::Error::Status(status, resp) => {
            let body = resp.into_string().unwrap_or_default();
            let message = parse_save_ack(&body).map(|ack| ack.message).unwrap_or(body);
            GeoError::Status { status, message }
        }
        ureq::Error::Transport(transport) => GeoError::Network(transport.to_string()),
    }
}
