//! Detection results and lenient parsing of detection-service payloads.
//!
//! The service is an external collaborator and its payloads are not trusted:
//! every field is validated and, when unusable, replaced by a safe default.
//! Only a body that is not JSON at all is rejected.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::{instrument, warn};

use crate::config::ClassTable;
use crate::geometry::{NaturalSize, SourceBox};

pub const MALFORMED_PAYLOAD_CODE: &str = "MALFORMED_DETECTION_PAYLOAD";
pub const UNKNOWN_CLASS_NAME: &str = "unknown";

#[derive(Debug, Clone, Error, PartialEq)]
pub enum GeoError {
    #[error("latitude must be between -90 and 90, got {0}")]
    Latitude(f64),

    #[error("longitude must be between -180 and 180, got {0}")]
    Longitude(f64),
}

/// A validated WGS84 coordinate.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawGeoPoint")]
pub struct GeoPoint {
    latitude: f64,
    longitude: f64,
}

#[derive(Deserialize)]
struct RawGeoPoint {
    latitude: f64,
    longitude: f64,
}

impl TryFrom<RawGeoPoint> for GeoPoint {
    type Error = GeoError;

    fn try_from(raw: RawGeoPoint) -> Result<Self, Self::Error> {
        GeoPoint::new(raw.latitude, raw.longitude)
    }
}

impl GeoPoint {
    pub fn new(latitude: f64, longitude: f64) -> Result<Self, GeoError> {
        // NaN fails `contains`, so no separate check is needed.
        if !(-90.0..=90.0).contains(&latitude) {
            return Err(GeoError::Latitude(latitude));
        }
        if !(-180.0..=180.0).contains(&longitude) {
            return Err(GeoError::Longitude(longitude));
        }
        Ok(Self {
            latitude,
            longitude,
        })
    }

    pub fn latitude(&self) -> f64 {
        self.latitude
    }

    pub fn longitude(&self) -> f64 {
        self.longitude
    }

    /// `latitude`/`longitude` query pairs for the detection endpoint.
    pub fn query_pairs(&self) -> [(&'static str, String); 2] {
        [
            ("latitude", self.latitude.to_string()),
            ("longitude", self.longitude.to_string()),
        ]
    }
}

/// One classified, localized hazard.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    pub class_id: Option<u32>,
    pub class_name: String,
    /// In `[0, 1]`.
    pub confidence: f64,
    /// Source-pixel space, ordered and non-negative.
    pub bbox: SourceBox,
    /// Seconds from the start of the video; absent for still images.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<f64>,
}

impl Detection {
    pub fn new(class_id: u32, class_name: impl Into<String>, confidence: f64, bbox: SourceBox) -> Self {
        Self {
            class_id: Some(class_id),
            class_name: class_name.into(),
            confidence: confidence.clamp(0.0, 1.0),
            bbox,
            timestamp: None,
        }
    }

    #[must_use]
    pub fn at(mut self, timestamp: f64) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    /// Confidence as a whole percentage, rounded half away from zero.
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    pub fn confidence_percent(&self) -> u8 {
        (self.confidence.clamp(0.0, 1.0) * 100.0).round() as u8
    }
}

/// Everything one request/response cycle produced. Replaced wholesale by the
/// next successful cycle.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DetectionResult {
    pub detections: Vec<Detection>,
    pub geolocation: Option<GeoPoint>,
}

impl DetectionResult {
    pub fn new(detections: Vec<Detection>) -> Self {
        Self {
            detections,
            geolocation: None,
        }
    }

    pub fn len(&self) -> usize {
        self.detections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.detections.is_empty()
    }
}

/// Counts of fields that had to be repaired while normalizing a payload.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NormalizationReport {
    /// Missing or unusable fields replaced by a default.
    pub defaulted: usize,
    /// Values that were usable but out of range.
    pub clamped: usize,
}

impl NormalizationReport {
    pub fn is_clean(&self) -> bool {
        self.defaulted == 0 && self.clamped == 0
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Normalized {
    pub result: DetectionResult,
    pub report: NormalizationReport,
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PayloadError {
    #[error("response body is not valid JSON: {0}")]
    InvalidJson(String),
}

/// Parses a detection-service response body.
///
/// Fails only when the body is not JSON. Any structural problem inside the
/// document is repaired, counted, and logged under
/// [`MALFORMED_PAYLOAD_CODE`].
#[instrument(level = "debug", skip_all, fields(bytes = body.len()))]
pub fn parse_response(
    body: &[u8],
    classes: &ClassTable,
    natural: Option<NaturalSize>,
) -> Result<Normalized, PayloadError> {
    let value: Value =
        serde_json::from_slice(body).map_err(|e| PayloadError::InvalidJson(e.to_string()))?;
    let normalized = normalize_response(&value, classes, natural);

    if !normalized.report.is_clean() {
        warn!(
            code = MALFORMED_PAYLOAD_CODE,
            defaulted = normalized.report.defaulted,
            clamped = normalized.report.clamped,
            detections = normalized.result.len(),
            "detection payload repaired"
        );
    }
    Ok(normalized)
}

/// Normalizes an already-parsed payload. Never fails.
pub fn normalize_response(
    value: &Value,
    classes: &ClassTable,
    natural: Option<NaturalSize>,
) -> Normalized {
    let mut report = NormalizationReport::default();
    let natural = natural.filter(|n| n.is_known());

    let (raw_detections, object) = match value {
        Value::Object(map) => (map.get("detections"), Some(map)),
        // A bare list is accepted as the detection list itself.
        Value::Array(_) => (Some(value), None),
        _ => {
            report.defaulted += 1;
            (None, None)
        }
    };

    let detections = match raw_detections {
        Some(Value::Array(items)) => items
            .iter()
            .map(|item| normalize_detection(item, classes, natural, &mut report))
            .collect(),
        // The service omits the list entirely when nothing was found.
        None | Some(Value::Null) => Vec::new(),
        Some(_) => {
            report.defaulted += 1;
            Vec::new()
        }
    };

    let geolocation = object.and_then(|map| geolocation_of(map, &mut report));

    Normalized {
        result: DetectionResult {
            detections,
            geolocation,
        },
        report,
    }
}

fn normalize_detection(
    value: &Value,
    classes: &ClassTable,
    natural: Option<NaturalSize>,
    report: &mut NormalizationReport,
) -> Detection {
    let empty = Map::new();
    let fields = value.as_object().unwrap_or_else(|| {
        report.defaulted += 1;
        &empty
    });

    let raw_name = fields
        .get("class_name")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|name| !name.is_empty());

    let class_id = match fields.get("class_id") {
        None | Some(Value::Null) => None,
        Some(raw) => {
            let id = as_class_id(raw);
            if id.is_none() {
                report.defaulted += 1;
            }
            id
        }
    }
    .or_else(|| raw_name.and_then(|name| classes.by_name(name)).map(|c| c.id));

    let class_name = match raw_name {
        Some(name) => name.to_string(),
        None => match class_id.and_then(|id| classes.name_of(id)) {
            Some(name) => name.to_string(),
            None => {
                report.defaulted += 1;
                UNKNOWN_CLASS_NAME.to_string()
            }
        },
    };

    let confidence = match fields.get("confidence").and_then(as_number) {
        Some(c) => {
            let clamped = c.clamp(0.0, 1.0);
            if clamped != c {
                report.clamped += 1;
            }
            clamped
        }
        None => {
            report.defaulted += 1;
            0.0
        }
    };

    let bbox = match fields.get("bbox").and_then(as_box) {
        Some(raw) => {
            let bounded = match natural {
                Some(n) => raw.clamped(n),
                None => raw.ordered(),
            };
            if bounded != raw {
                report.clamped += 1;
            }
            bounded
        }
        None => {
            report.defaulted += 1;
            SourceBox::ZERO
        }
    };

    let timestamp = match fields.get("timestamp") {
        None | Some(Value::Null) => None,
        Some(raw) => {
            let ts = as_number(raw).filter(|t| *t >= 0.0);
            if ts.is_none() {
                report.defaulted += 1;
            }
            ts
        }
    };

    Detection {
        class_id,
        class_name,
        confidence,
        bbox,
        timestamp,
    }
}

fn geolocation_of(map: &Map<String, Value>, report: &mut NormalizationReport) -> Option<GeoPoint> {
    let source = match map.get("location") {
        Some(Value::Object(inner)) => inner,
        _ => map,
    };
    let lat = source.get("latitude").filter(|v| !v.is_null());
    let lng = source.get("longitude").filter(|v| !v.is_null());
    if lat.is_none() && lng.is_none() {
        return None;
    }

    let point = lat
        .and_then(as_number)
        .zip(lng.and_then(as_number))
        .and_then(|(lat, lng)| GeoPoint::new(lat, lng).ok());
    if point.is_none() {
        report.defaulted += 1;
    }
    point
}

/// Finite number, or a string holding one.
fn as_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
    .filter(|n| n.is_finite())
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn as_class_id(value: &Value) -> Option<u32> {
    if let Some(id) = value.as_u64() {
        return u32::try_from(id).ok();
    }
    let n = as_number(value)?;
    if n >= 0.0 && n.fract() == 0.0 && n <= f64::from(u32::MAX) {
        Some(n as u32)
    } else {
        None
    }
}

fn as_box(value: &Value) -> Option<SourceBox> {
    match value.as_array()?.as_slice() {
        [x1, y1, x2, y2] => Some(SourceBox::new(
            x1.as_f64()?,
            y1.as_f64()?,
            x2.as_f64()?,
            y2.as_f64()?,
        ))
        .filter(SourceBox::is_finite),
        _ => None,
    }
}

/// A previously reported hazard, shown on the map.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HazardMarker {
    pub class_name: String,
    pub latitude: f64,
    pub longitude: f64,
}

/// Parses the locations store listing.
///
/// Each entry is either a flat marker (`class_name` plus coordinates, at the
/// top level or under `location`) or a stored detection record, which yields
/// one marker per detection. Entries without valid coordinates are dropped.
#[instrument(level = "debug", skip_all, fields(bytes = body.len()))]
pub fn parse_markers(body: &[u8]) -> Result<Vec<HazardMarker>, PayloadError> {
    let value: Value =
        serde_json::from_slice(body).map_err(|e| PayloadError::InvalidJson(e.to_string()))?;
    let entries = match &value {
        Value::Array(items) => items.as_slice(),
        Value::Object(map) => match map.get("locations") {
            Some(Value::Array(items)) => items.as_slice(),
            _ => std::slice::from_ref(&value),
        },
        _ => &[],
    };

    let mut markers = Vec::new();
    let mut dropped = 0usize;
    for entry in entries {
        let Some(map) = entry.as_object() else {
            dropped += 1;
            continue;
        };
        let mut scratch = NormalizationReport::default();
        let Some(point) = geolocation_of(map, &mut scratch) else {
            dropped += 1;
            continue;
        };

        let names: Vec<String> = match map.get("detections") {
            Some(Value::Array(items)) => items
                .iter()
                .map(|d| marker_name(d.get("class_name")))
                .collect(),
            _ => vec![marker_name(map.get("class_name"))],
        };
        markers.extend(names.into_iter().map(|class_name| HazardMarker {
            class_name,
            latitude: point.latitude(),
            longitude: point.longitude(),
        }));
    }

    if dropped > 0 {
        warn!(code = MALFORMED_PAYLOAD_CODE, dropped, "location entries without coordinates");
    }
    Ok(markers)
}

fn marker_name(value: Option<&Value>) -> String {
    value
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .unwrap_or(UNKNOWN_CLASS_NAME)
        .to_string()
}
