use serde::{Deserialize, Serialize};

use crate::config::AppConfig;
use crate::detection::{DetectionResult, GeoPoint, HazardMarker};
use crate::geometry::{DisplayGeometry, NaturalSize};
use crate::media::{MediaKind, MediaSlot};
use crate::overlay::PaintOutcome;
use crate::pipeline::DetectionPipeline;
use crate::sync::{FrameSynchronizer, PlaybackState};
use crate::{AppError, UserFacingError};

#[derive(Debug, Default)]
pub struct Model {
    pub config: AppConfig,
    pub started: bool,

    pub media: MediaSlot,
    pub pipeline: DetectionPipeline,
    pub sync: FrameSynchronizer,

    /// Latest successful detection cycle; `None` after the media changes.
    pub result: Option<DetectionResult>,
    /// Size of the camera frame the live result was computed on.
    pub live_frame: Option<NaturalSize>,
    /// Last geometry the shell reported for the overlay surface.
    pub geometry: Option<DisplayGeometry>,
    pub last_paint: Option<PaintOutcome>,

    pub location: Option<GeoPoint>,
    pub location_error: Option<String>,
    pub watching_location: bool,

    pub markers: Vec<HazardMarker>,
    pub active_error: Option<AppError>,
}

impl Model {
    pub fn set_error(&mut self, error: AppError) {
        self.active_error = Some(error);
    }

    pub fn clear_error(&mut self) {
        self.active_error = None;
    }

    pub fn is_live(&self) -> bool {
        self.pipeline.is_polling()
    }

    /// Single-shot detection needs media, no request in flight and live mode off.
    pub fn can_detect(&self) -> bool {
        !self.media.is_empty() && !self.pipeline.is_busy() && !self.is_live()
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct MediaView {
    pub uri: String,
    pub kind: MediaKind,
    pub mime_type: String,
    pub natural_width: Option<u32>,
    pub natural_height: Option<u32>,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct DetectionView {
    pub class_name: String,
    pub confidence_percent: u8,
    pub timestamp: Option<f64>,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct LocationView {
    pub latitude: f64,
    pub longitude: f64,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct ViewModel {
    pub media: Option<MediaView>,
    pub detect_enabled: bool,
    pub detecting: bool,
    pub live_active: bool,
    pub playback: PlaybackState,
    pub detections: Vec<DetectionView>,
    pub location: Option<LocationView>,
    pub location_error: Option<String>,
    pub markers: Vec<HazardMarker>,
    pub error: Option<UserFacingError>,
    pub skipped_ticks: u64,
}
