//! Immutable runtime configuration.
//!
//! The shell may hand a JSON document to `Event::AppStarted`; every field is
//! optional and falls back to the defaults below. Once the app has started the
//! configuration is never mutated.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use thiserror::Error;

use crate::capabilities::{HttpError, ValidatedUrl, MAX_TIMEOUT_MS};

pub const DEFAULT_API_BASE: &str = "http://localhost:8000";
pub const DEFAULT_DETECT_PATH: &str = "/detect/";
pub const DEFAULT_LIVE_PATH: &str = "/live-stream";
pub const DEFAULT_LOCATIONS_PATH: &str = "/locations/";
pub const DEFAULT_DETECT_TIMEOUT_MS: u64 = 30_000;
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 100;
pub const DEFAULT_VIDEO_FRAME_RATE: f64 = 30.0;
pub const DEFAULT_LIVE_JPEG_QUALITY: u8 = 85;
pub const MIN_POLL_INTERVAL_MS: u64 = 16;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("config is not valid JSON: {0}")]
    Parse(String),

    #[error("invalid endpoint: {0}")]
    Endpoint(#[from] HttpError),

    #[error("invalid value for {field}: {reason}")]
    InvalidValue { field: &'static str, reason: String },
}

/// 8-bit RGB color, serialized as `#RRGGBB`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Rgb(pub u8, pub u8, pub u8);

impl Rgb {
    pub const RED: Self = Self(0xFF, 0x00, 0x00);

    pub fn parse_hex(s: &str) -> Option<Self> {
        let hex = s.strip_prefix('#')?;
        if hex.len() != 6 || !hex.is_ascii() {
            return None;
        }
        let channel = |i: usize| u8::from_str_radix(&hex[i..i + 2], 16).ok();
        Some(Self(channel(0)?, channel(2)?, channel(4)?))
    }
}

impl fmt::Display for Rgb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{:02X}{:02X}{:02X}", self.0, self.1, self.2)
    }
}

impl Serialize for Rgb {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Rgb {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Rgb::parse_hex(&s)
            .ok_or_else(|| serde::de::Error::custom(format!("invalid color '{s}', expected #RRGGBB")))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassInfo {
    pub id: u32,
    pub name: String,
    pub color: Rgb,
}

/// Class id → display name and stroke color.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClassTable(Vec<ClassInfo>);

impl ClassTable {
    pub fn new(classes: Vec<ClassInfo>) -> Self {
        Self(classes)
    }

    pub fn get(&self, id: u32) -> Option<&ClassInfo> {
        self.0.iter().find(|c| c.id == id)
    }

    pub fn by_name(&self, name: &str) -> Option<&ClassInfo> {
        let name = name.trim();
        self.0.iter().find(|c| c.name.eq_ignore_ascii_case(name))
    }

    pub fn name_of(&self, id: u32) -> Option<&str> {
        self.get(id).map(|c| c.name.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = &ClassInfo> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl Default for ClassTable {
    fn default() -> Self {
        Self(vec![
            ClassInfo {
                id: 0,
                name: "Pothole".into(),
                color: Rgb::RED,
            },
            ClassInfo {
                id: 1,
                name: "Crack".into(),
                color: Rgb(0xFF, 0xA5, 0x00),
            },
            ClassInfo {
                id: 2,
                name: "Open Manhole".into(),
                color: Rgb(0x1E, 0x90, 0xFF),
            },
        ])
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OverlayStyle {
    pub line_width: f64,
    pub font_px: u16,
    /// Distance between the box top and the label baseline when the label
    /// sits above the box.
    pub label_gap_px: f64,
    /// Boxes whose top is at or within this distance of the surface top get
    /// their label flipped below the top edge.
    pub label_flip_threshold_px: f64,
    pub fallback_color: Rgb,
}

impl Default for OverlayStyle {
    fn default() -> Self {
        Self {
            line_width: 2.0,
            font_px: 18,
            label_gap_px: 5.0,
            label_flip_threshold_px: 10.0,
            fallback_color: Rgb(0xFF, 0xFF, 0x00),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub api_base: String,
    pub detect_path: String,
    pub live_path: String,
    pub locations_path: String,
    pub detect_timeout_ms: u64,
    pub poll_interval_ms: u64,
    pub video_frame_rate: f64,
    pub live_jpeg_quality: u8,
    pub overlay: OverlayStyle,
    pub classes: ClassTable,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            api_base: DEFAULT_API_BASE.into(),
            detect_path: DEFAULT_DETECT_PATH.into(),
            live_path: DEFAULT_LIVE_PATH.into(),
            locations_path: DEFAULT_LOCATIONS_PATH.into(),
            detect_timeout_ms: DEFAULT_DETECT_TIMEOUT_MS,
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
            video_frame_rate: DEFAULT_VIDEO_FRAME_RATE,
            live_jpeg_quality: DEFAULT_LIVE_JPEG_QUALITY,
            overlay: OverlayStyle::default(),
            classes: ClassTable::default(),
        }
    }
}

impl AppConfig {
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: Self =
            serde_json::from_str(json).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.detect_url()?;
        self.live_url()?;
        self.locations_url()?;

        if self.detect_timeout_ms == 0 || self.detect_timeout_ms > MAX_TIMEOUT_MS {
            return Err(ConfigError::InvalidValue {
                field: "detect_timeout_ms",
                reason: format!("must be in 1..={MAX_TIMEOUT_MS}"),
            });
        }
        if self.poll_interval_ms < MIN_POLL_INTERVAL_MS {
            return Err(ConfigError::InvalidValue {
                field: "poll_interval_ms",
                reason: format!("must be at least {MIN_POLL_INTERVAL_MS}ms"),
            });
        }
        if !self.video_frame_rate.is_finite() || self.video_frame_rate <= 0.0 {
            return Err(ConfigError::InvalidValue {
                field: "video_frame_rate",
                reason: format!("{} is not a positive frame rate", self.video_frame_rate),
            });
        }
        if self.live_jpeg_quality == 0 || self.live_jpeg_quality > 100 {
            return Err(ConfigError::InvalidValue {
                field: "live_jpeg_quality",
                reason: "must be in 1..=100".into(),
            });
        }
        let mut seen = std::collections::HashSet::new();
        if let Some(dup) = self.classes.iter().find(|c| !seen.insert(c.id)) {
            return Err(ConfigError::InvalidValue {
                field: "classes",
                reason: format!("duplicate class id {}", dup.id),
            });
        }
        Ok(())
    }

    pub fn detect_url(&self) -> Result<ValidatedUrl, ConfigError> {
        Ok(ValidatedUrl::join(&self.api_base, &self.detect_path)?)
    }

    pub fn live_url(&self) -> Result<ValidatedUrl, ConfigError> {
        Ok(ValidatedUrl::join(&self.api_base, &self.live_path)?)
    }

    pub fn locations_url(&self) -> Result<ValidatedUrl, ConfigError> {
        Ok(ValidatedUrl::join(&self.api_base, &self.locations_path)?)
    }

    pub fn detect_timeout(&self) -> Duration {
        Duration::from_millis(self.detect_timeout_ms)
    }

    /// One video frame, in seconds.
    pub fn frame_window(&self) -> f64 {
        1.0 / self.video_frame_rate
    }
}
