#![forbid(unsafe_code)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::too_many_lines)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::must_use_candidate)]

pub mod app;
pub mod capabilities;
pub mod config;
pub mod detection;
pub mod event;
pub mod geometry;
pub mod media;
pub mod model;
pub mod overlay;
pub mod pipeline;
pub mod sync;

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

pub use app::App;
pub use capabilities::{Capabilities, Effect};
pub use config::{AppConfig, ClassTable, OverlayStyle, Rgb};
pub use crux_core::{render::Render, App as CruxApp};
pub use detection::{Detection, DetectionResult, GeoPoint, HazardMarker};
pub use event::Event;
pub use geometry::{DisplayBox, DisplayGeometry, NaturalSize, SourceBox};
pub use model::{Model, ViewModel};

use capabilities::HttpError;
use config::ConfigError;
use media::MediaError;
use pipeline::PipelineError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorSeverity {
    /// Retrying the same action may succeed.
    Transient,
    /// The user (or the shell) must change something first.
    Permanent,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    UnsupportedMediaType,
    RequestTimeout,
    DetectionRequestFailed,
    MalformedDetectionPayload,
    SessionBusy,
    NoMedia,
    InvalidConfig,
    Camera,
    Location,
}

impl ErrorKind {
    #[must_use]
    pub const fn code(self) -> &'static str {
        match self {
            Self::UnsupportedMediaType => "UNSUPPORTED_MEDIA_TYPE",
            Self::RequestTimeout => "REQUEST_TIMEOUT",
            Self::DetectionRequestFailed => "DETECTION_REQUEST_FAILED",
            Self::MalformedDetectionPayload => detection::MALFORMED_PAYLOAD_CODE,
            Self::SessionBusy => "SESSION_BUSY",
            Self::NoMedia => "NO_MEDIA",
            Self::InvalidConfig => "INVALID_CONFIG",
            Self::Camera => "CAMERA_ERROR",
            Self::Location => "LOCATION_ERROR",
        }
    }

    #[must_use]
    pub const fn default_severity(self) -> ErrorSeverity {
        match self {
            Self::RequestTimeout | Self::DetectionRequestFailed | Self::Camera | Self::Location => {
                ErrorSeverity::Transient
            }

            Self::UnsupportedMediaType
            | Self::MalformedDetectionPayload
            | Self::SessionBusy
            | Self::NoMedia
            | Self::InvalidConfig => ErrorSeverity::Permanent,
        }
    }

    #[must_use]
    pub const fn is_retryable(self) -> bool {
        matches!(
            self,
            Self::RequestTimeout | Self::DetectionRequestFailed | Self::Camera | Self::Location
        )
    }

    /// Whether the error is shown to the user. The rest are only logged.
    #[must_use]
    pub const fn is_user_facing(self) -> bool {
        matches!(
            self,
            Self::UnsupportedMediaType | Self::RequestTimeout | Self::DetectionRequestFailed
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AppError {
    pub kind: ErrorKind,
    pub severity: ErrorSeverity,
    pub message: String,
    pub internal_message: Option<String>,
    pub context: HashMap<String, String>,
}

impl AppError {
    #[must_use]
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            severity: kind.default_severity(),
            message: message.into(),
            internal_message: None,
            context: HashMap::new(),
        }
    }

    #[must_use]
    pub fn with_internal(mut self, internal: impl Into<String>) -> Self {
        self.internal_message = Some(internal.into());
        self
    }

    #[must_use]
    pub fn with_context(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }

    #[must_use]
    pub const fn code(&self) -> &'static str {
        self.kind.code()
    }

    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        self.kind.is_retryable()
    }

    #[must_use]
    pub fn user_facing_message(&self) -> String {
        match self.kind {
            ErrorKind::UnsupportedMediaType => self.message.clone(),
            ErrorKind::RequestTimeout => {
                "The detection service did not answer in time. Please try again.".into()
            }
            ErrorKind::DetectionRequestFailed => {
                "Detection failed. Check your connection and try again.".into()
            }
            ErrorKind::NoMedia => "Choose a photo or video first.".into(),
            ErrorKind::SessionBusy => "Detection is already running.".into(),
            ErrorKind::Camera => "The camera is not available.".into(),
            ErrorKind::Location => "Unable to determine your location.".into(),
            ErrorKind::MalformedDetectionPayload | ErrorKind::InvalidConfig => {
                "An unexpected error occurred.".into()
            }
        }
    }
}

impl std::fmt::Display for AppError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] {}", self.code(), self.message)?;
        if let Some(internal) = &self.internal_message {
            write!(f, " (internal: {internal})")?;
        }
        Ok(())
    }
}

impl std::error::Error for AppError {}

impl From<MediaError> for AppError {
    fn from(e: MediaError) -> Self {
        AppError::new(ErrorKind::UnsupportedMediaType, e.to_string())
    }
}

impl From<ConfigError> for AppError {
    fn from(e: ConfigError) -> Self {
        AppError::new(ErrorKind::InvalidConfig, e.to_string())
    }
}

impl From<PipelineError> for AppError {
    fn from(e: PipelineError) -> Self {
        let kind = match &e {
            PipelineError::SessionBusy { .. } | PipelineError::LiveActive => ErrorKind::SessionBusy,
            PipelineError::NoMedia => ErrorKind::NoMedia,
            PipelineError::TimedOut { .. } | PipelineError::Request(HttpError::Timeout { .. }) => {
                ErrorKind::RequestTimeout
            }
            PipelineError::Camera(_) => ErrorKind::Camera,
            PipelineError::Request(_) | PipelineError::Status { .. } | PipelineError::Payload(_) => {
                ErrorKind::DetectionRequestFailed
            }
        };
        let error = AppError::new(kind, e.to_string());
        match e {
            PipelineError::Status { status } => error.with_context("http_status", status.to_string()),
            _ => error,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct UserFacingError {
    pub message: String,
    pub is_transient: bool,
    pub is_retryable: bool,
    pub error_code: String,
}

impl From<&AppError> for UserFacingError {
    fn from(e: &AppError) -> Self {
        Self {
            message: e.user_facing_message(),
            is_transient: e.severity == ErrorSeverity::Transient,
            is_retryable: e.is_retryable(),
            error_code: e.code().to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pipeline_errors_map_to_kinds() {
        let timeout: AppError = PipelineError::TimedOut { timeout_ms: 30_000 }.into();
        assert_eq!(timeout.kind, ErrorKind::RequestTimeout);
        assert!(timeout.is_retryable());
        assert_eq!(timeout.severity, ErrorSeverity::Transient);

        let status: AppError = PipelineError::Status { status: 500 }.into();
        assert_eq!(status.kind, ErrorKind::DetectionRequestFailed);
        assert_eq!(status.context.get("http_status").map(String::as_str), Some("500"));

        let transport: AppError = PipelineError::Request(HttpError::Connection {
            message: "refused".into(),
        })
        .into();
        assert_eq!(transport.code(), "DETECTION_REQUEST_FAILED");
    }

    #[test]
    fn transport_deadline_reports_as_timeout() {
        let error: AppError = PipelineError::Request(HttpError::Timeout {
            timeout_ms: 30_000,
            request_id: "detect-1".into(),
        })
        .into();
        assert_eq!(error.kind, ErrorKind::RequestTimeout);
        let view = UserFacingError::from(&error);
        assert_eq!(view.error_code, "REQUEST_TIMEOUT");
        assert!(view.is_retryable);
    }

    #[test]
    fn unsupported_media_keeps_its_message() {
        let error: AppError = MediaError::UnsupportedMediaType {
            mime_type: "application/pdf".into(),
        }
        .into();
        let view = UserFacingError::from(&error);
        assert!(view.message.contains("application/pdf"));
        assert!(!view.is_retryable);
        assert_eq!(view.error_code, "UNSUPPORTED_MEDIA_TYPE");
    }

    #[test]
    fn only_actionable_errors_are_user_facing() {
        assert!(ErrorKind::RequestTimeout.is_user_facing());
        assert!(!ErrorKind::MalformedDetectionPayload.is_user_facing());
        assert!(!ErrorKind::SessionBusy.is_user_facing());
        assert_eq!(
            ErrorKind::MalformedDetectionPayload.code(),
            "MALFORMED_DETECTION_PAYLOAD"
        );
    }

    #[test]
    fn display_includes_code_and_internal_detail() {
        let error = AppError::new(ErrorKind::InvalidConfig, "bad").with_internal("poll_interval_ms");
        assert_eq!(error.to_string(), "[INVALID_CONFIG] bad (internal: poll_interval_ms)");
    }
}
