use serde::{Deserialize, Serialize};

use crate::capabilities::{
    CameraResult, FrameSample, HttpResult, LocationError, LocationResult, TimerOutput,
};
use crate::config::AppConfig;
use crate::geometry::{DisplayGeometry, NaturalSize};
use crate::media::SelectedFile;
use crate::pipeline::SessionId;
use crate::sync::ChainId;

// --- Event enum: large variants boxed, capability callbacks hidden from shells ---

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub enum Event {
    Noop,

    // Lifecycle
    AppStarted {
        config: Option<Box<AppConfig>>,
    },
    Teardown,

    // Media
    FileSelected(Box<SelectedFile>),
    MediaDecoded {
        width: u32,
        height: u32,
    },

    // Overlay surface
    SurfaceResized(DisplayGeometry),
    #[serde(skip)]
    SurfaceMeasured(DisplayGeometry),

    // Single-shot detection
    DetectRequested,
    #[serde(skip)]
    DetectResponse {
        session: SessionId,
        result: Box<HttpResult>,
    },
    #[serde(skip)]
    DetectTimedOut {
        session: SessionId,
    },

    // Live detection
    LiveStarted,
    LiveStopped,
    #[serde(skip)]
    PollTick {
        generation: u64,
    },
    #[serde(skip)]
    FrameCaptured {
        session: SessionId,
        result: Box<CameraResult>,
    },
    #[serde(skip)]
    LiveResponse {
        session: SessionId,
        frame: NaturalSize,
        result: Box<HttpResult>,
    },

    // Video playback
    PlaybackStarted,
    PlaybackPaused,
    PlaybackEnded,
    PlaybackSeeked(FrameSample),
    #[serde(skip)]
    FrameTick {
        chain: ChainId,
        sample: FrameSample,
    },

    // Location
    LocationUpdated {
        latitude: f64,
        longitude: f64,
    },
    LocationFailed {
        error: LocationError,
    },
    #[serde(skip)]
    LocationFix(LocationResult),

    // Map markers
    MarkersRefreshRequested,
    #[serde(skip)]
    MarkersResponse(Box<HttpResult>),

    DismissError,
}

impl Event {
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Noop => "noop",
            Self::AppStarted { .. } => "app_started",
            Self::Teardown => "teardown",
            Self::FileSelected(_) => "file_selected",
            Self::MediaDecoded { .. } => "media_decoded",
            Self::SurfaceResized(_) => "surface_resized",
            Self::SurfaceMeasured(_) => "surface_measured",
            Self::DetectRequested => "detect_requested",
            Self::DetectResponse { .. } => "detect_response",
            Self::DetectTimedOut { .. } => "detect_timed_out",
            Self::LiveStarted => "live_started",
            Self::LiveStopped => "live_stopped",
            Self::PollTick { .. } => "poll_tick",
            Self::FrameCaptured { .. } => "frame_captured",
            Self::LiveResponse { .. } => "live_response",
            Self::PlaybackStarted => "playback_started",
            Self::PlaybackPaused => "playback_paused",
            Self::PlaybackEnded => "playback_ended",
            Self::PlaybackSeeked(_) => "playback_seeked",
            Self::FrameTick { .. } => "frame_tick",
            Self::LocationUpdated { .. } => "location_updated",
            Self::LocationFailed { .. } => "location_failed",
            Self::LocationFix(_) => "location_fix",
            Self::MarkersRefreshRequested => "markers_refresh_requested",
            Self::MarkersResponse(_) => "markers_response",
            Self::DismissError => "dismiss_error",
        }
    }

    /// Events fired at display or timer rate; logged at trace level only.
    #[must_use]
    pub const fn is_high_frequency(&self) -> bool {
        matches!(
            self,
            Self::PollTick { .. } | Self::FrameTick { .. } | Self::SurfaceMeasured(_)
        )
    }

    /// Maps a fired timer to `event`; a cancelled timer produces nothing.
    pub(crate) fn on_fired(output: TimerOutput, event: Self) -> Self {
        match output {
            TimerOutput::Fired => event,
            TimerOutput::Cancelled => Self::Noop,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cancelled_timers_become_noop() {
        let session = SessionId::new();
        assert_eq!(
            Event::on_fired(TimerOutput::Cancelled, Event::DetectTimedOut { session }),
            Event::Noop
        );
        assert_eq!(
            Event::on_fired(TimerOutput::Fired, Event::DetectTimedOut { session }),
            Event::DetectTimedOut { session }
        );
    }

    #[test]
    fn capability_callbacks_are_hidden_from_shells() {
        let session = SessionId::new();
        let internal = Event::DetectTimedOut { session };
        assert!(serde_json::to_string(&internal).is_err());
        assert!(serde_json::to_string(&Event::DetectRequested).is_ok());
    }

    #[test]
    fn shell_events_round_trip_through_json() {
        let json = serde_json::to_string(&Event::MediaDecoded {
            width: 1920,
            height: 1080,
        })
        .unwrap();
        let back: Event = serde_json::from_str(&json).unwrap();
        assert_eq!(back.name(), "media_decoded");
    }
}
