//! Detection request bookkeeping and request/response plumbing.
//!
//! The pipeline owns at most one [`RequestSession`]. Single-shot requests are
//! refused while one is open; live poll ticks are skipped instead. Every
//! response and timeout carries the id of the session it was issued for and
//! is dropped when that session is no longer the open one.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use tracing::{debug, info, instrument};
use uuid::Uuid;

use crate::capabilities::{
    CameraError, CapturedImage, HttpError, HttpRequest, HttpResult, TimerId, ValidatedUrl,
};
use crate::config::ClassTable;
use crate::detection::{parse_response, GeoPoint, Normalized, PayloadError};
use crate::geometry::NaturalSize;
use crate::media::SelectedFile;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(Uuid);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionKind {
    SingleShot,
    Live,
}

/// Bookkeeping for one in-flight detection call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestSession {
    pub id: SessionId,
    pub kind: SessionKind,
    /// Id of the HTTP request once it has been issued.
    pub request_id: Option<String>,
    /// Timeout timer; single-shot sessions only.
    pub timer: Option<TimerId>,
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PipelineError {
    #[error("a {kind:?} detection request is already in flight")]
    SessionBusy { kind: SessionKind },

    #[error("no media selected")]
    NoMedia,

    #[error("live detection is running")]
    LiveActive,

    #[error("request failed: {0}")]
    Request(#[from] HttpError),

    #[error("detection service returned HTTP {status}")]
    Status { status: u16 },

    #[error("unreadable detection response: {0}")]
    Payload(#[from] PayloadError),

    #[error("frame capture failed: {0}")]
    Camera(#[from] CameraError),

    #[error("no response within {timeout_ms}ms")]
    TimedOut { timeout_ms: u64 },
}

impl PipelineError {
    pub fn is_retryable(&self) -> bool {
        match self {
            PipelineError::Request(e) => e.is_retryable(),
            PipelineError::Status { status } => *status >= 500 || *status == 429,
            PipelineError::Camera(e) => e.is_retryable(),
            PipelineError::TimedOut { .. } => true,
            PipelineError::SessionBusy { .. }
            | PipelineError::LiveActive
            | PipelineError::NoMedia
            | PipelineError::Payload(_) => false,
        }
    }
}

/// The live poll loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum PollTask {
    #[default]
    Stopped,
    Running {
        generation: u64,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// The tick belongs to a loop that has since been stopped or restarted.
    Stale,
    /// A request is still in flight; reschedule and wait.
    Skipped,
    /// Reschedule and start a capture.
    Ready,
}

#[derive(Debug, Default)]
pub struct DetectionPipeline {
    session: Option<RequestSession>,
    poll: PollTask,
    last_generation: u64,
    skipped_ticks: u64,
}

impl DetectionPipeline {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_busy(&self) -> bool {
        self.session.is_some()
    }

    pub fn session(&self) -> Option<&RequestSession> {
        self.session.as_ref()
    }

    pub fn is_open(&self, id: SessionId) -> bool {
        self.session.as_ref().is_some_and(|s| s.id == id)
    }

    /// Opens a session, or refuses when one is already open.
    pub fn open(&mut self, kind: SessionKind) -> Result<SessionId, PipelineError> {
        if let Some(open) = &self.session {
            return Err(PipelineError::SessionBusy { kind: open.kind });
        }
        let id = SessionId::new();
        self.session = Some(RequestSession {
            id,
            kind,
            request_id: None,
            timer: None,
        });
        debug!(session = %id, ?kind, "session opened");
        Ok(id)
    }

    /// Records the HTTP request (and timeout timer) issued for session `id`.
    pub fn attach(&mut self, id: SessionId, request_id: &str, timer: Option<TimerId>) {
        if let Some(session) = self.session.as_mut().filter(|s| s.id == id) {
            session.request_id = Some(request_id.to_string());
            session.timer = timer;
        }
    }

    /// Closes session `id` if it is the open one.
    pub fn settle(&mut self, id: SessionId) -> Option<RequestSession> {
        if self.is_open(id) {
            debug!(session = %id, "session settled");
            self.session.take()
        } else {
            None
        }
    }

    /// Closes whatever session is open.
    pub fn close(&mut self) -> Option<RequestSession> {
        self.session.take()
    }

    pub fn poll_task(&self) -> PollTask {
        self.poll
    }

    pub fn is_polling(&self) -> bool {
        matches!(self.poll, PollTask::Running { .. })
    }

    /// Starts a new poll generation. `None` when a loop is already running.
    pub fn start_polling(&mut self) -> Option<u64> {
        if self.is_polling() {
            return None;
        }
        self.last_generation += 1;
        self.poll = PollTask::Running {
            generation: self.last_generation,
        };
        info!(generation = self.last_generation, "live polling started");
        Some(self.last_generation)
    }

    /// Stops the loop and closes an open live session, whose late response
    /// will then be ignored.
    pub fn stop_polling(&mut self) -> Option<RequestSession> {
        if let PollTask::Running { generation } = self.poll {
            info!(generation, skipped = self.skipped_ticks, "live polling stopped");
        }
        self.poll = PollTask::Stopped;
        if self
            .session
            .as_ref()
            .is_some_and(|s| s.kind == SessionKind::Live)
        {
            self.session.take()
        } else {
            None
        }
    }

    pub fn tick(&mut self, generation: u64) -> TickOutcome {
        match self.poll {
            PollTask::Running { generation: current } if current == generation => {
                if self.session.is_some() {
                    self.skipped_ticks += 1;
                    TickOutcome::Skipped
                } else {
                    TickOutcome::Ready
                }
            }
            _ => TickOutcome::Stale,
        }
    }

    pub fn skipped_ticks(&self) -> u64 {
        self.skipped_ticks
    }
}

/// Body of a live-stream request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LiveFrameRequest {
    /// `data:<mime>;base64,<payload>`
    pub image: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latitude: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub longitude: Option<f64>,
}

impl LiveFrameRequest {
    pub fn new(frame: &CapturedImage, location: Option<GeoPoint>) -> Self {
        Self {
            image: data_url(frame.mime_type(), frame.data()),
            latitude: location.map(|p| p.latitude()),
            longitude: location.map(|p| p.longitude()),
        }
    }
}

pub fn data_url(mime_type: &str, bytes: &[u8]) -> String {
    format!("data:{mime_type};base64,{}", STANDARD.encode(bytes))
}

/// POSTs the selected file as `multipart/form-data` (field `file`), with the
/// location estimate as query parameters when one is known.
#[instrument(level = "debug", skip_all, fields(file = %file.name, bytes = file.bytes.len()))]
pub fn single_shot_request(
    url: &ValidatedUrl,
    file: &SelectedFile,
    mime_type: &str,
    location: Option<GeoPoint>,
    timeout_ms: u64,
) -> Result<HttpRequest, PipelineError> {
    let url = match location {
        Some(point) => url.with_query(&point.query_pairs())?,
        None => url.clone(),
    };
    let boundary = format!("----roadwatch-{}", Uuid::new_v4().simple());
    let body = multipart_body(&boundary, &file.name, mime_type, &file.bytes);

    Ok(HttpRequest::post(url)
        .with_header(
            "Content-Type",
            format!("multipart/form-data; boundary={boundary}"),
        )?
        .with_header("Accept", "application/json")?
        .with_body(body)?
        .with_timeout_ms(timeout_ms)?)
}

pub fn live_request(
    url: &ValidatedUrl,
    frame: &CapturedImage,
    location: Option<GeoPoint>,
) -> Result<HttpRequest, PipelineError> {
    Ok(HttpRequest::post(url.clone())
        .with_header("Accept", "application/json")?
        .with_json(&LiveFrameRequest::new(frame, location))?)
}

pub fn markers_request(url: &ValidatedUrl) -> Result<HttpRequest, PipelineError> {
    Ok(HttpRequest::get(url.clone()).with_header("Accept", "application/json")?)
}

/// Turns a transport result into normalized detections.
pub fn interpret_response(
    result: HttpResult,
    classes: &ClassTable,
    natural: Option<NaturalSize>,
) -> Result<Normalized, PipelineError> {
    let response = result?;
    if !response.is_success() {
        return Err(PipelineError::Status {
            status: response.status(),
        });
    }
    Ok(parse_response(response.body(), classes, natural)?)
}

fn multipart_body(boundary: &str, file_name: &str, mime_type: &str, bytes: &[u8]) -> Vec<u8> {
    let file_name: String = file_name
        .chars()
        .map(|c| match c {
            '"' | '\\' | '\r' | '\n' => '_',
            c => c,
        })
        .collect();
    let file_name = if file_name.is_empty() {
        "upload"
    } else {
        file_name.as_str()
    };

    let head = format!(
        "--{boundary}\r\n\
         Content-Disposition: form-data; name=\"file\"; filename=\"{file_name}\"\r\n\
         Content-Type: {mime_type}\r\n\r\n"
    );
    let tail = format!("\r\n--{boundary}--\r\n");

    let mut body = Vec::with_capacity(head.len() + bytes.len() + tail.len());
    body.extend_from_slice(head.as_bytes());
    body.extend_from_slice(bytes);
    body.extend_from_slice(tail.as_bytes());
    body
}
