use tracing::{debug, error, info, trace, warn};

use crate::capabilities::{
    CameraResult, Capabilities, CaptureConfig, HttpResult, LocationError, LocationResult,
    TimerId, WatchOptions,
};
use crate::config::AppConfig;
use crate::detection::{parse_markers, Detection, GeoPoint};
use crate::event::Event;
use crate::geometry::{DisplayGeometry, NaturalSize};
use crate::media::{MediaKind, SelectedFile};
use crate::model::{DetectionView, LocationView, MediaView, Model, ViewModel};
use crate::overlay::{DisplayList, LabelMode, OverlayRenderer, PaintOutcome};
use crate::pipeline::{
    interpret_response, live_request, markers_request, single_shot_request, PipelineError,
    RequestSession, SessionId, SessionKind, TickOutcome,
};
use crate::sync::{active_detections, ChainId};
use crate::{AppError, ErrorKind, UserFacingError};

#[derive(Default)]
pub struct App;

impl App {
    // --- Lifecycle ---

    fn start(config: Option<Box<AppConfig>>, model: &mut Model, caps: &Capabilities) {
        if model.started {
            warn!("app already started, ignoring new configuration");
            return;
        }

        let config = config.map_or_else(AppConfig::default, |config| *config);
        model.config = match config.validate() {
            Ok(()) => config,
            Err(e) => {
                let err = AppError::from(e);
                error!(code = err.code(), error = %err, "invalid configuration, using defaults");
                AppConfig::default()
            }
        };
        model.started = true;
        info!(api_base = %model.config.api_base, "detection core started");

        model.watching_location = true;
        caps.location.watch(WatchOptions::default(), Event::LocationFix);
        Self::request_markers(model, caps);
        caps.render.render();
    }

    fn teardown(model: &mut Model, caps: &Capabilities) {
        if model.pipeline.is_polling() {
            model.pipeline.stop_polling();
            caps.camera.stop_stream();
        }
        if let Some(session) = model.pipeline.close() {
            Self::cancel_session(&session, caps);
        }
        if let Some(chain) = model.sync.stop() {
            caps.frames.cancel(chain);
        }
        if model.media.release(&caps.resources) {
            debug!("media resource released");
        }
        if model.watching_location {
            caps.location.clear_watch();
            model.watching_location = false;
        }
        model.result = None;
        model.live_frame = None;
        info!("detection core torn down");
        caps.render.render();
    }

    // --- Media ---

    fn select_file(file: SelectedFile, model: &mut Model, caps: &Capabilities) {
        let name = file.name.clone();
        match model.media.select(file, &caps.resources).map(|handle| handle.kind) {
            Ok(kind) => {
                info!(file = %name, ?kind, "media selected");
                model.clear_error();
                model.result = None;
                Self::abandon_single_shot(model, caps);
                if let Some(chain) = model.sync.stop() {
                    caps.frames.cancel(chain);
                }
                Self::request_repaint(caps);
            }
            Err(e) => {
                let err = AppError::from(e);
                warn!(file = %name, code = err.code(), error = %err, "media rejected");
                model.set_error(err);
            }
        }
        caps.render.render();
    }

    fn media_decoded(width: u32, height: u32, model: &mut Model, caps: &Capabilities) {
        if model.media.set_natural_size(NaturalSize::new(width, height)) {
            debug!(width, height, "natural size known");
            Self::request_repaint(caps);
        } else {
            debug!("decode report without media");
        }
        caps.render.render();
    }

    // --- Overlay ---

    fn request_repaint(caps: &Capabilities) {
        caps.canvas.measure(Event::SurfaceMeasured);
    }

    fn surface_changed(geometry: DisplayGeometry, model: &mut Model, caps: &Capabilities) {
        // A running playback chain paints on its next frame.
        if model.sync.is_playing() && !model.is_live() {
            model.geometry = Some(geometry);
            return;
        }
        Self::paint(geometry, model, caps);
    }

    fn renderer(config: &AppConfig, mode: LabelMode) -> OverlayRenderer<'_> {
        OverlayRenderer::new(&config.classes, &config.overlay, mode)
    }

    fn paint(geometry: DisplayGeometry, model: &mut Model, caps: &Capabilities) {
        model.geometry = Some(geometry);

        let config = &model.config;
        let detections: &[Detection] = model
            .result
            .as_ref()
            .map(|result| result.detections.as_slice())
            .unwrap_or_default();

        let mut list = DisplayList::new();
        let outcome = if model.pipeline.is_polling() {
            Self::renderer(config, LabelMode::WithConfidence).paint(
                &mut list,
                detections,
                model.live_frame,
                geometry,
            )
        } else {
            match model.media.kind() {
                Some(MediaKind::Image) => Self::renderer(config, LabelMode::WithConfidence).paint(
                    &mut list,
                    detections,
                    model.media.natural_size(),
                    geometry,
                ),
                Some(MediaKind::Video) => {
                    let active = model
                        .sync
                        .last_time()
                        .map(|t| active_detections(detections, t, config.frame_window()));
                    Self::renderer(config, LabelMode::NameOnly).paint(
                        &mut list,
                        active.into_iter().flatten(),
                        model.media.natural_size(),
                        geometry,
                    )
                }
                None => {
                    list = DisplayList::cleared(geometry);
                    PaintOutcome::default()
                }
            }
        };

        if outcome.skipped > 0 {
            warn!(skipped = outcome.skipped, "detections with invalid boxes skipped");
        }
        trace!(drawn = outcome.drawn, deferred = outcome.deferred, "overlay painted");
        caps.canvas.present(list);
        model.last_paint = Some(outcome);
    }

    // --- Single-shot detection ---

    fn request_detection(model: &mut Model, caps: &Capabilities) {
        if let Err(err) = Self::start_detection(model, caps) {
            if err.kind.is_user_facing() {
                error!(code = err.code(), error = %err, "detection request not sent");
                model.set_error(err);
            } else {
                warn!(code = err.code(), error = %err, "detection request refused");
            }
        }
        caps.render.render();
    }

    fn start_detection(model: &mut Model, caps: &Capabilities) -> Result<(), AppError> {
        if model.is_live() {
            return Err(PipelineError::LiveActive.into());
        }
        if let Some(open) = model.pipeline.session() {
            return Err(PipelineError::SessionBusy { kind: open.kind }.into());
        }
        let (Some(file), Some(handle)) = (model.media.file(), model.media.current()) else {
            return Err(PipelineError::NoMedia.into());
        };

        let url = model.config.detect_url()?;
        let timeout_ms = model.config.detect_timeout_ms;
        let request = single_shot_request(&url, file, &handle.mime_type, model.location, timeout_ms)?;

        let session = model.pipeline.open(SessionKind::SingleShot)?;
        let timer = TimerId::new(format!("detect-{session}"));
        model
            .pipeline
            .attach(session, request.request_id(), Some(timer.clone()));
        info!(%session, request_id = request.request_id(), "detection requested");

        caps.http.send(request, move |result| Event::DetectResponse {
            session,
            result: Box::new(result),
        });
        caps.timer.start(timer, timeout_ms, move |output| {
            Event::on_fired(output, Event::DetectTimedOut { session })
        });
        model.clear_error();
        Ok(())
    }

    fn detection_settled(
        session: SessionId,
        result: HttpResult,
        model: &mut Model,
        caps: &Capabilities,
    ) {
        let Some(settled) = model.pipeline.settle(session) else {
            debug!(%session, "response for a closed session discarded");
            return;
        };
        if let Some(timer) = settled.timer {
            caps.timer.cancel(timer);
        }

        match interpret_response(result, &model.config.classes, model.media.natural_size()) {
            Ok(normalized) => {
                info!(
                    %session,
                    detections = normalized.result.len(),
                    clean = normalized.report.is_clean(),
                    "detections received"
                );
                model.result = Some(normalized.result);
                Self::request_repaint(caps);
            }
            Err(e) => {
                let err = AppError::from(e);
                error!(%session, code = err.code(), error = %err, "detection request failed");
                model.set_error(err);
            }
        }
        caps.render.render();
    }

    fn detection_timed_out(session: SessionId, model: &mut Model, caps: &Capabilities) {
        let Some(settled) = model.pipeline.settle(session) else {
            return;
        };
        if let Some(request_id) = settled.request_id {
            caps.http.cancel(request_id);
        }
        let err = AppError::from(PipelineError::TimedOut {
            timeout_ms: model.config.detect_timeout_ms,
        });
        warn!(%session, code = err.code(), "detection request timed out");
        model.set_error(err);
        caps.render.render();
    }

    fn abandon_single_shot(model: &mut Model, caps: &Capabilities) {
        let single_shot = model
            .pipeline
            .session()
            .is_some_and(|s| s.kind == SessionKind::SingleShot);
        if single_shot {
            if let Some(session) = model.pipeline.close() {
                Self::cancel_session(&session, caps);
            }
        }
    }

    fn cancel_session(session: &RequestSession, caps: &Capabilities) {
        if let Some(request_id) = &session.request_id {
            caps.http.cancel(request_id.clone());
        }
        if let Some(timer) = &session.timer {
            caps.timer.cancel(timer.clone());
        }
        debug!(session = %session.id, kind = ?session.kind, "session abandoned");
    }

    // --- Live detection ---

    fn start_live(model: &mut Model, caps: &Capabilities) {
        let Some(generation) = model.pipeline.start_polling() else {
            debug!("live detection already running");
            return;
        };
        if let Some(chain) = model.sync.pause() {
            caps.frames.cancel(chain);
        }
        info!(generation, interval_ms = model.config.poll_interval_ms, "live detection started");
        model.result = None;
        model.live_frame = None;
        Self::schedule_poll(generation, model, caps);
        Self::request_repaint(caps);
        caps.render.render();
    }

    fn schedule_poll(generation: u64, model: &Model, caps: &Capabilities) {
        caps.timer.start(
            TimerId::new(format!("poll-{generation}")),
            model.config.poll_interval_ms,
            move |output| Event::on_fired(output, Event::PollTick { generation }),
        );
    }

    fn poll_tick(generation: u64, model: &mut Model, caps: &Capabilities) {
        match model.pipeline.tick(generation) {
            TickOutcome::Stale => trace!(generation, "stale poll tick"),
            TickOutcome::Skipped => {
                trace!(
                    generation,
                    skipped = model.pipeline.skipped_ticks(),
                    "request in flight, tick skipped"
                );
                Self::schedule_poll(generation, model, caps);
            }
            TickOutcome::Ready => {
                Self::schedule_poll(generation, model, caps);
                match model.pipeline.open(SessionKind::Live) {
                    Ok(session) => {
                        let config =
                            CaptureConfig::default().with_quality(model.config.live_jpeg_quality);
                        caps.camera.capture_frame(config, move |result| Event::FrameCaptured {
                            session,
                            result: Box::new(result),
                        });
                    }
                    Err(e) => debug!(error = %e, "poll tick could not open a session"),
                }
            }
        }
    }

    fn frame_captured(
        session: SessionId,
        result: CameraResult,
        model: &mut Model,
        caps: &Capabilities,
    ) {
        if !model.pipeline.is_open(session) {
            debug!(%session, "frame for a closed session discarded");
            return;
        }
        let frame = match result {
            Ok(frame) => frame,
            Err(e) => {
                warn!(%session, error = %e, retryable = e.is_retryable(), "frame capture failed");
                model.pipeline.settle(session);
                if e.is_permission_error() {
                    Self::stop_live(model, caps);
                }
                return;
            }
        };

        let request = model
            .config
            .live_url()
            .map_err(AppError::from)
            .and_then(|url| live_request(&url, &frame, model.location).map_err(AppError::from));
        match request {
            Ok(request) => {
                let size = NaturalSize::new(frame.width(), frame.height());
                model.pipeline.attach(session, request.request_id(), None);
                trace!(%session, bytes = frame.data().len(), "live frame sent");
                caps.http.send(request, move |result| Event::LiveResponse {
                    session,
                    frame: size,
                    result: Box::new(result),
                });
            }
            Err(err) => {
                warn!(%session, code = err.code(), error = %err, "live request not sent");
                model.pipeline.settle(session);
            }
        }
    }

    fn live_settled(
        session: SessionId,
        frame: NaturalSize,
        result: HttpResult,
        model: &mut Model,
        caps: &Capabilities,
    ) {
        if model.pipeline.settle(session).is_none() {
            debug!(%session, "late live response discarded");
            return;
        }
        match interpret_response(result, &model.config.classes, Some(frame)) {
            Ok(normalized) => {
                if let Some(point) = normalized.result.geolocation {
                    model.location = Some(point);
                }
                trace!(%session, detections = normalized.result.len(), "live detections received");
                model.result = Some(normalized.result);
                model.live_frame = Some(frame);
                Self::request_repaint(caps);
                caps.render.render();
            }
            Err(e) => warn!(%session, error = %e, "live detection failed"),
        }
    }

    fn stop_live(model: &mut Model, caps: &Capabilities) {
        if !model.pipeline.is_polling() {
            return;
        }
        if let Some(session) = model.pipeline.stop_polling() {
            debug!(session = %session.id, "in-flight live request abandoned");
        }
        caps.camera.stop_stream();
        info!(skipped = model.pipeline.skipped_ticks(), "live detection stopped");
        model.result = None;
        model.live_frame = None;
        Self::request_repaint(caps);
        caps.render.render();
    }

    // --- Video playback ---

    fn start_playback(model: &mut Model, caps: &Capabilities) {
        if model.media.kind() != Some(MediaKind::Video) || model.is_live() {
            debug!("playback ignored outside video mode");
            return;
        }
        let (chain, previous) = model.sync.play();
        if let Some(previous) = previous {
            caps.frames.cancel(previous);
        }
        Self::request_frame(chain, caps);
        caps.render.render();
    }

    fn request_frame(chain: ChainId, caps: &Capabilities) {
        caps.frames
            .next_frame(chain, move |sample| Event::FrameTick { chain, sample });
    }

    fn frame_tick(
        chain: ChainId,
        playback_time: f64,
        geometry: DisplayGeometry,
        model: &mut Model,
        caps: &Capabilities,
    ) {
        if !model.sync.accepts(chain) {
            trace!(%chain, "frame from a stopped chain discarded");
            return;
        }
        model.sync.record_time(playback_time);
        Self::paint(geometry, model, caps);
        Self::request_frame(chain, caps);
    }

    // --- Location ---

    fn position_fix(latitude: f64, longitude: f64, model: &mut Model) {
        match GeoPoint::new(latitude, longitude) {
            Ok(point) => {
                model.location = Some(point);
                model.location_error = None;
            }
            Err(e) => warn!(error = %e, "invalid position fix ignored"),
        }
    }

    fn position_failed(error: &LocationError, model: &mut Model) {
        let err = AppError::new(ErrorKind::Location, error.to_string());
        warn!(code = err.code(), error = %error, "position unavailable");
        model.location_error = Some(err.user_facing_message());
    }

    fn watch_result(result: LocationResult, model: &mut Model, caps: &Capabilities) {
        let rearm = match result {
            Ok(point) => {
                Self::position_fix(point.latitude(), point.longitude(), model);
                true
            }
            Err(error) => {
                Self::position_failed(&error, model);
                error.is_retryable()
            }
        };
        if model.watching_location {
            if rearm {
                caps.location.watch(WatchOptions::default(), Event::LocationFix);
            } else {
                model.watching_location = false;
                caps.location.clear_watch();
            }
        }
        caps.render.render();
    }

    // --- Map markers ---

    fn request_markers(model: &Model, caps: &Capabilities) {
        let request = model
            .config
            .locations_url()
            .map_err(AppError::from)
            .and_then(|url| markers_request(&url).map_err(AppError::from));
        match request {
            Ok(request) => {
                caps.http
                    .send(request, |result| Event::MarkersResponse(Box::new(result)));
            }
            Err(err) => warn!(code = err.code(), error = %err, "markers not requested"),
        }
    }

    fn markers_received(result: HttpResult, model: &mut Model, caps: &Capabilities) {
        let response = match result {
            Ok(response) if response.is_success() => response,
            Ok(response) => {
                warn!(status = response.status(), "markers request failed");
                return;
            }
            Err(e) => {
                warn!(error = %e, "markers request failed");
                return;
            }
        };
        match parse_markers(response.body()) {
            Ok(markers) => {
                debug!(count = markers.len(), "markers loaded");
                model.markers = markers;
                caps.render.render();
            }
            Err(e) => warn!(error = %e, "markers payload rejected"),
        }
    }
}

impl crux_core::App for App {
    type Event = Event;
    type Model = Model;
    type ViewModel = ViewModel;
    type Capabilities = Capabilities;

    fn update(&self, event: Event, model: &mut Model, caps: &Capabilities) {
        if event.is_high_frequency() {
            trace!(event = event.name(), "update");
        } else {
            debug!(event = event.name(), "update");
        }

        match event {
            Event::Noop => {}

            Event::AppStarted { config } => Self::start(config, model, caps),
            Event::Teardown => Self::teardown(model, caps),

            Event::FileSelected(file) => Self::select_file(*file, model, caps),
            Event::MediaDecoded { width, height } => {
                Self::media_decoded(width, height, model, caps);
            }

            Event::SurfaceResized(geometry) | Event::SurfaceMeasured(geometry) => {
                Self::surface_changed(geometry, model, caps);
            }

            Event::DetectRequested => Self::request_detection(model, caps),
            Event::DetectResponse { session, result } => {
                Self::detection_settled(session, *result, model, caps);
            }
            Event::DetectTimedOut { session } => Self::detection_timed_out(session, model, caps),

            Event::LiveStarted => Self::start_live(model, caps),
            Event::LiveStopped => Self::stop_live(model, caps),
            Event::PollTick { generation } => Self::poll_tick(generation, model, caps),
            Event::FrameCaptured { session, result } => {
                Self::frame_captured(session, *result, model, caps);
            }
            Event::LiveResponse {
                session,
                frame,
                result,
            } => Self::live_settled(session, frame, *result, model, caps),

            Event::PlaybackStarted => Self::start_playback(model, caps),
            Event::PlaybackPaused => {
                if let Some(chain) = model.sync.pause() {
                    caps.frames.cancel(chain);
                }
                caps.render.render();
            }
            Event::PlaybackEnded => {
                if let Some(chain) = model.sync.stop() {
                    caps.frames.cancel(chain);
                }
                Self::request_repaint(caps);
                caps.render.render();
            }
            Event::PlaybackSeeked(sample) => {
                model.sync.record_time(sample.playback_time);
                if model.sync.is_playing() {
                    model.geometry = Some(sample.geometry);
                } else if model.media.kind() == Some(MediaKind::Video) {
                    Self::paint(sample.geometry, model, caps);
                }
            }
            Event::FrameTick { chain, sample } => {
                Self::frame_tick(chain, sample.playback_time, sample.geometry, model, caps);
            }

            Event::LocationUpdated {
                latitude,
                longitude,
            } => {
                Self::position_fix(latitude, longitude, model);
                caps.render.render();
            }
            Event::LocationFailed { error } => {
                Self::position_failed(&error, model);
                caps.render.render();
            }
            Event::LocationFix(result) => Self::watch_result(result, model, caps),

            Event::MarkersRefreshRequested => Self::request_markers(model, caps),
            Event::MarkersResponse(result) => Self::markers_received(*result, model, caps),

            Event::DismissError => {
                model.clear_error();
                caps.render.render();
            }
        }
    }

    fn view(&self, model: &Model) -> ViewModel {
        let media = model.media.current().map(|handle| MediaView {
            uri: handle.uri.to_string(),
            kind: handle.kind,
            mime_type: handle.mime_type.clone(),
            natural_width: handle.natural.map(|n| n.width),
            natural_height: handle.natural.map(|n| n.height),
        });

        let detections = model
            .result
            .as_ref()
            .map(|result| {
                result
                    .detections
                    .iter()
                    .map(|d| DetectionView {
                        class_name: d.class_name.clone(),
                        confidence_percent: d.confidence_percent(),
                        timestamp: d.timestamp,
                    })
                    .collect()
            })
            .unwrap_or_default();

        ViewModel {
            media,
            detect_enabled: model.can_detect(),
            detecting: model
                .pipeline
                .session()
                .is_some_and(|s| s.kind == SessionKind::SingleShot),
            live_active: model.is_live(),
            playback: model.sync.state(),
            detections,
            location: model.location.map(|point| LocationView {
                latitude: point.latitude(),
                longitude: point.longitude(),
            }),
            location_error: model.location_error.clone(),
            markers: model.markers.clone(),
            error: model
                .active_error
                .as_ref()
                .filter(|e| e.kind.is_user_facing())
                .map(UserFacingError::from),
            skipped_ticks: model.pipeline.skipped_ticks(),
        }
    }
}
