use crux_core::testing::AppTester;
use shared::capabilities::{
    CameraError, CameraOperation, CanvasOperation, CapturedImage, FrameSample, FramesOperation,
    HttpOperation, HttpRequest, HttpResponse, ImageFormat, LocationError, LocationOperation,
};
use shared::media::SelectedFile;
use shared::overlay::DisplayList;
use shared::pipeline::PollTask;
use shared::sync::PlaybackState;
use shared::{DisplayGeometry, Effect, Event, GeoPoint, Model, NaturalSize};

const JPEG: &[u8] = &[0xFF, 0xD8, 0xFF, 0xE0, 0x00, 0x10, b'J', b'F', b'I', b'F'];

fn app() -> (AppTester<shared::App, Effect>, Model) {
    let app = AppTester::<shared::App, Effect>::default();
    let mut model = Model::default();
    app.update(Event::AppStarted { config: None }, &mut model);
    (app, model)
}

fn generation(model: &Model) -> u64 {
    match model.pipeline.poll_task() {
        PollTask::Running { generation } => generation,
        PollTask::Stopped => panic!("polling is not running"),
    }
}

fn captures(effects: &[Effect]) -> usize {
    effects
        .iter()
        .filter(|e| {
            matches!(e, Effect::Camera(req) if matches!(req.operation, CameraOperation::CaptureFrame { .. }))
        })
        .count()
}

fn http_requests(effects: &[Effect]) -> Vec<HttpRequest> {
    effects
        .iter()
        .filter_map(|e| match e {
            Effect::Http(req) => match &req.operation {
                HttpOperation::Execute(request) => Some(request.clone()),
                HttpOperation::Cancel { .. } => None,
            },
            _ => None,
        })
        .collect()
}

fn presented(effects: &[Effect]) -> Option<DisplayList> {
    effects.iter().rev().find_map(|e| match e {
        Effect::Canvas(req) => match &req.operation {
            CanvasOperation::Present(list) => Some(list.clone()),
            CanvasOperation::Measure => None,
        },
        _ => None,
    })
}

fn frame_ops(effects: &[Effect]) -> Vec<FramesOperation> {
    effects
        .iter()
        .filter_map(|e| match e {
            Effect::Frames(req) => Some(req.operation.clone()),
            _ => None,
        })
        .collect()
}

fn sample(playback_time: f64) -> FrameSample {
    FrameSample {
        playback_time,
        geometry: DisplayGeometry::new(640.0, 360.0),
    }
}

/// Starts live mode and drives one tick up to the point where the camera
/// has been asked for a frame.
fn capture_started(app: &AppTester<shared::App, Effect>, model: &mut Model) {
    app.update(Event::LiveStarted, model);
    let generation = generation(model);
    let update = app.update(Event::PollTick { generation }, model);
    assert_eq!(captures(&update.effects), 1);
}

const LIVE_BODY: &[u8] = br#"{
    "detections": [{"class_id": 1, "class_name": "Crack", "confidence": 0.61, "bbox": [64, 48, 320, 240]}],
    "location": {"latitude": 23.81, "longitude": 90.41}
}"#;

#[test]
fn live_ticks_are_skipped_while_a_request_is_in_flight() {
    let (app, mut model) = app();
    capture_started(&app, &mut model);
    let generation = generation(&model);
    let session = model.pipeline.session().unwrap().id;

    for _ in 0..3 {
        let update = app.update(Event::PollTick { generation }, &mut model);
        assert_eq!(captures(&update.effects), 0);
        assert!(http_requests(&update.effects).is_empty());
    }
    assert_eq!(app.view(&model).skipped_ticks, 3);

    let frame = CapturedImage::new(JPEG.to_vec(), ImageFormat::Jpeg, 640, 480).unwrap();
    let update = app.update(
        Event::FrameCaptured {
            session,
            result: Box::new(Ok(frame)),
        },
        &mut model,
    );
    let requests = http_requests(&update.effects);
    assert_eq!(requests.len(), 1);
    assert!(requests[0].url().as_str().ends_with("/live-stream"));
    let body = String::from_utf8_lossy(requests[0].body().unwrap()).into_owned();
    assert!(body.contains("data:image/jpeg;base64,"));

    // Still one request in flight.
    let update = app.update(Event::PollTick { generation }, &mut model);
    assert_eq!(captures(&update.effects), 0);
}

#[test]
fn live_results_replace_the_overlay_and_update_location() {
    let (app, mut model) = app();
    capture_started(&app, &mut model);
    let session = model.pipeline.session().unwrap().id;
    let frame = CapturedImage::new(JPEG.to_vec(), ImageFormat::Jpeg, 640, 480).unwrap();
    app.update(
        Event::FrameCaptured {
            session,
            result: Box::new(Ok(frame)),
        },
        &mut model,
    );

    app.update(
        Event::LiveResponse {
            session,
            frame: NaturalSize::new(640, 480),
            result: Box::new(Ok(HttpResponse::with_status(200, LIVE_BODY.to_vec()))),
        },
        &mut model,
    );
    assert!(!model.pipeline.is_busy());
    assert_eq!(model.location, Some(GeoPoint::new(23.81, 90.41).unwrap()));

    let update = app.update(
        Event::SurfaceMeasured(DisplayGeometry::new(320.0, 240.0)),
        &mut model,
    );
    let list = presented(&update.effects).unwrap();
    let rect = list.rects().next().unwrap();
    assert!((rect.x1 - 32.0).abs() < 1e-9);
    assert!((rect.y2 - 120.0).abs() < 1e-9);
    assert_eq!(list.labels().next().unwrap().text, "Crack (61%)");
}

#[test]
fn live_failures_are_swallowed_and_polling_continues() {
    let (app, mut model) = app();
    capture_started(&app, &mut model);
    let generation = generation(&model);
    let session = model.pipeline.session().unwrap().id;

    app.update(
        Event::FrameCaptured {
            session,
            result: Box::new(Err(CameraError::StreamNotReady)),
        },
        &mut model,
    );
    assert!(!model.pipeline.is_busy());
    assert!(app.view(&model).error.is_none());

    let update = app.update(Event::PollTick { generation }, &mut model);
    assert_eq!(captures(&update.effects), 1);
}

#[test]
fn denied_camera_permission_stops_live_mode() {
    let (app, mut model) = app();
    capture_started(&app, &mut model);
    let generation = generation(&model);
    let session = model.pipeline.session().unwrap().id;

    let update = app.update(
        Event::FrameCaptured {
            session,
            result: Box::new(Err(CameraError::PermissionDenied)),
        },
        &mut model,
    );
    assert!(update.effects.iter().any(|e| matches!(
        e,
        Effect::Camera(req) if matches!(req.operation, CameraOperation::StopStream)
    )));
    assert!(!app.view(&model).live_active);

    let update = app.update(Event::PollTick { generation }, &mut model);
    assert!(update.effects.is_empty());
}

#[test]
fn detect_is_refused_while_live() {
    let (app, mut model) = app();
    select_video(&app, &mut model);
    assert!(app.view(&model).detect_enabled);

    app.update(Event::LiveStarted, &mut model);
    assert!(!app.view(&model).detect_enabled);

    let update = app.update(Event::DetectRequested, &mut model);
    assert!(http_requests(&update.effects).is_empty());
    assert!(model.pipeline.session().is_none());
    assert!(app.view(&model).error.is_none());

    // Live polling is unaffected by the refused request.
    let generation = generation(&model);
    let update = app.update(Event::PollTick { generation }, &mut model);
    assert_eq!(captures(&update.effects), 1);

    app.update(Event::LiveStopped, &mut model);
    assert!(app.view(&model).detect_enabled);
}

#[test]
fn stopping_live_clears_the_overlay_and_ignores_late_work() {
    let (app, mut model) = app();
    capture_started(&app, &mut model);
    let generation = generation(&model);
    let session = model.pipeline.session().unwrap().id;

    let update = app.update(Event::LiveStopped, &mut model);
    assert!(update.effects.iter().any(|e| matches!(
        e,
        Effect::Camera(req) if matches!(req.operation, CameraOperation::StopStream)
    )));
    assert!(!app.view(&model).live_active);

    let update = app.update(Event::PollTick { generation }, &mut model);
    assert!(update.effects.is_empty());

    let update = app.update(
        Event::LiveResponse {
            session,
            frame: NaturalSize::new(640, 480),
            result: Box::new(Ok(HttpResponse::with_status(200, LIVE_BODY.to_vec()))),
        },
        &mut model,
    );
    assert!(update.effects.is_empty());
    assert!(model.result.is_none());

    let update = app.update(
        Event::SurfaceMeasured(DisplayGeometry::new(320.0, 240.0)),
        &mut model,
    );
    assert_eq!(presented(&update.effects).unwrap().rects().count(), 0);
}

fn select_video(app: &AppTester<shared::App, Effect>, model: &mut Model) {
    let mut mp4 = vec![0x00, 0x00, 0x00, 0x18];
    mp4.extend_from_slice(b"ftypisom");
    mp4.extend_from_slice(&[0u8; 16]);
    let file = SelectedFile::new("drive.mp4", "video/mp4", mp4);
    app.update(Event::FileSelected(Box::new(file)), model);
}

fn video_with_detections(app: &AppTester<shared::App, Effect>, model: &mut Model) {
    select_video(app, model);
    app.update(
        Event::MediaDecoded {
            width: 1280,
            height: 720,
        },
        model,
    );

    app.update(Event::DetectRequested, model);
    let session = model.pipeline.session().unwrap().id;
    let body = br#"{"detections": [
        {"class_id": 0, "class_name": "Pothole", "confidence": 0.9, "bbox": [0, 0, 640, 360], "timestamp": 1.0},
        {"class_id": 1, "class_name": "Crack", "confidence": 0.7, "bbox": [640, 360, 1280, 720], "timestamp": 2.0}
    ]}"#;
    app.update(
        Event::DetectResponse {
            session,
            result: Box::new(Ok(HttpResponse::with_status(200, body.to_vec()))),
        },
        model,
    );
}

#[test]
fn playback_draws_only_detections_for_the_current_frame() {
    let (app, mut model) = app();
    video_with_detections(&app, &mut model);

    let update = app.update(Event::PlaybackStarted, &mut model);
    let chain = model.sync.current_chain().unwrap();
    assert_eq!(frame_ops(&update.effects), vec![FramesOperation::Request { chain }]);

    let update = app.update(
        Event::FrameTick {
            chain,
            sample: sample(1.02),
        },
        &mut model,
    );
    let list = presented(&update.effects).unwrap();
    let rects: Vec<_> = list.rects().collect();
    assert_eq!(rects.len(), 1);
    assert!((rects[0].x2 - 320.0).abs() < 1e-9);
    assert_eq!(list.labels().next().unwrap().text, "Pothole");
    assert_eq!(frame_ops(&update.effects), vec![FramesOperation::Request { chain }]);

    let update = app.update(
        Event::FrameTick {
            chain,
            sample: sample(1.5),
        },
        &mut model,
    );
    assert_eq!(presented(&update.effects).unwrap().rects().count(), 0);
}

#[test]
fn pausing_stops_the_chain_and_seeking_repaints() {
    let (app, mut model) = app();
    video_with_detections(&app, &mut model);
    app.update(Event::PlaybackStarted, &mut model);
    let chain = model.sync.current_chain().unwrap();

    let update = app.update(Event::PlaybackPaused, &mut model);
    assert_eq!(frame_ops(&update.effects), vec![FramesOperation::Cancel { chain }]);
    assert_eq!(app.view(&model).playback, PlaybackState::Paused);

    let update = app.update(
        Event::FrameTick {
            chain,
            sample: sample(1.02),
        },
        &mut model,
    );
    assert!(update.effects.is_empty());

    let update = app.update(Event::PlaybackSeeked(sample(2.01)), &mut model);
    let list = presented(&update.effects).unwrap();
    assert_eq!(list.rects().count(), 1);
    assert_eq!(list.labels().next().unwrap().text, "Crack");

    // Restarting mints a fresh chain; the old one stays dead.
    app.update(Event::PlaybackStarted, &mut model);
    let restarted = model.sync.current_chain().unwrap();
    assert_ne!(restarted, chain);
    let update = app.update(
        Event::FrameTick {
            chain,
            sample: sample(2.01),
        },
        &mut model,
    );
    assert!(update.effects.is_empty());
}

#[test]
fn pausing_with_nothing_playing_stays_idle() {
    let (app, mut model) = app();
    app.update(Event::PlaybackPaused, &mut model);
    assert_eq!(app.view(&model).playback, PlaybackState::Idle);

    select_video(&app, &mut model);
    app.update(Event::LiveStarted, &mut model);
    assert_eq!(app.view(&model).playback, PlaybackState::Idle);
}

#[test]
fn ending_playback_clears_the_overlay() {
    let (app, mut model) = app();
    video_with_detections(&app, &mut model);
    app.update(Event::PlaybackStarted, &mut model);
    let chain = model.sync.current_chain().unwrap();
    app.update(
        Event::FrameTick {
            chain,
            sample: sample(1.02),
        },
        &mut model,
    );

    let update = app.update(Event::PlaybackEnded, &mut model);
    assert_eq!(frame_ops(&update.effects), vec![FramesOperation::Cancel { chain }]);

    let update = app.update(
        Event::SurfaceMeasured(DisplayGeometry::new(640.0, 360.0)),
        &mut model,
    );
    assert_eq!(presented(&update.effects).unwrap().rects().count(), 0);
    assert_eq!(app.view(&model).playback, PlaybackState::Idle);
}

#[test]
fn location_watch_rearms_until_permission_is_denied() {
    let (app, mut model) = app();

    let fix = GeoPoint::new(23.8, 90.4).unwrap();
    let update = app.update(Event::LocationFix(Ok(fix)), &mut model);
    assert!(update.effects.iter().any(|e| matches!(
        e,
        Effect::Location(req) if matches!(req.operation, LocationOperation::Watch(_))
    )));
    let view = app.view(&model);
    assert_eq!(view.location.unwrap().latitude, 23.8);

    let update = app.update(
        Event::LocationFix(Err(LocationError::Timeout { timeout_ms: 5000 })),
        &mut model,
    );
    assert!(update.effects.iter().any(|e| matches!(
        e,
        Effect::Location(req) if matches!(req.operation, LocationOperation::Watch(_))
    )));
    assert_eq!(model.location, Some(fix));

    let update = app.update(
        Event::LocationFix(Err(LocationError::PermissionDenied)),
        &mut model,
    );
    assert!(update.effects.iter().any(|e| matches!(
        e,
        Effect::Location(req) if matches!(req.operation, LocationOperation::ClearWatch)
    )));
    assert!(!model.watching_location);
    assert!(app.view(&model).location_error.is_some());
}
