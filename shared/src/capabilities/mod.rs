mod camera;
mod canvas;
mod frames;
mod http;
mod location;
mod resources;
mod timer;

pub use self::camera::{
    Camera, CameraError, CameraFacing, CameraOperation, CameraResult, CaptureConfig,
    CapturedImage, ImageFormat,
};
pub use self::canvas::{Canvas, CanvasOperation};
pub use self::frames::{FrameSample, Frames, FramesOperation};
pub use self::http::{
    Http, HttpError, HttpHeaders, HttpMethod, HttpOperation, HttpOutput, HttpRequest,
    HttpResponse, HttpResult, ValidatedUrl, DEFAULT_TIMEOUT_MS, MAX_TIMEOUT_MS,
};
pub use self::location::{
    Location, LocationError, LocationOperation, LocationResult, WatchOptions,
};
pub use self::resources::{ResourceOperation, Resources, RESOURCE_SCHEME};
pub use self::timer::{Timer, TimerId, TimerOperation, TimerOutput};

// Crux's built-in Render capability is used as-is to trigger view updates.
pub use crux_core::render::Render;

use crate::app::App;
use crate::event::Event;

#[derive(crux_core::macros::Effect)]
pub struct Capabilities {
    pub render: Render<Event>,
    pub http: Http<Event>,
    pub timer: Timer<Event>,
    pub canvas: Canvas<Event>,
    pub frames: Frames<Event>,
    pub resources: Resources<Event>,
    pub camera: Camera<Event>,
    pub location: Location<Event>,
}
