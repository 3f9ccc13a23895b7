use crux_core::capability::{Capability, CapabilityContext, Operation};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const MAX_FRAME_SIZE_BYTES: usize = 20 * 1024 * 1024;
pub const DEFAULT_JPEG_QUALITY: u8 = 85;
pub const DEFAULT_FRAME_WIDTH: u32 = 1280;
pub const DEFAULT_FRAME_HEIGHT: u32 = 720;

/// Snapshots from the live camera stream owned by the shell.
#[derive(Clone)]
pub struct Camera<E> {
    context: CapabilityContext<CameraOperation, E>,
}

impl<Ev> Capability<Ev> for Camera<Ev> {
    type Operation = CameraOperation;
    type MappedSelf<MappedEv> = Camera<MappedEv>;

    fn map_event<F, NewEv>(&self, f: F) -> Self::MappedSelf<NewEv>
    where
        F: Fn(NewEv) -> Ev + Send + Sync + 'static,
        Ev: 'static,
        NewEv: 'static + Send,
    {
        Camera::new(self.context.map_event(f))
    }
}

impl<E> Camera<E>
where
    E: 'static,
{
    pub fn new(context: CapabilityContext<CameraOperation, E>) -> Self {
        Self { context }
    }

    /// Grabs the current frame of the stream, opening the stream first if the
    /// shell has not done so yet.
    pub fn capture_frame<F>(&self, config: CaptureConfig, callback: F)
    where
        F: FnOnce(CameraResult) -> E + Send + 'static,
    {
        let config = config.validated();
        let ctx = self.context.clone();
        self.context.spawn(async move {
            let result = ctx
                .request_from_shell(CameraOperation::CaptureFrame { config })
                .await;
            ctx.update_app(callback(result));
        });
    }

    pub fn stop_stream(&self) {
        let ctx = self.context.clone();
        self.context.spawn(async move {
            ctx.notify_shell(CameraOperation::StopStream).await;
        });
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum CameraOperation {
    CaptureFrame { config: CaptureConfig },
    StopStream,
}

impl Operation for CameraOperation {
    type Output = CameraResult;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum CameraFacing {
    Front,
    #[default]
    Back,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ImageFormat {
    #[default]
    Jpeg,
    Png,
    Heic,
    WebP,
}

impl ImageFormat {
    pub fn mime_type(&self) -> &'static str {
        match self {
            ImageFormat::Jpeg => "image/jpeg",
            ImageFormat::Png => "image/png",
            ImageFormat::Heic => "image/heic",
            ImageFormat::WebP => "image/webp",
        }
    }

    pub fn from_magic_bytes(data: &[u8]) -> Option<Self> {
        if data.len() < 12 {
            return None;
        }

        if data.starts_with(&[0xFF, 0xD8, 0xFF]) {
            return Some(ImageFormat::Jpeg);
        }

        if data.starts_with(&[0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A]) {
            return Some(ImageFormat::Png);
        }

        if data.starts_with(b"RIFF") && &data[8..12] == b"WEBP" {
            return Some(ImageFormat::WebP);
        }

        if &data[4..8] == b"ftyp" && matches!(&data[8..12], b"heic" | b"heix" | b"mif1") {
            return Some(ImageFormat::Heic);
        }

        None
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CaptureConfig {
    pub facing: CameraFacing,
    pub format: ImageFormat,
    pub quality: u8,
    pub width: u32,
    pub height: u32,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            facing: CameraFacing::Back,
            format: ImageFormat::Jpeg,
            quality: DEFAULT_JPEG_QUALITY,
            width: DEFAULT_FRAME_WIDTH,
            height: DEFAULT_FRAME_HEIGHT,
        }
    }
}

impl CaptureConfig {
    pub fn with_quality(mut self, quality: u8) -> Self {
        self.quality = quality.min(100);
        self
    }

    pub fn validated(mut self) -> Self {
        self.quality = self.quality.clamp(1, 100);
        self.width = self.width.max(1);
        self.height = self.height.max(1);
        self
    }
}

/// One encoded frame handed back by the shell.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CapturedImage {
    #[serde(with = "serde_bytes")]
    data: Vec<u8>,
    format: ImageFormat,
    width: u32,
    height: u32,
}

impl CapturedImage {
    pub fn new(
        data: Vec<u8>,
        format: ImageFormat,
        width: u32,
        height: u32,
    ) -> Result<Self, CameraError> {
        if data.is_empty() {
            return Err(CameraError::InvalidImage {
                reason: "image data is empty".to_string(),
            });
        }

        if data.len() > MAX_FRAME_SIZE_BYTES {
            return Err(CameraError::ImageTooLarge {
                size: data.len(),
                max: MAX_FRAME_SIZE_BYTES,
            });
        }

        if let Some(detected) = ImageFormat::from_magic_bytes(&data) {
            if detected != format {
                return Err(CameraError::InvalidImage {
                    reason: format!("format mismatch: declared {format:?} but detected {detected:?}"),
                });
            }
        }

        Ok(Self {
            data,
            format,
            width,
            height,
        })
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn format(&self) -> ImageFormat {
        self.format
    }

    pub fn mime_type(&self) -> &'static str {
        self.format.mime_type()
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }
}

#[derive(Debug, Clone, Error, Serialize, Deserialize, PartialEq, Eq)]
pub enum CameraError {
    #[error("camera permission denied")]
    PermissionDenied,

    #[error("camera unavailable: {reason}")]
    Unavailable { reason: String },

    #[error("capture failed: {reason}")]
    CaptureFailed { reason: String },

    #[error("stream not ready")]
    StreamNotReady,

    #[error("image too large: {size} bytes exceeds maximum of {max} bytes")]
    ImageTooLarge { size: usize, max: usize },

    #[error("invalid image: {reason}")]
    InvalidImage { reason: String },
}

impl CameraError {
    pub fn is_permission_error(&self) -> bool {
        matches!(self, CameraError::PermissionDenied)
    }

    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            CameraError::StreamNotReady | CameraError::Unavailable { .. } | CameraError::CaptureFailed { .. }
        )
    }
}

pub type CameraResult = Result<CapturedImage, CameraError>;
