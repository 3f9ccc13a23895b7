//! Ownership of the media in the upload slot and of the resource reference
//! the shell renders it through.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::io::Cursor;
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

use crate::capabilities::ImageFormat;
use crate::geometry::NaturalSize;

pub const MAX_MEDIA_SIZE_BYTES: usize = 200 * 1024 * 1024;
const GENERIC_MIME: &str = "application/octet-stream";

/// Opaque reference (object URL) the shell binds to the selected bytes.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResourceUri(String);

impl ResourceUri {
    pub fn new(uri: impl Into<String>) -> Self {
        Self(uri.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ResourceUri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Creation and revocation of resource references.
pub trait ResourceHandles {
    fn create(&self, mime_type: &str) -> ResourceUri;
    fn release(&self, uri: &ResourceUri);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MediaKind {
    Image,
    Video,
}

impl MediaKind {
    pub fn from_mime(mime_type: &str) -> Option<Self> {
        let (top, sub) = mime_type.split_once('/')?;
        if sub.is_empty() {
            return None;
        }
        match top {
            "image" => Some(MediaKind::Image),
            "video" => Some(MediaKind::Video),
            _ => None,
        }
    }
}

/// A file chosen by the user, as handed over by the shell's picker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SelectedFile {
    pub name: String,
    /// Declared type; may be empty when the platform could not tell.
    pub mime_type: String,
    #[serde(with = "serde_bytes")]
    pub bytes: Vec<u8>,
}

impl SelectedFile {
    pub fn new(name: impl Into<String>, mime_type: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            mime_type: mime_type.into(),
            bytes,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MediaHandle {
    pub uri: ResourceUri,
    pub kind: MediaKind,
    pub mime_type: String,
    /// Known once decoded (or read from the header).
    pub natural: Option<NaturalSize>,
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum MediaError {
    #[error("unsupported media type '{mime_type}': choose an image or a video")]
    UnsupportedMediaType { mime_type: String },

    #[error("file is empty")]
    Empty,

    #[error("file too large: {size} bytes exceeds maximum of {max} bytes")]
    TooLarge { size: usize, max: usize },
}

#[derive(Debug)]
struct Loaded {
    handle: MediaHandle,
    file: SelectedFile,
}

/// The single upload/capture slot. Holds at most one media handle.
#[derive(Debug, Default)]
pub struct MediaSlot {
    loaded: Option<Loaded>,
}

impl MediaSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Validates `file` and makes it the current media.
    ///
    /// On failure the current media is left in place. On success the previous
    /// reference is released before the new one is created.
    #[instrument(skip_all, fields(name = %file.name, declared = %file.mime_type, bytes = file.bytes.len()))]
    pub fn select<H>(&mut self, file: SelectedFile, handles: &H) -> Result<&MediaHandle, MediaError>
    where
        H: ResourceHandles + ?Sized,
    {
        if file.bytes.is_empty() {
            return Err(MediaError::Empty);
        }
        if file.bytes.len() > MAX_MEDIA_SIZE_BYTES {
            return Err(MediaError::TooLarge {
                size: file.bytes.len(),
                max: MAX_MEDIA_SIZE_BYTES,
            });
        }

        let mime_type = resolve_mime(&file.mime_type, &file.bytes);
        let Some(kind) = MediaKind::from_mime(&mime_type) else {
            warn!(mime_type = %mime_type, "rejected selection");
            return Err(MediaError::UnsupportedMediaType { mime_type });
        };

        self.release(handles);

        let natural = match kind {
            MediaKind::Image => header_dimensions(&file.bytes),
            MediaKind::Video => None,
        };
        let uri = handles.create(&mime_type);
        info!(uri = %uri, ?kind, ?natural, "media selected");

        let loaded = self.loaded.insert(Loaded {
            handle: MediaHandle {
                uri,
                kind,
                mime_type,
                natural,
            },
            file,
        });
        Ok(&loaded.handle)
    }

    /// Releases the current reference. Returns `false` when there was nothing
    /// to release, so repeated calls never revoke twice.
    pub fn release<H>(&mut self, handles: &H) -> bool
    where
        H: ResourceHandles + ?Sized,
    {
        match self.loaded.take() {
            Some(loaded) => {
                debug!(uri = %loaded.handle.uri, "releasing media");
                handles.release(&loaded.handle.uri);
                true
            }
            None => false,
        }
    }

    /// Records the size reported by the shell after decode. Ignored when the
    /// slot is empty or the size has a zero side.
    pub fn set_natural_size(&mut self, size: NaturalSize) -> bool {
        match &mut self.loaded {
            Some(loaded) if size.is_known() => {
                loaded.handle.natural = Some(size);
                true
            }
            _ => false,
        }
    }

    pub fn current(&self) -> Option<&MediaHandle> {
        self.loaded.as_ref().map(|l| &l.handle)
    }

    pub fn file(&self) -> Option<&SelectedFile> {
        self.loaded.as_ref().map(|l| &l.file)
    }

    pub fn natural_size(&self) -> Option<NaturalSize> {
        self.current().and_then(|h| h.natural)
    }

    pub fn kind(&self) -> Option<MediaKind> {
        self.current().map(|h| h.kind)
    }

    pub fn is_empty(&self) -> bool {
        self.loaded.is_none()
    }
}

/// The declared type, lowercased and without parameters, or a sniffed one
/// when the declaration is missing or generic.
fn resolve_mime(declared: &str, bytes: &[u8]) -> String {
    let essence = declared
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase();
    if essence.is_empty() || essence == GENERIC_MIME {
        sniff_mime(bytes).map_or(essence, str::to_string)
    } else {
        essence
    }
}

/// Identifies common image and video containers from their first bytes.
pub fn sniff_mime(bytes: &[u8]) -> Option<&'static str> {
    if let Some(format) = ImageFormat::from_magic_bytes(bytes) {
        return Some(format.mime_type());
    }
    if bytes.len() < 12 {
        return None;
    }
    if &bytes[4..8] == b"ftyp" {
        return match &bytes[8..12] {
            b"qt  " => Some("video/quicktime"),
            _ => Some("video/mp4"),
        };
    }
    if bytes.starts_with(&[0x1A, 0x45, 0xDF, 0xA3]) {
        return Some("video/webm");
    }
    if bytes.starts_with(b"RIFF") && &bytes[8..12] == b"AVI " {
        return Some("video/x-msvideo");
    }
    None
}

/// Reads image dimensions from the header without decoding pixels.
pub fn header_dimensions(bytes: &[u8]) -> Option<NaturalSize> {
    let reader = image::ImageReader::new(Cursor::new(bytes))
        .with_guessed_format()
        .ok()?;
    match reader.into_dimensions() {
        Ok((width, height)) => Some(NaturalSize::new(width, height)).filter(|n| n.is_known()),
        Err(e) => {
            debug!(error = %e, "could not read image header");
            None
        }
    }
}
