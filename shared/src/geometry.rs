//! Source-pixel ↔ display-pixel mapping.
//!
//! Detection boxes arrive in the coordinate space of the media at full
//! resolution. The overlay is drawn in the coordinate space of the element as
//! currently rendered. Each axis is scaled independently; no letterbox
//! correction is applied, so a shell that renders with `object-fit: contain`
//! and a mismatched aspect ratio will see boxes drift.

use serde::{Deserialize, Serialize};

/// Intrinsic size of the decoded media (or captured frame).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NaturalSize {
    pub width: u32,
    pub height: u32,
}

impl NaturalSize {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// A size with a zero side means "not decoded yet".
    pub const fn is_known(self) -> bool {
        self.width > 0 && self.height > 0
    }
}

/// Rendered size of the media element, in CSS pixels, at paint time.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DisplayGeometry {
    pub rendered_width: f64,
    pub rendered_height: f64,
}

impl DisplayGeometry {
    pub const fn new(rendered_width: f64, rendered_height: f64) -> Self {
        Self {
            rendered_width,
            rendered_height,
        }
    }

    /// Whole-pixel backing size for the drawing surface.
    #[must_use]
    pub fn surface_size(self) -> (u32, u32) {
        (to_surface_px(self.rendered_width), to_surface_px(self.rendered_height))
    }
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn to_surface_px(v: f64) -> u32 {
    if v.is_finite() && v > 0.0 {
        v.round().min(f64::from(u32::MAX)) as u32
    } else {
        0
    }
}

/// Box in source-pixel space, `[x1, y1, x2, y2]`.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(from = "[f64; 4]", into = "[f64; 4]")]
pub struct SourceBox {
    pub x1: f64,
    pub y1: f64,
    pub x2: f64,
    pub y2: f64,
}

impl From<[f64; 4]> for SourceBox {
    fn from([x1, y1, x2, y2]: [f64; 4]) -> Self {
        Self { x1, y1, x2, y2 }
    }
}

impl From<SourceBox> for [f64; 4] {
    fn from(b: SourceBox) -> Self {
        [b.x1, b.y1, b.x2, b.y2]
    }
}

impl SourceBox {
    pub const ZERO: Self = Self {
        x1: 0.0,
        y1: 0.0,
        x2: 0.0,
        y2: 0.0,
    };

    pub const fn new(x1: f64, y1: f64, x2: f64, y2: f64) -> Self {
        Self { x1, y1, x2, y2 }
    }

    pub fn is_finite(&self) -> bool {
        self.x1.is_finite() && self.y1.is_finite() && self.x2.is_finite() && self.y2.is_finite()
    }

    /// Orders the corners so `x1 <= x2`, `y1 <= y2`, and floors them at zero.
    #[must_use]
    pub fn ordered(self) -> Self {
        Self {
            x1: self.x1.min(self.x2).max(0.0),
            y1: self.y1.min(self.y2).max(0.0),
            x2: self.x1.max(self.x2).max(0.0),
            y2: self.y1.max(self.y2).max(0.0),
        }
    }

    /// Ordered and bounded by the natural size.
    #[must_use]
    pub fn clamped(self, natural: NaturalSize) -> Self {
        let w = f64::from(natural.width);
        let h = f64::from(natural.height);
        let b = self.ordered();
        Self {
            x1: b.x1.min(w),
            y1: b.y1.min(h),
            x2: b.x2.min(w),
            y2: b.y2.min(h),
        }
    }
}

/// Box in display-pixel space.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DisplayBox {
    pub x1: f64,
    pub y1: f64,
    pub x2: f64,
    pub y2: f64,
}

impl DisplayBox {
    pub fn width(&self) -> f64 {
        self.x2 - self.x1
    }

    pub fn height(&self) -> f64 {
        self.y2 - self.y1
    }
}

/// `(rendered_width / natural_width, rendered_height / natural_height)`, or
/// `None` while the media has not been decoded.
pub fn scale_factors(natural: NaturalSize, geometry: DisplayGeometry) -> Option<(f64, f64)> {
    if !natural.is_known() {
        return None;
    }
    Some((
        geometry.rendered_width / f64::from(natural.width),
        geometry.rendered_height / f64::from(natural.height),
    ))
}

pub fn to_display(
    bbox: SourceBox,
    natural: NaturalSize,
    geometry: DisplayGeometry,
) -> Option<DisplayBox> {
    let (sx, sy) = scale_factors(natural, geometry)?;
    Some(DisplayBox {
        x1: bbox.x1 * sx,
        y1: bbox.y1 * sy,
        x2: bbox.x2 * sx,
        y2: bbox.y2 * sy,
    })
}
