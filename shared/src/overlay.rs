//! Bounding-box overlay painting.
//!
//! The renderer never keeps state between paints: every call resizes the
//! surface to the element's current rendered size, clears it, and redraws
//! the full set of boxes. The core paints into a [`DisplayList`], which the
//! shell replays onto its real canvas.

use serde::{Deserialize, Serialize};

use crate::config::{ClassTable, OverlayStyle, Rgb};
use crate::detection::Detection;
use crate::geometry::{to_display, DisplayBox, DisplayGeometry, NaturalSize};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Stroke {
    pub color: Rgb,
    pub width: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Label {
    pub text: String,
    pub x: f64,
    /// Text baseline, in display pixels from the surface top.
    pub baseline: f64,
    pub font_px: u16,
    pub color: Rgb,
}

/// Anything the overlay can be painted on.
pub trait DrawingSurface {
    fn resize(&mut self, width: u32, height: u32);
    fn clear(&mut self);
    fn draw_rect(&mut self, rect: DisplayBox, stroke: Stroke);
    fn draw_label(&mut self, label: Label);
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum DrawCommand {
    Resize { width: u32, height: u32 },
    Clear,
    Rect { rect: DisplayBox, stroke: Stroke },
    Label(Label),
}

/// A surface that records commands instead of rasterizing them.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DisplayList {
    commands: Vec<DrawCommand>,
}

impl DisplayList {
    pub fn new() -> Self {
        Self::default()
    }

    /// A list that only resizes and clears, i.e. an empty overlay.
    pub fn cleared(geometry: DisplayGeometry) -> Self {
        let (width, height) = geometry.surface_size();
        let mut list = Self::new();
        list.resize(width, height);
        list.clear();
        list
    }

    pub fn commands(&self) -> &[DrawCommand] {
        &self.commands
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    pub fn rects(&self) -> impl Iterator<Item = &DisplayBox> {
        self.commands.iter().filter_map(|c| match c {
            DrawCommand::Rect { rect, .. } => Some(rect),
            _ => None,
        })
    }

    pub fn labels(&self) -> impl Iterator<Item = &Label> {
        self.commands.iter().filter_map(|c| match c {
            DrawCommand::Label(label) => Some(label),
            _ => None,
        })
    }
}

impl DrawingSurface for DisplayList {
    fn resize(&mut self, width: u32, height: u32) {
        self.commands.push(DrawCommand::Resize { width, height });
    }

    fn clear(&mut self) {
        self.commands.push(DrawCommand::Clear);
    }

    fn draw_rect(&mut self, rect: DisplayBox, stroke: Stroke) {
        self.commands.push(DrawCommand::Rect { rect, stroke });
    }

    fn draw_label(&mut self, label: Label) {
        self.commands.push(DrawCommand::Label(label));
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LabelMode {
    /// `Pothole (87%)`
    WithConfidence,
    /// `Pothole`
    NameOnly,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaintOutcome {
    pub drawn: usize,
    /// Detections with a non-finite box.
    pub skipped: usize,
    /// The media's natural size was unknown, so nothing was drawn.
    pub deferred: bool,
}

pub struct OverlayRenderer<'a> {
    classes: &'a ClassTable,
    style: &'a OverlayStyle,
    mode: LabelMode,
}

impl<'a> OverlayRenderer<'a> {
    pub fn new(classes: &'a ClassTable, style: &'a OverlayStyle, mode: LabelMode) -> Self {
        Self {
            classes,
            style,
            mode,
        }
    }

    pub fn paint<'d, S, I>(
        &self,
        surface: &mut S,
        detections: I,
        natural: Option<NaturalSize>,
        geometry: DisplayGeometry,
    ) -> PaintOutcome
    where
        S: DrawingSurface + ?Sized,
        I: IntoIterator<Item = &'d Detection>,
    {
        let (width, height) = geometry.surface_size();
        surface.resize(width, height);
        surface.clear();

        let mut outcome = PaintOutcome::default();
        let Some(natural) = natural.filter(|n| n.is_known()) else {
            outcome.deferred = true;
            return outcome;
        };

        for detection in detections {
            if !detection.bbox.is_finite() {
                outcome.skipped += 1;
                continue;
            }
            let Some(rect) = to_display(detection.bbox.clamped(natural), natural, geometry) else {
                outcome.deferred = true;
                break;
            };

            let color = self.color_of(detection);
            surface.draw_rect(
                rect,
                Stroke {
                    color,
                    width: self.style.line_width,
                },
            );
            surface.draw_label(Label {
                text: self.label_text(detection),
                x: rect.x1,
                baseline: self.label_baseline(&rect),
                font_px: self.style.font_px,
                color,
            });
            outcome.drawn += 1;
        }
        outcome
    }

    fn color_of(&self, detection: &Detection) -> Rgb {
        detection
            .class_id
            .and_then(|id| self.classes.get(id))
            .map_or(self.style.fallback_color, |class| class.color)
    }

    fn label_text(&self, detection: &Detection) -> String {
        match self.mode {
            LabelMode::WithConfidence => {
                format!("{} ({}%)", detection.class_name, detection.confidence_percent())
            }
            LabelMode::NameOnly => detection.class_name.clone(),
        }
    }

    fn label_baseline(&self, rect: &DisplayBox) -> f64 {
        if rect.y1 > self.style.label_flip_threshold_px {
            rect.y1 - self.style.label_gap_px
        } else {
            rect.y1 + f64::from(self.style.font_px)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::SourceBox;
    use image::{Rgba, RgbaImage};

    /// Rasterizes onto an in-memory image so pixel output can be compared.
    struct RasterSurface {
        image: RgbaImage,
    }

    impl RasterSurface {
        fn new() -> Self {
            Self {
                image: RgbaImage::new(0, 0),
            }
        }

        fn fill(&mut self, x1: f64, y1: f64, x2: f64, y2: f64, color: Rgb) {
            let (w, h) = self.image.dimensions();
            let clamp = |v: f64, max: u32| v.max(0.0).min(f64::from(max)) as u32;
            for y in clamp(y1, h)..clamp(y2, h) {
                for x in clamp(x1, w)..clamp(x2, w) {
                    self.image.put_pixel(x, y, Rgba([color.0, color.1, color.2, 255]));
                }
            }
        }
    }

    impl DrawingSurface for RasterSurface {
        fn resize(&mut self, width: u32, height: u32) {
            self.image = RgbaImage::new(width, height);
        }

        fn clear(&mut self) {
            for pixel in self.image.pixels_mut() {
                *pixel = Rgba([0, 0, 0, 0]);
            }
        }

        fn draw_rect(&mut self, r: DisplayBox, stroke: Stroke) {
            let w = stroke.width;
            self.fill(r.x1, r.y1, r.x2, r.y1 + w, stroke.color);
            self.fill(r.x1, r.y2 - w, r.x2, r.y2, stroke.color);
            self.fill(r.x1, r.y1, r.x1 + w, r.y2, stroke.color);
            self.fill(r.x2 - w, r.y1, r.x2, r.y2, stroke.color);
        }

        fn draw_label(&mut self, label: Label) {
            let font = f64::from(label.font_px);
            let advance = label.text.len() as f64 * font * 0.5;
            self.fill(label.x, label.baseline - font, label.x + advance, label.baseline, label.color);
        }
    }

    fn pothole() -> Detection {
        Detection::new(0, "Pothole", 0.87, SourceBox::new(100.0, 100.0, 300.0, 300.0))
    }

    fn paint(mode: LabelMode, detections: &[Detection], natural: Option<NaturalSize>) -> (DisplayList, PaintOutcome) {
        let classes = ClassTable::default();
        let style = OverlayStyle::default();
        let mut list = DisplayList::new();
        let outcome = OverlayRenderer::new(&classes, &style, mode).paint(
            &mut list,
            detections,
            natural,
            DisplayGeometry::new(480.0, 270.0),
        );
        (list, outcome)
    }

    #[test]
    fn full_hd_image_at_quarter_size() {
        let (list, outcome) = paint(LabelMode::WithConfidence, &[pothole()], Some(NaturalSize::new(1920, 1080)));

        assert_eq!(outcome, PaintOutcome { drawn: 1, skipped: 0, deferred: false });
        assert_eq!(list.commands()[0], DrawCommand::Resize { width: 480, height: 270 });
        assert_eq!(list.commands()[1], DrawCommand::Clear);

        let rect = list.rects().next().unwrap();
        assert_eq!((rect.x1, rect.y1, rect.x2, rect.y2), (25.0, 25.0, 75.0, 75.0));

        let label = list.labels().next().unwrap();
        assert_eq!(label.text, "Pothole (87%)");
        assert_eq!(label.color, Rgb::RED);
        assert_eq!((label.x, label.baseline), (25.0, 20.0));
    }

    #[test]
    fn name_only_labels_for_video() {
        let (list, _) = paint(LabelMode::NameOnly, &[pothole()], Some(NaturalSize::new(1920, 1080)));
        assert_eq!(list.labels().next().unwrap().text, "Pothole");
    }

    #[test]
    fn labels_near_the_top_flip_below_the_edge() {
        let top = Detection::new(1, "Crack", 0.5, SourceBox::new(0.0, 20.0, 100.0, 100.0));
        let (list, _) = paint(LabelMode::WithConfidence, &[top], Some(NaturalSize::new(1920, 1080)));
        let label = list.labels().next().unwrap();
        // y1 = 20 * 0.25 = 5, inside the threshold
        assert_eq!(label.baseline, 5.0 + 18.0);
        assert_eq!(label.color, Rgb(0xFF, 0xA5, 0x00));
    }

    #[test]
    fn unknown_classes_use_the_fallback_color() {
        let mut d = pothole();
        d.class_id = Some(99);
        let (list, _) = paint(LabelMode::WithConfidence, &[d], Some(NaturalSize::new(1920, 1080)));
        assert_eq!(list.labels().next().unwrap().color, OverlayStyle::default().fallback_color);
    }

    #[test]
    fn undecoded_media_defers_after_clearing() {
        let (list, outcome) = paint(LabelMode::WithConfidence, &[pothole()], None);
        assert!(outcome.deferred);
        assert_eq!(outcome.drawn, 0);
        assert_eq!(list, DisplayList::cleared(DisplayGeometry::new(480.0, 270.0)));

        let (_, outcome) = paint(LabelMode::WithConfidence, &[pothole()], Some(NaturalSize::new(0, 0)));
        assert!(outcome.deferred);
    }

    #[test]
    fn non_finite_boxes_are_skipped() {
        let mut broken = pothole();
        broken.bbox.x2 = f64::NAN;
        let (list, outcome) = paint(
            LabelMode::WithConfidence,
            &[broken, pothole()],
            Some(NaturalSize::new(1920, 1080)),
        );
        assert_eq!(outcome, PaintOutcome { drawn: 1, skipped: 1, deferred: false });
        assert_eq!(list.rects().count(), 1);
    }

    #[test]
    fn boxes_past_the_frame_edge_are_clamped_when_drawn() {
        let oversized = Detection::new(0, "Pothole", 0.9, SourceBox::new(1800.0, 1000.0, 2400.0, 1500.0));
        let (list, outcome) = paint(LabelMode::WithConfidence, &[oversized], Some(NaturalSize::new(1920, 1080)));
        assert_eq!(outcome.drawn, 1);
        let rect = list.rects().next().unwrap();
        assert_eq!((rect.x1, rect.y1, rect.x2, rect.y2), (450.0, 250.0, 480.0, 270.0));
    }

    #[test]
    fn empty_result_clears_the_surface() {
        let (list, outcome) = paint(LabelMode::WithConfidence, &[], Some(NaturalSize::new(1920, 1080)));
        assert_eq!(outcome.drawn, 0);
        assert_eq!(list.len(), 2);
    }

    #[test]
    fn painting_twice_is_pixel_identical() {
        let classes = ClassTable::default();
        let style = OverlayStyle::default();
        let renderer = OverlayRenderer::new(&classes, &style, LabelMode::WithConfidence);
        let detections = vec![
            pothole(),
            Detection::new(2, "Open Manhole", 0.6, SourceBox::new(900.0, 10.0, 1500.0, 700.0)),
        ];
        let natural = Some(NaturalSize::new(1920, 1080));
        let geometry = DisplayGeometry::new(480.0, 270.0);

        let mut surface = RasterSurface::new();
        renderer.paint(&mut surface, &detections, natural, geometry);
        let first = surface.image.clone();
        renderer.paint(&mut surface, &detections, natural, geometry);

        assert_eq!(first.dimensions(), (480, 270));
        assert_eq!(first, surface.image);
        assert!(first.pixels().any(|p| p.0 == [0xFF, 0, 0, 255]));
    }

    #[test]
    fn resize_repaints_at_the_new_scale() {
        let classes = ClassTable::default();
        let style = OverlayStyle::default();
        let renderer = OverlayRenderer::new(&classes, &style, LabelMode::WithConfidence);
        let natural = Some(NaturalSize::new(1920, 1080));

        let mut list = DisplayList::new();
        renderer.paint(&mut list, &[pothole()], natural, DisplayGeometry::new(960.0, 540.0));
        let rect = list.rects().next().unwrap();
        assert_eq!((rect.x1, rect.x2), (50.0, 150.0));
    }
}
