//! Overlay renderer.
//!
//! Paints predictions onto a transparent layer laid over the displayed
//! video. Prediction boxes arrive in native-resolution pixels; the displayed
//! element may be resized with a different aspect ratio, so x and y are scaled
//! independently. Every render fully clears the layer; no box survives from
//! one call to the next.

use ab_glyph::{Font as _, FontArc, PxScale, ScaleFont as _};
use anyhow::{anyhow, Context, Result};
use image::imageops::{self, FilterType};
use image::{Rgb, RgbImage, Rgba, RgbaImage};
use imageproc::drawing::{draw_filled_rect_mut, draw_hollow_rect_mut, draw_text_mut};
use imageproc::rect::Rect as PixelRect;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use crate::detect::Prediction;
use crate::frame::Frame;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Color {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Color {
    pub const RED: Color = Color { r: 255, g: 0, b: 0 };
    pub const GREEN: Color = Color { r: 0, g: 255, b: 0 };

    fn rgba(self) -> Rgba<u8> {
        Rgba([self.r, self.g, self.b, 255])
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Rect {
    pub x: f32,
    pub y: f32,
    pub w: f32,
    pub h: f32,
}

/// 2D drawing target the renderer paints on.
pub trait DrawSurface {
    /// Match the drawing buffer to the displayed element's size.
    fn resize(&mut self, width: u32, height: u32);
    fn clear(&mut self);
    fn stroke_rect(&mut self, rect: Rect, color: Color, line_width: f32);
    fn fill_text(&mut self, text: &str, x: f32, y: f32, color: Color);
}

/// A recorded drawing operation.
#[derive(Clone, Debug, PartialEq)]
pub enum DrawCommand {
    Resize { width: u32, height: u32 },
    Clear,
    StrokeRect { rect: Rect, color: Color, line_width: f32 },
    FillText { text: String, x: f32, y: f32, color: Color },
}

/// Surface that records commands instead of rasterizing them.
#[derive(Clone, Debug, Default)]
pub struct DrawList {
    commands: Vec<DrawCommand>,
}

impl DrawList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn commands(&self) -> &[DrawCommand] {
        &self.commands
    }

    pub fn rects(&self) -> Vec<(Rect, Color)> {
        self.commands
            .iter()
            .filter_map(|cmd| match cmd {
                DrawCommand::StrokeRect { rect, color, .. } => Some((*rect, *color)),
                _ => None,
            })
            .collect()
    }

    pub fn labels(&self) -> Vec<&str> {
        self.commands
            .iter()
            .filter_map(|cmd| match cmd {
                DrawCommand::FillText { text, .. } => Some(text.as_str()),
                _ => None,
            })
            .collect()
    }
}

impl DrawSurface for DrawList {
    fn resize(&mut self, width: u32, height: u32) {
        self.commands.push(DrawCommand::Resize { width, height });
    }

    fn clear(&mut self) {
        // Commands before a clear can never be visible.
        self.commands.clear();
        self.commands.push(DrawCommand::Clear);
    }

    fn stroke_rect(&mut self, rect: Rect, color: Color, line_width: f32) {
        self.commands.push(DrawCommand::StrokeRect {
            rect,
            color,
            line_width,
        });
    }

    fn fill_text(&mut self, text: &str, x: f32, y: f32, color: Color) {
        self.commands.push(DrawCommand::FillText {
            text: text.to_string(),
            x,
            y,
            color,
        });
    }
}

const LABEL_SCALE: f32 = 16.0;
const LABEL_CHAR_WIDTH: u32 = 7;
const LABEL_HEIGHT: u32 = 12;

/// Fonts tried, in order, when no label font is configured.
const SYSTEM_FONT_PATHS: &[&str] = &[
    "/usr/share/fonts/truetype/dejavu/DejaVuSans-Bold.ttf",
    "/usr/share/fonts/truetype/dejavu/DejaVuSans.ttf",
    "/usr/share/fonts/TTF/DejaVuSans.ttf",
    "/usr/share/fonts/dejavu/DejaVuSans.ttf",
    "/usr/share/fonts/truetype/liberation/LiberationSans-Regular.ttf",
    "/System/Library/Fonts/Supplemental/Arial.ttf",
    "/Library/Fonts/Arial.ttf",
    "C:\\Windows\\Fonts\\arial.ttf",
];

/// TrueType/OpenType font used for overlay labels.
#[derive(Clone)]
pub struct LabelFont {
    font: FontArc,
    path: PathBuf,
}

impl fmt::Debug for LabelFont {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LabelFont").field("path", &self.path).finish()
    }
}

impl LabelFont {
    pub fn load(path: &Path) -> Result<Self> {
        let bytes = std::fs::read(path)
            .with_context(|| format!("read label font {}", path.display()))?;
        let font = FontArc::try_from_vec(bytes)
            .map_err(|e| anyhow!("invalid label font {}: {}", path.display(), e))?;
        Ok(Self {
            font,
            path: path.to_path_buf(),
        })
    }

    /// The configured font, else the first loadable system font.
    pub fn discover(configured: Option<&Path>) -> Option<Self> {
        if let Some(path) = configured {
            match Self::load(path) {
                Ok(font) => return Some(font),
                Err(err) => log::warn!("{:#}; trying system fonts", err),
            }
        }
        let found = SYSTEM_FONT_PATHS
            .iter()
            .map(Path::new)
            .filter(|path| path.is_file())
            .find_map(|path| Self::load(path).ok());
        match &found {
            Some(font) => log::debug!("overlay labels use {}", font.path.display()),
            None => log::warn!("no label font found; overlay labels drawn as plain tabs"),
        }
        found
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Transparent RGBA bitmap.
///
/// Labels are rasterized with the label font. Without one, each label is a
/// filled tab sized to the text, so snapshots still show where it sits.
#[derive(Clone, Debug)]
pub struct RasterSurface {
    image: RgbaImage,
    font: Option<LabelFont>,
}

impl Default for RasterSurface {
    fn default() -> Self {
        Self {
            image: RgbaImage::new(0, 0),
            font: None,
        }
    }
}

impl RasterSurface {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_font(font: Option<LabelFont>) -> Self {
        Self {
            font,
            ..Self::default()
        }
    }

    pub fn image(&self) -> &RgbaImage {
        &self.image
    }

    /// Scale `frame` to the overlay size and blend the overlay on top.
    ///
    /// Overlay pixels are color-times-coverage (glyph edges come out of the
    /// rasterizer that way), so blending is `base * (1 - a) + overlay`.
    pub fn composite_onto(&self, frame: &Frame) -> Result<RgbImage> {
        let (width, height) = self.image.dimensions();
        if width == 0 || height == 0 {
            return Err(anyhow!("overlay has no size yet"));
        }
        let base = frame.to_image()?;
        let mut out = if base.dimensions() == (width, height) {
            base
        } else {
            imageops::resize(&base, width, height, FilterType::Triangle)
        };
        for (x, y, pixel) in self.image.enumerate_pixels() {
            let alpha = pixel[3] as u32;
            if alpha == 0 {
                continue;
            }
            let under = out.get_pixel(x, y);
            let blend = |i: usize| {
                let value = under[i] as u32 * (255 - alpha) / 255 + pixel[i] as u32;
                value.min(255) as u8
            };
            out.put_pixel(x, y, Rgb([blend(0), blend(1), blend(2)]));
        }
        Ok(out)
    }
}

impl DrawSurface for RasterSurface {
    fn resize(&mut self, width: u32, height: u32) {
        if self.image.dimensions() != (width, height) {
            self.image = RgbaImage::new(width, height);
        }
    }

    fn clear(&mut self) {
        for pixel in self.image.pixels_mut() {
            *pixel = Rgba([0, 0, 0, 0]);
        }
    }

    fn stroke_rect(&mut self, rect: Rect, color: Color, line_width: f32) {
        let t = line_width.max(1.0).round() as i32;
        let x = rect.x.round() as i32;
        let y = rect.y.round() as i32;
        let w = rect.w.round() as i32;
        let h = rect.h.round() as i32;
        for inset in 0..t {
            let (inner_w, inner_h) = (w - 2 * inset, h - 2 * inset);
            if inner_w <= 0 || inner_h <= 0 {
                break;
            }
            let ring = PixelRect::at(x + inset, y + inset).of_size(inner_w as u32, inner_h as u32);
            draw_hollow_rect_mut(&mut self.image, ring, color.rgba());
        }
    }

    fn fill_text(&mut self, text: &str, x: f32, y: f32, color: Color) {
        if text.is_empty() {
            return;
        }
        let left = x.round() as i32;
        match &self.font {
            Some(label) => {
                let scale = PxScale::from(LABEL_SCALE);
                // `y` is the baseline; glyphs are placed from their top.
                let ascent = label.font.as_scaled(scale).ascent();
                let top = (y - ascent).round() as i32;
                draw_text_mut(
                    &mut self.image,
                    color.rgba(),
                    left,
                    top,
                    scale,
                    &label.font,
                    text,
                );
            }
            None => {
                let width = text.chars().count() as u32 * LABEL_CHAR_WIDTH;
                let top = y.round() as i32 - LABEL_HEIGHT as i32;
                let tab = PixelRect::at(left, top).of_size(width, LABEL_HEIGHT);
                draw_filled_rect_mut(&mut self.image, tab, color.rgba());
            }
        }
    }
}

/// Paints a prediction list aligned to the displayed element.
#[derive(Clone, Debug)]
pub struct OverlayRenderer {
    target_class: String,
    target_color: Color,
    other_color: Color,
    line_width: f32,
}

impl OverlayRenderer {
    pub fn new(target_class: &str) -> Self {
        Self {
            target_class: target_class.to_string(),
            target_color: Color::RED,
            other_color: Color::GREEN,
            line_width: 3.0,
        }
    }

    pub fn target_class(&self) -> &str {
        &self.target_class
    }

    /// Resize, clear, and draw one rectangle and one label per prediction.
    ///
    /// `native` is the source media resolution the boxes are expressed in;
    /// `displayed` is the element's rendered size. A zero native dimension
    /// leaves the layer cleared.
    pub fn render<S: DrawSurface + ?Sized>(
        &self,
        surface: &mut S,
        native: (u32, u32),
        displayed: (u32, u32),
        predictions: &[Prediction],
    ) {
        surface.resize(displayed.0, displayed.1);
        surface.clear();
        if native.0 == 0 || native.1 == 0 {
            return;
        }
        let scale_x = displayed.0 as f32 / native.0 as f32;
        let scale_y = displayed.1 as f32 / native.1 as f32;

        for prediction in predictions {
            let rect = Rect {
                x: prediction.x * scale_x,
                y: prediction.y * scale_y,
                w: prediction.w * scale_x,
                h: prediction.h * scale_y,
            };
            let color = if prediction.is_class(&self.target_class) {
                self.target_color
            } else {
                self.other_color
            };
            surface.stroke_rect(rect, color, self.line_width);
            let label_y = if rect.y > 10.0 { rect.y - 5.0 } else { 10.0 };
            surface.fill_text(&prediction.class.to_uppercase(), rect.x, label_y, color);
        }
    }
}

/// Latest overlay state shared between the poller and the relay listener.
#[derive(Clone, Debug, Default)]
pub struct SharedOverlay {
    inner: Arc<Mutex<OverlayState>>,
}

#[derive(Debug, Default)]
pub struct OverlayState {
    pub surface: RasterSurface,
    pub predictions: Vec<Prediction>,
}

impl SharedOverlay {
    pub fn new() -> Self {
        Self::default()
    }

    /// Shared layer whose raster surface draws labels with `font`.
    pub fn with_font(font: Option<LabelFont>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(OverlayState {
                surface: RasterSurface::with_font(font),
                predictions: Vec::new(),
            })),
        }
    }

    pub fn lock(&self) -> Result<MutexGuard<'_, OverlayState>> {
        self.inner
            .lock()
            .map_err(|_| anyhow!("overlay lock poisoned"))
    }

    /// Re-render the shared layer with a fresh prediction list.
    pub fn paint(
        &self,
        renderer: &OverlayRenderer,
        native: (u32, u32),
        displayed: (u32, u32),
        predictions: &[Prediction],
    ) -> Result<()> {
        let mut state = self.lock()?;
        renderer.render(&mut state.surface, native, displayed, predictions);
        state.predictions = predictions.to_vec();
        Ok(())
    }
}
