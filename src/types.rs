//! Core types for auxscreen.
//!
//! These types define the foundation that everything builds on.
//! They flow through the scheduler and renderer and define what the
//! compositor understands.

use std::collections::BTreeMap;

// =============================================================================
// Color
// =============================================================================

/// RGB color with 8-bit channels (0-255).
///
/// Using integers for exact comparison - no floating point epsilon needed.
/// Device backlights and theme fills both speak this type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Rgb {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Rgb {
    /// Create a new RGB color.
    pub const fn new(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }

    pub const BLACK: Self = Self::new(0, 0, 0);
    pub const WHITE: Self = Self::new(255, 255, 255);
    pub const RED: Self = Self::new(255, 0, 0);

    /// Format as a `#rrggbb` hex string for embedding in style attributes.
    pub fn to_hex(self) -> String {
        format!("#{:02x}{:02x}{:02x}", self.r, self.g, self.b)
    }

    /// Parse a `#rrggbb` hex string.
    pub fn parse(s: &str) -> Option<Self> {
        let s = s.strip_prefix('#')?;
        if s.len() != 6 {
            return None;
        }
        let r = u8::from_str_radix(&s[0..2], 16).ok()?;
        let g = u8::from_str_radix(&s[2..4], 16).ok()?;
        let b = u8::from_str_radix(&s[4..6], 16).ok()?;
        Some(Self { r, g, b })
    }
}

// =============================================================================
// Geometry
// =============================================================================

/// A resolved bounding rectangle in canvas coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Rect {
    pub x: f32,
    pub y: f32,
    pub w: f32,
    pub h: f32,
}

impl Rect {
    pub const fn new(x: f32, y: f32, w: f32, h: f32) -> Self {
        Self { x, y, w, h }
    }

    /// Check whether two rectangles overlap.
    pub fn overlaps(&self, other: &Rect) -> bool {
        self.x < other.x + other.w
            && self.x + self.w > other.x
            && self.y < other.y + other.h
            && self.y + self.h > other.y
    }
}

/// Direction a page transition moves in, reported to transition hooks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Direction {
    #[default]
    Up,
    Down,
}

// =============================================================================
// Canvas
// =============================================================================

/// The raster surface everything paints onto.
pub type Canvas = tiny_skia::Pixmap;

/// Fill a rectangle on a canvas with a translucent color.
pub fn fill_rect(canvas: &mut Canvas, rect: Rect, color: Rgb, alpha: u8) {
    let mut paint = tiny_skia::Paint::default();
    paint.set_color_rgba8(color.r, color.g, color.b, alpha);
    if let Some(r) = tiny_skia::Rect::from_xywh(rect.x, rect.y, rect.w, rect.h) {
        canvas.fill_rect(r, &paint, tiny_skia::Transform::identity(), None);
    }
}

/// Fill an entire canvas with an opaque color.
pub fn clear(canvas: &mut Canvas, color: Rgb) {
    canvas.fill(tiny_skia::Color::from_rgba8(color.r, color.g, color.b, 255));
}

/// Blit one canvas onto another at an offset.
pub fn blit(dst: &mut Canvas, src: &Canvas, x: i32, y: i32) {
    dst.draw_pixmap(
        x,
        y,
        src.as_ref(),
        &tiny_skia::PixmapPaint::default(),
        tiny_skia::Transform::identity(),
        None,
    );
}

// =============================================================================
// Properties
// =============================================================================

/// A value handed to the theme renderer through the property bag.
///
/// The renderer treats these differently: text is substituted into the
/// template, numbers drive progress bars, images are embedded by href.
#[derive(Debug, Clone, PartialEq)]
pub enum PropertyValue {
    Text(String),
    Int(i64),
    Float(f64),
    Bool(bool),
    /// Path to an image file on disk.
    ImagePath(String),
    /// Raw encoded image bytes (PNG), embedded as a data URL.
    ImageData(Vec<u8>),
}

impl PropertyValue {
    /// Truthiness for `del` directives: absent, empty string and `false`
    /// all count as falsy.
    pub fn is_truthy(&self) -> bool {
        match self {
            Self::Text(s) => !s.is_empty(),
            Self::Bool(b) => *b,
            Self::Int(_) | Self::Float(_) | Self::ImagePath(_) | Self::ImageData(_) => true,
        }
    }

    /// Numeric view, used by progress bars.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Int(i) => Some(*i as f64),
            Self::Float(f) => Some(*f),
            Self::Text(s) => s.parse().ok(),
            _ => None,
        }
    }

    /// Text view used for template substitution.
    pub fn to_text(&self) -> String {
        match self {
            Self::Text(s) => s.clone(),
            Self::Int(i) => i.to_string(),
            Self::Float(f) => f.to_string(),
            Self::Bool(b) => b.to_string(),
            Self::ImagePath(p) => p.clone(),
            Self::ImageData(_) => String::new(),
        }
    }
}

impl From<&str> for PropertyValue {
    fn from(s: &str) -> Self {
        Self::Text(s.to_string())
    }
}

impl From<String> for PropertyValue {
    fn from(s: String) -> Self {
        Self::Text(s)
    }
}

impl From<i64> for PropertyValue {
    fn from(i: i64) -> Self {
        Self::Int(i)
    }
}

impl From<f64> for PropertyValue {
    fn from(f: f64) -> Self {
        Self::Float(f)
    }
}

impl From<bool> for PropertyValue {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

/// Flat string-keyed bag handed to the renderer. Ordered so that two bags
/// with the same contents always compare equal.
pub type PropertyMap = BTreeMap<String, PropertyValue>;

/// Secondary bag for non-visual metadata.
pub type AttributeMap = BTreeMap<String, String>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rgb_hex_round_trip() {
        let c = Rgb::new(18, 52, 86);
        assert_eq!(c.to_hex(), "#123456");
        assert_eq!(Rgb::parse("#123456"), Some(c));
        assert_eq!(Rgb::parse("123456"), None);
        assert_eq!(Rgb::parse("#12345"), None);
    }

    #[test]
    fn test_rect_overlaps() {
        let a = Rect::new(0.0, 0.0, 10.0, 10.0);
        let b = Rect::new(5.0, 5.0, 10.0, 10.0);
        let c = Rect::new(20.0, 20.0, 5.0, 5.0);
        assert!(a.overlaps(&b));
        assert!(!a.overlaps(&c));
    }

    #[test]
    fn test_property_truthiness() {
        assert!(!PropertyValue::Text(String::new()).is_truthy());
        assert!(PropertyValue::Text("x".into()).is_truthy());
        assert!(!PropertyValue::Bool(false).is_truthy());
        assert!(PropertyValue::Int(0).is_truthy());
    }

    #[test]
    fn test_property_as_f64() {
        assert_eq!(PropertyValue::Int(42).as_f64(), Some(42.0));
        assert_eq!(PropertyValue::Text("3.5".into()).as_f64(), Some(3.5));
        assert_eq!(PropertyValue::Bool(true).as_f64(), None);
    }
}
