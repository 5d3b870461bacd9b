//! Out-of-band text layout.
//!
//! Text elements with a clip region are pulled out of the vector document
//! and painted in a second pass, because the raster engine's native text
//! wrapping is not sufficient for autoscroll and autowrap. Keeping the two
//! passes separate means the vector render and the text layout compose
//! without knowing about each other.

use std::collections::BTreeMap;
use std::sync::Arc;

use log::warn;

use crate::scroll::TextAlign;
use crate::types::{Canvas, Rect, Rgb};

use super::document::{format_style, xml_escape};

// =============================================================================
// TEXT BOX
// =============================================================================

/// A text layout job extracted from the template.
#[derive(Debug, Clone)]
pub struct TextBox {
    /// Id of the originating template element (scroll states key off it).
    pub id: String,
    /// Text after property substitution.
    pub text: String,
    /// Parsed `style` attribute of the originating element.
    pub styles: BTreeMap<String, String>,
    /// Region the text is clipped to, in canvas coordinates.
    pub clip: Rect,
    /// Natural bounds of the laid-out text.
    pub bounds: Rect,
    /// Wrap to the clip width instead of scrolling horizontally.
    pub wrap: bool,
    /// Synthesize a background-colored shadow under the text.
    pub normal_shadow: bool,
    /// Synthesize a foreground-colored shadow under the text.
    pub reverse_shadow: bool,
    /// Vertical decode offset for wrap scrolling.
    pub base: f32,
    /// Horizontal scroll offset applied to the text origin.
    pub x_offset: f32,
}

impl TextBox {
    pub fn align(&self) -> TextAlign {
        self.styles
            .get("text-align")
            .map(|v| TextAlign::parse(v))
            .unwrap_or_default()
    }

    /// Font size in pixels from the style, defaulting to 10px.
    pub fn font_size(&self) -> f32 {
        self.styles
            .get("font-size")
            .and_then(|v| v.trim_end_matches("px").parse().ok())
            .unwrap_or(10.0)
    }

    /// Line advance used when stacking wrapped lines.
    pub fn line_height(&self) -> f32 {
        self.font_size() * 1.2
    }
}

// =============================================================================
// MEASUREMENT
// =============================================================================

/// Measures the natural pixel size of a run of styled text.
///
/// The production implementation goes through usvg so measurement agrees
/// exactly with rasterization; tests substitute a deterministic one.
pub trait TextMeasurer {
    fn measure(&self, text: &str, styles: &BTreeMap<String, String>) -> (f32, f32);
}

/// usvg-backed measurer: lays the text out as a standalone fragment and
/// reads back the resolved bounding box.
pub struct SvgTextMeasurer {
    options: usvg::Options<'static>,
}

impl SvgTextMeasurer {
    pub fn new(fontdb: Arc<usvg::fontdb::Database>) -> Self {
        let mut options = usvg::Options::default();
        options.fontdb = fontdb;
        Self { options }
    }
}

impl TextMeasurer for SvgTextMeasurer {
    fn measure(&self, text: &str, styles: &BTreeMap<String, String>) -> (f32, f32) {
        let svg = format!(
            "<svg xmlns=\"http://www.w3.org/2000/svg\" width=\"10000\" height=\"1000\">\
             <text x=\"0\" y=\"500\" style=\"{}\">{}</text></svg>",
            xml_escape(&format_style(styles)),
            xml_escape(text),
        );
        match usvg::Tree::from_str(&svg, &self.options) {
            Ok(tree) => {
                let bbox = tree.root().abs_bounding_box();
                if bbox.width() > 0.0 {
                    return (bbox.width(), bbox.height());
                }
                fallback_measure(text, styles)
            }
            Err(err) => {
                warn!("text measurement failed, using heuristic: {err}");
                fallback_measure(text, styles)
            }
        }
    }
}

/// Width heuristic used when no fonts are available.
fn fallback_measure(text: &str, styles: &BTreeMap<String, String>) -> (f32, f32) {
    let size: f32 = styles
        .get("font-size")
        .and_then(|v| v.trim_end_matches("px").parse().ok())
        .unwrap_or(10.0);
    (text.chars().count() as f32 * size * 0.6, size)
}

// =============================================================================
// WRAPPING
// =============================================================================

/// Greedy word wrap against a pixel width. A word longer than the width
/// gets a line of its own rather than being split.
pub fn wrap_text(
    text: &str,
    width: f32,
    styles: &BTreeMap<String, String>,
    measurer: &dyn TextMeasurer,
) -> Vec<String> {
    let mut lines = Vec::new();
    for raw_line in text.lines() {
        let mut current = String::new();
        for word in raw_line.split_whitespace() {
            let candidate = if current.is_empty() {
                word.to_string()
            } else {
                format!("{current} {word}")
            };
            if current.is_empty() || measurer.measure(&candidate, styles).0 <= width {
                current = candidate;
            } else {
                lines.push(current);
                current = word.to_string();
            }
        }
        lines.push(current);
    }
    if lines.is_empty() {
        lines.push(String::new());
    }
    lines
}

// =============================================================================
// RENDERING
// =============================================================================

/// Paint a text box onto the canvas, honoring clip, alignment, wrap, scroll
/// offsets and shadow. Renders through the same SVG engine as the vector
/// pass so styling stays consistent.
pub fn render_text_box(
    canvas: &mut Canvas,
    text_box: &TextBox,
    fg: Rgb,
    bg: Rgb,
    measurer: &dyn TextMeasurer,
    options: &usvg::Options<'_>,
) {
    let clip_w = text_box.clip.w.ceil().max(1.0) as u32;
    let clip_h = text_box.clip.h.ceil().max(1.0) as u32;
    let Some(mut clip_pixmap) = Canvas::new(clip_w, clip_h) else {
        return;
    };

    let lines = if text_box.wrap {
        wrap_text(&text_box.text, text_box.clip.w, &text_box.styles, measurer)
    } else {
        vec![text_box.text.clone()]
    };

    let svg = fragment_svg(text_box, &lines, fg, bg);
    let tree = match usvg::Tree::from_str(&svg, options) {
        Ok(tree) => tree,
        Err(err) => {
            warn!("skipping text box {}: {err}", text_box.id);
            return;
        }
    };
    resvg::render(
        &tree,
        tiny_skia::Transform::identity(),
        &mut clip_pixmap.as_mut(),
    );
    crate::types::blit(
        canvas,
        &clip_pixmap,
        text_box.clip.x as i32,
        text_box.clip.y as i32,
    );
}

/// Build a standalone SVG fragment for the wrapped lines, in clip-local
/// coordinates, including the eight-way shadow copies when requested.
fn fragment_svg(text_box: &TextBox, lines: &[String], fg: Rgb, bg: Rgb) -> String {
    let mut styles = text_box.styles.clone();
    styles.remove("text-align");
    if !styles.contains_key("fill") {
        styles.insert("fill".to_string(), fg.to_hex());
    }

    let shadow_fill = if text_box.reverse_shadow {
        Some(fg)
    } else if text_box.normal_shadow {
        Some(bg)
    } else {
        None
    };

    let origin_x = (text_box.bounds.x - text_box.clip.x) + text_box.x_offset;
    let ascent = text_box.font_size();
    let line_height = text_box.line_height();
    let clip_w = text_box.clip.w.ceil().max(1.0);
    let clip_h = text_box.clip.h.ceil().max(1.0);

    let mut body = String::new();
    let mut emit = |dx: f32, dy: f32, style: &BTreeMap<String, String>| {
        for (i, line) in lines.iter().enumerate() {
            let y = ascent + i as f32 * line_height - text_box.base + dy;
            // Lines fully outside the clip are not worth emitting.
            if y < -line_height || y > clip_h + line_height {
                continue;
            }
            body.push_str(&format!(
                "<text x=\"{}\" y=\"{}\" style=\"{}\">{}</text>",
                origin_x + dx,
                y,
                xml_escape(&format_style(style)),
                xml_escape(line),
            ));
        }
    };

    if let Some(shadow) = shadow_fill {
        let mut shadow_styles = styles.clone();
        shadow_styles.insert("fill".to_string(), shadow.to_hex());
        for dx in [-1.0f32, 0.0, 1.0] {
            for dy in [-1.0f32, 0.0, 1.0] {
                if dx != 0.0 || dy != 0.0 {
                    emit(dx, dy, &shadow_styles);
                }
            }
        }
    }
    emit(0.0, 0.0, &styles);

    format!(
        "<svg xmlns=\"http://www.w3.org/2000/svg\" width=\"{clip_w}\" height=\"{clip_h}\" \
         viewBox=\"0 0 {clip_w} {clip_h}\">{body}</svg>"
    )
}
