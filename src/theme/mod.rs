//! Theme System for auxscreen.
//!
//! A theme is a vector-graphics template plus the logic to bind a property
//! bag to it and rasterize the result. Loading resolves a per-model/variant
//! file through a fallback chain; drawing runs the substitution passes over
//! a fresh copy of the template, extracts clipped text into out-of-band
//! layout jobs, and rasterizes everything onto the caller's canvas.
//!
//! Processing is cached: as long as the property and attribute bags are
//! value-equal to the previous render and nobody marked the theme dirty,
//! the processed document is reused and only rasterization repeats (which
//! is what makes periodic scroll ticks cheap).

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use log::{debug, warn};

use crate::error::{Result, ScreenError};
use crate::scroll::{ScrollSet, ScrollState, TextAlign};
use crate::types::{AttributeMap, Canvas, PropertyMap, Rect, Rgb};

pub mod document;
pub mod passes;
pub mod text;

pub use document::VectorDocument;
pub use text::{SvgTextMeasurer, TextBox, TextMeasurer};

// =============================================================================
// RENDER CONTEXT
// =============================================================================

/// Per-draw inputs that come from the device rather than the page: current
/// colors and the configured scroll step (0 disables scrolling).
#[derive(Debug, Clone)]
pub struct RenderContext {
    pub foreground: Rgb,
    pub background: Rgb,
    pub highlight: Option<Rgb>,
    pub scroll_step: f32,
}

impl Default for RenderContext {
    fn default() -> Self {
        Self {
            foreground: Rgb::BLACK,
            background: Rgb::WHITE,
            highlight: None,
            scroll_step: 1.0,
        }
    }
}

// =============================================================================
// CACHED RENDER
// =============================================================================

/// The processed document and everything derived from it, cached until the
/// inputs change.
#[derive(Debug, Clone)]
pub struct Render {
    pub document: VectorDocument,
    pub properties: PropertyMap,
    pub attributes: AttributeMap,
    pub text_boxes: Vec<TextBox>,
    /// Resolved bounds of template elements matching child component ids.
    pub child_bounds: BTreeMap<String, Rect>,
}

// =============================================================================
// THEME
// =============================================================================

/// An immutable-per-load template plus its mutable render state.
pub struct Theme {
    dir: PathBuf,
    template: VectorDocument,
    render: Option<Render>,
    dirty: bool,
    /// When set, any change to the incoming bags forces a re-process.
    auto_dirty: bool,
    generation: u64,
    scroll: ScrollSet,
    options: usvg::Options<'static>,
    measurer: Box<dyn TextMeasurer + Send>,
}

impl std::fmt::Debug for Theme {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Theme")
            .field("dir", &self.dir)
            .field("dirty", &self.dirty)
            .field("generation", &self.generation)
            .finish_non_exhaustive()
    }
}

impl Theme {
    /// Load a theme from a directory, resolving the template file for the
    /// given device model and optional variant.
    pub fn load(
        dir: &Path,
        theme_root: Option<&Path>,
        model: &str,
        variant: Option<&str>,
    ) -> Result<Self> {
        let path = resolve_template(dir, theme_root, model, variant, "svg")?;
        debug!("loading theme template {}", path.display());
        let svg = std::fs::read_to_string(&path).map_err(|err| ScreenError::TemplateParse {
            details: format!("{}: {err}", path.display()),
        })?;
        Self::from_svg(&svg, dir)
    }

    /// Build a theme from in-memory template markup.
    pub fn from_svg(svg: &str, dir: &Path) -> Result<Self> {
        let template = VectorDocument::parse(svg)?;
        let mut fontdb = usvg::fontdb::Database::new();
        fontdb.load_system_fonts();
        let fontdb = Arc::new(fontdb);
        let mut options = usvg::Options::default();
        options.fontdb = Arc::clone(&fontdb);
        Ok(Self {
            dir: dir.to_path_buf(),
            template,
            render: None,
            dirty: true,
            auto_dirty: true,
            generation: 0,
            scroll: ScrollSet::new(),
            measurer: Box::new(SvgTextMeasurer::new(fontdb)),
            options,
        })
    }

    /// Replace the text measurer (tests use a deterministic one).
    pub fn set_measurer(&mut self, measurer: Box<dyn TextMeasurer + Send>) {
        self.measurer = measurer;
    }

    /// Force the next draw to re-process the template.
    pub fn mark_dirty(&mut self) {
        self.dirty = true;
    }

    /// How many times the template has been processed. Stable across draws
    /// whose inputs did not change.
    pub fn render_generation(&self) -> u64 {
        self.generation
    }

    /// The current processed document, if any.
    pub fn render(&self) -> Option<&Render> {
        self.render.as_ref()
    }

    /// True iff any element currently needs scroll animation.
    pub fn is_scroll_required(&self) -> bool {
        self.scroll.is_scroll_required()
    }

    /// Advance all scroll states one step. Returns true when a repaint is
    /// worthwhile.
    pub fn do_scroll(&mut self) -> bool {
        self.scroll.tick()
    }

    /// Drop all scroll state (used when the owning component is removed).
    pub fn clear_scroll(&mut self) {
        self.scroll.clear();
    }

    /// Render the theme onto a canvas.
    ///
    /// `child_ids` are the ids of child components of the bound component;
    /// their template bounds are resolved into the returned render so the
    /// caller can recurse, and `hidden-root` placeholders are removed.
    pub fn draw(
        &mut self,
        canvas: &mut Canvas,
        ctx: &RenderContext,
        properties: &PropertyMap,
        attributes: &AttributeMap,
        child_ids: &[String],
    ) -> Result<()> {
        if self.auto_dirty {
            if let Some(render) = &self.render {
                if render.properties != *properties || render.attributes != *attributes {
                    self.dirty = true;
                }
            }
        }

        if self.render.is_none() || self.dirty {
            self.process(ctx, properties, attributes, child_ids);
        }
        self.apply_scroll();
        self.rasterize(canvas, ctx)
    }

    /// Run the substitution passes over a fresh copy of the template and
    /// cache the result.
    fn process(
        &mut self,
        ctx: &RenderContext,
        properties: &PropertyMap,
        attributes: &AttributeMap,
        child_ids: &[String],
    ) {
        let mut doc = self.template.clone();
        let root = &mut doc.root;

        passes::process_deletes(root, properties);

        // Resolve child component placeholders before geometry passes so a
        // hidden root never reaches the rasterizer.
        let mut child_bounds = BTreeMap::new();
        for id in child_ids {
            let found = root
                .find_by_id(id)
                .map(|e| (e.bounds(), e.has_class("hidden-root")));
            match found {
                Some((bounds, hidden)) => {
                    child_bounds.insert(id.clone(), bounds);
                    if hidden {
                        root.remove_where(&|e| e.id() == Some(id.as_str()));
                    }
                }
                None => warn!("no template element for child component {id}"),
            }
        }

        passes::set_progress_bars(root, properties);
        passes::set_relative_image_paths(root, &self.dir);
        passes::convert_image_urls(root, properties);
        passes::synthesize_shadows(root, "shadow", ctx.background);
        passes::synthesize_shadows(root, "reverseshadow", ctx.foreground);
        if let Some(highlight) = ctx.highlight {
            passes::set_highlight_color(root, highlight);
        }

        let text_boxes = extract_text_boxes(
            root,
            properties,
            &mut self.scroll,
            self.measurer.as_ref(),
            ctx.scroll_step,
        );

        passes::set_default_style(root, ctx.foreground);

        self.render = Some(Render {
            document: doc,
            properties: properties.clone(),
            attributes: attributes.clone(),
            text_boxes,
            child_bounds,
        });
        self.dirty = false;
        self.generation += 1;
    }

    /// Copy current scroll offsets into the cached text boxes.
    fn apply_scroll(&mut self) {
        let Some(render) = self.render.as_mut() else {
            return;
        };
        for text_box in &mut render.text_boxes {
            if let Some(state) = self.scroll.get(&text_box.id) {
                match state.kind {
                    crate::scroll::ScrollKind::Marquee => text_box.x_offset = state.adjust,
                    crate::scroll::ScrollKind::Wrap => text_box.base = state.adjust,
                }
            }
        }
    }

    /// Substitute properties into the processed markup and rasterize,
    /// then draw the extracted text boxes on top.
    fn rasterize(&mut self, canvas: &mut Canvas, ctx: &RenderContext) -> Result<()> {
        let Some(render) = self.render.as_ref() else {
            return Ok(());
        };

        let xml = render.document.to_xml();
        let xml = document::substitute(&xml, |key| {
            render
                .properties
                .get(key)
                .map(|v| document::xml_escape(&v.to_text()))
        });

        let tree =
            usvg::Tree::from_str(&xml, &self.options).map_err(|err| ScreenError::TemplateParse {
                details: err.to_string(),
            })?;
        resvg::render(&tree, tiny_skia::Transform::identity(), &mut canvas.as_mut());

        for text_box in &render.text_boxes {
            text::render_text_box(
                canvas,
                text_box,
                ctx.foreground,
                ctx.background,
                self.measurer.as_ref(),
                &self.options,
            );
        }
        Ok(())
    }
}

// =============================================================================
// TEXT EXTRACTION
// =============================================================================

/// Pull clipped text elements out of the document into layout jobs, wiring
/// up scroll states for any text that overflows its clip. States are
/// created on first overflow and dropped as soon as the text fits again.
fn extract_text_boxes(
    root: &mut document::Element,
    properties: &PropertyMap,
    scroll: &mut ScrollSet,
    measurer: &dyn TextMeasurer,
    scroll_step: f32,
) -> Vec<TextBox> {
    // Collect candidate ids first; extraction mutates the tree.
    let mut candidates = Vec::new();
    {
        let mut walk = |e: &mut document::Element| {
            if e.local_name() == "text" && e.attr("clip-path").is_some() {
                if let Some(id) = e.id() {
                    candidates.push(id.to_string());
                }
            }
        };
        root.for_each_mut(&mut walk);
    }

    let mut boxes = Vec::new();
    for id in candidates {
        let Some(element) = root.find_by_id(&id) else {
            continue;
        };
        let element = element.clone();

        let Some(clip) = clip_bounds(root, &element) else {
            warn!("text element {id} references a missing clip region, skipping");
            continue;
        };

        let raw_text = element.text_content();
        if raw_text.trim().is_empty() {
            warn!("clipped text element {id} has no text, skipping");
            continue;
        }
        let resolved = document::substitute(&raw_text, |key| {
            properties.get(key).map(|v| v.to_text())
        });

        let styles = element
            .attr("style")
            .map(document::parse_style)
            .unwrap_or_default();
        let vertical_wrap = element.attr("title") == Some("vertical-wrap");
        let element_bounds = element.bounds();

        let mut text_box = TextBox {
            id: id.clone(),
            text: resolved,
            styles,
            clip,
            bounds: element_bounds,
            wrap: vertical_wrap,
            normal_shadow: element.has_class("shadow") && !element.has_class("reverseshadow"),
            reverse_shadow: element.has_class("reverseshadow"),
            base: 0.0,
            x_offset: 0.0,
        };

        if vertical_wrap {
            let lines = text::wrap_text(&text_box.text, clip.w, &text_box.styles, measurer);
            let text_height = lines.len() as f32 * text_box.line_height();
            text_box.bounds.h = text_height;
            if scroll_step > 0.0 && text_height > clip.h {
                let diff = text_height - clip.h;
                let state = scroll.get_or_insert_with(&id, || ScrollState::wrap(diff, scroll_step));
                state.step = scroll_step;
                text_box.base = state.adjust;
            } else {
                scroll.remove(&id);
            }
        } else {
            let (text_width, _) = measurer.measure(&text_box.text, &text_box.styles);
            text_box.bounds.w = text_width;
            if scroll_step > 0.0 && text_width > clip.w {
                let diff = text_width - clip.w;
                let align = text_box
                    .styles
                    .get("text-align")
                    .map(|v| TextAlign::parse(v))
                    .unwrap_or_default();
                let original = element_bounds.x;
                let state = scroll
                    .get_or_insert_with(&id, || ScrollState::marquee(align, diff, original, scroll_step));
                state.step = scroll_step;
                text_box.x_offset = state.adjust;
            } else {
                scroll.remove(&id);
            }
        }

        boxes.push(text_box);
        root.remove_where(&|e| e.id() == Some(id.as_str()));
    }
    boxes
}

/// Resolve `clip-path="url(#id)"` into the bounds of the clip's rect.
fn clip_bounds(root: &document::Element, element: &document::Element) -> Option<Rect> {
    let clip_ref = element.attr("clip-path")?;
    let id = clip_ref.strip_prefix("url(#")?.strip_suffix(')')?;
    let clip_element = root.find_by_id(id)?;
    let rect = if clip_element.local_name() == "rect" {
        clip_element
    } else {
        clip_element.find_by_tag("rect")?
    };
    Some(rect.bounds())
}

// =============================================================================
// FILE RESOLUTION
// =============================================================================

/// Resolve a theme file through the 4-level fallback chain:
/// `<dir>/<model><variant>.<ext>` → `<theme-root>/default/<model><variant>.<ext>`
/// → `<dir>/default<variant>.<ext>` → `<theme-root>/default/default<variant>.<ext>`.
pub fn resolve_template(
    dir: &Path,
    theme_root: Option<&Path>,
    model: &str,
    variant: Option<&str>,
    extension: &str,
) -> Result<PathBuf> {
    match resolve_template_optional(dir, theme_root, model, variant, extension) {
        Some(path) => Ok(path),
        None => Err(ScreenError::ThemeResolution {
            dir: dir.display().to_string(),
            model: model.to_string(),
            variant: variant.map(str::to_string),
        }),
    }
}

/// Like [`resolve_template`] but for files the caller can live without.
pub fn resolve_template_optional(
    dir: &Path,
    theme_root: Option<&Path>,
    model: &str,
    variant: Option<&str>,
    extension: &str,
) -> Option<PathBuf> {
    let suffix = match variant {
        Some(v) if !v.is_empty() => format!("-{v}"),
        _ => String::new(),
    };
    let mut chain = vec![dir.join(format!("{model}{suffix}.{extension}"))];
    if let Some(theme_root) = theme_root {
        chain.push(
            theme_root
                .join("default")
                .join(format!("{model}{suffix}.{extension}")),
        );
    }
    chain.push(dir.join(format!("default{suffix}.{extension}")));
    if let Some(theme_root) = theme_root {
        chain.push(
            theme_root
                .join("default")
                .join(format!("default{suffix}.{extension}")),
        );
    }
    chain.into_iter().find(|p| p.exists())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use std::fs;

    struct FixedMeasurer;

    impl TextMeasurer for FixedMeasurer {
        fn measure(&self, text: &str, _styles: &BTreeMap<String, String>) -> (f32, f32) {
            (text.chars().count() as f32 * 6.0, 10.0)
        }
    }

    const TEMPLATE: &str = r#"<svg xmlns="http://www.w3.org/2000/svg" width="160" height="43">
  <defs><clipPath id="titleclip"><rect x="10" y="2" width="60" height="12"/></clipPath></defs>
  <rect id="vol_progress" class="progress" x="2" y="30" width="100" height="6"/>
  <rect id="warning" title="del !warning" x="0" y="0" width="10" height="10"/>
  <text id="title" clip-path="url(#titleclip)" x="10" y="12" style="text-align:start">${title}</text>
</svg>"#;

    fn theme() -> Theme {
        let mut t = Theme::from_svg(TEMPLATE, Path::new("/nonexistent")).unwrap();
        t.set_measurer(Box::new(FixedMeasurer));
        t
    }

    fn props(title: &str, vol: i64) -> PropertyMap {
        let mut p = PropertyMap::new();
        p.insert("title".to_string(), title.into());
        p.insert("vol".to_string(), vol.into());
        p
    }

    fn draw(theme: &mut Theme, properties: &PropertyMap) {
        let mut canvas = Canvas::new(160, 43).unwrap();
        theme
            .draw(
                &mut canvas,
                &RenderContext::default(),
                properties,
                &AttributeMap::new(),
                &[],
            )
            .unwrap();
    }

    #[test]
    fn test_render_cache_idempotence() {
        let mut t = theme();
        let p = props("hi", 50);
        draw(&mut t, &p);
        let generation = t.render_generation();
        draw(&mut t, &p);
        assert_eq!(t.render_generation(), generation);
    }

    #[test]
    fn test_changed_properties_invalidate_cache() {
        let mut t = theme();
        draw(&mut t, &props("hi", 50));
        let generation = t.render_generation();
        draw(&mut t, &props("hi", 60));
        assert_eq!(t.render_generation(), generation + 1);
    }

    #[test]
    fn test_mark_dirty_forces_reprocess() {
        let mut t = theme();
        let p = props("hi", 50);
        draw(&mut t, &p);
        let generation = t.render_generation();
        t.mark_dirty();
        draw(&mut t, &p);
        assert_eq!(t.render_generation(), generation + 1);
    }

    #[test]
    fn test_delete_directive_removes_element() {
        let mut t = theme();
        // "warning" property absent → `del !warning` fires.
        draw(&mut t, &props("hi", 50));
        let render = t.render().unwrap();
        assert!(render.document.root.find_by_id("warning").is_none());
    }

    #[test]
    fn test_short_text_needs_no_scroll() {
        let mut t = theme();
        // 2 chars * 6px = 12px fits the 60px clip.
        draw(&mut t, &props("hi", 50));
        assert!(!t.is_scroll_required());
    }

    #[test]
    fn test_long_text_creates_marquee_and_ticks() {
        let mut t = theme();
        // 20 chars * 6px = 120px overflows the 60px clip by 60.
        draw(&mut t, &props("aaaaaaaaaaaaaaaaaaaa", 50));
        assert!(t.is_scroll_required());

        assert!(t.do_scroll());
        let p = props("aaaaaaaaaaaaaaaaaaaa", 50);
        draw(&mut t, &p);
        let render = t.render().unwrap();
        let text_box = &render.text_boxes[0];
        assert!(text_box.x_offset != 0.0);
        // Scrolling alone must not reprocess the template.
        assert_eq!(t.render_generation(), 1);
    }

    #[test]
    fn test_scroll_state_dropped_when_text_fits_again() {
        let mut t = theme();
        draw(&mut t, &props("aaaaaaaaaaaaaaaaaaaa", 50));
        assert!(t.is_scroll_required());
        draw(&mut t, &props("hi", 50));
        assert!(!t.is_scroll_required());
    }

    #[test]
    fn test_text_element_extracted_from_document() {
        let mut t = theme();
        draw(&mut t, &props("hi", 50));
        let render = t.render().unwrap();
        assert!(render.document.root.find_by_id("title").is_none());
        assert_eq!(render.text_boxes.len(), 1);
        assert_eq!(render.text_boxes[0].text, "hi");
    }

    #[test]
    fn test_resolution_chain() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().join("plugin");
        let root = tmp.path().join("themes");
        fs::create_dir_all(&dir).unwrap();
        fs::create_dir_all(root.join("default")).unwrap();

        // Only the last fallback exists.
        fs::write(root.join("default/default.svg"), "<svg/>").unwrap();
        let path = resolve_template(&dir, Some(&root), "g19", None, "svg").unwrap();
        assert_eq!(path, root.join("default/default.svg"));

        // A model-specific file in the plugin dir takes precedence.
        fs::write(dir.join("g19.svg"), "<svg/>").unwrap();
        let path = resolve_template(&dir, Some(&root), "g19", None, "svg").unwrap();
        assert_eq!(path, dir.join("g19.svg"));

        // Variants get a dash separator.
        fs::write(dir.join("g19-menu.svg"), "<svg/>").unwrap();
        let path = resolve_template(&dir, Some(&root), "g19", Some("menu"), "svg").unwrap();
        assert_eq!(path, dir.join("g19-menu.svg"));
    }

    #[test]
    fn test_missing_template_is_fatal_unless_optional() {
        let tmp = tempfile::tempdir().unwrap();
        let err = resolve_template(tmp.path(), None, "g19", None, "svg").unwrap_err();
        assert!(matches!(err, ScreenError::ThemeResolution { .. }));
        assert!(resolve_template_optional(tmp.path(), None, "g19", None, "svg").is_none());
    }

    #[test]
    fn test_missing_clip_region_is_skipped_not_fatal() {
        let svg = r#"<svg xmlns="http://www.w3.org/2000/svg" width="160" height="43">
          <text id="t" clip-path="url(#nope)" x="0" y="10">hello</text>
        </svg>"#;
        let mut t = Theme::from_svg(svg, Path::new("/nonexistent")).unwrap();
        t.set_measurer(Box::new(FixedMeasurer));
        let mut canvas = Canvas::new(160, 43).unwrap();
        let p = PropertyMap::new();
        t.draw(
            &mut canvas,
            &RenderContext::default(),
            &p,
            &AttributeMap::new(),
            &[],
        )
        .unwrap();
        // The element stays in the document and no text box is queued.
        let render = t.render().unwrap();
        assert!(render.document.root.find_by_id("t").is_some());
        assert!(render.text_boxes.is_empty());
    }
}
