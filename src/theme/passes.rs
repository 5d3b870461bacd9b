//! Template substitution passes.
//!
//! Each pass takes the working copy of the template document and rewrites it
//! in place. Pass order matters and is owned by [`Theme::draw`]: deletes run
//! before anything derives geometry, shadows run after geometry is final,
//! and the default style runs last so explicit styles always win.
//!
//! A malformed element never aborts a render; it is logged and skipped.
//!
//! [`Theme::draw`]: super::Theme

use std::path::Path;

use base64::Engine as _;
use log::warn;

use crate::types::{PropertyMap, PropertyValue, Rgb};

use super::document::{format_style, parse_style, Element, Node};

/// Placeholder color themes use for "the configured highlight color".
pub const HIGHLIGHT_PLACEHOLDER: &str = "#ff0000";

// =============================================================================
// CONDITIONAL DELETES
// =============================================================================

/// Remove every element tagged `title="del <key>"` when the property is
/// truthy, or `title="del !<key>"` when it is falsy. Absent properties and
/// empty strings count as falsy.
pub fn process_deletes(root: &mut Element, properties: &PropertyMap) {
    root.remove_where(&|element| {
        let Some(title) = element.attr("title") else {
            return false;
        };
        let Some(var) = title.strip_prefix("del ") else {
            return false;
        };
        let (var, wanted) = match var.strip_prefix('!') {
            Some(inverted) => (inverted, false),
            None => (var, true),
        };
        properties.get(var.trim()).is_some_and(PropertyValue::is_truthy) == wanted
    });
}

// =============================================================================
// PROGRESS BARS
// =============================================================================

/// Derive the width of every `class="progress"` element from the property
/// named by its id (less the `_progress` suffix). The value is clamped to
/// `[0.1, 100.0]` so a bar at 0% stays visible.
pub fn set_progress_bars(root: &mut Element, properties: &PropertyMap) {
    root.for_each_mut(&mut |element| {
        if !element.has_class("progress") {
            return;
        }
        let id = element.id().unwrap_or_default().to_string();
        let Some(key) = id.strip_suffix("_progress") else {
            warn!("progress element id {id:?} does not end in _progress, skipping");
            return;
        };
        let Some(value) = properties.get(key).and_then(PropertyValue::as_f64) else {
            warn!("progress element {id:?} has no matching property, skipping");
            return;
        };
        let value = value.clamp(0.1, 100.0);
        let width = (element.bounds().w as f64 / 100.0) * value;
        let formatted = if width.fract() == 0.0 {
            format!("{}", width as i64)
        } else {
            format!("{width}")
        };
        element.set_attr("width", &formatted);
    });
}

// =============================================================================
// IMAGES
// =============================================================================

/// Anchor relative image hrefs at the theme directory.
pub fn set_relative_image_paths(root: &mut Element, theme_dir: &Path) {
    root.for_each_mut(&mut |element| {
        if element.local_name() != "image" {
            return;
        }
        let Some(href) = element.attr("xlink:href").or_else(|| element.attr("href")) else {
            return;
        };
        let absolute = href.starts_with('/')
            || href.contains("://")
            || href.starts_with("data:")
            || href.contains("${");
        if !absolute {
            let joined = theme_dir.join(href).to_string_lossy().into_owned();
            set_href(element, &joined);
        }
    });
}

/// Embed property-supplied images into elements whose `title` names a
/// property: a filesystem path becomes a file href, raw bytes become an
/// inline data URL.
pub fn convert_image_urls(root: &mut Element, properties: &PropertyMap) {
    root.for_each_mut(&mut |element| {
        if element.local_name() != "image" {
            return;
        }
        let Some(value) = element.attr("title").and_then(|t| properties.get(t)) else {
            return;
        };
        let href = match value {
            PropertyValue::ImagePath(path) => path.strip_prefix("file:").unwrap_or(path).to_string(),
            PropertyValue::Text(text) if text.starts_with("file:") => {
                text.trim_start_matches("file:").to_string()
            }
            PropertyValue::Text(text) if text.starts_with('/') => text.clone(),
            PropertyValue::ImageData(bytes) => format!(
                "data:image/png;base64,{}",
                base64::engine::general_purpose::STANDARD.encode(bytes)
            ),
            // Anything else is assumed to already be an encoded payload.
            PropertyValue::Text(text) => format!("data:image/png;base64,{text}"),
            _ => return,
        };
        set_href(element, &href);
    });
}

fn set_href(element: &mut Element, href: &str) {
    if element.attr("xlink:href").is_some() {
        element.set_attr("xlink:href", href);
    } else {
        element.set_attr("href", href);
    }
}

// =============================================================================
// SHADOWS
// =============================================================================

/// Expand every element with the given class into eight offset copies
/// recolored to `color`, placed underneath the original. This keeps text
/// legible over arbitrary backgrounds at the cost of a little detail.
pub fn synthesize_shadows(root: &mut Element, class: &'static str, color: Rgb) {
    let fill = color.to_hex();
    root.expand_where(
        &|element| element.has_class(class),
        &move |original| {
            let bounds = original.bounds();
            let mut nodes = Vec::with_capacity(9);
            let mut index = 1;
            for dx in [-1.0f32, 0.0, 1.0] {
                for dy in [-1.0f32, 0.0, 1.0] {
                    if dx == 0.0 && dy == 0.0 {
                        continue;
                    }
                    let mut copy = original.clone();
                    if let Some(id) = original.id() {
                        copy.set_attr("id", &format!("{id}_{index}"));
                    }
                    // Copies must not match the shadow class again.
                    copy.remove_attr("class");
                    copy.set_attr("x", &format!("{}", bounds.x + dx));
                    copy.set_attr("y", &format!("{}", bounds.y + dy));
                    copy.for_each_mut(&mut |descendant| {
                        descendant.set_attr("x", &format!("{}", bounds.x + dx));
                        descendant.set_attr("y", &format!("{}", bounds.y + dy));
                    });
                    let mut styles = copy.attr("style").map(parse_style).unwrap_or_default();
                    styles.insert("fill".to_string(), fill.clone());
                    copy.set_attr("style", &format_style(&styles));
                    nodes.push(Node::Element(copy));
                    index += 1;
                }
            }
            nodes.push(Node::Element(original));
            nodes
        },
    );
}

// =============================================================================
// COLORS
// =============================================================================

/// Replace the reserved highlight placeholder color document-wide with the
/// configured highlight color.
pub fn set_highlight_color(root: &mut Element, highlight: Rgb) {
    let hex = highlight.to_hex();
    root.for_each_mut(&mut |element| {
        if let Some(style) = element.attr("style") {
            if style.contains(HIGHLIGHT_PLACEHOLDER) {
                let replaced = style.replace(HIGHLIGHT_PLACEHOLDER, &hex);
                element.set_attr("style", &replaced);
            }
        }
    });
}

/// Set the document root's fill so unstyled elements inherit the current
/// foreground color.
pub fn set_default_style(root: &mut Element, foreground: Rgb) {
    let mut styles = root.attr("style").map(parse_style).unwrap_or_default();
    styles.insert("fill".to_string(), foreground.to_hex());
    root.set_attr("style", &format_style(&styles));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::theme::document::VectorDocument;
    use crate::types::PropertyMap;

    fn props(entries: &[(&str, PropertyValue)]) -> PropertyMap {
        entries
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn test_deletes_on_truthy_and_falsy() {
        let mut doc = VectorDocument::parse(
            r#"<svg>
              <rect id="a" title="del playing"/>
              <rect id="b" title="del !playing"/>
              <rect id="c" title="del missing"/>
              <rect id="d" title="del !missing"/>
            </svg>"#,
        )
        .unwrap();
        let properties = props(&[("playing", PropertyValue::Bool(true))]);
        process_deletes(&mut doc.root, &properties);

        // "playing" truthy: 'del playing' fires, 'del !playing' does not.
        assert!(doc.root.find_by_id("a").is_none());
        assert!(doc.root.find_by_id("b").is_some());
        // "missing" falsy: only the negated directive fires.
        assert!(doc.root.find_by_id("c").is_some());
        assert!(doc.root.find_by_id("d").is_none());
    }

    #[test]
    fn test_empty_string_counts_as_falsy() {
        let mut doc =
            VectorDocument::parse(r#"<svg><rect id="a" title="del label"/></svg>"#).unwrap();
        let properties = props(&[("label", PropertyValue::Text(String::new()))]);
        process_deletes(&mut doc.root, &properties);
        assert!(doc.root.find_by_id("a").is_some());
    }

    #[test]
    fn test_progress_width_math() {
        let mut doc = VectorDocument::parse(
            r#"<svg><rect id="vol_progress" class="progress" width="100" height="4"/></svg>"#,
        )
        .unwrap();
        let properties = props(&[("vol", PropertyValue::Int(50))]);
        set_progress_bars(&mut doc.root, &properties);
        assert_eq!(
            doc.root.find_by_id("vol_progress").unwrap().attr("width"),
            Some("50")
        );
    }

    #[test]
    fn test_progress_zero_clamps_to_visible() {
        let mut doc = VectorDocument::parse(
            r#"<svg><rect id="x_progress" class="progress" width="100" height="4"/></svg>"#,
        )
        .unwrap();
        let properties = props(&[("x", PropertyValue::Int(0))]);
        set_progress_bars(&mut doc.root, &properties);
        // (100 / 100) * clamp(0, 0.1, 100) = 0.1, truncated into the attr.
        let width: f64 = doc
            .root
            .find_by_id("x_progress")
            .unwrap()
            .attr("width")
            .unwrap()
            .parse()
            .unwrap();
        assert!(width > 0.0 && width < 1.0);
    }

    #[test]
    fn test_progress_bad_id_is_skipped() {
        let mut doc = VectorDocument::parse(
            r#"<svg><rect id="oops" class="progress" width="100" height="4"/></svg>"#,
        )
        .unwrap();
        set_progress_bars(&mut doc.root, &props(&[]));
        assert_eq!(doc.root.find_by_id("oops").unwrap().attr("width"), Some("100"));
    }

    #[test]
    fn test_image_path_embedding() {
        let mut doc = VectorDocument::parse(
            r#"<svg><image title="cover" xlink:href="placeholder.png"/></svg>"#,
        )
        .unwrap();
        let properties = props(&[("cover", PropertyValue::ImagePath("/tmp/a.png".into()))]);
        convert_image_urls(&mut doc.root, &properties);
        assert_eq!(
            doc.root.find_by_tag("image").unwrap().attr("xlink:href"),
            Some("/tmp/a.png")
        );
    }

    #[test]
    fn test_image_data_becomes_data_url() {
        let mut doc =
            VectorDocument::parse(r#"<svg><image title="cover" href="p.png"/></svg>"#).unwrap();
        let properties = props(&[("cover", PropertyValue::ImageData(vec![1, 2, 3]))]);
        convert_image_urls(&mut doc.root, &properties);
        let href = doc.root.find_by_tag("image").unwrap().attr("href").unwrap();
        assert!(href.starts_with("data:image/png;base64,"));
    }

    #[test]
    fn test_relative_paths_are_anchored() {
        let mut doc = VectorDocument::parse(
            r#"<svg><image xlink:href="icon.png"/><image xlink:href="/abs.png"/></svg>"#,
        )
        .unwrap();
        set_relative_image_paths(&mut doc.root, Path::new("/themes/default"));
        let hrefs: Vec<_> = {
            let mut out = Vec::new();
            doc.root.for_each_mut(&mut |e| {
                if let Some(h) = e.attr("xlink:href") {
                    out.push(h.to_string());
                }
            });
            out
        };
        assert_eq!(hrefs, vec!["/themes/default/icon.png", "/abs.png"]);
    }

    #[test]
    fn test_shadow_expands_to_eight_copies() {
        let mut doc = VectorDocument::parse(
            r#"<svg><text id="t" class="shadow" x="10" y="20">hi</text></svg>"#,
        )
        .unwrap();
        synthesize_shadows(&mut doc.root, "shadow", Rgb::WHITE);

        let mut texts = 0;
        doc.root.for_each_mut(&mut |e| {
            if e.local_name() == "text" {
                texts += 1;
            }
        });
        assert_eq!(texts, 9);

        // Copies are recolored and offset; the original keeps its position.
        let copy = doc.root.find_by_id("t_1").unwrap();
        assert_eq!(copy.attr("x"), Some("9"));
        assert!(copy.attr("style").unwrap().contains("#ffffff"));
        let original = doc.root.find_by_id("t").unwrap();
        assert_eq!(original.attr("x"), Some("10"));
    }

    #[test]
    fn test_highlight_substitution() {
        let mut doc = VectorDocument::parse(
            r#"<svg><rect style="fill:#ff0000;stroke:none"/></svg>"#,
        )
        .unwrap();
        set_highlight_color(&mut doc.root, Rgb::new(0, 255, 0));
        let style = doc.root.find_by_tag("rect").unwrap().attr("style").unwrap();
        assert_eq!(style, "fill:#00ff00;stroke:none");
    }

    #[test]
    fn test_default_style_merges_existing() {
        let mut doc = VectorDocument::parse(r#"<svg style="stroke:none"/>"#).unwrap();
        set_default_style(&mut doc.root, Rgb::BLACK);
        assert_eq!(doc.root.attr("style"), Some("fill:#000000;stroke:none"));
    }
}
