//! Mutable vector-template document.
//!
//! The substitution passes need to delete elements, rewrite attributes and
//! duplicate subtrees before rasterization, so templates are parsed into an
//! owned element tree with quick-xml and serialized back out once processing
//! is done. The rasterizer never sees this type; it gets the serialized
//! markup.

use std::collections::BTreeMap;

use quick_xml::events::{BytesEnd, BytesStart, BytesText, Event};
use quick_xml::{Reader, Writer};

use crate::error::{Result, ScreenError};
use crate::types::Rect;

// =============================================================================
// TREE
// =============================================================================

/// One node of the template tree.
#[derive(Debug, Clone, PartialEq)]
pub enum Node {
    Element(Element),
    Text(String),
}

/// An element with ordered attributes and children.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Element {
    /// Qualified tag name as written in the source (prefix kept).
    pub name: String,
    pub attrs: Vec<(String, String)>,
    pub children: Vec<Node>,
}

impl Element {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            ..Self::default()
        }
    }

    /// Tag name without any namespace prefix.
    pub fn local_name(&self) -> &str {
        self.name.rsplit(':').next().unwrap_or(&self.name)
    }

    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attrs
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    pub fn set_attr(&mut self, name: &str, value: &str) {
        if let Some(slot) = self.attrs.iter_mut().find(|(k, _)| k == name) {
            slot.1 = value.to_string();
        } else {
            self.attrs.push((name.to_string(), value.to_string()));
        }
    }

    pub fn remove_attr(&mut self, name: &str) {
        self.attrs.retain(|(k, _)| k != name);
    }

    pub fn id(&self) -> Option<&str> {
        self.attr("id")
    }

    /// Whether the `class` attribute contains the given token.
    pub fn has_class(&self, class: &str) -> bool {
        self.attr("class")
            .is_some_and(|c| c.split_whitespace().any(|t| t == class))
    }

    /// Concatenated text of this element and its descendants.
    pub fn text_content(&self) -> String {
        let mut out = String::new();
        self.collect_text(&mut out);
        out
    }

    fn collect_text(&self, out: &mut String) {
        for child in &self.children {
            match child {
                Node::Text(t) => out.push_str(t),
                Node::Element(e) => e.collect_text(out),
            }
        }
    }

    /// First descendant element (depth-first) with the given local tag name.
    pub fn find_by_tag(&self, tag: &str) -> Option<&Element> {
        for child in &self.children {
            if let Node::Element(e) = child {
                if e.local_name() == tag {
                    return Some(e);
                }
                if let Some(found) = e.find_by_tag(tag) {
                    return Some(found);
                }
            }
        }
        None
    }

    /// First descendant element with the given id.
    pub fn find_by_id(&self, id: &str) -> Option<&Element> {
        for child in &self.children {
            if let Node::Element(e) = child {
                if e.id() == Some(id) {
                    return Some(e);
                }
                if let Some(found) = e.find_by_id(id) {
                    return Some(found);
                }
            }
        }
        None
    }

    pub fn find_by_id_mut(&mut self, id: &str) -> Option<&mut Element> {
        for child in &mut self.children {
            if let Node::Element(e) = child {
                if e.id() == Some(id) {
                    return Some(e);
                }
                if let Some(found) = e.find_by_id_mut(id) {
                    return Some(found);
                }
            }
        }
        None
    }

    /// Visit every descendant element mutably, depth-first.
    pub fn for_each_mut(&mut self, f: &mut impl FnMut(&mut Element)) {
        for child in &mut self.children {
            if let Node::Element(e) = child {
                f(e);
                e.for_each_mut(f);
            }
        }
    }

    /// Remove descendant elements matching the predicate. Children of a
    /// removed element go with it.
    pub fn remove_where(&mut self, pred: &impl Fn(&Element) -> bool) {
        self.children.retain(|child| match child {
            Node::Element(e) => !pred(e),
            Node::Text(_) => true,
        });
        for child in &mut self.children {
            if let Node::Element(e) = child {
                e.remove_where(pred);
            }
        }
    }

    /// Rewrite children so that elements matching the predicate are replaced
    /// by the nodes `expand` produces (used for shadow duplication, where the
    /// original stays among the produced nodes).
    pub fn expand_where(
        &mut self,
        pred: &impl Fn(&Element) -> bool,
        expand: &impl Fn(Element) -> Vec<Node>,
    ) {
        let mut rewritten = Vec::with_capacity(self.children.len());
        for child in self.children.drain(..) {
            match child {
                Node::Element(e) if pred(&e) => rewritten.extend(expand(e)),
                other => rewritten.push(other),
            }
        }
        self.children = rewritten;
        for child in &mut self.children {
            if let Node::Element(e) = child {
                if !pred(e) {
                    e.expand_where(pred, expand);
                }
            }
        }
    }

    /// Geometry from `x`/`y`/`width`/`height` attributes, honoring a simple
    /// `translate(x,y)` transform when present.
    pub fn bounds(&self) -> Rect {
        let get = |name: &str| {
            self.attr(name)
                .and_then(|v| v.trim_end_matches("px").parse::<f32>().ok())
                .unwrap_or(0.0)
        };
        let mut rect = Rect::new(get("x"), get("y"), get("width"), get("height"));
        if let Some((tx, ty)) = self.attr("transform").and_then(parse_translate) {
            rect.x += tx;
            rect.y += ty;
        }
        rect
    }
}

fn parse_translate(transform: &str) -> Option<(f32, f32)> {
    let inner = transform
        .trim()
        .strip_prefix("translate(")?
        .strip_suffix(')')?;
    let mut parts = inner.split([',', ' ']).filter(|s| !s.is_empty());
    let tx = parts.next()?.trim().parse().ok()?;
    let ty = parts.next().map_or(Some(0.0), |p| p.trim().parse().ok())?;
    Some((tx, ty))
}

// =============================================================================
// DOCUMENT
// =============================================================================

/// A parsed vector template.
#[derive(Debug, Clone, PartialEq)]
pub struct VectorDocument {
    pub root: Element,
}

impl VectorDocument {
    /// Parse template markup into an owned tree.
    pub fn parse(xml: &str) -> Result<Self> {
        let mut reader = Reader::from_str(xml);
        let mut stack: Vec<Element> = Vec::new();
        let mut root: Option<Element> = None;

        loop {
            match reader.read_event() {
                Ok(Event::Start(e)) => {
                    stack.push(element_from_start(&e)?);
                }
                Ok(Event::Empty(e)) => {
                    let element = element_from_start(&e)?;
                    attach(&mut stack, &mut root, element);
                }
                Ok(Event::Text(t)) => {
                    let text = t
                        .unescape()
                        .map_err(|err| ScreenError::TemplateParse {
                            details: err.to_string(),
                        })?
                        .into_owned();
                    if let Some(parent) = stack.last_mut() {
                        if !text.trim().is_empty() {
                            parent.children.push(Node::Text(text));
                        }
                    }
                }
                Ok(Event::End(_)) => {
                    let element = stack.pop().ok_or_else(|| ScreenError::TemplateParse {
                        details: "unbalanced end tag".to_string(),
                    })?;
                    attach(&mut stack, &mut root, element);
                }
                Ok(Event::Eof) => break,
                Ok(_) => {}
                Err(err) => {
                    return Err(ScreenError::TemplateParse {
                        details: err.to_string(),
                    })
                }
            }
        }

        root.map(|root| Self { root })
            .ok_or_else(|| ScreenError::TemplateParse {
                details: "document has no root element".to_string(),
            })
    }

    /// Serialize back to markup.
    pub fn to_xml(&self) -> String {
        let mut writer = Writer::new(Vec::new());
        write_element(&mut writer, &self.root);
        String::from_utf8(writer.into_inner()).unwrap_or_default()
    }
}

fn attach(stack: &mut [Element], root: &mut Option<Element>, element: Element) {
    if let Some(parent) = stack.last_mut() {
        parent.children.push(Node::Element(element));
    } else if root.is_none() {
        *root = Some(element);
    }
}

fn element_from_start(e: &BytesStart) -> Result<Element> {
    let mut element = Element::new(&String::from_utf8_lossy(e.name().as_ref()));
    for attr in e.attributes() {
        let attr = attr.map_err(|err| ScreenError::TemplateParse {
            details: err.to_string(),
        })?;
        let key = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
        let value = attr
            .unescape_value()
            .map_err(|err| ScreenError::TemplateParse {
                details: err.to_string(),
            })?
            .into_owned();
        element.attrs.push((key, value));
    }
    Ok(element)
}

fn write_element(writer: &mut Writer<Vec<u8>>, element: &Element) {
    let mut start = BytesStart::new(element.name.as_str());
    for (k, v) in &element.attrs {
        start.push_attribute((k.as_str(), v.as_str()));
    }
    if element.children.is_empty() {
        let _ = writer.write_event(Event::Empty(start));
        return;
    }
    let _ = writer.write_event(Event::Start(start));
    for child in &element.children {
        match child {
            Node::Element(e) => write_element(writer, e),
            Node::Text(t) => {
                let _ = writer.write_event(Event::Text(BytesText::new(t)));
            }
        }
    }
    let _ = writer.write_event(Event::End(BytesEnd::new(element.name.as_str())));
}

// =============================================================================
// STYLES
// =============================================================================

/// Parse a CSS style attribute (`fill:#fff;stroke:none`) into a map.
pub fn parse_style(style: &str) -> BTreeMap<String, String> {
    let mut out = BTreeMap::new();
    for rule in style.split(';') {
        if let Some((k, v)) = rule.split_once(':') {
            let k = k.trim();
            if !k.is_empty() {
                out.insert(k.to_string(), v.trim().to_string());
            }
        }
    }
    out
}

/// Format a style map back into a style attribute value.
pub fn format_style(styles: &BTreeMap<String, String>) -> String {
    styles
        .iter()
        .map(|(k, v)| format!("{k}:{v}"))
        .collect::<Vec<_>>()
        .join(";")
}

// =============================================================================
// TEMPLATE SUBSTITUTION
// =============================================================================

/// Escape a value for embedding in markup.
pub fn xml_escape(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            _ => out.push(c),
        }
    }
    out
}

/// Substitute `${key}` placeholders, leaving unknown keys untouched.
/// Values must already be escaped by the caller if they land in markup.
pub fn substitute(template: &str, lookup: impl Fn(&str) -> Option<String>) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(start) = rest.find("${") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        match after.find('}') {
            Some(end) => {
                let key = &after[..end];
                match lookup(key) {
                    Some(value) => out.push_str(&value),
                    None => {
                        out.push_str("${");
                        out.push_str(key);
                        out.push('}');
                    }
                }
                rest = &after[end + 1..];
            }
            None => {
                out.push_str("${");
                rest = after;
            }
        }
    }
    out.push_str(rest);
    out
}
