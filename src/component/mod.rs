//! Component tree.
//!
//! A page is the root of a tree of components. Each component may carry its
//! own theme; when it does, the theme's template declares where child
//! components land by giving an element the child's id. Drawing walks the
//! tree top-down, rendering each themed component into the bounds its
//! parent's template resolved for it.
//!
//! Behavior is attached through [`ComponentBehavior`], a trait with no-op
//! defaults, so plain structural components need no boilerplate.

use log::debug;

use crate::error::Result;
use crate::theme::{RenderContext, Theme};
use crate::types::{self, AttributeMap, Canvas, PropertyMap, Rect};

pub mod menu;

pub use menu::{Menu, MenuItem, Scrollbar};

// =============================================================================
// BEHAVIOR
// =============================================================================

/// Hooks a component owner can implement. Every method has a default no-op,
/// so implementors override only what they need.
pub trait ComponentBehavior: Send {
    /// Called once when the component is attached to a visible tree.
    fn on_configure(&mut self) {}

    /// Properties contributed to the theme's property bag. Explicit
    /// properties set on the component override these on key collision.
    fn theme_properties(&mut self) -> PropertyMap {
        PropertyMap::new()
    }

    /// Attributes contributed alongside the properties.
    fn theme_attributes(&mut self) -> AttributeMap {
        AttributeMap::new()
    }

    /// Custom painting on top of the themed output, in component-local
    /// coordinates.
    fn paint(&mut self, _canvas: &mut Canvas) {}
}

/// The default behavior: does nothing.
pub struct NoopBehavior;

impl ComponentBehavior for NoopBehavior {}

// =============================================================================
// COMPONENT
// =============================================================================

/// One node of a page's visual tree.
///
/// Children are owned; there are no parent backreferences, so a component
/// can only ever be in one tree.
pub struct Component {
    id: String,
    theme: Option<Theme>,
    children: Vec<Component>,
    properties: PropertyMap,
    attributes: AttributeMap,
    behavior: Box<dyn ComponentBehavior>,
    configured: bool,
}

impl std::fmt::Debug for Component {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Component")
            .field("id", &self.id)
            .field("children", &self.children)
            .finish_non_exhaustive()
    }
}

impl Component {
    pub fn new(id: &str) -> Self {
        Self {
            id: id.to_string(),
            theme: None,
            children: Vec::new(),
            properties: PropertyMap::new(),
            attributes: AttributeMap::new(),
            behavior: Box::new(NoopBehavior),
            configured: false,
        }
    }

    pub fn with_behavior(id: &str, behavior: Box<dyn ComponentBehavior>) -> Self {
        Self {
            behavior,
            ..Self::new(id)
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn set_theme(&mut self, theme: Theme) {
        self.theme = Some(theme);
    }

    pub fn theme(&self) -> Option<&Theme> {
        self.theme.as_ref()
    }

    pub fn theme_mut(&mut self) -> Option<&mut Theme> {
        self.theme.as_mut()
    }

    // -------------------------------------------------------------------------
    // Properties
    // -------------------------------------------------------------------------

    /// Set a property for the theme's bag. Overrides any same-named value
    /// the behavior contributes.
    pub fn set_property(&mut self, key: &str, value: impl Into<crate::types::PropertyValue>) {
        self.properties.insert(key.to_string(), value.into());
    }

    pub fn remove_property(&mut self, key: &str) {
        self.properties.remove(key);
    }

    pub fn set_attribute(&mut self, key: &str, value: &str) {
        self.attributes.insert(key.to_string(), value.to_string());
    }

    // -------------------------------------------------------------------------
    // Tree
    // -------------------------------------------------------------------------

    pub fn add_child(&mut self, child: Component) {
        self.children.push(child);
    }

    pub fn insert_child(&mut self, index: usize, child: Component) {
        let index = index.min(self.children.len());
        self.children.insert(index, child);
    }

    /// Detach a direct or indirect child by id, dropping its scroll state.
    pub fn remove_child(&mut self, id: &str) -> Option<Component> {
        if let Some(pos) = self.children.iter().position(|c| c.id == id) {
            let mut child = self.children.remove(pos);
            child.clear_scroll();
            return Some(child);
        }
        for child in &mut self.children {
            if let Some(removed) = child.remove_child(id) {
                return Some(removed);
            }
        }
        None
    }

    pub fn children(&self) -> &[Component] {
        &self.children
    }

    /// Find a direct or indirect child by id.
    pub fn child(&self, id: &str) -> Option<&Component> {
        for c in &self.children {
            if c.id == id {
                return Some(c);
            }
            if let Some(found) = c.child(id) {
                return Some(found);
            }
        }
        None
    }

    pub fn child_mut(&mut self, id: &str) -> Option<&mut Component> {
        for c in &mut self.children {
            if c.id == id {
                return Some(c);
            }
            if let Some(found) = c.child_mut(id) {
                return Some(found);
            }
        }
        None
    }

    // -------------------------------------------------------------------------
    // Invalidation
    // -------------------------------------------------------------------------

    /// Force this component and everything under it to re-process on the
    /// next draw.
    pub fn mark_dirty(&mut self) {
        if let Some(theme) = &mut self.theme {
            theme.mark_dirty();
        }
        for child in &mut self.children {
            child.mark_dirty();
        }
    }

    fn clear_scroll(&mut self) {
        if let Some(theme) = &mut self.theme {
            theme.clear_scroll();
        }
        for child in &mut self.children {
            child.clear_scroll();
        }
    }

    // -------------------------------------------------------------------------
    // Scrolling
    // -------------------------------------------------------------------------

    /// True iff this subtree has any text that needs scroll animation.
    pub fn is_scroll_required(&self) -> bool {
        self.theme
            .as_ref()
            .is_some_and(Theme::is_scroll_required)
            || self.children.iter().any(Component::is_scroll_required)
    }

    /// Advance scroll animation through the subtree. Returns true when any
    /// state moved and a repaint is worthwhile.
    pub fn do_scroll(&mut self) -> bool {
        let mut moved = self
            .theme
            .as_mut()
            .is_some_and(Theme::do_scroll);
        for child in &mut self.children {
            moved |= child.do_scroll();
        }
        moved
    }

    // -------------------------------------------------------------------------
    // Drawing
    // -------------------------------------------------------------------------

    /// Draw this component and its children onto a canvas covering the
    /// component's own coordinate space.
    pub fn draw(&mut self, canvas: &mut Canvas, ctx: &RenderContext) -> Result<()> {
        if !self.configured {
            self.behavior.on_configure();
            self.configured = true;
        }

        match &mut self.theme {
            Some(theme) => {
                let mut properties = self.behavior.theme_properties();
                properties.extend(self.properties.clone());
                let mut attributes = self.behavior.theme_attributes();
                attributes.extend(self.attributes.clone());

                let child_ids: Vec<String> =
                    self.children.iter().map(|c| c.id.clone()).collect();
                theme.draw(canvas, ctx, &properties, &attributes, &child_ids)?;

                // Children land in the bounds their placeholder elements
                // resolved to.
                let child_bounds: Vec<Option<Rect>> = {
                    let render = theme.render();
                    child_ids
                        .iter()
                        .map(|id| render.and_then(|r| r.child_bounds.get(id).copied()))
                        .collect()
                };
                for (child, bounds) in self.children.iter_mut().zip(child_bounds) {
                    match bounds {
                        Some(bounds) if bounds.w >= 1.0 && bounds.h >= 1.0 => {
                            let w = bounds.w.ceil() as u32;
                            let h = bounds.h.ceil() as u32;
                            let Some(mut sub) = Canvas::new(w, h) else {
                                continue;
                            };
                            child.draw(&mut sub, ctx)?;
                            types::blit(canvas, &sub, bounds.x as i32, bounds.y as i32);
                        }
                        _ => {
                            debug!(
                                "child {} has no placeholder in {}'s template, drawing full-size",
                                child.id, self.id
                            );
                            child.draw(canvas, ctx)?;
                        }
                    }
                }
            }
            None => {
                for child in &mut self.children {
                    child.draw(canvas, ctx)?;
                }
            }
        }

        self.behavior.paint(canvas);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Rgb;
    use std::path::Path;

    struct CountingBehavior {
        configures: std::sync::Arc<std::sync::atomic::AtomicUsize>,
        paints: std::sync::Arc<std::sync::atomic::AtomicUsize>,
    }

    impl ComponentBehavior for CountingBehavior {
        fn on_configure(&mut self) {
            self.configures
                .fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        }

        fn theme_properties(&mut self) -> PropertyMap {
            let mut p = PropertyMap::new();
            p.insert("title".to_string(), "from-behavior".into());
            p.insert("extra".to_string(), "kept".into());
            p
        }

        fn paint(&mut self, _canvas: &mut Canvas) {
            self.paints
                .fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        }
    }

    const PARENT: &str = r#"<svg xmlns="http://www.w3.org/2000/svg" width="160" height="43">
  <rect id="panel" x="10" y="5" width="80" height="30"/>
  <rect id="ghost" class="hidden-root" x="0" y="0" width="20" height="20"/>
</svg>"#;

    fn themed(id: &str, svg: &str) -> Component {
        let mut c = Component::new(id);
        c.set_theme(Theme::from_svg(svg, Path::new("/nonexistent")).unwrap());
        c
    }

    fn draw(c: &mut Component) {
        let mut canvas = Canvas::new(160, 43).unwrap();
        c.draw(&mut canvas, &RenderContext::default()).unwrap();
    }

    #[test]
    fn test_tree_add_find_remove() {
        let mut root = Component::new("root");
        let mut panel = Component::new("panel");
        panel.add_child(Component::new("leaf"));
        root.add_child(panel);

        assert!(root.child("leaf").is_some());
        let removed = root.remove_child("leaf").unwrap();
        assert_eq!(removed.id(), "leaf");
        assert!(root.child("leaf").is_none());
        assert!(root.remove_child("leaf").is_none());
    }

    #[test]
    fn test_behavior_hooks_fire() {
        let configures = std::sync::Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let paints = std::sync::Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let mut c = Component::with_behavior(
            "c",
            Box::new(CountingBehavior {
                configures: configures.clone(),
                paints: paints.clone(),
            }),
        );
        draw(&mut c);
        draw(&mut c);
        // Configure once, paint per draw.
        assert_eq!(configures.load(std::sync::atomic::Ordering::SeqCst), 1);
        assert_eq!(paints.load(std::sync::atomic::Ordering::SeqCst), 2);
    }

    #[test]
    fn test_explicit_property_overrides_behavior() {
        let configures = std::sync::Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let paints = std::sync::Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let mut c = Component::with_behavior(
            "c",
            Box::new(CountingBehavior {
                configures,
                paints,
            }),
        );
        c.set_theme(
            Theme::from_svg(
                r#"<svg xmlns="http://www.w3.org/2000/svg" width="160" height="43"><text x="0" y="10">${title}</text></svg>"#,
                Path::new("/nonexistent"),
            )
            .unwrap(),
        );
        c.set_property("title", "explicit");
        draw(&mut c);
        let render = c.theme().unwrap().render().unwrap();
        assert_eq!(
            render.properties.get("title").unwrap().to_text(),
            "explicit"
        );
        // Non-colliding behavior keys survive the merge.
        assert_eq!(render.properties.get("extra").unwrap().to_text(), "kept");
    }

    #[test]
    fn test_child_bounds_resolved_from_template() {
        let mut root = themed("root", PARENT);
        root.add_child(Component::new("panel"));
        draw(&mut root);
        let render = root.theme().unwrap().render().unwrap();
        assert_eq!(
            render.child_bounds.get("panel").copied().unwrap(),
            Rect::new(10.0, 5.0, 80.0, 30.0)
        );
    }

    #[test]
    fn test_hidden_root_removed_but_bounds_kept() {
        let mut root = themed("root", PARENT);
        root.add_child(Component::new("ghost"));
        draw(&mut root);
        let render = root.theme().unwrap().render().unwrap();
        assert!(render.document.root.find_by_id("ghost").is_none());
        assert!(render.child_bounds.contains_key("ghost"));
    }

    #[test]
    fn test_mark_dirty_recurses() {
        let mut root = themed("root", PARENT);
        root.add_child(themed(
            "panel",
            r#"<svg xmlns="http://www.w3.org/2000/svg" width="80" height="30"><rect x="0" y="0" width="5" height="5"/></svg>"#,
        ));
        draw(&mut root);
        let child_generation = root.child("panel").unwrap().theme().unwrap().render_generation();
        root.mark_dirty();
        draw(&mut root);
        assert_eq!(
            root.child("panel").unwrap().theme().unwrap().render_generation(),
            child_generation + 1
        );
    }

    #[test]
    fn test_themeless_component_draws_children() {
        let mut root = Component::new("root");
        let mut child = themed(
            "panel",
            r#"<svg xmlns="http://www.w3.org/2000/svg" width="160" height="43"><rect x="0" y="0" width="5" height="5" style="fill:#000000"/></svg>"#,
        );
        child.set_property("unused", Rgb::BLACK.to_hex());
        root.add_child(child);
        draw(&mut root);
        assert!(root.child("panel").unwrap().theme().unwrap().render().is_some());
    }
}
