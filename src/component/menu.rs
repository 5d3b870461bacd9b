//! Menu, menu item and scrollbar behaviors.
//!
//! A menu is a component whose children are menu items. Selection and the
//! vertical scroll base live in state shared between the [`Menu`] handle and
//! every item's behavior, so the handle stays usable after the page has moved
//! onto the screen's actor thread. Item templates receive `item_name`,
//! `item_alt`, `item_icon` and `item_selected`; scrollbar templates receive
//! knob geometry as percentages of the track.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::types::{PropertyMap, PropertyValue};

use super::{Component, ComponentBehavior};

// =============================================================================
// SHARED STATE
// =============================================================================

type ActivateFn = Arc<Mutex<Box<dyn FnMut() + Send>>>;

struct ItemEntry {
    id: String,
    selectable: bool,
    on_activate: Option<ActivateFn>,
}

struct MenuState {
    items: Vec<ItemEntry>,
    selected: Option<usize>,
    item_height: f32,
    view_height: f32,
    base: f32,
}

impl MenuState {
    fn select_first(&mut self) {
        self.selected = self.items.iter().position(|e| e.selectable);
        self.scroll_to_selected();
    }

    fn step(&mut self, forward: bool) {
        let len = self.items.len();
        if len == 0 {
            self.selected = None;
            return;
        }
        let Some(current) = self.selected else {
            self.select_first();
            return;
        };
        let mut i = current;
        for _ in 0..len {
            i = if forward {
                (i + 1) % len
            } else {
                (i + len - 1) % len
            };
            if self.items[i].selectable {
                self.selected = Some(i);
                break;
            }
        }
        self.scroll_to_selected();
    }

    /// Move the scroll base the minimum distance that puts the selected
    /// item fully inside the view window.
    fn scroll_to_selected(&mut self) {
        let Some(i) = self.selected else {
            return;
        };
        if self.view_height <= 0.0 {
            return;
        }
        let selected_y = i as f32 * self.item_height;
        if selected_y + self.item_height > self.base + self.view_height {
            self.base = selected_y + self.item_height - self.view_height;
        } else if selected_y < self.base {
            self.base = selected_y;
        }
    }

    fn total_height(&self) -> f32 {
        self.items.len() as f32 * self.item_height
    }

    fn is_selected(&self, id: &str) -> bool {
        self.selected
            .and_then(|i| self.items.get(i))
            .is_some_and(|e| e.id == id)
    }
}

// =============================================================================
// MENU
// =============================================================================

/// Selection and scroll controller for a menu component.
///
/// Cloning shares the state: one clone serves as the menu component's
/// behavior while another drives selection from outside the screen actor.
#[derive(Clone)]
pub struct Menu {
    state: Arc<Mutex<MenuState>>,
}

impl Default for Menu {
    fn default() -> Self {
        Self::new()
    }
}

impl Menu {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(MenuState {
                items: Vec::new(),
                selected: None,
                item_height: 10.0,
                view_height: 0.0,
                base: 0.0,
            })),
        }
    }

    /// The menu component itself, carrying this handle as its behavior.
    /// Item components go in as its children, in menu order.
    pub fn component(&self, id: &str) -> Component {
        Component::with_behavior(id, Box::new(self.clone()))
    }

    /// Build an item component. The first selectable item becomes the
    /// selection.
    pub fn item(&self, id: &str, name: &str, alt: &str, icon: Option<&str>) -> Component {
        self.push_entry(id, true);
        Component::with_behavior(
            id,
            Box::new(MenuItem {
                id: id.to_string(),
                name: name.to_string(),
                alt: alt.to_string(),
                icon: icon.map(str::to_string),
                state: self.state.clone(),
            }),
        )
    }

    /// Build a separator component. Separators are skipped by selection.
    pub fn separator(&self, id: &str) -> Component {
        self.push_entry(id, false);
        Component::with_behavior(
            id,
            Box::new(MenuItem {
                id: id.to_string(),
                name: String::new(),
                alt: String::new(),
                icon: None,
                state: self.state.clone(),
            }),
        )
    }

    fn push_entry(&self, id: &str, selectable: bool) {
        let mut state = self.state.lock();
        state.items.push(ItemEntry {
            id: id.to_string(),
            selectable,
            on_activate: None,
        });
        if state.selected.is_none() {
            state.select_first();
        }
    }

    /// Forget an item. Detaching the matching child component is the
    /// caller's job. Selection falls back to the first selectable item
    /// when the selected one goes away.
    pub fn remove_item(&self, id: &str) {
        let mut state = self.state.lock();
        let Some(pos) = state.items.iter().position(|e| e.id == id) else {
            return;
        };
        state.items.remove(pos);
        match state.selected {
            Some(i) if i == pos => state.select_first(),
            Some(i) if i > pos => {
                state.selected = Some(i - 1);
                state.scroll_to_selected();
            }
            _ => {}
        }
    }

    /// Register a callback run by [`Menu::activate_selected`].
    pub fn on_activate(&self, id: &str, callback: impl FnMut() + Send + 'static) {
        let mut state = self.state.lock();
        if let Some(entry) = state.items.iter_mut().find(|e| e.id == id) {
            entry.on_activate = Some(Arc::new(Mutex::new(Box::new(callback))));
        }
    }

    /// Run the selected item's activate callback. Returns false when there
    /// is no selection or the item has no callback.
    pub fn activate_selected(&self) -> bool {
        let callback = {
            let state = self.state.lock();
            state
                .selected
                .and_then(|i| state.items.get(i))
                .and_then(|e| e.on_activate.clone())
        };
        match callback {
            Some(callback) => {
                let mut callback = callback.lock();
                (*callback)();
                true
            }
            None => false,
        }
    }

    pub fn select(&self, id: &str) -> bool {
        let mut state = self.state.lock();
        let Some(pos) = state
            .items
            .iter()
            .position(|e| e.id == id && e.selectable)
        else {
            return false;
        };
        state.selected = Some(pos);
        state.scroll_to_selected();
        true
    }

    pub fn select_next(&self) {
        self.state.lock().step(true);
    }

    pub fn select_previous(&self) {
        self.state.lock().step(false);
    }

    pub fn selected(&self) -> Option<String> {
        let state = self.state.lock();
        state
            .selected
            .and_then(|i| state.items.get(i))
            .map(|e| e.id.clone())
    }

    /// Height of the menu's visible window, for scroll clamping.
    pub fn set_view_height(&self, height: f32) {
        let mut state = self.state.lock();
        state.view_height = height;
        state.scroll_to_selected();
    }

    pub fn set_item_height(&self, height: f32) {
        let mut state = self.state.lock();
        state.item_height = height;
        state.scroll_to_selected();
    }

    /// Content extent, view extent and scroll position, in pixels. The
    /// shape a [`Scrollbar`] consumes.
    pub fn scroll_values(&self) -> (f32, f32, f32) {
        let state = self.state.lock();
        (
            state.total_height().max(state.view_height),
            state.view_height,
            state.base,
        )
    }
}

impl ComponentBehavior for Menu {
    fn theme_properties(&mut self) -> PropertyMap {
        let state = self.state.lock();
        let mut properties = PropertyMap::new();
        properties.insert(
            "menu_scroll_offset".to_string(),
            PropertyValue::Float(state.base as f64),
        );
        properties.insert(
            "menu_selected".to_string(),
            PropertyValue::Text(
                state
                    .selected
                    .and_then(|i| state.items.get(i))
                    .map(|e| e.id.clone())
                    .unwrap_or_default(),
            ),
        );
        properties
    }
}

// =============================================================================
// MENU ITEM
// =============================================================================

/// Behavior of one menu entry. Built through [`Menu::item`]; feeds the
/// item's template from the shared selection state.
pub struct MenuItem {
    id: String,
    name: String,
    alt: String,
    icon: Option<String>,
    state: Arc<Mutex<MenuState>>,
}

impl ComponentBehavior for MenuItem {
    fn theme_properties(&mut self) -> PropertyMap {
        let selected = self.state.lock().is_selected(&self.id);
        let mut properties = PropertyMap::new();
        properties.insert(
            "item_name".to_string(),
            PropertyValue::Text(self.name.clone()),
        );
        properties.insert("item_alt".to_string(), PropertyValue::Text(self.alt.clone()));
        properties.insert("item_selected".to_string(), PropertyValue::Bool(selected));
        if let Some(icon) = &self.icon {
            properties.insert(
                "item_icon".to_string(),
                PropertyValue::ImagePath(icon.clone()),
            );
        }
        properties
    }
}

// =============================================================================
// SCROLLBAR
// =============================================================================

/// Values feeding a scrollbar: content extent, view extent and position.
pub type ScrollValues = Box<dyn FnMut() -> (f32, f32, f32) + Send>;

/// Scrollbar behavior driven by a values callback.
///
/// Templates receive `knob_size` and `knob_offset` as percentages of the
/// track, and `scrollbar_visible` goes false when the content fits so a
/// `del` directive can hide the whole track.
pub struct Scrollbar {
    values: ScrollValues,
}

impl Scrollbar {
    pub fn new(values: ScrollValues) -> Self {
        Self { values }
    }

    /// A scrollbar tracking a menu's scroll window.
    pub fn for_menu(menu: &Menu) -> Self {
        let menu = menu.clone();
        Self::new(Box::new(move || menu.scroll_values()))
    }
}

impl ComponentBehavior for Scrollbar {
    fn theme_properties(&mut self) -> PropertyMap {
        let (max, view, position) = (self.values)();
        let scale = if view > 0.0 { (max / view).max(1.0) } else { 1.0 };
        let offset = if max > 0.0 {
            (position / max * 100.0).clamp(0.0, 100.0)
        } else {
            0.0
        };
        let mut properties = PropertyMap::new();
        properties.insert(
            "knob_size".to_string(),
            PropertyValue::Float((100.0 / scale) as f64),
        );
        properties.insert(
            "knob_offset".to_string(),
            PropertyValue::Float(offset as f64),
        );
        properties.insert(
            "scrollbar_visible".to_string(),
            PropertyValue::Bool(scale > 1.0),
        );
        properties
    }
}
