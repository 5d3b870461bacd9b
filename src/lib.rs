//! # auxscreen
//!
//! Page scheduling, theme rendering and compositing for auxiliary bitmap
//! displays (keyboard LCDs and similar small secondary screens).
//!
//! The crate is organized in layers:
//!
//! - [`driver`] - the capability trait a device backend implements, plus
//!   layered control acquisition (backlights, memory-bank lights).
//! - [`theme`] - vector templates bound to property bags: substitution
//!   passes, out-of-band text layout and rasterization.
//! - [`component`] - trees of themed components that make up a page, plus
//!   menu and scrollbar building blocks.
//! - [`scroll`] - marquee and wrap animation state for overflowing text.
//! - [`screen`] - the actor that owns the page list, schedules visibility
//!   by priority, composites frames and manages the device connection.
//!
//! ```no_run
//! use auxscreen::screen::{Page, Screen, ScreenConfig};
//!
//! # fn open_driver() -> Box<dyn auxscreen::driver::Driver> { unimplemented!() }
//! # fn main() -> auxscreen::error::Result<()> {
//! let screen = Screen::new(open_driver(), ScreenConfig::default());
//! screen.add_page(Page::new("clock", "Clock"))?;
//! # Ok(())
//! # }
//! ```

pub mod component;
pub mod driver;
pub mod error;
pub mod screen;
pub mod scroll;
pub mod theme;
pub mod types;

pub use component::{Component, ComponentBehavior, Menu, MenuItem, Scrollbar};
pub use driver::{Control, ControlHint, ControlValue, Driver, KeyEvent, KeyState};
pub use error::{Result, ScreenError};
pub use screen::{Page, PagePriority, Screen, ScreenChangeListener, ScreenConfig};
pub use theme::{RenderContext, Theme};
pub use types::{Canvas, Direction, PropertyMap, PropertyValue, Rect, Rgb};
