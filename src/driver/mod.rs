//! Driver capability interface.
//!
//! The screen core never talks to hardware directly: it consumes a small
//! [`Driver`] trait that a device backend implements (frame output, display
//! geometry, named controls, key events). Control acquisition bookkeeping is
//! device-independent and lives in [`controls`].

use bitflags::bitflags;

use crate::error::Result;
use crate::types::{Canvas, Rgb};

pub mod controls;

pub use controls::{Acquisition, ControlRegistry};

// =============================================================================
// CONTROL HINTS
// =============================================================================

bitflags! {
    /// What a named hardware control is for. A driver exposes its controls
    /// with hints; the core looks controls up by hint, never by id.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct ControlHint: u32 {
        /// Brightness-style control that can be dimmed through levels.
        const DIMMABLE    = 1 << 0;
        /// Default foreground color for rendering.
        const FOREGROUND  = 1 << 2;
        /// Default background color for rendering.
        const BACKGROUND  = 1 << 3;
        /// Accent color substituted for the theme highlight placeholder.
        const HIGHLIGHT   = 1 << 4;
        /// On/off control.
        const SWITCH      = 1 << 5;
        /// Memory bank indicator lights.
        const MKEYS       = 1 << 6;
        /// Software-only control, not backed by hardware.
        const VIRTUAL     = 1 << 7;
    }
}

// =============================================================================
// CONTROLS
// =============================================================================

/// Current value of a control.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ControlValue {
    /// A level between the control's lower and upper bounds.
    Level(u32),
    /// An RGB color.
    Color(Rgb),
    /// An on/off switch.
    Switch(bool),
}

impl ControlValue {
    /// The "everything off" value of the same shape.
    pub const fn zeroed(self) -> Self {
        match self {
            Self::Level(_) => Self::Level(0),
            Self::Color(_) => Self::Color(Rgb::BLACK),
            Self::Switch(_) => Self::Switch(false),
        }
    }
}

/// A named hardware-facing output value (e.g. a backlight level or color).
#[derive(Debug, Clone, PartialEq)]
pub struct Control {
    /// Stable identifier, unique per driver.
    pub id: String,
    /// Human-readable name.
    pub name: String,
    pub value: ControlValue,
    pub lower: u32,
    pub upper: u32,
    pub hint: ControlHint,
}

impl Control {
    pub fn new(id: &str, name: &str, value: ControlValue, hint: ControlHint) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            value,
            lower: 0,
            upper: 255,
            hint,
        }
    }
}

// =============================================================================
// KEY EVENTS
// =============================================================================

/// State transition of a device key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyState {
    Down,
    Up,
    Held,
}

/// One key event delivered by the driver's keyboard grab.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyEvent {
    pub key: String,
    pub state: KeyState,
}

/// Callback invoked by the driver for every key event.
pub type KeyHandler = Box<dyn FnMut(KeyEvent) + Send>;

// =============================================================================
// DRIVER TRAIT
// =============================================================================

/// Capability interface a device backend implements.
///
/// A `bpp` of 0 means the device has no addressable display; paging
/// operations against such a driver fail with a capability error.
pub trait Driver: Send {
    /// Short name of the backend.
    fn name(&self) -> &str;

    /// Device model identifier, used to resolve theme files.
    fn model_name(&self) -> &str;

    /// Display size in pixels.
    fn size(&self) -> (u32, u32);

    /// Display bit depth. 0 means no addressable display.
    fn bpp(&self) -> u32;

    /// Named controls this device exposes.
    fn controls(&self) -> Vec<Control>;

    /// Push a control's current effective value to the hardware.
    fn update_control(&mut self, control: &Control);

    /// Paint a raster frame to the display.
    fn paint(&mut self, frame: &Canvas);

    /// Route device key events to the given handler.
    fn grab_keyboard(&mut self, handler: KeyHandler) -> Result<()>;

    fn is_connected(&self) -> bool;

    fn connect(&mut self) -> Result<()>;

    fn disconnect(&mut self) -> Result<()>;

    /// First control matching a hint, if any.
    fn control_for_hint(&self, hint: ControlHint) -> Option<Control> {
        self.controls().into_iter().find(|c| c.hint.contains(hint))
    }

    /// Color for a hint, falling back when the device has no such control.
    fn color_for_hint(&self, hint: ControlHint, fallback: Rgb) -> Rgb {
        match self.control_for_hint(hint).map(|c| c.value) {
            Some(ControlValue::Color(c)) => c,
            _ => fallback,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FakeDriver {
        controls: Vec<Control>,
    }

    impl Driver for FakeDriver {
        fn name(&self) -> &str {
            "fake"
        }
        fn model_name(&self) -> &str {
            "f100"
        }
        fn size(&self) -> (u32, u32) {
            (160, 43)
        }
        fn bpp(&self) -> u32 {
            1
        }
        fn controls(&self) -> Vec<Control> {
            self.controls.clone()
        }
        fn update_control(&mut self, _control: &Control) {}
        fn paint(&mut self, _frame: &Canvas) {}
        fn grab_keyboard(&mut self, _handler: KeyHandler) -> Result<()> {
            Ok(())
        }
        fn is_connected(&self) -> bool {
            true
        }
        fn connect(&mut self) -> Result<()> {
            Ok(())
        }
        fn disconnect(&mut self) -> Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_control_for_hint() {
        let driver = FakeDriver {
            controls: vec![
                Control::new(
                    "backlight",
                    "Backlight",
                    ControlValue::Level(5),
                    ControlHint::DIMMABLE,
                ),
                Control::new(
                    "fg",
                    "Foreground",
                    ControlValue::Color(Rgb::WHITE),
                    ControlHint::FOREGROUND,
                ),
            ],
        };

        assert_eq!(
            driver.control_for_hint(ControlHint::DIMMABLE).map(|c| c.id),
            Some("backlight".to_string())
        );
        assert!(driver.control_for_hint(ControlHint::HIGHLIGHT).is_none());
        assert_eq!(
            driver.color_for_hint(ControlHint::FOREGROUND, Rgb::BLACK),
            Rgb::WHITE
        );
        assert_eq!(
            driver.color_for_hint(ControlHint::HIGHLIGHT, Rgb::RED),
            Rgb::RED
        );
    }

    #[test]
    fn test_zeroed_value() {
        assert_eq!(ControlValue::Level(7).zeroed(), ControlValue::Level(0));
        assert_eq!(
            ControlValue::Color(Rgb::WHITE).zeroed(),
            ControlValue::Color(Rgb::BLACK)
        );
        assert_eq!(ControlValue::Switch(true).zeroed(), ControlValue::Switch(false));
    }
}
