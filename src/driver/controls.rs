//! Layered control acquisition.
//!
//! Multiple owners may acquire the same control concurrently; the
//! most-recently-acquired, still-active acquisition determines the effective
//! value. Releasing a non-top acquisition just removes it from the stack;
//! releasing the top restores the next value down, or the control's initial
//! value once the stack empties. Acquisitions may expire automatically via
//! `release_after`.
//!
//! Each control's stack is synchronized independently of the page scheduler.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use log::{debug, info};
use parking_lot::Mutex;

use super::{Control, ControlValue};

static NEXT_ACQUISITION_ID: AtomicU64 = AtomicU64::new(1);

// =============================================================================
// ACQUISITION
// =============================================================================

#[derive(Debug)]
struct AcquisitionInner {
    id: u64,
    control_id: String,
    value: Mutex<ControlValue>,
    active: AtomicBool,
    expires_at: Option<Instant>,
}

/// Handle to one layered ownership of a control.
///
/// Cloning shares the handle; the acquisition stays on the stack until it is
/// released through the registry or its `release_after` deadline passes.
#[derive(Debug, Clone)]
pub struct Acquisition {
    inner: Arc<AcquisitionInner>,
}

impl Acquisition {
    pub fn id(&self) -> u64 {
        self.inner.id
    }

    pub fn control_id(&self) -> &str {
        &self.inner.control_id
    }

    /// Whether this acquisition still participates in the stack.
    pub fn is_active(&self) -> bool {
        self.inner.active.load(Ordering::Acquire) && !self.expired(Instant::now())
    }

    /// Update the value this acquisition asserts. Takes effect immediately
    /// if it is the topmost active acquisition.
    pub fn set_value(&self, value: ControlValue) {
        *self.inner.value.lock() = value;
    }

    pub fn value(&self) -> ControlValue {
        *self.inner.value.lock()
    }

    fn expired(&self, now: Instant) -> bool {
        self.inner.expires_at.is_some_and(|at| now >= at)
    }
}

// =============================================================================
// REGISTRY
// =============================================================================

/// Per-control acquisition stacks.
///
/// The registry is value bookkeeping only; pushing effective values to the
/// hardware is the caller's job (the screen does it whenever an effective
/// value changes).
#[derive(Debug, Default)]
pub struct ControlRegistry {
    stacks: Mutex<HashMap<String, ControlStack>>,
}

#[derive(Debug)]
struct ControlStack {
    initial: ControlValue,
    entries: Vec<Acquisition>,
}

impl ControlRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquire a control at a value, optionally auto-releasing after a
    /// duration. The new acquisition goes on top of the stack and becomes
    /// the effective value.
    pub fn acquire(
        &self,
        control: &Control,
        value: ControlValue,
        release_after: Option<Duration>,
    ) -> Acquisition {
        let mut stacks = self.stacks.lock();
        let stack = stacks
            .entry(control.id.clone())
            .or_insert_with(|| ControlStack {
                initial: control.value,
                entries: Vec::new(),
            });

        let acquisition = Acquisition {
            inner: Arc::new(AcquisitionInner {
                id: NEXT_ACQUISITION_ID.fetch_add(1, Ordering::Relaxed),
                control_id: control.id.clone(),
                value: Mutex::new(value),
                active: AtomicBool::new(true),
                expires_at: release_after.map(|d| Instant::now() + d),
            }),
        };
        info!(
            "acquired control {} at {:?} (stack depth {})",
            control.id,
            value,
            stack.entries.len() + 1
        );
        stack.entries.push(acquisition.clone());
        acquisition
    }

    /// Release an acquisition. A no-op if it was already released or
    /// expired out of the stack.
    pub fn release(&self, acquisition: &Acquisition) {
        debug!("releasing control {}", acquisition.control_id());
        acquisition.inner.active.store(false, Ordering::Release);
        let mut stacks = self.stacks.lock();
        if let Some(stack) = stacks.get_mut(acquisition.control_id()) {
            stack.entries.retain(|a| a.id() != acquisition.id());
        }
    }

    /// Drop every acquisition for every control.
    pub fn release_all(&self) {
        let mut stacks = self.stacks.lock();
        for stack in stacks.values_mut() {
            for entry in &stack.entries {
                entry.inner.active.store(false, Ordering::Release);
            }
            stack.entries.clear();
        }
    }

    /// Effective value for a control: the most recent acquisition that is
    /// still active and unexpired, or the control's initial value when the
    /// stack is empty. Expired entries are purged as a side effect.
    pub fn effective_value(&self, control_id: &str) -> Option<ControlValue> {
        let now = Instant::now();
        let mut stacks = self.stacks.lock();
        let stack = stacks.get_mut(control_id)?;
        stack
            .entries
            .retain(|a| a.inner.active.load(Ordering::Acquire) && !a.expired(now));
        Some(
            stack
                .entries
                .last()
                .map(|a| a.value())
                .unwrap_or(stack.initial),
        )
    }

}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::ControlHint;
    use crate::types::Rgb;

    fn backlight() -> Control {
        Control::new(
            "backlight",
            "Backlight",
            ControlValue::Color(Rgb::BLACK),
            ControlHint::DIMMABLE,
        )
    }

    #[test]
    fn test_most_recent_acquisition_wins() {
        let registry = ControlRegistry::new();
        let control = backlight();

        let a = registry.acquire(&control, ControlValue::Color(Rgb::RED), None);
        assert_eq!(
            registry.effective_value("backlight"),
            Some(ControlValue::Color(Rgb::RED))
        );

        let b = registry.acquire(&control, ControlValue::Color(Rgb::WHITE), None);
        assert_eq!(
            registry.effective_value("backlight"),
            Some(ControlValue::Color(Rgb::WHITE))
        );

        // Releasing the top restores the next value down.
        registry.release(&b);
        assert_eq!(
            registry.effective_value("backlight"),
            Some(ControlValue::Color(Rgb::RED))
        );

        // Emptying the stack restores the initial value.
        registry.release(&a);
        assert_eq!(
            registry.effective_value("backlight"),
            Some(ControlValue::Color(Rgb::BLACK))
        );
    }

    #[test]
    fn test_release_non_top_leaves_effective_value() {
        let registry = ControlRegistry::new();
        let control = backlight();

        let a = registry.acquire(&control, ControlValue::Color(Rgb::RED), None);
        let _b = registry.acquire(&control, ControlValue::Color(Rgb::WHITE), None);

        registry.release(&a);
        assert_eq!(
            registry.effective_value("backlight"),
            Some(ControlValue::Color(Rgb::WHITE))
        );
    }

    #[test]
    fn test_release_after_expiry() {
        let registry = ControlRegistry::new();
        let control = backlight();

        let _a = registry.acquire(
            &control,
            ControlValue::Color(Rgb::WHITE),
            Some(Duration::from_millis(0)),
        );
        std::thread::sleep(Duration::from_millis(5));
        assert_eq!(
            registry.effective_value("backlight"),
            Some(ControlValue::Color(Rgb::BLACK))
        );
    }

    #[test]
    fn test_set_value_on_active_acquisition() {
        let registry = ControlRegistry::new();
        let control = backlight();

        let a = registry.acquire(&control, ControlValue::Color(Rgb::RED), None);
        a.set_value(ControlValue::Color(Rgb::WHITE));
        assert_eq!(
            registry.effective_value("backlight"),
            Some(ControlValue::Color(Rgb::WHITE))
        );
    }

    #[test]
    fn test_release_all() {
        let registry = ControlRegistry::new();
        let control = backlight();
        let a = registry.acquire(&control, ControlValue::Color(Rgb::RED), None);
        registry.release_all();
        assert!(!a.is_active());
        assert_eq!(
            registry.effective_value("backlight"),
            Some(ControlValue::Color(Rgb::BLACK))
        );
    }

    #[test]
    fn test_unknown_control_has_no_value() {
        let registry = ControlRegistry::new();
        assert_eq!(registry.effective_value("nope"), None);
    }
}
