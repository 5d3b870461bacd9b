//! Scroll Engine - per-element animation state machines.
//!
//! Two kinds of text animation are supported:
//! - **Marquee** (horizontal): the offset bounces back and forth between the
//!   range boundaries, so clipped text slides into view in both directions.
//! - **Wrap** (vertical): the offset advances one way toward the range
//!   maximum and stops there; it is a decode position, not a bounce.
//!
//! States are created lazily by the theme renderer the first time an
//! element's natural size exceeds its clip box, and dropped the moment that
//! stops being true, so the tracked set never grows without bound.

use std::collections::BTreeMap;

// =============================================================================
// TEXT ALIGNMENT
// =============================================================================

/// Horizontal alignment of a scrolled text element, from its `text-align`
/// style. Determines the marquee range around the original position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TextAlign {
    #[default]
    Start,
    Center,
    End,
}

impl TextAlign {
    /// Parse a CSS `text-align` value. Unknown values fall back to start.
    pub fn parse(s: &str) -> Self {
        match s {
            "center" | "middle" => Self::Center,
            "end" | "right" => Self::End,
            _ => Self::Start,
        }
    }

    /// Marquee offset range for an overflow of `diff` pixels.
    pub fn marquee_range(self, diff: f32) -> (f32, f32) {
        match self {
            Self::Start => (-diff, 0.0),
            Self::Center => (-diff / 2.0, diff / 2.0),
            Self::End => (0.0, diff),
        }
    }
}

// =============================================================================
// SCROLL STATE
// =============================================================================

/// Which state machine drives the element.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScrollKind {
    Marquee,
    Wrap,
}

/// Animation state for one scrolling element.
///
/// `val` is always `original + adjust`, and `adjust` is always inside
/// `range`.
#[derive(Debug, Clone)]
pub struct ScrollState {
    pub kind: ScrollKind,
    /// Minimum and maximum animated offset.
    pub range: (f32, f32),
    /// Current animated offset, clamped to `range`.
    pub adjust: f32,
    /// Offset applied per tick.
    pub step: f32,
    /// Marquee direction flag. Starts reversed so text first slides toward
    /// the range minimum.
    pub reversed: bool,
    /// Fixed base position the offset is applied to.
    pub original: f32,
}

impl ScrollState {
    /// New marquee state for a text element whose width exceeds its clip by
    /// `diff` pixels, anchored at `original` with the given alignment.
    pub fn marquee(align: TextAlign, diff: f32, original: f32, step: f32) -> Self {
        Self {
            kind: ScrollKind::Marquee,
            range: align.marquee_range(diff),
            adjust: 0.0,
            step,
            reversed: true,
            original,
        }
    }

    /// New wrap state for a text block whose height exceeds its clip by
    /// `diff` pixels.
    pub fn wrap(diff: f32, step: f32) -> Self {
        Self {
            kind: ScrollKind::Wrap,
            range: (0.0, diff),
            adjust: 0.0,
            step,
            reversed: false,
            original: 0.0,
        }
    }

    /// Current animated position.
    pub fn val(&self) -> f32 {
        self.original + self.adjust
    }

    /// Reset the animation to its starting offset.
    pub fn reset(&mut self) {
        self.adjust = 0.0;
        if self.kind == ScrollKind::Marquee {
            self.reversed = true;
        }
    }

    /// Advance the state by one step.
    pub fn tick(&mut self) {
        match self.kind {
            ScrollKind::Marquee => {
                self.adjust += if self.reversed { -self.step } else { self.step };
                if self.reversed && self.adjust < self.range.0 {
                    self.adjust = self.range.0;
                    self.reversed = false;
                } else if !self.reversed && self.adjust > self.range.1 {
                    self.adjust = self.range.1;
                    self.reversed = true;
                }
            }
            ScrollKind::Wrap => {
                self.adjust = (self.adjust + self.step).min(self.range.1);
            }
        }
    }
}

// =============================================================================
// SCROLL SET
// =============================================================================

/// Active scroll states keyed by template-element id.
#[derive(Debug, Default)]
pub struct ScrollSet {
    states: BTreeMap<String, ScrollState>,
}

impl ScrollSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fetch the state for an element, creating it on first sight.
    pub fn get_or_insert_with(
        &mut self,
        id: &str,
        create: impl FnOnce() -> ScrollState,
    ) -> &mut ScrollState {
        self.states.entry(id.to_string()).or_insert_with(create)
    }

    pub fn get(&self, id: &str) -> Option<&ScrollState> {
        self.states.get(id)
    }

    /// Drop the state for an element that no longer overflows its clip.
    pub fn remove(&mut self, id: &str) {
        self.states.remove(id);
    }

    pub fn clear(&mut self) {
        self.states.clear();
    }

    /// Advance every tracked state by one step. Returns true if anything
    /// was advanced, so callers know a repaint is worthwhile.
    pub fn tick(&mut self) -> bool {
        for state in self.states.values_mut() {
            state.tick();
        }
        !self.states.is_empty()
    }

    /// True iff any tracked state exists. Callers use this to decide
    /// whether to keep rescheduling ticks.
    pub fn is_scroll_required(&self) -> bool {
        !self.states.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_marquee_stays_in_range_and_flips_at_boundaries() {
        let mut s = ScrollState::marquee(TextAlign::Start, 10.0, 0.0, 3.0);
        assert_eq!(s.range, (-10.0, 0.0));

        let mut flips = 0;
        let mut last_reversed = s.reversed;
        for _ in 0..100 {
            s.tick();
            assert!(s.adjust >= -10.0 && s.adjust <= 0.0);
            if s.reversed != last_reversed {
                flips += 1;
                // Direction only changes exactly at a boundary.
                assert!(s.adjust == -10.0 || s.adjust == 0.0);
                last_reversed = s.reversed;
            }
        }
        assert!(flips > 1);
    }

    #[test]
    fn test_marquee_val_is_original_plus_adjust() {
        let mut s = ScrollState::marquee(TextAlign::Start, 6.0, 40.0, 2.0);
        assert_eq!(s.val(), 40.0);
        s.tick();
        assert_eq!(s.val(), 40.0 + s.adjust);
    }

    #[test]
    fn test_marquee_center_range() {
        let s = ScrollState::marquee(TextAlign::Center, 10.0, 0.0, 1.0);
        assert_eq!(s.range, (-5.0, 5.0));
        let s = ScrollState::marquee(TextAlign::End, 10.0, 0.0, 1.0);
        assert_eq!(s.range, (0.0, 10.0));
    }

    #[test]
    fn test_wrap_is_monotonic_and_clamps() {
        let mut s = ScrollState::wrap(7.0, 3.0);
        let mut prev = s.adjust;
        for _ in 0..10 {
            s.tick();
            assert!(s.adjust >= prev);
            assert!(s.adjust <= 7.0);
            prev = s.adjust;
        }
        assert_eq!(s.adjust, 7.0);
        // No direction flip for wrap: it just stays pinned.
        s.tick();
        assert_eq!(s.adjust, 7.0);
    }

    #[test]
    fn test_reset() {
        let mut s = ScrollState::marquee(TextAlign::Start, 4.0, 0.0, 1.0);
        s.tick();
        s.tick();
        s.reset();
        assert_eq!(s.adjust, 0.0);
        assert!(s.reversed);
    }

    #[test]
    fn test_scroll_set_lifecycle() {
        let mut set = ScrollSet::new();
        assert!(!set.is_scroll_required());

        set.get_or_insert_with("title", || {
            ScrollState::marquee(TextAlign::Start, 5.0, 0.0, 1.0)
        });
        assert!(set.is_scroll_required());
        assert!(set.tick());

        set.remove("title");
        assert!(!set.is_scroll_required());
        assert!(!set.tick());
    }

    #[test]
    fn test_text_align_parse() {
        assert_eq!(TextAlign::parse("center"), TextAlign::Center);
        assert_eq!(TextAlign::parse("end"), TextAlign::End);
        assert_eq!(TextAlign::parse("banana"), TextAlign::Start);
    }
}
