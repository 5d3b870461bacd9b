//! Pages and their scheduling metadata.
//!
//! A page is a component tree plus a priority and a timestamp. The screen
//! shows whichever non-invisible page ranks highest by `(priority, time)`:
//! priority always dominates, and within a priority class the most recently
//! touched page wins.

use std::sync::atomic::{AtomicU64, Ordering};

use crate::component::Component;
use crate::error::Result;
use crate::theme::RenderContext;
use crate::types::Canvas;

// =============================================================================
// PRIORITY
// =============================================================================

/// Scheduling weight of a page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum PagePriority {
    /// Never shown, never considered for visibility.
    Invisible,
    /// Shown only when nothing else wants the screen.
    Low,
    /// Normal cycling pages.
    Normal,
    /// Shown in preference to normal pages.
    High,
    /// Locks the screen; at most one at a time.
    Exclusive,
    /// Transient popup, beats everything.
    Popup,
}

impl PagePriority {
    /// Numeric scheduling weight.
    pub fn value(self) -> u64 {
        match self {
            Self::Invisible => 0,
            Self::Low => 20,
            Self::Normal => 50,
            Self::High => 99,
            Self::Exclusive => 100,
            Self::Popup => 999,
        }
    }
}

// =============================================================================
// TIME SEQUENCE
// =============================================================================

static SEQUENCE: AtomicU64 = AtomicU64::new(1);

/// Next value of the global monotonic page clock. Strictly increasing, so
/// no two pages ever share a timestamp.
pub fn next_time() -> u64 {
    SEQUENCE.fetch_add(1, Ordering::Relaxed)
}

// =============================================================================
// BEHAVIOR
// =============================================================================

/// Lifecycle hooks a page owner can implement; all default to no-ops.
pub trait PageBehavior: Send {
    /// The page became the visible page.
    fn on_shown(&mut self) {}

    /// The page stopped being the visible page.
    fn on_hidden(&mut self) {}

    /// The page was removed from the screen.
    fn on_deleted(&mut self) {}
}

struct NoopPageBehavior;

impl PageBehavior for NoopPageBehavior {}

// =============================================================================
// PAGE
// =============================================================================

/// One schedulable screen of content.
pub struct Page {
    id: String,
    title: String,
    priority: PagePriority,
    time: u64,
    root: Component,
    behavior: Box<dyn PageBehavior>,
}

impl std::fmt::Debug for Page {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Page")
            .field("id", &self.id)
            .field("priority", &self.priority)
            .field("time", &self.time)
            .finish_non_exhaustive()
    }
}

impl Page {
    pub fn new(id: &str, title: &str) -> Self {
        Self {
            id: id.to_string(),
            title: title.to_string(),
            priority: PagePriority::Normal,
            time: next_time(),
            root: Component::new(id),
            behavior: Box::new(NoopPageBehavior),
        }
    }

    pub fn with_priority(mut self, priority: PagePriority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_behavior(mut self, behavior: Box<dyn PageBehavior>) -> Self {
        self.behavior = behavior;
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn set_title(&mut self, title: &str) {
        self.title = title.to_string();
    }

    pub fn priority(&self) -> PagePriority {
        self.priority
    }

    pub(crate) fn set_priority(&mut self, priority: PagePriority) {
        self.priority = priority;
        self.touch();
    }

    pub fn time(&self) -> u64 {
        self.time
    }

    pub(crate) fn set_time(&mut self, time: u64) {
        self.time = time;
    }

    /// Refresh the page's timestamp so it wins ties at its priority.
    pub(crate) fn touch(&mut self) {
        self.time = next_time();
    }

    /// Scheduling key. Priority dominates; the timestamp only breaks ties
    /// within a priority class, so no amount of touching lets a page
    /// overtake a higher-priority one.
    pub fn sort_key(&self) -> (PagePriority, u64) {
        (self.priority, self.time)
    }

    /// Invisible pages never compete for the screen.
    pub fn is_candidate(&self) -> bool {
        self.priority != PagePriority::Invisible
    }

    /// Root of the page's component tree.
    pub fn root(&self) -> &Component {
        &self.root
    }

    pub fn root_mut(&mut self) -> &mut Component {
        &mut self.root
    }

    pub fn is_scroll_required(&self) -> bool {
        self.root.is_scroll_required()
    }

    pub fn do_scroll(&mut self) -> bool {
        self.root.do_scroll()
    }

    /// Render the page's content onto a canvas.
    pub fn draw(&mut self, canvas: &mut Canvas, ctx: &RenderContext) -> Result<()> {
        self.root.draw(canvas, ctx)
    }

    pub(crate) fn notify_shown(&mut self) {
        self.behavior.on_shown();
    }

    pub(crate) fn notify_hidden(&mut self) {
        self.behavior.on_hidden();
    }

    pub(crate) fn notify_deleted(&mut self) {
        self.behavior.on_deleted();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_priority_ordering() {
        assert!(PagePriority::Invisible < PagePriority::Low);
        assert!(PagePriority::Low < PagePriority::Normal);
        assert!(PagePriority::Normal < PagePriority::High);
        assert!(PagePriority::High < PagePriority::Exclusive);
        assert!(PagePriority::Exclusive < PagePriority::Popup);
        assert_eq!(PagePriority::Invisible.value(), 0);
        assert_eq!(PagePriority::Popup.value(), 999);
    }

    #[test]
    fn test_time_sequence_is_strictly_increasing() {
        let a = next_time();
        let b = next_time();
        assert!(b > a);
    }

    #[test]
    fn test_newer_page_wins_at_same_priority() {
        let older = Page::new("a", "A");
        let newer = Page::new("b", "B");
        assert!(newer.sort_key() > older.sort_key());
    }

    #[test]
    fn test_higher_priority_beats_newer_lower() {
        let low = Page::new("b", "B").with_priority(PagePriority::Low);
        let high = Page::new("a", "A").with_priority(PagePriority::High);
        assert!(high.sort_key() > low.sort_key());
    }

    #[test]
    fn test_priority_dominates_any_number_of_touches() {
        let high = Page::new("a", "A").with_priority(PagePriority::High);
        let mut normal = Page::new("b", "B");
        for _ in 0..100 {
            normal.touch();
        }
        assert!(high.sort_key() > normal.sort_key());
    }

    #[test]
    fn test_invisible_is_not_a_candidate() {
        let page = Page::new("a", "A").with_priority(PagePriority::Invisible);
        assert!(!page.is_candidate());
    }

    #[test]
    fn test_touch_refreshes_time() {
        let mut page = Page::new("a", "A");
        let before = page.time();
        page.touch();
        assert!(page.time() > before);
    }
}
