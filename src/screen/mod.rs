//! Screen core: page scheduling, compositing and device lifecycle.
//!
//! All screen state lives on one actor thread that owns the driver, the
//! page list, the timers and the compositor. The public [`Screen`] handle
//! is a channel sender; operations that need an answer carry a reply
//! channel and block until the actor gets to them, so observable ordering
//! is simply command order.
//!
//! Scheduling: the visible page is the non-invisible page ranking highest
//! by `(priority, time)`. Timestamps come from a global monotonic sequence,
//! so within a priority class whichever page was touched last wins.

use std::collections::HashMap;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{bounded, unbounded, Receiver, RecvTimeoutError, Sender};
use log::{debug, error, info, warn};

use crate::driver::{
    Acquisition, ControlHint, ControlRegistry, ControlValue, Driver, KeyHandler,
};
use crate::error::{Result, ScreenError};
use crate::theme::RenderContext;
use crate::types::{self, Canvas, Direction, Rgb};

pub mod page;
pub mod painter;
pub mod timers;

pub use page::{Page, PageBehavior, PagePriority};
pub use painter::{Fader, Painter, PainterPlace};
pub use timers::{TimerId, TimerQueue};

// =============================================================================
// CONFIGURATION
// =============================================================================

/// Construction-time screen configuration.
#[derive(Debug, Clone)]
pub struct ScreenConfig {
    /// Interval between scroll animation steps.
    pub scroll_interval: Duration,
    /// Pixels moved per scroll step.
    pub scroll_step: f32,
    /// Number of opacity steps in a fade.
    pub fade_steps: u32,
    /// Delay between fade steps.
    pub fade_interval: Duration,
    /// First reconnect delay after a connection failure.
    pub retry_initial: Duration,
    /// Reconnect delay ceiling; the delay doubles up to this.
    pub retry_max: Duration,
}

impl Default for ScreenConfig {
    fn default() -> Self {
        Self {
            scroll_interval: Duration::from_millis(100),
            scroll_step: 1.0,
            fade_steps: 8,
            fade_interval: Duration::from_millis(50),
            retry_initial: Duration::from_secs(5),
            retry_max: Duration::from_secs(60),
        }
    }
}

// =============================================================================
// HOOKS
// =============================================================================

/// Observer of screen-level events; every method defaults to a no-op.
pub trait ScreenChangeListener: Send {
    fn page_added(&mut self, _page_id: &str) {}
    /// Fired before the page's subtree is detached.
    fn page_deleting(&mut self, _page_id: &str) {}
    fn page_removed(&mut self, _page_id: &str) {}
    fn page_changed(&mut self, _page_id: &str) {}
    fn title_changed(&mut self, _page_id: &str, _title: &str) {}
    fn attention_changed(&mut self, _attention: bool, _message: Option<&str>) {}
    fn memory_bank_changed(&mut self, _bank: u8) {}
    fn driver_connected(&mut self) {}
    fn driver_disconnected(&mut self) {}
    fn connection_failed(&mut self, _details: &str) {}
}

/// Hook invoked when the visible page changes, with the outgoing and
/// incoming content surfaces.
pub trait Transition: Send {
    fn transition(
        &mut self,
        old: Option<&Canvas>,
        new: Option<&Canvas>,
        old_page: Option<&str>,
        new_page: Option<&str>,
        direction: Direction,
    );
}

/// When set, composed frames go here instead of to the driver.
pub type FramePainter = Box<dyn FnMut(&Canvas) + Send>;

/// Handle for removing a registered painter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PainterId(u64);

// =============================================================================
// COMMANDS
// =============================================================================

enum Command {
    AddPage(Page, Sender<Result<()>>),
    DeletePage(String),
    RaisePage(String),
    SetPriority {
        id: String,
        priority: PagePriority,
        revert_after: Option<Duration>,
        delete_after: Option<Duration>,
    },
    Cycle(i64),
    CycleTo(String),
    Redraw(Option<String>),
    WithPage(String, Box<dyn FnOnce(&mut Page) + Send>),
    SetTitle {
        id: String,
        title: String,
    },
    SetMemoryBank(u8),
    RequestAttention(Option<String>),
    ClearAttention,
    AddListener(Box<dyn ScreenChangeListener>),
    AddPainter(Box<dyn Painter>, Sender<PainterId>),
    RemovePainter(PainterId),
    SetFramePainter(Option<FramePainter>),
    SetTransition(Option<Box<dyn Transition>>),
    Fade {
        stay_faded: bool,
        reply: Sender<()>,
    },
    AttemptConnection,
    GrabKeyboard(KeyHandler, Sender<Result<()>>),
    AcquireControl {
        control_id: String,
        value: ControlValue,
        release_after: Option<Duration>,
        reply: Sender<Result<Acquisition>>,
    },
    ReleaseControl(Acquisition),
    VisiblePage(Sender<Option<String>>),
    PageIds(Sender<Vec<String>>),
    PagePriority(String, Sender<Option<PagePriority>>),
    PageTitle(String, Sender<Option<String>>),
    Stop(Sender<()>),
}

enum TimerTask {
    RevertPriority { page: String },
    DeletePage { page: String },
    ScrollTick,
    ConnectionRetry,
    ControlSync { control_id: String },
}

// =============================================================================
// SCREEN HANDLE
// =============================================================================

/// Handle to a running screen. Cheap to use from any thread; dropping the
/// last handle stops the actor.
pub struct Screen {
    tx: Sender<Command>,
    handle: Option<JoinHandle<()>>,
}

impl Screen {
    /// Start the screen actor for a driver.
    pub fn new(driver: Box<dyn Driver>, config: ScreenConfig) -> Self {
        let (tx, rx) = unbounded();
        let fader = Fader::new(driver.bpp());
        let retry_initial = config.retry_initial;
        let was_connected = driver.is_connected();
        let actor = Actor {
            driver,
            config,
            rx,
            pages: Vec::new(),
            visible: None,
            listeners: Vec::new(),
            painters: Vec::new(),
            next_painter_id: 0,
            fader,
            frame_painter: None,
            transition: None,
            timers: TimerQueue::new(),
            revert_timers: HashMap::new(),
            delete_timers: HashMap::new(),
            content_cache: HashMap::new(),
            controls: ControlRegistry::new(),
            memory_bank: 0,
            attention: false,
            attention_message: None,
            retry_backoff: retry_initial,
            scroll_scheduled: false,
            pending_direction: None,
            was_connected,
            needs_paint: true,
            running: true,
        };
        let handle = thread::spawn(move || actor.run());
        Self {
            tx,
            handle: Some(handle),
        }
    }

    fn send(&self, command: Command) -> Result<()> {
        self.tx.send(command).map_err(|_| ScreenError::ChannelClosed)
    }

    fn request<T>(&self, build: impl FnOnce(Sender<T>) -> Command) -> Result<T> {
        let (reply_tx, reply_rx) = bounded(1);
        self.send(build(reply_tx))?;
        reply_rx.recv().map_err(|_| ScreenError::ChannelClosed)
    }

    /// Add a page. Fails if the device has no addressable display. An
    /// existing page with the same id is replaced; any popup is demoted.
    pub fn add_page(&self, page: Page) -> Result<()> {
        self.request(|reply| Command::AddPage(page, reply))?
    }

    pub fn delete_page(&self, id: &str) -> Result<()> {
        self.send(Command::DeletePage(id.to_string()))
    }

    /// Bring a page forward: low-priority pages become popups, everything
    /// else just gets a fresh timestamp.
    pub fn raise_page(&self, id: &str) -> Result<()> {
        self.send(Command::RaisePage(id.to_string()))
    }

    /// Change a page's priority, optionally reverting or deleting later.
    /// Each page keeps at most one pending revert and one pending delete;
    /// rescheduling a revert keeps the originally stored priority.
    pub fn set_priority(
        &self,
        id: &str,
        priority: PagePriority,
        revert_after: Option<Duration>,
        delete_after: Option<Duration>,
    ) -> Result<()> {
        self.send(Command::SetPriority {
            id: id.to_string(),
            priority,
            revert_after,
            delete_after,
        })
    }

    /// Rotate visibility among normal-priority pages. Consecutive queued
    /// cycles coalesce into one rotation.
    pub fn cycle(&self, offset: i64) -> Result<()> {
        self.send(Command::Cycle(offset))
    }

    pub fn cycle_to(&self, id: &str) -> Result<()> {
        self.send(Command::CycleTo(id.to_string()))
    }

    /// Invalidate a page's content surface (all pages when `None`) and
    /// repaint if it affects the frame.
    pub fn redraw(&self, id: Option<&str>) -> Result<()> {
        self.send(Command::Redraw(id.map(str::to_string)))
    }

    /// Run a closure against a page on the actor thread. The page's
    /// content surface is invalidated afterwards.
    pub fn with_page(
        &self,
        id: &str,
        f: impl FnOnce(&mut Page) + Send + 'static,
    ) -> Result<()> {
        self.send(Command::WithPage(id.to_string(), Box::new(f)))
    }

    pub fn set_title(&self, id: &str, title: &str) -> Result<()> {
        self.send(Command::SetTitle {
            id: id.to_string(),
            title: title.to_string(),
        })
    }

    /// Select a memory bank (0-3); out-of-range values clamp.
    pub fn set_memory_bank(&self, bank: u8) -> Result<()> {
        self.send(Command::SetMemoryBank(bank))
    }

    pub fn request_attention(&self, message: Option<&str>) -> Result<()> {
        self.send(Command::RequestAttention(message.map(str::to_string)))
    }

    pub fn clear_attention(&self) -> Result<()> {
        self.send(Command::ClearAttention)
    }

    pub fn add_listener(&self, listener: Box<dyn ScreenChangeListener>) -> Result<()> {
        self.send(Command::AddListener(listener))
    }

    pub fn add_painter(&self, painter: Box<dyn Painter>) -> Result<PainterId> {
        self.request(|reply| Command::AddPainter(painter, reply))
    }

    pub fn remove_painter(&self, id: PainterId) -> Result<()> {
        self.send(Command::RemovePainter(id))
    }

    /// Divert composed frames away from the driver (pass `None` to restore).
    pub fn set_frame_painter(&self, painter: Option<FramePainter>) -> Result<()> {
        self.send(Command::SetFramePainter(painter))
    }

    pub fn set_transition(&self, transition: Option<Box<dyn Transition>>) -> Result<()> {
        self.send(Command::SetTransition(transition))
    }

    /// Fade the frame to blank. Blocks until the fade completes; with
    /// `stay_faded` the frame stays blanked until the next repaint trigger.
    pub fn fade(&self, stay_faded: bool) -> Result<()> {
        self.request(|reply| Command::Fade { stay_faded, reply })
    }

    /// Kick a connection attempt (retries are automatic after failures).
    pub fn attempt_connection(&self) -> Result<()> {
        self.send(Command::AttemptConnection)
    }

    pub fn grab_keyboard(&self, handler: KeyHandler) -> Result<()> {
        self.request(|reply| Command::GrabKeyboard(handler, reply))?
    }

    /// Acquire a control by id; see [`ControlRegistry`] for stacking rules.
    pub fn acquire_control(
        &self,
        control_id: &str,
        value: ControlValue,
        release_after: Option<Duration>,
    ) -> Result<Acquisition> {
        self.request(|reply| Command::AcquireControl {
            control_id: control_id.to_string(),
            value,
            release_after,
            reply,
        })?
    }

    pub fn release_control(&self, acquisition: Acquisition) -> Result<()> {
        self.send(Command::ReleaseControl(acquisition))
    }

    pub fn visible_page(&self) -> Result<Option<String>> {
        self.request(Command::VisiblePage)
    }

    pub fn page_ids(&self) -> Result<Vec<String>> {
        self.request(Command::PageIds)
    }

    pub fn page_priority(&self, id: &str) -> Result<Option<PagePriority>> {
        self.request(|reply| Command::PagePriority(id.to_string(), reply))
    }

    pub fn page_title(&self, id: &str) -> Result<Option<String>> {
        self.request(|reply| Command::PageTitle(id.to_string(), reply))
    }
}

impl Screen {
    /// Shut the actor down and join its thread. Subsequent operations fail
    /// with [`ScreenError::ChannelClosed`]. Dropping the handle does this
    /// implicitly.
    pub fn stop(&mut self) {
        let (reply_tx, reply_rx) = bounded(1);
        if self.tx.send(Command::Stop(reply_tx)).is_ok() {
            let _ = reply_rx.recv_timeout(Duration::from_secs(5));
        }
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for Screen {
    fn drop(&mut self) {
        self.stop();
    }
}

// =============================================================================
// ACTOR
// =============================================================================

struct Actor {
    driver: Box<dyn Driver>,
    config: ScreenConfig,
    rx: Receiver<Command>,
    pages: Vec<Page>,
    visible: Option<String>,
    listeners: Vec<Box<dyn ScreenChangeListener>>,
    painters: Vec<(PainterId, Box<dyn Painter>)>,
    next_painter_id: u64,
    fader: Fader,
    frame_painter: Option<FramePainter>,
    transition: Option<Box<dyn Transition>>,
    timers: TimerQueue<TimerTask>,
    /// Pending revert per page, with the priority to restore. The stored
    /// priority survives rescheduling.
    revert_timers: HashMap<String, (TimerId, PagePriority)>,
    delete_timers: HashMap<String, TimerId>,
    /// Rendered content surfaces, keyed by page id.
    content_cache: HashMap<String, Canvas>,
    controls: ControlRegistry,
    memory_bank: u8,
    attention: bool,
    attention_message: Option<String>,
    retry_backoff: Duration,
    scroll_scheduled: bool,
    /// Direction the next visibility change should report, when it was
    /// caused by an explicit cycle.
    pending_direction: Option<Direction>,
    was_connected: bool,
    needs_paint: bool,
    running: bool,
}

impl Actor {
    fn run(mut self) {
        self.try_connect();
        while self.running {
            let timeout = match self.timers.next_deadline() {
                Some(deadline) => deadline.saturating_duration_since(Instant::now()),
                None => Duration::from_secs(3600),
            };
            match self.rx.recv_timeout(timeout) {
                Ok(command) => self.handle(command),
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => break,
            }
            self.fire_due_timers();
            self.check_connection();
            self.update_visible();
            if self.needs_paint {
                self.repaint();
            }
        }
    }

    /// Notice a driver that dropped its connection between commands and
    /// start the reconnect cycle.
    fn check_connection(&mut self) {
        let connected = self.driver.is_connected();
        if self.was_connected && !connected {
            warn!("driver {} disconnected", self.driver.name());
            for listener in &mut self.listeners {
                listener.driver_disconnected();
            }
            self.try_connect();
        }
        self.was_connected = self.driver.is_connected();
    }

    fn handle(&mut self, command: Command) {
        match command {
            Command::AddPage(page, reply) => {
                let _ = reply.send(self.add_page(page));
            }
            Command::DeletePage(id) => self.delete_page(&id),
            Command::RaisePage(id) => self.raise_page(&id),
            Command::SetPriority {
                id,
                priority,
                revert_after,
                delete_after,
            } => self.set_page_priority(&id, priority, revert_after, delete_after),
            Command::Cycle(mut offset) => {
                // A queued cycle supersedes a pending one; a key-repeat
                // burst collapses to the latest request.
                let mut deferred = None;
                while let Ok(next) = self.rx.try_recv() {
                    match next {
                        Command::Cycle(latest) => offset = latest,
                        other => {
                            deferred = Some(other);
                            break;
                        }
                    }
                }
                self.cycle_pages(offset);
                if let Some(other) = deferred {
                    // Settle visibility before the command that interrupted
                    // the burst observes it.
                    self.update_visible();
                    self.handle(other);
                }
            }
            Command::CycleTo(id) => self.cycle_to_page(&id),
            Command::Redraw(Some(id)) => {
                self.content_cache.remove(&id);
                if let Some(page) = self.page_mut(&id) {
                    page.root_mut().mark_dirty();
                }
                // Repainting a page nobody can see is wasted work.
                if self.visible.as_deref() == Some(id.as_str()) {
                    self.needs_paint = true;
                }
            }
            Command::Redraw(None) => {
                self.content_cache.clear();
                for page in &mut self.pages {
                    page.root_mut().mark_dirty();
                }
                self.needs_paint = true;
            }
            Command::WithPage(id, f) => {
                if let Some(page) = self.page_mut(&id) {
                    f(page);
                    self.content_cache.remove(&id);
                    if self.visible.as_deref() == Some(id.as_str()) {
                        self.needs_paint = true;
                    }
                }
            }
            Command::SetTitle { id, title } => {
                if let Some(page) = self.page_mut(&id) {
                    page.set_title(&title);
                    self.content_cache.remove(&id);
                    for listener in &mut self.listeners {
                        listener.title_changed(&id, &title);
                    }
                    if self.visible.as_deref() == Some(id.as_str()) {
                        self.needs_paint = true;
                    }
                }
            }
            Command::SetMemoryBank(bank) => self.set_memory_bank(bank),
            Command::RequestAttention(message) => self.request_attention(message),
            Command::ClearAttention => self.clear_attention(),
            Command::AddListener(listener) => self.listeners.push(listener),
            Command::AddPainter(painter, reply) => {
                let id = PainterId(self.next_painter_id);
                self.next_painter_id += 1;
                self.painters.push((id, painter));
                self.painters.sort_by_key(|(_, p)| p.z_order());
                self.needs_paint = true;
                let _ = reply.send(id);
            }
            Command::RemovePainter(id) => {
                self.painters.retain(|(painter_id, _)| *painter_id != id);
                self.needs_paint = true;
            }
            Command::SetFramePainter(painter) => {
                self.frame_painter = painter;
                self.needs_paint = true;
            }
            Command::SetTransition(transition) => self.transition = transition,
            Command::Fade { stay_faded, reply } => {
                self.fade(stay_faded);
                let _ = reply.send(());
            }
            Command::AttemptConnection => self.try_connect(),
            Command::GrabKeyboard(handler, reply) => {
                let _ = reply.send(self.driver.grab_keyboard(handler));
            }
            Command::AcquireControl {
                control_id,
                value,
                release_after,
                reply,
            } => {
                let _ = reply.send(self.acquire_control(&control_id, value, release_after));
            }
            Command::ReleaseControl(acquisition) => {
                self.controls.release(&acquisition);
                self.push_control(acquisition.control_id());
            }
            Command::VisiblePage(reply) => {
                let _ = reply.send(self.visible.clone());
            }
            Command::PageIds(reply) => {
                let _ = reply.send(self.pages.iter().map(|p| p.id().to_string()).collect());
            }
            Command::PagePriority(id, reply) => {
                let _ = reply.send(
                    self.pages
                        .iter()
                        .find(|p| p.id() == id)
                        .map(Page::priority),
                );
            }
            Command::PageTitle(id, reply) => {
                let _ = reply.send(
                    self.pages
                        .iter()
                        .find(|p| p.id() == id)
                        .map(|p| p.title().to_string()),
                );
            }
            Command::Stop(reply) => {
                self.running = false;
                let _ = reply.send(());
            }
        }
    }

    // -------------------------------------------------------------------------
    // Pages
    // -------------------------------------------------------------------------

    fn page_mut(&mut self, id: &str) -> Option<&mut Page> {
        self.pages.iter_mut().find(|p| p.id() == id)
    }

    fn add_page(&mut self, mut page: Page) -> Result<()> {
        if self.driver.bpp() == 0 {
            return Err(ScreenError::Capability {
                details: "display has no addressable pixels".to_string(),
            });
        }
        let id = page.id().to_string();
        if self.pages.iter().any(|p| p.id() == id) {
            self.delete_page(&id);
        }
        // A new page dismisses any popup.
        for existing in &mut self.pages {
            if existing.priority() == PagePriority::Popup {
                existing.set_priority(PagePriority::Low);
            }
        }
        let priority = self.resolve_exclusive(&id, page.priority());
        if priority != page.priority() {
            page.set_priority(priority);
        }
        page.touch();
        info!("adding page {id}");
        self.pages.push(page);
        for listener in &mut self.listeners {
            listener.page_added(&id);
        }
        self.needs_paint = true;
        Ok(())
    }

    fn delete_page(&mut self, id: &str) {
        let Some(pos) = self.pages.iter().position(|p| p.id() == id) else {
            return;
        };
        for listener in &mut self.listeners {
            listener.page_deleting(id);
        }
        let mut page = self.pages.remove(pos);
        if let Some((timer, _)) = self.revert_timers.remove(id) {
            self.timers.cancel(timer);
        }
        if let Some(timer) = self.delete_timers.remove(id) {
            self.timers.cancel(timer);
        }
        self.content_cache.remove(id);
        info!("deleting page {id}");
        if self.visible.as_deref() == Some(id) {
            page.notify_hidden();
        }
        page.notify_deleted();
        for listener in &mut self.listeners {
            listener.page_removed(id);
        }
        self.needs_paint = true;
    }

    fn raise_page(&mut self, id: &str) {
        let Some(page) = self.page_mut(id) else {
            return;
        };
        if page.priority() == PagePriority::Low {
            // Raised low pages stick around as popups until something else
            // comes along.
            page.set_priority(PagePriority::Popup);
        } else {
            page.touch();
        }
        self.needs_paint = true;
    }

    /// Demote a requested exclusive priority if another page already holds
    /// the screen exclusively.
    fn resolve_exclusive(&self, id: &str, priority: PagePriority) -> PagePriority {
        if priority == PagePriority::Exclusive
            && self
                .pages
                .iter()
                .any(|p| p.id() != id && p.priority() == PagePriority::Exclusive)
        {
            warn!("page {id} requested exclusive while another page holds it, demoting to high");
            return PagePriority::High;
        }
        priority
    }

    fn set_page_priority(
        &mut self,
        id: &str,
        priority: PagePriority,
        revert_after: Option<Duration>,
        delete_after: Option<Duration>,
    ) {
        let priority = self.resolve_exclusive(id, priority);
        let Some(page) = self.pages.iter_mut().find(|p| p.id() == id) else {
            return;
        };
        let old = page.priority();
        page.set_priority(priority);
        debug!("page {id} priority {old:?} -> {priority:?}");

        if let Some(delay) = revert_after {
            // Rescheduling keeps the priority captured by the first revert.
            let restore = match self.revert_timers.remove(id) {
                Some((timer, stored)) => {
                    self.timers.cancel(timer);
                    stored
                }
                None => old,
            };
            let timer = self.timers.schedule(
                delay,
                TimerTask::RevertPriority {
                    page: id.to_string(),
                },
            );
            self.revert_timers.insert(id.to_string(), (timer, restore));
        }
        if let Some(delay) = delete_after {
            if let Some(timer) = self.delete_timers.remove(id) {
                self.timers.cancel(timer);
            }
            let timer = self.timers.schedule(
                delay,
                TimerTask::DeletePage {
                    page: id.to_string(),
                },
            );
            self.delete_timers.insert(id.to_string(), timer);
        }
        self.needs_paint = true;
    }

    /// Rotate timestamps among normal-priority pages so visibility walks
    /// through them without disturbing higher or lower priorities.
    fn cycle_pages(&mut self, offset: i64) {
        let mut indices: Vec<usize> = self
            .pages
            .iter()
            .enumerate()
            .filter(|(_, p)| p.priority() == PagePriority::Normal)
            .map(|(i, _)| i)
            .collect();
        if indices.len() < 2 || offset == 0 {
            return;
        }
        indices.sort_by_key(|&i| self.pages[i].time());
        let times: Vec<u64> = indices.iter().map(|&i| self.pages[i].time()).collect();
        let len = indices.len() as i64;
        let shift = offset.rem_euclid(len) as usize;
        for (position, &index) in indices.iter().enumerate() {
            self.pages[index].set_time(times[(position + shift) % times.len()]);
        }
        self.pending_direction = Some(if offset < 0 {
            Direction::Down
        } else {
            Direction::Up
        });
        self.needs_paint = true;
    }

    /// Rotate the normal class until the target holds the freshest
    /// timestamp, keeping the cyclic order of the other pages intact.
    /// Pages outside the normal class are just touched.
    fn cycle_to_page(&mut self, id: &str) {
        let Some(target) = self.pages.iter().find(|p| p.id() == id) else {
            return;
        };
        if target.priority() != PagePriority::Normal {
            if let Some(page) = self.page_mut(id) {
                page.touch();
                self.needs_paint = true;
            }
            return;
        }
        let mut indices: Vec<usize> = self
            .pages
            .iter()
            .enumerate()
            .filter(|(_, p)| p.priority() == PagePriority::Normal)
            .map(|(i, _)| i)
            .collect();
        indices.sort_by_key(|&i| self.pages[i].time());
        let len = indices.len();
        let Some(position) = indices.iter().position(|&i| self.pages[i].id() == id) else {
            return;
        };
        let shift = (len - 1 - position) % len;
        if shift == 0 {
            self.needs_paint = true;
            return;
        }
        let times: Vec<u64> = indices.iter().map(|&i| self.pages[i].time()).collect();
        for (position, &index) in indices.iter().enumerate() {
            self.pages[index].set_time(times[(position + shift) % len]);
        }
        self.pending_direction = Some(Direction::Up);
        self.needs_paint = true;
    }

    // -------------------------------------------------------------------------
    // Visibility
    // -------------------------------------------------------------------------

    fn update_visible(&mut self) {
        let pending_direction = self.pending_direction.take();
        let new_id = self
            .pages
            .iter()
            .filter(|p| p.is_candidate())
            .max_by_key(|p| p.sort_key())
            .map(|p| p.id().to_string());
        if new_id == self.visible {
            return;
        }
        let old_id = self.visible.clone();
        debug!("visible page {old_id:?} -> {new_id:?}");

        let old_time = old_id
            .as_deref()
            .and_then(|id| self.pages.iter().find(|p| p.id() == id))
            .map(Page::time);
        let new_time = new_id
            .as_deref()
            .and_then(|id| self.pages.iter().find(|p| p.id() == id))
            .map(Page::time);
        let direction = pending_direction.unwrap_or(match (old_time, new_time) {
            (Some(old), Some(new)) if new < old => Direction::Down,
            _ => Direction::Up,
        });

        let ctx = self.render_context();
        let old_surface = old_id
            .as_deref()
            .and_then(|id| self.content_cache.get(id).cloned());
        let new_surface = new_id
            .as_deref()
            .and_then(|id| self.page_content(id, &ctx));

        if let Some(id) = old_id.as_deref() {
            if let Some(page) = self.pages.iter_mut().find(|p| p.id() == id) {
                page.notify_hidden();
            }
        }
        self.visible = new_id.clone();
        if let Some(id) = new_id.as_deref() {
            if let Some(page) = self.pages.iter_mut().find(|p| p.id() == id) {
                page.notify_shown();
            }
            for listener in &mut self.listeners {
                listener.page_changed(id);
            }
        }
        if let Some(transition) = self.transition.as_mut() {
            transition.transition(
                old_surface.as_ref(),
                new_surface.as_ref(),
                old_id.as_deref(),
                new_id.as_deref(),
                direction,
            );
        }
        self.needs_paint = true;
    }

    // -------------------------------------------------------------------------
    // Compositing
    // -------------------------------------------------------------------------

    fn render_context(&self) -> RenderContext {
        RenderContext {
            foreground: self.driver.color_for_hint(ControlHint::FOREGROUND, Rgb::BLACK),
            background: self.driver.color_for_hint(ControlHint::BACKGROUND, Rgb::WHITE),
            highlight: self
                .driver
                .control_for_hint(ControlHint::HIGHLIGHT)
                .and_then(|c| match c.value {
                    ControlValue::Color(color) => Some(color),
                    _ => None,
                }),
            scroll_step: self.config.scroll_step,
        }
    }

    /// The rendered content surface for a page, from cache or freshly drawn.
    fn page_content(&mut self, id: &str, ctx: &RenderContext) -> Option<Canvas> {
        if let Some(cached) = self.content_cache.get(id) {
            return Some(cached.clone());
        }
        let (width, height) = self.driver.size();
        let mut canvas = Canvas::new(width, height)?;
        let page = self.pages.iter_mut().find(|p| p.id() == id)?;
        if let Err(err) = page.draw(&mut canvas, ctx) {
            error!("page {id} failed to render: {err}");
        }
        self.content_cache.insert(id.to_string(), canvas.clone());
        Some(canvas)
    }

    fn repaint(&mut self) {
        self.needs_paint = false;
        let (width, height) = self.driver.size();
        if width == 0 || height == 0 {
            return;
        }
        let Some(mut frame) = Canvas::new(width, height) else {
            return;
        };
        let ctx = self.render_context();
        types::clear(&mut frame, ctx.background);

        self.paint_place(&mut frame, PainterPlace::Background);
        if let Some(id) = self.visible.clone() {
            if let Some(content) = self.page_content(&id, &ctx) {
                types::blit(&mut frame, &content, 0, 0);
            }
        }
        self.paint_place(&mut frame, PainterPlace::Foreground);
        self.fader.paint(&mut frame);
        self.emit(&frame);

        // Keep the scroll clock running while the visible page needs it.
        let scrolling = self
            .visible
            .as_deref()
            .and_then(|id| self.pages.iter().find(|p| p.id() == id))
            .is_some_and(Page::is_scroll_required);
        if scrolling && !self.scroll_scheduled {
            self.timers
                .schedule(self.config.scroll_interval, TimerTask::ScrollTick);
            self.scroll_scheduled = true;
        }
    }

    fn paint_place(&mut self, frame: &mut Canvas, place: PainterPlace) {
        for (_, painter) in &mut self.painters {
            if painter.place() == place {
                painter.paint(frame);
            }
        }
    }

    fn emit(&mut self, frame: &Canvas) {
        if let Some(painter) = self.frame_painter.as_mut() {
            painter(frame);
            return;
        }
        if self.driver.is_connected() {
            self.driver.paint(frame);
        }
    }

    fn fade(&mut self, stay_faded: bool) {
        let steps = self.config.fade_steps.max(1);
        for step in 1..=steps {
            self.fader.set_opacity(step as f32 / steps as f32);
            self.repaint();
            thread::sleep(self.config.fade_interval);
        }
        if !stay_faded {
            self.fader.set_opacity(0.0);
            self.needs_paint = true;
        }
    }

    // -------------------------------------------------------------------------
    // Timers
    // -------------------------------------------------------------------------

    fn fire_due_timers(&mut self) {
        let now = Instant::now();
        while let Some((_, task)) = self.timers.pop_due(now) {
            match task {
                TimerTask::RevertPriority { page } => {
                    if let Some((_, priority)) = self.revert_timers.remove(&page) {
                        if let Some(p) = self.pages.iter_mut().find(|p| p.id() == page) {
                            debug!("reverting page {page} to {priority:?}");
                            p.set_priority(priority);
                            self.needs_paint = true;
                        }
                    }
                }
                TimerTask::DeletePage { page } => {
                    self.delete_timers.remove(&page);
                    self.delete_page(&page);
                }
                TimerTask::ScrollTick => {
                    self.scroll_scheduled = false;
                    self.tick_scroll();
                }
                TimerTask::ConnectionRetry => self.try_connect(),
                TimerTask::ControlSync { control_id } => self.push_control(&control_id),
            }
        }
    }

    fn tick_scroll(&mut self) {
        let Some(id) = self.visible.clone() else {
            return;
        };
        let Some(page) = self.pages.iter_mut().find(|p| p.id() == id) else {
            return;
        };
        if page.do_scroll() {
            self.content_cache.remove(&id);
            self.needs_paint = true;
        }
    }

    // -------------------------------------------------------------------------
    // Attention and connection
    // -------------------------------------------------------------------------

    fn request_attention(&mut self, message: Option<String>) {
        self.attention = true;
        self.attention_message = message.clone();
        for listener in &mut self.listeners {
            listener.attention_changed(true, message.as_deref());
        }
    }

    fn clear_attention(&mut self) {
        if !self.attention {
            return;
        }
        self.attention = false;
        self.attention_message = None;
        for listener in &mut self.listeners {
            listener.attention_changed(false, None);
        }
    }

    fn try_connect(&mut self) {
        if self.driver.is_connected() {
            return;
        }
        match self.driver.connect() {
            Ok(()) => {
                info!("driver {} connected", self.driver.name());
                self.retry_backoff = self.config.retry_initial;
                // Restore every control to its effective value, in case the
                // device forgot them during the outage.
                for control in self.driver.controls() {
                    let mut control = control;
                    if let Some(value) = self.controls.effective_value(&control.id) {
                        control.value = value;
                    }
                    self.driver.update_control(&control);
                }
                // The bank light is driven directly, not through the
                // registry, so re-assert it separately.
                let bank = self.memory_bank;
                self.set_memory_bank(bank);
                self.clear_attention();
                for listener in &mut self.listeners {
                    listener.driver_connected();
                }
                self.needs_paint = true;
            }
            Err(err) => {
                warn!(
                    "driver {} connection failed, retrying in {:?}: {err}",
                    self.driver.name(),
                    self.retry_backoff
                );
                let details = err.to_string();
                for listener in &mut self.listeners {
                    listener.connection_failed(&details);
                }
                self.request_attention(Some(details));
                self.timers
                    .schedule(self.retry_backoff, TimerTask::ConnectionRetry);
                self.retry_backoff = (self.retry_backoff * 2).min(self.config.retry_max);
            }
        }
    }

    // -------------------------------------------------------------------------
    // Controls and memory banks
    // -------------------------------------------------------------------------

    fn acquire_control(
        &mut self,
        control_id: &str,
        value: ControlValue,
        release_after: Option<Duration>,
    ) -> Result<Acquisition> {
        let control = self
            .driver
            .controls()
            .into_iter()
            .find(|c| c.id == control_id)
            .ok_or_else(|| ScreenError::Capability {
                details: format!("driver has no control {control_id}"),
            })?;
        let acquisition = self.controls.acquire(&control, value, release_after);
        self.push_control(control_id);
        if let Some(delay) = release_after {
            // One sync timer per acquisition, at its own deadline; the
            // margin guarantees the registry sees it as expired.
            self.timers.schedule(
                delay + Duration::from_millis(1),
                TimerTask::ControlSync {
                    control_id: control_id.to_string(),
                },
            );
        }
        Ok(acquisition)
    }

    /// Push a control's effective value to the hardware.
    fn push_control(&mut self, control_id: &str) {
        let Some(mut control) = self
            .driver
            .controls()
            .into_iter()
            .find(|c| c.id == control_id)
        else {
            return;
        };
        if let Some(value) = self.controls.effective_value(control_id) {
            control.value = value;
            self.driver.update_control(&control);
        }
    }

    // Notifies even when the bank is unchanged, so listeners can re-assert
    // device state.
    fn set_memory_bank(&mut self, bank: u8) {
        let bank = bank.min(3);
        self.memory_bank = bank;
        if let Some(mut control) = self.driver.control_for_hint(ControlHint::MKEYS) {
            control.value = ControlValue::Level(bank as u32);
            self.driver.update_control(&control);
        }
        for listener in &mut self.listeners {
            listener.memory_bank_changed(bank);
        }
    }
}
