//! Deadline queue for the screen actor.
//!
//! The actor thread blocks on its command channel with a timeout derived
//! from the earliest deadline here, so timers fire on the same thread that
//! owns all screen state and cancellation is just removing an entry.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};
use std::time::{Duration, Instant};

/// Handle for cancelling a scheduled task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerId(u64);

/// Pending tasks ordered by deadline.
///
/// Cancellation removes the payload; the heap entry stays behind and is
/// skipped lazily when it surfaces.
pub struct TimerQueue<T> {
    heap: BinaryHeap<Reverse<(Instant, u64)>>,
    payloads: HashMap<u64, T>,
    next_id: u64,
}

impl<T> Default for TimerQueue<T> {
    fn default() -> Self {
        Self {
            heap: BinaryHeap::new(),
            payloads: HashMap::new(),
            next_id: 0,
        }
    }
}

impl<T> TimerQueue<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Schedule a task to run after `delay`.
    pub fn schedule(&mut self, delay: Duration, payload: T) -> TimerId {
        self.schedule_at(Instant::now() + delay, payload)
    }

    pub fn schedule_at(&mut self, deadline: Instant, payload: T) -> TimerId {
        let id = self.next_id;
        self.next_id += 1;
        self.heap.push(Reverse((deadline, id)));
        self.payloads.insert(id, payload);
        TimerId(id)
    }

    /// Cancel a scheduled task. Returns false if it already fired or was
    /// already cancelled.
    pub fn cancel(&mut self, id: TimerId) -> bool {
        self.payloads.remove(&id.0).is_some()
    }

    /// Earliest live deadline, for deriving the channel recv timeout.
    pub fn next_deadline(&mut self) -> Option<Instant> {
        while let Some(Reverse((deadline, id))) = self.heap.peek().copied() {
            if self.payloads.contains_key(&id) {
                return Some(deadline);
            }
            self.heap.pop();
        }
        None
    }

    /// Pop the next task whose deadline has passed.
    pub fn pop_due(&mut self, now: Instant) -> Option<(TimerId, T)> {
        while let Some(Reverse((deadline, id))) = self.heap.peek().copied() {
            if !self.payloads.contains_key(&id) {
                self.heap.pop();
                continue;
            }
            if deadline > now {
                return None;
            }
            self.heap.pop();
            let payload = self.payloads.remove(&id)?;
            return Some((TimerId(id), payload));
        }
        None
    }

    pub fn is_empty(&self) -> bool {
        self.payloads.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fires_in_deadline_order() {
        let mut q = TimerQueue::new();
        let now = Instant::now();
        q.schedule_at(now + Duration::from_millis(20), "b");
        q.schedule_at(now + Duration::from_millis(10), "a");

        let later = now + Duration::from_millis(30);
        assert_eq!(q.pop_due(later).unwrap().1, "a");
        assert_eq!(q.pop_due(later).unwrap().1, "b");
        assert!(q.pop_due(later).is_none());
        assert!(q.is_empty());
    }

    #[test]
    fn test_not_due_yet() {
        let mut q = TimerQueue::new();
        let now = Instant::now();
        q.schedule_at(now + Duration::from_secs(60), "later");
        assert!(q.pop_due(now).is_none());
        assert_eq!(q.next_deadline(), Some(now + Duration::from_secs(60)));
    }

    #[test]
    fn test_cancelled_task_never_fires() {
        let mut q = TimerQueue::new();
        let now = Instant::now();
        let id = q.schedule_at(now, "x");
        assert!(q.cancel(id));
        assert!(!q.cancel(id));
        assert!(q.pop_due(now + Duration::from_secs(1)).is_none());
        assert!(q.next_deadline().is_none());
        assert!(q.is_empty());
    }

    #[test]
    fn test_cancelled_entry_does_not_mask_later_ones() {
        let mut q = TimerQueue::new();
        let now = Instant::now();
        let first = q.schedule_at(now + Duration::from_millis(1), "a");
        q.schedule_at(now + Duration::from_millis(2), "b");
        q.cancel(first);
        assert_eq!(
            q.next_deadline(),
            Some(now + Duration::from_millis(2))
        );
        assert_eq!(q.pop_due(now + Duration::from_secs(1)).unwrap().1, "b");
    }
}
