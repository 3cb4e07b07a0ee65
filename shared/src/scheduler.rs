//! Cancellable one-shot timers keyed on simulation time.
//!
//! Every delayed effect in the race (re-enabling movement, ending a boost,
//! hiding an item) is registered here instead of being captured by a free
//! running task, so a restart can drop all of them at once and an effect that
//! was superseded can be cancelled by id.

use std::time::Duration;

pub type TimerId = u64;

#[derive(Debug)]
struct Entry<E> {
    id: TimerId,
    deadline: Duration,
    event: E,
}

#[derive(Debug)]
pub struct TimerScheduler<E> {
    entries: Vec<Entry<E>>,
    next_id: TimerId,
}

impl<E> TimerScheduler<E> {
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
            next_id: 1,
        }
    }

    pub fn schedule(&mut self, deadline: Duration, event: E) -> TimerId {
        let id = self.next_id;
        self.next_id += 1;
        self.entries.push(Entry {
            id,
            deadline,
            event,
        });
        id
    }

    /// Returns false when the timer already fired or was never registered.
    pub fn cancel(&mut self, id: TimerId) -> bool {
        let before = self.entries.len();
        self.entries.retain(|entry| entry.id != id);
        self.entries.len() != before
    }

    /// Removes and returns every event whose deadline is at or before `now`,
    /// ordered by deadline and then by registration order.
    pub fn drain_due(&mut self, now: Duration) -> Vec<E> {
        let mut due = Vec::new();
        let mut index = 0;
        while index < self.entries.len() {
            if self.entries[index].deadline <= now {
                due.push(self.entries.swap_remove(index));
            } else {
                index += 1;
            }
        }
        due.sort_by(|a, b| a.deadline.cmp(&b.deadline).then(a.id.cmp(&b.id)));
        due.into_iter().map(|entry| entry.event).collect()
    }

    pub fn next_deadline(&self) -> Option<Duration> {
        self.entries.iter().map(|entry| entry.deadline).min()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

impl<E> Default for TimerScheduler<E> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn secs(s: f32) -> Duration {
        Duration::from_secs_f32(s)
    }

    #[test]
    fn test_drains_in_deadline_order() {
        let mut timers = TimerScheduler::new();
        timers.schedule(secs(3.0), "c");
        timers.schedule(secs(1.0), "a");
        timers.schedule(secs(2.0), "b");
        timers.schedule(secs(10.0), "late");

        assert_eq!(timers.drain_due(secs(5.0)), vec!["a", "b", "c"]);
        assert_eq!(timers.len(), 1);
        assert_eq!(timers.next_deadline(), Some(secs(10.0)));
    }

    #[test]
    fn test_equal_deadlines_keep_registration_order() {
        let mut timers = TimerScheduler::new();
        for name in ["first", "second", "third"] {
            timers.schedule(secs(1.0), name);
        }
        assert_eq!(timers.drain_due(secs(1.0)), vec!["first", "second", "third"]);
    }

    #[test]
    fn test_cancel() {
        let mut timers = TimerScheduler::new();
        let keep = timers.schedule(secs(1.0), 1);
        let drop = timers.schedule(secs(1.0), 2);

        assert!(timers.cancel(drop));
        assert!(!timers.cancel(drop));
        assert_eq!(timers.drain_due(secs(2.0)), vec![1]);
        assert!(!timers.cancel(keep));
    }

    #[test]
    fn test_nothing_due_before_deadline() {
        let mut timers = TimerScheduler::new();
        timers.schedule(secs(1.0), ());
        assert!(timers.drain_due(secs(0.5)).is_empty());
        assert!(!timers.is_empty());
        timers.clear();
        assert!(timers.is_empty());
    }
}
