//! # Timer Scheduler
//!
//! Purpose: Hold the timer entries behind key expiration. The reactor polls
//! `ms_until_next` from its idle path and calls `fire_due`; firing removes
//! the entry from the collection before running its callback so a callback
//! can freely take other locks.
//!
//! TTL timers always use `remaining = 1`; periodic timers (negative or >1
//! remaining counts) re-arm themselves after each firing.

use hashbrown::HashMap;
use parking_lot::Mutex;

use lkv_common::time::now_ms;

/// Fired-timer action. Runs outside the scheduler lock.
pub type TimerCallback = Box<dyn FnMut() + Send>;

struct TimerEvent {
    id: u64,
    when_ms: u64,
    interval_ms: u64,
    /// Remaining firings; negative means unlimited.
    remaining: i32,
    callback: TimerCallback,
}

impl TimerEvent {
    fn can_fire(&self) -> bool {
        self.remaining != 0
    }

    fn consume(&mut self) {
        if self.remaining > 0 {
            self.remaining -= 1;
        }
    }
}

struct TimerInner {
    events: Vec<TimerEvent>,
    next_id: u64,
}

/// Unordered timer collection polled by the reactor.
pub struct TimerHolder {
    inner: Mutex<TimerInner>,
}

impl Default for TimerHolder {
    fn default() -> Self {
        Self::new()
    }
}

impl TimerHolder {
    pub fn new() -> Self {
        TimerHolder {
            inner: Mutex::new(TimerInner {
                events: Vec::new(),
                next_id: 1,
            }),
        }
    }

    /// Schedules a callback `interval_ms` from now; returns the timer id.
    pub fn schedule(
        &self,
        interval_ms: u64,
        remaining: i32,
        callback: TimerCallback,
    ) -> u64 {
        let mut inner = self.inner.lock();
        let id = inner.next_id;
        inner.next_id += 1;
        inner.events.push(TimerEvent {
            id,
            when_ms: now_ms() + interval_ms,
            interval_ms,
            remaining,
            callback,
        });
        id
    }

    /// Re-arms an existing timer relative to now.
    pub fn update(&self, id: u64, interval_ms: u64, remaining: i32) -> bool {
        let mut inner = self.inner.lock();
        match inner.events.iter_mut().find(|e| e.id == id) {
            Some(event) => {
                event.when_ms = now_ms() + interval_ms;
                event.interval_ms = interval_ms;
                event.remaining = remaining;
                true
            }
            None => false,
        }
    }

    /// Cancels a timer; false when the id is unknown.
    pub fn cancel(&self, id: u64) -> bool {
        let mut inner = self.inner.lock();
        let before = inner.events.len();
        inner.events.retain(|e| e.id != id);
        inner.events.len() != before
    }

    /// Absolute fire instant of a timer, for TTL queries.
    pub fn fire_at(&self, id: u64) -> Option<u64> {
        let inner = self.inner.lock();
        inner.events.iter().find(|e| e.id == id).map(|e| e.when_ms)
    }

    /// Milliseconds until the nearest timer, if any.
    pub fn ms_until_next(&self) -> Option<u64> {
        let inner = self.inner.lock();
        let now = now_ms();
        inner
            .events
            .iter()
            .filter(|e| e.can_fire())
            .map(|e| e.when_ms.saturating_sub(now))
            .min()
    }

    /// Runs every due callback; returns how many fired.
    ///
    /// Due entries are detached under the lock and invoked after it is
    /// released, so callbacks may take bucket or TTL locks. Entries with
    /// firings left are re-armed afterwards.
    pub fn fire_due(&self) -> usize {
        let now = now_ms();
        let mut due = Vec::new();
        {
            let mut inner = self.inner.lock();
            let mut idx = 0;
            while idx < inner.events.len() {
                if inner.events[idx].can_fire() && inner.events[idx].when_ms <= now {
                    due.push(inner.events.swap_remove(idx));
                } else {
                    idx += 1;
                }
            }
        }
        let fired = due.len();
        for event in &mut due {
            (event.callback)();
            event.consume();
        }
        let survivors: Vec<TimerEvent> = due
            .into_iter()
            .filter(|e| e.can_fire())
            .map(|mut e| {
                e.when_ms = now + e.interval_ms;
                e
            })
            .collect();
        if !survivors.is_empty() {
            let mut inner = self.inner.lock();
            inner.events.extend(survivors);
        }
        fired
    }

    pub fn len(&self) -> usize {
        self.inner.lock().events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Process-wide key → timer-id table behind `expire`/`ttl`.
///
/// Entry lifecycle: inserted when an expiry is scheduled, replaced when the
/// expiry is updated, and erased either by the firing callback (together
/// with the key) or by a TTL removal.
#[derive(Default)]
pub struct TtlTable {
    inner: Mutex<HashMap<Vec<u8>, u64>>,
}

impl TtlTable {
    pub fn new() -> Self {
        TtlTable::default()
    }

    pub fn set(&self, key: &[u8], timer_id: u64) {
        self.inner.lock().insert(key.to_vec(), timer_id);
    }

    pub fn timer_of(&self, key: &[u8]) -> Option<u64> {
        self.inner.lock().get(key).copied()
    }

    pub fn remove(&self, key: &[u8]) -> Option<u64> {
        self.inner.lock().remove(key)
    }

    pub fn contains(&self, key: &[u8]) -> bool {
        self.inner.lock().contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    fn counter_callback(counter: &Arc<AtomicUsize>) -> TimerCallback {
        let counter = Arc::clone(counter);
        Box::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        })
    }

    #[test]
    fn one_shot_timer_fires_once_and_leaves() {
        let timers = TimerHolder::new();
        let hits = Arc::new(AtomicUsize::new(0));
        timers.schedule(0, 1, counter_callback(&hits));
        assert_eq!(timers.fire_due(), 1);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert!(timers.is_empty());
        assert_eq!(timers.fire_due(), 0);
    }

    #[test]
    fn future_timer_does_not_fire_early() {
        let timers = TimerHolder::new();
        let hits = Arc::new(AtomicUsize::new(0));
        timers.schedule(60_000, 1, counter_callback(&hits));
        assert_eq!(timers.fire_due(), 0);
        assert_eq!(hits.load(Ordering::SeqCst), 0);
        let wait = timers.ms_until_next().unwrap();
        assert!(wait > 0 && wait <= 60_000);
    }

    #[test]
    fn periodic_timer_rearms() {
        let timers = TimerHolder::new();
        let hits = Arc::new(AtomicUsize::new(0));
        timers.schedule(1, 3, counter_callback(&hits));
        for _ in 0..3 {
            std::thread::sleep(Duration::from_millis(3));
            timers.fire_due();
        }
        assert_eq!(hits.load(Ordering::SeqCst), 3);
        assert!(timers.is_empty());
    }

    #[test]
    fn cancel_and_update() {
        let timers = TimerHolder::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let id = timers.schedule(50_000, 1, counter_callback(&hits));
        assert!(timers.fire_at(id).is_some());
        assert!(timers.update(id, 0, 1));
        assert_eq!(timers.fire_due(), 1);
        assert_eq!(hits.load(Ordering::SeqCst), 1);

        let id2 = timers.schedule(50_000, 1, counter_callback(&hits));
        assert!(timers.cancel(id2));
        assert!(!timers.cancel(id2));
        assert!(timers.fire_at(id2).is_none());
    }

    #[test]
    fn ttl_table_tracks_keys() {
        let ttl = TtlTable::new();
        ttl.set(b"k", 7);
        assert!(ttl.contains(b"k"));
        assert_eq!(ttl.timer_of(b"k"), Some(7));
        ttl.set(b"k", 9);
        assert_eq!(ttl.timer_of(b"k"), Some(9));
        assert_eq!(ttl.remove(b"k"), Some(9));
        assert!(ttl.is_empty());
    }
}
