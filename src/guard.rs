//! Re-entrancy guard, debouncing and child-update batching.
//!
//! Script invocations can trigger capability calls that schedule further
//! invocations of the same script. The guard breaks that cycle per key. The
//! debouncer and batcher are deadline-driven and hold no threads or timers;
//! the embedding runtime's scheduler calls `fire_due`/`flush_due` with its
//! own clock, which keeps tests deterministic.

use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::rc::Rc;
use std::time::{Duration, Instant};

/// Per-key re-entrancy lock.
#[derive(Default)]
pub struct ExecutionGuard {
    in_flight: Rc<RefCell<HashSet<String>>>,
}

impl ExecutionGuard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `op` unless an invocation for `key` is already in flight, in which
    /// case the call is skipped and `None` returned. The key is released when
    /// `op` finishes, unwinding included.
    pub fn run<T>(&self, key: &str, op: impl FnOnce() -> T) -> Option<T> {
        if !self.in_flight.borrow_mut().insert(key.to_string()) {
            log::debug!("execution guard: {} already in flight, skipping", key);
            return None;
        }
        let _release = Release {
            in_flight: Rc::clone(&self.in_flight),
            key: key.to_string(),
        };
        Some(op())
    }

    pub fn is_busy(&self, key: &str) -> bool {
        self.in_flight.borrow().contains(key)
    }
}

struct Release {
    in_flight: Rc<RefCell<HashSet<String>>>,
    key: String,
}

impl Drop for Release {
    fn drop(&mut self) {
        self.in_flight.borrow_mut().remove(&self.key);
    }
}

type Callback = Box<dyn FnOnce()>;

/// Trailing-edge debouncer over keyed callbacks.
#[derive(Default)]
pub struct Debouncer {
    pending: HashMap<String, (Instant, Callback)>,
}

impl Debouncer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue `callback` to fire `delay` after `now`. A pending callback for
    /// the same key is replaced and its old deadline discarded.
    pub fn schedule(
        &mut self,
        key: &str,
        now: Instant,
        delay: Duration,
        callback: impl FnOnce() + 'static,
    ) {
        self.pending
            .insert(key.to_string(), (now + delay, Box::new(callback)));
    }

    pub fn cancel(&mut self, key: &str) {
        self.pending.remove(key);
    }

    /// Run every callback whose deadline has passed; returns how many fired.
    pub fn fire_due(&mut self, now: Instant) -> usize {
        let due: Vec<String> = self
            .pending
            .iter()
            .filter(|(_, (deadline, _))| *deadline <= now)
            .map(|(key, _)| key.clone())
            .collect();
        let count = due.len();
        for key in due {
            if let Some((_, callback)) = self.pending.remove(&key) {
                callback();
            }
        }
        count
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }
}

/// Coalesces bursts of child-component updates into one deduplicated batch,
/// released after a quiet period with no further enqueues.
pub struct ChildBatch {
    ids: Vec<String>,
    last_enqueue: Option<Instant>,
    quiet: Duration,
}

impl ChildBatch {
    pub fn new(quiet: Duration) -> Self {
        ChildBatch {
            ids: vec![],
            last_enqueue: None,
            quiet,
        }
    }

    pub fn enqueue(&mut self, ids: impl IntoIterator<Item = String>, now: Instant) {
        for id in ids {
            if !self.ids.contains(&id) {
                self.ids.push(id);
            }
        }
        self.last_enqueue = Some(now);
    }

    /// The accumulated batch, once the quiet period has elapsed since the
    /// last enqueue. `None` while the batch is still settling or empty.
    pub fn flush_due(&mut self, now: Instant) -> Option<Vec<String>> {
        let last = self.last_enqueue?;
        if self.ids.is_empty() || now.duration_since(last) < self.quiet {
            return None;
        }
        self.last_enqueue = None;
        Some(std::mem::take(&mut self.ids))
    }

    pub fn pending_len(&self) -> usize {
        self.ids.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn guard_skips_reentrant_calls() {
        let guard = ExecutionGuard::new();
        let outcome = guard.run("comp-1", || {
            assert!(guard.is_busy("comp-1"));
            // A capability call re-triggering the same script is a no-op.
            assert!(guard.run("comp-1", || 1).is_none());
            // A different key still runs.
            assert_eq!(guard.run("comp-2", || 2), Some(2));
            "done"
        });
        assert_eq!(outcome, Some("done"));
        assert!(!guard.is_busy("comp-1"));
    }

    #[test]
    fn guard_releases_on_unwind() {
        let guard = ExecutionGuard::new();
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            guard.run("comp-1", || panic!("boom"));
        }));
        assert!(result.is_err());
        assert!(!guard.is_busy("comp-1"));
    }

    #[test]
    fn debounce_replaces_pending_callback() {
        let fired = Rc::new(RefCell::new(vec![]));
        let mut debouncer = Debouncer::new();
        let t0 = Instant::now();

        let log = Rc::clone(&fired);
        debouncer.schedule("save", t0, Duration::from_millis(100), move || {
            log.borrow_mut().push("first")
        });
        let log = Rc::clone(&fired);
        debouncer.schedule("save", t0 + Duration::from_millis(50), Duration::from_millis(100), move || {
            log.borrow_mut().push("second")
        });

        assert_eq!(debouncer.fire_due(t0 + Duration::from_millis(120)), 0);
        assert_eq!(debouncer.fire_due(t0 + Duration::from_millis(160)), 1);
        assert_eq!(*fired.borrow(), vec!["second"]);
        assert_eq!(debouncer.pending_len(), 0);
    }

    #[test]
    fn batch_coalesces_and_dedups() {
        let mut batch = ChildBatch::new(Duration::from_millis(50));
        let t0 = Instant::now();
        batch.enqueue(vec!["a".to_string(), "b".to_string()], t0);
        batch.enqueue(
            vec!["b".to_string(), "c".to_string()],
            t0 + Duration::from_millis(20),
        );

        // Still settling.
        assert!(batch.flush_due(t0 + Duration::from_millis(40)).is_none());
        let flushed = batch
            .flush_due(t0 + Duration::from_millis(80))
            .expect("quiet period elapsed");
        assert_eq!(flushed, vec!["a", "b", "c"]);
        assert!(batch.flush_due(t0 + Duration::from_millis(200)).is_none());
    }
}
