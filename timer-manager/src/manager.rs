//! The scheduler and its worker thread.

use std::collections::{BTreeMap, HashMap};
use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex, MutexGuard};

use crate::timer::Timer;
use crate::TimerId;

pub(crate) type Callback = Arc<dyn Fn() + Send + Sync>;

/// How an arm request treats a timer that is already armed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ArmMode {
    /// Replace the armed deadline with the new one
    Replace,
    /// Only move an armed deadline earlier
    NoLaterThan,
}

#[derive(Default)]
struct Queue {
    pending: BTreeMap<(u64, u64), TimerId>,
    armed: HashMap<TimerId, (u64, u64)>,
    callbacks: HashMap<TimerId, Callback>,
    next_seq: u64,
    stopped: bool,
}

impl Queue {
    fn disarm(&mut self, id: TimerId) -> bool {
        match self.armed.remove(&id) {
            Some(key) => {
                self.pending.remove(&key);
                true
            }
            None => false,
        }
    }

    fn head_deadline(&self) -> Option<u64> {
        self.pending.keys().next().map(|(deadline, _)| *deadline)
    }

    /// Pop the earliest timer if it is due, returning its callback.
    fn pop_due(&mut self, now: u64) -> Option<(TimerId, Option<Callback>)> {
        let (&key, &id) = self.pending.iter().next()?;
        if key.0 > now {
            return None;
        }
        self.pending.remove(&key);
        self.armed.remove(&id);
        Some((id, self.callbacks.get(&id).cloned()))
    }
}

pub(crate) struct Shared {
    epoch: Instant,
    queue: Mutex<Queue>,
    wakeup: Condvar,
    callback_lock: Mutex<()>,
    next_id: AtomicU64,
}

impl Shared {
    pub(crate) fn now_ms(&self) -> u64 {
        self.epoch.elapsed().as_millis() as u64
    }

    pub(crate) fn arm(&self, id: TimerId, at: u64, mode: ArmMode) {
        let mut queue = self.queue.lock();
        if queue.stopped || !queue.callbacks.contains_key(&id) {
            return;
        }
        if mode == ArmMode::NoLaterThan {
            if let Some(&(current, _)) = queue.armed.get(&id) {
                if current <= at {
                    return;
                }
            }
        }
        queue.disarm(id);
        let seq = queue.next_seq;
        queue.next_seq += 1;
        queue.pending.insert((at, seq), id);
        queue.armed.insert(id, (at, seq));

        // Only a new head changes how long the worker should sleep
        if queue.pending.keys().next() == Some(&(at, seq)) {
            self.wakeup.notify_one();
        }
    }

    pub(crate) fn cancel(&self, id: TimerId) {
        let mut queue = self.queue.lock();
        if queue.disarm(id) {
            self.wakeup.notify_one();
        }
    }

    pub(crate) fn unregister(&self, id: TimerId) {
        let mut queue = self.queue.lock();
        queue.disarm(id);
        queue.callbacks.remove(&id);
    }

    pub(crate) fn deadline(&self, id: TimerId) -> Option<u64> {
        self.queue.lock().armed.get(&id).map(|(deadline, _)| *deadline)
    }

    fn register(&self, callback: Callback) -> TimerId {
        let id = TimerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.queue.lock().callbacks.insert(id, callback);
        id
    }
}

/// Process-wide sorted-deadline scheduler.
///
/// Owns one worker thread. Timers created through [`TimerManager::timer`] are
/// fired in deadline order; callbacks never run concurrently with each other.
pub struct TimerManager {
    shared: Arc<Shared>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl TimerManager {
    /// Create a manager and start its worker thread.
    pub fn new() -> io::Result<Arc<Self>> {
        let shared = Arc::new(Shared {
            epoch: Instant::now(),
            queue: Mutex::new(Queue::default()),
            wakeup: Condvar::new(),
            callback_lock: Mutex::new(()),
            next_id: AtomicU64::new(1),
        });

        let worker_shared = Arc::clone(&shared);
        let worker = thread::Builder::new()
            .name("timer-manager".to_string())
            .spawn(move || run(worker_shared))?;

        tracing::debug!("Timer manager started");

        Ok(Arc::new(Self {
            shared,
            worker: Mutex::new(Some(worker)),
        }))
    }

    /// Milliseconds elapsed since this manager was created.
    ///
    /// All absolute deadlines passed to [`Timer::fire_at`] use this clock.
    pub fn now_ms(&self) -> u64 {
        self.shared.now_ms()
    }

    /// Register a new, unarmed timer that runs `callback` when it fires.
    pub fn timer<F>(&self, callback: F) -> Timer
    where
        F: Fn() + Send + Sync + 'static,
    {
        let id = self.shared.register(Arc::new(callback));
        Timer::new(id, Arc::downgrade(&self.shared))
    }

    /// Number of currently armed timers.
    pub fn armed_count(&self) -> usize {
        self.shared.queue.lock().armed.len()
    }

    /// Acquire the callback serialisation lock.
    ///
    /// While the guard is held no timer callback can start, and any callback
    /// that was running has returned.
    pub fn callback_lock(&self) -> MutexGuard<'_, ()> {
        self.shared.callback_lock.lock()
    }

    /// Stop the worker thread, discarding every armed timer without firing it.
    ///
    /// Idempotent. Timers armed after `stop` are ignored.
    pub fn stop(&self) {
        {
            let mut queue = self.shared.queue.lock();
            if queue.stopped {
                return;
            }
            queue.stopped = true;
            let discarded = queue.armed.len();
            queue.pending.clear();
            queue.armed.clear();
            self.shared.wakeup.notify_all();
            tracing::debug!("Timer manager stopping, {} armed timers discarded", discarded);
        }

        if let Some(handle) = self.worker.lock().take() {
            if handle.thread().id() == thread::current().id() {
                // Stopped from inside a callback; the loop exits on its own
                return;
            }
            if handle.join().is_err() {
                tracing::error!("Timer worker thread panicked");
            }
        }
    }
}

impl Drop for TimerManager {
    fn drop(&mut self) {
        self.stop();
    }
}

fn run(shared: Arc<Shared>) {
    let mut queue = shared.queue.lock();
    loop {
        if queue.stopped {
            break;
        }
        let now = shared.now_ms();
        match queue.head_deadline() {
            None => {
                shared.wakeup.wait(&mut queue);
            }
            Some(deadline) if deadline > now => {
                let _ = shared
                    .wakeup
                    .wait_for(&mut queue, Duration::from_millis(deadline - now));
            }
            Some(_) => {
                if let Some((id, Some(callback))) = queue.pop_due(now) {
                    MutexGuard::unlocked(&mut queue, || fire(&shared, id, &callback));
                }
            }
        }
    }
    tracing::debug!("Timer worker stopped");
}

fn fire(shared: &Shared, id: TimerId, callback: &Callback) {
    let _serial = shared.callback_lock.lock();
    if panic::catch_unwind(AssertUnwindSafe(|| callback())).is_err() {
        tracing::error!("Timer callback {:?} panicked; aborting", id);
        std::process::abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pop_due_respects_sequence_on_ties() {
        let mut queue = Queue::default();
        let a = TimerId(1);
        let b = TimerId(2);
        queue.callbacks.insert(a, Arc::new(|| {}));
        queue.callbacks.insert(b, Arc::new(|| {}));
        queue.pending.insert((10, 1), b);
        queue.armed.insert(b, (10, 1));
        queue.pending.insert((10, 0), a);
        queue.armed.insert(a, (10, 0));

        assert_eq!(queue.pop_due(5).map(|(id, _)| id), None);
        assert_eq!(queue.pop_due(10).map(|(id, _)| id), Some(a));
        assert_eq!(queue.pop_due(10).map(|(id, _)| id), Some(b));
        assert!(queue.armed.is_empty());
    }

    #[test]
    fn test_disarm_is_idempotent() {
        let mut queue = Queue::default();
        let id = TimerId(7);
        queue.pending.insert((3, 0), id);
        queue.armed.insert(id, (3, 0));

        assert!(queue.disarm(id));
        assert!(!queue.disarm(id));
        assert!(queue.pending.is_empty());
    }
}
