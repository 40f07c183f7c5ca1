//! Sorted-deadline timers
//!
//! A small scheduler used by the control point for every time-based
//! behaviour: device expiry, refresh cadence and retry passes.
//!
//! # Features
//!
//! - **One worker thread**: a single `TimerManager` owns one thread that sleeps
//!   until the earliest armed deadline
//! - **Strict ordering**: due timers fire in increasing deadline order, ties
//!   broken by arming order
//! - **Serialised callbacks**: at most one timer callback runs at a time, and
//!   never while the scheduling lock is held
//! - **Re-armable**: a `Timer` can be armed, re-armed, cancelled and reused
//!
//! # Quick Start
//!
//! ```rust
//! use std::sync::mpsc;
//! use std::time::Duration;
//! use timer_manager::TimerManager;
//!
//! let manager = TimerManager::new().unwrap();
//! let (tx, rx) = mpsc::channel();
//!
//! let timer = manager.timer(move || {
//!     let _ = tx.send("fired");
//! });
//! timer.fire_in(10);
//!
//! assert_eq!(rx.recv_timeout(Duration::from_secs(2)).unwrap(), "fired");
//! ```
//!
//! # Architecture
//!
//! ```text
//! TimerManager
//!     │
//!     ├── queue: Mutex<Queue>
//!     │       ├── pending: BTreeMap<(deadline, seq), TimerId>
//!     │       ├── armed:   HashMap<TimerId, (deadline, seq)>
//!     │       └── callbacks: HashMap<TimerId, Callback>
//!     │
//!     ├── callback_lock: Mutex<()>   (held while a callback runs)
//!     │
//!     └── worker thread "timer-manager"
//! ```
//!
//! Deadlines are absolute milliseconds since the manager was created; see
//! [`TimerManager::now_ms`].

mod manager;
mod timer;

pub use manager::TimerManager;
pub use timer::Timer;

/// Identifier of a timer registered with a [`TimerManager`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TimerId(u64);
