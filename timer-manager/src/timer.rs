//! Handle to a single registered timer.

use std::sync::Weak;

use crate::manager::{ArmMode, Shared};
use crate::TimerId;

/// A re-armable timer owned by the component that created it.
///
/// A timer fires at most once per arm. Dropping the handle cancels it and
/// unregisters its callback. Neither `cancel` nor drop waits for a callback
/// the worker has already started; callbacks that must not act after
/// cancellation should hold only a `Weak` to their state.
pub struct Timer {
    id: TimerId,
    shared: Weak<Shared>,
}

impl Timer {
    pub(crate) fn new(id: TimerId, shared: Weak<Shared>) -> Self {
        Self { id, shared }
    }

    /// The identifier of this timer.
    pub fn id(&self) -> TimerId {
        self.id
    }

    /// Arm the timer to fire `ms` milliseconds from now.
    pub fn fire_in(&self, ms: u64) {
        if let Some(shared) = self.shared.upgrade() {
            let at = shared.now_ms().saturating_add(ms);
            shared.arm(self.id, at, ArmMode::Replace);
        }
    }

    /// Arm the timer to fire at the absolute time `at`, replacing any deadline
    /// it is currently armed with.
    pub fn fire_at(&self, at: u64) {
        if let Some(shared) = self.shared.upgrade() {
            shared.arm(self.id, at, ArmMode::Replace);
        }
    }

    /// Arm the timer to fire no later than `at`.
    ///
    /// An idle timer is armed at `at`. An armed timer is only moved if `at` is
    /// earlier than its current deadline.
    pub fn fire_no_later_than(&self, at: u64) {
        if let Some(shared) = self.shared.upgrade() {
            shared.arm(self.id, at, ArmMode::NoLaterThan);
        }
    }

    /// Remove the timer from the schedule without firing it. Idempotent.
    ///
    /// A callback already running when this is called still completes.
    pub fn cancel(&self) {
        if let Some(shared) = self.shared.upgrade() {
            shared.cancel(self.id);
        }
    }

    /// Whether the timer is currently waiting to fire.
    pub fn is_armed(&self) -> bool {
        self.deadline().is_some()
    }

    /// The absolute deadline the timer is armed with, if any.
    pub fn deadline(&self) -> Option<u64> {
        self.shared.upgrade()?.deadline(self.id)
    }
}

impl std::fmt::Debug for Timer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Timer")
            .field("id", &self.id)
            .field("deadline", &self.deadline())
            .finish()
    }
}

impl Drop for Timer {
    fn drop(&mut self) {
        if let Some(shared) = self.shared.upgrade() {
            shared.unregister(self.id);
        }
    }
}
