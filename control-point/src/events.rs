//! Blocking iteration over device list changes
//!
//! [`DeviceListEvents`] is the receiving half of
//! [`channel_observer`](crate::channel_observer), for callers that prefer to
//! pull changes instead of implementing an observer.

use std::sync::{mpsc, Arc, Mutex};
use std::time::Duration;

use crate::device::UpnpDevice;

/// One change to a device list
#[derive(Debug, Clone)]
pub enum DeviceListEvent {
    /// The device's description was fetched and it joined the list
    Added(Arc<UpnpDevice>),
    /// The device with this UDN left the list
    Removed(String),
}

impl DeviceListEvent {
    pub fn udn(&self) -> &str {
        match self {
            DeviceListEvent::Added(device) => device.udn(),
            DeviceListEvent::Removed(udn) => udn,
        }
    }
}

/// Blocking iterator over device list events
///
/// `next()` blocks until an event arrives or every observer sending into the
/// channel has been dropped.
pub struct DeviceListEvents {
    rx: Arc<Mutex<mpsc::Receiver<DeviceListEvent>>>,
}

impl DeviceListEvents {
    pub(crate) fn new(rx: mpsc::Receiver<DeviceListEvent>) -> Self {
        Self {
            rx: Arc::new(Mutex::new(rx)),
        }
    }

    /// Block until an event is available
    ///
    /// Returns `None` once the observer is gone.
    pub fn recv(&self) -> Option<DeviceListEvent> {
        self.rx.lock().ok()?.recv().ok()
    }

    pub fn try_recv(&self) -> Option<DeviceListEvent> {
        self.rx.lock().ok()?.try_recv().ok()
    }

    /// Returns `None` if the timeout expires or the observer is gone.
    pub fn recv_timeout(&self, timeout: Duration) -> Option<DeviceListEvent> {
        self.rx.lock().ok()?.recv_timeout(timeout).ok()
    }

    /// Drain the events already queued without blocking.
    pub fn try_iter(&self) -> TryIter<'_> {
        TryIter { inner: self }
    }

    /// Iterate, waiting at most `timeout` for each event.
    pub fn timeout_iter(&self, timeout: Duration) -> TimeoutIter<'_> {
        TimeoutIter {
            inner: self,
            timeout,
        }
    }
}

impl Iterator for DeviceListEvents {
    type Item = DeviceListEvent;

    fn next(&mut self) -> Option<Self::Item> {
        self.recv()
    }
}

impl Clone for DeviceListEvents {
    fn clone(&self) -> Self {
        Self {
            rx: Arc::clone(&self.rx),
        }
    }
}

pub struct TryIter<'a> {
    inner: &'a DeviceListEvents,
}

impl<'a> Iterator for TryIter<'a> {
    type Item = DeviceListEvent;

    fn next(&mut self) -> Option<Self::Item> {
        self.inner.try_recv()
    }
}

pub struct TimeoutIter<'a> {
    inner: &'a DeviceListEvents,
    timeout: Duration,
}

impl<'a> Iterator for TimeoutIter<'a> {
    type Item = DeviceListEvent;

    fn next(&mut self) -> Option<Self::Item> {
        self.inner.recv_timeout(self.timeout)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn removed(udn: &str) -> DeviceListEvent {
        DeviceListEvent::Removed(udn.to_string())
    }

    #[test]
    fn test_try_iter_drains_queued_events() {
        let (tx, rx) = mpsc::channel();
        let events = DeviceListEvents::new(rx);

        tx.send(removed("u1")).unwrap();
        tx.send(removed("u2")).unwrap();

        let udns: Vec<String> = events.try_iter().map(|e| e.udn().to_string()).collect();
        assert_eq!(udns, vec!["u1", "u2"]);
        assert!(events.try_recv().is_none());
    }

    #[test]
    fn test_recv_timeout_empty() {
        let (_tx, rx) = mpsc::channel::<DeviceListEvent>();
        let events = DeviceListEvents::new(rx);

        let start = std::time::Instant::now();
        assert!(events.recv_timeout(Duration::from_millis(50)).is_none());
        assert!(start.elapsed() >= Duration::from_millis(45));
    }

    #[test]
    fn test_iteration_ends_when_sender_dropped() {
        let (tx, rx) = mpsc::channel();
        let events = DeviceListEvents::new(rx);
        tx.send(removed("u1")).unwrap();
        drop(tx);

        let collected: Vec<_> = events.collect();
        assert_eq!(collected.len(), 1);
    }

    #[test]
    fn test_clones_share_one_queue() {
        let (tx, rx) = mpsc::channel();
        let first = DeviceListEvents::new(rx);
        let second = first.clone();

        tx.send(removed("u1")).unwrap();
        assert_eq!(second.try_recv().map(|e| e.udn().to_string()), Some("u1".into()));
        assert!(first.try_recv().is_none());
    }
}
