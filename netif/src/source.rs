//! OS adapter enumeration.

use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use get_if_addrs::IfAddr;
use parking_lot::Mutex;

use crate::error::{NetifError, Result};
use crate::NetworkAdapter;

/// Callback invoked when the OS interface list may have changed.
pub type ChangeObserver = Box<dyn Fn() + Send + Sync>;

/// Source of adapter snapshots and interface-change signals.
///
/// The adapter list holds exactly one observer at a time. Setting `None`
/// must not return while the previous observer is still running.
pub trait AdapterSource: Send + Sync {
    fn list_adapters(&self) -> Result<Vec<NetworkAdapter>>;

    fn set_change_observer(&self, observer: Option<ChangeObserver>) -> Result<()>;
}

/// Which loopback interfaces an enumeration reports.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LoopbackPolicy {
    /// Skip loopback interfaces
    #[default]
    Exclude,
    /// Report loopback interfaces alongside the others
    Permit,
    /// Report only loopback interfaces
    Only,
}

impl LoopbackPolicy {
    fn admits(self, adapter: &NetworkAdapter) -> bool {
        match self {
            LoopbackPolicy::Exclude => !adapter.is_loopback(),
            LoopbackPolicy::Permit => true,
            LoopbackPolicy::Only => adapter.is_loopback(),
        }
    }
}

/// Enumerate IPv4 interfaces through the OS.
pub fn enumerate_adapters(loopback: LoopbackPolicy) -> Result<Vec<NetworkAdapter>> {
    let adapters = get_if_addrs::get_if_addrs()?
        .into_iter()
        .filter_map(|iface| match iface.addr {
            IfAddr::V4(addr) => Some(NetworkAdapter::new(iface.name, addr.ip, addr.netmask)),
            IfAddr::V6(_) => None,
        })
        .filter(|adapter| loopback.admits(adapter))
        .collect();
    Ok(adapters)
}

struct Watcher {
    stop: Sender<()>,
    handle: JoinHandle<()>,
}

/// [`AdapterSource`] backed by the operating system.
///
/// The OS offers no portable change signal, so a watcher thread re-enumerates
/// every `poll_interval` and calls the observer when the snapshot differs.
pub struct SystemAdapterSource {
    loopback: LoopbackPolicy,
    poll_interval: Duration,
    observer: Arc<Mutex<Option<ChangeObserver>>>,
    watcher: Mutex<Option<Watcher>>,
}

impl SystemAdapterSource {
    pub fn new(loopback: LoopbackPolicy, poll_interval: Duration) -> Self {
        Self {
            loopback,
            poll_interval,
            observer: Arc::new(Mutex::new(None)),
            watcher: Mutex::new(None),
        }
    }

    fn start_watcher(&self) -> Result<Watcher> {
        let (stop, stop_rx) = mpsc::channel::<()>();
        let observer = Arc::clone(&self.observer);
        let loopback = self.loopback;
        let interval = self.poll_interval;
        let mut last = enumerate_adapters(loopback).unwrap_or_default();

        let handle = thread::Builder::new()
            .name("netif-watcher".to_string())
            .spawn(move || loop {
                match stop_rx.recv_timeout(interval) {
                    Err(RecvTimeoutError::Timeout) => {}
                    _ => break,
                }
                let snapshot = match enumerate_adapters(loopback) {
                    Ok(snapshot) => snapshot,
                    Err(e) => {
                        tracing::warn!("Adapter enumeration failed: {}", e);
                        continue;
                    }
                };
                if snapshot != last {
                    tracing::debug!("Interface list changed ({} adapters)", snapshot.len());
                    last = snapshot;
                    if let Some(observer) = observer.lock().as_ref() {
                        observer();
                    }
                }
            })
            .map_err(|source| NetifError::ThreadSpawn {
                name: "netif-watcher",
                source,
            })?;

        Ok(Watcher { stop, handle })
    }

    fn stop_watcher(&self) {
        if let Some(watcher) = self.watcher.lock().take() {
            drop(watcher.stop);
            if watcher.handle.thread().id() != thread::current().id() {
                let _ = watcher.handle.join();
            }
        }
    }
}

impl Default for SystemAdapterSource {
    fn default() -> Self {
        Self::new(LoopbackPolicy::default(), Duration::from_secs(5))
    }
}

impl AdapterSource for SystemAdapterSource {
    fn list_adapters(&self) -> Result<Vec<NetworkAdapter>> {
        enumerate_adapters(self.loopback)
    }

    fn set_change_observer(&self, observer: Option<ChangeObserver>) -> Result<()> {
        let watching = observer.is_some();
        *self.observer.lock() = observer;

        if !watching {
            self.stop_watcher();
            return Ok(());
        }
        let mut slot = self.watcher.lock();
        if slot.is_none() {
            *slot = Some(self.start_watcher()?);
        }
        Ok(())
    }
}

impl Drop for SystemAdapterSource {
    fn drop(&mut self) {
        self.stop_watcher();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    fn adapters() -> Vec<NetworkAdapter> {
        vec![
            NetworkAdapter::new("lo", Ipv4Addr::LOCALHOST, Ipv4Addr::new(255, 0, 0, 0)),
            NetworkAdapter::new("eth0", Ipv4Addr::new(10, 0, 0, 1), Ipv4Addr::new(255, 255, 255, 0)),
        ]
    }

    #[test]
    fn test_loopback_policy_filters() {
        let names = |policy: LoopbackPolicy| -> Vec<String> {
            adapters()
                .into_iter()
                .filter(|a| policy.admits(a))
                .map(|a| a.name().to_string())
                .collect()
        };

        assert_eq!(names(LoopbackPolicy::Exclude), vec!["eth0"]);
        assert_eq!(names(LoopbackPolicy::Permit), vec!["lo", "eth0"]);
        assert_eq!(names(LoopbackPolicy::Only), vec!["lo"]);
    }

    #[test]
    fn test_clearing_observer_without_watcher_is_noop() {
        let source = SystemAdapterSource::default();
        assert!(source.set_change_observer(None).is_ok());
    }
}
