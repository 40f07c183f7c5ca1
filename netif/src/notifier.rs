//! Background serializer for adapter-change notifications.

use std::sync::mpsc::Receiver;
use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle};

use crate::error::{NetifError, Result};
use crate::list::ListInner;
use crate::NetworkAdapter;

/// One queued change, delivered to listeners in FIFO order.
#[derive(Debug, Clone)]
pub(crate) enum AdapterUpdate {
    CurrentChanged,
    SubnetsChanged,
    Added(Arc<NetworkAdapter>),
    Removed(Arc<NetworkAdapter>),
    Changed(Arc<NetworkAdapter>),
}

/// Owns the `netif-notifier` thread.
///
/// The thread drains the update queue one entry at a time. Updates still
/// queued when the list shuts down are discarded.
pub(crate) struct ChangeNotifier {
    handle: Option<JoinHandle<()>>,
}

impl ChangeNotifier {
    pub(crate) fn spawn(list: Weak<ListInner>, updates: Receiver<AdapterUpdate>) -> Result<Self> {
        let handle = thread::Builder::new()
            .name("netif-notifier".to_string())
            .spawn(move || run(list, updates))
            .map_err(|source| NetifError::ThreadSpawn {
                name: "netif-notifier",
                source,
            })?;
        Ok(Self {
            handle: Some(handle),
        })
    }

    /// Wait for the thread to exit. The update sender must already be gone.
    pub(crate) fn join(&mut self) {
        if let Some(handle) = self.handle.take() {
            if handle.thread().id() == thread::current().id() {
                return;
            }
            if handle.join().is_err() {
                tracing::error!("Adapter change notifier panicked");
            }
        }
    }
}

fn run(list: Weak<ListInner>, updates: Receiver<AdapterUpdate>) {
    while let Ok(update) = updates.recv() {
        let Some(list) = list.upgrade() else {
            break;
        };
        if list.is_shutting_down() {
            break;
        }
        if let Err(e) = list.dispatch(&update) {
            tracing::error!("Adapter change notification failed: {}", e);
        }
    }
    tracing::debug!("Adapter change notifier stopped");
}
