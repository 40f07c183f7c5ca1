//! The adapter list, its listeners and the subnet diff.

use std::collections::BTreeMap;
use std::fmt;
use std::net::Ipv4Addr;
use std::sync::mpsc::{self, Sender};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Condvar, Mutex};

use crate::error::{ListenerError, NetifError, Result};
use crate::notifier::{AdapterUpdate, ChangeNotifier};
use crate::source::AdapterSource;
use crate::NetworkAdapter;

/// Result returned by adapter-change listeners.
pub type ListenerResult = std::result::Result<(), ListenerError>;

type ChangeListener = Arc<dyn Fn() -> ListenerResult + Send + Sync>;
type AdapterListener = Arc<dyn Fn(&NetworkAdapter) -> ListenerResult + Send + Sync>;

/// Handle returned when a listener is registered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ListenerId(u64);

/// The five kinds of adapter-change notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListenerCategory {
    CurrentChanged,
    SubnetListChanged,
    AdapterAdded,
    AdapterRemoved,
    AdapterChanged,
}

impl fmt::Display for ListenerCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ListenerCategory::CurrentChanged => "current-changed",
            ListenerCategory::SubnetListChanged => "subnet-list-changed",
            ListenerCategory::AdapterAdded => "adapter-added",
            ListenerCategory::AdapterRemoved => "adapter-removed",
            ListenerCategory::AdapterChanged => "adapter-changed",
        };
        f.write_str(name)
    }
}

/// Backoff schedule for failing listener passes.
///
/// A pass is attempted once, then once more after each delay.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    delays: Vec<Duration>,
}

impl RetryPolicy {
    pub fn from_millis(delays: &[u64]) -> Self {
        Self {
            delays: delays.iter().copied().map(Duration::from_millis).collect(),
        }
    }

    /// Fail on the first listener error
    pub fn none() -> Self {
        Self { delays: Vec::new() }
    }

    pub fn delays(&self) -> &[Duration] {
        &self.delays
    }

    /// Total number of attempts a pass gets.
    pub fn attempts(&self) -> usize {
        self.delays.len() + 1
    }
}

impl Default for RetryPolicy {
    /// Roughly 90s of retries
    fn default() -> Self {
        Self::from_millis(&[100, 200, 400, 800, 1600, 3200, 5000, 10000, 20000, 20000, 30000])
    }
}

/// Outcome of comparing two one-per-subnet adapter lists.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubnetDiff {
    pub added: Vec<Arc<NetworkAdapter>>,
    pub removed: Vec<Arc<NetworkAdapter>>,
    /// Subnets present in both lists whose representative address moved; holds
    /// the new adapter
    pub changed: Vec<Arc<NetworkAdapter>>,
}

/// Merge-diff two subnet lists after sorting both by subnet.
pub fn diff_subnets(old: &[Arc<NetworkAdapter>], new: &[Arc<NetworkAdapter>]) -> SubnetDiff {
    let mut old = old.to_vec();
    let mut new = new.to_vec();
    old.sort_by_key(|adapter| adapter.subnet());
    new.sort_by_key(|adapter| adapter.subnet());

    let mut diff = SubnetDiff::default();
    let (mut i, mut j) = (0, 0);
    while i < old.len() && j < new.len() {
        match old[i].subnet().cmp(&new[j].subnet()) {
            std::cmp::Ordering::Less => {
                diff.removed.push(Arc::clone(&old[i]));
                i += 1;
            }
            std::cmp::Ordering::Greater => {
                diff.added.push(Arc::clone(&new[j]));
                j += 1;
            }
            std::cmp::Ordering::Equal => {
                if old[i].address() != new[j].address() {
                    diff.changed.push(Arc::clone(&new[j]));
                }
                i += 1;
                j += 1;
            }
        }
    }
    diff.removed.extend(old[i..].iter().cloned());
    diff.added.extend(new[j..].iter().cloned());
    diff
}

/// First adapter seen for each subnet, in enumeration order.
fn unique_subnets(adapters: &[Arc<NetworkAdapter>]) -> Vec<Arc<NetworkAdapter>> {
    let mut subnets: Vec<Arc<NetworkAdapter>> = Vec::new();
    for adapter in adapters {
        if !subnets.iter().any(|s| s.subnet() == adapter.subnet()) {
            subnets.push(Arc::clone(adapter));
        }
    }
    subnets
}

fn select_current(
    adapters: &[Arc<NetworkAdapter>],
    preferred: Option<Ipv4Addr>,
) -> Option<Arc<NetworkAdapter>> {
    let current = match preferred {
        Some(subnet) => adapters.iter().find(|a| a.subnet() == subnet),
        None => adapters.first(),
    };
    match current {
        Some(adapter) => tracing::debug!("Current adapter: {}", adapter),
        None => tracing::debug!("Current adapter: none active"),
    }
    current.cloned()
}

#[derive(Default)]
struct AdapterState {
    adapters: Vec<Arc<NetworkAdapter>>,
    subnets: Vec<Arc<NetworkAdapter>>,
    current: Option<Arc<NetworkAdapter>>,
    preferred_subnet: Option<Ipv4Addr>,
}

#[derive(Default)]
struct Listeners {
    next_id: u64,
    current: BTreeMap<ListenerId, ChangeListener>,
    subnets: BTreeMap<ListenerId, ChangeListener>,
    added: BTreeMap<ListenerId, AdapterListener>,
    removed: BTreeMap<ListenerId, AdapterListener>,
    changed: BTreeMap<ListenerId, AdapterListener>,
}

impl Listeners {
    fn next_id(&mut self) -> ListenerId {
        self.next_id += 1;
        ListenerId(self.next_id)
    }
}

pub(crate) struct ListInner {
    source: Arc<dyn AdapterSource>,
    state: Mutex<AdapterState>,
    listeners: Mutex<Listeners>,
    retry: RetryPolicy,
    updates: Mutex<Option<Sender<AdapterUpdate>>>,
    shutdown: Mutex<bool>,
    shutdown_signal: Condvar,
}

impl ListInner {
    fn queue(&self, update: AdapterUpdate) {
        if let Some(sender) = self.updates.lock().as_ref() {
            let _ = sender.send(update);
        }
    }

    pub(crate) fn is_shutting_down(&self) -> bool {
        *self.shutdown.lock()
    }

    fn begin_shutdown(&self) {
        *self.shutdown.lock() = true;
        self.shutdown_signal.notify_all();
        self.updates.lock().take();
    }

    /// Sleep for `delay` unless shutdown starts first. Returns true on shutdown.
    fn backoff(&self, delay: Duration) -> bool {
        let mut shutdown = self.shutdown.lock();
        if !*shutdown {
            let _ = self.shutdown_signal.wait_for(&mut shutdown, delay);
        }
        *shutdown
    }

    fn handle_interface_list_changed(&self) -> Result<()> {
        let adapters: Vec<Arc<NetworkAdapter>> = self
            .source
            .list_adapters()?
            .into_iter()
            .map(Arc::new)
            .collect();
        let subnets = unique_subnets(&adapters);

        let (old_subnets, old_address, new_address) = {
            let mut state = self.state.lock();
            let old_address = state.current.as_ref().map(|a| a.address());
            state.current = select_current(&adapters, state.preferred_subnet);
            let new_address = state.current.as_ref().map(|a| a.address());
            state.adapters = adapters;
            let old_subnets = std::mem::replace(&mut state.subnets, subnets.clone());
            (old_subnets, old_address, new_address)
        };

        let subnets_changed = old_subnets.len() != subnets.len()
            || old_subnets
                .iter()
                .zip(&subnets)
                .any(|(old, new)| old.address() != new.address());
        let diff = diff_subnets(&old_subnets, &subnets);

        if subnets_changed {
            self.queue(AdapterUpdate::SubnetsChanged);
        } else if old_address != new_address {
            self.queue(AdapterUpdate::CurrentChanged);
        }
        for adapter in diff.removed {
            tracing::info!("Network adapter removed: {}", adapter);
            self.queue(AdapterUpdate::Removed(adapter));
        }
        for adapter in diff.added {
            tracing::info!("Network adapter added: {}", adapter);
            self.queue(AdapterUpdate::Added(adapter));
        }
        for adapter in diff.changed {
            tracing::info!("Network adapter changed: {}", adapter);
            self.queue(AdapterUpdate::Changed(adapter));
        }
        Ok(())
    }

    pub(crate) fn dispatch(&self, update: &AdapterUpdate) -> Result<()> {
        match update {
            AdapterUpdate::CurrentChanged => self.run_with_retry(ListenerCategory::CurrentChanged, |l| {
                l.current.values().try_for_each(|listener| listener())
            }),
            AdapterUpdate::SubnetsChanged => {
                self.run_with_retry(ListenerCategory::SubnetListChanged, |l| {
                    l.subnets.values().try_for_each(|listener| listener())
                })
            }
            AdapterUpdate::Added(adapter) => self.run_with_retry(ListenerCategory::AdapterAdded, |l| {
                l.added.values().try_for_each(|listener| listener(&**adapter))
            }),
            AdapterUpdate::Removed(adapter) => {
                self.run_with_retry(ListenerCategory::AdapterRemoved, |l| {
                    l.removed.values().try_for_each(|listener| listener(&**adapter))
                })
            }
            AdapterUpdate::Changed(adapter) => {
                self.run_with_retry(ListenerCategory::AdapterChanged, |l| {
                    l.changed.values().try_for_each(|listener| listener(&**adapter))
                })
            }
        }
    }

    /// Run every listener of one category under the listener lock, retrying the
    /// whole pass after each backoff delay while any listener fails.
    fn run_with_retry<F>(&self, category: ListenerCategory, pass: F) -> Result<()>
    where
        F: Fn(&Listeners) -> ListenerResult,
    {
        let mut last_error = match pass(&*self.listeners.lock()) {
            Ok(()) => return Ok(()),
            Err(e) => e,
        };
        for delay in self.retry.delays() {
            tracing::error!(
                "Error handling {} notification ({}), trying again in {:?}",
                category,
                last_error,
                delay
            );
            if self.backoff(*delay) {
                return Ok(());
            }
            last_error = match pass(&*self.listeners.lock()) {
                Ok(()) => return Ok(()),
                Err(e) => e,
            };
        }
        Err(NetifError::CallbackRetriesExhausted {
            category,
            attempts: self.retry.attempts(),
            last_error,
        })
    }
}

/// The set of network adapters and the current selection.
///
/// Dropping the list unregisters from the adapter source, then stops the
/// notifier thread; updates that were still queued are discarded.
pub struct NetworkAdapterList {
    inner: Arc<ListInner>,
    notifier: ChangeNotifier,
}

impl NetworkAdapterList {
    /// Take an initial snapshot from `source` and start the notifier thread.
    ///
    /// The current adapter is the first adapter on `preferred_subnet`; with no
    /// preference it is the first adapter enumerated.
    pub fn new(
        source: Arc<dyn AdapterSource>,
        preferred_subnet: Option<Ipv4Addr>,
        retry: RetryPolicy,
    ) -> Result<Self> {
        let adapters: Vec<Arc<NetworkAdapter>> =
            source.list_adapters()?.into_iter().map(Arc::new).collect();
        let subnets = unique_subnets(&adapters);
        for adapter in &subnets {
            tracing::info!("Network adapter added: {}", adapter);
        }
        let current = select_current(&adapters, preferred_subnet);

        let (sender, receiver) = mpsc::channel();
        let inner = Arc::new(ListInner {
            source: Arc::clone(&source),
            state: Mutex::new(AdapterState {
                adapters,
                subnets,
                current,
                preferred_subnet,
            }),
            listeners: Mutex::new(Listeners::default()),
            retry,
            updates: Mutex::new(Some(sender)),
            shutdown: Mutex::new(false),
            shutdown_signal: Condvar::new(),
        });

        let mut notifier = ChangeNotifier::spawn(Arc::downgrade(&inner), receiver)?;

        let weak = Arc::downgrade(&inner);
        let registered = source.set_change_observer(Some(Box::new(move || {
            if let Some(inner) = weak.upgrade() {
                if let Err(e) = inner.handle_interface_list_changed() {
                    tracing::warn!("Failed to refresh network adapters: {}", e);
                }
            }
        })));
        if let Err(e) = registered {
            inner.begin_shutdown();
            notifier.join();
            return Err(e);
        }

        Ok(Self { inner, notifier })
    }

    /// The adapter discovery binds to, if any.
    pub fn current_adapter(&self) -> Option<Arc<NetworkAdapter>> {
        self.inner.state.lock().current.clone()
    }

    /// Every enumerated adapter, in enumeration order.
    pub fn adapters(&self) -> Vec<Arc<NetworkAdapter>> {
        self.inner.state.lock().adapters.clone()
    }

    /// One representative adapter per subnet.
    pub fn subnets(&self) -> Vec<Arc<NetworkAdapter>> {
        self.inner.state.lock().subnets.clone()
    }

    pub fn preferred_subnet(&self) -> Option<Ipv4Addr> {
        self.inner.state.lock().preferred_subnet
    }

    /// Prefer `subnet` for the current adapter.
    ///
    /// Current-changed listeners are notified when `subnet` differs from the
    /// subnet of the previous current adapter.
    pub fn set_current_subnet(&self, subnet: Ipv4Addr) {
        let old_subnet = {
            let mut state = self.inner.state.lock();
            let old_subnet = state.current.as_ref().map(|a| a.subnet());
            state.preferred_subnet = Some(subnet);
            state.current = select_current(&state.adapters, Some(subnet));
            old_subnet
        };
        if old_subnet != Some(subnet) {
            self.inner.queue(AdapterUpdate::CurrentChanged);
        }
    }

    /// Re-enumerate adapters and queue notifications for whatever changed.
    ///
    /// Called by the adapter source's change observer; exposed so a caller can
    /// force a rescan.
    pub fn handle_interface_list_changed(&self) -> Result<()> {
        self.inner.handle_interface_list_changed()
    }

    pub fn add_current_change_listener<F>(&self, listener: F) -> ListenerId
    where
        F: Fn() -> ListenerResult + Send + Sync + 'static,
    {
        let mut listeners = self.inner.listeners.lock();
        let id = listeners.next_id();
        listeners.current.insert(id, Arc::new(listener));
        id
    }

    pub fn add_subnet_list_change_listener<F>(&self, listener: F) -> ListenerId
    where
        F: Fn() -> ListenerResult + Send + Sync + 'static,
    {
        let mut listeners = self.inner.listeners.lock();
        let id = listeners.next_id();
        listeners.subnets.insert(id, Arc::new(listener));
        id
    }

    pub fn add_adapter_added_listener<F>(&self, listener: F) -> ListenerId
    where
        F: Fn(&NetworkAdapter) -> ListenerResult + Send + Sync + 'static,
    {
        let mut listeners = self.inner.listeners.lock();
        let id = listeners.next_id();
        listeners.added.insert(id, Arc::new(listener));
        id
    }

    pub fn add_adapter_removed_listener<F>(&self, listener: F) -> ListenerId
    where
        F: Fn(&NetworkAdapter) -> ListenerResult + Send + Sync + 'static,
    {
        let mut listeners = self.inner.listeners.lock();
        let id = listeners.next_id();
        listeners.removed.insert(id, Arc::new(listener));
        id
    }

    pub fn add_adapter_changed_listener<F>(&self, listener: F) -> ListenerId
    where
        F: Fn(&NetworkAdapter) -> ListenerResult + Send + Sync + 'static,
    {
        let mut listeners = self.inner.listeners.lock();
        let id = listeners.next_id();
        listeners.changed.insert(id, Arc::new(listener));
        id
    }

    /// Unregister a listener of any category.
    ///
    /// Blocks while a notification pass is running, so the listener is never
    /// called after this returns. Returns false for an unknown id.
    pub fn remove_listener(&self, id: ListenerId) -> bool {
        let mut listeners = self.inner.listeners.lock();
        listeners.current.remove(&id).is_some()
            || listeners.subnets.remove(&id).is_some()
            || listeners.added.remove(&id).is_some()
            || listeners.removed.remove(&id).is_some()
            || listeners.changed.remove(&id).is_some()
    }
}

impl Drop for NetworkAdapterList {
    fn drop(&mut self) {
        if let Err(e) = self.inner.source.set_change_observer(None) {
            tracing::warn!("Failed to unregister interface observer: {}", e);
        }
        self.inner.begin_shutdown();
        self.notifier.join();
    }
}

impl fmt::Debug for NetworkAdapterList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.state.lock();
        f.debug_struct("NetworkAdapterList")
            .field("adapters", &state.adapters)
            .field("current", &state.current)
            .finish()
    }
}
