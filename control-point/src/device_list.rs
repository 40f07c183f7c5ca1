//! Discovered device lists
//!
//! A [`DeviceList`] searches one [`DiscoveryScope`] on the stack's current
//! adapter and keeps a registry of the devices that answered. A device is
//! only reported to the observer once its description has been fetched; it
//! is reported removed on byebye, expiry, relocation, or when a refresh
//! finishes without it being seen.
//!
//! Lock order: the notification lock, then the registry lock. The registry
//! lock is never held while calling into the SSDP session, the observer or a
//! device's fetch. The notification lock is held across observer calls so a
//! device's add and remove reach the observer in registry order; it is
//! reentrant so observers may call back into the list.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::net::Ipv4Addr;
use std::sync::{Arc, Weak};

use netif::{ListenerError, ListenerId, ListenerResult};
use parking_lot::{Mutex, ReentrantMutex};
use timer_manager::Timer;
use upnp_discovery::description::location_ipv4;
use upnp_discovery::{SsdpHandler, SsdpNotification, SsdpSession, TypeSpec};

use crate::device::{DeviceOwner, UpnpDevice};
use crate::error::Result;
use crate::observer::DeviceListObserver;
use crate::scope::{Admission, DiscoveryScope, ScopeFilter};
use crate::stack::ControlPointStack;

struct Entry {
    device: Arc<UpnpDevice>,
    ready: bool,
}

#[derive(Default)]
struct Registry {
    active: bool,
    started: bool,
    closed: bool,
    /// Adapter address the SSDP session is bound to
    interface: Option<Ipv4Addr>,
    devices: HashMap<String, Entry>,
    /// Removed before ready, waiting for their fetch to finish
    pending_remove: HashMap<String, Arc<UpnpDevice>>,
    refreshing: bool,
    seen: HashSet<String>,
    pending_refreshes: u32,
}

impl Registry {
    /// A UDN may be created when it is neither registered nor still being
    /// torn down.
    fn admits(&self, udn: &str) -> bool {
        !self.closed && !self.devices.contains_key(udn) && !self.pending_remove.contains_key(udn)
    }
}

struct ListInner {
    stack: Arc<ControlPointStack>,
    scope: DiscoveryScope,
    observer: Arc<dyn DeviceListObserver>,
    notify: ReentrantMutex<()>,
    registry: Mutex<Registry>,
    ssdp: Mutex<Option<Box<dyn SsdpSession>>>,
    refresh_timer: Timer,
    next_refresh_timer: Timer,
    listener_ids: Mutex<Vec<ListenerId>>,
    weak: Weak<ListInner>,
}

/// Devices discovered in one scope.
///
/// Dropping the list unregisters its adapter listeners, interrupts pending
/// description fetches without waiting, and closes its SSDP session.
pub struct DeviceList {
    inner: Arc<ListInner>,
}

impl DeviceList {
    /// Create a list bound to the stack's current adapter, if any.
    ///
    /// The list receives announcements immediately but reports nothing
    /// until [`start`](Self::start).
    pub fn new(
        stack: Arc<ControlPointStack>,
        scope: DiscoveryScope,
        observer: Arc<dyn DeviceListObserver>,
    ) -> Result<Self> {
        let inner = Arc::new_cyclic(|weak: &Weak<ListInner>| {
            let list = weak.clone();
            let refresh_timer = stack.timers().timer(move || {
                if let Some(list) = list.upgrade() {
                    list.refresh_timer_complete();
                }
            });
            let list = weak.clone();
            let next_refresh_timer = stack.timers().timer(move || {
                if let Some(list) = list.upgrade() {
                    list.refresh();
                }
            });
            ListInner {
                stack: Arc::clone(&stack),
                scope,
                observer,
                notify: ReentrantMutex::new(()),
                registry: Mutex::new(Registry::default()),
                ssdp: Mutex::new(None),
                refresh_timer,
                next_refresh_timer,
                listener_ids: Mutex::new(Vec::new()),
                weak: weak.clone(),
            }
        });

        let list = Arc::downgrade(&inner);
        let current = stack.adapters().add_current_change_listener(move || match list.upgrade() {
            Some(list) => list.handle_interface_change(false),
            None => Ok(()),
        });
        let list = Arc::downgrade(&inner);
        let subnets = stack.adapters().add_subnet_list_change_listener(move || {
            match list.upgrade() {
                Some(list) => list.handle_interface_change(true),
                None => Ok(()),
            }
        });
        inner.listener_ids.lock().extend([current, subnets]);

        let list = DeviceList { inner };
        if let Some(adapter) = stack.adapters().current_adapter() {
            list.inner.bind(adapter.address())?;
        }
        tracing::debug!("Created {} device list", list.inner.scope);
        Ok(list)
    }

    /// Every device; root announcements create entries.
    pub fn all(stack: Arc<ControlPointStack>, observer: Arc<dyn DeviceListObserver>) -> Result<Self> {
        Self::new(stack, DiscoveryScope::All, observer)
    }

    pub fn root(stack: Arc<ControlPointStack>, observer: Arc<dyn DeviceListObserver>) -> Result<Self> {
        Self::new(stack, DiscoveryScope::Root, observer)
    }

    /// The single device with this UDN.
    pub fn uuid(
        stack: Arc<ControlPointStack>,
        uuid: &str,
        observer: Arc<dyn DeviceListObserver>,
    ) -> Result<Self> {
        Self::new(stack, DiscoveryScope::Uuid(uuid.to_string()), observer)
    }

    /// Devices of `domain:name` at `version` or later.
    pub fn device_type(
        stack: Arc<ControlPointStack>,
        domain: &str,
        name: &str,
        version: u32,
        observer: Arc<dyn DeviceListObserver>,
    ) -> Result<Self> {
        Self::new(
            stack,
            DiscoveryScope::DeviceType(TypeSpec::new(domain, name, version)),
            observer,
        )
    }

    /// Devices offering service `domain:name` at `version` or later.
    pub fn service_type(
        stack: Arc<ControlPointStack>,
        domain: &str,
        name: &str,
        version: u32,
        observer: Arc<dyn DeviceListObserver>,
    ) -> Result<Self> {
        Self::new(
            stack,
            DiscoveryScope::ServiceType(TypeSpec::new(domain, name, version)),
            observer,
        )
    }

    pub fn scope(&self) -> &DiscoveryScope {
        &self.inner.scope
    }

    /// Activate reporting and send a search.
    pub fn start(&self) {
        self.inner.start();
    }

    /// Search again and, once the grace period elapses, drop every device
    /// that did not answer. Ignored while a refresh is already running.
    pub fn refresh(&self) {
        self.inner.refresh();
    }

    pub fn is_refreshing(&self) -> bool {
        self.inner.registry.lock().refreshing
    }

    /// Feed a sighting of a known device.
    ///
    /// Returns true when the sighting was fully handled. Returns false when
    /// the device is unknown, has moved (it is then removed), its location
    /// is unreachable, or a refresh is running and the sighting still has
    /// to be recorded.
    pub fn update(&self, udn: &str, location: &str, max_age_secs: u32) -> bool {
        self.inner.update(udn, location, max_age_secs)
    }

    /// Whether `location` is on the subnet of the adapter the list is bound
    /// to. Unparseable locations are unreachable.
    pub fn is_location_reachable(&self, location: &str) -> bool {
        self.inner.is_location_reachable(location)
    }

    pub fn remove(&self, udn: &str) {
        self.inner.remove(udn, None);
    }

    /// Remove every device and cancel any refresh.
    pub fn remove_all(&self) {
        self.inner.remove_all();
    }

    /// React to the current adapter (`new_subnet == false`) or the subnet
    /// list (`new_subnet == true`) changing.
    ///
    /// Called by the stack's adapter notifier; an error makes the notifier
    /// retry the pass.
    pub fn handle_interface_change(&self, new_subnet: bool) -> ListenerResult {
        self.inner.handle_interface_change(new_subnet)
    }

    /// Adapter address the list is bound to, if any.
    pub fn interface(&self) -> Option<Ipv4Addr> {
        self.inner.registry.lock().interface
    }

    /// A ready device by UDN.
    pub fn device(&self, udn: &str) -> Option<Arc<UpnpDevice>> {
        let registry = self.inner.registry.lock();
        registry
            .devices
            .get(udn)
            .filter(|entry| entry.ready)
            .map(|entry| Arc::clone(&entry.device))
    }

    /// Every ready device, in no particular order.
    pub fn devices(&self) -> Vec<Arc<UpnpDevice>> {
        let registry = self.inner.registry.lock();
        registry
            .devices
            .values()
            .filter(|entry| entry.ready)
            .map(|entry| Arc::clone(&entry.device))
            .collect()
    }

    /// Registered devices including those still fetching their description.
    pub fn len(&self) -> usize {
        self.inner.registry.lock().devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl fmt::Debug for DeviceList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let registry = self.inner.registry.lock();
        f.debug_struct("DeviceList")
            .field("scope", &self.inner.scope)
            .field("interface", &registry.interface)
            .field("devices", &registry.devices.len())
            .field("refreshing", &registry.refreshing)
            .finish()
    }
}

impl Drop for DeviceList {
    fn drop(&mut self) {
        self.inner.shutdown();
    }
}

impl ListInner {
    fn handler(&self) -> Weak<dyn SsdpHandler> {
        self.weak.clone()
    }

    fn owner(&self) -> Weak<dyn DeviceOwner> {
        self.weak.clone()
    }

    /// Open an SSDP session on `interface`; the session is started right
    /// away if the list already was.
    fn bind(&self, interface: Ipv4Addr) -> upnp_discovery::Result<()> {
        let mut slot = self.ssdp.lock();
        let mut session = self.stack.ssdp().attach(interface, self.handler())?;
        if self.registry.lock().started {
            session.start()?;
        }
        *slot = Some(session);
        drop(slot);
        self.registry.lock().interface = Some(interface);
        tracing::debug!("{} device list bound to {}", self.scope, interface);
        Ok(())
    }

    fn stop_listeners(&self) {
        let session = self.ssdp.lock().take();
        drop(session);
    }

    fn start(&self) {
        let needs_start = {
            let mut registry = self.registry.lock();
            if registry.closed {
                return;
            }
            registry.active = true;
            let needs_start = !registry.started;
            registry.started = true;
            needs_start
        };

        let mut ssdp = self.ssdp.lock();
        let Some(session) = ssdp.as_mut() else {
            tracing::debug!("{} device list has no adapter, search deferred", self.scope);
            return;
        };
        if needs_start {
            if let Err(e) = session.start() {
                tracing::warn!("Failed to start SSDP session for {} list: {}", self.scope, e);
            }
        }
        if let Err(e) = session.msearch(&self.scope.search_target()) {
            tracing::error!("Error sending msearch for {} list: {}", self.scope, e);
        }
    }

    fn refresh(&self) {
        {
            let mut registry = self.registry.lock();
            if registry.closed || registry.refreshing {
                return;
            }
            registry.refreshing = true;
            registry.seen.clear();
        }
        tracing::debug!("Refreshing {} device list", self.scope);
        self.start();
        self.refresh_timer
            .fire_in(self.stack.config().refresh_grace_ms());
    }

    fn refresh_timer_complete(&self) {
        self.refresh_complete();
        let follow_up = {
            let mut registry = self.registry.lock();
            if registry.pending_refreshes > 0 && !registry.closed {
                registry.pending_refreshes -= 1;
                true
            } else {
                false
            }
        };
        if follow_up {
            self.next_refresh_timer
                .fire_in(u64::from(self.stack.config().msearch_time_secs) * 1000);
        }
    }

    fn refresh_complete(&self) {
        let stale: Vec<String> = {
            let mut registry = self.registry.lock();
            if !registry.refreshing {
                return;
            }
            registry.refreshing = false;
            let seen = std::mem::take(&mut registry.seen);
            registry
                .devices
                .keys()
                .filter(|udn| !seen.contains(*udn))
                .cloned()
                .collect()
        };
        for udn in stale {
            tracing::debug!("Device {} not seen during refresh", udn);
            self.remove(&udn, None);
        }
    }

    fn update(&self, udn: &str, location: &str, max_age_secs: u32) -> bool {
        if !self.is_location_reachable(location) {
            return false;
        }
        let (device, refreshing) = {
            let mut registry = self.registry.lock();
            if registry.refreshing && registry.pending_refreshes > 1 {
                // a device answered, so a single follow-up search is enough
                registry.pending_refreshes = 1;
            }
            let Some(entry) = registry.devices.get(udn) else {
                return false;
            };
            (Arc::clone(&entry.device), registry.refreshing)
        };

        if device.location() != location {
            tracing::info!(
                "Device {} moved from {} to {}",
                udn,
                device.location(),
                location
            );
            self.remove(udn, None);
            return false;
        }

        device.update_max_age(max_age_secs);
        !refreshing
    }

    fn add(&self, udn: &str, location: &str, max_age_secs: u32) {
        if self.update(udn, location, max_age_secs) || !self.is_location_reachable(location) {
            return;
        }

        {
            let mut registry = self.registry.lock();
            if registry.refreshing {
                registry.seen.insert(udn.to_string());
            }
            if !registry.admits(udn) {
                return;
            }
        }

        let candidate = UpnpDevice::new(udn, location, max_age_secs, self.owner(), &self.stack);
        {
            let mut registry = self.registry.lock();
            if !registry.admits(udn) {
                return;
            }
            registry.devices.insert(
                udn.to_string(),
                Entry {
                    device: Arc::clone(&candidate),
                    ready: false,
                },
            );
        }
        tracing::debug!("Fetching description of {} from {}", udn, location);
        candidate.fetch_xml();
    }

    fn is_location_reachable(&self, location: &str) -> bool {
        let Ok(host) = location_ipv4(location) else {
            return false;
        };
        let interface = self.registry.lock().interface;
        match self.stack.adapters().current_adapter() {
            Some(adapter) => {
                interface == Some(adapter.address()) && adapter.contains_address(host)
            }
            None => false,
        }
    }

    /// Remove `udn`, or only this exact device when `expected` is given.
    fn remove(&self, udn: &str, expected: Option<&Arc<UpnpDevice>>) {
        let notify = self.notify.lock();
        let (entry, active) = {
            let mut registry = self.registry.lock();
            let matches = match (registry.devices.get(udn), expected) {
                (Some(entry), Some(expected)) => Arc::ptr_eq(&entry.device, expected),
                (Some(_), None) => true,
                (None, _) => false,
            };
            if !matches {
                return;
            }
            let Some(entry) = registry.devices.remove(udn) else {
                return;
            };
            if !entry.ready {
                registry
                    .pending_remove
                    .insert(udn.to_string(), Arc::clone(&entry.device));
            }
            (entry, registry.active)
        };

        entry.device.cancel_expiry();
        if entry.ready {
            tracing::info!("Device {} removed from {} list", udn, self.scope);
            if active {
                self.observer.device_removed(udn);
            }
        } else {
            // the fetch completion may need this lock to finish
            drop(notify);
            entry.device.notify_removed_before_ready();
            let mut registry = self.registry.lock();
            if let Some(pending) = registry.pending_remove.get(udn) {
                if Arc::ptr_eq(pending, &entry.device) {
                    registry.pending_remove.remove(udn);
                }
            }
        }
    }

    fn remove_all(&self) {
        self.refresh_timer.cancel();
        self.next_refresh_timer.cancel();
        let udns: Vec<String> = {
            let mut registry = self.registry.lock();
            registry.refreshing = false;
            registry.seen.clear();
            registry.pending_refreshes = 0;
            registry.devices.keys().cloned().collect()
        };
        for udn in udns {
            self.remove(&udn, None);
        }
    }

    fn handle_interface_change(&self, new_subnet: bool) -> ListenerResult {
        let current = self.stack.adapters().current_adapter();
        let bound = {
            let registry = self.registry.lock();
            if registry.closed {
                return Ok(());
            }
            registry.interface
        };
        if new_subnet {
            if let Some(adapter) = &current {
                if bound == Some(adapter.address()) {
                    // still on the same adapter
                    return Ok(());
                }
            }
        }

        tracing::info!(
            "{} device list rebinding from {:?} to {:?}",
            self.scope,
            bound,
            current.as_ref().map(|adapter| adapter.address())
        );
        self.stop_listeners();
        self.registry.lock().interface = None;
        self.remove_all();

        let Some(adapter) = current else {
            tracing::info!("{} device list has no adapter", self.scope);
            return Ok(());
        };

        self.bind(adapter.address()).map_err(|e| {
            ListenerError::new(format!(
                "failed to bind {} list to {}: {}",
                self.scope,
                adapter.address(),
                e
            ))
        })?;
        self.registry.lock().pending_refreshes = self.stack.config().pending_refresh_count();
        self.refresh();
        Ok(())
    }

    fn shutdown(&self) {
        {
            let mut registry = self.registry.lock();
            registry.active = false;
            registry.closed = true;
        }
        let ids: Vec<ListenerId> = self.listener_ids.lock().drain(..).collect();
        for id in ids {
            self.stack.adapters().remove_listener(id);
        }
        {
            let registry = self.registry.lock();
            for entry in registry.devices.values() {
                entry.device.interrupt_xml_fetch();
            }
            for device in registry.pending_remove.values() {
                device.interrupt_xml_fetch();
            }
        }
        self.refresh_timer.cancel();
        self.next_refresh_timer.cancel();
        self.stop_listeners();
        tracing::debug!("Closed {} device list", self.scope);
    }

    fn set_device_ready(&self, device: &Arc<UpnpDevice>) {
        let _notify = self.notify.lock();
        let publish = {
            let mut registry = self.registry.lock();
            let active = registry.active;
            match registry.devices.get_mut(device.udn()) {
                Some(entry) if Arc::ptr_eq(&entry.device, device) => {
                    entry.ready = true;
                    active
                }
                _ => false,
            }
        };
        if publish {
            tracing::info!(
                "Device {} added to {} list from {}",
                device.udn(),
                self.scope,
                device.location()
            );
            self.observer.device_added(device);
        }
    }
}

impl SsdpHandler for ListInner {
    fn handle(&self, notification: SsdpNotification) {
        match notification {
            SsdpNotification::Alive {
                target,
                uuid,
                location,
                max_age,
            } => match self.scope.admission(&target, &uuid) {
                Admission::Create => self.add(&uuid, &location, max_age),
                Admission::RefreshOnly => {
                    self.update(&uuid, &location, max_age);
                }
                Admission::Reject => {}
            },
            SsdpNotification::ByeBye { uuid, .. } => self.remove(&uuid, None),
        }
    }
}

impl DeviceOwner for ListInner {
    fn xml_fetch_completed(&self, device: &Arc<UpnpDevice>, success: bool) {
        if success {
            self.set_device_ready(device);
        } else {
            tracing::debug!(
                "Description fetch failed for {} at {}",
                device.udn(),
                device.location()
            );
            self.remove(device.udn(), Some(device));
        }
    }

    fn device_expired(&self, device: &Arc<UpnpDevice>) {
        self.remove(device.udn(), Some(device));
    }
}
