//! One discovered UPnP device
//!
//! A [`UpnpDevice`] is created from the first alive sighting of a UDN. It
//! fetches its description document asynchronously, reports the outcome to
//! the list that owns it, keeps an expiry timer fed by later sightings, and
//! resolves service URLs for actions and subscriptions once the description
//! is parsed.
//!
//! Devices are shared as `Arc<UpnpDevice>`. The outstanding fetch holds its
//! own reference, so a device removed mid-fetch stays alive until the fetch
//! completion has run.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::thread::{self, ThreadId};

use parking_lot::{Condvar, Mutex};
use soap_client::SubscriptionResponse;
use timer_manager::{Timer, TimerManager};
use upnp_discovery::description::resolve_service_url;
use upnp_discovery::{
    DeviceXml, DeviceXmlDocument, FetchError, FetchHandle, FetchResult, ServiceXml, XmlFetcher,
};

use crate::error::DeviceError;
use crate::stack::ControlPointStack;
use crate::transport::{ActionResponse, ServiceTransport};

/// Margin added to every max-age so a device announcing at the last moment
/// is not expired first.
const EXPIRY_GRACE_MS: u64 = 100;

/// Receives a device's fetch outcome and expiry.
///
/// Implemented by the device list that created the device.
pub trait DeviceOwner: Send + Sync {
    /// The description fetch finished; `success` is false on any fetch or
    /// parse fault. Called at most once per device.
    fn xml_fetch_completed(&self, device: &Arc<UpnpDevice>, success: bool);

    /// The device's max-age elapsed without a fresh sighting.
    fn device_expired(&self, device: &Arc<UpnpDevice>);
}

#[derive(Default)]
struct FetchState {
    handle: Option<Arc<FetchHandle>>,
    /// Cleared by `interrupt_xml_fetch`; taken by the completion
    listener: Option<Weak<dyn DeviceOwner>>,
    outstanding: bool,
    completing_thread: Option<ThreadId>,
    removed: bool,
    xml: Option<String>,
    document: Option<Arc<DeviceXmlDocument>>,
}

/// A device discovered over SSDP.
pub struct UpnpDevice {
    udn: String,
    location: String,
    owner: Weak<dyn DeviceOwner>,
    fetcher: Arc<dyn XmlFetcher>,
    services: Arc<dyn ServiceTransport>,
    timers: Arc<TimerManager>,
    subscription_duration_secs: u32,
    expiry_ms: Mutex<u64>,
    expiry_timer: Timer,
    expired: AtomicBool,
    state: Mutex<FetchState>,
    fetch_done: Condvar,
}

impl UpnpDevice {
    /// Create a device for `udn` at `location` and arm its expiry.
    ///
    /// The description is not fetched until [`fetch_xml`](Self::fetch_xml).
    pub fn new(
        udn: &str,
        location: &str,
        max_age_secs: u32,
        owner: Weak<dyn DeviceOwner>,
        stack: &ControlPointStack,
    ) -> Arc<Self> {
        let device = Arc::new_cyclic(|weak: &Weak<UpnpDevice>| {
            let weak = weak.clone();
            let expiry_timer = stack.timers().timer(move || {
                if let Some(device) = weak.upgrade() {
                    device.expiry_fired();
                }
            });
            UpnpDevice {
                udn: udn.to_string(),
                location: location.to_string(),
                owner: owner.clone(),
                fetcher: Arc::clone(stack.fetcher()),
                services: Arc::clone(stack.services()),
                timers: Arc::clone(stack.timers()),
                subscription_duration_secs: stack.config().subscription_duration_secs,
                expiry_ms: Mutex::new(0),
                expiry_timer,
                expired: AtomicBool::new(false),
                state: Mutex::new(FetchState {
                    listener: Some(owner),
                    ..FetchState::default()
                }),
                fetch_done: Condvar::new(),
            }
        });
        device.update_max_age(max_age_secs);
        device
    }

    /// UDN without the `uuid:` prefix
    pub fn udn(&self) -> &str {
        &self.udn
    }

    /// URL of the description document
    pub fn location(&self) -> &str {
        &self.location
    }

    /// Whether the description has been fetched and parsed.
    pub fn is_ready(&self) -> bool {
        self.state.lock().document.is_some()
    }

    pub fn is_expired(&self) -> bool {
        self.expired.load(Ordering::SeqCst)
    }

    /// Absolute expiry on the stack's timer clock.
    pub fn expiry_ms(&self) -> u64 {
        *self.expiry_ms.lock()
    }

    /// Raw description, once fetched.
    pub fn xml(&self) -> Option<String> {
        self.state.lock().xml.clone()
    }

    /// Parsed description, once fetched.
    pub fn document(&self) -> Option<Arc<DeviceXmlDocument>> {
        self.state.lock().document.clone()
    }

    pub fn friendly_name(&self) -> Option<String> {
        let document = self.document()?;
        let node = document.find(&self.udn).ok()?;
        Some(node.friendly_name().to_string())
    }

    /// Extend the expiry to `max_age_secs` from now.
    ///
    /// The expiry only ever moves forward: an announcement implying an
    /// earlier expiry than the current one is ignored.
    pub fn update_max_age(&self, max_age_secs: u32) {
        let expiry = self
            .timers
            .now_ms()
            .saturating_add(u64::from(max_age_secs) * 1000 + EXPIRY_GRACE_MS);
        let mut current = self.expiry_ms.lock();
        if expiry >= *current {
            *current = expiry;
            self.expiry_timer.fire_at(expiry);
        }
    }

    pub(crate) fn cancel_expiry(&self) {
        self.expiry_timer.cancel();
    }

    fn expiry_fired(self: &Arc<Self>) {
        self.expired.store(true, Ordering::SeqCst);
        tracing::info!("Device {} expired", self.udn);
        if let Some(owner) = self.owner.upgrade() {
            owner.device_expired(self);
        }
    }

    /// Start fetching the description.
    ///
    /// Does nothing if a fetch is already outstanding or the device has been
    /// interrupted or removed. The fetch holds a reference to the device
    /// until its completion has run.
    pub fn fetch_xml(self: &Arc<Self>) {
        {
            let mut state = self.state.lock();
            if state.outstanding || state.removed || state.listener.is_none() {
                return;
            }
            state.outstanding = true;
        }

        let device = Arc::clone(self);
        let handle = self.fetcher.fetch(
            &self.location,
            Box::new(move |result| device.xml_fetch_completed(result)),
        );

        let mut state = self.state.lock();
        if state.outstanding && state.completing_thread.is_none() {
            if state.removed || state.listener.is_none() {
                handle.interrupt();
            }
            state.handle = Some(handle);
        }
    }

    /// Interrupt any outstanding fetch and detach the owner from its
    /// completion. Does not wait.
    pub fn interrupt_xml_fetch(&self) {
        let mut state = self.state.lock();
        if let Some(handle) = &state.handle {
            handle.interrupt();
        }
        state.listener = None;
    }

    /// Mark the device removed, interrupt its fetch and wait until the fetch
    /// completion has run.
    ///
    /// Returns at once if no fetch is outstanding, or when called from the
    /// completion itself.
    pub fn notify_removed_before_ready(&self) {
        self.state.lock().removed = true;
        self.interrupt_xml_fetch();

        let current = thread::current().id();
        let mut state = self.state.lock();
        while state.outstanding && state.completing_thread != Some(current) {
            self.fetch_done.wait(&mut state);
        }
    }

    fn xml_fetch_completed(self: &Arc<Self>, result: FetchResult) {
        let removed = {
            let mut state = self.state.lock();
            state.handle = None;
            state.completing_thread = Some(thread::current().id());
            state.removed
        };

        let parsed = if removed {
            tracing::debug!("Discarding description of removed device {}", self.udn);
            None
        } else {
            self.parse_fetched(result)
        };
        let success = parsed.is_some();

        let listener = {
            let mut state = self.state.lock();
            if let Some((xml, document)) = parsed {
                state.xml = Some(xml);
                state.document = Some(Arc::new(document));
            }
            state.listener.take()
        };
        if let Some(owner) = listener.and_then(|owner| owner.upgrade()) {
            owner.xml_fetch_completed(self, success);
        }

        let mut state = self.state.lock();
        state.outstanding = false;
        state.completing_thread = None;
        self.fetch_done.notify_all();
    }

    fn parse_fetched(&self, result: FetchResult) -> Option<(String, DeviceXmlDocument)> {
        let xml = match result {
            Ok(xml) => xml,
            Err(FetchError::Interrupted) => {
                tracing::debug!("Description fetch for {} interrupted", self.udn);
                return None;
            }
            Err(e) => {
                tracing::error!(
                    "Error fetching xml for {} from {}: {}",
                    self.udn,
                    self.location,
                    e
                );
                return None;
            }
        };

        let document = match DeviceXmlDocument::parse(&xml) {
            Ok(document) => document,
            Err(e) => {
                self.log_malformed(&e, &xml);
                return None;
            }
        };
        if let Err(e) = document.find(&self.udn) {
            self.log_malformed(&e, &xml);
            return None;
        }
        Some((xml, document))
    }

    fn log_malformed(&self, error: &dyn fmt::Display, xml: &str) {
        tracing::error!(
            "Error within xml for {} from {}: {}. Xml is {}",
            self.udn,
            self.location,
            error,
            xml
        );
    }

    fn with_node<T>(
        &self,
        root: bool,
        read: impl FnOnce(&DeviceXml) -> T,
    ) -> Result<T, DeviceError> {
        let document = self
            .document()
            .ok_or_else(|| DeviceError::NotReady(self.udn.clone()))?;
        if root {
            return Ok(read(document.root()));
        }
        let node = document
            .find(&self.udn)
            .map_err(|source| DeviceError::MalformedDescription {
                udn: self.udn.clone(),
                source,
            })?;
        Ok(read(node))
    }

    /// Look up a dotted attribute.
    ///
    /// Keys are `Upnp.Location`, `Upnp.DeviceXml`, `Upnp.FriendlyName`,
    /// `Upnp.PresentationUrl` and `Upnp.Service.<type>` (the service's
    /// version). `Upnp.Root.<key>` reads the root device instead of this
    /// UDN's node. Unknown keys give `Ok(None)`.
    pub fn get_attribute(&self, key: &str) -> Result<Option<String>, DeviceError> {
        let Some(property) = key.strip_prefix("Upnp.") else {
            return Ok(None);
        };
        match property {
            "Location" => return Ok(Some(self.location.clone())),
            "DeviceXml" => {
                return self
                    .xml()
                    .map(Some)
                    .ok_or_else(|| DeviceError::NotReady(self.udn.clone()))
            }
            _ => {}
        }

        let (root, property) = match property.strip_prefix("Root.") {
            Some(rest) => (true, rest),
            None => (false, property),
        };
        match property {
            "FriendlyName" => self.with_node(root, |node| Some(node.friendly_name().to_string())),
            "PresentationUrl" => {
                self.with_node(root, |node| node.presentation_url().map(str::to_string))
            }
            _ => match property.strip_prefix("Service.") {
                Some(name) => self.with_node(root, |node| {
                    node.service_version(name).map(|version| version.to_string())
                }),
                None => Ok(None),
            },
        }
    }

    /// Absolute URL of one endpoint of `service_type` on this UDN's node.
    fn service_url(
        &self,
        service_type: &str,
        endpoint: fn(&ServiceXml) -> &str,
    ) -> Result<String, DeviceError> {
        let path = self.with_node(false, |node| {
            node.service(service_type)
                .map(|service| endpoint(service).to_string())
        })?;
        let path = path.ok_or_else(|| DeviceError::ServiceNotFound {
            udn: self.udn.clone(),
            service_type: service_type.to_string(),
        })?;
        resolve_service_url(&self.location, &path).map_err(DeviceError::InvalidUrl)
    }

    /// Invoke `action` on `service_type` (a full URN).
    pub fn invoke_action(
        &self,
        service_type: &str,
        action: &str,
        args: &[(&str, &str)],
    ) -> Result<ActionResponse, DeviceError> {
        let url = self.service_url(service_type, ServiceXml::control_url)?;
        tracing::debug!("Invoking {}#{} on {} at {}", service_type, action, self.udn, url);
        Ok(self.services.invoke(&url, service_type, action, args)?)
    }

    /// Subscribe `subscriber_url` to events of `service_type`.
    pub fn subscribe(
        &self,
        service_type: &str,
        subscriber_url: &str,
    ) -> Result<SubscriptionResponse, DeviceError> {
        let url = self.service_url(service_type, ServiceXml::event_sub_url)?;
        Ok(self
            .services
            .subscribe(&url, subscriber_url, self.subscription_duration_secs)?)
    }

    /// Renew subscription `sid`; returns the granted duration.
    pub fn renew(&self, service_type: &str, sid: &str) -> Result<u32, DeviceError> {
        let url = self.service_url(service_type, ServiceXml::event_sub_url)?;
        Ok(self
            .services
            .renew(&url, sid, self.subscription_duration_secs)?)
    }

    pub fn unsubscribe(&self, service_type: &str, sid: &str) -> Result<(), DeviceError> {
        let url = self.service_url(service_type, ServiceXml::event_sub_url)?;
        Ok(self.services.unsubscribe(&url, sid)?)
    }
}

impl fmt::Debug for UpnpDevice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UpnpDevice")
            .field("udn", &self.udn)
            .field("location", &self.location)
            .field("ready", &self.is_ready())
            .field("expiry_ms", &self.expiry_ms())
            .finish()
    }
}
