//! In-process stand-ins for the stack's network collaborators.
//!
//! Each stub records what the device list asked of it so tests can drive
//! discovery without sockets or HTTP.

#![allow(dead_code)]

use std::collections::HashMap;
use std::net::Ipv4Addr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{mpsc, Arc, Weak};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use upnp_control_point::{
    ActionResponse, ControlPointStack, DeviceListEvent, DeviceListEvents, RetryPolicy,
    ServiceTransport, StackConfig, SubscriptionResponse,
};
use upnp_discovery::{
    FetchCallback, FetchError, FetchHandle, NotifyTarget, SearchTarget, SsdpHandler,
    SsdpNotification, SsdpSession, SsdpTransport, XmlFetcher,
};

use netif::{AdapterSource, ChangeObserver, NetworkAdapter};

pub const WAIT: Duration = Duration::from_secs(3);

pub const RENDERING_CONTROL: &str = "urn:schemas-upnp-org:service:RenderingControl:1";

/// Adapter `10.0.<net>.<host>/24`
pub fn nic(net: u8, host: u8) -> NetworkAdapter {
    NetworkAdapter::new(
        format!("eth{}", net),
        Ipv4Addr::new(10, 0, net, host),
        Ipv4Addr::new(255, 255, 255, 0),
    )
}

pub fn location(host: &str) -> String {
    format!("http://{}:80/desc.xml", host)
}

/// Minimal root description for `udn` with a RenderingControl service.
pub fn description(udn: &str, name: &str) -> String {
    format!(
        r#"<?xml version="1.0"?>
<root xmlns="urn:schemas-upnp-org:device-1-0">
  <device>
    <deviceType>urn:schemas-upnp-org:device:MediaRenderer:1</deviceType>
    <friendlyName>{name}</friendlyName>
    <UDN>uuid:{udn}</UDN>
    <presentationURL>/ui/</presentationURL>
    <serviceList>
      <service>
        <serviceType>{service}</serviceType>
        <serviceId>urn:upnp-org:serviceId:RenderingControl</serviceId>
        <SCPDURL>/rc/scpd.xml</SCPDURL>
        <controlURL>/rc/control</controlURL>
        <eventSubURL>/rc/event</eventSubURL>
      </service>
    </serviceList>
  </device>
</root>"#,
        name = name,
        udn = udn,
        service = RENDERING_CONTROL
    )
}

pub fn root_alive(udn: &str, location: &str, max_age: u32) -> SsdpNotification {
    SsdpNotification::Alive {
        target: NotifyTarget::Root,
        uuid: udn.to_string(),
        location: location.to_string(),
        max_age,
    }
}

pub fn byebye(udn: &str) -> SsdpNotification {
    SsdpNotification::ByeBye {
        target: NotifyTarget::Root,
        uuid: udn.to_string(),
    }
}

// ----------------------------------------------------------------------------
// Adapters

#[derive(Default)]
pub struct StubAdapters {
    adapters: Mutex<Vec<NetworkAdapter>>,
    observer: Mutex<Option<ChangeObserver>>,
}

impl StubAdapters {
    pub fn with(adapters: Vec<NetworkAdapter>) -> Arc<Self> {
        Arc::new(Self {
            adapters: Mutex::new(adapters),
            observer: Mutex::new(None),
        })
    }

    /// Replace the adapter set and fire the change signal.
    pub fn change_to(&self, adapters: Vec<NetworkAdapter>) {
        *self.adapters.lock() = adapters;
        if let Some(observer) = self.observer.lock().as_ref() {
            observer();
        }
    }
}

impl AdapterSource for StubAdapters {
    fn list_adapters(&self) -> netif::Result<Vec<NetworkAdapter>> {
        Ok(self.adapters.lock().clone())
    }

    fn set_change_observer(&self, observer: Option<ChangeObserver>) -> netif::Result<()> {
        *self.observer.lock() = observer;
        Ok(())
    }
}

// ----------------------------------------------------------------------------
// SSDP

#[derive(Default)]
struct SsdpState {
    next_id: u64,
    sessions: HashMap<u64, (Ipv4Addr, Weak<dyn SsdpHandler>)>,
    searches: Vec<(Ipv4Addr, String)>,
    starts: usize,
    fail_attach: bool,
}

/// Transport whose sessions record searches and receive injected messages.
#[derive(Default)]
pub struct StubSsdp {
    state: Arc<Mutex<SsdpState>>,
}

impl StubSsdp {
    /// Deliver `notification` to every open session.
    pub fn inject(&self, notification: SsdpNotification) {
        let handlers: Vec<Weak<dyn SsdpHandler>> = self
            .state
            .lock()
            .sessions
            .values()
            .map(|(_, handler)| handler.clone())
            .collect();
        for handler in handlers.iter().filter_map(Weak::upgrade) {
            handler.handle(notification.clone());
        }
    }

    /// Search targets sent so far, oldest first.
    pub fn searches(&self) -> Vec<String> {
        self.state
            .lock()
            .searches
            .iter()
            .map(|(_, target)| target.clone())
            .collect()
    }

    pub fn search_interfaces(&self) -> Vec<Ipv4Addr> {
        self.state.lock().searches.iter().map(|(iface, _)| *iface).collect()
    }

    /// Interfaces with an open session.
    pub fn bound(&self) -> Vec<Ipv4Addr> {
        self.state.lock().sessions.values().map(|(iface, _)| *iface).collect()
    }

    pub fn starts(&self) -> usize {
        self.state.lock().starts
    }

    pub fn fail_attach(&self, fail: bool) {
        self.state.lock().fail_attach = fail;
    }
}

impl SsdpTransport for StubSsdp {
    fn attach(
        &self,
        interface: Ipv4Addr,
        handler: Weak<dyn SsdpHandler>,
    ) -> upnp_discovery::Result<Box<dyn SsdpSession>> {
        let mut state = self.state.lock();
        if state.fail_attach {
            return Err(upnp_discovery::DiscoveryError::Network(std::io::Error::new(
                std::io::ErrorKind::AddrNotAvailable,
                "stub attach failure",
            )));
        }
        state.next_id += 1;
        let id = state.next_id;
        state.sessions.insert(id, (interface, handler));
        Ok(Box::new(StubSession {
            state: Arc::clone(&self.state),
            id,
            interface,
        }))
    }
}

struct StubSession {
    state: Arc<Mutex<SsdpState>>,
    id: u64,
    interface: Ipv4Addr,
}

impl SsdpSession for StubSession {
    fn start(&mut self) -> upnp_discovery::Result<()> {
        self.state.lock().starts += 1;
        Ok(())
    }

    fn msearch(&self, target: &SearchTarget) -> upnp_discovery::Result<()> {
        self.state
            .lock()
            .searches
            .push((self.interface, target.header_value()));
        Ok(())
    }
}

impl Drop for StubSession {
    fn drop(&mut self) {
        self.state.lock().sessions.remove(&self.id);
    }
}

// ----------------------------------------------------------------------------
// Description fetching

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Completion {
    Served(String),
    Failed(String),
    Interrupted(String),
}

struct Pending {
    uri: String,
    callback: FetchCallback,
    handle: Arc<FetchHandle>,
}

#[derive(Default)]
struct FetcherState {
    documents: HashMap<String, String>,
    held: bool,
    pending: Vec<Pending>,
    requests: Vec<String>,
    completions: Vec<Completion>,
}

/// Fetcher serving canned documents, either at once or when released.
#[derive(Default)]
pub struct StubFetcher {
    state: Mutex<FetcherState>,
    changed: Condvar,
}

impl StubFetcher {
    pub fn serve(&self, uri: &str, xml: String) {
        self.state.lock().documents.insert(uri.to_string(), xml);
    }

    /// Queue fetches until `release_all` instead of completing them inline.
    pub fn hold(&self) {
        self.state.lock().held = true;
    }

    pub fn requests(&self) -> Vec<String> {
        self.state.lock().requests.clone()
    }

    pub fn completions(&self) -> Vec<Completion> {
        self.state.lock().completions.clone()
    }

    pub fn wait_for_pending(&self, count: usize) -> bool {
        let deadline = Instant::now() + WAIT;
        let mut state = self.state.lock();
        while state.pending.len() < count {
            if self.changed.wait_until(&mut state, deadline).timed_out() {
                return false;
            }
        }
        true
    }

    /// Complete every queued fetch on the calling thread.
    pub fn release_all(&self) {
        let pending = std::mem::take(&mut self.state.lock().pending);
        for request in pending {
            self.complete(request);
        }
    }

    fn complete(&self, request: Pending) {
        let result = if request.handle.is_interrupted() {
            Err(FetchError::Interrupted)
        } else {
            match self.state.lock().documents.get(&request.uri) {
                Some(xml) => Ok(xml.clone()),
                None => Err(FetchError::Status(404)),
            }
        };
        let completion = match &result {
            Ok(_) => Completion::Served(request.uri.clone()),
            Err(FetchError::Interrupted) => Completion::Interrupted(request.uri.clone()),
            Err(_) => Completion::Failed(request.uri.clone()),
        };
        self.state.lock().completions.push(completion);
        (request.callback)(result);
    }
}

impl XmlFetcher for StubFetcher {
    fn fetch(&self, uri: &str, on_complete: FetchCallback) -> Arc<FetchHandle> {
        let handle = Arc::new(FetchHandle::new());
        let request = Pending {
            uri: uri.to_string(),
            callback: on_complete,
            handle: Arc::clone(&handle),
        };
        let held = {
            let mut state = self.state.lock();
            state.requests.push(uri.to_string());
            if state.held {
                state.pending.push(request);
                self.changed.notify_all();
                None
            } else {
                Some(request)
            }
        };
        if let Some(request) = held {
            self.complete(request);
        }
        handle
    }
}

// ----------------------------------------------------------------------------
// Service transport

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceCall {
    pub url: String,
    pub kind: String,
}

#[derive(Default)]
pub struct StubServices {
    calls: Mutex<Vec<ServiceCall>>,
    next_sid: AtomicU64,
}

impl StubServices {
    pub fn calls(&self) -> Vec<ServiceCall> {
        self.calls.lock().clone()
    }

    fn record(&self, url: &str, kind: String) {
        self.calls.lock().push(ServiceCall {
            url: url.to_string(),
            kind,
        });
    }
}

impl ServiceTransport for StubServices {
    fn invoke(
        &self,
        control_url: &str,
        _service_type: &str,
        action: &str,
        _args: &[(&str, &str)],
    ) -> soap_client::Result<ActionResponse> {
        self.record(control_url, action.to_string());
        Ok(vec![("CurrentVolume".to_string(), "42".to_string())])
    }

    fn subscribe(
        &self,
        event_url: &str,
        _subscriber_url: &str,
        duration_secs: u32,
    ) -> soap_client::Result<SubscriptionResponse> {
        self.record(event_url, "SUBSCRIBE".to_string());
        let sid = self.next_sid.fetch_add(1, Ordering::Relaxed) + 1;
        Ok(SubscriptionResponse {
            sid: format!("uuid:sub-{}", sid),
            timeout_seconds: duration_secs,
        })
    }

    fn renew(&self, event_url: &str, _sid: &str, duration_secs: u32) -> soap_client::Result<u32> {
        self.record(event_url, "RENEW".to_string());
        Ok(duration_secs)
    }

    fn unsubscribe(&self, event_url: &str, _sid: &str) -> soap_client::Result<()> {
        self.record(event_url, "UNSUBSCRIBE".to_string());
        Ok(())
    }
}

// ----------------------------------------------------------------------------
// Stack

pub struct Harness {
    pub stack: Arc<ControlPointStack>,
    pub adapters: Arc<StubAdapters>,
    pub ssdp: Arc<StubSsdp>,
    pub fetcher: Arc<StubFetcher>,
    pub services: Arc<StubServices>,
}

/// Stack on adapter 10.0.0.5/24 with one-second searches.
pub fn harness() -> Harness {
    harness_with(StackConfig::default().with_msearch_time_secs(1).with_max_msearch_retry_secs(2))
}

pub fn harness_with(config: StackConfig) -> Harness {
    let adapters = StubAdapters::with(vec![nic(0, 5)]);
    let ssdp = Arc::new(StubSsdp::default());
    let fetcher = Arc::new(StubFetcher::default());
    let services = Arc::new(StubServices::default());

    let stack = ControlPointStack::builder(config.with_adapter_retry(RetryPolicy::none()))
        .with_adapter_source(adapters.clone())
        .with_ssdp_transport(ssdp.clone())
        .with_xml_fetcher(fetcher.clone())
        .with_service_transport(services.clone())
        .build()
        .expect("stub stack builds");

    Harness {
        stack,
        adapters,
        ssdp,
        fetcher,
        services,
    }
}

/// Wait for the next event, failing the test on timeout.
pub fn next_event(events: &DeviceListEvents) -> DeviceListEvent {
    events
        .recv_timeout(WAIT)
        .expect("device list event within timeout")
}

pub fn describe(event: &DeviceListEvent) -> String {
    match event {
        DeviceListEvent::Added(device) => format!("added {}", device.udn()),
        DeviceListEvent::Removed(udn) => format!("removed {}", udn),
    }
}

/// Poll `condition` until it holds or the wait expires.
pub fn eventually(condition: impl Fn() -> bool) -> bool {
    let deadline = Instant::now() + WAIT;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(10));
    }
    condition()
}

/// Channel of strings for ad hoc recording from callbacks.
pub fn recorder() -> (mpsc::Sender<String>, mpsc::Receiver<String>) {
    mpsc::channel()
}
