//! Socket-level tests. These need a host that permits joining the SSDP
//! multicast group on loopback, so they are ignored by default.
//!
//! Run with: cargo test -p upnp-cp-discovery --test transport_sockets -- --ignored

use std::net::Ipv4Addr;
use std::sync::{mpsc, Arc, Mutex, Weak};
use std::time::Duration;

use upnp_discovery::{
    MulticastListenerRegistry, SearchTarget, SsdpHandler, SsdpNotification, SsdpTransport,
    UdpSsdpTransport,
};

struct Collector(Mutex<mpsc::Sender<SsdpNotification>>);

impl SsdpHandler for Collector {
    fn handle(&self, notification: SsdpNotification) {
        let _ = self.0.lock().unwrap().send(notification);
    }
}

#[test]
#[ignore]
fn test_sessions_share_one_multicast_listener() {
    let registry = Arc::new(MulticastListenerRegistry::new());
    let transport = UdpSsdpTransport::new(Arc::clone(&registry), 1);
    let (tx, _rx) = mpsc::channel();
    let handler: Arc<dyn SsdpHandler> = Arc::new(Collector(Mutex::new(tx)));

    let first = transport
        .attach(Ipv4Addr::LOCALHOST, Arc::downgrade(&handler))
        .unwrap();
    let second = transport
        .attach(Ipv4Addr::LOCALHOST, Arc::downgrade(&handler))
        .unwrap();
    assert_eq!(registry.claims(Ipv4Addr::LOCALHOST), 2);

    drop(first);
    assert_eq!(registry.claims(Ipv4Addr::LOCALHOST), 1);
    drop(second);
    assert_eq!(registry.claims(Ipv4Addr::LOCALHOST), 0);
}

#[test]
#[ignore]
fn test_started_session_sends_searches() {
    let registry = Arc::new(MulticastListenerRegistry::new());
    let transport = UdpSsdpTransport::new(registry, 1);
    let (tx, rx) = mpsc::channel();
    let handler: Arc<dyn SsdpHandler> = Arc::new(Collector(Mutex::new(tx)));
    let weak: Weak<dyn SsdpHandler> = Arc::downgrade(&handler);

    let mut session = transport.attach(Ipv4Addr::LOCALHOST, weak).unwrap();
    session.start().unwrap();
    session.msearch(&SearchTarget::Root).unwrap();

    let notification = rx.recv_timeout(Duration::from_secs(2));
    // A search on loopback may or may not be answered by the host; the
    // session itself must stay usable either way
    if let Ok(notification) = notification {
        assert!(!notification.uuid().is_empty());
    }
    session.msearch(&SearchTarget::All).unwrap();
}
