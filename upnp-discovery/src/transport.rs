//! SSDP sockets.
//!
//! A control point talks SSDP through two sockets per interface: a unicast
//! socket that sends M-SEARCH requests and receives the replies, and a
//! multicast socket joined to 239.255.255.250:1900 that receives NOTIFY
//! announcements. The multicast socket for an interface is shared by every
//! session bound to it and reference counted by [`MulticastListenerRegistry`].

use std::collections::{BTreeMap, HashMap};
use std::io::ErrorKind;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4, UdpSocket};
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use parking_lot::Mutex;
use socket2::{Domain, Protocol, Socket, Type};

use crate::error::{DiscoveryError, Result};
use crate::ssdp::{self, SearchTarget, SsdpNotification, SSDP_MULTICAST_ADDR, SSDP_PORT};

/// Receive timeout; bounds how long a listener thread takes to notice stop.
const POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Receives parsed announcements and search responses.
pub trait SsdpHandler: Send + Sync {
    fn handle(&self, notification: SsdpNotification);
}

/// SSDP traffic for one interface on behalf of one handler.
///
/// Dropping the session stops its unicast listener and releases its claim on
/// the interface's multicast listener.
pub trait SsdpSession: Send {
    /// Start receiving search responses.
    fn start(&mut self) -> Result<()>;

    /// Send one M-SEARCH.
    fn msearch(&self, target: &SearchTarget) -> Result<()>;
}

/// Factory for [`SsdpSession`]s.
pub trait SsdpTransport: Send + Sync {
    /// Bind a session to `interface`. Multicast announcements reach `handler`
    /// immediately; search responses once the session is started.
    fn attach(&self, interface: Ipv4Addr, handler: Weak<dyn SsdpHandler>)
        -> Result<Box<dyn SsdpSession>>;
}

fn dispatch(datagram: &[u8], source: SocketAddr, handlers: &[Arc<dyn SsdpHandler>]) {
    let Ok(text) = std::str::from_utf8(datagram) else {
        return;
    };
    match ssdp::parse_message(text) {
        Ok(Some(notification)) => {
            for handler in handlers {
                handler.handle(notification.clone());
            }
        }
        Ok(None) => {}
        Err(e) => tracing::debug!("Ignoring SSDP message from {}: {}", source, e),
    }
}

/// Run a receive loop until `stop` is set.
fn spawn_receiver<F>(name: &'static str, socket: UdpSocket, stop: Arc<AtomicBool>, on_datagram: F) -> Result<JoinHandle<()>>
where
    F: Fn(&[u8], SocketAddr) + Send + 'static,
{
    socket.set_read_timeout(Some(POLL_INTERVAL))?;
    thread::Builder::new()
        .name(name.to_string())
        .spawn(move || {
            let mut buffer = [0u8; 2048];
            while !stop.load(Ordering::SeqCst) {
                match socket.recv_from(&mut buffer) {
                    Ok((size, source)) => {
                        let datagram = &buffer[..size];
                        if panic::catch_unwind(AssertUnwindSafe(|| on_datagram(datagram, source)))
                            .is_err()
                        {
                            tracing::error!("Handling SSDP datagram from {} on {} panicked", source, name);
                        }
                    }
                    Err(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => {}
                    Err(e) => {
                        tracing::warn!("SSDP socket error: {}", e);
                        thread::sleep(POLL_INTERVAL);
                    }
                }
            }
        })
        .map_err(|source| DiscoveryError::ThreadSpawn { name, source })
}

fn join_receiver(stop: &AtomicBool, handle: Option<JoinHandle<()>>) {
    stop.store(true, Ordering::SeqCst);
    if let Some(handle) = handle {
        if handle.thread().id() != thread::current().id() {
            let _ = handle.join();
        }
    }
}

/// The shared multicast socket for one interface.
pub struct MulticastListener {
    interface: Ipv4Addr,
    handlers: Arc<Mutex<BTreeMap<u64, Weak<dyn SsdpHandler>>>>,
    next_handler_id: Mutex<u64>,
    stop: Arc<AtomicBool>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl MulticastListener {
    fn open(interface: Ipv4Addr) -> Result<Self> {
        let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;
        socket.set_reuse_address(true)?;
        #[cfg(unix)]
        socket.set_reuse_port(true)?;
        socket.bind(&SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, SSDP_PORT).into())?;
        socket.join_multicast_v4(&SSDP_MULTICAST_ADDR, &interface)?;
        let socket: UdpSocket = socket.into();

        let handlers: Arc<Mutex<BTreeMap<u64, Weak<dyn SsdpHandler>>>> =
            Arc::new(Mutex::new(BTreeMap::new()));
        let stop = Arc::new(AtomicBool::new(false));
        let receiver_handlers = Arc::clone(&handlers);
        let worker = spawn_receiver("ssdp-multicast", socket, Arc::clone(&stop), move |datagram, source| {
            let live: Vec<Arc<dyn SsdpHandler>> = receiver_handlers
                .lock()
                .values()
                .filter_map(Weak::upgrade)
                .collect();
            dispatch(datagram, source, &live);
        })?;

        tracing::debug!("Multicast listener opened on {}", interface);
        Ok(Self {
            interface,
            handlers,
            next_handler_id: Mutex::new(0),
            stop,
            worker: Mutex::new(Some(worker)),
        })
    }

    pub fn interface(&self) -> Ipv4Addr {
        self.interface
    }

    /// Route announcements to `handler` until [`remove_handler`](Self::remove_handler).
    pub fn add_handler(&self, handler: Weak<dyn SsdpHandler>) -> u64 {
        let mut next = self.next_handler_id.lock();
        *next += 1;
        self.handlers.lock().insert(*next, handler);
        *next
    }

    pub fn remove_handler(&self, id: u64) {
        self.handlers.lock().remove(&id);
    }

    pub fn handler_count(&self) -> usize {
        self.handlers.lock().len()
    }
}

impl Drop for MulticastListener {
    fn drop(&mut self) {
        join_receiver(&self.stop, self.worker.lock().take());
        tracing::debug!("Multicast listener closed on {}", self.interface);
    }
}

/// Process-wide table of multicast listeners, one per interface address,
/// each kept open while at least one claim is outstanding.
#[derive(Default)]
pub struct MulticastListenerRegistry {
    listeners: Mutex<HashMap<Ipv4Addr, (Arc<MulticastListener>, usize)>>,
}

impl MulticastListenerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take a reference on the listener for `interface`, opening it if needed.
    pub fn claim(&self, interface: Ipv4Addr) -> Result<Arc<MulticastListener>> {
        let mut listeners = self.listeners.lock();
        if let Some((listener, count)) = listeners.get_mut(&interface) {
            *count += 1;
            return Ok(Arc::clone(listener));
        }
        let listener = Arc::new(MulticastListener::open(interface)?);
        listeners.insert(interface, (Arc::clone(&listener), 1));
        Ok(listener)
    }

    /// Drop a reference taken by [`claim`](Self::claim). The last release
    /// closes the socket.
    pub fn release(&self, interface: Ipv4Addr) {
        let closing = {
            let mut listeners = self.listeners.lock();
            match listeners.get_mut(&interface) {
                Some((_, count)) if *count > 1 => {
                    *count -= 1;
                    None
                }
                Some(_) => listeners.remove(&interface).map(|(listener, _)| listener),
                None => None,
            }
        };
        // Joined outside the table lock
        drop(closing);
    }

    /// Outstanding claims on `interface`.
    pub fn claims(&self, interface: Ipv4Addr) -> usize {
        self.listeners
            .lock()
            .get(&interface)
            .map_or(0, |(_, count)| *count)
    }
}

/// [`SsdpTransport`] over real UDP sockets.
pub struct UdpSsdpTransport {
    multicast: Arc<MulticastListenerRegistry>,
    mx_secs: u32,
}

impl UdpSsdpTransport {
    /// `mx_secs` is the MX value sent in every M-SEARCH.
    pub fn new(multicast: Arc<MulticastListenerRegistry>, mx_secs: u32) -> Self {
        Self { multicast, mx_secs }
    }
}

impl SsdpTransport for UdpSsdpTransport {
    fn attach(
        &self,
        interface: Ipv4Addr,
        handler: Weak<dyn SsdpHandler>,
    ) -> Result<Box<dyn SsdpSession>> {
        let socket = UdpSocket::bind(SocketAddrV4::new(interface, 0))?;
        socket.set_multicast_ttl_v4(4)?;

        let multicast = self.multicast.claim(interface)?;
        let handler_id = multicast.add_handler(handler.clone());

        Ok(Box::new(UdpSsdpSession {
            interface,
            socket: Some(socket),
            sender: None,
            handler,
            registry: Arc::clone(&self.multicast),
            multicast,
            handler_id,
            mx_secs: self.mx_secs,
            stop: Arc::new(AtomicBool::new(false)),
            worker: None,
        }))
    }
}

struct UdpSsdpSession {
    interface: Ipv4Addr,
    /// Unstarted socket; moves to the receive thread on start
    socket: Option<UdpSocket>,
    /// Clone of the socket kept for sending
    sender: Option<UdpSocket>,
    handler: Weak<dyn SsdpHandler>,
    registry: Arc<MulticastListenerRegistry>,
    multicast: Arc<MulticastListener>,
    handler_id: u64,
    mx_secs: u32,
    stop: Arc<AtomicBool>,
    worker: Option<JoinHandle<()>>,
}

impl SsdpSession for UdpSsdpSession {
    fn start(&mut self) -> Result<()> {
        let Some(socket) = self.socket.take() else {
            return Ok(());
        };
        self.sender = Some(socket.try_clone()?);
        let handler = self.handler.clone();
        self.worker = Some(spawn_receiver(
            "ssdp-unicast",
            socket,
            Arc::clone(&self.stop),
            move |datagram, source| {
                if let Some(handler) = handler.upgrade() {
                    dispatch(datagram, source, &[handler]);
                }
            },
        )?);
        tracing::debug!("Unicast SSDP listener started on {}", self.interface);
        Ok(())
    }

    fn msearch(&self, target: &SearchTarget) -> Result<()> {
        let socket = self
            .sender
            .as_ref()
            .or(self.socket.as_ref())
            .ok_or_else(|| DiscoveryError::Parse("session has no socket".to_string()))?;
        let request = ssdp::build_msearch(target, self.mx_secs);
        socket.send_to(request.as_bytes(), ssdp::multicast_endpoint())?;
        tracing::debug!("Sent M-SEARCH for {} on {}", target, self.interface);
        Ok(())
    }
}

impl Drop for UdpSsdpSession {
    fn drop(&mut self) {
        join_receiver(&self.stop, self.worker.take());
        self.multicast.remove_handler(self.handler_id);
        self.registry.release(self.interface);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;

    #[test]
    fn test_receiver_survives_panicking_handler() {
        let socket = UdpSocket::bind("127.0.0.1:0").unwrap();
        let target = socket.local_addr().unwrap();
        let stop = Arc::new(AtomicBool::new(false));
        let (tx, rx) = mpsc::channel();
        let handle = spawn_receiver("ssdp-test", socket, Arc::clone(&stop), move |datagram, _| {
            if datagram == b"boom" {
                panic!("handler failure");
            }
            let _ = tx.send(datagram.to_vec());
        })
        .unwrap();

        let sender = UdpSocket::bind("127.0.0.1:0").unwrap();
        sender.send_to(b"boom", target).unwrap();
        sender.send_to(b"after", target).unwrap();

        assert_eq!(rx.recv_timeout(Duration::from_secs(2)).unwrap(), b"after".to_vec());
        join_receiver(&stop, Some(handle));
    }
}
