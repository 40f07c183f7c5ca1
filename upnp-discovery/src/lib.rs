//! SSDP and device description plumbing for UPnP control points
//!
//! This crate provides the network-facing half of a control point:
//!
//! - [`ssdp`]: M-SEARCH requests and parsing of NOTIFY announcements and
//!   search responses into [`SsdpNotification`]s
//! - [`SsdpTransport`]: per-interface sessions over UDP, sharing one
//!   multicast listener per interface
//! - [`description`]: parsing of device description documents
//! - [`XmlFetcher`]: fetching descriptions on a worker pool with
//!   interruptible, exactly-once completion
//!
//! # Parsing an announcement
//!
//! ```
//! use upnp_discovery::{parse_message, SsdpNotification};
//!
//! let datagram = "NOTIFY * HTTP/1.1\r\n\
//!     HOST: 239.255.255.250:1900\r\n\
//!     CACHE-CONTROL: max-age=1800\r\n\
//!     LOCATION: http://10.0.0.2:80/desc.xml\r\n\
//!     NT: upnp:rootdevice\r\n\
//!     NTS: ssdp:alive\r\n\
//!     USN: uuid:u1::upnp:rootdevice\r\n\
//!     \r\n";
//!
//! match parse_message(datagram).unwrap() {
//!     Some(SsdpNotification::Alive { uuid, max_age, .. }) => {
//!         assert_eq!(uuid, "u1");
//!         assert_eq!(max_age, 1800);
//!     }
//!     other => panic!("unexpected {:?}", other),
//! }
//! ```
//!
//! # Fetching a description
//!
//! ```no_run
//! use std::time::Duration;
//! use upnp_discovery::{DeviceXmlDocument, HttpXmlFetcher, XmlFetcher};
//!
//! let fetcher = HttpXmlFetcher::new(Duration::from_secs(10), 4).unwrap();
//! fetcher.fetch(
//!     "http://10.0.0.2:80/desc.xml",
//!     Box::new(|result| {
//!         if let Ok(xml) = result {
//!             let doc = DeviceXmlDocument::parse(&xml).unwrap();
//!             println!("Found {}", doc.root().friendly_name());
//!         }
//!     }),
//! );
//! ```

mod error;
pub mod ssdp;
pub mod description;
mod fetch;
mod transport;

pub use error::{DiscoveryError, Result};
pub use ssdp::{
    build_msearch, parse_message, NotifyTarget, SearchTarget, SsdpNotification, TypeSpec,
};
pub use description::{DeviceXml, DeviceXmlDocument, ServiceXml};
pub use fetch::{FetchCallback, FetchError, FetchHandle, FetchResult, HttpXmlFetcher, XmlFetcher};
pub use transport::{
    MulticastListener, MulticastListenerRegistry, SsdpHandler, SsdpSession, SsdpTransport,
    UdpSsdpTransport,
};
