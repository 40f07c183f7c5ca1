//! # UPnP Control Point
//!
//! Discovers UPnP devices over SSDP and tracks their lifecycle on the host's
//! current network adapter.
//!
//! ## Overview
//!
//! A [`ControlPointStack`] owns the shared machinery: the timer manager, the
//! network adapter list and its change notifier, the SSDP transport, the
//! description fetcher and the SOAP/GENA transport. Any number of
//! [`DeviceList`]s run on one stack, each searching a [`DiscoveryScope`]:
//!
//! - **All**: every device, created from root announcements
//! - **Root**: root devices only
//! - **Uuid**: a single device by UDN
//! - **DeviceType**: devices of a type at or above a version
//! - **ServiceType**: devices offering a service at or above a version
//!
//! A device is reported to the list's [`DeviceListObserver`] once its
//! description document has been fetched and parsed, and reported removed on
//! byebye, max-age expiry, relocation, a refresh it did not answer, or when
//! the adapter it was found on goes away.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use upnp_control_point::{channel_observer, ControlPointStack, DeviceList, DeviceListEvent, StackConfig};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let stack = ControlPointStack::new(StackConfig::default())?;
//! let (observer, events) = channel_observer();
//! let renderers = DeviceList::device_type(stack, "upnp.org", "MediaRenderer", 1, observer)?;
//! renderers.start();
//!
//! for event in events {
//!     match event {
//!         DeviceListEvent::Added(device) => {
//!             println!("{} at {}", device.udn(), device.location());
//!             let volume = device.invoke_action(
//!                 "urn:schemas-upnp-org:service:RenderingControl:1",
//!                 "GetVolume",
//!                 &[("InstanceID", "0"), ("Channel", "Master")],
//!             )?;
//!             println!("volume {:?}", volume);
//!         }
//!         DeviceListEvent::Removed(udn) => println!("{} gone", udn),
//!     }
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## Threads
//!
//! Observer callbacks run on whichever stack thread caused the change: the
//! description fetch workers, the timer worker, the SSDP receivers or the
//! adapter notifier. They are never called with list locks held.

pub mod config;
mod device;
mod device_list;
pub mod error;
mod events;
pub mod logging;
mod observer;
mod scope;
mod stack;
mod transport;

pub use config::StackConfig;
pub use device::{DeviceOwner, UpnpDevice};
pub use device_list::DeviceList;
pub use error::{ControlPointError, DeviceError, Result};
pub use events::{DeviceListEvent, DeviceListEvents, TimeoutIter, TryIter};
pub use logging::{init_logging, init_logging_from_env, LoggingMode};
pub use observer::{channel_observer, ChannelObserver, DeviceListObserver};
pub use scope::{Admission, DiscoveryScope, ScopeFilter};
pub use stack::{ControlPointStack, StackBuilder};
pub use transport::{ActionResponse, ServiceTransport};

// Re-export commonly used types from the stack's crates
pub use netif::{AdapterSource, ListenerResult, LoopbackPolicy, NetworkAdapter, RetryPolicy};
pub use soap_client::SubscriptionResponse;
pub use upnp_discovery::{SsdpNotification, SsdpTransport, TypeSpec, XmlFetcher};
