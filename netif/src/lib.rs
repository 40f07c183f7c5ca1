//! Network adapter tracking
//!
//! Keeps the set of IPv4 network adapters, a one-per-subnet view of them and
//! the single "current" adapter the control point binds to. Interface changes
//! are diffed against the previous snapshot and announced to listeners from a
//! dedicated notifier thread, one update at a time.
//!
//! # Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use netif::{NetworkAdapterList, RetryPolicy, SystemAdapterSource};
//!
//! let source = Arc::new(SystemAdapterSource::default());
//! let adapters = NetworkAdapterList::new(source, None, RetryPolicy::default())?;
//!
//! adapters.add_current_change_listener(|| {
//!     println!("current adapter changed");
//!     Ok(())
//! });
//!
//! if let Some(current) = adapters.current_adapter() {
//!     println!("bound to {}", current);
//! }
//! # Ok::<(), netif::NetifError>(())
//! ```

mod adapter;
mod error;
mod list;
mod notifier;
mod source;

pub use adapter::NetworkAdapter;
pub use error::{ListenerError, NetifError, Result};
pub use list::{
    diff_subnets, ListenerCategory, ListenerId, ListenerResult, NetworkAdapterList, RetryPolicy,
    SubnetDiff,
};
pub use source::{enumerate_adapters, AdapterSource, ChangeObserver, LoopbackPolicy, SystemAdapterSource};
