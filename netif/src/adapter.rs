//! Snapshot of one network interface.

use std::fmt;
use std::net::Ipv4Addr;

/// One IPv4 network interface as seen at enumeration time.
///
/// Adapters are immutable once published and are shared as
/// `Arc<NetworkAdapter>`, so an adapter named in a queued notification stays
/// alive until its listeners have run.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct NetworkAdapter {
    name: String,
    address: Ipv4Addr,
    netmask: Ipv4Addr,
}

impl NetworkAdapter {
    pub fn new(name: impl Into<String>, address: Ipv4Addr, netmask: Ipv4Addr) -> Self {
        Self {
            name: name.into(),
            address,
            netmask,
        }
    }

    /// Interface name as reported by the OS (e.g. "eth0")
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn address(&self) -> Ipv4Addr {
        self.address
    }

    pub fn netmask(&self) -> Ipv4Addr {
        self.netmask
    }

    /// Network address of the subnet this adapter sits on.
    pub fn subnet(&self) -> Ipv4Addr {
        Ipv4Addr::from(u32::from(self.address) & u32::from(self.netmask))
    }

    /// Whether `address` lies on this adapter's subnet.
    pub fn contains_address(&self, address: Ipv4Addr) -> bool {
        let mask = u32::from(self.netmask);
        u32::from(address) & mask == u32::from(self.subnet())
    }

    pub fn is_loopback(&self) -> bool {
        self.address.is_loopback()
    }
}

impl fmt::Display for NetworkAdapter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.name, self.address)
    }
}
