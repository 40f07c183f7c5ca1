//! Discovery scopes
//!
//! A scope decides what a device list searches for and which alive
//! announcements may create a device in it.

use std::fmt;

use upnp_discovery::{NotifyTarget, SearchTarget, TypeSpec};

/// What an alive announcement may do to a device list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// Refresh a known device, or create it if unknown
    Create,
    /// Refresh a known device only
    RefreshOnly,
    /// Ignore the announcement
    Reject,
}

/// Search construction and alive admission for one kind of device list.
pub trait ScopeFilter: Send + Sync {
    /// The M-SEARCH target sent on start and on every refresh.
    fn search_target(&self) -> SearchTarget;

    /// How an alive announcement of category `target` for `uuid` is treated.
    fn admission(&self, target: &NotifyTarget, uuid: &str) -> Admission;
}

/// The closed set of discovery scopes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiscoveryScope {
    /// Every device; root announcements create entries
    All,
    /// Root devices only
    Root,
    /// One device by UDN (without `uuid:` prefix)
    Uuid(String),
    /// Devices of a type, at or above a version
    DeviceType(TypeSpec),
    /// Devices offering a service type, at or above a version
    ServiceType(TypeSpec),
}

impl DiscoveryScope {
    pub fn device_type(domain: &str, name: &str, version: u32) -> Self {
        DiscoveryScope::DeviceType(TypeSpec::new(domain, name, version))
    }

    pub fn service_type(domain: &str, name: &str, version: u32) -> Self {
        DiscoveryScope::ServiceType(TypeSpec::new(domain, name, version))
    }
}

/// Same domain and type name, and at least the wanted version.
fn type_satisfies(found: &TypeSpec, wanted: &TypeSpec) -> bool {
    found.version >= wanted.version && found.domain == wanted.domain && found.name == wanted.name
}

impl ScopeFilter for DiscoveryScope {
    fn search_target(&self) -> SearchTarget {
        match self {
            DiscoveryScope::All => SearchTarget::All,
            DiscoveryScope::Root => SearchTarget::Root,
            DiscoveryScope::Uuid(uuid) => SearchTarget::Uuid(uuid.clone()),
            DiscoveryScope::DeviceType(spec) => SearchTarget::DeviceType(spec.clone()),
            DiscoveryScope::ServiceType(spec) => SearchTarget::ServiceType(spec.clone()),
        }
    }

    fn admission(&self, target: &NotifyTarget, uuid: &str) -> Admission {
        match (self, target) {
            (DiscoveryScope::All | DiscoveryScope::Root, NotifyTarget::Root) => Admission::Create,
            (DiscoveryScope::All | DiscoveryScope::Root, _) => Admission::RefreshOnly,

            (DiscoveryScope::Uuid(wanted), NotifyTarget::Uuid) if wanted == uuid => {
                Admission::Create
            }
            (DiscoveryScope::Uuid(_), NotifyTarget::Uuid) => Admission::Reject,
            (DiscoveryScope::Uuid(_), _) => Admission::RefreshOnly,

            (DiscoveryScope::DeviceType(wanted), NotifyTarget::DeviceType(found))
            | (DiscoveryScope::ServiceType(wanted), NotifyTarget::ServiceType(found)) => {
                if type_satisfies(found, wanted) {
                    Admission::Create
                } else {
                    Admission::Reject
                }
            }
            (DiscoveryScope::DeviceType(_) | DiscoveryScope::ServiceType(_), _) => {
                Admission::RefreshOnly
            }
        }
    }
}

impl fmt::Display for DiscoveryScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DiscoveryScope::All => f.write_str("all"),
            DiscoveryScope::Root => f.write_str("root"),
            DiscoveryScope::Uuid(uuid) => write!(f, "uuid {}", uuid),
            DiscoveryScope::DeviceType(spec) => {
                write!(f, "device {}:{}:{}", spec.domain, spec.name, spec.version)
            }
            DiscoveryScope::ServiceType(spec) => {
                write!(f, "service {}:{}:{}", spec.domain, spec.name, spec.version)
            }
        }
    }
}
