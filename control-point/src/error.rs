use thiserror::Error;

use soap_client::SoapError;
use upnp_discovery::DiscoveryError;

/// Errors raised while building or running the control point stack
#[derive(Error, Debug)]
pub enum ControlPointError {
    /// Invalid `StackConfig`
    #[error("Invalid configuration: {0}")]
    Configuration(String),

    /// The timer worker could not be started
    #[error("Failed to start timer manager: {0}")]
    Timer(#[source] std::io::Error),

    /// Adapter enumeration or notifier failure
    #[error("Network adapter error: {0}")]
    Netif(#[from] netif::NetifError),

    /// SSDP transport or description fetcher failure
    #[error("Discovery error: {0}")]
    Discovery(#[from] DiscoveryError),

    /// Logging could not be initialised
    #[error(transparent)]
    Logging(#[from] crate::logging::LoggingError),
}

/// Errors raised by operations on a single discovered device
#[derive(Error, Debug)]
pub enum DeviceError {
    /// The description document is malformed or does not describe this UDN
    #[error("Malformed description for {udn}: {source}")]
    MalformedDescription {
        udn: String,
        #[source]
        source: DiscoveryError,
    },

    /// The description has not been fetched and parsed yet
    #[error("Device {0} is not ready")]
    NotReady(String),

    /// The device does not list the requested service
    #[error("Device {udn} has no service {service_type}")]
    ServiceNotFound { udn: String, service_type: String },

    /// A service URL could not be resolved against the location
    #[error("Cannot resolve service URL: {0}")]
    InvalidUrl(#[source] DiscoveryError),

    /// The action or subscription request failed
    #[error("Service transport error: {0}")]
    Transport(#[from] SoapError),
}

/// Result type for stack operations
pub type Result<T> = std::result::Result<T, ControlPointError>;
