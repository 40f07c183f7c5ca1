//! Error types for the discovery system.

use thiserror::Error;

/// Error type for discovery operations.
///
/// Covers the SSDP sockets, description fetching and description parsing.
#[derive(Debug, Error)]
pub enum DiscoveryError {
    /// Socket creation, multicast membership or datagram I/O failed
    #[error("Network error: {0}")]
    Network(#[from] std::io::Error),

    /// HTTP request for a description failed
    #[error("HTTP error: {0}")]
    Http(String),

    /// Malformed SSDP message or description document
    #[error("Parse error: {0}")]
    Parse(String),

    /// The description has no device node with this UDN
    #[error("Device {0} not found in description")]
    DeviceNotFound(String),

    /// A location or service URL could not be parsed
    #[error("Invalid URL {url}: {reason}")]
    InvalidUrl { url: String, reason: String },

    /// A background thread could not be started
    #[error("Failed to spawn {name} thread: {source}")]
    ThreadSpawn {
        name: &'static str,
        #[source]
        source: std::io::Error,
    },
}

/// Convenience Result type alias for discovery operations.
pub type Result<T> = std::result::Result<T, DiscoveryError>;
