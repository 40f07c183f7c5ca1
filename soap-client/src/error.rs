//! Error types for the SOAP client

use thiserror::Error;

/// Errors that can occur during SOAP communication
#[derive(Debug, Error)]
pub enum SoapError {
    /// Network or HTTP communication error
    #[error("Network/HTTP error: {0}")]
    Network(String),

    /// XML parsing error
    #[error("XML parsing error: {0}")]
    Parse(String),

    /// SOAP fault returned by the device, carrying the UPnP error code
    #[error("SOAP fault: error code {0}")]
    Fault(u16),

    /// GENA request answered with a non-200 status
    #[error("{method} failed: HTTP {status}")]
    Status { method: &'static str, status: u16 },
}

pub type Result<T> = std::result::Result<T, SoapError>;
