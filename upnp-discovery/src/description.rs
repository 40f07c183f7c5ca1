//! Device description parsing.
//!
//! Parses the UPnP device description document served at a device's
//! `LOCATION` and answers the few questions a control point asks of it:
//! which node belongs to a UDN, its friendly name and presentation URL, and
//! where each service's control and event endpoints live.

use serde::Deserialize;
use url::Url;

use crate::error::{DiscoveryError, Result};

#[derive(Debug, Deserialize)]
struct RootXml {
    device: DeviceXml,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct ServiceListXml {
    #[serde(rename = "service", default)]
    services: Vec<ServiceXml>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct DeviceListXml {
    #[serde(rename = "device", default)]
    devices: Vec<DeviceXml>,
}

/// One `<device>` node of a description, possibly embedded in another.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceXml {
    #[serde(default)]
    device_type: String,
    #[serde(default)]
    friendly_name: String,
    #[serde(default)]
    manufacturer: Option<String>,
    #[serde(default)]
    model_name: Option<String>,
    #[serde(rename = "UDN")]
    udn: String,
    #[serde(rename = "presentationURL", default)]
    presentation_url: Option<String>,
    #[serde(default)]
    service_list: ServiceListXml,
    #[serde(default)]
    device_list: DeviceListXml,
}

impl DeviceXml {
    /// UDN as written in the document, including the `uuid:` prefix
    pub fn udn(&self) -> &str {
        &self.udn
    }

    pub fn device_type(&self) -> &str {
        &self.device_type
    }

    pub fn friendly_name(&self) -> &str {
        &self.friendly_name
    }

    pub fn manufacturer(&self) -> Option<&str> {
        self.manufacturer.as_deref()
    }

    pub fn model_name(&self) -> Option<&str> {
        self.model_name.as_deref()
    }

    pub fn presentation_url(&self) -> Option<&str> {
        self.presentation_url.as_deref()
    }

    pub fn services(&self) -> &[ServiceXml] {
        &self.service_list.services
    }

    /// Embedded devices, one level down
    pub fn devices(&self) -> &[DeviceXml] {
        &self.device_list.devices
    }

    /// The service whose `serviceType` equals `service_type` exactly.
    pub fn service(&self, service_type: &str) -> Option<&ServiceXml> {
        self.services()
            .iter()
            .find(|service| service.service_type == service_type)
    }

    /// Version of the first service matching `name`.
    ///
    /// `name` may be a full URN without the trailing version
    /// (`urn:schemas-upnp-org:service:AVTransport`) or just the type name
    /// (`AVTransport`).
    pub fn service_version(&self, name: &str) -> Option<u32> {
        self.services().iter().find_map(|service| {
            let (base, version) = service.service_type.rsplit_once(':')?;
            let type_name = base.rsplit(':').next()?;
            if base == name || type_name == name {
                version.parse().ok()
            } else {
                None
            }
        })
    }

    /// Search this node and every embedded node for `udn`.
    ///
    /// `udn` is given without the `uuid:` prefix. A node whose UDN lacks the
    /// prefix makes the document malformed.
    pub fn find(&self, udn: &str) -> Result<Option<&DeviceXml>> {
        if udn_matches(&self.udn, udn)? {
            return Ok(Some(self));
        }
        for device in self.devices() {
            if let Some(found) = device.find(udn)? {
                return Ok(Some(found));
            }
        }
        Ok(None)
    }
}

/// One `<service>` entry of a device's service list.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceXml {
    service_type: String,
    #[serde(default)]
    service_id: Option<String>,
    #[serde(rename = "SCPDURL", default)]
    scpd_url: String,
    #[serde(rename = "controlURL", default)]
    control_url: String,
    #[serde(rename = "eventSubURL", default)]
    event_sub_url: String,
}

impl ServiceXml {
    pub fn service_type(&self) -> &str {
        &self.service_type
    }

    pub fn service_id(&self) -> Option<&str> {
        self.service_id.as_deref()
    }

    pub fn scpd_url(&self) -> &str {
        &self.scpd_url
    }

    pub fn control_url(&self) -> &str {
        &self.control_url
    }

    pub fn event_sub_url(&self) -> &str {
        &self.event_sub_url
    }
}

/// A parsed device description.
#[derive(Debug, Clone)]
pub struct DeviceXmlDocument {
    root: DeviceXml,
}

impl DeviceXmlDocument {
    /// Parse a description document.
    ///
    /// # Errors
    ///
    /// Returns `DiscoveryError::Parse` if the XML is malformed or has no
    /// root device.
    pub fn parse(xml: &str) -> Result<Self> {
        let root: RootXml = quick_xml::de::from_str(xml)
            .map_err(|e| DiscoveryError::Parse(format!("Failed to parse device XML: {}", e)))?;
        Ok(Self { root: root.device })
    }

    /// The top-level device
    pub fn root(&self) -> &DeviceXml {
        &self.root
    }

    /// The node for `udn` (without `uuid:` prefix), wherever it is nested.
    pub fn find(&self, udn: &str) -> Result<&DeviceXml> {
        self.root
            .find(udn)?
            .ok_or_else(|| DiscoveryError::DeviceNotFound(udn.to_string()))
    }
}

/// Compare a document UDN (`uuid:xyz`) against a bare UDN (`xyz`).
///
/// A document UDN without the `uuid:` prefix is a parse error.
pub fn udn_matches(found: &str, target: &str) -> Result<bool> {
    match found.strip_prefix("uuid:") {
        Some(udn) if !udn.is_empty() => Ok(udn == target),
        _ => Err(DiscoveryError::Parse(format!("malformed UDN: {}", found))),
    }
}

fn parse_url(url: &str) -> Result<Url> {
    Url::parse(url).map_err(|e| DiscoveryError::InvalidUrl {
        url: url.to_string(),
        reason: e.to_string(),
    })
}

/// Resolve a service URL from a description against the device location.
///
/// Absolute URLs are returned unchanged. Anything else is appended to the
/// `scheme://host:port` of `location`.
pub fn resolve_service_url(location: &str, path: &str) -> Result<String> {
    if Url::parse(path).is_ok() {
        return Ok(path.to_string());
    }
    let base = parse_url(location)?;
    let host = base.host_str().ok_or_else(|| DiscoveryError::InvalidUrl {
        url: location.to_string(),
        reason: "no host".to_string(),
    })?;
    let port = base.port_or_known_default().unwrap_or(80);
    let separator = if path.starts_with('/') { "" } else { "/" };
    Ok(format!("{}://{}:{}{}{}", base.scheme(), host, port, separator, path))
}

/// Host of a location URL as an IPv4 address.
///
/// Locations naming a host by DNS name or IPv6 address are rejected.
pub fn location_ipv4(location: &str) -> Result<std::net::Ipv4Addr> {
    let url = parse_url(location)?;
    match url.host() {
        Some(url::Host::Ipv4(address)) => Ok(address),
        _ => Err(DiscoveryError::InvalidUrl {
            url: location.to_string(),
            reason: "host is not an IPv4 address".to_string(),
        }),
    }
}
