//! SSDP wire format
//!
//! Builds M-SEARCH requests and parses the two kinds of datagram a control
//! point cares about: multicast NOTIFY announcements and unicast search
//! responses. Both are reduced to an [`SsdpNotification`].

use std::fmt;
use std::net::{Ipv4Addr, SocketAddrV4};

use crate::error::{DiscoveryError, Result};

/// SSDP multicast group
pub const SSDP_MULTICAST_ADDR: Ipv4Addr = Ipv4Addr::new(239, 255, 255, 250);
/// SSDP port
pub const SSDP_PORT: u16 = 1900;

pub(crate) fn multicast_endpoint() -> SocketAddrV4 {
    SocketAddrV4::new(SSDP_MULTICAST_ADDR, SSDP_PORT)
}

/// Convert a domain name to the form it takes inside a URN.
///
/// `upnp.org` is spelled `schemas-upnp-org`; any other domain has its dots
/// replaced by dashes.
pub fn domain_to_urn(domain: &str) -> String {
    if domain == "upnp.org" {
        "schemas-upnp-org".to_string()
    } else {
        domain.replace('.', "-")
    }
}

/// Inverse of [`domain_to_urn`].
pub fn domain_from_urn(urn_domain: &str) -> String {
    if urn_domain == "schemas-upnp-org" {
        "upnp.org".to_string()
    } else {
        urn_domain.replace('-', ".")
    }
}

/// A versioned device or service type, e.g. `upnp.org` / `MediaRenderer` / 1.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TypeSpec {
    /// Domain in dotted form (`upnp.org`, `av.openhome.org`)
    pub domain: String,
    pub name: String,
    pub version: u32,
}

impl TypeSpec {
    pub fn new(domain: impl Into<String>, name: impl Into<String>, version: u32) -> Self {
        Self {
            domain: domain.into(),
            name: name.into(),
            version,
        }
    }

    /// URN for this type, `kind` being `device` or `service`.
    pub fn urn(&self, kind: &str) -> String {
        format!(
            "urn:{}:{}:{}:{}",
            domain_to_urn(&self.domain),
            kind,
            self.name,
            self.version
        )
    }
}

/// What an M-SEARCH asks for.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum SearchTarget {
    All,
    Root,
    Uuid(String),
    DeviceType(TypeSpec),
    ServiceType(TypeSpec),
}

impl SearchTarget {
    /// Value of the `ST` header.
    pub fn header_value(&self) -> String {
        match self {
            SearchTarget::All => "ssdp:all".to_string(),
            SearchTarget::Root => "upnp:rootdevice".to_string(),
            SearchTarget::Uuid(uuid) => format!("uuid:{}", uuid),
            SearchTarget::DeviceType(spec) => spec.urn("device"),
            SearchTarget::ServiceType(spec) => spec.urn("service"),
        }
    }
}

impl fmt::Display for SearchTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.header_value())
    }
}

/// Category of an announcement, taken from its `NT` or `ST` header.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum NotifyTarget {
    Root,
    Uuid,
    DeviceType(TypeSpec),
    ServiceType(TypeSpec),
}

/// An alive or byebye announcement.
///
/// Search responses are reported as `Alive`, exactly like a multicast
/// `ssdp:alive`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SsdpNotification {
    Alive {
        target: NotifyTarget,
        uuid: String,
        location: String,
        max_age: u32,
    },
    ByeBye {
        target: NotifyTarget,
        uuid: String,
    },
}

impl SsdpNotification {
    pub fn uuid(&self) -> &str {
        match self {
            SsdpNotification::Alive { uuid, .. } | SsdpNotification::ByeBye { uuid, .. } => uuid,
        }
    }

    pub fn target(&self) -> &NotifyTarget {
        match self {
            SsdpNotification::Alive { target, .. } | SsdpNotification::ByeBye { target, .. } => {
                target
            }
        }
    }
}

/// Build an M-SEARCH request. `mx_secs` is the response window devices spread
/// their replies over.
pub fn build_msearch(target: &SearchTarget, mx_secs: u32) -> String {
    format!(
        "M-SEARCH * HTTP/1.1\r\n\
         HOST: {}:{}\r\n\
         MAN: \"ssdp:discover\"\r\n\
         MX: {}\r\n\
         ST: {}\r\n\
         USER-AGENT: upnp-cp/{} UPnP/1.1\r\n\
         \r\n",
        SSDP_MULTICAST_ADDR,
        SSDP_PORT,
        mx_secs,
        target.header_value(),
        env!("CARGO_PKG_VERSION")
    )
}

#[derive(Default)]
struct Headers {
    nt: Option<String>,
    nts: Option<String>,
    st: Option<String>,
    usn: Option<String>,
    location: Option<String>,
    cache_control: Option<String>,
}

enum MessageKind {
    Notify,
    SearchResponse,
}

/// Parse one SSDP datagram.
///
/// Returns `Ok(None)` for traffic a control point ignores: other control
/// points' M-SEARCH requests, `ssdp:update`, and targets outside the four
/// known categories. Announcements missing a required header, or whose USN
/// lacks the `uuid:` prefix, are parse errors.
pub fn parse_message(message: &str) -> Result<Option<SsdpNotification>> {
    let mut lines = message.lines();
    let start_line = lines.next().unwrap_or("").trim();
    let kind = if start_line.starts_with("NOTIFY ") {
        MessageKind::Notify
    } else if start_line.starts_with("HTTP/1.1 200") || start_line.starts_with("HTTP/1.0 200") {
        MessageKind::SearchResponse
    } else {
        return Ok(None);
    };

    let mut headers = Headers::default();
    for line in lines {
        let line = line.trim();

        if let Some(value) = extract_header_value(line, "NTS:") {
            headers.nts = Some(value);
        } else if let Some(value) = extract_header_value(line, "NT:") {
            headers.nt = Some(value);
        } else if let Some(value) = extract_header_value(line, "ST:") {
            headers.st = Some(value);
        } else if let Some(value) = extract_header_value(line, "USN:") {
            headers.usn = Some(value);
        } else if let Some(value) = extract_header_value(line, "LOCATION:") {
            headers.location = Some(value);
        } else if let Some(value) = extract_header_value(line, "CACHE-CONTROL:") {
            headers.cache_control = Some(value);
        }
    }

    let (target, alive) = match kind {
        MessageKind::SearchResponse => (headers.st.as_deref(), true),
        MessageKind::Notify => match headers.nts.as_deref() {
            Some("ssdp:alive") => (headers.nt.as_deref(), true),
            Some("ssdp:byebye") => (headers.nt.as_deref(), false),
            _ => return Ok(None),
        },
    };
    let target = match target {
        Some(value) => match parse_target(value)? {
            Some(target) => target,
            None => return Ok(None),
        },
        None => return Err(DiscoveryError::Parse("missing NT/ST header".to_string())),
    };
    let uuid = match headers.usn {
        Some(usn) => parse_usn(&usn)?,
        None => return Err(DiscoveryError::Parse("missing USN header".to_string())),
    };

    if !alive {
        return Ok(Some(SsdpNotification::ByeBye { target, uuid }));
    }

    let location = headers
        .location
        .ok_or_else(|| DiscoveryError::Parse("missing LOCATION header".to_string()))?;
    let max_age = headers
        .cache_control
        .as_deref()
        .map(parse_max_age)
        .transpose()?
        .ok_or_else(|| DiscoveryError::Parse("missing CACHE-CONTROL header".to_string()))?;

    Ok(Some(SsdpNotification::Alive {
        target,
        uuid,
        location,
        max_age,
    }))
}

/// Parse an `NT`/`ST` value. Unknown categories yield `Ok(None)`.
pub fn parse_target(value: &str) -> Result<Option<NotifyTarget>> {
    if value == "upnp:rootdevice" {
        return Ok(Some(NotifyTarget::Root));
    }
    if value.starts_with("uuid:") {
        return Ok(Some(NotifyTarget::Uuid));
    }
    let Some(urn) = value.strip_prefix("urn:") else {
        return Ok(None);
    };

    let parts: Vec<&str> = urn.split(':').collect();
    let [domain, kind, name, version] = parts[..] else {
        return Err(DiscoveryError::Parse(format!("malformed URN: {}", value)));
    };
    let version = version
        .parse::<u32>()
        .map_err(|_| DiscoveryError::Parse(format!("bad version in URN: {}", value)))?;
    let spec = TypeSpec::new(domain_from_urn(domain), name, version);

    Ok(match kind {
        "device" => Some(NotifyTarget::DeviceType(spec)),
        "service" => Some(NotifyTarget::ServiceType(spec)),
        _ => None,
    })
}

/// Extract the device UUID from a USN such as
/// `uuid:1234::urn:schemas-upnp-org:device:MediaRenderer:1`.
pub fn parse_usn(usn: &str) -> Result<String> {
    let rest = usn
        .strip_prefix("uuid:")
        .ok_or_else(|| DiscoveryError::Parse(format!("USN without uuid: prefix: {}", usn)))?;
    let uuid = rest.split("::").next().unwrap_or_default();
    if uuid.is_empty() {
        return Err(DiscoveryError::Parse(format!("USN with empty uuid: {}", usn)));
    }
    Ok(uuid.to_string())
}

/// Read `max-age` out of a `CACHE-CONTROL` value.
pub fn parse_max_age(cache_control: &str) -> Result<u32> {
    cache_control
        .split(',')
        .filter_map(|directive| {
            let (name, value) = directive.split_once('=')?;
            name.trim()
                .eq_ignore_ascii_case("max-age")
                .then(|| value.trim())
        })
        .next()
        .and_then(|value| value.parse::<u32>().ok())
        .ok_or_else(|| DiscoveryError::Parse(format!("no max-age in: {}", cache_control)))
}

/// Extract header value from a line like "HEADER: value"
fn extract_header_value(line: &str, header: &str) -> Option<String> {
    let name = line.get(..header.len())?;
    let value = line.get(header.len()..)?;
    if !value.is_empty() && name.eq_ignore_ascii_case(header) {
        Some(value.trim().to_string())
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn alive(location: &str, nt: &str, usn: &str) -> String {
        format!(
            "NOTIFY * HTTP/1.1\r\n\
             HOST: 239.255.255.250:1900\r\n\
             CACHE-CONTROL: max-age=1800\r\n\
             LOCATION: {}\r\n\
             NT: {}\r\n\
             NTS: ssdp:alive\r\n\
             USN: {}\r\n\
             \r\n",
            location, nt, usn
        )
    }

    #[test]
    fn test_parse_notify_alive_device_type() {
        let message = alive(
            "http://10.0.0.2:80/desc.xml",
            "urn:schemas-upnp-org:device:MediaRenderer:2",
            "uuid:u1::urn:schemas-upnp-org:device:MediaRenderer:2",
        );

        let parsed = parse_message(&message).unwrap().unwrap();
        assert_eq!(
            parsed,
            SsdpNotification::Alive {
                target: NotifyTarget::DeviceType(TypeSpec::new("upnp.org", "MediaRenderer", 2)),
                uuid: "u1".to_string(),
                location: "http://10.0.0.2:80/desc.xml".to_string(),
                max_age: 1800,
            }
        );
    }

    #[test]
    fn test_parse_notify_byebye_needs_no_location() {
        let message = "NOTIFY * HTTP/1.1\r\n\
            NT: upnp:rootdevice\r\n\
            NTS: ssdp:byebye\r\n\
            USN: uuid:u1::upnp:rootdevice\r\n\
            \r\n";

        let parsed = parse_message(message).unwrap().unwrap();
        assert_eq!(
            parsed,
            SsdpNotification::ByeBye {
                target: NotifyTarget::Root,
                uuid: "u1".to_string(),
            }
        );
    }

    #[test]
    fn test_parse_search_response() {
        let response = "HTTP/1.1 200 OK\r\n\
            CACHE-CONTROL: max-age = 1800\r\n\
            EXT:\r\n\
            LOCATION: http://192.168.1.100:55178/description.xml\r\n\
            SERVER: Linux/5.10 UPnP/1.0 OpenHome/1.0\r\n\
            ST: urn:av-openhome-org:service:Product:3\r\n\
            USN: uuid:4c494e4e-0100-8101-0001-00e04c68f1a2::urn:av-openhome-org:service:Product:3\r\n\
            \r\n";

        let parsed = parse_message(response).unwrap().unwrap();
        assert_eq!(parsed.uuid(), "4c494e4e-0100-8101-0001-00e04c68f1a2");
        assert_eq!(
            parsed.target(),
            &NotifyTarget::ServiceType(TypeSpec::new("av.openhome.org", "Product", 3))
        );
    }

    #[test]
    fn test_parse_ignores_msearch_and_update() {
        let search = build_msearch(&SearchTarget::All, 3);
        assert_eq!(parse_message(&search).unwrap(), None);

        let update = "NOTIFY * HTTP/1.1\r\n\
            NT: upnp:rootdevice\r\n\
            NTS: ssdp:update\r\n\
            USN: uuid:u1::upnp:rootdevice\r\n\
            \r\n";
        assert_eq!(parse_message(update).unwrap(), None);
    }

    #[test]
    fn test_parse_rejects_usn_without_uuid_prefix() {
        let message = alive("http://10.0.0.2/d.xml", "upnp:rootdevice", "u1::upnp:rootdevice");
        assert!(matches!(parse_message(&message), Err(DiscoveryError::Parse(_))));
    }

    #[test]
    fn test_parse_rejects_alive_without_location() {
        let message = "NOTIFY * HTTP/1.1\r\n\
            CACHE-CONTROL: max-age=1800\r\n\
            NT: upnp:rootdevice\r\n\
            NTS: ssdp:alive\r\n\
            USN: uuid:u1::upnp:rootdevice\r\n\
            \r\n";
        assert!(parse_message(message).is_err());
    }

    #[test]
    fn test_parse_malformed() {
        let response = "This is not a valid SSDP response\r\n\
            Some random text\r\n";
        assert_eq!(parse_message(response).unwrap(), None);
        assert_eq!(parse_message("").unwrap(), None);
    }

    #[rstest]
    #[case(SearchTarget::All, "ssdp:all")]
    #[case(SearchTarget::Root, "upnp:rootdevice")]
    #[case(SearchTarget::Uuid("abc".into()), "uuid:abc")]
    #[case(
        SearchTarget::DeviceType(TypeSpec::new("upnp.org", "MediaServer", 1)),
        "urn:schemas-upnp-org:device:MediaServer:1"
    )]
    #[case(
        SearchTarget::ServiceType(TypeSpec::new("av.openhome.org", "Playlist", 1)),
        "urn:av-openhome-org:service:Playlist:1"
    )]
    fn test_search_target_header(#[case] target: SearchTarget, #[case] expected: &str) {
        assert_eq!(target.header_value(), expected);
        assert!(build_msearch(&target, 3).contains(&format!("ST: {}\r\n", expected)));
    }

    #[rstest]
    #[case("upnp.org", "schemas-upnp-org")]
    #[case("av.openhome.org", "av-openhome-org")]
    #[case("linn.co.uk", "linn-co-uk")]
    fn test_domain_mapping(#[case] domain: &str, #[case] urn: &str) {
        assert_eq!(domain_to_urn(domain), urn);
        assert_eq!(domain_from_urn(urn), domain);
    }

    #[rstest]
    #[case("max-age=1800", 1800)]
    #[case("max-age = 90", 90)]
    #[case("no-cache, MAX-AGE=30", 30)]
    fn test_parse_max_age(#[case] value: &str, #[case] expected: u32) {
        assert_eq!(parse_max_age(value).unwrap(), expected);
    }

    #[test]
    fn test_parse_max_age_missing() {
        assert!(parse_max_age("no-cache").is_err());
    }

    #[test]
    fn test_parse_target_bad_version() {
        assert!(parse_target("urn:schemas-upnp-org:device:MediaServer:x").is_err());
        assert_eq!(parse_target("ssdp:all").unwrap(), None);
    }

    #[test]
    fn test_extract_header_value_case_insensitive() {
        assert_eq!(
            extract_header_value("location: http://example.com", "LOCATION:"),
            Some("http://example.com".to_string())
        );
        assert_eq!(
            extract_header_value("LoCaTiOn:\thttp://example.com  ", "LOCATION:"),
            Some("http://example.com".to_string())
        );
    }

    #[test]
    fn test_extract_header_value_no_match() {
        assert_eq!(extract_header_value("LOCATIONS: value", "LOCATION:"), None);
        assert_eq!(extract_header_value("LOCATION:", "LOCATION:"), None);
    }

    #[rstest]
    #[case::split_inside_name("NTé: x", "NT:")]
    #[case::split_inside_longer_name("NTé: x", "NTS:")]
    #[case::shorter_than_name("é", "LOCATION:")]
    fn test_extract_header_value_non_ascii(#[case] line: &str, #[case] header: &str) {
        assert_eq!(extract_header_value(line, header), None);
    }

    #[test]
    fn test_non_ascii_header_line_is_skipped() {
        let message = "NOTIFY * HTTP/1.1\r\n\
            NTé: x\r\n\
            NT: upnp:rootdevice\r\n\
            NTS: ssdp:byebye\r\n\
            USN: uuid:u1::upnp:rootdevice\r\n\
            \r\n";

        let parsed = parse_message(message).unwrap().unwrap();
        assert_eq!(
            parsed,
            SsdpNotification::ByeBye {
                target: NotifyTarget::Root,
                uuid: "u1".to_string(),
            }
        );
    }
}
