//! SOAP client for UPnP device communication
//!
//! This crate provides a minimal SOAP client for invoking UPnP actions and
//! managing GENA event subscriptions (SUBSCRIBE / UNSUBSCRIBE). Endpoints are
//! given as absolute URLs already resolved against the device location.

mod error;

pub use error::{Result, SoapError};

use std::borrow::Cow;
use std::time::Duration;

use quick_xml::escape::escape;
use xmltree::{Element, XMLNode};

/// Response from a UPnP subscription request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionResponse {
    /// Subscription ID returned by the device
    pub sid: String,
    /// Actual timeout granted by the device (in seconds)
    pub timeout_seconds: u32,
}

/// A minimal SOAP client for UPnP device communication
#[derive(Debug, Clone)]
pub struct SoapClient {
    agent: ureq::Agent,
}

impl SoapClient {
    /// Create a new SOAP client with default timeouts
    pub fn new() -> Self {
        Self::with_timeouts(Duration::from_secs(5), Duration::from_secs(10))
    }

    pub fn with_timeouts(connect: Duration, read: Duration) -> Self {
        Self {
            agent: ureq::AgentBuilder::new()
                .timeout_connect(connect)
                .timeout_read(read)
                .build(),
        }
    }

    /// Invoke `action` on the service at `control_url` and return the
    /// `<actionResponse>` element.
    ///
    /// Argument values are XML-escaped. A UPnP fault (usually sent with
    /// HTTP 500) is reported as [`SoapError::Fault`].
    pub fn call(
        &self,
        control_url: &str,
        service_type: &str,
        action: &str,
        args: &[(&str, &str)],
    ) -> Result<Element> {
        let body = build_envelope(service_type, action, args);
        let soap_action = format!("\"{}#{}\"", service_type, action);
        tracing::debug!("SOAP {} -> {}", soap_action, control_url);

        let response = self
            .agent
            .post(control_url)
            .set("Content-Type", "text/xml; charset=\"utf-8\"")
            .set("SOAPACTION", &soap_action)
            .send_string(&body);

        let xml_text = match response {
            Ok(response) => response.into_string(),
            // Faults arrive as 500 with an envelope body
            Err(ureq::Error::Status(500, response)) => response.into_string(),
            Err(ureq::Error::Status(status, _)) => {
                return Err(SoapError::Status {
                    method: "POST",
                    status,
                })
            }
            Err(e) => return Err(SoapError::Network(e.to_string())),
        }
        .map_err(|e| SoapError::Network(e.to_string()))?;

        let xml = Element::parse(xml_text.as_bytes()).map_err(|e| SoapError::Parse(e.to_string()))?;

        extract_response(&xml, action)
    }

    /// Subscribe to events for the service at `event_url`.
    ///
    /// # Arguments
    /// * `event_url` - Absolute event subscription URL
    /// * `callback_url` - URL where events should be sent
    /// * `timeout_seconds` - Requested subscription timeout in seconds
    ///
    /// # Returns
    /// A `SubscriptionResponse` containing the SID and actual timeout
    pub fn subscribe(
        &self,
        event_url: &str,
        callback_url: &str,
        timeout_seconds: u32,
    ) -> Result<SubscriptionResponse> {
        let response = self
            .agent
            .request("SUBSCRIBE", event_url)
            .set("CALLBACK", &format!("<{}>", callback_url))
            .set("NT", "upnp:event")
            .set("TIMEOUT", &format!("Second-{}", timeout_seconds))
            .call()
            .map_err(|e| gena_error("SUBSCRIBE", e))?;

        let sid = response
            .header("SID")
            .ok_or_else(|| SoapError::Parse("Missing SID header in SUBSCRIBE response".to_string()))?
            .to_string();

        let timeout_seconds = response
            .header("TIMEOUT")
            .and_then(parse_timeout)
            .unwrap_or(timeout_seconds);

        Ok(SubscriptionResponse {
            sid,
            timeout_seconds,
        })
    }

    /// Renew subscription `sid`. Returns the timeout granted by the device.
    pub fn renew_subscription(
        &self,
        event_url: &str,
        sid: &str,
        timeout_seconds: u32,
    ) -> Result<u32> {
        let response = self
            .agent
            .request("SUBSCRIBE", event_url)
            .set("SID", sid)
            .set("TIMEOUT", &format!("Second-{}", timeout_seconds))
            .call()
            .map_err(|e| gena_error("SUBSCRIBE renewal", e))?;

        Ok(response
            .header("TIMEOUT")
            .and_then(parse_timeout)
            .unwrap_or(timeout_seconds))
    }

    /// Cancel subscription `sid`.
    pub fn unsubscribe(&self, event_url: &str, sid: &str) -> Result<()> {
        self.agent
            .request("UNSUBSCRIBE", event_url)
            .set("SID", sid)
            .call()
            .map_err(|e| gena_error("UNSUBSCRIBE", e))?;
        Ok(())
    }
}

impl Default for SoapClient {
    fn default() -> Self {
        Self::new()
    }
}

/// Output arguments of an action response as `(name, value)` pairs, in
/// document order.
pub fn response_arguments(response: &Element) -> Vec<(String, String)> {
    response
        .children
        .iter()
        .filter_map(|node| match node {
            XMLNode::Element(element) => Some((
                element.name.clone(),
                element
                    .get_text()
                    .map(Cow::into_owned)
                    .unwrap_or_default(),
            )),
            _ => None,
        })
        .collect()
}

fn build_envelope(service_type: &str, action: &str, args: &[(&str, &str)]) -> String {
    let payload: String = args
        .iter()
        .map(|(name, value)| format!("<{name}>{}</{name}>", escape(*value), name = name))
        .collect();
    format!(
        r#"<?xml version="1.0" encoding="utf-8"?><s:Envelope xmlns:s="http://schemas.xmlsoap.org/soap/envelope/" s:encodingStyle="http://schemas.xmlsoap.org/soap/encoding/"><s:Body><u:{action} xmlns:u="{service_type}">{payload}</u:{action}></s:Body></s:Envelope>"#,
        action = action,
        service_type = service_type,
        payload = payload
    )
}

fn gena_error(method: &'static str, error: ureq::Error) -> SoapError {
    match error {
        ureq::Error::Status(status, _) => SoapError::Status { method, status },
        other => SoapError::Network(other.to_string()),
    }
}

/// Parse a `Second-1800` timeout header. `infinite` is not honoured.
fn parse_timeout(value: &str) -> Option<u32> {
    value.trim().strip_prefix("Second-")?.parse::<u32>().ok()
}

fn extract_response(xml: &Element, action: &str) -> Result<Element> {
    let body = xml
        .get_child("Body")
        .ok_or_else(|| SoapError::Parse("Missing SOAP Body".to_string()))?;

    // Check for SOAP fault first
    if let Some(fault) = body.get_child("Fault") {
        let error_code = fault
            .get_child("detail")
            .and_then(|d| d.get_child("UPnPError").or_else(|| d.get_child("UpnPError")))
            .and_then(|e| e.get_child("errorCode"))
            .and_then(|c| c.get_text())
            .and_then(|t| t.trim().parse::<u16>().ok())
            .unwrap_or(500);
        return Err(SoapError::Fault(error_code));
    }

    let response_name = format!("{}Response", action);
    body.get_child(response_name.as_str())
        .cloned()
        .ok_or_else(|| SoapError::Parse(format!("Missing {} element", response_name)))
}
