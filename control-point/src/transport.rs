//! Service transport seam
//!
//! [`UpnpDevice`](crate::UpnpDevice) resolves control and event URLs from its
//! description and hands the requests to a [`ServiceTransport`]. The default
//! is [`SoapClient`].

use soap_client::{response_arguments, SoapClient, SubscriptionResponse};

/// Output arguments of an action, in response order
pub type ActionResponse = Vec<(String, String)>;

/// Sends actions and event subscription requests to a device.
pub trait ServiceTransport: Send + Sync {
    fn invoke(
        &self,
        control_url: &str,
        service_type: &str,
        action: &str,
        args: &[(&str, &str)],
    ) -> soap_client::Result<ActionResponse>;

    fn subscribe(
        &self,
        event_url: &str,
        subscriber_url: &str,
        duration_secs: u32,
    ) -> soap_client::Result<SubscriptionResponse>;

    /// Returns the duration granted by the device.
    fn renew(&self, event_url: &str, sid: &str, duration_secs: u32) -> soap_client::Result<u32>;

    fn unsubscribe(&self, event_url: &str, sid: &str) -> soap_client::Result<()>;
}

impl ServiceTransport for SoapClient {
    fn invoke(
        &self,
        control_url: &str,
        service_type: &str,
        action: &str,
        args: &[(&str, &str)],
    ) -> soap_client::Result<ActionResponse> {
        let response = self.call(control_url, service_type, action, args)?;
        Ok(response_arguments(&response))
    }

    fn subscribe(
        &self,
        event_url: &str,
        subscriber_url: &str,
        duration_secs: u32,
    ) -> soap_client::Result<SubscriptionResponse> {
        SoapClient::subscribe(self, event_url, subscriber_url, duration_secs)
    }

    fn renew(&self, event_url: &str, sid: &str, duration_secs: u32) -> soap_client::Result<u32> {
        self.renew_subscription(event_url, sid, duration_secs)
    }

    fn unsubscribe(&self, event_url: &str, sid: &str) -> soap_client::Result<()> {
        SoapClient::unsubscribe(self, event_url, sid)
    }
}
