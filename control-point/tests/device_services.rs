//! Attribute lookup and service requests on a ready device.

mod helpers;

use std::sync::Arc;

use helpers::*;
use rstest::rstest;
use upnp_control_point::{
    channel_observer, DeviceError, DeviceList, DeviceListEvent, DeviceOwner, UpnpDevice,
};

/// A started list holding ready device `u1` at 10.0.0.2.
fn ready_device(h: &Harness) -> (DeviceList, Arc<UpnpDevice>) {
    let loc = location("10.0.0.2");
    h.fetcher.serve(&loc, description("u1", "Kitchen"));
    let (observer, events) = channel_observer();
    let list = DeviceList::all(h.stack.clone(), observer).unwrap();
    list.start();
    h.ssdp.inject(root_alive("u1", &loc, 1800));
    match next_event(&events) {
        DeviceListEvent::Added(device) => (list, device),
        other => panic!("expected add, got {}", describe(&other)),
    }
}

#[rstest]
#[case("Upnp.Location", Some("http://10.0.0.2:80/desc.xml"))]
#[case("Upnp.FriendlyName", Some("Kitchen"))]
#[case("Upnp.PresentationUrl", Some("/ui/"))]
#[case("Upnp.Service.RenderingControl", Some("1"))]
#[case("Upnp.Service.urn:schemas-upnp-org:service:RenderingControl", Some("1"))]
#[case("Upnp.Service.AVTransport", None)]
#[case("Upnp.Root.FriendlyName", Some("Kitchen"))]
#[case("Upnp.Unknown", None)]
#[case("Other.FriendlyName", None)]
fn test_attributes(#[case] key: &str, #[case] expected: Option<&str>) {
    let h = harness();
    let (_list, device) = ready_device(&h);
    assert_eq!(device.get_attribute(key).unwrap().as_deref(), expected);
}

#[test]
fn test_device_xml_attribute_is_the_fetched_document() {
    let h = harness();
    let (_list, device) = ready_device(&h);
    let xml = device.get_attribute("Upnp.DeviceXml").unwrap().unwrap();
    assert_eq!(xml, description("u1", "Kitchen"));
}

struct IgnoringOwner;

impl DeviceOwner for IgnoringOwner {
    fn xml_fetch_completed(&self, _device: &Arc<UpnpDevice>, _success: bool) {}

    fn device_expired(&self, _device: &Arc<UpnpDevice>) {}
}

#[test]
fn test_unfetched_device_is_not_ready() {
    let h = harness();
    let owner: Arc<dyn DeviceOwner> = Arc::new(IgnoringOwner);
    let loc = location("10.0.0.2");
    let device = UpnpDevice::new("u1", &loc, 1800, Arc::downgrade(&owner), &h.stack);

    assert!(!device.is_ready());
    assert_eq!(device.get_attribute("Upnp.Location").unwrap(), Some(loc));
    assert!(matches!(
        device.get_attribute("Upnp.FriendlyName"),
        Err(DeviceError::NotReady(_))
    ));
    assert!(matches!(
        device.invoke_action(RENDERING_CONTROL, "GetVolume", &[]),
        Err(DeviceError::NotReady(_))
    ));
    assert!(h.fetcher.requests().is_empty());
}

#[test]
fn test_invoke_action_uses_control_url() {
    let h = harness();
    let (_list, device) = ready_device(&h);

    let response = device
        .invoke_action(
            RENDERING_CONTROL,
            "GetVolume",
            &[("InstanceID", "0"), ("Channel", "Master")],
        )
        .unwrap();

    assert_eq!(response, vec![("CurrentVolume".to_string(), "42".to_string())]);
    assert_eq!(
        h.services.calls(),
        vec![ServiceCall {
            url: "http://10.0.0.2:80/rc/control".to_string(),
            kind: "GetVolume".to_string(),
        }]
    );
}

#[test]
fn test_subscription_lifecycle_uses_event_url() {
    let h = harness();
    let (_list, device) = ready_device(&h);

    let subscription = device
        .subscribe(RENDERING_CONTROL, "http://10.0.0.5:3400/notify")
        .unwrap();
    assert_eq!(subscription.sid, "uuid:sub-1");
    assert_eq!(subscription.timeout_seconds, 1800);

    assert_eq!(device.renew(RENDERING_CONTROL, &subscription.sid).unwrap(), 1800);
    device.unsubscribe(RENDERING_CONTROL, &subscription.sid).unwrap();

    let calls = h.services.calls();
    assert!(calls.iter().all(|call| call.url == "http://10.0.0.2:80/rc/event"));
    let kinds: Vec<&str> = calls.iter().map(|call| call.kind.as_str()).collect();
    assert_eq!(kinds, vec!["SUBSCRIBE", "RENEW", "UNSUBSCRIBE"]);
}

#[test]
fn test_unknown_service_is_an_error() {
    let h = harness();
    let (_list, device) = ready_device(&h);

    let result = device.invoke_action("urn:schemas-upnp-org:service:AVTransport:1", "Play", &[]);
    assert!(matches!(result, Err(DeviceError::ServiceNotFound { .. })));
    assert!(h.services.calls().is_empty());
}

#[test]
fn test_removed_device_keeps_its_description() {
    let h = harness();
    let (list, device) = ready_device(&h);
    list.remove("u1");

    assert!(device.is_ready());
    assert_eq!(
        device.get_attribute("Upnp.FriendlyName").unwrap().as_deref(),
        Some("Kitchen")
    );
}
