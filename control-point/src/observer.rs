//! Device list observers

use std::sync::{mpsc, Arc};

use crate::device::UpnpDevice;
use crate::events::{DeviceListEvent, DeviceListEvents};

/// Told when a device becomes ready in, or leaves, an active device list.
///
/// Called from the thread that caused the change (description fetch,
/// timer or SSDP receiver), never with list locks held.
pub trait DeviceListObserver: Send + Sync {
    fn device_added(&self, device: &Arc<UpnpDevice>);

    fn device_removed(&self, udn: &str);
}

/// Observer forwarding every change into a channel
pub struct ChannelObserver {
    tx: mpsc::Sender<DeviceListEvent>,
}

impl DeviceListObserver for ChannelObserver {
    fn device_added(&self, device: &Arc<UpnpDevice>) {
        if self
            .tx
            .send(DeviceListEvent::Added(Arc::clone(device)))
            .is_err()
        {
            tracing::debug!("Device list events dropped, discarding add of {}", device.udn());
        }
    }

    fn device_removed(&self, udn: &str) {
        if self
            .tx
            .send(DeviceListEvent::Removed(udn.to_string()))
            .is_err()
        {
            tracing::debug!("Device list events dropped, discarding removal of {}", udn);
        }
    }
}

/// Observer paired with a blocking event iterator.
///
/// ```
/// use upnp_control_point::{channel_observer, DeviceListObserver};
///
/// let (observer, events) = channel_observer();
/// observer.device_removed("4d696e69-444c-164e-9d41-b827eb1a2b3c");
/// assert!(events.try_recv().is_some());
/// ```
pub fn channel_observer() -> (Arc<ChannelObserver>, DeviceListEvents) {
    let (tx, rx) = mpsc::channel();
    (Arc::new(ChannelObserver { tx }), DeviceListEvents::new(rx))
}
