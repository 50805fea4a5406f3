//! Device change notification
//!
//! Two host listeners per stream: one for the data source of the bound
//! device and one for the system default device of the stream's direction.
//! Both route to the stream's device-changed callback.

use std::sync::{Arc, Weak};

use super::stream::StreamInner;
use crate::host::{
    AudioHost, DeviceId, Direction, HostResult, ListenerId, ObjectId, PropertyAddress,
    PropertyListener, PropertySelector, Scope,
};

/// Listener registrations owned by a stream
pub(crate) struct DeviceChangeListeners {
    ids: Vec<ListenerId>,
}

impl DeviceChangeListeners {
    /// Install both listeners. If the second fails the first is removed
    /// again, so either both are installed or neither.
    pub fn install(
        host: &dyn AudioHost,
        device: DeviceId,
        direction: Direction,
        listener: Arc<dyn PropertyListener>,
    ) -> HostResult<Self> {
        let (scope, default_selector) = match direction {
            Direction::Output => (Scope::Output, PropertySelector::DefaultOutputDevice),
            Direction::Input => (Scope::Input, PropertySelector::DefaultInputDevice),
        };

        let data_source = host.add_property_listener(
            ObjectId::Device(device),
            PropertyAddress::new(PropertySelector::DataSource, scope),
            Arc::clone(&listener),
        )?;

        let default_device = match host.add_property_listener(
            ObjectId::System,
            PropertyAddress::new(default_selector, Scope::Global),
            listener,
        ) {
            Ok(id) => id,
            Err(e) => {
                if let Err(remove) = host.remove_property_listener(data_source) {
                    tracing::warn!("Removing data source listener: {}", remove);
                }
                return Err(e);
            }
        };

        Ok(Self {
            ids: vec![data_source, default_device],
        })
    }

    /// Remove every listener. Failures are logged and do not stop removal
    /// of the rest.
    pub fn uninstall(self, host: &dyn AudioHost) {
        for id in self.ids {
            if let Err(e) = host.remove_property_listener(id) {
                tracing::warn!("Removing device change listener {:?}: {}", id, e);
            }
        }
    }
}

/// Host-facing listener that forwards matching notifications to a stream
pub(crate) struct DeviceChangeRouter {
    stream: Weak<StreamInner>,
}

impl DeviceChangeRouter {
    pub fn new(stream: Weak<StreamInner>) -> Self {
        Self { stream }
    }
}

impl PropertyListener for DeviceChangeRouter {
    fn on_properties_changed(&self, _object: ObjectId, addresses: &[PropertyAddress]) {
        let Some(inner) = self.stream.upgrade() else {
            return;
        };
        for address in addresses {
            match address.selector {
                PropertySelector::DefaultOutputDevice
                | PropertySelector::DefaultInputDevice
                | PropertySelector::DataSource => {
                    tracing::debug!("Device change: {:?}", address.selector);
                    inner.notify_device_changed();
                }
            }
        }
    }
}
