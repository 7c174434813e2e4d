//! Device registry: the mutable set of known devices
//!
//! Newly added devices are prepended, so manually added and freshly detected
//! devices come first in every scan (and therefore in every selection).

use tracing::{debug, info};

use crate::device::{Device, DeviceId};
use crate::error::{ChordError, Result};
use crate::selector::Selector;

#[derive(Debug, Clone, Default)]
pub struct DeviceRegistry {
    devices: Vec<Device>,
}

impl DeviceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a registry keeping the given order
    pub fn from_devices(devices: Vec<Device>) -> Self {
        Self { devices }
    }

    /// Prepend a device, rejecting id collisions
    pub fn add(&mut self, device: Device) -> Result<()> {
        if self.contains(&device.id) {
            return Err(ChordError::DuplicateDeviceId(device.id));
        }
        info!(device = %device.id, class = %device.class, live = device.live, "Device added");
        self.devices.insert(0, device);
        Ok(())
    }

    /// Remove a device by id
    pub fn remove(&mut self, id: &DeviceId) -> Option<Device> {
        let idx = self.devices.iter().position(|d| &d.id == id)?;
        debug!(device = %id, "Device removed");
        Some(self.devices.remove(idx))
    }

    pub fn contains(&self, id: &DeviceId) -> bool {
        self.devices.iter().any(|d| &d.id == id)
    }

    pub fn find_by_id(&self, id: &DeviceId) -> Option<&Device> {
        self.devices.iter().find(|d| &d.id == id)
    }

    pub fn find_by_id_mut(&mut self, id: &DeviceId) -> Option<&mut Device> {
        self.devices.iter_mut().find(|d| &d.id == id)
    }

    /// Ids of devices attached at a joint, in registry order
    pub fn find_by_joint(&self, joint: &str) -> Vec<DeviceId> {
        self.ids_where(|d| d.joint.as_deref() == Some(joint))
    }

    /// Ids of devices of a type, in registry order
    pub fn find_by_type(&self, device_type: &str) -> Vec<DeviceId> {
        self.ids_where(|d| d.class.as_str().eq_ignore_ascii_case(device_type))
    }

    /// Ids of devices matching a compiled selector, in registry order
    pub fn query(&self, selector: &Selector) -> Vec<DeviceId> {
        self.ids_where(|d| selector.matches(d))
    }

    fn ids_where<F: Fn(&Device) -> bool>(&self, pred: F) -> Vec<DeviceId> {
        self.devices
            .iter()
            .filter(|d| pred(d))
            .map(|d| d.id.clone())
            .collect()
    }

    pub fn devices(&self) -> &[Device] {
        &self.devices
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }
}
