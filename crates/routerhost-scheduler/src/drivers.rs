//! Driver collaborators — opaque per-vendor and per-backend capabilities.
//!
//! Templates name their drivers (`device_driver`, `plugging_driver`);
//! the [`DriverRegistry`] resolves those names. The built-in `noop`
//! drivers stand in for real backends in tests and lab setups.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use async_trait::async_trait;
use routerhost_state::{HostingDevice, HostingDeviceTemplate, HostingInfo, Router, RouterPort};

/// Result of a hosting-port allocation by a plugging driver.
#[derive(Debug, Clone, PartialEq)]
pub struct AllocatedHostingPort {
    pub hosting_port_id: String,
    pub hosting_port_name: String,
    pub segmentation_tag: u32,
}

/// Connectivity backend attaching router ports to hosting devices.
#[async_trait]
pub trait PluggingDriver: Send + Sync {
    async fn allocate_hosting_port(
        &self,
        router: &Router,
        port: &RouterPort,
        device: &HostingDevice,
    ) -> anyhow::Result<AllocatedHostingPort>;

    async fn setup_logical_port_connectivity(
        &self,
        port: &RouterPort,
        device: &HostingDevice,
    ) -> anyhow::Result<()>;

    async fn teardown_logical_port_connectivity(
        &self,
        port: &RouterPort,
        device: &HostingDevice,
    ) -> anyhow::Result<()>;

    /// Add backend specific details to a port's hosting info.
    async fn extend_hosting_port_info(
        &self,
        port: &RouterPort,
        device: &HostingDevice,
        info: &mut HostingInfo,
    ) -> anyhow::Result<()>;
}

/// What a device driver reports back after spinning up a device.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProvisionedDevice {
    pub device_id: Option<String>,
    pub management_port_id: Option<String>,
    pub management_ip_address: Option<String>,
}

/// Lifecycle backend for hosting devices (VM manager, inventory system).
#[async_trait]
pub trait HostingDeviceDriver: Send + Sync {
    async fn create_device(&self, template: &HostingDeviceTemplate) -> anyhow::Result<ProvisionedDevice>;

    async fn delete_device(&self, device: &HostingDevice) -> anyhow::Result<()>;
}

/// Name → driver lookup for both driver kinds.
#[derive(Clone, Default)]
pub struct DriverRegistry {
    plugging: HashMap<String, Arc<dyn PluggingDriver>>,
    devices: HashMap<String, Arc<dyn HostingDeviceDriver>>,
}

impl DriverRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the built-in `noop` drivers.
    pub fn with_defaults() -> Self {
        Self::new()
            .with_plugging_driver("noop", Arc::new(NoopPluggingDriver::default()))
            .with_device_driver("noop", Arc::new(NoopDeviceDriver))
    }

    pub fn with_plugging_driver(mut self, name: &str, driver: Arc<dyn PluggingDriver>) -> Self {
        self.plugging.insert(name.to_string(), driver);
        self
    }

    pub fn with_device_driver(mut self, name: &str, driver: Arc<dyn HostingDeviceDriver>) -> Self {
        self.devices.insert(name.to_string(), driver);
        self
    }

    pub fn plugging_driver(&self, name: &str) -> Option<Arc<dyn PluggingDriver>> {
        self.plugging.get(name).cloned()
    }

    pub fn device_driver(&self, name: &str) -> Option<Arc<dyn HostingDeviceDriver>> {
        self.devices.get(name).cloned()
    }
}

// ── Built-in drivers ───────────────────────────────────────────────

/// Hands out VLAN tags sequentially and touches nothing.
#[derive(Debug)]
pub struct NoopPluggingDriver {
    next_tag: AtomicU32,
}

impl Default for NoopPluggingDriver {
    fn default() -> Self {
        Self {
            next_tag: AtomicU32::new(100),
        }
    }
}

#[async_trait]
impl PluggingDriver for NoopPluggingDriver {
    async fn allocate_hosting_port(
        &self,
        _router: &Router,
        port: &RouterPort,
        device: &HostingDevice,
    ) -> anyhow::Result<AllocatedHostingPort> {
        Ok(AllocatedHostingPort {
            hosting_port_id: format!("{}-{}", device.id, port.id),
            hosting_port_name: format!("hp-{}", port.id),
            segmentation_tag: self.next_tag.fetch_add(1, Ordering::Relaxed),
        })
    }

    async fn setup_logical_port_connectivity(
        &self,
        _port: &RouterPort,
        _device: &HostingDevice,
    ) -> anyhow::Result<()> {
        Ok(())
    }

    async fn teardown_logical_port_connectivity(
        &self,
        _port: &RouterPort,
        _device: &HostingDevice,
    ) -> anyhow::Result<()> {
        Ok(())
    }

    async fn extend_hosting_port_info(
        &self,
        _port: &RouterPort,
        _device: &HostingDevice,
        _info: &mut HostingInfo,
    ) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Registers devices without creating anything.
#[derive(Debug, Default)]
pub struct NoopDeviceDriver;

#[async_trait]
impl HostingDeviceDriver for NoopDeviceDriver {
    async fn create_device(&self, _template: &HostingDeviceTemplate) -> anyhow::Result<ProvisionedDevice> {
        Ok(ProvisionedDevice::default())
    }

    async fn delete_device(&self, _device: &HostingDevice) -> anyhow::Result<()> {
        Ok(())
    }
}
