//! Domain types for the routerhost state store.
//!
//! These types represent the persisted state of hosting-device templates,
//! credentials, hosting devices, router types, routers, bindings, slot
//! allocations and hosting ports, plus the read-only views handed to
//! configuration agents. All types are serializable to/from JSON for
//! storage in redb tables.

use serde::{Deserialize, Serialize};

pub type TemplateId = String;
pub type HostingDeviceId = String;
pub type RouterTypeId = String;
pub type RouterId = String;
pub type CredentialId = String;

// ── Templates ──────────────────────────────────────────────────────

/// Kind of appliance a template produces.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum HostCategory {
    Vm,
    Hardware,
    NetworkNode,
}

/// Capacity blueprint shared by every hosting device created from it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HostingDeviceTemplate {
    pub id: TemplateId,
    pub name: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
    pub host_category: HostCategory,
    /// Colon separated service types, e.g. "router:FW:VPN".
    #[serde(default)]
    pub service_types: String,
    #[serde(default)]
    pub image: Option<String>,
    #[serde(default)]
    pub flavor: Option<String>,
    #[serde(default)]
    pub default_credentials_id: Option<CredentialId>,
    #[serde(default)]
    pub configuration_mechanism: Option<String>,
    #[serde(default)]
    pub protocol_port: Option<u16>,
    /// Seconds a freshly created device needs before it answers probes.
    #[serde(default)]
    pub booting_time: Option<u64>,
    pub slot_capacity: u32,
    #[serde(default)]
    pub desired_slots_free: u32,
    /// Tenants allowed to use devices of this template. Empty means all.
    #[serde(default)]
    pub tenant_bound: Vec<String>,
    #[serde(default)]
    pub device_driver: String,
    #[serde(default)]
    pub plugging_driver: String,
}

impl HostingDeviceTemplate {
    /// Whether a router owned by `tenant_id` may use devices of this template.
    pub fn admits_tenant(&self, tenant_id: &str) -> bool {
        self.tenant_bound.is_empty() || self.tenant_bound.iter().any(|t| t == tenant_id)
    }
}

fn default_true() -> bool {
    true
}

// ── Credentials ────────────────────────────────────────────────────

/// Login credentials for a hosting device's management interface.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DeviceCredential {
    pub id: CredentialId,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub user_name: String,
    pub password: String,
    #[serde(default)]
    pub kind: String,
}

// ── Hosting devices ────────────────────────────────────────────────

/// Operational status of a hosting device.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum DeviceStatus {
    #[default]
    Active,
    NotResponding,
    Dead,
    Error,
}

/// A concrete appliance (VM or physical) able to host routers.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HostingDevice {
    pub id: HostingDeviceId,
    pub tenant_id: String,
    pub template_id: TemplateId,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub credentials_id: Option<CredentialId>,
    /// Vendor-side identity (serial number, VM uuid).
    #[serde(default)]
    pub device_id: Option<String>,
    #[serde(default = "default_true")]
    pub admin_state_up: bool,
    #[serde(default)]
    pub management_port_id: Option<String>,
    #[serde(default)]
    pub management_ip_address: Option<String>,
    #[serde(default)]
    pub protocol_port: Option<u16>,
    #[serde(default)]
    pub cfg_agent_id: Option<String>,
    /// Unix timestamp (seconds) when the device was created. Zero is
    /// replaced with the registration time.
    #[serde(default)]
    pub created_at: u64,
    #[serde(default)]
    pub status: DeviceStatus,
    /// Tenant the device is exclusively reserved for, if any.
    #[serde(default)]
    pub tenant_bound: Option<String>,
    #[serde(default)]
    pub auto_delete: bool,
}

// ── Router types ───────────────────────────────────────────────────

/// Named placement policy for a class of routers.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RouterType {
    pub id: RouterTypeId,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub template_id: TemplateId,
    #[serde(default = "default_true")]
    pub shared: bool,
    /// Slots one router of this type consumes on its hosting device.
    pub slot_need: u32,
    /// Scheduler strategy identifier, resolved through the scheduler registry.
    pub scheduler: String,
    #[serde(default)]
    pub driver: String,
    #[serde(default)]
    pub cfg_agent_driver: String,
}

// ── Routers ────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum RouterStatus {
    #[default]
    Active,
    Down,
    Error,
}

/// A port attaching a router to a network.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RouterPort {
    pub id: String,
    pub network_id: String,
    #[serde(default)]
    pub subnet_id: Option<String>,
    #[serde(default)]
    pub fixed_ip: Option<String>,
    /// Network segmentation technology, e.g. "vlan" or "vxlan".
    #[serde(default)]
    pub network_type: String,
    /// Filled in on sync views only, never persisted with the router.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hosting_info: Option<HostingInfo>,
}

/// Where a router port lands on its hosting device.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HostingInfo {
    pub hosting_port_id: String,
    #[serde(default)]
    pub hosting_port_name: String,
    pub segmentation_id: u32,
    pub network_type: String,
    /// Device-side interface, supplied by the plugging driver.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub physical_interface: Option<String>,
}

/// A tenant-facing logical router.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Router {
    pub id: RouterId,
    pub tenant_id: String,
    pub name: String,
    #[serde(default = "default_true")]
    pub admin_state_up: bool,
    #[serde(default)]
    pub status: RouterStatus,
    #[serde(default)]
    pub gw_port: Option<RouterPort>,
    #[serde(default)]
    pub interfaces: Vec<RouterPort>,
}

impl Router {
    /// Gateway port first, then interfaces in attachment order.
    pub fn ports(&self) -> impl Iterator<Item = &RouterPort> {
        self.gw_port.iter().chain(self.interfaces.iter())
    }
}

// ── Bindings & allocations ─────────────────────────────────────────

/// Persisted association of a router to its router type and device.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RouterHostingDeviceBinding {
    pub router_id: RouterId,
    pub router_type_id: RouterTypeId,
    /// `None` until the router is scheduled.
    pub hosting_device_id: Option<HostingDeviceId>,
    pub auto_schedule: bool,
    pub share_hosting_device: bool,
}

/// Slots held by one logical resource on one hosting device.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SlotAllocation {
    pub template_id: TemplateId,
    pub hosting_device_id: HostingDeviceId,
    pub logical_resource_id: String,
    /// Tenant owning the logical resource.
    pub logical_resource_owner: String,
    pub num_allocated: u32,
    /// Set when the owner holds the device exclusively.
    #[serde(default)]
    pub tenant_bound: Option<String>,
}

impl SlotAllocation {
    pub fn table_key(&self) -> String {
        allocation_key(&self.hosting_device_id, &self.logical_resource_id)
    }
}

pub fn allocation_key(hosting_device_id: &str, logical_resource_id: &str) -> String {
    format!("{hosting_device_id}:{logical_resource_id}")
}

/// Kind of router port a hosting port was allocated for.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PortType {
    Gateway,
    Interface,
}

/// Hosting port allocated by a plugging driver for a router port.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HostingPortBinding {
    pub router_id: RouterId,
    pub port_id: String,
    pub port_type: PortType,
    pub hosting_port_id: String,
    pub hosting_port_name: String,
    pub network_type: String,
    pub segmentation_tag: u32,
}

impl HostingPortBinding {
    pub fn table_key(&self) -> String {
        port_binding_key(&self.router_id, &self.port_id)
    }
}

pub fn port_binding_key(router_id: &str, port_id: &str) -> String {
    format!("{router_id}:{port_id}")
}

// ── Agent views ────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CredentialInfo {
    pub credentials_id: CredentialId,
    pub user_name: String,
    pub password: String,
}

/// Hosting-device snapshot sent to configuration agents and tracked by
/// the liveness layer.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HostingDeviceInfo {
    pub id: HostingDeviceId,
    pub name: String,
    pub template_id: TemplateId,
    pub host_category: HostCategory,
    pub service_types: String,
    pub management_ip_address: Option<String>,
    pub protocol_port: Option<u16>,
    pub created_at: u64,
    /// Seconds, already defaulted when the template carries none.
    pub booting_time: u64,
    pub status: DeviceStatus,
    #[serde(default)]
    pub credentials: Option<CredentialInfo>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RouterTypeInfo {
    pub id: RouterTypeId,
    pub name: String,
    pub cfg_agent_driver: String,
}

/// A router with its type and hosting context resolved.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RouterView {
    #[serde(flatten)]
    pub router: Router,
    pub router_type: RouterTypeInfo,
    pub hosting_device: Option<HostingDeviceInfo>,
}
