//! redb table definitions for the routerhost state store.
//!
//! Each table uses `&str` keys and `&[u8]` values (JSON-serialized domain types).
//! Composite keys follow the pattern `{parent_id}:{child_id}`.

use redb::TableDefinition;

/// Every table shares the same key/value layout.
pub type JsonTable = TableDefinition<'static, &'static str, &'static [u8]>;

/// Hosting-device templates keyed by `{template_id}`.
pub const TEMPLATES: JsonTable = TableDefinition::new("templates");

/// Device credentials keyed by `{credential_id}`.
pub const CREDENTIALS: JsonTable = TableDefinition::new("credentials");

/// Hosting devices keyed by `{hosting_device_id}`.
pub const HOSTING_DEVICES: JsonTable = TableDefinition::new("hosting_devices");

/// Router types keyed by `{router_type_id}`.
pub const ROUTER_TYPES: JsonTable = TableDefinition::new("router_types");

/// Logical routers keyed by `{router_id}`.
pub const ROUTERS: JsonTable = TableDefinition::new("routers");

/// Router-to-hosting-device bindings keyed by `{router_id}`.
pub const BINDINGS: JsonTable = TableDefinition::new("bindings");

/// Slot allocations keyed by `{hosting_device_id}:{logical_resource_id}`.
pub const SLOT_ALLOCATIONS: JsonTable = TableDefinition::new("slot_allocations");

/// Hosting-port bindings keyed by `{router_id}:{port_id}`.
pub const HOSTING_PORT_BINDINGS: JsonTable = TableDefinition::new("hosting_port_bindings");

pub(crate) const ALL: [JsonTable; 8] = [
    TEMPLATES,
    CREDENTIALS,
    HOSTING_DEVICES,
    ROUTER_TYPES,
    ROUTERS,
    BINDINGS,
    SLOT_ALLOCATIONS,
    HOSTING_PORT_BINDINGS,
];
