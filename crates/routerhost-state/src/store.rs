//! StateStore — redb-backed record store for routerhost.
//!
//! Reads go through the [`StateReader`] trait, implemented both by the
//! store itself (one read transaction per call) and by [`StoreTxn`], the
//! handle passed to [`StateStore::transaction`]. All writes happen inside
//! a `StoreTxn`, so a binding mutation and its slot allocation commit or
//! abort together. redb admits one write transaction at a time, which
//! serializes concurrent scheduling attempts on the same rows.

use std::path::Path;
use std::sync::Arc;

use redb::{Database, ReadableDatabase, ReadableTable, WriteTransaction};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{debug, warn};

use crate::error::{StateError, StateResult};
use crate::tables::*;
use crate::types::*;

/// Convert any `Display` error into a `StateError` variant via a closure factory.
macro_rules! map_err {
    ($variant:ident) => {
        |e| StateError::$variant(e.to_string())
    };
}

fn encode<T: Serialize>(value: &T) -> StateResult<Vec<u8>> {
    serde_json::to_vec(value).map_err(map_err!(Serialize))
}

fn decode<T: DeserializeOwned>(bytes: &[u8]) -> StateResult<T> {
    serde_json::from_slice(bytes).map_err(map_err!(Deserialize))
}

fn read_one<T, R>(table: &R, key: &str) -> StateResult<Option<T>>
where
    T: DeserializeOwned,
    R: ReadableTable<&'static str, &'static [u8]>,
{
    match table.get(key).map_err(map_err!(Read))? {
        Some(guard) => Ok(Some(decode(guard.value())?)),
        None => Ok(None),
    }
}

/// Decode every row whose key starts with `prefix` (empty prefix: all rows).
fn read_prefix<T, R>(table: &R, prefix: &str) -> StateResult<Vec<T>>
where
    T: DeserializeOwned,
    R: ReadableTable<&'static str, &'static [u8]>,
{
    let mut results = Vec::new();
    for entry in table.iter().map_err(map_err!(Read))? {
        let (key, value) = entry.map_err(map_err!(Read))?;
        if key.value().starts_with(prefix) {
            results.push(decode(value.value())?);
        }
    }
    Ok(results)
}

// ── Reads ──────────────────────────────────────────────────────────

/// Typed read access shared by the store and open write transactions.
pub trait StateReader {
    fn get_json<T: DeserializeOwned>(&self, table: JsonTable, key: &str) -> StateResult<Option<T>>;

    fn list_json<T: DeserializeOwned>(&self, table: JsonTable, prefix: &str) -> StateResult<Vec<T>>;

    fn get_template(&self, id: &str) -> StateResult<Option<HostingDeviceTemplate>> {
        self.get_json(TEMPLATES, id)
    }

    fn list_templates(&self) -> StateResult<Vec<HostingDeviceTemplate>> {
        self.list_json(TEMPLATES, "")
    }

    fn get_credential(&self, id: &str) -> StateResult<Option<DeviceCredential>> {
        self.get_json(CREDENTIALS, id)
    }

    fn list_credentials(&self) -> StateResult<Vec<DeviceCredential>> {
        self.list_json(CREDENTIALS, "")
    }

    fn get_hosting_device(&self, id: &str) -> StateResult<Option<HostingDevice>> {
        self.get_json(HOSTING_DEVICES, id)
    }

    fn list_hosting_devices(&self) -> StateResult<Vec<HostingDevice>> {
        self.list_json(HOSTING_DEVICES, "")
    }

    fn list_hosting_devices_for_template(&self, template_id: &str) -> StateResult<Vec<HostingDevice>> {
        Ok(self
            .list_hosting_devices()?
            .into_iter()
            .filter(|d| d.template_id == template_id)
            .collect())
    }

    fn get_router_type(&self, id: &str) -> StateResult<Option<RouterType>> {
        self.get_json(ROUTER_TYPES, id)
    }

    fn list_router_types(&self) -> StateResult<Vec<RouterType>> {
        self.list_json(ROUTER_TYPES, "")
    }

    fn find_router_types_by_name(&self, name: &str) -> StateResult<Vec<RouterType>> {
        Ok(self
            .list_router_types()?
            .into_iter()
            .filter(|rt| rt.name == name)
            .collect())
    }

    fn get_router(&self, id: &str) -> StateResult<Option<Router>> {
        self.get_json(ROUTERS, id)
    }

    fn list_routers(&self) -> StateResult<Vec<Router>> {
        self.list_json(ROUTERS, "")
    }

    fn get_binding(&self, router_id: &str) -> StateResult<Option<RouterHostingDeviceBinding>> {
        self.get_json(BINDINGS, router_id)
    }

    fn list_bindings(&self) -> StateResult<Vec<RouterHostingDeviceBinding>> {
        self.list_json(BINDINGS, "")
    }

    fn list_bindings_for_device(
        &self,
        hosting_device_id: &str,
    ) -> StateResult<Vec<RouterHostingDeviceBinding>> {
        Ok(self
            .list_bindings()?
            .into_iter()
            .filter(|b| b.hosting_device_id.as_deref() == Some(hosting_device_id))
            .collect())
    }

    fn get_slot_allocation(
        &self,
        hosting_device_id: &str,
        logical_resource_id: &str,
    ) -> StateResult<Option<SlotAllocation>> {
        self.get_json(
            SLOT_ALLOCATIONS,
            &allocation_key(hosting_device_id, logical_resource_id),
        )
    }

    fn list_slot_allocations(&self) -> StateResult<Vec<SlotAllocation>> {
        self.list_json(SLOT_ALLOCATIONS, "")
    }

    fn list_slot_allocations_for_device(
        &self,
        hosting_device_id: &str,
    ) -> StateResult<Vec<SlotAllocation>> {
        // Ids may themselves contain the key separator.
        let allocations: Vec<SlotAllocation> =
            self.list_json(SLOT_ALLOCATIONS, &format!("{hosting_device_id}:"))?;
        Ok(allocations
            .into_iter()
            .filter(|a| a.hosting_device_id == hosting_device_id)
            .collect())
    }

    fn get_hosting_port_binding(
        &self,
        router_id: &str,
        port_id: &str,
    ) -> StateResult<Option<HostingPortBinding>> {
        self.get_json(HOSTING_PORT_BINDINGS, &port_binding_key(router_id, port_id))
    }

    fn list_hosting_port_bindings_for_router(
        &self,
        router_id: &str,
    ) -> StateResult<Vec<HostingPortBinding>> {
        let bindings: Vec<HostingPortBinding> =
            self.list_json(HOSTING_PORT_BINDINGS, &format!("{router_id}:"))?;
        Ok(bindings
            .into_iter()
            .filter(|b| b.router_id == router_id)
            .collect())
    }
}

// ── Store ──────────────────────────────────────────────────────────

/// Thread-safe state store backed by redb.
#[derive(Clone)]
pub struct StateStore {
    db: Arc<Database>,
}

impl StateStore {
    /// Open (or create) a persistent state store at the given path.
    pub fn open(path: &Path) -> StateResult<Self> {
        let db = Database::create(path).map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!(?path, "state store opened");
        Ok(store)
    }

    /// Create an ephemeral in-memory state store (for testing).
    pub fn open_in_memory() -> StateResult<Self> {
        let backend = redb::backends::InMemoryBackend::new();
        let db = Database::builder()
            .create_with_backend(backend)
            .map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!("in-memory state store opened");
        Ok(store)
    }

    fn ensure_tables(&self) -> StateResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        // Opening a table in a write transaction creates it if absent.
        for table in ALL {
            txn.open_table(table).map_err(map_err!(Table))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    /// Run `f` inside one write transaction: commit on `Ok`, abort on `Err`.
    pub fn transaction<T, E, F>(&self, f: F) -> Result<T, E>
    where
        F: FnOnce(&StoreTxn) -> Result<T, E>,
        E: From<StateError>,
    {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let handle = StoreTxn { txn };
        match f(&handle) {
            Ok(value) => {
                handle.txn.commit().map_err(map_err!(Transaction))?;
                Ok(value)
            }
            Err(e) => {
                if let Err(abort) = handle.txn.abort() {
                    warn!(error = %abort, "failed to abort transaction");
                }
                debug!("transaction aborted");
                Err(e)
            }
        }
    }
}

impl StateReader for StateStore {
    fn get_json<T: DeserializeOwned>(&self, table: JsonTable, key: &str) -> StateResult<Option<T>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(table).map_err(map_err!(Table))?;
        read_one(&table, key)
    }

    fn list_json<T: DeserializeOwned>(&self, table: JsonTable, prefix: &str) -> StateResult<Vec<T>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(table).map_err(map_err!(Table))?;
        read_prefix(&table, prefix)
    }
}

// ── Transactions ───────────────────────────────────────────────────

/// An open write transaction. Table handles are opened per call and
/// dropped before returning, so calls may be freely interleaved.
pub struct StoreTxn {
    txn: WriteTransaction,
}

impl StateReader for StoreTxn {
    fn get_json<T: DeserializeOwned>(&self, table: JsonTable, key: &str) -> StateResult<Option<T>> {
        let table = self.txn.open_table(table).map_err(map_err!(Table))?;
        read_one(&table, key)
    }

    fn list_json<T: DeserializeOwned>(&self, table: JsonTable, prefix: &str) -> StateResult<Vec<T>> {
        let table = self.txn.open_table(table).map_err(map_err!(Table))?;
        read_prefix(&table, prefix)
    }
}

impl StoreTxn {
    fn put_json<T: Serialize>(&self, table: JsonTable, key: &str, value: &T) -> StateResult<()> {
        let bytes = encode(value)?;
        let mut table = self.txn.open_table(table).map_err(map_err!(Table))?;
        table.insert(key, bytes.as_slice()).map_err(map_err!(Write))?;
        Ok(())
    }

    /// Insert a new row; an existing row under `key` is a conflict.
    fn insert_json<T: Serialize>(&self, table: JsonTable, key: &str, value: &T) -> StateResult<()> {
        let bytes = encode(value)?;
        let mut table = self.txn.open_table(table).map_err(map_err!(Table))?;
        if table.get(key).map_err(map_err!(Read))?.is_some() {
            return Err(StateError::Conflict(format!("key {key} already exists")));
        }
        table.insert(key, bytes.as_slice()).map_err(map_err!(Write))?;
        Ok(())
    }

    fn remove_json(&self, table: JsonTable, key: &str) -> StateResult<bool> {
        let mut table = self.txn.open_table(table).map_err(map_err!(Table))?;
        let existed = table.remove(key).map_err(map_err!(Write))?.is_some();
        Ok(existed)
    }

    // ── Templates ──────────────────────────────────────────────────

    pub fn insert_template(&self, template: &HostingDeviceTemplate) -> StateResult<()> {
        self.insert_json(TEMPLATES, &template.id, template)
    }

    pub fn put_template(&self, template: &HostingDeviceTemplate) -> StateResult<()> {
        self.put_json(TEMPLATES, &template.id, template)
    }

    /// Delete a template. Fails with `Conflict` while devices or router
    /// types still reference it.
    pub fn delete_template(&self, id: &str) -> StateResult<bool> {
        if !self.list_hosting_devices_for_template(id)?.is_empty() {
            return Err(StateError::Conflict(format!(
                "template {id} is referenced by hosting devices"
            )));
        }
        if self.list_router_types()?.iter().any(|rt| rt.template_id == id) {
            return Err(StateError::Conflict(format!(
                "template {id} is referenced by router types"
            )));
        }
        let existed = self.remove_json(TEMPLATES, id)?;
        debug!(template_id = %id, existed, "template deleted");
        Ok(existed)
    }

    // ── Credentials ────────────────────────────────────────────────

    pub fn insert_credential(&self, credential: &DeviceCredential) -> StateResult<()> {
        self.insert_json(CREDENTIALS, &credential.id, credential)
    }

    pub fn delete_credential(&self, id: &str) -> StateResult<bool> {
        let used_by_device = self
            .list_hosting_devices()?
            .iter()
            .any(|d| d.credentials_id.as_deref() == Some(id));
        let used_by_template = self
            .list_templates()?
            .iter()
            .any(|t| t.default_credentials_id.as_deref() == Some(id));
        if used_by_device || used_by_template {
            return Err(StateError::Conflict(format!("credential {id} is in use")));
        }
        self.remove_json(CREDENTIALS, id)
    }

    // ── Hosting devices ────────────────────────────────────────────

    pub fn insert_hosting_device(&self, device: &HostingDevice) -> StateResult<()> {
        self.insert_json(HOSTING_DEVICES, &device.id, device)
    }

    pub fn put_hosting_device(&self, device: &HostingDevice) -> StateResult<()> {
        self.put_json(HOSTING_DEVICES, &device.id, device)
    }

    /// Delete a device. Fails with `Conflict` while bindings or slot
    /// allocations still reference it.
    pub fn delete_hosting_device(&self, id: &str) -> StateResult<bool> {
        if !self.list_bindings_for_device(id)?.is_empty() {
            return Err(StateError::Conflict(format!(
                "hosting device {id} is referenced by router bindings"
            )));
        }
        if !self.list_slot_allocations_for_device(id)?.is_empty() {
            return Err(StateError::Conflict(format!(
                "hosting device {id} has slot allocations"
            )));
        }
        let existed = self.remove_json(HOSTING_DEVICES, id)?;
        debug!(hosting_device_id = %id, existed, "hosting device deleted");
        Ok(existed)
    }

    // ── Router types ───────────────────────────────────────────────

    pub fn insert_router_type(&self, router_type: &RouterType) -> StateResult<()> {
        self.insert_json(ROUTER_TYPES, &router_type.id, router_type)
    }

    pub fn delete_router_type(&self, id: &str) -> StateResult<bool> {
        if self.list_bindings()?.iter().any(|b| b.router_type_id == id) {
            return Err(StateError::Conflict(format!(
                "router type {id} is referenced by router bindings"
            )));
        }
        self.remove_json(ROUTER_TYPES, id)
    }

    // ── Routers ────────────────────────────────────────────────────

    pub fn insert_router(&self, router: &Router) -> StateResult<()> {
        self.insert_json(ROUTERS, &router.id, router)
    }

    pub fn put_router(&self, router: &Router) -> StateResult<()> {
        self.put_json(ROUTERS, &router.id, router)
    }

    pub fn delete_router(&self, id: &str) -> StateResult<bool> {
        self.remove_json(ROUTERS, id)
    }

    // ── Bindings ───────────────────────────────────────────────────

    /// Insert the binding of a new router; a second binding for the same
    /// router is a conflict.
    pub fn insert_binding(&self, binding: &RouterHostingDeviceBinding) -> StateResult<()> {
        self.insert_json(BINDINGS, &binding.router_id, binding)
    }

    pub fn put_binding(&self, binding: &RouterHostingDeviceBinding) -> StateResult<()> {
        self.put_json(BINDINGS, &binding.router_id, binding)
    }

    pub fn delete_binding(&self, router_id: &str) -> StateResult<bool> {
        self.remove_json(BINDINGS, router_id)
    }

    // ── Slot allocations ───────────────────────────────────────────

    pub fn put_slot_allocation(&self, allocation: &SlotAllocation) -> StateResult<()> {
        self.put_json(SLOT_ALLOCATIONS, &allocation.table_key(), allocation)
    }

    pub fn delete_slot_allocation(
        &self,
        hosting_device_id: &str,
        logical_resource_id: &str,
    ) -> StateResult<bool> {
        self.remove_json(
            SLOT_ALLOCATIONS,
            &allocation_key(hosting_device_id, logical_resource_id),
        )
    }

    // ── Hosting ports ──────────────────────────────────────────────

    pub fn put_hosting_port_binding(&self, binding: &HostingPortBinding) -> StateResult<()> {
        self.put_json(HOSTING_PORT_BINDINGS, &binding.table_key(), binding)
    }

    pub fn delete_hosting_port_binding(&self, router_id: &str, port_id: &str) -> StateResult<bool> {
        self.remove_json(HOSTING_PORT_BINDINGS, &port_binding_key(router_id, port_id))
    }

    /// Delete every hosting-port binding of a router. Returns number deleted.
    pub fn delete_hosting_port_bindings_for_router(&self, router_id: &str) -> StateResult<u32> {
        let bindings = self.list_hosting_port_bindings_for_router(router_id)?;
        let mut table = self
            .txn
            .open_table(HOSTING_PORT_BINDINGS)
            .map_err(map_err!(Table))?;
        for binding in &bindings {
            table
                .remove(binding.table_key().as_str())
                .map_err(map_err!(Write))?;
        }
        Ok(bindings.len() as u32)
    }
}
