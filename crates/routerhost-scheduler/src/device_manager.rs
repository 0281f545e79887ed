//! Hosting device registry — templates, credentials, devices, slots and pools.
//!
//! Every write goes through a store transaction. Integrity conflicts raised
//! by the store are translated into the `...InUse` / `AlreadyExists`
//! variants of [`SchedulerError`] here, so no caller ever sees a raw
//! storage conflict.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError};

use routerhost_core::epoch_secs;
use routerhost_placement::{PoolAdjustment, PoolSnapshot, SlotRequest, available_slots, pool_adjustment};
use routerhost_state::{
    CredentialInfo, DeviceCredential, DeviceStatus, HostCategory, HostingDevice, HostingDeviceInfo,
    HostingDeviceTemplate, StateReader, StateResult, StateStore, StoreTxn, TemplateId,
};
use serde::Deserialize;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};

use crate::drivers::{DriverRegistry, HostingDeviceDriver};
use crate::error::{SchedulerError, SchedulerResult};
use crate::slots::{SlotGrant, acquire_hosting_device_slots, release_hosting_device_slots};

/// Request to re-evaluate the pool of one template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolJob {
    pub template_id: TemplateId,
    /// Slots that could not be served and triggered the job.
    pub requested: u32,
}

/// Mutable fields of a hosting device.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct HostingDeviceUpdate {
    pub name: Option<String>,
    pub admin_state_up: Option<bool>,
    pub management_ip_address: Option<String>,
    pub protocol_port: Option<u16>,
    pub cfg_agent_id: Option<String>,
    pub auto_delete: Option<bool>,
}

#[derive(Clone)]
pub struct HostingDeviceManager {
    store: StateStore,
    drivers: Arc<DriverRegistry>,
    pool_jobs: mpsc::UnboundedSender<PoolJob>,
    /// Templates whose pool is being adjusted right now.
    maintaining: Arc<Mutex<HashSet<TemplateId>>>,
    default_booting_time: u64,
}

impl HostingDeviceManager {
    /// Create the manager and the receiving end of its pool-job queue,
    /// to be handed to [`run_pool_maintainer`](Self::run_pool_maintainer).
    pub fn new(
        store: StateStore,
        drivers: Arc<DriverRegistry>,
        default_booting_time: u64,
    ) -> (Self, mpsc::UnboundedReceiver<PoolJob>) {
        let (pool_jobs, rx) = mpsc::unbounded_channel();
        let manager = Self {
            store,
            drivers,
            pool_jobs,
            maintaining: Arc::new(Mutex::new(HashSet::new())),
            default_booting_time,
        };
        (manager, rx)
    }

    pub fn store(&self) -> &StateStore {
        &self.store
    }

    pub fn drivers(&self) -> &DriverRegistry {
        &self.drivers
    }

    // ── Templates ──────────────────────────────────────────────────

    pub fn create_template(&self, mut template: HostingDeviceTemplate) -> SchedulerResult<HostingDeviceTemplate> {
        if template.id.is_empty() {
            template.id = uuid::Uuid::new_v4().to_string();
        }
        self.store.transaction(|txn| {
            if let Some(cred) = &template.default_credentials_id {
                if txn.get_credential(cred)?.is_none() {
                    return Err(SchedulerError::CredentialNotFound(cred.clone()));
                }
            }
            txn.insert_template(&template).map_err(|e| {
                SchedulerError::on_conflict(e, || SchedulerError::AlreadyExists(template.id.clone()))
            })
        })?;
        info!(template_id = %template.id, name = %template.name, "hosting device template created");
        Ok(template)
    }

    /// Look a template up by id, falling back to its name.
    pub fn get_template(&self, id_or_name: &str) -> SchedulerResult<HostingDeviceTemplate> {
        if let Some(template) = self.store.get_template(id_or_name)? {
            return Ok(template);
        }
        let mut matches: Vec<_> = self
            .store
            .list_templates()?
            .into_iter()
            .filter(|t| t.name == id_or_name)
            .collect();
        match matches.len() {
            0 => Err(SchedulerError::TemplateNotFound(id_or_name.to_string())),
            1 => Ok(matches.remove(0)),
            n => {
                error!(name = %id_or_name, count = n, "multiple hosting device templates share a name");
                Err(SchedulerError::TemplateNotFound(id_or_name.to_string()))
            }
        }
    }

    pub fn list_templates(&self) -> SchedulerResult<Vec<HostingDeviceTemplate>> {
        Ok(self.store.list_templates()?)
    }

    pub fn delete_template(&self, id: &str) -> SchedulerResult<()> {
        let existed = self.store.transaction(|txn| {
            txn.delete_template(id)
                .map_err(|e| SchedulerError::on_conflict(e, || SchedulerError::TemplateInUse(id.to_string())))
        })?;
        if !existed {
            return Err(SchedulerError::TemplateNotFound(id.to_string()));
        }
        info!(template_id = %id, "hosting device template deleted");
        Ok(())
    }

    // ── Credentials ────────────────────────────────────────────────

    pub fn create_credential(&self, mut credential: DeviceCredential) -> SchedulerResult<DeviceCredential> {
        if credential.id.is_empty() {
            credential.id = uuid::Uuid::new_v4().to_string();
        }
        self.store.transaction(|txn| {
            txn.insert_credential(&credential).map_err(|e| {
                SchedulerError::on_conflict(e, || SchedulerError::AlreadyExists(credential.id.clone()))
            })
        })?;
        info!(credentials_id = %credential.id, "device credential created");
        Ok(credential)
    }

    pub fn list_credentials(&self) -> SchedulerResult<Vec<DeviceCredential>> {
        Ok(self.store.list_credentials()?)
    }

    pub fn delete_credential(&self, id: &str) -> SchedulerResult<()> {
        let existed = self.store.transaction(|txn| {
            txn.delete_credential(id)
                .map_err(|e| SchedulerError::on_conflict(e, || SchedulerError::CredentialInUse(id.to_string())))
        })?;
        if !existed {
            return Err(SchedulerError::CredentialNotFound(id.to_string()));
        }
        Ok(())
    }

    // ── Hosting devices ────────────────────────────────────────────

    /// Register a device. Credentials and protocol port default to the
    /// template's.
    pub fn create_hosting_device(&self, mut device: HostingDevice) -> SchedulerResult<HostingDevice> {
        if device.id.is_empty() {
            device.id = uuid::Uuid::new_v4().to_string();
        }
        if device.created_at == 0 {
            device.created_at = epoch_secs();
        }
        self.store.transaction(|txn| {
            let template = txn
                .get_template(&device.template_id)?
                .ok_or_else(|| SchedulerError::TemplateNotFound(device.template_id.clone()))?;
            if device.credentials_id.is_none() {
                device.credentials_id = template.default_credentials_id.clone();
            }
            if device.protocol_port.is_none() {
                device.protocol_port = template.protocol_port;
            }
            if let Some(cred) = &device.credentials_id {
                if txn.get_credential(cred)?.is_none() {
                    return Err(SchedulerError::CredentialNotFound(cred.clone()));
                }
            }
            txn.insert_hosting_device(&device).map_err(|e| {
                SchedulerError::on_conflict(e, || SchedulerError::AlreadyExists(device.id.clone()))
            })
        })?;
        info!(
            hosting_device_id = %device.id,
            template_id = %device.template_id,
            "hosting device created"
        );
        Ok(device)
    }

    pub fn get_hosting_device(&self, id: &str) -> SchedulerResult<HostingDevice> {
        self.store
            .get_hosting_device(id)?
            .ok_or_else(|| SchedulerError::HostingDeviceNotFound(id.to_string()))
    }

    pub fn list_hosting_devices(&self) -> SchedulerResult<Vec<HostingDevice>> {
        Ok(self.store.list_hosting_devices()?)
    }

    pub fn update_hosting_device(&self, id: &str, update: HostingDeviceUpdate) -> SchedulerResult<HostingDevice> {
        let device = self.store.transaction(|txn| {
            let mut device = txn
                .get_hosting_device(id)?
                .ok_or_else(|| SchedulerError::HostingDeviceNotFound(id.to_string()))?;
            if let Some(name) = update.name {
                device.name = name;
            }
            if let Some(up) = update.admin_state_up {
                device.admin_state_up = up;
            }
            if let Some(ip) = update.management_ip_address {
                device.management_ip_address = Some(ip);
            }
            if let Some(port) = update.protocol_port {
                device.protocol_port = Some(port);
            }
            if let Some(agent) = update.cfg_agent_id {
                device.cfg_agent_id = Some(agent);
            }
            if let Some(auto_delete) = update.auto_delete {
                device.auto_delete = auto_delete;
            }
            txn.put_hosting_device(&device)?;
            Ok::<_, SchedulerError>(device)
        })?;
        info!(hosting_device_id = %id, admin_state_up = device.admin_state_up, "hosting device updated");
        Ok(device)
    }

    /// Delete a device record. Fails with `HostingDeviceInUse` while routers
    /// are bound to it or it holds slot allocations.
    pub fn delete_hosting_device(&self, id: &str) -> SchedulerResult<()> {
        let existed = self.store.transaction(|txn| {
            txn.delete_hosting_device(id).map_err(|e| {
                SchedulerError::on_conflict(e, || SchedulerError::HostingDeviceInUse(id.to_string()))
            })
        })?;
        if !existed {
            return Err(SchedulerError::HostingDeviceNotFound(id.to_string()));
        }
        info!(hosting_device_id = %id, "hosting device deleted");
        Ok(())
    }

    /// Device details as shipped to configuration agents.
    pub fn hosting_device_info<R: StateReader>(
        &self,
        reader: &R,
        device: &HostingDevice,
    ) -> SchedulerResult<HostingDeviceInfo> {
        let template = reader
            .get_template(&device.template_id)?
            .ok_or_else(|| SchedulerError::TemplateNotFound(device.template_id.clone()))?;
        let credentials = match &device.credentials_id {
            Some(id) => reader.get_credential(id)?.map(|c| CredentialInfo {
                credentials_id: c.id,
                user_name: c.user_name,
                password: c.password,
            }),
            None => None,
        };
        Ok(HostingDeviceInfo {
            id: device.id.clone(),
            name: device.name.clone(),
            template_id: device.template_id.clone(),
            host_category: template.host_category,
            service_types: template.service_types.clone(),
            management_ip_address: device.management_ip_address.clone(),
            protocol_port: device.protocol_port,
            created_at: device.created_at,
            booting_time: template.booting_time.unwrap_or(self.default_booting_time),
            status: device.status,
            credentials,
        })
    }

    // ── Slots ──────────────────────────────────────────────────────

    /// Acquire slots inside `txn`, then ask for a pool re-evaluation.
    pub fn acquire_slots(
        &self,
        txn: &StoreTxn,
        device: &HostingDevice,
        template: &HostingDeviceTemplate,
        request: &SlotRequest<'_>,
    ) -> StateResult<bool> {
        let grant = acquire_hosting_device_slots(txn, device, template, request)?;
        match grant {
            SlotGrant::Granted => self.dispatch_pool_job(template, 0),
            SlotGrant::NoCapacity => self.dispatch_pool_job(template, request.num),
            SlotGrant::Conflict => {}
        }
        Ok(grant.is_granted())
    }

    pub fn release_slots(
        &self,
        txn: &StoreTxn,
        device: &HostingDevice,
        template: &HostingDeviceTemplate,
        resource_id: &str,
        num: u32,
    ) -> StateResult<bool> {
        let released = release_hosting_device_slots(txn, device, resource_id, num)?;
        if released {
            self.dispatch_pool_job(template, 0);
        }
        Ok(released)
    }

    /// Fire-and-forget signal that no device of `template` could take
    /// `requested` more slots.
    pub fn report_hosting_device_shortage(&self, template: &HostingDeviceTemplate, requested: u32) {
        info!(template_id = %template.id, requested, "hosting device shortage reported");
        self.dispatch_pool_job(template, requested);
    }

    fn dispatch_pool_job(&self, template: &HostingDeviceTemplate, requested: u32) {
        if template.host_category != HostCategory::Vm {
            return;
        }
        let job = PoolJob {
            template_id: template.id.clone(),
            requested,
        };
        if self.pool_jobs.send(job).is_err() {
            debug!(template_id = %template.id, "pool job dropped, maintainer not running");
        }
    }

    // ── Pool maintenance ───────────────────────────────────────────

    /// Grow or shrink the device pool of one template so that roughly
    /// `desired_slots_free` slots stay available. Concurrent calls for the
    /// same template return `Steady` without doing anything.
    pub async fn maintain_pool(&self, template_id: &str, requested: u32) -> SchedulerResult<PoolAdjustment> {
        let Some(_guard) = PoolGuard::acquire(&self.maintaining, template_id) else {
            debug!(template_id, "pool maintenance already running");
            return Ok(PoolAdjustment::Steady);
        };

        let template = self.get_template(template_id)?;
        let devices = self.store.list_hosting_devices_for_template(&template.id)?;
        let allocations: Vec<_> = self
            .store
            .list_slot_allocations()?
            .into_iter()
            .filter(|a| a.template_id == template.id)
            .collect();
        let snapshot = PoolSnapshot {
            category: template.host_category,
            capacity: template.slot_capacity,
            desired_free: template.desired_slots_free,
            available: available_slots(&template, &devices, &allocations),
            requested,
        };
        let adjustment = pool_adjustment(&snapshot);
        debug!(template_id, ?snapshot, ?adjustment, "pool evaluated");

        match adjustment {
            PoolAdjustment::Steady => {}
            PoolAdjustment::Grow(count) => self.grow_pool(&template, count).await?,
            PoolAdjustment::Shrink(count) => self.shrink_pool(&template, count).await?,
        }
        Ok(adjustment)
    }

    async fn grow_pool(&self, template: &HostingDeviceTemplate, count: u32) -> SchedulerResult<()> {
        let driver = self.device_driver(template)?;
        for _ in 0..count {
            let provisioned = driver
                .create_device(template)
                .await
                .map_err(|e| SchedulerError::Driver(e.to_string()))?;
            let id = uuid::Uuid::new_v4().to_string();
            let device = HostingDevice {
                name: format!("{}_{}", template.name, &id[..8]),
                id,
                tenant_id: String::new(),
                template_id: template.id.clone(),
                credentials_id: template.default_credentials_id.clone(),
                device_id: provisioned.device_id,
                admin_state_up: true,
                management_port_id: provisioned.management_port_id,
                management_ip_address: provisioned.management_ip_address,
                protocol_port: template.protocol_port,
                cfg_agent_id: None,
                created_at: epoch_secs(),
                status: DeviceStatus::Active,
                tenant_bound: None,
                auto_delete: true,
            };
            self.store.transaction(|txn| txn.insert_hosting_device(&device))?;
            info!(hosting_device_id = %device.id, template_id = %template.id, "pool grown by one device");
        }
        Ok(())
    }

    async fn shrink_pool(&self, template: &HostingDeviceTemplate, count: u32) -> SchedulerResult<()> {
        let mut idle = Vec::new();
        for device in self.store.list_hosting_devices_for_template(&template.id)? {
            let unused = self.store.list_slot_allocations_for_device(&device.id)?.is_empty()
                && self.store.list_bindings_for_device(&device.id)?.is_empty();
            if is_pool_disposable(&device) && unused {
                idle.push(device);
            }
        }
        // Youngest first.
        idle.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| b.id.cmp(&a.id)));

        let driver = self.device_driver(template)?;
        for device in idle.into_iter().take(count as usize) {
            let Some(removed) = self.remove_unused_device(&device.id, is_pool_disposable)? else {
                warn!(hosting_device_id = %device.id, "device got used while shrinking pool, kept");
                continue;
            };
            info!(hosting_device_id = %removed.id, template_id = %template.id, "pool shrunk by one device");
            if let Err(e) = driver.delete_device(&removed).await {
                error!(hosting_device_id = %removed.id, error = %e, "driver failed to delete pool device");
            }
        }
        Ok(())
    }

    /// Delete a device record if it is still `eligible` and holds no
    /// bindings or slot allocations, all checked in one transaction.
    /// Returns the deleted record, or `None` when the device was kept.
    fn remove_unused_device(
        &self,
        id: &str,
        eligible: fn(&HostingDevice) -> bool,
    ) -> SchedulerResult<Option<HostingDevice>> {
        let removed = self.store.transaction(|txn| -> SchedulerResult<Option<HostingDevice>> {
            let Some(current) = txn.get_hosting_device(id)? else {
                return Ok(None);
            };
            if !eligible(&current) {
                return Ok(None);
            }
            match txn.delete_hosting_device(id) {
                Ok(_) => Ok(Some(current)),
                Err(e) if e.is_conflict() => Ok(None),
                Err(e) => Err(e.into()),
            }
        })?;
        Ok(removed)
    }

    fn device_driver(&self, template: &HostingDeviceTemplate) -> SchedulerResult<Arc<dyn HostingDeviceDriver>> {
        self.drivers.device_driver(&template.device_driver).ok_or_else(|| {
            SchedulerError::Driver(format!(
                "no hosting device driver named {} for template {}",
                template.device_driver, template.id
            ))
        })
    }

    /// Serve pool jobs until shutdown is signalled or all senders are gone.
    pub async fn run_pool_maintainer(
        self,
        mut jobs: mpsc::UnboundedReceiver<PoolJob>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        info!("pool maintainer started");
        loop {
            tokio::select! {
                job = jobs.recv() => {
                    let Some(job) = job else { break };
                    if let Err(e) = self.maintain_pool(&job.template_id, job.requested).await {
                        warn!(template_id = %job.template_id, error = %e, "pool maintenance failed");
                    }
                }
                _ = shutdown.changed() => {
                    info!("pool maintainer shutting down");
                    break;
                }
            }
        }
    }

    // ── Dead devices ───────────────────────────────────────────────

    /// Dispose of a device that stopped responding. Auto-deleted VMs are
    /// removed through their driver; everything else is marked `Dead`.
    /// Returns `true` when the device record was deleted.
    pub async fn process_non_responsive_device(&self, device: &HostingDevice) -> SchedulerResult<bool> {
        let template = self.store.get_template(&device.template_id)?;
        let deletable = device.auto_delete
            && template
                .as_ref()
                .is_some_and(|t| t.host_category == HostCategory::Vm);

        if deletable {
            if let Some(template) = &template {
                match self.device_driver(template) {
                    Ok(driver) => match self.remove_unused_device(&device.id, |_| true)? {
                        Some(removed) => {
                            info!(hosting_device_id = %removed.id, "non-responsive device deleted");
                            if let Err(e) = driver.delete_device(&removed).await {
                                error!(hosting_device_id = %removed.id, error = %e, "driver failed to delete device");
                            }
                            self.dispatch_pool_job(template, 0);
                            return Ok(true);
                        }
                        None => {
                            warn!(hosting_device_id = %device.id, "non-responsive device still referenced");
                        }
                    },
                    Err(e) => warn!(hosting_device_id = %device.id, error = %e, "cannot delete device"),
                }
            }
        }

        self.store.transaction(|txn| {
            if let Some(mut current) = txn.get_hosting_device(&device.id)? {
                current.status = DeviceStatus::Dead;
                txn.put_hosting_device(&current)?;
            }
            Ok::<_, SchedulerError>(())
        })?;
        info!(hosting_device_id = %device.id, "hosting device marked dead");
        Ok(false)
    }
}

/// Pool devices that shrinking may remove once they are idle.
fn is_pool_disposable(device: &HostingDevice) -> bool {
    device.admin_state_up && device.tenant_bound.is_none() && device.auto_delete
}

/// Marks a template as under maintenance for as long as it lives.
struct PoolGuard {
    set: Arc<Mutex<HashSet<TemplateId>>>,
    template_id: TemplateId,
}

impl PoolGuard {
    fn acquire(set: &Arc<Mutex<HashSet<TemplateId>>>, template_id: &str) -> Option<Self> {
        let inserted = set
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(template_id.to_string());
        inserted.then(|| Self {
            set: set.clone(),
            template_id: template_id.to_string(),
        })
    }
}

impl Drop for PoolGuard {
    fn drop(&mut self) {
        self.set
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.template_id);
    }
}
