//! Router binding manager — places routers on hosting devices.
//!
//! A binding moves from unbound to scheduled when a strategy picks a
//! device and its slots are acquired, and back to unbound on unschedule or
//! device removal. Routers of the namespace type never get a device.
//!
//! Every placement runs in one store transaction covering strategy
//! selection, slot acquisition and the binding update, so a failed attempt
//! leaves nothing behind. Backlog changes happen afterwards under the
//! backlog lock.

use std::sync::{Arc, OnceLock};
use std::time::Duration;

use routerhost_placement::SlotRequest;
use routerhost_state::{
    HostingDevice, HostingDeviceId, Router, RouterHostingDeviceBinding, RouterId, RouterType,
    RouterTypeId, RouterTypeInfo, RouterView, StateReader, StateStore, StoreTxn,
};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::backlog::{BacklogManager, RouterBacklog};
use crate::device_manager::HostingDeviceManager;
use crate::error::{SchedulerError, SchedulerResult};
use crate::notify::{AffectedRouters, AgentNotifier};
use crate::strategy::{SchedulerRegistry, SchedulingContext};

/// Result of one scheduling attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScheduleOutcome {
    /// The router was placed on this device.
    Scheduled(HostingDeviceId),
    AlreadyScheduled(HostingDeviceId),
    /// The router type needs no hosting device.
    NotApplicable,
    /// No device could take the router; it waits in the backlog.
    Backlogged,
}

impl ScheduleOutcome {
    pub fn hosting_device_id(&self) -> Option<&str> {
        match self {
            ScheduleOutcome::Scheduled(id) | ScheduleOutcome::AlreadyScheduled(id) => Some(id),
            _ => None,
        }
    }

    pub fn is_backlogged(&self) -> bool {
        matches!(self, ScheduleOutcome::Backlogged)
    }
}

pub struct BindingManager {
    store: StateStore,
    devices: HostingDeviceManager,
    registry: Arc<SchedulerRegistry>,
    backlog: Arc<BacklogManager>,
    notifier: Arc<dyn AgentNotifier>,
    namespace_type_name: String,
    namespace_type_id: OnceLock<RouterTypeId>,
}

impl BindingManager {
    pub fn new(
        devices: HostingDeviceManager,
        registry: Arc<SchedulerRegistry>,
        backlog: Arc<BacklogManager>,
        notifier: Arc<dyn AgentNotifier>,
        namespace_type_name: impl Into<String>,
    ) -> Self {
        Self {
            store: devices.store().clone(),
            devices,
            registry,
            backlog,
            notifier,
            namespace_type_name: namespace_type_name.into(),
            namespace_type_id: OnceLock::new(),
        }
    }

    pub fn store(&self) -> &StateStore {
        &self.store
    }

    pub fn devices(&self) -> &HostingDeviceManager {
        &self.devices
    }

    pub fn registry(&self) -> &SchedulerRegistry {
        &self.registry
    }

    pub fn backlog(&self) -> &BacklogManager {
        &self.backlog
    }

    pub fn notifier(&self) -> &Arc<dyn AgentNotifier> {
        &self.notifier
    }

    /// Id of the namespace router type, resolved once by name.
    pub fn namespace_router_type_id(&self) -> SchedulerResult<Option<RouterTypeId>> {
        if let Some(id) = self.namespace_type_id.get() {
            return Ok(Some(id.clone()));
        }
        let found = self.store.find_router_types_by_name(&self.namespace_type_name)?;
        match found.as_slice() {
            [] => Ok(None),
            [rt] => Ok(Some(self.namespace_type_id.get_or_init(|| rt.id.clone()).clone())),
            _ => {
                error!(name = %self.namespace_type_name, "multiple namespace router types");
                Err(SchedulerError::MultipleRouterTypes(self.namespace_type_name.clone()))
            }
        }
    }

    fn is_namespace_type(&self, router_type_id: &str) -> SchedulerResult<bool> {
        Ok(self.namespace_router_type_id()?.as_deref() == Some(router_type_id))
    }

    /// Look a router type up by id, falling back to its name.
    pub fn get_router_type(&self, id_or_name: &str) -> SchedulerResult<RouterType> {
        if let Some(rt) = self.store.get_router_type(id_or_name)? {
            return Ok(rt);
        }
        let mut found = self.store.find_router_types_by_name(id_or_name)?;
        match found.len() {
            0 => Err(SchedulerError::RouterTypeNotFound(id_or_name.to_string())),
            1 => Ok(found.remove(0)),
            n => {
                error!(name = %id_or_name, count = n, "multiple router types share a name");
                Err(SchedulerError::MultipleRouterTypes(id_or_name.to_string()))
            }
        }
    }

    // ── Scheduling ─────────────────────────────────────────────────

    /// Try to place one router. Runs in a single store transaction and
    /// does not touch the backlog.
    fn place(&self, router_id: &str) -> SchedulerResult<(Router, ScheduleOutcome)> {
        let namespace_id = self.namespace_router_type_id()?;
        self.store.transaction(|txn| {
            let router = txn
                .get_router(router_id)?
                .ok_or_else(|| SchedulerError::RouterNotFound(router_id.to_string()))?;
            let mut binding = load_binding(txn, router_id)?;

            if let Some(device_id) = &binding.hosting_device_id {
                return Ok((router, ScheduleOutcome::AlreadyScheduled(device_id.clone())));
            }
            if namespace_id.as_deref() == Some(binding.router_type_id.as_str()) {
                return Ok((router, ScheduleOutcome::NotApplicable));
            }

            let router_type = txn
                .get_router_type(&binding.router_type_id)?
                .ok_or_else(|| SchedulerError::RouterTypeNotFound(binding.router_type_id.clone()))?;
            let template = txn
                .get_template(&router_type.template_id)?
                .ok_or_else(|| SchedulerError::TemplateNotFound(router_type.template_id.clone()))?;
            let Some(strategy) = self.registry.for_router_type(&router_type) else {
                return Ok((router, ScheduleOutcome::Backlogged));
            };

            let ctx = SchedulingContext {
                router: &router,
                binding: &binding,
                router_type: &router_type,
                template: &template,
            };
            let Some(device) = strategy.schedule_router(txn, &ctx)? else {
                info!(router_id, router_type = %router_type.name, "no hosting device available");
                self.devices
                    .report_hosting_device_shortage(&template, router_type.slot_need);
                return Ok((router, ScheduleOutcome::Backlogged));
            };

            let request = SlotRequest {
                resource_id: &router.id,
                owner: &router.tenant_id,
                num: router_type.slot_need,
                exclusive: !binding.share_hosting_device,
            };
            if !self.devices.acquire_slots(txn, &device, &template, &request)? {
                info!(router_id, hosting_device_id = %device.id, "slot allocation failed");
                return Ok((router, ScheduleOutcome::Backlogged));
            }

            binding.hosting_device_id = Some(device.id.clone());
            txn.put_binding(&binding)?;
            info!(router_id, hosting_device_id = %device.id, "router scheduled");
            Ok((router, ScheduleOutcome::Scheduled(device.id)))
        })
    }

    fn apply(backlog: &mut RouterBacklog, router: Router, outcome: &ScheduleOutcome) {
        if outcome.is_backlogged() {
            backlog.insert(router);
        } else {
            backlog.remove(&router.id);
        }
    }

    /// Schedule a router if it is not already, backlogging it on failure.
    pub async fn schedule_router(&self, router_id: &str) -> SchedulerResult<ScheduleOutcome> {
        let (router, outcome) = self.place(router_id)?;
        let mut backlog = self.backlog.lock().await;
        Self::apply(&mut backlog, router, &outcome);
        Ok(outcome)
    }

    /// Take a router off its device. Returns `false` when it was not
    /// scheduled. Slots are released only after the strategy confirms.
    pub fn unschedule_router(&self, router_id: &str) -> SchedulerResult<bool> {
        self.store.transaction(|txn| {
            let router = txn
                .get_router(router_id)?
                .ok_or_else(|| SchedulerError::RouterNotFound(router_id.to_string()))?;
            let binding = load_binding(txn, router_id)?;
            self.unschedule_in(txn, &router, binding)
        })
    }

    /// Delete a router with its binding and hosting-port bindings,
    /// releasing its slots first when it is scheduled. The binding is read
    /// inside the same transaction so a concurrent placement is either
    /// seen and undone or fails on the missing router.
    pub async fn remove_router(&self, router_id: &str) -> SchedulerResult<Router> {
        let router = self.store.transaction(|txn| {
            let router = txn
                .get_router(router_id)?
                .ok_or_else(|| SchedulerError::RouterNotFound(router_id.to_string()))?;
            if let Some(binding) = txn.get_binding(router_id)? {
                self.unschedule_in(txn, &router, binding)?;
            }
            txn.delete_hosting_port_bindings_for_router(router_id)?;
            txn.delete_binding(router_id)?;
            txn.delete_router(router_id)?;
            Ok::<_, SchedulerError>(router)
        })?;
        self.backlog.unbacklog_router(router_id).await;
        Ok(router)
    }

    fn unschedule_in(
        &self,
        txn: &StoreTxn,
        router: &Router,
        mut binding: RouterHostingDeviceBinding,
    ) -> SchedulerResult<bool> {
        let Some(device_id) = binding.hosting_device_id.clone() else {
            return Ok(false);
        };
        let router_type = txn
            .get_router_type(&binding.router_type_id)?
            .ok_or_else(|| SchedulerError::RouterTypeNotFound(binding.router_type_id.clone()))?;
        let template = txn
            .get_template(&router_type.template_id)?
            .ok_or_else(|| SchedulerError::TemplateNotFound(router_type.template_id.clone()))?;

        if let Some(device) = txn.get_hosting_device(&device_id)? {
            let strategy = self.registry.for_router_type(&router_type).ok_or_else(|| {
                SchedulerError::Strategy(format!("no scheduler for router type {}", router_type.id))
            })?;
            let ctx = SchedulingContext {
                router,
                binding: &binding,
                router_type: &router_type,
                template: &template,
            };
            if !strategy.unschedule_router(txn, &ctx, &device)? {
                warn!(router_id = %router.id, hosting_device_id = %device_id, "scheduler refused to unschedule router");
                return Err(SchedulerError::Strategy(format!(
                    "{} refused to unschedule router {}",
                    strategy.name(),
                    router.id
                )));
            }
            if !self
                .devices
                .release_slots(txn, &device, &template, &router.id, router_type.slot_need)?
            {
                warn!(router_id = %router.id, hosting_device_id = %device_id, "slot release rejected");
            }
        }

        txn.delete_hosting_port_bindings_for_router(&router.id)?;
        binding.hosting_device_id = None;
        txn.put_binding(&binding)?;
        info!(router_id = %router.id, hosting_device_id = %device_id, "router unscheduled");
        Ok(true)
    }

    // ── Router views ───────────────────────────────────────────────

    /// The router with its type and hosting device details, scheduling it
    /// first when `schedule` is set and it has no device yet.
    pub async fn add_type_and_hosting_device_info(
        &self,
        router: Router,
        schedule: bool,
    ) -> SchedulerResult<RouterView> {
        if schedule {
            match self.schedule_router(&router.id).await {
                Ok(_) | Err(SchedulerError::RouterNotFound(_)) => {}
                Err(e) => return Err(e),
            }
        }
        self.router_view(router)
    }

    /// Build the view of a router from persisted state without scheduling.
    pub fn router_view(&self, router: Router) -> SchedulerResult<RouterView> {
        let binding = load_binding(&self.store, &router.id)?;
        let router_type = self.get_router_type(&binding.router_type_id)?;
        let namespace = self.is_namespace_type(&router_type.id)?;
        let hosting_device = match &binding.hosting_device_id {
            Some(_) if namespace => None,
            Some(device_id) => match self.store.get_hosting_device(device_id)? {
                Some(device) => Some(self.devices.hosting_device_info(&self.store, &device)?),
                None => {
                    error!(router_id = %router.id, hosting_device_id = %device_id, "binding points at missing device");
                    None
                }
            },
            None => None,
        };
        Ok(RouterView {
            router,
            router_type: RouterTypeInfo {
                id: router_type.id,
                name: router_type.name,
                cfg_agent_driver: router_type.cfg_agent_driver,
            },
            hosting_device,
        })
    }

    // ── Backlog processing ─────────────────────────────────────────

    /// Rebuild the backlog from persisted bindings: every router without a
    /// device whose type is not the namespace type.
    pub async fn sync_router_backlog(&self) -> SchedulerResult<usize> {
        let mut backlog = self.backlog.lock().await;
        self.resync(&mut backlog)
    }

    fn resync(&self, backlog: &mut RouterBacklog) -> SchedulerResult<usize> {
        let namespace_id = self.namespace_router_type_id()?;
        let mut routers = Vec::new();
        for binding in self.store.list_bindings()? {
            if binding.hosting_device_id.is_some()
                || namespace_id.as_deref() == Some(binding.router_type_id.as_str())
            {
                continue;
            }
            match self.store.get_router(&binding.router_id)? {
                Some(router) => routers.push(router),
                None => warn!(router_id = %binding.router_id, "binding without router"),
            }
        }
        backlog.replace_all(routers);
        info!(size = backlog.len(), "router backlog resynchronized");
        Ok(backlog.len())
    }

    /// One backlog sweep. Routers that get a device leave the backlog and
    /// are announced to agents in a single notification.
    pub async fn process_backlogged_routers(&self) -> SchedulerResult<Vec<RouterId>> {
        let mut backlog = self.backlog.lock().await;
        if backlog.needs_resync() {
            self.resync(&mut backlog)?;
        }
        if backlog.is_empty() {
            return Ok(Vec::new());
        }

        debug!(size = backlog.len(), "processing router backlog");
        let mut scheduled = Vec::new();
        for router in backlog.routers() {
            match self.place(&router.id) {
                Ok((router, outcome)) => {
                    if outcome.hosting_device_id().is_some() {
                        scheduled.push(router.clone());
                    }
                    Self::apply(&mut backlog, router, &outcome);
                }
                Err(SchedulerError::RouterNotFound(_)) => {
                    backlog.remove(&router.id);
                }
                Err(e) => {
                    warn!(router_id = %router.id, error = %e, "backlogged router could not be processed");
                }
            }
        }
        drop(backlog);

        let ids: Vec<RouterId> = scheduled.iter().map(|r| r.id.clone()).collect();
        let mut views = Vec::with_capacity(scheduled.len());
        for router in scheduled {
            let router_id = router.id.clone();
            match self.router_view(router) {
                Ok(view) => views.push(view),
                Err(e) => warn!(router_id = %router_id, error = %e, "cannot build router view"),
            }
        }
        if !ids.is_empty() {
            info!(count = ids.len(), "backlogged routers scheduled");
        }
        self.notifier.routers_updated(views, None).await;
        Ok(ids)
    }

    /// Run [`process_backlogged_routers`](Self::process_backlogged_routers)
    /// every `interval` until shutdown.
    pub async fn run_backlog_sweeper(self: Arc<Self>, interval: Duration, mut shutdown: watch::Receiver<bool>) {
        info!(interval_ms = interval.as_millis() as u64, "backlog sweeper started");
        loop {
            tokio::select! {
                _ = tokio::time::sleep(interval) => {
                    if let Err(e) = self.process_backlogged_routers().await {
                        warn!(error = %e, "backlog sweep failed");
                    }
                }
                _ = shutdown.changed() => {
                    info!("backlog sweeper shutting down");
                    break;
                }
            }
        }
    }

    // ── Dead devices ───────────────────────────────────────────────

    /// Evacuate routers from devices declared dead and dispose of the
    /// devices. Auto-scheduled routers go back to the backlog; the others
    /// stay bound to the dead device.
    pub async fn handle_non_responding_hosting_devices(
        &self,
        device_ids: &[HostingDeviceId],
    ) -> SchedulerResult<AffectedRouters> {
        let mut affected = AffectedRouters::new();
        for device_id in device_ids {
            let Some(device) = self.store.get_hosting_device(device_id)? else {
                warn!(hosting_device_id = %device_id, "non-responding device is unknown");
                continue;
            };

            let (bound, evacuated) = self.store.transaction(|txn| self.evacuate(txn, &device))?;
            {
                let mut backlog = self.backlog.lock().await;
                for router in evacuated {
                    backlog.insert(router);
                }
            }
            if let Err(e) = self.devices.process_non_responsive_device(&device).await {
                warn!(hosting_device_id = %device_id, error = %e, "failed to dispose of dead device");
            }
            affected.insert(device_id.clone(), bound);
        }

        if !affected.is_empty() {
            self.notifier.hosting_devices_removed(affected.clone()).await;
        }
        Ok(affected)
    }

    /// Returns the ids of all routers bound to `device` and the routers
    /// taken off it.
    fn evacuate(&self, txn: &StoreTxn, device: &HostingDevice) -> SchedulerResult<(Vec<RouterId>, Vec<Router>)> {
        let template = txn
            .get_template(&device.template_id)?
            .ok_or_else(|| SchedulerError::TemplateNotFound(device.template_id.clone()))?;
        let mut bound = Vec::new();
        let mut evacuated = Vec::new();
        for mut binding in txn.list_bindings_for_device(&device.id)? {
            bound.push(binding.router_id.clone());
            if !binding.auto_schedule {
                continue;
            }
            if let Some(allocation) = txn.get_slot_allocation(&device.id, &binding.router_id)? {
                self.devices.release_slots(
                    txn,
                    device,
                    &template,
                    &binding.router_id,
                    allocation.num_allocated,
                )?;
            }
            txn.delete_hosting_port_bindings_for_router(&binding.router_id)?;
            binding.hosting_device_id = None;
            txn.put_binding(&binding)?;
            match txn.get_router(&binding.router_id)? {
                Some(router) => evacuated.push(router),
                None => warn!(router_id = %binding.router_id, "binding without router"),
            }
            info!(router_id = %binding.router_id, hosting_device_id = %device.id, "router evacuated");
        }
        Ok((bound, evacuated))
    }
}

fn load_binding<R: StateReader>(reader: &R, router_id: &str) -> SchedulerResult<RouterHostingDeviceBinding> {
    reader.get_binding(router_id)?.ok_or_else(|| {
        error!(router_id, "router has no hosting device binding");
        SchedulerError::BindingInfo(router_id.to_string())
    })
}
