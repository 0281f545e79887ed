//! Router-type schedulers — pluggable device-selection strategies.
//!
//! A router type names its strategy (`RouterType::scheduler`). The
//! [`SchedulerRegistry`] maps those names to constructors, validates them
//! at startup and memoises one instance per router-type id.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use routerhost_placement::{DeviceLoad, SelectionRequest, select_device};
use routerhost_state::{
    HostingDevice, HostingDeviceTemplate, Router, RouterHostingDeviceBinding, RouterType,
    RouterTypeId, StateReader, StateResult, StoreTxn,
};
use tracing::{debug, warn};

use crate::error::{SchedulerError, SchedulerResult};

/// Strategy name of [`OldestDeviceScheduler`].
pub const OLDEST_DEVICE: &str = "oldest_device";
/// Strategy name of [`NamespaceScheduler`].
pub const NAMESPACE: &str = "namespace";

/// Everything a strategy may look at when placing one router.
#[derive(Debug, Clone, Copy)]
pub struct SchedulingContext<'a> {
    pub router: &'a Router,
    pub binding: &'a RouterHostingDeviceBinding,
    pub router_type: &'a RouterType,
    pub template: &'a HostingDeviceTemplate,
}

/// Device-selection strategy for one class of routers.
///
/// Both calls run inside the caller's store transaction, so a strategy
/// sees exactly the rows the subsequent slot acquisition will see.
pub trait RouterTypeScheduler: Send + Sync {
    fn name(&self) -> &str;

    /// Pick a device for the router, or `None` when nothing fits.
    fn schedule_router(
        &self,
        txn: &StoreTxn,
        ctx: &SchedulingContext<'_>,
    ) -> StateResult<Option<HostingDevice>>;

    /// Undo strategy-side state for the router on `device`. Slots are
    /// released by the caller only when this returns `true`.
    fn unschedule_router(
        &self,
        txn: &StoreTxn,
        ctx: &SchedulingContext<'_>,
        device: &HostingDevice,
    ) -> StateResult<bool>;
}

// ── Built-in strategies ────────────────────────────────────────────

/// Prefers the oldest eligible device; see `routerhost_placement::select_device`.
#[derive(Debug, Clone)]
pub struct OldestDeviceScheduler {
    equivalence_window_secs: u64,
}

impl OldestDeviceScheduler {
    pub fn new(equivalence_window_secs: u64) -> Self {
        Self {
            equivalence_window_secs,
        }
    }
}

impl RouterTypeScheduler for OldestDeviceScheduler {
    fn name(&self) -> &str {
        OLDEST_DEVICE
    }

    fn schedule_router(
        &self,
        txn: &StoreTxn,
        ctx: &SchedulingContext<'_>,
    ) -> StateResult<Option<HostingDevice>> {
        let mut loads = Vec::new();
        for device in txn.list_hosting_devices_for_template(&ctx.template.id)? {
            let allocations = txn.list_slot_allocations_for_device(&device.id)?;
            loads.push(DeviceLoad::new(device, &allocations));
        }

        let request = SelectionRequest {
            template: ctx.template,
            tenant_id: &ctx.router.tenant_id,
            slot_need: ctx.router_type.slot_need,
            exclusive: !ctx.binding.share_hosting_device,
            equivalence_window_secs: self.equivalence_window_secs,
        };
        let chosen = select_device(&loads, &request).map(|l| l.device.clone());
        debug!(
            router_id = %ctx.router.id,
            candidates = loads.len(),
            chosen = ?chosen.as_ref().map(|d| d.id.as_str()),
            "oldest-device selection"
        );
        Ok(chosen)
    }

    fn unschedule_router(
        &self,
        _txn: &StoreTxn,
        _ctx: &SchedulingContext<'_>,
        _device: &HostingDevice,
    ) -> StateResult<bool> {
        Ok(true)
    }
}

/// Routers hosted by host-local networking never get a device.
#[derive(Debug, Clone, Default)]
pub struct NamespaceScheduler;

impl RouterTypeScheduler for NamespaceScheduler {
    fn name(&self) -> &str {
        NAMESPACE
    }

    fn schedule_router(
        &self,
        _txn: &StoreTxn,
        _ctx: &SchedulingContext<'_>,
    ) -> StateResult<Option<HostingDevice>> {
        Ok(None)
    }

    fn unschedule_router(
        &self,
        _txn: &StoreTxn,
        _ctx: &SchedulingContext<'_>,
        _device: &HostingDevice,
    ) -> StateResult<bool> {
        Ok(true)
    }
}

// ── Registry ───────────────────────────────────────────────────────

pub type SchedulerFactory = Arc<dyn Fn() -> Arc<dyn RouterTypeScheduler> + Send + Sync>;

/// Strategy name → constructor, plus a per-router-type instance cache.
pub struct SchedulerRegistry {
    factories: HashMap<String, SchedulerFactory>,
    cache: RwLock<HashMap<RouterTypeId, Arc<dyn RouterTypeScheduler>>>,
}

impl SchedulerRegistry {
    pub fn new() -> Self {
        Self {
            factories: HashMap::new(),
            cache: RwLock::new(HashMap::new()),
        }
    }

    /// Registry with the built-in `oldest_device` and `namespace` strategies.
    pub fn with_defaults(equivalence_window_secs: u64) -> Self {
        let mut registry = Self::new();
        registry.register(
            OLDEST_DEVICE,
            Arc::new(move || Arc::new(OldestDeviceScheduler::new(equivalence_window_secs))),
        );
        registry.register(NAMESPACE, Arc::new(|| Arc::new(NamespaceScheduler)));
        registry
    }

    pub fn register(&mut self, name: &str, factory: SchedulerFactory) {
        self.factories.insert(name.to_string(), factory);
    }

    pub fn is_known(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }

    /// Reject router types naming a strategy nobody registered.
    pub fn validate(&self, router_types: &[RouterType]) -> SchedulerResult<()> {
        let unknown: Vec<String> = router_types
            .iter()
            .filter(|rt| !self.is_known(&rt.scheduler))
            .map(|rt| format!("{} ({})", rt.name, rt.scheduler))
            .collect();
        if unknown.is_empty() {
            Ok(())
        } else {
            Err(SchedulerError::Config(format!(
                "unknown scheduler for router types: {}",
                unknown.join(", ")
            )))
        }
    }

    /// The strategy for `router_type`, constructed on first use.
    ///
    /// An unknown strategy name is logged and yields `None`, which callers
    /// treat as "no scheduler available".
    pub fn for_router_type(&self, router_type: &RouterType) -> Option<Arc<dyn RouterTypeScheduler>> {
        if let Some(found) = self
            .cache
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&router_type.id)
        {
            return Some(found.clone());
        }

        let Some(factory) = self.factories.get(&router_type.scheduler) else {
            warn!(
                router_type_id = %router_type.id,
                scheduler = %router_type.scheduler,
                "no scheduler registered for router type"
            );
            return None;
        };

        let mut cache = self.cache.write().unwrap_or_else(PoisonError::into_inner);
        let instance = cache
            .entry(router_type.id.clone())
            .or_insert_with(|| factory())
            .clone();
        Some(instance)
    }

    /// Drop the cached instance for a deleted router type.
    pub fn forget(&self, router_type_id: &str) {
        self.cache
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(router_type_id);
    }
}

impl Default for SchedulerRegistry {
    fn default() -> Self {
        Self::new()
    }
}
