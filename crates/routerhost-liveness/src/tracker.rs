//! Hosting device liveness tracker.
//!
//! A device enters tracking the first time it is found unreachable while
//! one of its routers is processed. From then on each check either finds
//! it reachable again, declares it dead once `dead_timeout` has passed
//! since it was first flagged, or leaves it for the next cycle. Devices
//! still within their booting time are never probed by a check.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex, PoisonError};

use routerhost_core::epoch_secs;
use routerhost_state::{HostingDeviceId, HostingDeviceInfo, RouterId};
use tracing::{debug, info, warn};

use crate::probe::ReachabilityProbe;

/// A device under observation.
#[derive(Debug, Clone)]
pub struct TrackedDevice {
    pub device: HostingDeviceInfo,
    /// When the device was first flagged, never earlier than the end of
    /// its booting time.
    pub inserted_at: u64,
    pub router_ids: BTreeSet<RouterId>,
}

/// Outcome of one check cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LivenessReport {
    pub reachable: Vec<HostingDeviceId>,
    pub dead: Vec<HostingDeviceId>,
    /// Routers of every device listed above.
    pub routers: BTreeMap<HostingDeviceId, Vec<RouterId>>,
}

impl LivenessReport {
    pub fn is_empty(&self) -> bool {
        self.reachable.is_empty() && self.dead.is_empty()
    }
}

pub struct LivenessTracker {
    probe: Arc<dyn ReachabilityProbe>,
    dead_timeout: u64,
    backlog: Mutex<BTreeMap<HostingDeviceId, TrackedDevice>>,
}

impl LivenessTracker {
    pub fn new(probe: Arc<dyn ReachabilityProbe>, dead_timeout_secs: u64) -> Self {
        Self {
            probe,
            dead_timeout: dead_timeout_secs,
            backlog: Mutex::new(BTreeMap::new()),
        }
    }

    pub async fn is_hosting_device_reachable(&self, device: &HostingDeviceInfo, router_id: Option<&str>) -> bool {
        self.is_hosting_device_reachable_at(device, router_id, epoch_secs()).await
    }

    /// Probe `device` and add it to the backlog when unreachable. A device
    /// already tracked is reported unreachable without a new probe; only
    /// `router_id` is merged into its entry.
    pub async fn is_hosting_device_reachable_at(
        &self,
        device: &HostingDeviceInfo,
        router_id: Option<&str>,
        now: u64,
    ) -> bool {
        {
            let mut backlog = self.lock();
            if let Some(entry) = backlog.get_mut(&device.id) {
                if let Some(router_id) = router_id {
                    entry.router_ids.insert(router_id.to_string());
                }
                debug!(hosting_device_id = %device.id, "hosting device already backlogged");
                return false;
            }
        }

        if let Some(address) = &device.management_ip_address {
            if self.probe.is_reachable(address).await {
                return true;
            }
        } else {
            warn!(hosting_device_id = %device.id, "hosting device has no management address");
        }

        let inserted_at = now.max(device.created_at.saturating_add(device.booting_time));
        let mut backlog = self.lock();
        let entry = backlog.entry(device.id.clone()).or_insert_with(|| {
            info!(hosting_device_id = %device.id, inserted_at, "hosting device unreachable, backlogged");
            TrackedDevice {
                device: device.clone(),
                inserted_at,
                router_ids: BTreeSet::new(),
            }
        });
        if let Some(router_id) = router_id {
            entry.router_ids.insert(router_id.to_string());
        }
        false
    }

    pub async fn check_backlogged_hosting_devices(&self) -> LivenessReport {
        self.check_backlogged_hosting_devices_at(epoch_secs()).await
    }

    /// Re-probe every tracked device that has finished booting. Reachable
    /// and dead devices leave the backlog.
    pub async fn check_backlogged_hosting_devices_at(&self, now: u64) -> LivenessReport {
        let tracked: Vec<TrackedDevice> = self.lock().values().cloned().collect();
        let mut report = LivenessReport::default();

        for entry in tracked {
            let device = &entry.device;
            if now < device.created_at.saturating_add(device.booting_time) {
                debug!(hosting_device_id = %device.id, "hosting device still booting");
                continue;
            }

            let reachable = match &device.management_ip_address {
                Some(address) => self.probe.is_reachable(address).await,
                None => false,
            };
            if reachable {
                info!(hosting_device_id = %device.id, "hosting device reachable again");
                report.reachable.push(device.id.clone());
            } else if now.saturating_sub(entry.inserted_at) >= self.dead_timeout {
                warn!(
                    hosting_device_id = %device.id,
                    unreachable_for = now.saturating_sub(entry.inserted_at),
                    "hosting device declared dead"
                );
                report.dead.push(device.id.clone());
            } else {
                debug!(hosting_device_id = %device.id, "hosting device still unreachable");
                continue;
            }
            self.lock().remove(&device.id);
            report
                .routers
                .insert(device.id.clone(), entry.router_ids.iter().cloned().collect());
        }
        report
    }

    /// Tracked devices and the routers waiting on each.
    pub fn backlogged_hosting_devices(&self) -> BTreeMap<HostingDeviceId, Vec<RouterId>> {
        self.lock()
            .iter()
            .map(|(id, entry)| (id.clone(), entry.router_ids.iter().cloned().collect()))
            .collect()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BTreeMap<HostingDeviceId, TrackedDevice>> {
        self.backlog.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
