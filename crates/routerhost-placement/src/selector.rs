//! Device selection — which hosting device a router lands on.
//!
//! Candidates must belong to the router type's template, be
//! administratively up and not dead, admit the router's tenant and have
//! room for `slot_need` more slots. Among them the oldest device wins,
//! since it has most likely finished booting. Devices created within
//! `equivalence_window_secs` of the oldest count as equally old; the one
//! with the fewest allocated slots is preferred, and remaining ties break
//! on (`created_at`, `id`).

use std::collections::BTreeSet;

use routerhost_state::{DeviceStatus, HostingDevice, HostingDeviceTemplate, SlotAllocation};

use crate::ledger::allocated_slots;

/// A device together with its current slot usage.
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceLoad {
    pub device: HostingDevice,
    pub allocated: u32,
    /// Owners of the allocations on the device.
    pub tenants: BTreeSet<String>,
}

impl DeviceLoad {
    pub fn new(device: HostingDevice, allocations: &[SlotAllocation]) -> Self {
        Self {
            device,
            allocated: allocated_slots(allocations),
            tenants: allocations
                .iter()
                .map(|a| a.logical_resource_owner.clone())
                .collect(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SelectionRequest<'a> {
    pub template: &'a HostingDeviceTemplate,
    pub tenant_id: &'a str,
    pub slot_need: u32,
    /// The router wants the device to itself.
    pub exclusive: bool,
    pub equivalence_window_secs: u64,
}

pub fn is_eligible(load: &DeviceLoad, req: &SelectionRequest<'_>) -> bool {
    let device = &load.device;
    let fits = load
        .allocated
        .checked_add(req.slot_need)
        .is_some_and(|total| total <= req.template.slot_capacity);
    let tenant_ok = device
        .tenant_bound
        .as_deref()
        .is_none_or(|bound| bound == req.tenant_id);
    let exclusive_ok = !req.exclusive || load.tenants.iter().all(|t| t == req.tenant_id);

    device.template_id == req.template.id
        && device.admin_state_up
        && device.status != DeviceStatus::Dead
        && req.template.admits_tenant(req.tenant_id)
        && tenant_ok
        && exclusive_ok
        && fits
}

/// Pick the device a router should be scheduled on, if any fits.
pub fn select_device<'a>(loads: &'a [DeviceLoad], req: &SelectionRequest<'_>) -> Option<&'a DeviceLoad> {
    let candidates: Vec<&DeviceLoad> = loads.iter().filter(|l| is_eligible(l, req)).collect();
    let oldest = candidates.iter().map(|l| l.device.created_at).min()?;
    let horizon = oldest.saturating_add(req.equivalence_window_secs);

    candidates
        .into_iter()
        .filter(|l| l.device.created_at <= horizon)
        .min_by(|a, b| {
            a.allocated
                .cmp(&b.allocated)
                .then(a.device.created_at.cmp(&b.device.created_at))
                .then_with(|| a.device.id.cmp(&b.device.id))
        })
}
