//! Slot ledger — capacity and exclusivity rules for slot allocations.
//!
//! A device's allocations may never sum past its template's
//! `slot_capacity`. Exclusive requests bind the device to the requesting
//! tenant; a device bound to one tenant rejects everyone else.

use routerhost_state::{HostingDevice, SlotAllocation};
use tracing::debug;

/// Request to hold `num` slots on a device for one logical resource.
#[derive(Debug, Clone)]
pub struct SlotRequest<'a> {
    pub resource_id: &'a str,
    pub owner: &'a str,
    pub num: u32,
    pub exclusive: bool,
}

/// How a granted allocation changes the device's tenant binding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Exclusivity {
    Keep,
    /// Bind the device (and its allocations) to this tenant.
    Bind(String),
    /// Clear the device's tenant binding.
    Unbind,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rejection {
    /// The device is reserved for another tenant.
    TenantBound { bound_to: String },
    /// Exclusive use requested but other tenants hold slots.
    SharedWithOthers,
    InsufficientCapacity { requested: u32, free: u32 },
}

#[derive(Debug, Clone, PartialEq)]
pub enum AcquireDecision {
    /// Store `allocation` (new or grown row) and apply `exclusivity`.
    Grant {
        allocation: SlotAllocation,
        exclusivity: Exclusivity,
    },
    Reject(Rejection),
}

#[derive(Debug, Clone, PartialEq)]
pub enum ReleaseDecision {
    /// Nothing is allocated for the resource.
    Noop,
    /// Store the shrunk allocation.
    Update(SlotAllocation),
    /// Delete the allocation row, clearing the device's tenant binding
    /// when nothing else remains on it.
    Remove { unbind_device: bool },
    /// More slots were asked back than are held.
    Reject { held: u32, requested: u32 },
}

/// Sum of slots allocated across `allocations`.
pub fn allocated_slots(allocations: &[SlotAllocation]) -> u32 {
    allocations.iter().map(|a| a.num_allocated).sum()
}

/// Decide whether `request` fits on `device`, given every allocation
/// currently held on it.
pub fn check_acquire(
    device: &HostingDevice,
    capacity: u32,
    allocations: &[SlotAllocation],
    request: &SlotRequest<'_>,
) -> AcquireDecision {
    if let Some(bound_to) = &device.tenant_bound {
        if bound_to != request.owner {
            debug!(
                hosting_device_id = %device.id,
                resource_id = request.resource_id,
                "rejecting slots: device bound to another tenant"
            );
            return AcquireDecision::Reject(Rejection::TenantBound {
                bound_to: bound_to.clone(),
            });
        }
    }
    if request.exclusive
        && allocations
            .iter()
            .any(|a| a.logical_resource_owner != request.owner)
    {
        debug!(
            hosting_device_id = %device.id,
            resource_id = request.resource_id,
            "rejecting slots: exclusive use conflicts with other tenants"
        );
        return AcquireDecision::Reject(Rejection::SharedWithOthers);
    }

    let allocated = allocated_slots(allocations);
    let free = capacity.saturating_sub(allocated);
    let fits = allocated
        .checked_add(request.num)
        .is_some_and(|total| total <= capacity);
    if !fits {
        debug!(
            hosting_device_id = %device.id,
            resource_id = request.resource_id,
            requested = request.num,
            free,
            "rejecting slots: insufficient capacity"
        );
        return AcquireDecision::Reject(Rejection::InsufficientCapacity {
            requested: request.num,
            free,
        });
    }

    let existing = allocations
        .iter()
        .find(|a| a.logical_resource_id == request.resource_id);
    let exclusivity = match (&device.tenant_bound, request.exclusive) {
        (None, true) => Exclusivity::Bind(request.owner.to_string()),
        (Some(_), false) => Exclusivity::Unbind,
        _ => Exclusivity::Keep,
    };
    let tenant_bound = match &exclusivity {
        Exclusivity::Bind(tenant) => Some(tenant.clone()),
        Exclusivity::Unbind => None,
        Exclusivity::Keep => device.tenant_bound.clone(),
    };

    let allocation = SlotAllocation {
        template_id: device.template_id.clone(),
        hosting_device_id: device.id.clone(),
        logical_resource_id: request.resource_id.to_string(),
        logical_resource_owner: request.owner.to_string(),
        num_allocated: existing.map_or(0, |a| a.num_allocated) + request.num,
        tenant_bound,
    };
    AcquireDecision::Grant {
        allocation,
        exclusivity,
    }
}

/// Decide how returning `num` slots held by `resource_id` changes the
/// device's allocations.
pub fn check_release(
    device: &HostingDevice,
    allocations: &[SlotAllocation],
    resource_id: &str,
    num: u32,
) -> ReleaseDecision {
    let Some(existing) = allocations
        .iter()
        .find(|a| a.logical_resource_id == resource_id)
    else {
        return ReleaseDecision::Noop;
    };
    if num > existing.num_allocated {
        return ReleaseDecision::Reject {
            held: existing.num_allocated,
            requested: num,
        };
    }
    if num == existing.num_allocated {
        let others_remain = allocations
            .iter()
            .any(|a| a.logical_resource_id != resource_id);
        return ReleaseDecision::Remove {
            unbind_device: device.tenant_bound.is_some() && !others_remain,
        };
    }
    let mut shrunk = existing.clone();
    shrunk.num_allocated -= num;
    ReleaseDecision::Update(shrunk)
}
