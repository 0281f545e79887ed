//! Hosting-device pool sizing.
//!
//! A VM-based template keeps roughly `desired_slots_free` slots available
//! on untenanted devices so new routers do not wait for a device to boot:
//! `|desired - capacity| <= available <= desired + capacity`.

use routerhost_state::{HostCategory, HostingDevice, HostingDeviceTemplate, SlotAllocation};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolAdjustment {
    /// Create this many devices.
    Grow(u32),
    /// Delete up to this many idle devices.
    Shrink(u32),
    Steady,
}

/// Inputs of a sizing decision for one template.
#[derive(Debug, Clone, Copy)]
pub struct PoolSnapshot {
    pub category: HostCategory,
    pub capacity: u32,
    pub desired_free: u32,
    pub available: u32,
    /// Slots that were requested and triggered this evaluation.
    pub requested: u32,
}

/// Free slots on administratively-up, untenanted devices of `template`.
pub fn available_slots(
    template: &HostingDeviceTemplate,
    devices: &[HostingDevice],
    allocations: &[SlotAllocation],
) -> u32 {
    let num_devices = devices
        .iter()
        .filter(|d| d.template_id == template.id && d.admin_state_up && d.tenant_bound.is_none())
        .count() as u64;
    let allocated: u64 = allocations
        .iter()
        .filter(|a| a.template_id == template.id && a.tenant_bound.is_none())
        .map(|a| u64::from(a.num_allocated))
        .sum();
    let total = num_devices * u64::from(template.slot_capacity);
    u32::try_from(total.saturating_sub(allocated)).unwrap_or(u32::MAX)
}

pub fn pool_adjustment(snapshot: &PoolSnapshot) -> PoolAdjustment {
    // Only service VMs are created and deleted on demand.
    if snapshot.category != HostCategory::Vm || snapshot.capacity == 0 {
        return PoolAdjustment::Steady;
    }
    let capacity = snapshot.capacity;
    let desired = snapshot.desired_free;
    let available = snapshot.available;

    let grow_threshold = desired.abs_diff(capacity).min(snapshot.requested);
    if available <= grow_threshold {
        let count = grow_threshold.div_ceil(capacity);
        return if count == 0 {
            PoolAdjustment::Steady
        } else {
            PoolAdjustment::Grow(count)
        };
    }
    if available >= desired.saturating_add(capacity) {
        return PoolAdjustment::Shrink((available - desired).div_ceil(capacity));
    }
    PoolAdjustment::Steady
}
