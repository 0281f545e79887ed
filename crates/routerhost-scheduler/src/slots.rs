//! Slot allocator — applies slot-ledger decisions inside a store transaction.
//!
//! This is the only code that writes slot allocations, so the capacity
//! invariant holds as long as every caller goes through
//! [`acquire_hosting_device_slots`] and [`release_hosting_device_slots`].

use routerhost_placement::{
    AcquireDecision, Exclusivity, Rejection, ReleaseDecision, SlotRequest, check_acquire,
    check_release,
};
use routerhost_state::{HostingDevice, HostingDeviceTemplate, StateReader, StateResult, StoreTxn};
use tracing::{debug, info};

/// Outcome of an acquire attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotGrant {
    Granted,
    /// Rejected for lack of free slots.
    NoCapacity,
    /// Rejected because of another tenant's exclusive use.
    Conflict,
}

impl SlotGrant {
    pub fn is_granted(self) -> bool {
        self == SlotGrant::Granted
    }
}

/// Hold `request.num` slots on `device` for `request.resource_id`.
/// Nothing is written unless the request is granted.
pub fn acquire_hosting_device_slots(
    txn: &StoreTxn,
    device: &HostingDevice,
    template: &HostingDeviceTemplate,
    request: &SlotRequest<'_>,
) -> StateResult<SlotGrant> {
    let allocations = txn.list_slot_allocations_for_device(&device.id)?;
    match check_acquire(device, template.slot_capacity, &allocations, request) {
        AcquireDecision::Reject(reason) => {
            debug!(
                hosting_device_id = %device.id,
                resource_id = request.resource_id,
                ?reason,
                "slot allocation rejected"
            );
            Ok(match reason {
                Rejection::InsufficientCapacity { .. } => SlotGrant::NoCapacity,
                _ => SlotGrant::Conflict,
            })
        }
        AcquireDecision::Grant {
            allocation,
            exclusivity,
        } => {
            match exclusivity {
                Exclusivity::Keep => {}
                Exclusivity::Bind(tenant) => set_device_tenant(txn, device, Some(tenant))?,
                Exclusivity::Unbind => set_device_tenant(txn, device, None)?,
            }
            txn.put_slot_allocation(&allocation)?;
            info!(
                hosting_device_id = %device.id,
                resource_id = request.resource_id,
                num = request.num,
                total = allocation.num_allocated,
                "slots allocated"
            );
            Ok(SlotGrant::Granted)
        }
    }
}

/// Return `num` slots held by `resource_id` on `device`.
///
/// Releasing an allocation that does not exist succeeds without effect;
/// releasing more than is held returns `false` and writes nothing.
pub fn release_hosting_device_slots(
    txn: &StoreTxn,
    device: &HostingDevice,
    resource_id: &str,
    num: u32,
) -> StateResult<bool> {
    let allocations = txn.list_slot_allocations_for_device(&device.id)?;
    match check_release(device, &allocations, resource_id, num) {
        ReleaseDecision::Noop => {
            debug!(hosting_device_id = %device.id, resource_id, "no slots to release");
            Ok(true)
        }
        ReleaseDecision::Reject { held, requested } => {
            debug!(
                hosting_device_id = %device.id,
                resource_id,
                held,
                requested,
                "slot release rejected"
            );
            Ok(false)
        }
        ReleaseDecision::Update(allocation) => {
            txn.put_slot_allocation(&allocation)?;
            info!(
                hosting_device_id = %device.id,
                resource_id,
                num,
                total = allocation.num_allocated,
                "slots released"
            );
            Ok(true)
        }
        ReleaseDecision::Remove { unbind_device } => {
            txn.delete_slot_allocation(&device.id, resource_id)?;
            if unbind_device {
                set_device_tenant(txn, device, None)?;
            }
            info!(hosting_device_id = %device.id, resource_id, num, "slots released");
            Ok(true)
        }
    }
}

/// Bind or unbind a device and every allocation on it.
fn set_device_tenant(txn: &StoreTxn, device: &HostingDevice, tenant: Option<String>) -> StateResult<()> {
    let mut current = txn.get_hosting_device(&device.id)?.unwrap_or_else(|| device.clone());
    current.tenant_bound = tenant.clone();
    txn.put_hosting_device(&current)?;
    for mut allocation in txn.list_slot_allocations_for_device(&device.id)? {
        allocation.tenant_bound = tenant.clone();
        txn.put_slot_allocation(&allocation)?;
    }
    debug!(hosting_device_id = %device.id, tenant_bound = ?tenant, "device exclusivity updated");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use routerhost_state::{DeviceStatus, HostCategory, StateStore};

    fn template(capacity: u32) -> HostingDeviceTemplate {
        HostingDeviceTemplate {
            id: "t1".to_string(),
            name: "csr".to_string(),
            enabled: true,
            host_category: HostCategory::Vm,
            service_types: "router".to_string(),
            image: None,
            flavor: None,
            default_credentials_id: None,
            configuration_mechanism: None,
            protocol_port: None,
            booting_time: Some(420),
            slot_capacity: capacity,
            desired_slots_free: 0,
            tenant_bound: Vec::new(),
            device_driver: "noop".to_string(),
            plugging_driver: "noop".to_string(),
        }
    }

    fn device() -> HostingDevice {
        HostingDevice {
            id: "hd1".to_string(),
            tenant_id: "admin".to_string(),
            template_id: "t1".to_string(),
            name: "hd1".to_string(),
            credentials_id: None,
            device_id: None,
            admin_state_up: true,
            management_port_id: None,
            management_ip_address: None,
            protocol_port: None,
            cfg_agent_id: None,
            created_at: 0,
            status: DeviceStatus::Active,
            tenant_bound: None,
            auto_delete: false,
        }
    }

    fn setup() -> StateStore {
        let store = StateStore::open_in_memory().unwrap();
        store
            .transaction(|txn| {
                txn.insert_template(&template(4))?;
                txn.insert_hosting_device(&device())
            })
            .unwrap();
        store
    }

    fn acquire(store: &StateStore, resource: &str, owner: &str, num: u32, exclusive: bool) -> SlotGrant {
        store
            .transaction(|txn| {
                let dev = txn.get_hosting_device("hd1")?.unwrap();
                acquire_hosting_device_slots(
                    txn,
                    &dev,
                    &template(4),
                    &SlotRequest {
                        resource_id: resource,
                        owner,
                        num,
                        exclusive,
                    },
                )
            })
            .unwrap()
    }

    fn release(store: &StateStore, resource: &str, num: u32) -> bool {
        store
            .transaction(|txn| {
                let dev = txn.get_hosting_device("hd1")?.unwrap();
                release_hosting_device_slots(txn, &dev, resource, num)
            })
            .unwrap()
    }

    #[test]
    fn acquire_until_full() {
        let store = setup();
        assert_eq!(acquire(&store, "r1", "a", 2, false), SlotGrant::Granted);
        assert_eq!(acquire(&store, "r2", "b", 2, false), SlotGrant::Granted);
        assert_eq!(acquire(&store, "r3", "b", 1, false), SlotGrant::NoCapacity);
        assert_eq!(store.list_slot_allocations_for_device("hd1").unwrap().len(), 2);
    }

    #[test]
    fn exclusive_acquire_binds_and_release_unbinds() {
        let store = setup();
        assert!(acquire(&store, "r1", "a", 1, true).is_granted());
        let dev = store.get_hosting_device("hd1").unwrap().unwrap();
        assert_eq!(dev.tenant_bound.as_deref(), Some("a"));
        let alloc = store.get_slot_allocation("hd1", "r1").unwrap().unwrap();
        assert_eq!(alloc.tenant_bound.as_deref(), Some("a"));

        assert_eq!(acquire(&store, "r2", "b", 1, false), SlotGrant::Conflict);

        assert!(release(&store, "r1", 1));
        let dev = store.get_hosting_device("hd1").unwrap().unwrap();
        assert_eq!(dev.tenant_bound, None);
        assert!(store.get_slot_allocation("hd1", "r1").unwrap().is_none());
    }

    #[test]
    fn release_is_idempotent() {
        let store = setup();
        assert!(acquire(&store, "r1", "a", 2, false).is_granted());
        assert!(release(&store, "r1", 2));
        assert!(release(&store, "r1", 2));
        assert!(store.list_slot_allocations().unwrap().is_empty());
    }

    #[test]
    fn over_release_rejected_without_mutation() {
        let store = setup();
        assert!(acquire(&store, "r1", "a", 2, false).is_granted());
        assert!(!release(&store, "r1", 3));
        assert_eq!(
            store.get_slot_allocation("hd1", "r1").unwrap().unwrap().num_allocated,
            2
        );
    }

    #[test]
    fn release_then_reacquire_counts_once() {
        let store = setup();
        assert!(acquire(&store, "r1", "a", 4, false).is_granted());
        assert!(release(&store, "r1", 4));
        assert!(acquire(&store, "r1", "a", 4, false).is_granted());
        assert_eq!(
            store.get_slot_allocation("hd1", "r1").unwrap().unwrap().num_allocated,
            4
        );
    }
}
