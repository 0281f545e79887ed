//! End-to-end scheduling tests over an in-memory store.
//!
//! Covers lazy placement, capacity limits, the backlog sweep, namespace
//! routers, dead-device evacuation and hosting-port population, plus
//! concurrent reads, sweeps and deletes on a multi-threaded runtime.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use routerhost_core::SchedulingConfig;
use routerhost_scheduler::*;
use routerhost_state::*;
use tokio::sync::mpsc::UnboundedReceiver;

struct Harness {
    service: Arc<RouterService>,
    events: UnboundedReceiver<AgentEvent>,
    _pool_jobs: UnboundedReceiver<PoolJob>,
}

impl Harness {
    fn new() -> Self {
        Self::with_drivers(DriverRegistry::with_defaults())
    }

    fn with_drivers(drivers: DriverRegistry) -> Self {
        let store = StateStore::open_in_memory().unwrap();
        let (devices, pool_jobs) = HostingDeviceManager::new(store, Arc::new(drivers), 420);
        let (notifier, events) = ChannelNotifier::new();
        let bindings = Arc::new(BindingManager::new(
            devices,
            Arc::new(SchedulerRegistry::with_defaults(420)),
            Arc::new(BacklogManager::new()),
            Arc::new(notifier),
            "NetworkNamespace_router",
        ));
        let service = Arc::new(RouterService::new(bindings, &SchedulingConfig::default()));
        service.ensure_namespace_router_type().unwrap();
        Self {
            service,
            events,
            _pool_jobs: pool_jobs,
        }
    }

    fn bindings(&self) -> &BindingManager {
        self.service.bindings()
    }

    fn store(&self) -> &StateStore {
        self.bindings().store()
    }

    /// Template `t1` (capacity 10) and router type `CSR1kv_router`
    /// needing `slot_need` slots.
    fn csr_setup(&self, slot_need: u32, plugging_driver: &str) {
        let devices = self.bindings().devices();
        devices
            .create_template(HostingDeviceTemplate {
                id: "t1".to_string(),
                name: "CSR1kv_template".to_string(),
                enabled: true,
                host_category: HostCategory::Vm,
                service_types: "router".to_string(),
                image: Some("csr1kv".to_string()),
                flavor: None,
                default_credentials_id: None,
                configuration_mechanism: None,
                protocol_port: Some(22),
                booting_time: Some(420),
                slot_capacity: 10,
                desired_slots_free: 0,
                tenant_bound: Vec::new(),
                device_driver: "noop".to_string(),
                plugging_driver: plugging_driver.to_string(),
            })
            .unwrap();
        self.service
            .create_router_type(RouterType {
                id: "rt-csr".to_string(),
                name: "CSR1kv_router".to_string(),
                description: String::new(),
                template_id: "t1".to_string(),
                shared: true,
                slot_need,
                scheduler: "oldest_device".to_string(),
                driver: String::new(),
                cfg_agent_driver: "csr1kv_cfg".to_string(),
            })
            .unwrap();
    }

    fn add_device(&self, id: &str, created_at: u64, auto_delete: bool) {
        self.bindings()
            .devices()
            .create_hosting_device(HostingDevice {
                id: id.to_string(),
                tenant_id: "admin".to_string(),
                template_id: "t1".to_string(),
                name: id.to_string(),
                credentials_id: None,
                device_id: None,
                admin_state_up: true,
                management_port_id: None,
                management_ip_address: Some("10.0.100.5".to_string()),
                protocol_port: None,
                cfg_agent_id: None,
                created_at,
                status: DeviceStatus::Active,
                tenant_bound: None,
                auto_delete,
            })
            .unwrap();
    }

    fn create_router(&self, id: &str, tenant: &str) -> Router {
        self.service
            .create_router(CreateRouterRequest {
                id: Some(id.to_string()),
                tenant_id: tenant.to_string(),
                name: id.to_string(),
                admin_state_up: true,
                router_type: None,
                gw_port: None,
                share_hosting_device: None,
            })
            .unwrap()
    }

    fn allocated_on(&self, device_id: &str) -> u32 {
        self.store()
            .list_slot_allocations_for_device(device_id)
            .unwrap()
            .iter()
            .map(|a| a.num_allocated)
            .sum()
    }

    fn hosting_device_of(&self, router_id: &str) -> Option<String> {
        self.store()
            .get_binding(router_id)
            .unwrap()
            .unwrap()
            .hosting_device_id
    }
}

fn port(id: &str, network: &str) -> RouterPort {
    RouterPort {
        id: id.to_string(),
        network_id: network.to_string(),
        subnet_id: None,
        fixed_ip: None,
        network_type: "vlan".to_string(),
        hosting_info: None,
    }
}

#[tokio::test]
async fn router_is_scheduled_lazily_on_first_read() {
    let h = Harness::new();
    h.csr_setup(2, "noop");
    h.add_device("hd1", 1000, false);

    h.create_router("r1", "tenant-a");
    assert_eq!(h.hosting_device_of("r1"), None);
    assert_eq!(h.allocated_on("hd1"), 0);

    let view = h.service.get_router("r1").await.unwrap();
    assert_eq!(view.router_type.name, "CSR1kv_router");
    assert_eq!(view.router_type.cfg_agent_driver, "csr1kv_cfg");
    let hd = view.hosting_device.unwrap();
    assert_eq!(hd.id, "hd1");
    assert_eq!(hd.booting_time, 420);
    assert_eq!(h.allocated_on("hd1"), 2);
    assert!(!h.bindings().backlog().contains("r1").await);

    // A second read keeps the placement and does not allocate again.
    h.service.get_router("r1").await.unwrap();
    assert_eq!(h.allocated_on("hd1"), 2);
}

#[tokio::test]
async fn unknown_router_type_rejects_creation() {
    let h = Harness::new();
    let err = h
        .service
        .create_router(CreateRouterRequest {
            id: None,
            tenant_id: "tenant-a".to_string(),
            name: "r1".to_string(),
            admin_state_up: true,
            router_type: Some("ASR1k_router".to_string()),
            gw_port: None,
            share_hosting_device: None,
        })
        .unwrap_err();
    assert!(matches!(err, SchedulerError::RouterTypeNotFound(_)));
    assert!(h.store().list_routers().unwrap().is_empty());
}

#[tokio::test]
async fn full_device_leaves_router_backlogged() {
    let h = Harness::new();
    h.csr_setup(6, "noop");
    h.add_device("hd1", 1000, false);

    h.create_router("r1", "tenant-a");
    h.create_router("r2", "tenant-b");

    assert_eq!(
        h.bindings().schedule_router("r1").await.unwrap(),
        ScheduleOutcome::Scheduled("hd1".to_string())
    );
    assert_eq!(
        h.bindings().schedule_router("r2").await.unwrap(),
        ScheduleOutcome::Backlogged
    );
    assert_eq!(h.allocated_on("hd1"), 6);
    assert!(h.bindings().backlog().contains("r2").await);
    assert_eq!(h.hosting_device_of("r2"), None);
}

#[tokio::test]
async fn backlog_sweep_schedules_once_capacity_appears() {
    let mut h = Harness::new();
    h.csr_setup(2, "noop");
    h.create_router("r1", "tenant-a");

    // No devices yet: the first sweep rebuilds the backlog and cannot place.
    let scheduled = h.bindings().process_backlogged_routers().await.unwrap();
    assert!(scheduled.is_empty());
    assert_eq!(h.bindings().backlog().ids().await, vec!["r1".to_string()]);

    h.add_device("hd1", 1000, false);
    let scheduled = h.bindings().process_backlogged_routers().await.unwrap();
    assert_eq!(scheduled, vec!["r1".to_string()]);
    assert!(h.bindings().backlog().ids().await.is_empty());
    assert_eq!(h.hosting_device_of("r1").as_deref(), Some("hd1"));

    match h.events.try_recv().unwrap() {
        AgentEvent::RoutersUpdated { routers, reason } => {
            assert_eq!(routers.len(), 1);
            assert_eq!(routers[0].router.id, "r1");
            assert!(reason.is_none());
        }
        other => panic!("unexpected event {other:?}"),
    }
}

#[tokio::test]
async fn resync_matches_unhosted_bindings() {
    let h = Harness::new();
    h.csr_setup(2, "noop");
    h.add_device("hd1", 1000, false);
    h.create_router("hosted", "tenant-a");
    h.create_router("waiting", "tenant-a");
    h.service
        .create_router(CreateRouterRequest {
            id: Some("ns".to_string()),
            tenant_id: "tenant-a".to_string(),
            name: "ns".to_string(),
            admin_state_up: true,
            router_type: Some("NetworkNamespace_router".to_string()),
            gw_port: None,
            share_hosting_device: None,
        })
        .unwrap();
    h.bindings().schedule_router("hosted").await.unwrap();

    // Stale entry from before the resync.
    h.bindings()
        .backlog()
        .backlog_router(h.store().get_router("hosted").unwrap().unwrap())
        .await;

    let size = h.bindings().sync_router_backlog().await.unwrap();
    assert_eq!(size, 1);
    assert_eq!(h.bindings().backlog().ids().await, vec!["waiting".to_string()]);
}

#[tokio::test]
async fn namespace_router_never_gets_a_device() {
    let h = Harness::new();
    h.csr_setup(2, "noop");
    h.add_device("hd1", 1000, false);
    h.service
        .create_router(CreateRouterRequest {
            id: Some("ns".to_string()),
            tenant_id: "tenant-a".to_string(),
            name: "ns".to_string(),
            admin_state_up: true,
            router_type: Some("NetworkNamespace_router".to_string()),
            gw_port: None,
            share_hosting_device: None,
        })
        .unwrap();

    assert_eq!(
        h.bindings().schedule_router("ns").await.unwrap(),
        ScheduleOutcome::NotApplicable
    );
    let view = h.service.get_router("ns").await.unwrap();
    assert!(view.hosting_device.is_none());
    assert!(!h.bindings().backlog().contains("ns").await);
    assert_eq!(h.allocated_on("hd1"), 0);
}

#[tokio::test]
async fn oldest_device_preferred_outside_equivalence_window() {
    let h = Harness::new();
    h.csr_setup(2, "noop");
    h.add_device("young", 5000, false);
    h.add_device("old", 1000, false);
    h.create_router("r1", "tenant-a");

    assert_eq!(
        h.bindings().schedule_router("r1").await.unwrap(),
        ScheduleOutcome::Scheduled("old".to_string())
    );
}

#[tokio::test]
async fn exclusive_router_binds_device_to_tenant() {
    let h = Harness::new();
    h.csr_setup(2, "noop");
    h.add_device("hd1", 1000, false);
    h.service
        .create_router(CreateRouterRequest {
            id: Some("private".to_string()),
            tenant_id: "tenant-a".to_string(),
            name: "private".to_string(),
            admin_state_up: true,
            router_type: None,
            gw_port: None,
            share_hosting_device: Some(false),
        })
        .unwrap();
    h.create_router("other", "tenant-b");

    h.bindings().schedule_router("private").await.unwrap();
    let device = h.store().get_hosting_device("hd1").unwrap().unwrap();
    assert_eq!(device.tenant_bound.as_deref(), Some("tenant-a"));

    assert_eq!(
        h.bindings().schedule_router("other").await.unwrap(),
        ScheduleOutcome::Backlogged
    );

    // Unscheduling the only router frees the device again.
    assert!(h.bindings().unschedule_router("private").unwrap());
    let device = h.store().get_hosting_device("hd1").unwrap().unwrap();
    assert_eq!(device.tenant_bound, None);
}

#[tokio::test]
async fn unschedule_then_reschedule_counts_slots_once() {
    let h = Harness::new();
    h.csr_setup(4, "noop");
    h.add_device("hd1", 1000, false);
    h.create_router("r1", "tenant-a");

    h.bindings().schedule_router("r1").await.unwrap();
    assert!(h.bindings().unschedule_router("r1").unwrap());
    assert_eq!(h.allocated_on("hd1"), 0);
    assert!(!h.bindings().unschedule_router("r1").unwrap());

    h.bindings().schedule_router("r1").await.unwrap();
    assert_eq!(h.allocated_on("hd1"), 4);
}

#[tokio::test]
async fn delete_router_releases_slots_and_notifies() {
    let mut h = Harness::new();
    h.csr_setup(2, "noop");
    h.add_device("hd1", 1000, false);
    h.create_router("r1", "tenant-a");
    h.service.get_router("r1").await.unwrap();

    h.service.delete_router("r1").await.unwrap();
    assert_eq!(h.allocated_on("hd1"), 0);
    assert!(h.store().get_binding("r1").unwrap().is_none());
    assert!(matches!(
        h.service.get_router("r1").await.unwrap_err(),
        SchedulerError::RouterNotFound(_)
    ));

    match h.events.try_recv().unwrap() {
        AgentEvent::RouterDeleted { router } => {
            assert_eq!(router.router.id, "r1");
            assert_eq!(router.hosting_device.unwrap().id, "hd1");
        }
        other => panic!("unexpected event {other:?}"),
    }

    // The device is free to go now.
    h.bindings().devices().delete_hosting_device("hd1").unwrap();
}

#[tokio::test]
async fn device_in_use_cannot_be_deleted() {
    let h = Harness::new();
    h.csr_setup(2, "noop");
    h.add_device("hd1", 1000, false);
    h.create_router("r1", "tenant-a");
    h.bindings().schedule_router("r1").await.unwrap();

    let err = h.bindings().devices().delete_hosting_device("hd1").unwrap_err();
    assert!(matches!(err, SchedulerError::HostingDeviceInUse(_)));
    let err = h.service.delete_router_type("rt-csr").unwrap_err();
    assert!(matches!(err, SchedulerError::RouterTypeInUse(_)));
}

#[tokio::test]
async fn dead_device_routers_are_backlogged_and_device_removed() {
    let mut h = Harness::new();
    h.csr_setup(2, "noop");
    h.add_device("hd1", 1000, true);
    h.create_router("r1", "tenant-a");
    h.create_router("r2", "tenant-a");
    h.bindings().schedule_router("r1").await.unwrap();
    h.bindings().schedule_router("r2").await.unwrap();

    let affected = h
        .bindings()
        .handle_non_responding_hosting_devices(&["hd1".to_string()])
        .await
        .unwrap();
    assert_eq!(affected["hd1"], vec!["r1".to_string(), "r2".to_string()]);

    assert_eq!(h.hosting_device_of("r1"), None);
    assert_eq!(h.hosting_device_of("r2"), None);
    assert!(h.store().list_slot_allocations().unwrap().is_empty());
    assert!(h.store().get_hosting_device("hd1").unwrap().is_none());
    assert_eq!(
        h.bindings().backlog().ids().await,
        vec!["r1".to_string(), "r2".to_string()]
    );

    match h.events.try_recv().unwrap() {
        AgentEvent::HostingDevicesRemoved { affected } => {
            assert_eq!(affected.len(), 1);
        }
        other => panic!("unexpected event {other:?}"),
    }
}

#[tokio::test]
async fn interfaces_notify_with_reason() {
    let mut h = Harness::new();
    h.csr_setup(2, "noop");
    h.add_device("hd1", 1000, false);
    h.create_router("r1", "tenant-a");

    let view = h
        .service
        .add_router_interface("r1", port("p1", "net-1"))
        .await
        .unwrap();
    assert_eq!(view.router.interfaces.len(), 1);
    assert!(view.hosting_device.is_some());

    let view = h.service.remove_router_interface("r1", "p1").await.unwrap();
    assert!(view.router.interfaces.is_empty());

    let reasons: Vec<Option<String>> = std::iter::from_fn(|| h.events.try_recv().ok())
        .filter_map(|e| match e {
            AgentEvent::RoutersUpdated { reason, .. } => Some(reason),
            _ => None,
        })
        .collect();
    assert_eq!(
        reasons,
        vec![
            Some("add_router_interface".to_string()),
            Some("remove_router_interface".to_string())
        ]
    );

    let err = h.service.remove_router_interface("r1", "p1").await.unwrap_err();
    assert!(matches!(err, SchedulerError::PortNotFound(_)));
}

/// Fails hosting-port allocation for ports named `bad`, and connectivity
/// setup for every port while `wired` is false.
struct FlakyPluggingDriver {
    inner: NoopPluggingDriver,
    wired: AtomicBool,
}

impl FlakyPluggingDriver {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            inner: NoopPluggingDriver::default(),
            wired: AtomicBool::new(true),
        })
    }
}

#[async_trait]
impl PluggingDriver for FlakyPluggingDriver {
    async fn allocate_hosting_port(
        &self,
        router: &Router,
        port: &RouterPort,
        device: &HostingDevice,
    ) -> anyhow::Result<AllocatedHostingPort> {
        if port.id == "bad" {
            anyhow::bail!("no trunk available");
        }
        self.inner.allocate_hosting_port(router, port, device).await
    }

    async fn setup_logical_port_connectivity(
        &self,
        port: &RouterPort,
        device: &HostingDevice,
    ) -> anyhow::Result<()> {
        if !self.wired.load(Ordering::SeqCst) {
            anyhow::bail!("trunk not wired on {}", device.id);
        }
        self.inner.setup_logical_port_connectivity(port, device).await
    }

    async fn teardown_logical_port_connectivity(
        &self,
        port: &RouterPort,
        device: &HostingDevice,
    ) -> anyhow::Result<()> {
        self.inner.teardown_logical_port_connectivity(port, device).await
    }

    async fn extend_hosting_port_info(
        &self,
        _port: &RouterPort,
        _device: &HostingDevice,
        info: &mut HostingInfo,
    ) -> anyhow::Result<()> {
        info.physical_interface = Some("GigabitEthernet2".to_string());
        Ok(())
    }
}

#[tokio::test]
async fn sync_data_fills_hosting_info_per_port() {
    let drivers = DriverRegistry::with_defaults().with_plugging_driver("flaky", FlakyPluggingDriver::new());
    let h = Harness::with_drivers(drivers);
    h.csr_setup(2, "flaky");
    h.add_device("hd1", 1000, false);
    h.service
        .create_router(CreateRouterRequest {
            id: Some("r1".to_string()),
            tenant_id: "tenant-a".to_string(),
            name: "r1".to_string(),
            admin_state_up: true,
            router_type: None,
            gw_port: Some(port("gw", "ext-net")),
            share_hosting_device: None,
        })
        .unwrap();
    h.service.add_router_interface("r1", port("good", "net-1")).await.unwrap();
    h.service.add_router_interface("r1", port("bad", "net-2")).await.unwrap();

    let views = h.service.get_sync_data_ext(None).await.unwrap();
    assert_eq!(views.len(), 1);
    let router = &views[0].router;

    let gw = router.gw_port.as_ref().unwrap().hosting_info.as_ref().unwrap();
    assert_eq!(gw.hosting_port_id, "hd1-gw");
    assert_eq!(gw.physical_interface.as_deref(), Some("GigabitEthernet2"));
    assert!(router.interfaces[0].hosting_info.is_some());
    assert!(router.interfaces[1].hosting_info.is_none());

    // Allocations are remembered: the same tag is reported on the next sync.
    let again = h
        .service
        .get_sync_data_ext(Some(&["r1".to_string(), "ghost".to_string()][..]))
        .await
        .unwrap();
    assert_eq!(again.len(), 1);
    assert_eq!(
        again[0].router.gw_port.as_ref().unwrap().hosting_info.as_ref().unwrap().segmentation_id,
        gw.segmentation_id
    );
    assert_eq!(
        h.store().list_hosting_port_bindings_for_router("r1").unwrap().len(),
        2
    );
}

#[tokio::test]
async fn gateway_change_drops_old_hosting_port() {
    let h = Harness::new();
    h.csr_setup(2, "noop");
    h.add_device("hd1", 1000, false);
    h.service
        .create_router(CreateRouterRequest {
            id: Some("r1".to_string()),
            tenant_id: "tenant-a".to_string(),
            name: "r1".to_string(),
            admin_state_up: true,
            router_type: None,
            gw_port: Some(port("gw1", "ext-1")),
            share_hosting_device: None,
        })
        .unwrap();
    h.service.get_sync_data_ext(None).await.unwrap();
    assert!(h.store().get_hosting_port_binding("r1", "gw1").unwrap().is_some());

    let view = h
        .service
        .update_router(
            "r1",
            UpdateRouterRequest {
                gw_port: Some(port("gw2", "ext-2")),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(view.router.gw_port.unwrap().id, "gw2");
    assert!(h.store().get_hosting_port_binding("r1", "gw1").unwrap().is_none());
}

#[tokio::test]
async fn failed_port_setup_is_retried_on_next_sync() {
    let driver = FlakyPluggingDriver::new();
    driver.wired.store(false, Ordering::SeqCst);
    let drivers = DriverRegistry::with_defaults().with_plugging_driver("flaky", driver.clone());
    let h = Harness::with_drivers(drivers);
    h.csr_setup(2, "flaky");
    h.add_device("hd1", 1000, false);
    h.create_router("r1", "tenant-a");
    h.service.add_router_interface("r1", port("p1", "net-1")).await.unwrap();

    for _ in 0..2 {
        let views = h.service.get_sync_data_ext(None).await.unwrap();
        assert!(views[0].router.interfaces[0].hosting_info.is_none());
        assert!(h.store().get_hosting_port_binding("r1", "p1").unwrap().is_none());
    }

    driver.wired.store(true, Ordering::SeqCst);
    let views = h.service.get_sync_data_ext(None).await.unwrap();
    assert!(views[0].router.interfaces[0].hosting_info.is_some());
    assert!(h.store().get_hosting_port_binding("r1", "p1").unwrap().is_some());
}

#[tokio::test]
async fn device_ids_sharing_a_prefix_are_counted_apart() {
    let h = Harness::new();
    h.csr_setup(5, "noop");
    h.add_device("hd:b", 2000, false);
    h.create_router("r1", "tenant-a");
    h.create_router("r2", "tenant-a");
    h.bindings().schedule_router("r1").await.unwrap();
    h.bindings().schedule_router("r2").await.unwrap();
    assert_eq!(h.allocated_on("hd:b"), 10);

    // Older and empty, so it wins.
    h.add_device("hd", 1000, false);
    assert_eq!(h.allocated_on("hd"), 0);
    h.create_router("r3", "tenant-a");
    assert_eq!(
        h.bindings().schedule_router("r3").await.unwrap(),
        ScheduleOutcome::Scheduled("hd".to_string())
    );

    h.service.delete_router("r3").await.unwrap();
    h.bindings().devices().delete_hosting_device("hd").unwrap();
    assert_eq!(h.allocated_on("hd:b"), 10);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_reads_and_delete_leave_no_slots_behind() {
    let h = Harness::new();
    h.csr_setup(2, "noop");
    h.add_device("hd1", 1000, false);

    for i in 0..25 {
        let id = format!("r{i}");
        h.create_router(&id, "tenant-a");

        let reader = {
            let service = h.service.clone();
            let id = id.clone();
            tokio::spawn(async move {
                // Fails once the delete got there first.
                let _ = service.get_router(&id).await;
            })
        };
        let deleter = {
            let service = h.service.clone();
            let id = id.clone();
            tokio::spawn(async move { service.delete_router(&id).await })
        };
        reader.await.unwrap();
        deleter.await.unwrap().unwrap();
    }

    assert!(h.store().list_routers().unwrap().is_empty());
    assert!(h.store().list_bindings().unwrap().is_empty());
    assert!(h.store().list_slot_allocations().unwrap().is_empty());
    h.bindings().process_backlogged_routers().await.unwrap();
    assert!(h.bindings().backlog().ids().await.is_empty());
    h.bindings().devices().delete_hosting_device("hd1").unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_placement_allocates_slots_once() {
    let h = Harness::new();
    h.csr_setup(3, "noop");
    h.create_router("r1", "tenant-a");
    h.service.add_router_interface("r1", port("p1", "net-1")).await.unwrap();

    // No device yet: the first read backlogs the router.
    h.service.get_router("r1").await.unwrap();
    assert!(h.bindings().backlog().contains("r1").await);
    h.add_device("hd1", 1000, false);

    let mut tasks = Vec::new();
    for i in 0..12 {
        let service = h.service.clone();
        tasks.push(tokio::spawn(async move {
            match i % 3 {
                0 => service.get_router("r1").await.map(|_| ()),
                1 => service.bindings().process_backlogged_routers().await.map(|_| ()),
                _ => service
                    .get_sync_data_ext(Some(&["r1".to_string()][..]))
                    .await
                    .map(|_| ()),
            }
        }));
    }
    for task in tasks {
        task.await.unwrap().unwrap();
    }

    let allocations = h.store().list_slot_allocations().unwrap();
    assert_eq!(allocations.len(), 1);
    assert_eq!(allocations[0].num_allocated, 3);
    assert_eq!(h.hosting_device_of("r1").as_deref(), Some("hd1"));
    assert!(!h.bindings().backlog().contains("r1").await);
    assert_eq!(h.store().list_hosting_port_bindings_for_router("r1").unwrap().len(), 1);
}
