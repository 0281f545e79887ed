//! Router service — router CRUD composed with the binding manager.
//!
//! Creating a router only writes the router and its binding; placement is
//! deferred to the first read or the next backlog sweep. Updates, deletes
//! and interface changes re-resolve type and hosting info before agents
//! are notified.

use std::sync::Arc;

use routerhost_core::SchedulingConfig;
use routerhost_state::{
    HostCategory, HostingDevice, HostingDeviceTemplate, HostingInfo, HostingPortBinding, PortType,
    Router, RouterHostingDeviceBinding, RouterPort, RouterStatus, RouterType, RouterView,
    StateReader, StateStore,
};
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::binding::BindingManager;
use crate::drivers::PluggingDriver;
use crate::error::{SchedulerError, SchedulerResult};
use crate::strategy::NAMESPACE;

const NAMESPACE_TEMPLATE_NAME: &str = "NetworkNode_template";

#[derive(Debug, Clone, Deserialize)]
pub struct CreateRouterRequest {
    #[serde(default)]
    pub id: Option<String>,
    pub tenant_id: String,
    pub name: String,
    #[serde(default = "default_true")]
    pub admin_state_up: bool,
    /// Router type id or name; the configured default when absent.
    #[serde(default)]
    pub router_type: Option<String>,
    #[serde(default)]
    pub gw_port: Option<RouterPort>,
    /// Overrides the configured sharing policy for this router.
    #[serde(default)]
    pub share_hosting_device: Option<bool>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpdateRouterRequest {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub admin_state_up: Option<bool>,
    /// New external gateway port.
    #[serde(default)]
    pub gw_port: Option<RouterPort>,
    #[serde(default)]
    pub remove_gateway: bool,
}

fn default_true() -> bool {
    true
}

pub struct RouterService {
    bindings: Arc<BindingManager>,
    default_router_type: String,
    namespace_router_type: String,
    auto_schedule: bool,
    share_hosting_device: bool,
}

impl RouterService {
    pub fn new(bindings: Arc<BindingManager>, config: &SchedulingConfig) -> Self {
        Self {
            bindings,
            default_router_type: config.default_router_type.clone(),
            namespace_router_type: config.namespace_router_type_name.clone(),
            auto_schedule: config.router_auto_schedule,
            share_hosting_device: config.share_hosting_device,
        }
    }

    pub fn bindings(&self) -> &Arc<BindingManager> {
        &self.bindings
    }

    fn store(&self) -> &StateStore {
        self.bindings.store()
    }

    // ── Router types ───────────────────────────────────────────────

    pub fn create_router_type(&self, mut router_type: RouterType) -> SchedulerResult<RouterType> {
        if router_type.id.is_empty() {
            router_type.id = uuid::Uuid::new_v4().to_string();
        }
        if !self.bindings.registry().is_known(&router_type.scheduler) {
            return Err(SchedulerError::Config(format!(
                "unknown scheduler {} for router type {}",
                router_type.scheduler, router_type.name
            )));
        }
        self.store().transaction(|txn| {
            if txn.get_template(&router_type.template_id)?.is_none() {
                return Err(SchedulerError::TemplateNotFound(router_type.template_id.clone()));
            }
            txn.insert_router_type(&router_type).map_err(|e| {
                SchedulerError::on_conflict(e, || SchedulerError::AlreadyExists(router_type.id.clone()))
            })
        })?;
        info!(router_type_id = %router_type.id, name = %router_type.name, "router type created");
        Ok(router_type)
    }

    pub fn get_router_type(&self, id_or_name: &str) -> SchedulerResult<RouterType> {
        self.bindings.get_router_type(id_or_name)
    }

    pub fn list_router_types(&self) -> SchedulerResult<Vec<RouterType>> {
        Ok(self.store().list_router_types()?)
    }

    pub fn delete_router_type(&self, id: &str) -> SchedulerResult<()> {
        let existed = self.store().transaction(|txn| {
            txn.delete_router_type(id).map_err(|e| {
                SchedulerError::on_conflict(e, || SchedulerError::RouterTypeInUse(id.to_string()))
            })
        })?;
        if !existed {
            return Err(SchedulerError::RouterTypeNotFound(id.to_string()));
        }
        self.bindings.registry().forget(id);
        info!(router_type_id = %id, "router type deleted");
        Ok(())
    }

    /// Make sure the namespace router type (and its zero-capacity network
    /// node template) exists.
    pub fn ensure_namespace_router_type(&self) -> SchedulerResult<RouterType> {
        match self.get_router_type(&self.namespace_router_type) {
            Ok(rt) => return Ok(rt),
            Err(SchedulerError::RouterTypeNotFound(_)) => {}
            Err(e) => return Err(e),
        }

        let devices = self.bindings.devices();
        let template = match devices.get_template(NAMESPACE_TEMPLATE_NAME) {
            Ok(t) => t,
            Err(SchedulerError::TemplateNotFound(_)) => devices.create_template(HostingDeviceTemplate {
                id: String::new(),
                name: NAMESPACE_TEMPLATE_NAME.to_string(),
                enabled: true,
                host_category: HostCategory::NetworkNode,
                service_types: "router".to_string(),
                image: None,
                flavor: None,
                default_credentials_id: None,
                configuration_mechanism: None,
                protocol_port: None,
                booting_time: None,
                slot_capacity: 0,
                desired_slots_free: 0,
                tenant_bound: Vec::new(),
                device_driver: "noop".to_string(),
                plugging_driver: "noop".to_string(),
            })?,
            Err(e) => return Err(e),
        };

        self.create_router_type(RouterType {
            id: String::new(),
            name: self.namespace_router_type.clone(),
            description: "Neutron router implemented in Linux network namespace".to_string(),
            template_id: template.id,
            shared: true,
            slot_need: 0,
            scheduler: NAMESPACE.to_string(),
            driver: String::new(),
            cfg_agent_driver: String::new(),
        })
    }

    // ── Routers ────────────────────────────────────────────────────

    pub fn create_router(&self, req: CreateRouterRequest) -> SchedulerResult<Router> {
        let type_name = req.router_type.as_deref().unwrap_or(&self.default_router_type);
        let router_type = self.bindings.get_router_type(type_name)?;

        let router = Router {
            id: req.id.unwrap_or_else(|| uuid::Uuid::new_v4().to_string()),
            tenant_id: req.tenant_id,
            name: req.name,
            admin_state_up: req.admin_state_up,
            status: RouterStatus::Active,
            gw_port: req.gw_port,
            interfaces: Vec::new(),
        };
        let binding = RouterHostingDeviceBinding {
            router_id: router.id.clone(),
            router_type_id: router_type.id.clone(),
            hosting_device_id: None,
            auto_schedule: self.auto_schedule,
            share_hosting_device: req.share_hosting_device.unwrap_or(self.share_hosting_device),
        };
        self.store().transaction(|txn| {
            let conflict = || SchedulerError::AlreadyExists(router.id.clone());
            txn.insert_router(&router)
                .map_err(|e| SchedulerError::on_conflict(e, conflict))?;
            txn.insert_binding(&binding)
                .map_err(|e| SchedulerError::on_conflict(e, conflict))
        })?;
        info!(router_id = %router.id, router_type = %router_type.name, "router created");
        Ok(router)
    }

    fn load_router(&self, id: &str) -> SchedulerResult<Router> {
        self.store()
            .get_router(id)?
            .ok_or_else(|| SchedulerError::RouterNotFound(id.to_string()))
    }

    /// A router with its type and hosting device. Schedules it on first read.
    pub async fn get_router(&self, id: &str) -> SchedulerResult<RouterView> {
        let router = self.load_router(id)?;
        self.bindings.add_type_and_hosting_device_info(router, true).await
    }

    pub fn list_routers(&self) -> SchedulerResult<Vec<RouterView>> {
        self.store()
            .list_routers()?
            .into_iter()
            .map(|r| self.bindings.router_view(r))
            .collect()
    }

    pub async fn update_router(&self, id: &str, req: UpdateRouterRequest) -> SchedulerResult<RouterView> {
        let mut router = self.load_router(id)?;
        let new_network = req.gw_port.as_ref().map(|p| p.network_id.as_str());
        let gateway_changed = match (&router.gw_port, new_network) {
            (Some(old), Some(new)) => old.network_id != new,
            (Some(_), None) => req.remove_gateway,
            (None, _) => false,
        };

        if gateway_changed {
            if let Some(old) = router.gw_port.clone() {
                let view = self.bindings.add_type_and_hosting_device_info(router.clone(), false).await?;
                self.teardown_ports(&view, std::slice::from_ref(&old)).await?;
            }
        }

        if let Some(name) = req.name {
            router.name = name;
        }
        if let Some(up) = req.admin_state_up {
            router.admin_state_up = up;
        }
        if req.remove_gateway {
            router.gw_port = None;
        }
        if let Some(gw) = req.gw_port {
            router.gw_port = Some(gw);
        }
        self.store().transaction(|txn| txn.put_router(&router))?;
        info!(router_id = %id, gateway_changed, "router updated");

        let view = self.bindings.add_type_and_hosting_device_info(router, true).await?;
        self.bindings
            .notifier()
            .routers_updated(vec![view.clone()], None)
            .await;
        Ok(view)
    }

    pub async fn delete_router(&self, id: &str) -> SchedulerResult<()> {
        let router = self.load_router(id)?;
        let view = self.bindings.router_view(router)?;
        if let Some(gw) = &view.router.gw_port {
            self.teardown_ports(&view, std::slice::from_ref(gw)).await?;
        }

        self.bindings.remove_router(id).await?;
        info!(router_id = %id, "router deleted");

        self.bindings.notifier().router_deleted(view).await;
        Ok(())
    }

    pub async fn add_router_interface(&self, router_id: &str, port: RouterPort) -> SchedulerResult<RouterView> {
        let router = self.store().transaction(|txn| {
            let mut router = txn
                .get_router(router_id)?
                .ok_or_else(|| SchedulerError::RouterNotFound(router_id.to_string()))?;
            if router.ports().any(|p| p.id == port.id) {
                return Err(SchedulerError::AlreadyExists(format!("{router_id} port {}", port.id)));
            }
            router.interfaces.push(port.clone());
            txn.put_router(&router)?;
            Ok(router)
        })?;
        info!(router_id, port_id = %port.id, "router interface added");

        let view = self.bindings.add_type_and_hosting_device_info(router, true).await?;
        self.bindings
            .notifier()
            .routers_updated(vec![view.clone()], Some("add_router_interface"))
            .await;
        Ok(view)
    }

    pub async fn remove_router_interface(&self, router_id: &str, port_id: &str) -> SchedulerResult<RouterView> {
        let router = self.load_router(router_id)?;
        let Some(port) = router.interfaces.iter().find(|p| p.id == port_id).cloned() else {
            return Err(SchedulerError::PortNotFound(format!("{router_id} port {port_id}")));
        };
        let view = self.bindings.add_type_and_hosting_device_info(router, false).await?;
        self.teardown_ports(&view, std::slice::from_ref(&port)).await?;

        let router = self.store().transaction(|txn| {
            let mut router = txn
                .get_router(router_id)?
                .ok_or_else(|| SchedulerError::RouterNotFound(router_id.to_string()))?;
            router.interfaces.retain(|p| p.id != port_id);
            txn.put_router(&router)?;
            Ok::<_, SchedulerError>(router)
        })?;
        info!(router_id, port_id, "router interface removed");

        let view = self.bindings.add_type_and_hosting_device_info(router, false).await?;
        self.bindings
            .notifier()
            .routers_updated(vec![view.clone()], Some("remove_router_interface"))
            .await;
        Ok(view)
    }

    // ── Agent sync ─────────────────────────────────────────────────

    /// Full state of the given routers (all routers when `None`) for
    /// configuration agents, scheduling unhosted ones and filling in the
    /// hosting info of every port.
    pub async fn get_sync_data_ext(&self, router_ids: Option<&[String]>) -> SchedulerResult<Vec<RouterView>> {
        let routers = match router_ids {
            Some(ids) => {
                let mut routers = Vec::with_capacity(ids.len());
                for id in ids {
                    match self.store().get_router(id)? {
                        Some(router) => routers.push(router),
                        None => debug!(router_id = %id, "sync requested for unknown router"),
                    }
                }
                routers
            }
            None => self.store().list_routers()?,
        };

        let mut views = Vec::with_capacity(routers.len());
        for router in routers {
            let mut view = self.bindings.add_type_and_hosting_device_info(router, true).await?;
            self.populate_hosting_info(&mut view).await?;
            views.push(view);
        }
        Ok(views)
    }

    /// Hosted device and plugging driver of a view, if it has both.
    fn hosting_context(&self, view: &RouterView) -> SchedulerResult<Option<(HostingDevice, Arc<dyn PluggingDriver>)>> {
        let Some(info) = &view.hosting_device else {
            return Ok(None);
        };
        let Some(device) = self.store().get_hosting_device(&info.id)? else {
            return Ok(None);
        };
        let template = self
            .store()
            .get_template(&device.template_id)?
            .ok_or_else(|| SchedulerError::TemplateNotFound(device.template_id.clone()))?;
        match self.bindings.devices().drivers().plugging_driver(&template.plugging_driver) {
            Some(driver) => Ok(Some((device, driver))),
            None => {
                warn!(
                    template_id = %template.id,
                    plugging_driver = %template.plugging_driver,
                    "no plugging driver registered"
                );
                Ok(None)
            }
        }
    }

    async fn populate_hosting_info(&self, view: &mut RouterView) -> SchedulerResult<()> {
        let Some((device, driver)) = self.hosting_context(view)? else {
            return Ok(());
        };
        let router = view.router.clone();
        if let Some(gw) = view.router.gw_port.as_mut() {
            gw.hosting_info = self
                .hosting_info_for_port(&router, gw, PortType::Gateway, &device, driver.as_ref())
                .await;
        }
        for port in view.router.interfaces.iter_mut() {
            port.hosting_info = self
                .hosting_info_for_port(&router, port, PortType::Interface, &device, driver.as_ref())
                .await;
        }
        Ok(())
    }

    /// Hosting info of one port, allocating a hosting port on first use.
    /// Failures are logged and leave only this port without info.
    async fn hosting_info_for_port(
        &self,
        router: &Router,
        port: &RouterPort,
        port_type: PortType,
        device: &HostingDevice,
        driver: &dyn PluggingDriver,
    ) -> Option<HostingInfo> {
        let binding = match self.store().get_hosting_port_binding(&router.id, &port.id) {
            Ok(Some(binding)) => binding,
            Ok(None) => match self.allocate_port(router, port, port_type, device, driver).await {
                Ok(binding) => binding,
                Err(e) => {
                    warn!(router_id = %router.id, port_id = %port.id, hosting_device_id = %device.id, error = %e, "hosting port allocation failed");
                    return None;
                }
            },
            Err(e) => {
                warn!(router_id = %router.id, port_id = %port.id, error = %e, "cannot read hosting port binding");
                return None;
            }
        };

        let mut info = HostingInfo {
            hosting_port_id: binding.hosting_port_id,
            hosting_port_name: binding.hosting_port_name,
            segmentation_id: binding.segmentation_tag,
            network_type: binding.network_type,
            physical_interface: None,
        };
        if let Err(e) = driver.extend_hosting_port_info(port, device, &mut info).await {
            warn!(router_id = %router.id, port_id = %port.id, error = %e, "extending hosting port info failed");
            return None;
        }
        Some(info)
    }

    async fn allocate_port(
        &self,
        router: &Router,
        port: &RouterPort,
        port_type: PortType,
        device: &HostingDevice,
        driver: &dyn PluggingDriver,
    ) -> SchedulerResult<HostingPortBinding> {
        let allocated = driver
            .allocate_hosting_port(router, port, device)
            .await
            .map_err(|e| SchedulerError::Driver(e.to_string()))?;
        let binding = HostingPortBinding {
            router_id: router.id.clone(),
            port_id: port.id.clone(),
            port_type,
            hosting_port_id: allocated.hosting_port_id,
            hosting_port_name: allocated.hosting_port_name,
            network_type: port.network_type.clone(),
            segmentation_tag: allocated.segmentation_tag,
        };
        // Persisted only once connectivity is up, so a failed setup is
        // retried on the next sync.
        driver
            .setup_logical_port_connectivity(port, device)
            .await
            .map_err(|e| SchedulerError::Driver(e.to_string()))?;
        self.store().transaction(|txn| txn.put_hosting_port_binding(&binding))?;
        debug!(
            router_id = %router.id,
            port_id = %port.id,
            segmentation_tag = binding.segmentation_tag,
            "hosting port allocated"
        );
        Ok(binding)
    }

    /// Tear down connectivity of `ports` on the router's device and drop
    /// their hosting-port bindings. Driver failures are logged only.
    async fn teardown_ports(&self, view: &RouterView, ports: &[RouterPort]) -> SchedulerResult<()> {
        let Some((device, driver)) = self.hosting_context(view)? else {
            return Ok(());
        };
        for port in ports {
            if let Err(e) = driver.teardown_logical_port_connectivity(port, &device).await {
                warn!(
                    router_id = %view.router.id,
                    port_id = %port.id,
                    hosting_device_id = %device.id,
                    error = %e,
                    "teardown of port connectivity failed"
                );
            }
            self.store()
                .transaction(|txn| txn.delete_hosting_port_binding(&view.router.id, &port.id))?;
        }
        Ok(())
    }
}
