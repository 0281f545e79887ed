//! REST API handlers.
//!
//! Each handler delegates to the `RouterService` (or the device manager
//! behind it) and wraps the outcome in a JSON envelope.

use axum::Json;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Deserialize;
use tracing::error;

use routerhost_scheduler::{
    CreateRouterRequest, HostingDeviceUpdate, SchedulerError, SchedulerResult, UpdateRouterRequest,
};
use routerhost_state::{DeviceCredential, HostingDevice, HostingDeviceTemplate, RouterPort, RouterType};

use crate::ApiState;

/// Response wrapper for consistent API format.
#[derive(serde::Serialize)]
struct ApiResponse<T: serde::Serialize> {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl<T: serde::Serialize> ApiResponse<T> {
    fn ok(data: T) -> Json<Self> {
        Json(Self {
            success: true,
            data: Some(data),
            error: None,
        })
    }
}

fn error_response(msg: &str, status: StatusCode) -> impl IntoResponse {
    (
        status,
        Json(ApiResponse::<()> {
            success: false,
            data: None,
            error: Some(msg.to_string()),
        }),
    )
}

fn status_for(err: &SchedulerError) -> StatusCode {
    match err {
        SchedulerError::RouterNotFound(_)
        | SchedulerError::RouterTypeNotFound(_)
        | SchedulerError::PortNotFound(_)
        | SchedulerError::HostingDeviceNotFound(_)
        | SchedulerError::TemplateNotFound(_)
        | SchedulerError::CredentialNotFound(_) => StatusCode::NOT_FOUND,
        SchedulerError::HostingDeviceInUse(_)
        | SchedulerError::TemplateInUse(_)
        | SchedulerError::RouterTypeInUse(_)
        | SchedulerError::CredentialInUse(_)
        | SchedulerError::AlreadyExists(_) => StatusCode::CONFLICT,
        SchedulerError::Config(_) => StatusCode::BAD_REQUEST,
        SchedulerError::MultipleRouterTypes(_)
        | SchedulerError::BindingInfo(_)
        | SchedulerError::Driver(_)
        | SchedulerError::Strategy(_)
        | SchedulerError::State(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn failure(err: SchedulerError) -> Response {
    let status = status_for(&err);
    if status.is_server_error() {
        error!(error = %err, "request failed");
    }
    error_response(&err.to_string(), status).into_response()
}

fn respond<T: serde::Serialize>(result: SchedulerResult<T>) -> Response {
    match result {
        Ok(data) => ApiResponse::ok(data).into_response(),
        Err(e) => failure(e),
    }
}

fn created<T: serde::Serialize>(result: SchedulerResult<T>) -> Response {
    match result {
        Ok(data) => (StatusCode::CREATED, ApiResponse::ok(data)).into_response(),
        Err(e) => failure(e),
    }
}

// ── Routers ────────────────────────────────────────────────────

/// GET /api/v1/routers
pub async fn list_routers(State(state): State<ApiState>) -> impl IntoResponse {
    respond(state.service.list_routers())
}

/// POST /api/v1/routers
pub async fn create_router(
    State(state): State<ApiState>,
    Json(req): Json<CreateRouterRequest>,
) -> impl IntoResponse {
    created(state.service.create_router(req))
}

/// GET /api/v1/routers/:id
pub async fn get_router(State(state): State<ApiState>, Path(id): Path<String>) -> impl IntoResponse {
    respond(state.service.get_router(&id).await)
}

/// PUT /api/v1/routers/:id
pub async fn update_router(
    State(state): State<ApiState>,
    Path(id): Path<String>,
    Json(req): Json<UpdateRouterRequest>,
) -> impl IntoResponse {
    respond(state.service.update_router(&id, req).await)
}

/// DELETE /api/v1/routers/:id
pub async fn delete_router(State(state): State<ApiState>, Path(id): Path<String>) -> impl IntoResponse {
    respond(state.service.delete_router(&id).await.map(|()| "deleted"))
}

/// POST /api/v1/routers/:id/interfaces
pub async fn add_router_interface(
    State(state): State<ApiState>,
    Path(id): Path<String>,
    Json(port): Json<RouterPort>,
) -> impl IntoResponse {
    respond(state.service.add_router_interface(&id, port).await)
}

/// DELETE /api/v1/routers/:id/interfaces/:port_id
pub async fn remove_router_interface(
    State(state): State<ApiState>,
    Path((id, port_id)): Path<(String, String)>,
) -> impl IntoResponse {
    respond(state.service.remove_router_interface(&id, &port_id).await)
}

// ── Router types ───────────────────────────────────────────────

/// GET /api/v1/router-types
pub async fn list_router_types(State(state): State<ApiState>) -> impl IntoResponse {
    respond(state.service.list_router_types())
}

/// POST /api/v1/router-types
pub async fn create_router_type(
    State(state): State<ApiState>,
    Json(router_type): Json<RouterType>,
) -> impl IntoResponse {
    created(state.service.create_router_type(router_type))
}

/// GET /api/v1/router-types/:id (id or unique name)
pub async fn get_router_type(State(state): State<ApiState>, Path(id): Path<String>) -> impl IntoResponse {
    respond(state.service.get_router_type(&id))
}

/// DELETE /api/v1/router-types/:id
pub async fn delete_router_type(State(state): State<ApiState>, Path(id): Path<String>) -> impl IntoResponse {
    respond(state.service.delete_router_type(&id).map(|()| "deleted"))
}

// ── Hosting device templates ───────────────────────────────────

/// GET /api/v1/hosting-device-templates
pub async fn list_templates(State(state): State<ApiState>) -> impl IntoResponse {
    respond(state.service.bindings().devices().list_templates())
}

/// POST /api/v1/hosting-device-templates
pub async fn create_template(
    State(state): State<ApiState>,
    Json(template): Json<HostingDeviceTemplate>,
) -> impl IntoResponse {
    created(state.service.bindings().devices().create_template(template))
}

/// DELETE /api/v1/hosting-device-templates/:id
pub async fn delete_template(State(state): State<ApiState>, Path(id): Path<String>) -> impl IntoResponse {
    respond(state.service.bindings().devices().delete_template(&id).map(|()| "deleted"))
}

// ── Hosting devices ────────────────────────────────────────────

/// GET /api/v1/hosting-devices
pub async fn list_hosting_devices(State(state): State<ApiState>) -> impl IntoResponse {
    respond(state.service.bindings().devices().list_hosting_devices())
}

/// POST /api/v1/hosting-devices
pub async fn create_hosting_device(
    State(state): State<ApiState>,
    Json(device): Json<HostingDevice>,
) -> impl IntoResponse {
    created(state.service.bindings().devices().create_hosting_device(device))
}

/// GET /api/v1/hosting-devices/:id
pub async fn get_hosting_device(State(state): State<ApiState>, Path(id): Path<String>) -> impl IntoResponse {
    respond(state.service.bindings().devices().get_hosting_device(&id))
}

/// PUT /api/v1/hosting-devices/:id
pub async fn update_hosting_device(
    State(state): State<ApiState>,
    Path(id): Path<String>,
    Json(update): Json<HostingDeviceUpdate>,
) -> impl IntoResponse {
    respond(state.service.bindings().devices().update_hosting_device(&id, update))
}

/// DELETE /api/v1/hosting-devices/:id
pub async fn delete_hosting_device(State(state): State<ApiState>, Path(id): Path<String>) -> impl IntoResponse {
    respond(
        state
            .service
            .bindings()
            .devices()
            .delete_hosting_device(&id)
            .map(|()| "deleted"),
    )
}

// ── Credentials ────────────────────────────────────────────────

/// GET /api/v1/credentials
pub async fn list_credentials(State(state): State<ApiState>) -> impl IntoResponse {
    respond(state.service.bindings().devices().list_credentials())
}

/// POST /api/v1/credentials
pub async fn create_credential(
    State(state): State<ApiState>,
    Json(credential): Json<DeviceCredential>,
) -> impl IntoResponse {
    created(state.service.bindings().devices().create_credential(credential))
}

// ── Agent sync ─────────────────────────────────────────────────

#[derive(Debug, Default, Deserialize)]
pub struct SyncQuery {
    /// Comma separated router ids. All routers when absent.
    #[serde(default)]
    pub router_ids: Option<String>,
}

/// GET /api/v1/sync?router_ids=a,b
pub async fn sync_routers(State(state): State<ApiState>, Query(query): Query<SyncQuery>) -> impl IntoResponse {
    let ids: Option<Vec<String>> = query.router_ids.map(|raw| {
        raw.split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect()
    });
    respond(state.service.get_sync_data_ext(ids.as_deref()).await)
}

/// GET /api/v1/backlog
pub async fn list_backlog(State(state): State<ApiState>) -> impl IntoResponse {
    ApiResponse::ok(state.service.bindings().backlog().ids().await)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use routerhost_core::SchedulingConfig;
    use routerhost_scheduler::{
        BacklogManager, BindingManager, ChannelNotifier, DriverRegistry, HostingDeviceManager,
        RouterService, SchedulerRegistry,
    };
    use routerhost_state::{DeviceStatus, HostCategory, StateStore};

    fn test_state() -> ApiState {
        let store = StateStore::open_in_memory().unwrap();
        let (devices, _pool_jobs) =
            HostingDeviceManager::new(store, Arc::new(DriverRegistry::with_defaults()), 420);
        let (notifier, _events) = ChannelNotifier::new();
        let bindings = Arc::new(BindingManager::new(
            devices,
            Arc::new(SchedulerRegistry::with_defaults(420)),
            Arc::new(BacklogManager::new()),
            Arc::new(notifier),
            "NetworkNamespace_router",
        ));
        let service = RouterService::new(bindings, &SchedulingConfig::default());
        ApiState {
            service: Arc::new(service),
        }
    }

    fn test_template() -> HostingDeviceTemplate {
        HostingDeviceTemplate {
            id: "t1".to_string(),
            name: "CSR1kv_template".to_string(),
            enabled: true,
            host_category: HostCategory::Hardware,
            service_types: "router".to_string(),
            image: None,
            flavor: None,
            default_credentials_id: None,
            configuration_mechanism: None,
            protocol_port: Some(22),
            booting_time: Some(0),
            slot_capacity: 10,
            desired_slots_free: 0,
            tenant_bound: Vec::new(),
            device_driver: "noop".to_string(),
            plugging_driver: "noop".to_string(),
        }
    }

    fn test_router_type(scheduler: &str) -> RouterType {
        RouterType {
            id: "rt1".to_string(),
            name: "CSR1kv_router".to_string(),
            description: String::new(),
            template_id: "t1".to_string(),
            shared: true,
            slot_need: 2,
            scheduler: scheduler.to_string(),
            driver: String::new(),
            cfg_agent_driver: String::new(),
        }
    }

    fn test_device(id: &str) -> HostingDevice {
        HostingDevice {
            id: id.to_string(),
            tenant_id: "admin".to_string(),
            template_id: "t1".to_string(),
            name: id.to_string(),
            credentials_id: None,
            device_id: None,
            admin_state_up: true,
            management_port_id: None,
            management_ip_address: Some("10.0.100.7".to_string()),
            protocol_port: None,
            cfg_agent_id: None,
            created_at: 1000,
            status: DeviceStatus::Active,
            tenant_bound: None,
            auto_delete: false,
        }
    }

    fn router_request(id: &str) -> CreateRouterRequest {
        CreateRouterRequest {
            id: Some(id.to_string()),
            tenant_id: "tenant-a".to_string(),
            name: id.to_string(),
            admin_state_up: true,
            router_type: Some("CSR1kv_router".to_string()),
            gw_port: None,
            share_hosting_device: None,
        }
    }

    async fn with_csr_type(state: &ApiState) {
        let resp = create_template(State(state.clone()), Json(test_template())).await.into_response();
        assert_eq!(resp.status(), StatusCode::CREATED);
        let resp = create_router_type(State(state.clone()), Json(test_router_type("oldest_device")))
            .await
            .into_response();
        assert_eq!(resp.status(), StatusCode::CREATED);
    }

    #[tokio::test]
    async fn list_routers_empty() {
        let state = test_state();
        let resp = list_routers(State(state)).await.into_response();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn unknown_scheduler_is_bad_request() {
        let state = test_state();
        create_template(State(state.clone()), Json(test_template())).await;
        let resp = create_router_type(State(state), Json(test_router_type("round_robin")))
            .await
            .into_response();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn create_and_get_router() {
        let state = test_state();
        with_csr_type(&state).await;
        create_hosting_device(State(state.clone()), Json(test_device("hd1"))).await;

        let resp = create_router(State(state.clone()), Json(router_request("r1")))
            .await
            .into_response();
        assert_eq!(resp.status(), StatusCode::CREATED);

        let resp = get_router(State(state.clone()), Path("r1".to_string())).await.into_response();
        assert_eq!(resp.status(), StatusCode::OK);
        let view = state.service.list_routers().unwrap();
        assert_eq!(view[0].hosting_device.as_ref().unwrap().id, "hd1");
    }

    #[tokio::test]
    async fn router_without_device_is_backlogged() {
        let state = test_state();
        with_csr_type(&state).await;
        create_router(State(state.clone()), Json(router_request("r1"))).await;

        let resp = get_router(State(state.clone()), Path("r1".to_string())).await.into_response();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(state.service.bindings().backlog().ids().await, vec!["r1".to_string()]);
    }

    #[tokio::test]
    async fn get_nonexistent_router() {
        let state = test_state();
        let resp = get_router(State(state), Path("nope".to_string())).await.into_response();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn duplicate_router_conflicts() {
        let state = test_state();
        with_csr_type(&state).await;
        create_router(State(state.clone()), Json(router_request("r1"))).await;
        let resp = create_router(State(state), Json(router_request("r1")))
            .await
            .into_response();
        assert_eq!(resp.status(), StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn template_in_use_conflicts() {
        let state = test_state();
        with_csr_type(&state).await;
        let resp = delete_template(State(state.clone()), Path("t1".to_string()))
            .await
            .into_response();
        assert_eq!(resp.status(), StatusCode::CONFLICT);

        let resp = delete_router_type(State(state.clone()), Path("rt1".to_string()))
            .await
            .into_response();
        assert_eq!(resp.status(), StatusCode::OK);
        let resp = delete_template(State(state), Path("t1".to_string())).await.into_response();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn hosting_device_in_use_conflicts() {
        let state = test_state();
        with_csr_type(&state).await;
        create_hosting_device(State(state.clone()), Json(test_device("hd1"))).await;
        create_router(State(state.clone()), Json(router_request("r1"))).await;
        get_router(State(state.clone()), Path("r1".to_string())).await;

        let resp = delete_hosting_device(State(state.clone()), Path("hd1".to_string()))
            .await
            .into_response();
        assert_eq!(resp.status(), StatusCode::CONFLICT);

        delete_router(State(state.clone()), Path("r1".to_string())).await;
        let resp = delete_hosting_device(State(state), Path("hd1".to_string()))
            .await
            .into_response();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn remove_missing_interface_is_not_found() {
        let state = test_state();
        with_csr_type(&state).await;
        create_router(State(state.clone()), Json(router_request("r1"))).await;
        let resp = remove_router_interface(State(state), Path(("r1".to_string(), "p9".to_string())))
            .await
            .into_response();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn sync_filters_router_ids() {
        let state = test_state();
        with_csr_type(&state).await;
        create_hosting_device(State(state.clone()), Json(test_device("hd1"))).await;
        create_router(State(state.clone()), Json(router_request("r1"))).await;
        create_router(State(state.clone()), Json(router_request("r2"))).await;

        let query = SyncQuery {
            router_ids: Some("r2, ".to_string()),
        };
        let resp = sync_routers(State(state.clone()), Query(query)).await.into_response();
        assert_eq!(resp.status(), StatusCode::OK);

        let views = state
            .service
            .get_sync_data_ext(Some(&["r2".to_string()][..]))
            .await
            .unwrap();
        assert_eq!(views.len(), 1);
        assert_eq!(views[0].router.id, "r2");
    }

    #[test]
    fn error_statuses() {
        assert_eq!(status_for(&SchedulerError::TemplateInUse("t".into())), StatusCode::CONFLICT);
        assert_eq!(status_for(&SchedulerError::PortNotFound("p".into())), StatusCode::NOT_FOUND);
        assert_eq!(
            status_for(&SchedulerError::MultipleRouterTypes("x".into())),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(status_for(&SchedulerError::Config("c".into())), StatusCode::BAD_REQUEST);
    }
}
