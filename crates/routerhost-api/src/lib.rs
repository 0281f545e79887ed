//! routerhost-api — REST API for routerhost.
//!
//! # API Routes
//!
//! | Method | Path | Description |
//! |---|---|---|
//! | GET/POST | `/api/v1/routers` | List / create routers |
//! | GET/PUT/DELETE | `/api/v1/routers/{id}` | Get (schedules lazily) / update / delete |
//! | POST | `/api/v1/routers/{id}/interfaces` | Attach an internal port |
//! | DELETE | `/api/v1/routers/{id}/interfaces/{port_id}` | Detach a port |
//! | GET/POST | `/api/v1/router-types` | List / create router types |
//! | GET/DELETE | `/api/v1/router-types/{id}` | Get by id or name / delete |
//! | GET/POST | `/api/v1/hosting-device-templates` | List / create templates |
//! | DELETE | `/api/v1/hosting-device-templates/{id}` | Delete a template |
//! | GET/POST | `/api/v1/hosting-devices` | List / register devices |
//! | GET/PUT/DELETE | `/api/v1/hosting-devices/{id}` | Get / update / delete a device |
//! | GET/POST | `/api/v1/credentials` | List / create credentials |
//! | GET | `/api/v1/sync` | Routers with hosting info for agents |
//! | GET | `/api/v1/backlog` | Ids of routers waiting for a device |

pub mod handlers;

use std::sync::Arc;

use axum::Router;
use axum::routing::{delete, get, post};
use routerhost_scheduler::RouterService;

/// Shared state for API handlers.
#[derive(Clone)]
pub struct ApiState {
    pub service: Arc<RouterService>,
}

/// Build the complete API router.
pub fn build_router(service: Arc<RouterService>) -> Router {
    let state = ApiState { service };

    let api_routes = Router::new()
        .route("/routers", get(handlers::list_routers).post(handlers::create_router))
        .route(
            "/routers/{id}",
            get(handlers::get_router)
                .put(handlers::update_router)
                .delete(handlers::delete_router),
        )
        .route("/routers/{id}/interfaces", post(handlers::add_router_interface))
        .route(
            "/routers/{id}/interfaces/{port_id}",
            delete(handlers::remove_router_interface),
        )
        .route(
            "/router-types",
            get(handlers::list_router_types).post(handlers::create_router_type),
        )
        .route(
            "/router-types/{id}",
            get(handlers::get_router_type).delete(handlers::delete_router_type),
        )
        .route(
            "/hosting-device-templates",
            get(handlers::list_templates).post(handlers::create_template),
        )
        .route("/hosting-device-templates/{id}", delete(handlers::delete_template))
        .route(
            "/hosting-devices",
            get(handlers::list_hosting_devices).post(handlers::create_hosting_device),
        )
        .route(
            "/hosting-devices/{id}",
            get(handlers::get_hosting_device)
                .put(handlers::update_hosting_device)
                .delete(handlers::delete_hosting_device),
        )
        .route(
            "/credentials",
            get(handlers::list_credentials).post(handlers::create_credential),
        )
        .route("/sync", get(handlers::sync_routers))
        .route("/backlog", get(handlers::list_backlog))
        .with_state(state);

    Router::new().nest("/api/v1", api_routes)
}
