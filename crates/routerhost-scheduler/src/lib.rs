//! routerhost-scheduler — places logical routers on hosting devices.
//!
//! # Architecture
//!
//! ```text
//! RouterService (router CRUD, agent sync)
//!   └── BindingManager (schedule / unschedule, backlog sweeps, dead devices)
//!         ├── SchedulerRegistry → RouterTypeScheduler (per router type)
//!         ├── HostingDeviceManager (registry, slots, pool maintenance)
//!         │     └── DriverRegistry (device + plugging drivers)
//!         ├── BacklogManager (routers waiting for a device)
//!         └── AgentNotifier (best-effort agent notifications)
//! ```
//!
//! All persistent state lives in `routerhost-state`; placement decisions
//! come from the I/O-free `routerhost-placement` crate.

pub mod backlog;
pub mod binding;
pub mod device_manager;
pub mod drivers;
pub mod error;
pub mod notify;
pub mod router_service;
pub mod slots;
pub mod strategy;

pub use backlog::{BacklogManager, RouterBacklog};
pub use binding::{BindingManager, ScheduleOutcome};
pub use device_manager::{HostingDeviceManager, HostingDeviceUpdate, PoolJob};
pub use drivers::{
    AllocatedHostingPort, DriverRegistry, HostingDeviceDriver, NoopDeviceDriver, NoopPluggingDriver,
    PluggingDriver, ProvisionedDevice,
};
pub use error::{SchedulerError, SchedulerResult};
pub use notify::{AffectedRouters, AgentEvent, AgentNotifier, ChannelNotifier};
pub use router_service::{CreateRouterRequest, RouterService, UpdateRouterRequest};
pub use slots::{SlotGrant, acquire_hosting_device_slots, release_hosting_device_slots};
pub use strategy::{
    NamespaceScheduler, OldestDeviceScheduler, RouterTypeScheduler, SchedulerFactory,
    SchedulerRegistry, SchedulingContext,
};
