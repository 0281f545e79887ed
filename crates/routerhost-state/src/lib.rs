//! routerhost-state — transactional record store for routerhost.
//!
//! Backed by [redb](https://docs.rs/redb), holds hosting-device templates,
//! credentials, hosting devices, router types, routers, router bindings,
//! slot allocations and hosting-port bindings.
//!
//! # Architecture
//!
//! All domain types are JSON-serialized into redb's `&[u8]` value columns.
//! Composite keys (`{hosting_device_id}:{router_id}`, `{router_id}:{port_id}`)
//! enable prefix scans for related records.
//!
//! Writes go through [`StateStore::transaction`], which commits on `Ok` and
//! aborts on `Err`. Integrity violations (deleting a referenced row,
//! inserting a duplicate key) surface as [`StateError::Conflict`].

pub mod error;
pub mod store;
pub mod tables;
pub mod types;

pub use error::{StateError, StateResult};
pub use store::{StateReader, StateStore, StoreTxn};
pub use types::*;
