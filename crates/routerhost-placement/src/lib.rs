//! routerhost-placement — I/O-free placement decisions.
//!
//! Nothing in this crate touches the store. Callers load the rows they
//! need, ask for a decision, and apply it inside their own transaction.
//!
//! # Components
//!
//! - **`ledger`** — Slot acquire/release decisions (capacity, exclusivity)
//! - **`selector`** — Candidate filtering and oldest-first device selection
//! - **`pool`** — Grow/shrink decisions for hosting-device pools

pub mod ledger;
pub mod pool;
pub mod selector;

pub use ledger::{
    AcquireDecision, Exclusivity, ReleaseDecision, Rejection, SlotRequest, allocated_slots,
    check_acquire, check_release,
};
pub use pool::{PoolAdjustment, PoolSnapshot, available_slots, pool_adjustment};
pub use selector::{DeviceLoad, SelectionRequest, is_eligible, select_device};
