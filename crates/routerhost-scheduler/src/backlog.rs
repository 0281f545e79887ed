//! Backlog of routers waiting for a hosting device.
//!
//! The map and its refresh flag live behind one async mutex. Holding the
//! guard serializes sweeps against each other and against ad-hoc
//! backlog/unbacklog calls.

use std::collections::BTreeMap;

use routerhost_state::{Router, RouterId};
use tokio::sync::{Mutex, MutexGuard};
use tracing::{debug, info};

/// Routers awaiting a (re-)scheduling attempt, keyed by router id.
#[derive(Debug)]
pub struct RouterBacklog {
    entries: BTreeMap<RouterId, Router>,
    refresh: bool,
}

impl RouterBacklog {
    /// A fresh backlog starts invalidated so the first sweep rebuilds it
    /// from persisted bindings.
    pub fn new() -> Self {
        Self {
            entries: BTreeMap::new(),
            refresh: true,
        }
    }

    /// Add a router. Returns `false` if it was already backlogged.
    pub fn insert(&mut self, router: Router) -> bool {
        if self.entries.contains_key(&router.id) {
            return false;
        }
        info!(router_id = %router.id, "router backlogged");
        self.entries.insert(router.id.clone(), router);
        true
    }

    /// Remove a router. Returns `false` if it was not backlogged.
    pub fn remove(&mut self, router_id: &str) -> bool {
        let removed = self.entries.remove(router_id).is_some();
        if removed {
            info!(router_id, "router removed from backlog");
        }
        removed
    }

    pub fn contains(&self, router_id: &str) -> bool {
        self.entries.contains_key(router_id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn ids(&self) -> Vec<RouterId> {
        self.entries.keys().cloned().collect()
    }

    pub fn routers(&self) -> Vec<Router> {
        self.entries.values().cloned().collect()
    }

    /// Request a full rebuild on the next sweep.
    pub fn invalidate(&mut self) {
        self.refresh = true;
    }

    pub fn needs_resync(&self) -> bool {
        self.refresh
    }

    /// Whether a sweep has anything to do.
    pub fn needs_sweep(&self) -> bool {
        self.refresh || !self.entries.is_empty()
    }

    /// Replace the whole backlog and clear the refresh flag.
    pub fn replace_all(&mut self, routers: impl IntoIterator<Item = Router>) {
        self.entries = routers.into_iter().map(|r| (r.id.clone(), r)).collect();
        self.refresh = false;
        debug!(size = self.entries.len(), "backlog rebuilt");
    }
}

impl Default for RouterBacklog {
    fn default() -> Self {
        Self::new()
    }
}

/// Shared handle to the backlog.
#[derive(Debug, Default)]
pub struct BacklogManager {
    backlog: Mutex<RouterBacklog>,
}

impl BacklogManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Exclusive access for multi-step operations such as a sweep.
    pub async fn lock(&self) -> MutexGuard<'_, RouterBacklog> {
        self.backlog.lock().await
    }

    pub async fn backlog_router(&self, router: Router) -> bool {
        self.backlog.lock().await.insert(router)
    }

    pub async fn unbacklog_router(&self, router_id: &str) -> bool {
        self.backlog.lock().await.remove(router_id)
    }

    pub async fn contains(&self, router_id: &str) -> bool {
        self.backlog.lock().await.contains(router_id)
    }

    pub async fn ids(&self) -> Vec<RouterId> {
        self.backlog.lock().await.ids()
    }

    pub async fn invalidate(&self) {
        self.backlog.lock().await.invalidate();
    }
}
