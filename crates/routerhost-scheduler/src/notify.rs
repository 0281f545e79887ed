//! Notification gateway towards remote configuration agents.
//!
//! Notifications are best effort: agents reconcile through periodic
//! full-sync pulls, so a dropped event only delays convergence.

use std::collections::BTreeMap;

use async_trait::async_trait;
use routerhost_state::RouterView;
use serde::Serialize;
use tokio::sync::mpsc;
use tracing::debug;

/// Router ids affected per removed hosting device.
pub type AffectedRouters = BTreeMap<String, Vec<String>>;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum AgentEvent {
    RoutersUpdated {
        routers: Vec<RouterView>,
        reason: Option<String>,
    },
    RouterDeleted {
        router: RouterView,
    },
    HostingDevicesRemoved {
        affected: AffectedRouters,
    },
}

#[async_trait]
pub trait AgentNotifier: Send + Sync {
    async fn routers_updated(&self, routers: Vec<RouterView>, reason: Option<&str>);

    async fn router_deleted(&self, router: RouterView);

    async fn hosting_devices_removed(&self, affected: AffectedRouters);
}

/// Forwards every notification as an [`AgentEvent`] on an mpsc channel.
#[derive(Debug, Clone)]
pub struct ChannelNotifier {
    tx: mpsc::UnboundedSender<AgentEvent>,
}

impl ChannelNotifier {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<AgentEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    fn send(&self, event: AgentEvent) {
        if self.tx.send(event).is_err() {
            debug!("agent event dropped, no receiver");
        }
    }
}

#[async_trait]
impl AgentNotifier for ChannelNotifier {
    async fn routers_updated(&self, routers: Vec<RouterView>, reason: Option<&str>) {
        if routers.is_empty() {
            return;
        }
        self.send(AgentEvent::RoutersUpdated {
            routers,
            reason: reason.map(str::to_string),
        });
    }

    async fn router_deleted(&self, router: RouterView) {
        self.send(AgentEvent::RouterDeleted { router });
    }

    async fn hosting_devices_removed(&self, affected: AffectedRouters) {
        self.send(AgentEvent::HostingDevicesRemoved { affected });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn empty_update_is_not_sent() {
        let (notifier, mut rx) = ChannelNotifier::new();
        notifier.routers_updated(Vec::new(), None).await;
        notifier
            .hosting_devices_removed(BTreeMap::from([("hd1".to_string(), vec!["r1".to_string()])]))
            .await;

        match rx.recv().await.unwrap() {
            AgentEvent::HostingDevicesRemoved { affected } => {
                assert_eq!(affected["hd1"], vec!["r1".to_string()]);
            }
            other => panic!("unexpected event {other:?}"),
        }
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn send_without_receiver_is_silent() {
        let (notifier, rx) = ChannelNotifier::new();
        drop(rx);
        notifier.hosting_devices_removed(BTreeMap::new()).await;
    }
}
