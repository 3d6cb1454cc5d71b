//! Group-based real-time notification hub.
//!
//! Every group owns a bounded broadcast channel created on first use.
//! Publishing to a group nobody listens to is not an error; receivers that
//! fall behind lose the oldest messages.

pub mod groups;

use std::collections::HashMap;
use std::sync::Arc;

use common::protocol::Notification;
use tokio::sync::{broadcast, RwLock};
use tracing::debug;

pub use groups::{can_join, default_groups, ADMINS, PARTNERS};

#[derive(Clone, Debug)]
pub struct NotificationHub {
    groups: Arc<RwLock<HashMap<String, broadcast::Sender<Notification>>>>,
    capacity: usize,
}

impl NotificationHub {
    pub fn new(capacity: usize) -> Self {
        Self {
            groups: Arc::new(RwLock::new(HashMap::new())),
            capacity,
        }
    }

    /// Subscribe to `group`, creating its channel if needed.
    pub async fn subscribe(&self, group: &str) -> broadcast::Receiver<Notification> {
        if let Some(tx) = self.groups.read().await.get(group) {
            return tx.subscribe();
        }
        let mut groups = self.groups.write().await;
        groups
            .entry(group.to_owned())
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .subscribe()
    }

    /// Send `notification` to every current member of `group`. Returns how
    /// many receivers it reached.
    pub async fn publish(&self, group: &str, notification: Notification) -> usize {
        let groups = self.groups.read().await;
        let delivered = match groups.get(group) {
            Some(tx) => tx.send(notification).unwrap_or(0),
            None => 0,
        };
        debug!(group, delivered, "notification published");
        delivered
    }

    /// Drop channels that have no receivers left.
    pub async fn prune(&self) {
        self.groups
            .write()
            .await
            .retain(|_, tx| tx.receiver_count() > 0);
    }

    #[cfg(test)]
    pub async fn group_count(&self) -> usize {
        self.groups.read().await.len()
    }
}
