//! Internal pub/sub bus for state transitions between conductor subsystems.
//!
//! Broadcasts are fire-and-forget — a late subscriber only sees events
//! emitted after it subscribes. The state store, not the bus, is the
//! durable record.

use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::state_store::StateStore;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BusMessage {
    pub kind: String,
    pub subject: String,
    pub timestamp: String,
}

pub struct MessageBus {
    sender: broadcast::Sender<BusMessage>,
    store: Arc<StateStore>,
}

impl MessageBus {
    pub fn new(store: Arc<StateStore>) -> Self {
        let (sender, _) = broadcast::channel(64);
        Self { sender, store }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<BusMessage> {
        self.sender.subscribe()
    }

    fn publish(&self, kind: &str, subject: &str) {
        let msg = BusMessage {
            kind: kind.to_string(),
            subject: subject.to_string(),
            timestamp: Utc::now().to_rfc3339(),
        };
        // No subscribers is not an error — the store already has the record.
        let _ = self.sender.send(msg);
    }

    pub async fn mark_online(&self, name: &str) {
        let _ = self.store.upsert_agent_state(name, "online", None).await;
        self.publish("online", name);
    }

    pub async fn mark_offline(&self, name: &str) {
        let _ = self.store.upsert_agent_state(name, "offline", None).await;
        self.publish("offline", name);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StoreConfig;

    #[tokio::test]
    async fn mark_online_publishes_and_persists() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(
            StateStore::open(&StoreConfig {
                state_path: dir.path().join("state.json"),
            })
            .await
            .unwrap(),
        );
        let bus = MessageBus::new(store.clone());
        let mut rx = bus.subscribe();

        bus.mark_online("bridge-server").await;

        let msg = rx.try_recv().unwrap();
        assert_eq!(msg.kind, "online");
        assert_eq!(msg.subject, "bridge-server");
        assert_eq!(store.agent_states().await[0].status, "online");
    }
}
