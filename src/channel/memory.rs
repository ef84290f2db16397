//! In-process event channel
//!
//! Clones share one pattern registry, so a producer half and a consumer half
//! created from the same channel see each other's traffic. Used by tests and
//! single-process deployments; semantics mirror the wire transport: fire and
//! forget, at-least-once, trailing-`*` patterns.

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::debug;

use crate::channel::{topic_matches, EventChannel, Subscription, TopicMessage, SUBSCRIPTION_BUFFER};
use crate::error::Result;

/// In-process pub/sub channel sharing state across clones
#[derive(Debug, Clone, Default)]
pub struct MemoryChannel {
    registry: Arc<Mutex<HashMap<String, mpsc::Sender<TopicMessage>>>>,
}

impl MemoryChannel {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl EventChannel for MemoryChannel {
    async fn publish(&self, topic: &str, payload: &Value) -> Result<()> {
        // Snapshot matching senders first; sending must not hold the lock.
        let targets: Vec<(String, mpsc::Sender<TopicMessage>)> = {
            let registry = self.registry.lock();
            registry
                .iter()
                .filter(|(pattern, _)| topic_matches(pattern, topic))
                .map(|(pattern, sender)| (pattern.clone(), sender.clone()))
                .collect()
        };

        for (pattern, sender) in targets {
            let message = TopicMessage {
                topic: topic.to_string(),
                payload: payload.clone(),
            };
            if sender.send(message).await.is_err() {
                // Receiver dropped without unsubscribing; reap the entry.
                debug!(pattern = %pattern, "dropping dead subscription");
                self.registry.lock().remove(&pattern);
            }
        }

        Ok(())
    }

    async fn subscribe(&self, pattern: &str) -> Result<Subscription> {
        let (sender, receiver) = mpsc::channel(SUBSCRIPTION_BUFFER);
        // Replacing an existing entry drops its sender, which closes the old
        // subscription's receiver.
        self.registry.lock().insert(pattern.to_string(), sender);
        Ok(Subscription::new(pattern.to_string(), receiver))
    }

    async fn unsubscribe(&self, pattern: &str) -> Result<()> {
        self.registry.lock().remove(pattern);
        Ok(())
    }
}
