//! Redis pub/sub event channel
//!
//! Publishes through a managed connection; each subscription gets its own
//! pub/sub connection whose message stream is pumped into a bounded queue by
//! a background task. Trailing-`*` patterns map to PSUBSCRIBE, exact topics
//! to SUBSCRIBE. Unsubscribing (or re-subscribing the same pattern) aborts
//! the pump task, which drops the pub/sub connection.

use async_trait::async_trait;
use futures::StreamExt;
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::channel::{EventChannel, Subscription, TopicMessage, SUBSCRIPTION_BUFFER};
use crate::config::CorralConfig;
use crate::error::{CorralError, Result};

/// Redis-backed pub/sub channel
pub struct RedisChannel {
    client: redis::Client,
    publish_conn: redis::aio::ConnectionManager,
    pumps: Arc<Mutex<HashMap<String, JoinHandle<()>>>>,
}

impl std::fmt::Debug for RedisChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisChannel")
            .field("active_subscriptions", &self.pumps.lock().len())
            .finish()
    }
}

impl RedisChannel {
    /// Connect to the transport endpoint named by the configuration
    pub async fn connect(config: &CorralConfig) -> Result<Self> {
        let client = redis::Client::open(config.store_url().as_str())
            .map_err(|e| CorralError::transport("client open", e))?;
        let publish_conn = redis::aio::ConnectionManager::new(client.clone())
            .await
            .map_err(|e| CorralError::transport("connect", e))?;

        Ok(Self {
            client,
            publish_conn,
            pumps: Arc::new(Mutex::new(HashMap::new())),
        })
    }

    /// Number of active subscriptions
    pub fn subscription_count(&self) -> usize {
        self.pumps.lock().len()
    }
}

impl Drop for RedisChannel {
    fn drop(&mut self) {
        for (_, pump) in self.pumps.lock().drain() {
            pump.abort();
        }
    }
}

#[async_trait]
impl EventChannel for RedisChannel {
    async fn publish(&self, topic: &str, payload: &Value) -> Result<()> {
        let mut conn = self.publish_conn.clone();
        redis::cmd("PUBLISH")
            .arg(topic)
            .arg(payload.to_string())
            .query_async::<()>(&mut conn)
            .await
            .map_err(|e| CorralError::transport("PUBLISH", e))
    }

    async fn subscribe(&self, pattern: &str) -> Result<Subscription> {
        let mut pubsub = self
            .client
            .get_async_pubsub()
            .await
            .map_err(|e| CorralError::transport("pubsub connect", e))?;

        if pattern.ends_with('*') {
            pubsub
                .psubscribe(pattern)
                .await
                .map_err(|e| CorralError::transport("PSUBSCRIBE", e))?;
        } else {
            pubsub
                .subscribe(pattern)
                .await
                .map_err(|e| CorralError::transport("SUBSCRIBE", e))?;
        }

        let (sender, receiver) = mpsc::channel(SUBSCRIPTION_BUFFER);
        let pump_pattern = pattern.to_string();

        let pump = tokio::spawn(async move {
            let mut stream = pubsub.into_on_message();

            while let Some(message) = stream.next().await {
                let topic = message.get_channel_name().to_string();
                let raw: String = match message.get_payload() {
                    Ok(raw) => raw,
                    Err(e) => {
                        warn!(topic = %topic, error = %e, "unreadable pub/sub payload, skipping");
                        continue;
                    }
                };

                // Non-JSON payloads are delivered as plain strings rather
                // than dropped.
                let payload = serde_json::from_str(&raw).unwrap_or(Value::String(raw));

                if sender.send(TopicMessage { topic, payload }).await.is_err() {
                    debug!(pattern = %pump_pattern, "subscription receiver dropped, stopping pump");
                    break;
                }
            }
        });

        let previous = self.pumps.lock().insert(pattern.to_string(), pump);
        if let Some(previous) = previous {
            previous.abort();
        }

        Ok(Subscription::new(pattern.to_string(), receiver))
    }

    async fn unsubscribe(&self, pattern: &str) -> Result<()> {
        if let Some(pump) = self.pumps.lock().remove(pattern) {
            pump.abort();
        }
        Ok(())
    }
}

// Integration coverage for RedisChannel requires a reachable Redis instance;
// the channel contract is exercised against MemoryChannel.
