//! # Event Channel
//!
//! Thin façade over the pub/sub transport: publish a JSON payload to a topic,
//! subscribe to an exact topic or a trailing-`*` wildcard pattern, tear the
//! subscription down. Delivery is at-least-once; a channel instance keeps one
//! active subscription per pattern, and re-subscribing a pattern replaces the
//! previous subscription.

pub mod memory;
pub mod redis;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::mpsc;

use crate::error::Result;

pub use memory::MemoryChannel;
pub use redis::RedisChannel;

/// Buffer size for per-subscription message queues
pub(crate) const SUBSCRIPTION_BUFFER: usize = 64;

/// A message delivered to a subscription
#[derive(Debug, Clone, PartialEq)]
pub struct TopicMessage {
    /// Concrete topic the message was published to
    pub topic: String,
    /// JSON payload
    pub payload: Value,
}

/// Receiving half of one topic-pattern subscription
#[derive(Debug)]
pub struct Subscription {
    pattern: String,
    receiver: mpsc::Receiver<TopicMessage>,
}

impl Subscription {
    pub(crate) fn new(pattern: String, receiver: mpsc::Receiver<TopicMessage>) -> Self {
        Self { pattern, receiver }
    }

    /// Pattern this subscription was registered under
    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    /// Next message, or `None` once the subscription has been replaced or
    /// torn down
    pub async fn recv(&mut self) -> Option<TopicMessage> {
        self.receiver.recv().await
    }
}

/// Pub/sub transport contract
#[async_trait]
pub trait EventChannel: Send + Sync {
    /// Publish a payload to a concrete topic
    async fn publish(&self, topic: &str, payload: &Value) -> Result<()>;

    /// Subscribe to an exact topic or trailing-`*` pattern
    async fn subscribe(&self, pattern: &str) -> Result<Subscription>;

    /// Tear down the subscription registered for `pattern`, if any
    async fn unsubscribe(&self, pattern: &str) -> Result<()>;
}

/// Whether `topic` matches a subscription `pattern` (exact, or trailing-`*`
/// prefix wildcard)
pub(crate) fn topic_matches(pattern: &str, topic: &str) -> bool {
    match pattern.strip_suffix('*') {
        Some(prefix) => topic.starts_with(prefix),
        None => pattern == topic,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_topic_matching() {
        assert!(topic_matches("a:b:request:u1", "a:b:request:u1"));
        assert!(!topic_matches("a:b:request:u1", "a:b:request:u2"));
        assert!(topic_matches("a:b:request:*", "a:b:request:u2"));
        assert!(topic_matches("*", "anything"));
        assert!(!topic_matches("a:b:*", "a:c:request"));
    }
}
