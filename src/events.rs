//! # Wire events and lifecycle notifications
//!
//! Two kinds of events live here:
//!
//! - [`CollectionRequest`] — the wire payload broadcast on the producer-request
//!   topic when a `load` misses (initial request) or when a page approaches the
//!   loaded estimate (refill request). Producers receive these through
//!   [`CollectionCache::subscribe`](crate::cache::CollectionCache::subscribe).
//! - [`LifecycleEvent`] — out-of-band notifications (store errors, connection
//!   lifecycle, load timeouts) published on a [`LifecycleBus`] for passive
//!   observers. The bus is a `tokio::sync::broadcast` channel rather than an
//!   event-emitter base class; publishing with zero subscribers is fine.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use tokio::sync::broadcast;

/// Pagination cursor state reported by one provider for one collection
///
/// A provider that has fetched `page - 1` full pages of size `limit` from its
/// upstream has contributed roughly `(page - 1) * limit` items. Extra fields
/// round-trip untouched so providers can stash cursor tokens or source hints.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ProviderMeta {
    /// Identifier of the data source that produced this slice. When left
    /// empty, `add` generates one so the metadata record still gets a
    /// distinct field.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,

    /// Next upstream page this provider would fetch
    #[serde(default)]
    pub page: u64,

    /// Upstream page size
    #[serde(default)]
    pub limit: u64,

    /// Provider-specific fields, carried verbatim
    #[serde(flatten)]
    pub extra: serde_json::Map<String, Value>,
}

impl ProviderMeta {
    /// Create metadata for a named provider
    pub fn new(provider: impl Into<String>, page: u64, limit: u64) -> Self {
        Self {
            provider: Some(provider.into()),
            page,
            limit,
            extra: serde_json::Map::new(),
        }
    }

    /// Items already fetched from this provider's upstream, estimated from the
    /// pagination cursor
    pub fn loaded_estimate(&self) -> u64 {
        self.page.saturating_sub(1) * self.limit
    }
}

/// Identifies the collection a producer is adding to
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CollectionContext {
    /// Opaque caller-supplied collection key
    pub key: String,
}

impl CollectionContext {
    pub fn new(key: impl Into<String>) -> Self {
        Self { key: key.into() }
    }
}

/// Fetch request broadcast to producer workers
///
/// `meta` is `None` on an initial request (nothing cached yet) and carries the
/// current metadata snapshot on a refill request, so producers can resume from
/// their own cursors. `topic` is the call-scoped result topic the requesting
/// `load` is waiting on; producers wake it via
/// [`CollectionCache::trigger`](crate::cache::CollectionCache::trigger) after a
/// successful `add`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CollectionRequest {
    /// Encoded collection identifier
    pub uuid: String,

    /// Original caller-supplied key
    pub key: String,

    /// Result topic to trigger once data is available
    pub topic: String,

    /// Metadata snapshot, present on refill requests
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meta: Option<HashMap<String, ProviderMeta>>,
}

impl CollectionRequest {
    /// Context for the `add` answering this request
    pub fn context(&self) -> CollectionContext {
        CollectionContext::new(self.key.clone())
    }

    /// Whether this is a refill request for an already-materialized collection
    pub fn is_refill(&self) -> bool {
        self.meta.is_some()
    }
}

/// Out-of-band notification for passive observers
#[derive(Debug, Clone, PartialEq)]
pub enum LifecycleEvent {
    /// A store or transport operation failed
    Error(String),

    /// Store connection established
    Connect,

    /// Store connection ready for commands
    Ready,

    /// Store connection shut down
    End,

    /// A `load` for this key was not answered within the timeout
    Timeout(String),
}

/// Broadcast bus for [`LifecycleEvent`]s
///
/// Cheap to clone; all clones publish into the same channel. Slow observers
/// that fall behind the channel capacity lose the oldest events, which is
/// acceptable for advisory notifications.
#[derive(Debug, Clone)]
pub struct LifecycleBus {
    sender: broadcast::Sender<LifecycleEvent>,
}

impl LifecycleBus {
    /// Create a bus with the given channel capacity
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish an event; having no subscribers is not an error
    pub fn publish(&self, event: LifecycleEvent) {
        let _ = self.sender.send(event);
    }

    /// Report an error on the bus
    pub fn report(&self, error: &crate::error::CorralError) {
        self.publish(LifecycleEvent::Error(error.to_string()));
    }

    /// Subscribe to events published after this call
    pub fn subscribe(&self) -> broadcast::Receiver<LifecycleEvent> {
        self.sender.subscribe()
    }

    /// Number of active observers
    pub fn observer_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for LifecycleBus {
    fn default() -> Self {
        Self::new(128)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_provider_meta_loaded_estimate() {
        assert_eq!(ProviderMeta::new("p1", 3, 10).loaded_estimate(), 20);
        assert_eq!(ProviderMeta::new("p1", 1, 10).loaded_estimate(), 0);
        // page 0 does not underflow
        assert_eq!(ProviderMeta::new("p1", 0, 10).loaded_estimate(), 0);
    }

    #[test]
    fn test_provider_meta_extra_fields_roundtrip() {
        let raw = json!({"provider": "p1", "page": 2, "limit": 5, "cursor": "abc"});
        let meta: ProviderMeta = serde_json::from_value(raw.clone()).unwrap();
        assert_eq!(meta.extra.get("cursor"), Some(&json!("abc")));
        assert_eq!(serde_json::to_value(&meta).unwrap(), raw);
    }

    #[test]
    fn test_request_meta_optionality() {
        let initial = CollectionRequest {
            uuid: "u".into(),
            key: "k".into(),
            topic: "t".into(),
            meta: None,
        };
        assert!(!initial.is_refill());
        let json = serde_json::to_string(&initial).unwrap();
        assert!(!json.contains("meta"));

        let parsed: CollectionRequest = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, initial);
        assert_eq!(parsed.context().key, "k");
    }

    #[tokio::test]
    async fn test_bus_publish_without_observers() {
        let bus = LifecycleBus::default();
        assert_eq!(bus.observer_count(), 0);
        // must not panic or error
        bus.publish(LifecycleEvent::Ready);
    }

    #[tokio::test]
    async fn test_bus_delivers_to_observer() {
        let bus = LifecycleBus::default();
        let mut rx = bus.subscribe();
        bus.publish(LifecycleEvent::Timeout("key1".into()));
        assert_eq!(rx.recv().await.unwrap(), LifecycleEvent::Timeout("key1".into()));
    }
}
