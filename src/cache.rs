//! # Collection Cache
//!
//! Cache-aside reads with request coalescing. [`CollectionCache::load`] serves
//! materialized collections straight from the store, paginated; on a miss it
//! broadcasts a [`CollectionRequest`] to producer workers and suspends on a
//! call-scoped result topic until a producer populates the collection and
//! triggers the topic, or the timeout elapses.
//!
//! The miss path is an explicit two-phase loop rather than a recursive
//! re-invocation: `read_page` (the ordinary hit path) and `await_collection`
//! (suspend until signaled or timed out), repeated until a read succeeds.
//! Concurrent misses for one key each register their own result topic and each
//! independently re-read on wake; there is no leader election, and producers
//! may de-duplicate requests for a uuid they are already servicing.

use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, error, instrument, warn};

use async_trait::async_trait;

use crate::channel::{EventChannel, Subscription};
use crate::config::CorralConfig;
use crate::error::{CorralError, Result};
use crate::events::{
    CollectionContext, CollectionRequest, LifecycleBus, LifecycleEvent, ProviderMeta,
};
use crate::store::{Store, StoreCommand};

/// Characters passed through unencoded by [`encode_key`]. Everything else,
/// including the `:` key-layout delimiter and `%` itself, is percent-encoded,
/// which keeps the encoding injective.
const KEY_ENCODING: &AsciiSet = &NON_ALPHANUMERIC.remove(b'-').remove(b'_').remove(b'.');

/// Derive the store-safe collection identifier for a caller key
///
/// Stable and collision-free: two distinct keys always yield distinct uuids,
/// including compound keys that differ only in the reserved `:` delimiter.
pub fn encode_key(key: &str) -> String {
    utf8_percent_encode(key, KEY_ENCODING).to_string()
}

/// One page of a collection plus the per-provider metadata snapshot
#[derive(Debug, Clone, PartialEq)]
pub struct CollectionPage {
    /// Items in the requested window, in append order
    pub items: Vec<Value>,

    /// Metadata records keyed by provider id
    pub meta: HashMap<String, ProviderMeta>,

    /// Estimated items fetched from upstream so far, summed across providers.
    /// A hit can return a short page while providers are still mid-load; this
    /// estimate is how callers can tell.
    pub loaded_estimate: u64,
}

/// Handler invoked for each producer request received by
/// [`CollectionCache::subscribe_with_handler`]
#[async_trait]
pub trait RequestHandler: Send + Sync {
    /// Handle one fetch request. Errors are logged; the pump keeps running.
    async fn handle_request(&self, request: CollectionRequest) -> Result<()>;
}

/// Stream of parsed producer requests
///
/// Wraps the wildcard request-topic subscription; payloads that do not parse
/// as [`CollectionRequest`] are logged and skipped.
#[derive(Debug)]
pub struct RequestStream {
    inner: Subscription,
}

impl RequestStream {
    /// Next request, or `None` once the subscription is torn down
    pub async fn next(&mut self) -> Option<CollectionRequest> {
        loop {
            let message = self.inner.recv().await?;
            match serde_json::from_value::<CollectionRequest>(message.payload) {
                Ok(request) => return Some(request),
                Err(e) => {
                    warn!(topic = %message.topic, error = %e, "unparseable producer request, skipping");
                }
            }
        }
    }
}

/// Distributed lazy-loading collection cache with request coalescing
pub struct CollectionCache<S, C> {
    store: Arc<S>,
    channel: Arc<C>,
    config: CorralConfig,
    lifecycle: LifecycleBus,
}

impl<S, C> CollectionCache<S, C>
where
    S: Store,
    C: EventChannel,
{
    /// Create a cache over a store and transport, with its own lifecycle bus
    pub fn new(store: Arc<S>, channel: Arc<C>, config: CorralConfig) -> Result<Self> {
        Self::with_lifecycle(store, channel, config, LifecycleBus::default())
    }

    /// Create a cache publishing onto a shared lifecycle bus
    pub fn with_lifecycle(
        store: Arc<S>,
        channel: Arc<C>,
        config: CorralConfig,
        lifecycle: LifecycleBus,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            store,
            channel,
            config,
            lifecycle,
        })
    }

    /// The configuration this cache was built with
    pub fn config(&self) -> &CorralConfig {
        &self.config
    }

    /// The lifecycle bus shared by this cache
    pub fn lifecycle(&self) -> LifecycleBus {
        self.lifecycle.clone()
    }

    /// Subscribe to lifecycle events (errors, timeouts, connection state)
    pub fn events(&self) -> broadcast::Receiver<LifecycleEvent> {
        self.lifecycle.subscribe()
    }

    /// Load the first page of a collection with the default window of 10 items
    pub async fn load(&self, key: &str) -> Result<CollectionPage> {
        self.load_page(key, 1, 10).await
    }

    /// Load one page of a collection, fetching through producers on a miss
    ///
    /// On a hit the page is returned as currently materialized, even if some
    /// providers are still mid-load (see [`CollectionPage::loaded_estimate`]).
    /// On a miss this suspends until a producer adds data and triggers the
    /// result topic, then re-reads; if no producer answers within
    /// `timeout_ms` the call fails with [`CorralError::LoadTimeout`] and a
    /// [`LifecycleEvent::Timeout`] is published for observers.
    #[instrument(skip(self), fields(key = %key, page, limit))]
    pub async fn load_page(&self, key: &str, page: u64, limit: u64) -> Result<CollectionPage> {
        let page = page.max(1);
        let limit = limit.max(1);
        let uuid = encode_key(key);

        loop {
            if let Some(found) = self.read_page(&uuid, key, page, limit).await? {
                return Ok(found);
            }

            debug!(uuid = %uuid, "cache miss, awaiting producer");
            self.await_collection(&uuid, key).await?;
        }
    }

    /// Hit path: read one window if any metadata record exists
    async fn read_page(
        &self,
        uuid: &str,
        key: &str,
        page: u64,
        limit: u64,
    ) -> Result<Option<CollectionPage>> {
        let fields = self
            .store
            .hash_scan_prefix(&self.config.meta_key(), &format!("{uuid}:"))
            .await
            .inspect_err(|e| self.lifecycle.report(e))?;

        if fields.is_empty() {
            return Ok(None);
        }

        // Saturating window math: a window past i64 range clamps and reads an
        // empty slice rather than wrapping into a from-the-tail index.
        let start = page.saturating_sub(1).saturating_mul(limit);
        let end = start.saturating_add(limit - 1);

        let raw_items = self
            .store
            .list_range(
                &self.config.items_key(uuid),
                start.min(i64::MAX as u64) as i64,
                end.min(i64::MAX as u64) as i64,
            )
            .await
            .inspect_err(|e| self.lifecycle.report(e))?;

        let items = raw_items
            .iter()
            .map(|raw| serde_json::from_str(raw))
            .collect::<std::result::Result<Vec<Value>, _>>()?;

        let mut meta = HashMap::new();
        let mut loaded_estimate = 0u64;
        for (field, value) in fields {
            let record: ProviderMeta = serde_json::from_str(&value)?;
            loaded_estimate += record.loaded_estimate();
            let provider = record
                .provider
                .clone()
                .unwrap_or_else(|| field[field.rfind(':').map_or(0, |i| i + 1)..].to_string());
            meta.insert(provider, record);
        }

        // Prefetch hint: the requested window is closing in on what providers
        // have fetched so far. Fire a refill request and return the page
        // without waiting; a publish failure is advisory only.
        if end.saturating_add(self.config.buffer) > loaded_estimate {
            let request = CollectionRequest {
                uuid: uuid.to_string(),
                key: key.to_string(),
                topic: self.fresh_result_topic(uuid),
                meta: Some(meta.clone()),
            };
            if let Err(e) = self.publish_request(&request).await {
                warn!(uuid = %uuid, error = %e, "refill request failed");
                self.lifecycle.report(&e);
            }
        }

        Ok(Some(CollectionPage {
            items,
            meta,
            loaded_estimate,
        }))
    }

    /// Miss path: request a fetch and suspend until woken or timed out
    async fn await_collection(&self, uuid: &str, key: &str) -> Result<()> {
        let topic = self.fresh_result_topic(uuid);
        let mut subscription = self.channel.subscribe(&topic).await?;

        let request = CollectionRequest {
            uuid: uuid.to_string(),
            key: key.to_string(),
            topic: topic.clone(),
            meta: None,
        };
        self.publish_request(&request).await?;

        let wait = Duration::from_millis(self.config.timeout_ms);
        let outcome = tokio::time::timeout(wait, subscription.recv()).await;
        let _ = self.channel.unsubscribe(&topic).await;

        match outcome {
            Ok(Some(_)) => {
                debug!(uuid = %uuid, "woken by producer trigger");
                Ok(())
            }
            Ok(None) => Err(CorralError::SubscriptionClosed(topic)),
            Err(_) => {
                self.lifecycle
                    .publish(LifecycleEvent::Timeout(key.to_string()));
                Err(CorralError::LoadTimeout {
                    key: key.to_string(),
                })
            }
        }
    }

    /// Append items and refresh metadata in one atomic batch
    ///
    /// Refreshes the cycle-index score to now, writes the metadata record at
    /// `{uuid}:{provider}` (generating a provider id if the metadata does not
    /// name one), and appends every item in call order. Waiters are *not*
    /// notified; the producer calls [`trigger`](Self::trigger) with the
    /// request's result topic after this returns.
    #[instrument(skip(self, meta, items), fields(key = %ctx.key, items = items.len()))]
    pub async fn add(
        &self,
        ctx: &CollectionContext,
        meta: &ProviderMeta,
        items: &[Value],
    ) -> Result<()> {
        let uuid = encode_key(&ctx.key);
        let provider = meta
            .provider
            .clone()
            .unwrap_or_else(|| uuid::Uuid::new_v4().simple().to_string());

        let mut commands = Vec::with_capacity(items.len() + 2);
        commands.push(StoreCommand::SortedSetAdd {
            key: self.config.cycle_key(),
            score: chrono::Utc::now().timestamp(),
            member: uuid.clone(),
        });
        commands.push(StoreCommand::HashSet {
            key: self.config.meta_key(),
            field: format!("{uuid}:{provider}"),
            value: serde_json::to_string(meta)?,
        });
        for item in items {
            commands.push(StoreCommand::ListPush {
                key: self.config.items_key(&uuid),
                value: serde_json::to_string(item)?,
            });
        }

        self.store
            .execute_batch(commands)
            .await
            .inspect_err(|e| self.lifecycle.report(e))?;

        debug!(uuid = %uuid, provider = %provider, "collection appended");
        Ok(())
    }

    /// Subscribe to all fetch requests for this cache instance
    pub async fn subscribe(&self) -> Result<RequestStream> {
        let inner = self.channel.subscribe(&self.config.request_pattern()).await?;
        Ok(RequestStream { inner })
    }

    /// Run a [`RequestHandler`] against incoming fetch requests in a
    /// background task; the handle stops when the subscription is torn down
    pub async fn subscribe_with_handler<H>(&self, handler: H) -> Result<JoinHandle<()>>
    where
        H: RequestHandler + 'static,
    {
        let mut stream = self.subscribe().await?;
        Ok(tokio::spawn(async move {
            while let Some(request) = stream.next().await {
                if let Err(e) = handler.handle_request(request).await {
                    error!(error = %e, "request handler failed");
                }
            }
            debug!("producer request pump stopped");
        }))
    }

    /// Tear down the fetch-request subscription
    pub async fn unsubscribe(&self) -> Result<()> {
        self.channel
            .unsubscribe(&self.config.request_pattern())
            .await
    }

    /// Publish a wake-up payload to a result topic
    ///
    /// Producers call this after a successful [`add`](Self::add), passing the
    /// `topic` from the request they are answering. Defaults to an empty
    /// object payload.
    pub async fn trigger(&self, topic: &str, payload: Option<Value>) -> Result<()> {
        self.channel
            .publish(topic, &payload.unwrap_or_else(|| json!({})))
            .await
    }

    fn fresh_result_topic(&self, uuid: &str) -> String {
        let call_id = uuid::Uuid::new_v4().simple().to_string();
        self.config.result_topic(uuid, &call_id)
    }

    async fn publish_request(&self, request: &CollectionRequest) -> Result<()> {
        let topic = self.config.request_topic(&request.uuid);
        self.channel
            .publish(&topic, &serde_json::to_value(request)?)
            .await
    }
}
