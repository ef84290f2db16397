#![allow(clippy::missing_errors_doc)] // Allow public functions without # Errors sections
#![allow(clippy::must_use_candidate)] // Allow methods without must_use when context is clear

//! # Corral
//!
//! Distributed, lazy-loading collection cache with request coalescing.
//!
//! ## Overview
//!
//! Callers ask for a logical "collection" identified by an opaque key. If the
//! collection is already materialized in the backing store it is served
//! directly, paginated. If not, a fetch request is broadcast to any number of
//! producer workers over pub/sub, and every concurrent caller waiting on the
//! same key is woken once a producer populates it. A TTL-bounded exclusion
//! guard keeps side-effecting operations single-holder across coordinator
//! instances, and a time-windowed retention sweeper purges collections that
//! have not been refreshed within a retention window.
//!
//! Corral composes the store and transport primitives rather than
//! implementing them: the backing key-value store and pub/sub transport sit
//! behind the [`Store`] and [`EventChannel`] façades (Redis-backed by
//! default, in-memory for tests and single-process use).
//!
//! ## Module Organization
//!
//! - [`config`] - Explicit immutable configuration, key layout, topic naming
//! - [`error`] - Structured error handling
//! - [`events`] - Wire events and the lifecycle notification bus
//! - [`store`] - Backing key-value store façade (Redis / in-memory)
//! - [`channel`] - Pub/sub transport façade (Redis / in-memory)
//! - [`cache`] - Collection cache: load, add, producer subscription, trigger
//! - [`guard`] - TTL-bounded distributed mutual exclusion
//! - [`sweeper`] - Time-windowed garbage collection
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use corral::{CollectionCache, CorralConfig, MemoryChannel, MemoryStore, ProviderMeta};
//! use serde_json::json;
//! use std::sync::Arc;
//!
//! # async fn example() -> corral::Result<()> {
//! let config = CorralConfig::new().with_scope("app").with_name("search");
//! let store = Arc::new(MemoryStore::new());
//! let channel = Arc::new(MemoryChannel::new());
//! let cache = Arc::new(CollectionCache::new(store, channel, config)?);
//!
//! // Producer worker: answer fetch requests, then wake the waiters.
//! let producer = Arc::clone(&cache);
//! let mut requests = producer.subscribe().await?;
//! tokio::spawn(async move {
//!     while let Some(request) = requests.next().await {
//!         let meta = ProviderMeta::new("upstream", 2, 10);
//!         let items = vec![json!({"v": 1}), json!({"v": 2})];
//!         if producer.add(&request.context(), &meta, &items).await.is_ok() {
//!             let _ = producer.trigger(&request.topic, None).await;
//!         }
//!     }
//! });
//!
//! // Caller: misses coalesce into producer requests and block until woken.
//! let page = cache.load("some-key").await?;
//! println!("{} items", page.items.len());
//! # Ok(())
//! # }
//! ```

pub mod cache;
pub mod channel;
pub mod config;
pub mod error;
pub mod events;
pub mod guard;
pub mod store;
pub mod sweeper;

pub use cache::{encode_key, CollectionCache, CollectionPage, RequestHandler, RequestStream};
pub use channel::{EventChannel, MemoryChannel, RedisChannel, Subscription, TopicMessage};
pub use config::CorralConfig;
pub use error::{CorralError, Result};
pub use events::{
    CollectionContext, CollectionRequest, LifecycleBus, LifecycleEvent, ProviderMeta,
};
pub use guard::{ExclusionGuard, ExclusiveOutcome};
pub use store::{MemoryStore, RedisStore, Store, StoreCommand};
pub use sweeper::{RetentionSweeper, SweepStats};
