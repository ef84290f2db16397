//! End-to-end collection cache flows against the in-memory store and channel:
//! hit-path pagination, miss-path coalescing, producer wake-ups, timeouts,
//! and refill prefetch hints.

use corral::{
    CollectionCache, CollectionContext, CorralConfig, CorralError, LifecycleEvent, MemoryChannel,
    MemoryStore, ProviderMeta,
};
use serde_json::{json, Value};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

type MemoryCache = CollectionCache<MemoryStore, MemoryChannel>;

fn cache_with(config: CorralConfig) -> Arc<MemoryCache> {
    let store = Arc::new(MemoryStore::new());
    let channel = Arc::new(MemoryChannel::new());
    Arc::new(CollectionCache::new(store, channel, config).unwrap())
}

fn test_config() -> CorralConfig {
    CorralConfig::new().with_scope("test").with_name("flow")
}

#[tokio::test]
async fn add_then_load_preserves_append_order_across_producers() {
    let cache = cache_with(test_config());
    let ctx = CollectionContext::new("orders");

    cache
        .add(
            &ctx,
            &ProviderMeta::new("p1", 2, 10),
            &[json!({"v": "a"}), json!({"v": "b"})],
        )
        .await
        .unwrap();
    cache
        .add(&ctx, &ProviderMeta::new("p2", 2, 10), &[json!({"v": "c"})])
        .await
        .unwrap();

    let page = cache.load_page("orders", 1, 10).await.unwrap();
    assert_eq!(
        page.items,
        vec![json!({"v": "a"}), json!({"v": "b"}), json!({"v": "c"})]
    );
    assert_eq!(page.meta.len(), 2);
    assert_eq!(page.meta["p1"].provider.as_deref(), Some("p1"));
    assert_eq!(page.meta["p2"].provider.as_deref(), Some("p2"));
}

#[tokio::test]
async fn load_pages_through_windows() {
    let cache = cache_with(test_config());
    let ctx = CollectionContext::new("paged");
    let items: Vec<Value> = (0..5).map(|i| json!({ "n": i })).collect();

    cache
        .add(&ctx, &ProviderMeta::new("p1", 2, 5), &items)
        .await
        .unwrap();

    let page = cache.load_page("paged", 2, 2).await.unwrap();
    assert_eq!(page.items, vec![json!({"n": 2}), json!({"n": 3})]);

    // window past the end of the sequence: hit with empty items
    let past = cache.load_page("paged", 4, 2).await.unwrap();
    assert!(past.items.is_empty());
    assert_eq!(past.meta.len(), 1);
}

#[tokio::test]
async fn provider_meta_scenario() {
    let cache = cache_with(test_config());

    cache
        .add(
            &CollectionContext::new("a"),
            &ProviderMeta::new("p1", 2, 10),
            &[json!({"v": 1}), json!({"v": 2})],
        )
        .await
        .unwrap();

    let page = cache.load_page("a", 1, 10).await.unwrap();
    assert_eq!(page.items, vec![json!({"v": 1}), json!({"v": 2})]);
    assert_eq!(page.meta["p1"].provider.as_deref(), Some("p1"));
    assert_eq!(page.loaded_estimate, 10);
}

#[tokio::test]
async fn miss_blocks_until_producer_adds_and_triggers() {
    let cache = cache_with(test_config());

    let producer = Arc::clone(&cache);
    let mut requests = producer.subscribe().await.unwrap();
    tokio::spawn(async move {
        while let Some(request) = requests.next().await {
            let meta = ProviderMeta::new("upstream", 2, 10);
            producer
                .add(&request.context(), &meta, &[json!({"fetched": true})])
                .await
                .unwrap();
            producer.trigger(&request.topic, None).await.unwrap();
        }
    });

    let page = cache.load("lazy-key").await.unwrap();
    assert_eq!(page.items, vec![json!({"fetched": true})]);
    assert_eq!(page.meta["upstream"].provider.as_deref(), Some("upstream"));
}

#[tokio::test]
async fn miss_times_out_without_producer() {
    let cache = cache_with(test_config().with_timeout_ms(100));
    let mut events = cache.events();

    let result = cache.load("missing-key").await;
    match result {
        Err(CorralError::LoadTimeout { key }) => assert_eq!(key, "missing-key"),
        other => panic!("expected LoadTimeout, got {other:?}"),
    }

    // the timeout is also observable out-of-band
    assert_eq!(
        events.recv().await.unwrap(),
        LifecycleEvent::Timeout("missing-key".to_string())
    );
}

#[tokio::test]
async fn concurrent_misses_all_wake_on_one_fetch() {
    let cache = cache_with(test_config());

    // Producer that de-duplicates: adds once per uuid but wakes every waiter.
    let producer = Arc::clone(&cache);
    let mut requests = producer.subscribe().await.unwrap();
    tokio::spawn(async move {
        let mut serviced = HashSet::new();
        while let Some(request) = requests.next().await {
            if serviced.insert(request.uuid.clone()) {
                let meta = ProviderMeta::new("upstream", 2, 10);
                producer
                    .add(&request.context(), &meta, &[json!({"v": 1})])
                    .await
                    .unwrap();
            }
            producer.trigger(&request.topic, None).await.unwrap();
        }
    });

    let (first, second) = tokio::join!(cache.load("shared-key"), cache.load("shared-key"));
    let first = first.unwrap();
    let second = second.unwrap();

    // both callers see the single fetched copy, not one each
    assert_eq!(first.items, vec![json!({"v": 1})]);
    assert_eq!(second.items, vec![json!({"v": 1})]);
}

#[tokio::test]
async fn near_exhausted_page_emits_refill_request() {
    // buffer 5: reading window [0,9] against a loaded estimate of 10 trips
    // the read-ahead threshold
    let cache = cache_with(test_config().with_buffer(5));
    let ctx = CollectionContext::new("deep");

    cache
        .add(
            &ctx,
            &ProviderMeta::new("p1", 2, 10),
            &[json!({"v": 1}), json!({"v": 2})],
        )
        .await
        .unwrap();

    let mut requests = cache.subscribe().await.unwrap();

    let page = cache.load_page("deep", 1, 10).await.unwrap();
    assert_eq!(page.items.len(), 2);

    let refill = requests.next().await.unwrap();
    assert!(refill.is_refill());
    assert_eq!(refill.key, "deep");
    let snapshot = refill.meta.unwrap();
    assert_eq!(snapshot["p1"].page, 2);
}

#[tokio::test]
async fn comfortable_margin_emits_no_refill() {
    // loaded estimate 100, window [0,9], buffer 10: no prefetch needed
    let cache = cache_with(test_config().with_buffer(10));
    let ctx = CollectionContext::new("deep");

    cache
        .add(&ctx, &ProviderMeta::new("p1", 11, 10), &[json!({"v": 1})])
        .await
        .unwrap();

    let mut requests = cache.subscribe().await.unwrap();
    cache.load_page("deep", 1, 10).await.unwrap();

    // nothing should arrive; give the channel a moment to prove it
    let quiet = tokio::time::timeout(Duration::from_millis(50), requests.next()).await;
    assert!(quiet.is_err());
}

#[tokio::test]
async fn window_beyond_numeric_range_is_an_empty_hit() {
    let cache = cache_with(test_config());
    let ctx = CollectionContext::new("huge");

    cache
        .add(&ctx, &ProviderMeta::new("p1", 2, 10), &[json!({"v": 1})])
        .await
        .unwrap();

    // extreme page/limit values must clamp, not wrap into a tail index
    let page = cache.load_page("huge", u64::MAX, 2).await.unwrap();
    assert!(page.items.is_empty());
    assert_eq!(page.meta.len(), 1);

    let page = cache.load_page("huge", 2, u64::MAX).await.unwrap();
    assert!(page.items.is_empty());
}

#[tokio::test]
async fn generated_provider_id_when_unnamed() {
    let cache = cache_with(test_config());
    let meta = ProviderMeta {
        provider: None,
        page: 2,
        limit: 5,
        ..Default::default()
    };

    cache
        .add(&CollectionContext::new("anon"), &meta, &[json!(1)])
        .await
        .unwrap();

    let page = cache.load_page("anon", 1, 10).await.unwrap();
    assert_eq!(page.meta.len(), 1);
    // keyed by the generated id from the metadata record's hash field
    let generated = page.meta.keys().next().unwrap();
    assert!(!generated.is_empty());
    assert_eq!(page.loaded_estimate, 5);
}

#[tokio::test]
async fn compound_keys_with_delimiter_stay_distinct() {
    let cache = cache_with(test_config());

    cache
        .add(
            &CollectionContext::new("user:42"),
            &ProviderMeta::new("p1", 2, 10),
            &[json!("colon")],
        )
        .await
        .unwrap();
    cache
        .add(
            &CollectionContext::new("user-42"),
            &ProviderMeta::new("p1", 2, 10),
            &[json!("dash")],
        )
        .await
        .unwrap();

    let colon = cache.load_page("user:42", 1, 10).await.unwrap();
    let dash = cache.load_page("user-42", 1, 10).await.unwrap();
    assert_eq!(colon.items, vec![json!("colon")]);
    assert_eq!(dash.items, vec![json!("dash")]);
}
