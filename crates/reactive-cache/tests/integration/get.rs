use std::sync::Arc;

use reactive_cache::{Produced, ReactiveCache, Snapshot, Status};

use crate::utils::{Counter, Doubling, LATENCY, key, setup};

fn success(value: &str) -> Snapshot<String> {
    Snapshot {
        status: Some(Status::Success),
        value: Some(Arc::new(value.to_owned())),
    }
}

fn pending() -> Snapshot<String> {
    Snapshot {
        status: Some(Status::Pending),
        value: None,
    }
}

#[test]
fn test_sync_producer_not_called_twice() {
    setup();
    let producer = Doubling::sync();
    let cache = producer.cache();

    // The first `get` triggers the producer.
    assert_eq!(cache.get(&key("xyz")), success("xyzxyz"));
    assert_eq!(producer.calls(), ["xyz"]);

    // Any subsequent `get`s don't.
    assert_eq!(cache.get(&key("xyz")), success("xyzxyz"));
    assert_eq!(producer.call_count(), 1);
}

#[tokio::test]
async fn test_deferred_producer_not_called_twice() {
    setup();
    tokio::time::pause();
    let producer = Doubling::deferred();
    let cache = producer.cache();

    assert_eq!(cache.get(&key("xyz")), pending());
    assert_eq!(producer.calls(), ["xyz"]);

    // Getting the same key while it is in flight doesn't trigger the producer.
    assert_eq!(cache.get(&key("xyz")), pending());
    assert_eq!(producer.call_count(), 1);

    tokio::time::sleep(LATENCY * 2).await;

    assert_eq!(cache.peek(&key("xyz")), success("xyzxyz"));
    assert_eq!(cache.get(&key("xyz")), success("xyzxyz"));
    assert_eq!(producer.call_count(), 1);
}

#[test]
fn test_keys_are_not_mixed() {
    setup();
    let producer = Doubling::sync();
    let cache = producer.cache();

    assert_eq!(cache.get(&key("x")).value.as_deref(), Some(&key("xx")));
    assert_eq!(cache.get(&key("y")).value.as_deref(), Some(&key("yy")));
    for _ in 0..3 {
        assert_eq!(cache.get(&key("x")), success("xx"));
    }
    assert_eq!(producer.call_count(), 2);

    assert_eq!(cache.get(&key("z")).value.as_deref(), Some(&key("zz")));
    assert_eq!(cache.get(&key("y")).value.as_deref(), Some(&key("yy")));

    assert_eq!(producer.calls(), ["x", "y", "z"]);
    assert_eq!(cache.len(), 3);
}

#[test]
fn test_prepopulated_keys_skip_producer() {
    setup();
    let producer = Doubling::sync();
    let cache = producer.cache();
    cache.populate(key("a"), key("apple"));
    cache.populate(key("b"), key("banana"));

    assert_eq!(cache.peek(&key("a")), success("apple"));
    assert_eq!(cache.get(&key("a")), success("apple"));
    assert_eq!(cache.get(&key("b")), success("banana"));
    assert_eq!(producer.call_count(), 0);

    // A key that doesn't exist yet still triggers the producer.
    assert_eq!(cache.get(&key("x")), success("xx"));
    assert_eq!(producer.calls(), ["x"]);
}

#[tokio::test]
async fn test_peek_never_calls_producer() {
    setup();
    tokio::time::pause();
    let producer = Doubling::deferred();
    let cache = producer.cache();
    cache.populate(key("a"), key("apple"));

    assert_eq!(cache.peek(&key("a")), success("apple"));
    for _ in 0..3 {
        assert_eq!(cache.peek(&key("x")), Snapshot::absent());
    }
    assert_eq!(cache.status(&key("x")), None);
    assert_eq!(producer.call_count(), 0);

    cache.get(&key("x"));
    assert_eq!(producer.calls(), ["x"]);

    assert_eq!(cache.peek(&key("x")), pending());
    assert_eq!(producer.call_count(), 1);
}

#[test]
fn test_process_data_applied_once() {
    setup();
    let processed = Counter::default();
    let producer = Doubling::sync();
    let cache = ReactiveCache::builder()
        .producer(producer.clone())
        .process_data({
            let processed = processed.clone();
            move |value: String| {
                processed.incr();
                value.repeat(2)
            }
        })
        .build();

    assert_eq!(cache.get(&key("x")), success("xxxx"));
    assert_eq!(cache.get(&key("x")), success("xxxx"));
    assert_eq!(producer.call_count(), 1);
    assert_eq!(processed.get(), 1);
}

#[tokio::test]
async fn test_process_data_applied_to_deferred_and_populated_values() {
    setup();
    tokio::time::pause();
    let processed = Counter::default();
    let cache: ReactiveCache<String, usize> = ReactiveCache::builder()
        .producer(|key: &String| {
            let len = key.len();
            Produced::deferred(async move { Ok(len) })
        })
        .process_data({
            let processed = processed.clone();
            move |len: usize| {
                processed.incr();
                len * 10
            }
        })
        .build();

    assert_eq!(cache.resolve(key("abc")).await.as_deref(), Ok(&30));
    assert_eq!(processed.get(), 1);

    // Later reads of the resolved key don't process it again.
    tokio::time::sleep(LATENCY).await;
    assert_eq!(cache.get(&key("abc")).value.as_deref(), Some(&30));
    assert_eq!(cache.resolve(key("abc")).await.as_deref(), Ok(&30));
    assert_eq!(processed.get(), 1);

    cache.populate(key("abc"), 7);
    assert_eq!(cache.value(&key("abc")).as_deref(), Some(&70));
    assert_eq!(processed.get(), 2);
}

#[tokio::test]
async fn test_without_producer() {
    setup();
    tokio::time::pause();
    let cache: ReactiveCache<String, String> = ReactiveCache::new();

    assert_eq!(cache.get(&key("xyz")), Snapshot::absent());
    tokio::time::sleep(LATENCY * 10).await;
    assert_eq!(cache.get(&key("xyz")), Snapshot::absent());
    assert!(cache.is_empty());
}

#[tokio::test]
async fn test_populate_overwrites_pending_and_late_resolution_wins() {
    setup();
    tokio::time::pause();
    let producer = Doubling::deferred();
    let cache = producer.cache();

    assert_eq!(cache.get(&key("k")), pending());
    cache.populate(key("k"), key("manual"));
    assert_eq!(cache.peek(&key("k")), success("manual"));

    // The in-flight producer call still completes and overwrites the manual value.
    tokio::time::sleep(LATENCY * 2).await;
    assert_eq!(cache.peek(&key("k")), success("kk"));
    assert_eq!(producer.call_count(), 1);
}

#[tokio::test]
async fn test_resolve() {
    setup();
    tokio::time::pause();
    let producer = Doubling::deferred();
    let cache = producer.cache();

    let (first, second) = futures::join!(cache.resolve(key("a")), cache.resolve(key("a")));
    assert_eq!(first.as_deref(), Ok(&key("aa")));
    assert_eq!(second.as_deref(), Ok(&key("aa")));
    assert_eq!(producer.call_count(), 1);

    // Already resolved keys resolve right away.
    assert_eq!(cache.resolve(key("a")).await.as_deref(), Ok(&key("aa")));
}

#[tokio::test]
async fn test_resolve_waits_for_populate() {
    setup();
    tokio::time::pause();
    let cache: ReactiveCache<String, String> = ReactiveCache::new();

    let waiting = tokio::spawn({
        let cache = cache.clone();
        async move { cache.resolve(key("a")).await }
    });
    tokio::time::sleep(LATENCY).await;
    assert!(!waiting.is_finished());

    cache.populate(key("a"), key("apple"));
    let resolved = waiting.await.unwrap();
    assert_eq!(resolved.as_deref(), Ok(&key("apple")));
}
