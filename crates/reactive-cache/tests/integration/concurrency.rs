use std::sync::Arc;
use std::time::Duration;

use reactive_cache::{Produced, ReactiveCache, Status};

use crate::utils::{Counter, Doubling, key, setup};

#[test]
fn test_threads_share_one_sync_producer_call() {
    setup();
    let calls = Counter::default();
    let cache: ReactiveCache<String, String> = ReactiveCache::builder()
        .producer({
            let calls = calls.clone();
            move |key: &String| {
                calls.incr();
                // Keep the key claimed for a while, so that the other threads pile up.
                std::thread::sleep(Duration::from_millis(20));
                Produced::ready(key.to_uppercase())
            }
        })
        .build();

    std::thread::scope(|scope| {
        for _ in 0..8 {
            scope.spawn(|| {
                let snapshot = cache.get(&key("shared"));
                // Other threads see the key as absent until the sync producer returns.
                assert!(!snapshot.is_pending());
            });
        }
    });

    assert_eq!(calls.get(), 1);
    assert_eq!(cache.value(&key("shared")).as_deref(), Some(&key("SHARED")));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_tasks_share_one_deferred_producer_call() {
    setup();
    let producer = Doubling::deferred();
    let cache = producer.cache();

    let tasks = (0..32).map(|i| {
        let cache = cache.clone();
        tokio::spawn(async move { cache.resolve(key(["a", "b"][i % 2])).await })
    });
    let results = futures::future::join_all(tasks).await;

    for (i, result) in results.into_iter().enumerate() {
        let expected = if i % 2 == 0 { "aa" } else { "bb" };
        assert_eq!(result.unwrap().as_deref(), Ok(&key(expected)));
    }

    let mut calls = producer.calls();
    calls.sort();
    assert_eq!(calls, ["a", "b"]);
}

#[tokio::test]
async fn test_status_is_monotonic() {
    setup();
    tokio::time::pause();
    let producer = Doubling::deferred();
    let cache = producer.cache();

    let seen = Arc::new(std::sync::Mutex::new(Vec::new()));
    let _subscription = cache.observe_status(key("k"), {
        let seen = Arc::clone(&seen);
        move |status| seen.lock().unwrap().push(status)
    });

    for _ in 0..5 {
        cache.get(&key("k"));
        tokio::task::yield_now().await;
    }
    cache.resolve(key("k")).await.unwrap();
    cache.get(&key("k"));

    assert_eq!(
        *seen.lock().unwrap(),
        [None, Some(Status::Pending), Some(Status::Success)]
    );
    assert_eq!(producer.call_count(), 1);
}

#[tokio::test]
async fn test_explicit_runtime() {
    setup();
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(1)
        .enable_time()
        .build()
        .unwrap();

    let producer = Doubling::deferred();
    let cache = ReactiveCache::builder()
        .producer(producer.clone())
        .runtime(runtime.handle().clone())
        .build();

    // The key is resolved on the dedicated runtime, while this one just waits.
    let resolved = tokio::time::timeout(Duration::from_secs(5), cache.resolve(key("x"))).await;
    assert_eq!(resolved.unwrap().as_deref(), Ok(&key("xx")));
    assert_eq!(producer.call_count(), 1);

    runtime.shutdown_background();
}
