//! End-to-end pool behaviour against the recording shipper, on paused time.

use async_trait::async_trait;
use dispatch_pool::testing::{AckPolicy, RecordingShipper};
use dispatch_pool::{
    BackoffPolicy, DispatchPool, DispatchPoolConfig, PoolStatus, ShipOutcome, ShippingClient,
};
use event_cache::{CacheStore, EventCache, EventCacheConfig, QueuedItem};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

const INTERVAL: Duration = Duration::from_secs(10);

fn item(id: &str) -> QueuedItem {
    QueuedItem::new(id, format!("{{\"id\":\"{}\"}}", id))
}

fn config(limit: usize) -> DispatchPoolConfig {
    DispatchPoolConfig {
        dispatch_interval: INTERVAL,
        dispatch_limit: limit,
        backoff: BackoffPolicy::default(),
    }
}

fn spawn_pool(cache: EventCache, shipper: &RecordingShipper, limit: usize) -> DispatchPool {
    DispatchPool::spawn(cache, Arc::new(shipper.clone()), config(limit))
}

/// Status once the pool has applied the completion of any in-flight flush.
async fn settle(pool: &DispatchPool) -> PoolStatus {
    loop {
        let status = pool.status().await.expect("pool running");
        if !status.is_flushing {
            return status;
        }
        tokio::task::yield_now().await;
    }
}

fn gap(a: Instant, b: Instant) -> f64 {
    b.duration_since(a).as_secs_f64()
}

fn assert_close(actual: f64, expected: f64) {
    assert!(
        (actual - expected).abs() < 0.01,
        "expected ~{}s, got {}s",
        expected,
        actual
    );
}

#[tokio::test(start_paused = true)]
async fn threshold_flush_then_timer_flush_for_remainder() {
    let shipper = RecordingShipper::new(AckPolicy::All);
    let pool = spawn_pool(EventCache::in_memory(100), &shipper, 2);

    pool.push(item("a"));
    pool.push(item("b"));
    pool.push(item("c"));

    let first = shipper.wait_for_call(1).await;
    assert_eq!(first.ids, vec!["a", "b"]);

    let status = settle(&pool).await;
    assert_eq!(status.pending, 1);
    assert_eq!(pool.cache().read_from_head(10), vec![item("c")]);
    assert!(status.timer_armed);

    let second = shipper.wait_for_call(2).await;
    assert_eq!(second.ids, vec!["c"]);
    assert!(second.at.duration_since(first.at) >= INTERVAL);
    assert_eq!(shipper.call_count(), 2);

    let status = settle(&pool).await;
    assert_eq!(status.pending, 0);
    assert!(!status.timer_armed);
}

#[tokio::test(start_paused = true)]
async fn timer_flushes_below_threshold() {
    let shipper = RecordingShipper::new(AckPolicy::All);
    let pool = spawn_pool(EventCache::in_memory(100), &shipper, 50);
    let start = Instant::now();

    pool.push(item("a"));
    let call = shipper.wait_for_call(1).await;

    assert_eq!(call.ids, vec!["a"]);
    assert!(call.at.duration_since(start) >= INTERVAL);
}

#[tokio::test(start_paused = true)]
async fn zero_progress_flushes_back_off_and_keep_items() {
    let shipper = RecordingShipper::new(AckPolicy::None);
    let cache = EventCache::in_memory(100);
    cache.write_to_tail(vec![item("a"), item("b"), item("c")]);
    let pool = spawn_pool(cache, &shipper, 50);

    let first = shipper.wait_for_call(1).await;
    let second = shipper.wait_for_call(2).await;
    let third = shipper.wait_for_call(3).await;
    let fourth = shipper.wait_for_call(4).await;

    // Each wait is the previous one times the backoff factor.
    assert_close(gap(first.at, second.at), 11.0);
    assert_close(gap(second.at, third.at), 12.1);
    assert_close(gap(third.at, fourth.at), 13.31);

    let status = pool.status().await.unwrap();
    assert_eq!(status.pending, 3);
    assert!(status.backoff_delay > Duration::ZERO);
    assert_eq!(fourth.ids, vec!["a", "b", "c"]);
}

#[tokio::test(start_paused = true)]
async fn backoff_is_capped_at_ceiling() {
    let shipper = RecordingShipper::new(AckPolicy::None);
    let cache = EventCache::in_memory(100);
    cache.write_to_tail(vec![item("a")]);
    let pool = DispatchPool::spawn(
        cache,
        Arc::new(shipper.clone()),
        DispatchPoolConfig {
            dispatch_interval: INTERVAL,
            dispatch_limit: 50,
            backoff: BackoffPolicy {
                factor: 2.0,
                ceiling: Duration::from_secs(15),
            },
        },
    );

    let mut previous = shipper.wait_for_call(1).await;
    let mut gaps = Vec::new();
    for n in 2..=6 {
        let call = shipper.wait_for_call(n).await;
        gaps.push(gap(previous.at, call.at));
        previous = call;
    }

    for pair in gaps.windows(2) {
        assert!(pair[1] >= pair[0] - 0.01);
    }
    assert_close(*gaps.last().unwrap(), 25.0);
    assert_eq!(
        pool.status().await.unwrap().backoff_delay,
        Duration::from_secs(15)
    );
}

#[tokio::test(start_paused = true)]
async fn successful_flush_resets_backoff() {
    let shipper = RecordingShipper::new(AckPolicy::None);
    let cache = EventCache::in_memory(100);
    cache.write_to_tail(vec![item("a"), item("b")]);
    let pool = spawn_pool(cache, &shipper, 50);

    shipper.wait_for_call(1).await;
    shipper.wait_for_call(2).await;
    assert!(pool.status().await.unwrap().backoff_delay > Duration::ZERO);

    shipper.set_policy(AckPolicy::FirstN(1));
    let third = shipper.wait_for_call(3).await;
    assert_eq!(third.ids, vec!["a", "b"]);

    let status = settle(&pool).await;
    assert_eq!(status.backoff_delay, Duration::ZERO);
    assert_eq!(status.pending, 1);

    let fourth = shipper.wait_for_call(4).await;
    assert_eq!(fourth.ids, vec!["b"]);
    assert_close(gap(third.at, fourth.at), INTERVAL.as_secs_f64());
}

#[tokio::test(start_paused = true)]
async fn partial_acknowledgement_retries_only_unacknowledged() {
    let acked: std::collections::HashSet<String> = ["a".to_string(), "c".to_string()].into();
    let shipper = RecordingShipper::new(AckPolicy::Ids(acked));
    let pool = spawn_pool(EventCache::in_memory(100), &shipper, 3);

    pool.push(item("a"));
    pool.push(item("b"));
    pool.push(item("c"));

    let first = shipper.wait_for_call(1).await;
    assert_eq!(first.ids, vec!["a", "b", "c"]);

    let status = settle(&pool).await;
    assert_eq!(status.pending, 1);
    assert_eq!(status.backoff_delay, Duration::ZERO);

    shipper.set_policy(AckPolicy::All);
    let second = shipper.wait_for_call(2).await;
    assert_eq!(second.ids, vec!["b"]);
}

#[tokio::test(start_paused = true)]
async fn only_one_ship_call_in_flight() {
    let shipper = RecordingShipper::gated(AckPolicy::All);
    let pool = spawn_pool(EventCache::in_memory(1000), &shipper, 2);

    pool.push(item("a"));
    pool.push(item("b"));
    shipper.wait_for_call(1).await;

    for i in 0..20 {
        pool.push(item(&format!("late-{}", i)));
        pool.flush();
    }
    let status = pool.status().await.unwrap();
    assert!(status.is_flushing);
    assert!(!status.timer_armed);
    assert_eq!(status.pending, 22);

    // Long past any timer: still one call outstanding.
    tokio::time::sleep(Duration::from_secs(600)).await;
    assert_eq!(shipper.call_count(), 1);

    shipper.release(1);
    let second = shipper.wait_for_call(2).await;
    assert_eq!(second.ids, vec!["late-0", "late-1"]);
    assert_eq!(shipper.max_in_flight(), 1);

    shipper.release(100);
}

#[tokio::test(start_paused = true)]
async fn batch_never_contains_duplicate_ids() {
    let shipper = RecordingShipper::new(AckPolicy::All);
    let pool = spawn_pool(EventCache::in_memory(100), &shipper, 3);

    pool.push(item("a"));
    pool.push(item("a"));
    pool.push(item("b"));
    pool.push(item("c"));

    let call = shipper.wait_for_call(1).await;
    assert_eq!(call.ids, vec!["a", "b", "c"]);
}

#[tokio::test(start_paused = true)]
async fn late_push_is_not_added_to_in_flight_batch() {
    let shipper = RecordingShipper::gated(AckPolicy::All);
    let pool = spawn_pool(EventCache::in_memory(100), &shipper, 2);

    pool.push(item("a"));
    pool.push(item("b"));
    shipper.wait_for_call(1).await;
    pool.push(item("c"));
    shipper.release(1);

    let status = settle(&pool).await;
    assert_eq!(status.pending, 1);
    assert_eq!(shipper.calls()[0].ids, vec!["a", "b"]);

    shipper.release(1);
    assert_eq!(shipper.wait_for_call(2).await.ids, vec!["c"]);
}

#[tokio::test(start_paused = true)]
async fn external_flush_ships_immediately() {
    let shipper = RecordingShipper::new(AckPolicy::All);
    let pool = spawn_pool(EventCache::in_memory(100), &shipper, 50);
    let start = Instant::now();

    pool.push(item("a"));
    pool.flush();

    let call = shipper.wait_for_call(1).await;
    assert_eq!(call.ids, vec!["a"]);
    assert!(call.at.duration_since(start) < INTERVAL);
}

#[tokio::test(start_paused = true)]
async fn lowering_limit_flushes_when_threshold_met() {
    let shipper = RecordingShipper::new(AckPolicy::All);
    let pool = spawn_pool(EventCache::in_memory(100), &shipper, 50);

    pool.push(item("a"));
    pool.push(item("b"));
    pool.push(item("c"));
    assert_eq!(shipper.call_count(), 0);

    pool.set_dispatch_limit(2);
    let call = shipper.wait_for_call(1).await;

    assert_eq!(call.ids, vec!["a", "b"]);
}

#[tokio::test(start_paused = true)]
async fn changing_interval_reschedules_timer() {
    let shipper = RecordingShipper::new(AckPolicy::All);
    let pool = spawn_pool(EventCache::in_memory(100), &shipper, 50);
    let start = Instant::now();

    pool.push(item("a"));
    pool.set_dispatch_interval(Duration::from_secs(60));

    let call = shipper.wait_for_call(1).await;
    assert!(call.at.duration_since(start) >= Duration::from_secs(60));
    assert_eq!(
        pool.status().await.unwrap().dispatch_interval,
        Duration::from_secs(60)
    );
}

#[tokio::test(start_paused = true)]
async fn changing_interval_keeps_accumulated_backoff() {
    let shipper = RecordingShipper::new(AckPolicy::None);
    let cache = EventCache::in_memory(100);
    cache.write_to_tail(vec![item("a")]);
    let pool = spawn_pool(cache, &shipper, 50);

    shipper.wait_for_call(1).await;
    let backoff = settle(&pool).await.backoff_delay;
    assert_close(backoff.as_secs_f64(), 1.0);

    let changed_at = Instant::now();
    pool.set_dispatch_interval(Duration::from_secs(20));
    let second = shipper.wait_for_call(2).await;

    assert_close(gap(changed_at, second.at), 21.0);
}

#[tokio::test(start_paused = true)]
async fn restored_cache_meeting_limit_flushes_on_startup() {
    let temp = tempfile::tempdir().expect("tempdir");
    let path = temp.path().join("events.json");
    CacheStore::new(&path)
        .save(&[item("a"), item("b"), item("c")])
        .unwrap();

    let cache = EventCache::open(EventCacheConfig {
        max_count: 100,
        persist_debounce: Duration::from_millis(10),
        file_path: Some(path),
    });
    let shipper = RecordingShipper::new(AckPolicy::All);
    let start = Instant::now();
    let _pool = spawn_pool(cache, &shipper, 2);

    let call = shipper.wait_for_call(1).await;
    assert_eq!(call.ids, vec!["a", "b"]);
    assert!(call.at.duration_since(start) < INTERVAL);
}

#[tokio::test(start_paused = true)]
async fn restored_cache_below_limit_arms_timer() {
    let cache = EventCache::in_memory(100);
    cache.write_to_tail(vec![item("a")]);
    let shipper = RecordingShipper::new(AckPolicy::All);
    let pool = spawn_pool(cache, &shipper, 50);

    let status = pool.status().await.unwrap();
    assert!(status.timer_armed);
    assert!(!status.is_flushing);
    assert_eq!(shipper.call_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn capacity_eviction_applies_while_collector_is_down() {
    let shipper = RecordingShipper::new(AckPolicy::None);
    let pool = spawn_pool(EventCache::in_memory(3), &shipper, 50);

    for id in ["a", "b", "c", "d", "e"] {
        pool.push(item(id));
    }

    let status = pool.status().await.unwrap();
    assert_eq!(status.pending, 3);
    let ids: Vec<String> = pool
        .cache()
        .read_from_head(10)
        .into_iter()
        .map(|i| i.id)
        .collect();
    assert_eq!(ids, vec!["c", "d", "e"]);
}

struct PanickingShipper;

#[async_trait]
impl ShippingClient for PanickingShipper {
    async fn ship(&self, _batch: Vec<QueuedItem>) -> ShipOutcome {
        panic!("transport exploded");
    }
}

#[tokio::test(start_paused = true)]
async fn panicking_shipper_counts_as_no_progress() {
    let pool = DispatchPool::spawn(
        EventCache::in_memory(100),
        Arc::new(PanickingShipper),
        config(1),
    );

    pool.push(item("a"));

    let status = loop {
        let status = pool.status().await.unwrap();
        if !status.is_flushing && status.backoff_delay > Duration::ZERO {
            break status;
        }
        tokio::task::yield_now().await;
    };
    assert_eq!(status.pending, 1);
    assert!(status.timer_armed);
}
