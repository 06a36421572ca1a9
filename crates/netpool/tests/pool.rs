//! Endpoint pool behavior tests.
//!
//! All tests run against in-memory connections and a manual clock; no
//! network access is required.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};
use std::thread;
use std::time::Duration;

use netpool::{Clock, ConnectionPool, Liveness, PoolConfig, PoolError, PoolId, Released};
use netpool_testing::{ManualClock, MockBackend, MockConnection};

/// Scenario times are offsets from this epoch, so that offset zero is not
/// the "exempt from reaping" stamp.
const EPOCH: i64 = 1_000;

const ADDR: &str = "db.internal:5432";

fn pool_with(config: PoolConfig) -> (ConnectionPool<MockConnection>, MockBackend, ManualClock) {
    let backend = MockBackend::new();
    let clock = ManualClock::new(EPOCH);
    let pool = ConnectionPool::with_config(
        ADDR,
        PoolId(0),
        Arc::new(backend.clone()),
        &config,
        Arc::new(clock.clone()),
    );
    (pool, backend, clock)
}

// =============================================================================
// Acquire / Release
// =============================================================================

#[test]
fn test_capacity_exceeded_then_recovers() {
    let (pool, backend, _clock) = pool_with(PoolConfig::new().max_connections(2));

    let first = pool.acquire().unwrap();
    let second = pool.acquire().unwrap();

    let err = pool.acquire().unwrap_err();
    assert!(matches!(err, PoolError::CapacityExceeded { max: 2, .. }));
    assert_eq!(backend.attempts(), 2, "no connection is created at capacity");
    assert_eq!(pool.live_count(), 2);

    assert_eq!(pool.release(first, true), Released::Idle);
    let third = pool.acquire().unwrap();
    assert_eq!(pool.live_count(), 2);

    pool.release(second, true);
    pool.release(third, true);
    assert_eq!(pool.idle_count(), 2);
}

#[test]
fn test_released_connection_is_reused() {
    let (pool, backend, _clock) = pool_with(PoolConfig::new());

    let conn = pool.acquire().unwrap();
    let id = conn.id();
    let serial = conn.serial();
    assert_eq!(conn.owner(), PoolId(0));
    pool.release(conn, true);

    let again = pool.acquire().unwrap();
    assert_eq!(again.id(), id);
    assert_eq!(again.serial(), serial);
    assert_eq!(backend.attempts(), 1);
    assert_eq!(pool.total_acquired(), 2);
}

#[test]
fn test_most_recently_returned_is_reused_first() {
    let (pool, _backend, clock) = pool_with(PoolConfig::new());

    let a = pool.acquire().unwrap();
    let b = pool.acquire().unwrap();
    let c = pool.acquire().unwrap();
    let (a_id, c_id) = (a.id(), c.id());

    pool.release(c, true);
    clock.advance(1);
    pool.release(b, true);
    clock.advance(1);
    pool.release(a, true);

    assert_eq!(pool.acquire().unwrap().id(), a_id);
    // a was taken; the remaining order is b then c.
    let b_again = pool.acquire().unwrap();
    let c_again = pool.acquire().unwrap();
    assert_eq!(c_again.id(), c_id);
    assert_ne!(b_again.id(), c_again.id());
}

#[test]
fn test_discarded_connection_is_closed() {
    let (pool, backend, _clock) = pool_with(PoolConfig::new());

    let conn = pool.acquire().unwrap();
    assert_eq!(pool.release(conn, false), Released::Closed);

    assert_eq!(pool.live_count(), 0);
    assert_eq!(pool.idle_count(), 0);
    assert_eq!(backend.open_now(), 0);
    assert_eq!(backend.closed(), 1);
}

#[test]
fn test_total_acquired_is_a_lifetime_counter() {
    let (pool, _backend, _clock) = pool_with(PoolConfig::new());

    for _ in 0..5 {
        let conn = pool.acquire().unwrap();
        pool.release(conn, true);
    }

    assert_eq!(pool.total_acquired(), 5);
    let status = pool.status();
    assert_eq!(status.total_acquired, 5);
    assert_eq!(status.in_use, 0);
    assert_eq!(status.live, 1);
}

#[test]
#[should_panic(expected = "released more connections than were acquired")]
fn test_releasing_more_than_acquired_is_a_fault() {
    let (pool, _backend, _clock) = pool_with(PoolConfig::new());
    let (other, _other_backend, _other_clock) = pool_with(PoolConfig::new());

    let conn = pool.acquire().unwrap();
    // `other` never issued a connection.
    other.release(conn, false);
}

// =============================================================================
// Idle Reaping
// =============================================================================

#[test]
fn test_idle_list_is_sorted_most_recent_first() {
    let (pool, _backend, clock) = pool_with(PoolConfig::new());

    let conns: Vec<_> = (0..4).map(|_| pool.acquire().unwrap()).collect();
    for conn in conns {
        clock.advance(3);
        pool.release(conn, true);
    }

    assert_eq!(
        pool.idle_stamps(),
        vec![EPOCH + 12, EPOCH + 9, EPOCH + 6, EPOCH + 3]
    );
}

#[test]
fn test_reap_evicts_expired_suffix_only() {
    // Sweeps on release are pushed far out so only the explicit sweep runs.
    let config = PoolConfig::new()
        .idle_ttl(Duration::from_secs(5))
        .check_interval(Duration::from_secs(3_600));
    let (pool, backend, clock) = pool_with(config);

    let conns: Vec<_> = (0..3).map(|_| pool.acquire().unwrap()).collect();
    let mut conns = conns.into_iter();

    // Released at t=0, t=2, t=10; front to back that is [10, 2, 0].
    pool.release(conns.next().unwrap(), true);
    clock.set(EPOCH + 2);
    pool.release(conns.next().unwrap(), true);
    clock.set(EPOCH + 10);
    pool.release(conns.next().unwrap(), true);
    assert_eq!(pool.idle_stamps(), vec![EPOCH + 10, EPOCH + 2, EPOCH]);

    clock.set(EPOCH + 11);
    assert_eq!(pool.check_idle(), 2);

    assert_eq!(pool.idle_stamps(), vec![EPOCH + 10]);
    assert_eq!(pool.live_count(), 1);
    assert_eq!(backend.open_now(), 1);
}

#[test]
fn test_reap_with_zero_ttl_evicts_all_idle() {
    let (pool, backend, clock) = pool_with(PoolConfig::new());

    let held = pool.acquire().unwrap();
    let idle: Vec<_> = (0..3).map(|_| pool.acquire().unwrap()).collect();
    for conn in idle {
        pool.release(conn, true);
    }
    clock.advance(1);

    assert_eq!(pool.reap(Some(Duration::ZERO)), 3);
    assert_eq!(pool.idle_count(), 0);
    // The checked-out connection still counts.
    assert_eq!(pool.live_count(), 1);
    assert_eq!(backend.open_now(), 1);

    pool.release(held, true);
    assert_eq!(pool.idle_count(), 1);
}

#[test]
fn test_reap_disabled_ttl_is_noop() {
    let (pool, _backend, clock) = pool_with(PoolConfig::new());

    let conn = pool.acquire().unwrap();
    pool.release(conn, true);
    clock.advance(1_000_000);

    assert_eq!(pool.reap(None), 0);
    assert_eq!(pool.check_idle(), 0);
    assert_eq!(pool.idle_count(), 1);
}

#[test]
fn test_exempt_connections_are_never_reaped() {
    let backend = MockBackend::new();
    let clock = ManualClock::new(0);
    let pool: ConnectionPool<MockConnection> = ConnectionPool::with_config(
        ADDR,
        PoolId(0),
        Arc::new(backend.clone()),
        &PoolConfig::new(),
        Arc::new(clock.clone()),
    );

    let a = pool.acquire().unwrap();
    let b = pool.acquire().unwrap();
    // Returned at time zero: exempt.
    pool.release(a, true);
    clock.set(5);
    pool.release(b, true);

    clock.set(100);
    assert_eq!(pool.reap(Some(Duration::from_secs(10))), 1);
    assert_eq!(pool.idle_stamps(), vec![0]);
}

#[test]
fn test_release_sweeps_only_after_check_interval() {
    let config = PoolConfig::new()
        .idle_ttl(Duration::from_secs(15))
        .check_interval(Duration::from_secs(30));
    let (pool, _backend, clock) = pool_with(config);

    let conns: Vec<_> = (0..3).map(|_| pool.acquire().unwrap()).collect();
    let mut conns = conns.into_iter();

    // First release sweeps (last check was never) and stamps the check time.
    pool.release(conns.next().unwrap(), true);

    // Expired, but the check interval has not elapsed yet.
    clock.advance(20);
    pool.release(conns.next().unwrap(), true);
    assert_eq!(pool.idle_count(), 2);

    // Now the interval has elapsed: the t=0 entry goes, the t=20 one stays.
    clock.advance(10);
    pool.release(conns.next().unwrap(), true);
    assert_eq!(pool.idle_stamps(), vec![EPOCH + 30, EPOCH + 20]);
    assert_eq!(pool.live_count(), 2);
}

// =============================================================================
// Liveness
// =============================================================================

#[test]
fn test_dead_endpoint_backoff_and_retry() {
    let (pool, backend, clock) =
        pool_with(PoolConfig::new().retry_interval(Duration::from_secs(5)));
    backend.set_reachable(false);

    let err = pool.acquire().unwrap_err();
    assert!(matches!(err, PoolError::ConnectFailed { .. }));
    assert!(err.is_transient());
    assert_eq!(pool.liveness(), Liveness::Dead { since: EPOCH });
    assert_eq!(pool.live_count(), 0);

    // Within the retry window no attempt is made.
    backend.set_reachable(true);
    for _ in 0..3 {
        assert!(matches!(pool.acquire(), Err(PoolError::Unavailable { .. })));
    }
    clock.advance(4);
    assert!(matches!(pool.acquire(), Err(PoolError::Unavailable { .. })));
    assert_eq!(backend.attempts(), 1);

    clock.advance(1);
    let conn = pool.acquire().unwrap();
    assert_eq!(backend.attempts(), 2);
    assert!(pool.is_alive());
    pool.release(conn, true);
}

#[test]
fn test_failed_retry_restarts_backoff() {
    let (pool, backend, clock) =
        pool_with(PoolConfig::new().retry_interval(Duration::from_secs(5)));
    backend.set_reachable(false);

    assert!(pool.acquire().is_err());
    clock.advance(5);
    assert!(matches!(pool.acquire(), Err(PoolError::ConnectFailed { .. })));
    assert_eq!(pool.liveness(), Liveness::Dead { since: EPOCH + 5 });

    clock.advance(4);
    assert!(matches!(pool.acquire(), Err(PoolError::Unavailable { .. })));
    assert_eq!(backend.attempts(), 2);
}

#[test]
fn test_no_retry_keeps_endpoint_dead() {
    let (pool, backend, clock) = pool_with(PoolConfig::new().no_retry());
    backend.set_reachable(false);
    assert!(pool.acquire().is_err());

    backend.set_reachable(true);
    clock.advance(1_000_000);
    assert!(matches!(pool.acquire(), Err(PoolError::Unavailable { .. })));
    assert!(!pool.is_available());

    pool.set_alive(true);
    assert!(pool.acquire().is_ok());
}

#[test]
fn test_is_available_flips_after_retry_window() {
    let (pool, backend, clock) =
        pool_with(PoolConfig::new().retry_interval(Duration::from_secs(3)));
    backend.set_reachable(false);
    assert!(pool.acquire().is_err());

    assert!(!pool.is_available());
    clock.advance(3);
    assert!(pool.is_available());
    assert!(pool.is_alive());
}

#[test]
fn test_idle_connections_survive_dead_endpoint() {
    let (pool, backend, _clock) = pool_with(PoolConfig::new());

    let conn = pool.acquire().unwrap();
    pool.release(conn, true);

    pool.set_alive(false);
    backend.set_reachable(false);
    assert!(matches!(pool.acquire(), Err(PoolError::Unavailable { .. })));
    assert_eq!(pool.idle_count(), 1);
}

#[test]
fn test_release_to_unhealthy_pool_closes_connection() {
    let (pool, backend, clock) = pool_with(PoolConfig::new());

    let conn = pool.acquire().unwrap();
    pool.set_alive(false);
    assert_eq!(pool.liveness(), Liveness::Dead { since: clock.now() });

    assert_eq!(pool.release(conn, true), Released::Closed);
    assert_eq!(pool.idle_count(), 0);
    assert_eq!(backend.open_now(), 0);
}

// =============================================================================
// Draining
// =============================================================================

#[test]
fn test_draining_pool_closes_every_returned_connection() {
    let (pool, backend, _clock) = pool_with(PoolConfig::new());

    let conns: Vec<_> = (0..3).map(|_| pool.acquire().unwrap()).collect();
    assert!(!pool.mark_for_destruction());
    assert!(pool.is_draining());

    let mut outcomes = Vec::new();
    for conn in conns {
        outcomes.push(pool.release(conn, true));
        assert_eq!(pool.idle_count(), 0, "nothing re-enters the idle list");
    }

    assert_eq!(
        outcomes,
        vec![Released::Closed, Released::Closed, Released::Drained]
    );
    assert!(pool.is_drained());
    assert_eq!(backend.open_now(), 0);
}

#[test]
fn test_draining_pool_rejects_acquire() {
    let (pool, backend, _clock) = pool_with(PoolConfig::new());

    let held = pool.acquire().unwrap();
    assert!(!pool.mark_for_destruction());

    assert!(matches!(pool.acquire(), Err(PoolError::Draining { .. })));
    assert!(!pool.is_available());
    assert_eq!(backend.attempts(), 1);
    assert_eq!(pool.release(held, true), Released::Drained);
}

#[test]
fn test_mark_for_destruction_closes_idle_connections() {
    let (pool, backend, _clock) = pool_with(PoolConfig::new());

    let idle = pool.acquire().unwrap();
    let held = pool.acquire().unwrap();
    pool.release(idle, true);

    assert!(!pool.mark_for_destruction());
    assert_eq!(pool.idle_count(), 0);
    assert_eq!(pool.live_count(), 1);
    assert_eq!(backend.open_now(), 1);

    assert_eq!(pool.release(held, true), Released::Drained);
    assert!(pool.is_drained());
    assert_eq!(backend.open_now(), 0);
}

#[test]
fn test_mark_for_destruction_with_only_idle_connections() {
    let (pool, backend, _clock) = pool_with(PoolConfig::new());

    let conns: Vec<_> = (0..2).map(|_| pool.acquire().unwrap()).collect();
    for conn in conns {
        pool.release(conn, true);
    }

    assert!(pool.mark_for_destruction());
    assert!(pool.is_drained());
    assert_eq!(backend.open_now(), 0);
}

#[test]
fn test_mark_for_destruction_on_empty_pool() {
    let (pool, _backend, _clock) = pool_with(PoolConfig::new());
    assert!(pool.mark_for_destruction());
    assert!(pool.is_drained());
}

// =============================================================================
// Dropped Connections
// =============================================================================

#[test]
fn test_dropped_connection_frees_its_slot() {
    let (pool, backend, _clock) = pool_with(PoolConfig::new().max_connections(1));

    let conn = pool.acquire().unwrap();
    drop(conn);
    assert_eq!(pool.live_count(), 0);
    assert_eq!(backend.open_now(), 0);

    // The slot is usable again, and so is a reused idle connection's.
    let conn = pool.acquire().unwrap();
    pool.release(conn, true);
    let reused = pool.acquire().unwrap();
    drop(reused);
    assert_eq!(pool.live_count(), 0);
    assert!(pool.acquire().is_ok());
}

#[test]
fn test_dropped_connection_drains_retired_pool() {
    let (pool, backend, _clock) = pool_with(PoolConfig::new());

    let held = pool.acquire().unwrap();
    assert!(!pool.mark_for_destruction());

    drop(held);
    assert!(pool.is_drained());
    assert_eq!(backend.open_now(), 0);
}

#[test]
fn test_connection_outliving_its_pool() {
    let (pool, backend, _clock) = pool_with(PoolConfig::new());

    let conn = pool.acquire().unwrap();
    drop(pool);
    assert_eq!(backend.open_now(), 1);

    drop(conn);
    assert_eq!(backend.open_now(), 0);
}

// =============================================================================
// Concurrent Access Tests
// =============================================================================

/// Hands out increasing timestamps, and stalls the first caller after it has
/// read its value once `stall` is set.
#[derive(Debug, Default)]
struct StallingClock {
    next: AtomicI64,
    stall: AtomicBool,
}

impl Clock for StallingClock {
    fn now(&self) -> i64 {
        let now = self.next.fetch_add(1, Ordering::SeqCst);
        if self.stall.swap(false, Ordering::SeqCst) {
            thread::sleep(Duration::from_millis(150));
        }
        now
    }
}

#[test]
fn test_concurrent_releases_keep_idle_list_sorted() {
    let clock = Arc::new(StallingClock {
        next: AtomicI64::new(EPOCH),
        stall: AtomicBool::new(false),
    });
    let backend = MockBackend::new();
    let pool: Arc<ConnectionPool<MockConnection>> = Arc::new(ConnectionPool::with_config(
        ADDR,
        PoolId(0),
        Arc::new(backend.clone()),
        &PoolConfig::new(),
        clock.clone(),
    ));

    let slow = pool.acquire().unwrap();
    let fast = pool.acquire().unwrap();
    clock.stall.store(true, Ordering::SeqCst);

    let releaser = Arc::clone(&pool);
    let first = thread::spawn(move || releaser.release(slow, true));
    thread::sleep(Duration::from_millis(30));
    let releaser = Arc::clone(&pool);
    let second = thread::spawn(move || releaser.release(fast, true));

    first.join().unwrap();
    second.join().unwrap();

    let stamps = pool.idle_stamps();
    assert_eq!(stamps.len(), 2);
    assert!(stamps[0] > stamps[1], "idle list out of order: {stamps:?}");
}

#[test]
fn test_concurrent_acquire_release_respects_bound() {
    let backend = MockBackend::new();
    backend.set_open_delay(Some(Duration::from_millis(1)));
    let pool: Arc<ConnectionPool<MockConnection>> = Arc::new(ConnectionPool::new(
        ADDR,
        4,
        PoolId(0),
        Arc::new(backend.clone()),
    ));
    let successes = Arc::new(AtomicU64::new(0));

    let handles: Vec<_> = (0..8)
        .map(|i| {
            let pool = Arc::clone(&pool);
            let successes = Arc::clone(&successes);
            thread::spawn(move || {
                for j in 0..200 {
                    match pool.acquire() {
                        Ok(conn) => {
                            successes.fetch_add(1, Ordering::Relaxed);
                            assert!(pool.live_count() <= 4);
                            pool.release(conn, (i + j) % 5 != 0);
                        }
                        Err(PoolError::CapacityExceeded { .. }) => thread::yield_now(),
                        Err(e) => panic!("unexpected error: {e}"),
                    }
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().expect("worker panicked");
    }

    assert!(backend.peak_open() <= 4);
    assert_eq!(pool.live_count(), pool.idle_count());
    assert_eq!(backend.open_now(), pool.live_count());
    assert_eq!(pool.total_acquired(), successes.load(Ordering::Relaxed));
}
