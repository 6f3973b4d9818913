//! Tests for firmware::connection_watch

use smuffkit_communication::firmware::connection_watch::*;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

fn fast_watch(timeout_ms: u64) -> ConnectionWatcher {
    ConnectionWatcher::new(ConnectionWatchConfig {
        timeout_ms,
        check_interval_ms: 20,
    })
}

#[test]
fn test_connection_watcher_creation() {
    let watcher = ConnectionWatcher::new(ConnectionWatchConfig::default());
    assert!(watcher.time_since_heartbeat() < 100);
    assert_eq!(watcher.state(), ConnectionWatchState::Healthy);
    assert_eq!(watcher.timeout(), Duration::from_secs(60));
    assert!(!watcher.is_running());
}

#[tokio::test]
async fn test_heartbeat_update() {
    let watcher = ConnectionWatcher::new(ConnectionWatchConfig::default());
    let initial = watcher.time_since_heartbeat();

    tokio::time::sleep(Duration::from_millis(100)).await;
    let after_wait = watcher.time_since_heartbeat();
    assert!(after_wait >= initial);

    watcher.heartbeat();
    assert!(watcher.time_since_heartbeat() <= 10);
}

#[tokio::test]
async fn test_connection_state_transitions() {
    let watcher = fast_watch(200);
    let fired = Arc::new(AtomicUsize::new(0));
    let counter = fired.clone();
    watcher
        .start(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap();
    assert!(watcher.is_running());
    assert_eq!(watcher.state(), ConnectionWatchState::Healthy);

    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(watcher.state(), ConnectionWatchState::Lost);
    assert_eq!(fired.load(Ordering::SeqCst), 1);

    watcher.heartbeat();
    assert_eq!(watcher.state(), ConnectionWatchState::Healthy);

    watcher.stop();
    assert!(!watcher.is_running());
}

#[tokio::test]
async fn test_fires_once_per_period() {
    let watcher = fast_watch(100);
    let fired = Arc::new(AtomicUsize::new(0));
    let counter = fired.clone();
    watcher
        .start(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap();

    tokio::time::sleep(Duration::from_millis(350)).await;
    watcher.stop();
    let count = fired.load(Ordering::SeqCst);
    assert!((2..=3).contains(&count), "fired {} times", count);
}

#[tokio::test]
async fn test_heartbeats_keep_it_quiet() {
    let watcher = fast_watch(100);
    let fired = Arc::new(AtomicUsize::new(0));
    let counter = fired.clone();
    watcher
        .start(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap();

    for _ in 0..8 {
        tokio::time::sleep(Duration::from_millis(40)).await;
        watcher.heartbeat();
    }
    watcher.stop();
    assert_eq!(fired.load(Ordering::SeqCst), 0);
}

#[test]
fn test_timeout_override_and_restore() {
    let watcher = fast_watch(100);
    watcher.set_timeout(Duration::from_secs(90));
    assert_eq!(watcher.timeout(), Duration::from_secs(90));
    watcher.restore_timeout();
    assert_eq!(watcher.timeout(), Duration::from_millis(100));
}

#[tokio::test]
async fn test_grace_doubles_next_period() {
    let watcher = fast_watch(150);
    let fired = Arc::new(AtomicUsize::new(0));
    let counter = fired.clone();
    watcher
        .start(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap();
    watcher.grant_grace();

    tokio::time::sleep(Duration::from_millis(220)).await;
    assert_eq!(fired.load(Ordering::SeqCst), 0);
    tokio::time::sleep(Duration::from_millis(150)).await;
    assert_eq!(fired.load(Ordering::SeqCst), 1);
    watcher.stop();
}
