// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::sync::Arc;
use std::time::Duration;

use super::{jittered, LeaseRenewer, Phase, RenewState};
use crate::error::ApiError;
use crate::lease::{LeaseClient, LeaseKey};
use crate::test_support::{MemoryLeaseStore, ScriptedHost};

const SECOND: Duration = Duration::from_secs(1);

fn key() -> LeaseKey {
    LeaseKey::new("cluster1", "addon-lease")
}

fn renewer(store: &MemoryLeaseStore) -> LeaseRenewer {
    LeaseRenewer::new(LeaseClient::new(store.handle(), key()), RenewState::new()).with_jitter(0.0)
}

async fn sleep_ms(ms: u64) {
    tokio::time::sleep(Duration::from_millis(ms)).await;
}

#[tokio::test(start_paused = true)]
async fn start_creates_lease_then_renews_each_period() -> anyhow::Result<()> {
    let store = MemoryLeaseStore::new();
    let r = renewer(&store);

    r.start(SECOND).await?;
    let lease = store.lease(&key()).ok_or_else(|| anyhow::anyhow!("lease not created"))?;
    assert_eq!(lease.spec.lease_duration_seconds, Some(1));
    assert_eq!(r.phase().await, Phase::Running);

    sleep_ms(1100).await;
    let first = store.renew_time(&key());
    assert!(first.is_some());

    sleep_ms(1100).await;
    let second = store.renew_time(&key());
    assert!(second > first, "renew time did not advance: {first:?} -> {second:?}");

    r.stop().await;
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn first_tick_is_immediate() -> anyhow::Result<()> {
    let store = MemoryLeaseStore::new();
    let r = renewer(&store);

    r.start(Duration::from_secs(60)).await?;
    sleep_ms(10).await;
    assert_eq!(store.updates(), 1);
    assert!(store.renew_time(&key()).is_some());
    r.stop().await;
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn stop_right_after_start_writes_nothing_more() -> anyhow::Result<()> {
    let store = MemoryLeaseStore::new();
    let r = renewer(&store);

    r.start(SECOND).await?;
    r.stop().await;
    let at_stop = store.renew_time(&key());
    let updates = store.updates();

    sleep_ms(5000).await;
    assert_eq!(store.renew_time(&key()), at_stop);
    assert_eq!(store.updates(), updates);
    assert_eq!(r.phase().await, Phase::Stopped);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn stop_is_idempotent() -> anyhow::Result<()> {
    let store = MemoryLeaseStore::new();
    let r = renewer(&store);

    r.stop().await;
    r.start(SECOND).await?;
    r.stop().await;
    r.stop().await;
    assert_eq!(r.phase().await, Phase::Stopped);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn second_start_is_rejected() -> anyhow::Result<()> {
    let store = MemoryLeaseStore::new();
    let r = renewer(&store);

    r.start(SECOND).await?;
    crate::assert_err_contains!(r.start(SECOND).await, "already started");
    assert_eq!(store.creates(), 1);
    r.stop().await;
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn start_after_stop_resumes() -> anyhow::Result<()> {
    let store = MemoryLeaseStore::new();
    let r = renewer(&store);

    r.start(SECOND).await?;
    r.stop().await;
    r.start(SECOND).await?;
    sleep_ms(1100).await;
    assert!(store.renew_time(&key()).is_some());
    assert!(r.is_running().await);
    r.stop().await;
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn failed_ensure_schedules_nothing() {
    let store = MemoryLeaseStore::new();
    store.fail_with(Some(ApiError::Transport("connection refused".into())));
    let r = renewer(&store);

    crate::assert_err_contains!(r.start(SECOND).await, "connection refused");
    assert_eq!(r.phase().await, Phase::Stopped);

    let gets = store.gets();
    sleep_ms(3000).await;
    assert_eq!(store.gets(), gets);
}

#[tokio::test(start_paused = true)]
async fn zero_duration_is_rejected() {
    let store = MemoryLeaseStore::new();
    let r = renewer(&store);

    crate::assert_err_contains!(r.start(Duration::ZERO).await, "at least one second");
    assert_eq!(store.gets(), 0);
}

#[tokio::test(start_paused = true)]
async fn not_live_host_skips_ticks() -> anyhow::Result<()> {
    let store = MemoryLeaseStore::new();
    let host = ScriptedHost::new(false);
    let r = renewer(&store).with_liveness(host.clone());

    r.start(SECOND).await?;
    sleep_ms(3500).await;
    assert!(host.checks() >= 3);
    assert_eq!(store.updates(), 0);
    assert_eq!(store.renew_time(&key()), None);

    host.set_live(true);
    sleep_ms(1100).await;
    assert!(store.renew_time(&key()).is_some());
    r.stop().await;
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn liveness_error_skips_tick() -> anyhow::Result<()> {
    let store = MemoryLeaseStore::new();
    let host = ScriptedHost::new(true);
    host.fail_lookup(Some(ApiError::Status { code: 500, message: "etcd".into() }));
    let r = renewer(&store).with_liveness(host.clone());

    r.start(SECOND).await?;
    sleep_ms(2500).await;
    assert_eq!(store.updates(), 0);
    r.stop().await;
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn renew_errors_are_counted_and_reset() -> anyhow::Result<()> {
    let store = MemoryLeaseStore::new();
    let state = RenewState::new();
    let r = LeaseRenewer::new(LeaseClient::new(store.handle(), key()), Arc::clone(&state))
        .with_jitter(0.0);

    r.start(SECOND).await?;
    store.fail_with(Some(ApiError::Status { code: 503, message: "unavailable".into() }));
    sleep_ms(4500).await;
    let snap = state.snapshot();
    assert!(snap.renewing);
    assert!(snap.consecutive_failures >= 4, "failures: {}", snap.consecutive_failures);

    store.fail_with(None);
    sleep_ms(1100).await;
    let snap = state.snapshot();
    assert_eq!(snap.consecutive_failures, 0);
    assert_eq!(snap.last_renew, store.renew_time(&key()));

    r.stop().await;
    assert!(!state.snapshot().renewing);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn drop_cancels_loop() -> anyhow::Result<()> {
    let store = MemoryLeaseStore::new();
    let r = renewer(&store);

    r.start(SECOND).await?;
    sleep_ms(1100).await;
    drop(r);
    sleep_ms(10).await;
    let updates = store.updates();

    sleep_ms(5000).await;
    assert_eq!(store.updates(), updates);
    Ok(())
}

#[test]
fn jitter_stretches_within_factor() {
    let period = Duration::from_secs(10);
    for _ in 0..100 {
        let d = jittered(period, 0.05);
        assert!(d >= period && d < Duration::from_millis(10_500), "{d:?}");
    }
}

#[test]
fn zero_jitter_is_exact() {
    assert_eq!(jittered(Duration::from_secs(60), 0.0), Duration::from_secs(60));
}
