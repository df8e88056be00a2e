// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::{watch, CredentialEvent};
use crate::test_support::{credential, StaticSource};

const POLL: Duration = Duration::from_secs(5);

fn spawn_watch(
    source: &StaticSource,
    capacity: usize,
) -> (mpsc::Receiver<CredentialEvent>, CancellationToken, tokio::task::JoinHandle<()>) {
    let (tx, rx) = mpsc::channel(capacity);
    let shutdown = CancellationToken::new();
    let handle = tokio::spawn(watch(Arc::new(source.clone()), POLL, tx, shutdown.clone()));
    (rx, shutdown, handle)
}

async fn quiet(rx: &mut mpsc::Receiver<CredentialEvent>) -> bool {
    tokio::time::timeout(Duration::from_secs(30), rx.recv()).await.is_err()
}

#[tokio::test(start_paused = true)]
async fn emits_lifecycle_events() -> anyhow::Result<()> {
    let source = StaticSource::new(Some(credential("one", "1")));
    let (mut rx, shutdown, _) = spawn_watch(&source, 16);

    assert_eq!(rx.recv().await, Some(CredentialEvent::Created { revision: "1".into() }));

    source.set(Some(credential("two", "2")));
    assert_eq!(rx.recv().await, Some(CredentialEvent::Updated { revision: "2".into() }));

    source.set(None);
    assert_eq!(rx.recv().await, Some(CredentialEvent::Deleted));

    source.set(Some(credential("three", "3")));
    assert_eq!(rx.recv().await, Some(CredentialEvent::Created { revision: "3".into() }));

    shutdown.cancel();
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn unchanged_revision_is_silent() {
    let source = StaticSource::new(Some(credential("one", "1")));
    let (mut rx, shutdown, _) = spawn_watch(&source, 16);

    assert!(matches!(rx.recv().await, Some(CredentialEvent::Created { .. })));
    assert!(quiet(&mut rx).await);
    assert!(source.fetches() >= 6);
    shutdown.cancel();
}

#[tokio::test(start_paused = true)]
async fn initially_absent_is_silent() {
    let source = StaticSource::new(None);
    let (mut rx, shutdown, _) = spawn_watch(&source, 16);

    assert!(quiet(&mut rx).await);
    shutdown.cancel();
}

#[tokio::test(start_paused = true)]
async fn fetch_errors_are_skipped() {
    let source = StaticSource::new(Some(credential("one", "1")));
    source.fail_with(Some("apiserver down"));
    let (mut rx, shutdown, _) = spawn_watch(&source, 16);

    assert!(quiet(&mut rx).await);
    source.fail_with(None);
    assert_eq!(rx.recv().await, Some(CredentialEvent::Created { revision: "1".into() }));
    shutdown.cancel();
}

#[tokio::test(start_paused = true)]
async fn full_queue_drops_instead_of_blocking() {
    let source = StaticSource::new(Some(credential("one", "1")));
    let (mut rx, shutdown, _) = spawn_watch(&source, 1);

    tokio::time::sleep(Duration::from_millis(10)).await;
    source.set(Some(credential("two", "2")));
    tokio::time::sleep(POLL * 2).await;
    source.set(Some(credential("three", "3")));
    tokio::time::sleep(POLL * 2).await;

    assert_eq!(rx.recv().await, Some(CredentialEvent::Created { revision: "1".into() }));
    assert!(quiet(&mut rx).await);
    // The watcher kept polling while the queue was full.
    assert!(source.fetches() >= 5);
    shutdown.cancel();
}

#[tokio::test(start_paused = true)]
async fn stops_on_shutdown() -> anyhow::Result<()> {
    let source = StaticSource::new(None);
    let (_rx, shutdown, handle) = spawn_watch(&source, 16);

    shutdown.cancel();
    tokio::time::timeout(Duration::from_secs(1), handle).await??;
    Ok(())
}

#[test]
fn same_content_ignores_revision() {
    let a = credential("same", "1");
    let b = credential("same", "2");
    let c = credential("other", "1");
    assert!(a.same_content(&b));
    assert!(!a.same_content(&c));
}
