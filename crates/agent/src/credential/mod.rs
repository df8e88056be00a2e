// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Credential records and the sources that deliver them.
//!
//! A source answers "what does the credential look like right now"
//! ([`CredentialSource::fetch`]). [`watch`] turns that into a stream of
//! change notifications by polling, optionally woken early by filesystem
//! events. The controller treats notifications only as triggers and always
//! re-fetches before acting.

pub mod file;
pub mod secret;

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::BoxFuture;

/// One observed version of the hub credential.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CredentialRecord {
    pub name: String,
    pub namespace: String,
    /// Key → raw bytes, as in a Secret's `data`.
    pub data: BTreeMap<String, Vec<u8>>,
    /// Set once deletion has been requested.
    pub deleting: bool,
    /// Opaque version used for change detection.
    pub revision: String,
}

impl CredentialRecord {
    pub fn get(&self, key: &str) -> Option<&[u8]> {
        self.data.get(key).map(Vec::as_slice)
    }

    /// Byte-for-byte comparison of the credential material.
    pub fn same_content(&self, other: &CredentialRecord) -> bool {
        self.data == other.data
    }
}

/// Change notification emitted by [`watch`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CredentialEvent {
    Created { revision: String },
    Updated { revision: String },
    Deleted,
}

/// Where the hub credential comes from.
pub trait CredentialSource: Send + Sync {
    /// Human-readable location for logs, e.g. `ns/name` or a directory.
    fn describe(&self) -> String;

    /// Current record, or `None` when it does not exist.
    fn fetch(&self) -> BoxFuture<'_, anyhow::Result<Option<CredentialRecord>>>;

    /// Optionally arrange for `wake_tx` to be signalled when the record may
    /// have changed. The returned guard must be kept alive.
    fn subscribe(&self, _wake_tx: mpsc::Sender<()>) -> Option<notify::RecommendedWatcher> {
        None
    }
}

/// Poll `source` and emit an event whenever its revision changes.
///
/// Runs until `shutdown` is cancelled or the receiver is dropped. A full
/// channel drops the event: the controller re-reads current state on every
/// pass, so a pending notification already covers it.
pub async fn watch(
    source: Arc<dyn CredentialSource>,
    poll_interval: Duration,
    event_tx: mpsc::Sender<CredentialEvent>,
    shutdown: CancellationToken,
) {
    let (wake_tx, mut wake_rx) = mpsc::channel::<()>(1);
    let _watcher = source.subscribe(wake_tx);

    let mut poll = tokio::time::interval(poll_interval);
    poll.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    // None = not yet observed, Some(None) = observed absent.
    let mut last: Option<Option<String>> = None;

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = wake_rx.recv() => {}
            _ = poll.tick() => {}
        }

        let current = match source.fetch().await {
            Ok(record) => record.map(|r| r.revision),
            Err(e) => {
                tracing::warn!(source = %source.describe(), err = %e, "credential fetch failed");
                continue;
            }
        };

        let event = match (&last, &current) {
            (Some(prev), cur) if prev == cur => None,
            (None, None) => None,
            (Some(Some(_)), None) => Some(CredentialEvent::Deleted),
            (Some(Some(_)), Some(rev)) => Some(CredentialEvent::Updated { revision: rev.clone() }),
            (_, Some(rev)) => Some(CredentialEvent::Created { revision: rev.clone() }),
            (Some(None), None) => None,
        };
        last = Some(current);

        let Some(event) = event else { continue };
        tracing::debug!(source = %source.describe(), ?event, "credential changed");
        match event_tx.try_send(event) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(_)) => {
                tracing::debug!("controller queue full, dropping credential event");
            }
            Err(mpsc::error::TrySendError::Closed(_)) => break,
        }
    }
}

#[cfg(test)]
#[path = "mod_tests.rs"]
mod tests;
