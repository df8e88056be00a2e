// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Supervises the lease renewer against the hub credential's lifecycle.
//!
//! Each [`LeaseController::reconcile`] pass re-reads the credential and
//! decides what to do with the (at most one) active renewer. [`LeaseController::run`]
//! drives passes from credential notifications and requested requeues.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::credential::{CredentialEvent, CredentialRecord, CredentialSource};
use crate::host::HostMonitor;
use crate::hub::ClientBuilder;
use crate::lease::{LeaseClient, LeaseKey};
use crate::probe::probe;
use crate::renewer::{LeaseRenewer, RenewState};

/// Wait before re-checking a host that is not yet running.
pub const HOST_NOT_LIVE_REQUEUE: Duration = Duration::from_secs(10);
/// Wait before retrying a credential that cannot reach the hub.
pub const INVALID_CREDENTIAL_REQUEUE: Duration = Duration::from_secs(10);
/// Wait before re-evaluating a rotated credential.
pub const ROTATION_REQUEUE: Duration = Duration::from_secs(30);

const BACKOFF_MIN: Duration = Duration::from_secs(1);
const BACKOFF_MAX: Duration = Duration::from_secs(300);

/// Result of one reconcile pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Done,
    RequeueAfter(Duration),
}

/// What to do when the credential changes under a renewer that can no
/// longer reach the hub.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum RotationPolicy {
    /// Restart the host once the new credential is confirmed to work.
    #[default]
    Restart,
    /// Keep requeueing; never rebuild.
    Backoff,
}

impl std::fmt::Display for RotationPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Restart => f.write_str("restart"),
            Self::Backoff => f.write_str("backoff"),
        }
    }
}

impl std::str::FromStr for RotationPolicy {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "restart" => Ok(Self::Restart),
            "backoff" => Ok(Self::Backoff),
            other => anyhow::bail!("invalid rotation policy: {other}"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ControllerSettings {
    pub lease: LeaseKey,
    pub lease_duration: Duration,
    pub jitter: f64,
    pub policy: RotationPolicy,
    /// Probe credentials before use and on rotation.
    pub probe_credentials: bool,
}

struct Active {
    renewer: LeaseRenewer,
    cached: CredentialRecord,
    /// Revision of the credential a host restart was already requested for.
    restart_requested: Option<String>,
}

pub struct LeaseController {
    settings: ControllerSettings,
    source: Arc<dyn CredentialSource>,
    builder: Arc<dyn ClientBuilder>,
    host: Option<Arc<dyn HostMonitor>>,
    state: Arc<RenewState>,
    host_seen_live: bool,
    active: Option<Active>,
}

impl LeaseController {
    pub fn new(
        settings: ControllerSettings,
        source: Arc<dyn CredentialSource>,
        builder: Arc<dyn ClientBuilder>,
    ) -> Self {
        Self {
            settings,
            source,
            builder,
            host: None,
            state: RenewState::new(),
            host_seen_live: false,
            active: None,
        }
    }

    /// Gate startup and renewal on `host`, and allow restarting it on rotation.
    pub fn with_host(mut self, host: Arc<dyn HostMonitor>) -> Self {
        self.host = Some(host);
        self
    }

    pub fn renew_state(&self) -> Arc<RenewState> {
        Arc::clone(&self.state)
    }

    pub fn is_active(&self) -> bool {
        self.active.is_some()
    }

    /// One pass over the current credential.
    pub async fn reconcile(&mut self) -> anyhow::Result<Action> {
        let lease = &self.settings.lease;
        tracing::debug!(lease = %lease, source = %self.source.describe(), "reconciling");

        if self.active.is_none() && !self.host_seen_live {
            if let Some(ref host) = self.host {
                let live = host
                    .is_live()
                    .await
                    .map_err(|e| anyhow::anyhow!("checking host {}: {e}", host.describe()))?;
                if !live {
                    tracing::info!(host = %host.describe(), "waiting for host to be running");
                    return Ok(Action::RequeueAfter(HOST_NOT_LIVE_REQUEUE));
                }
                self.host_seen_live = true;
            }
        }

        let record = match self.source.fetch().await? {
            Some(record) if !record.deleting => record,
            _ => {
                self.stop_active().await;
                return Ok(Action::Done);
            }
        };

        let Some(active) = self.active.as_mut() else {
            return self.start_from(record).await;
        };

        if active.cached.same_content(&record) {
            return Ok(Action::Done);
        }
        tracing::info!(lease = %lease, revision = %record.revision, "hub credential changed");

        if !self.settings.probe_credentials {
            return Ok(Action::RequeueAfter(ROTATION_REQUEUE));
        }
        if probe(Some(active.renewer.client())).await.is_reachable() {
            tracing::info!(lease = %lease, "current credential still works, keeping renewer");
            return Ok(Action::RequeueAfter(ROTATION_REQUEUE));
        }

        match (self.settings.policy, &self.host) {
            (RotationPolicy::Restart, Some(host))
                if active.restart_requested.as_ref() == Some(&record.revision) =>
            {
                tracing::info!(lease = %lease, host = %host.describe(), revision = %record.revision, "host restart already requested");
            }
            (RotationPolicy::Restart, Some(host)) => {
                let client = LeaseClient::new(self.builder.build(&record)?, lease.clone());
                if probe(Some(&client)).await.is_reachable() {
                    tracing::info!(lease = %lease, host = %host.describe(), "new credential works, restarting host");
                    host.request_restart()
                        .await
                        .map_err(|e| anyhow::anyhow!("restarting host {}: {e}", host.describe()))?;
                    active.restart_requested = Some(record.revision.clone());
                } else {
                    tracing::warn!(lease = %lease, "new credential cannot reach hub either");
                }
            }
            (policy, host) => {
                tracing::warn!(lease = %lease, %policy, host = host.is_some(), "current credential broken, waiting");
            }
        }
        Ok(Action::RequeueAfter(ROTATION_REQUEUE))
    }

    async fn start_from(&mut self, record: CredentialRecord) -> anyhow::Result<Action> {
        let lease = self.settings.lease.clone();
        let client = LeaseClient::new(self.builder.build(&record)?, lease.clone());

        if self.settings.probe_credentials && !probe(Some(&client)).await.is_reachable() {
            tracing::info!(lease = %lease, revision = %record.revision, "credential cannot reach hub yet");
            return Ok(Action::RequeueAfter(INVALID_CREDENTIAL_REQUEUE));
        }

        let mut renewer =
            LeaseRenewer::new(client, Arc::clone(&self.state)).with_jitter(self.settings.jitter);
        if let Some(ref host) = self.host {
            renewer = renewer.with_liveness(Arc::clone(host));
        }
        renewer.start(self.settings.lease_duration).await?;

        tracing::info!(lease = %lease, revision = %record.revision, "renewing lease with hub credential");
        self.active = Some(Active { renewer, cached: record, restart_requested: None });
        Ok(Action::Done)
    }

    async fn stop_active(&mut self) {
        if let Some(active) = self.active.take() {
            tracing::info!(lease = %self.settings.lease, "hub credential removed, stopping renewer");
            active.renewer.stop().await;
        }
    }

    /// Process notifications until `shutdown`, then stop any active renewer.
    ///
    /// The first pass runs immediately. Failed passes are retried with
    /// exponential backoff; a notification always triggers a fresh pass.
    pub async fn run(mut self, mut events: mpsc::Receiver<CredentialEvent>, shutdown: CancellationToken) {
        let mut backoff = BACKOFF_MIN;
        let mut next_pass = Some(Instant::now());
        let mut events_open = true;

        loop {
            let deadline = next_pass;
            let timer = async move {
                match deadline {
                    Some(at) => tokio::time::sleep_until(at).await,
                    None => std::future::pending().await,
                }
            };
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = timer => {}
                event = events.recv(), if events_open => match event {
                    Some(event) => {
                        tracing::debug!(?event, "credential notification");
                        // Every pass reads current state; queued notifications add nothing.
                        while events.try_recv().is_ok() {}
                    }
                    None => {
                        tracing::warn!("credential watcher stopped");
                        events_open = false;
                        continue;
                    }
                },
            }

            next_pass = match self.reconcile().await {
                Ok(Action::Done) => {
                    backoff = BACKOFF_MIN;
                    None
                }
                Ok(Action::RequeueAfter(delay)) => {
                    backoff = BACKOFF_MIN;
                    Some(Instant::now() + delay)
                }
                Err(e) => {
                    tracing::error!(lease = %self.settings.lease, retry_in = ?backoff, "reconcile failed: {e:#}");
                    let at = Instant::now() + backoff;
                    backoff = (backoff * 2).min(BACKOFF_MAX);
                    Some(at)
                }
            };
        }

        self.stop_active().await;
    }
}

#[cfg(test)]
#[path = "controller_tests.rs"]
mod tests;
