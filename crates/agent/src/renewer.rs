// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Background renewal of one lease.
//!
//! [`LeaseRenewer::start`] makes sure the lease exists and then spawns a loop
//! that stamps the renew time every `duration` (plus jitter) until
//! [`LeaseRenewer::stop`]. Start, stop and each tick take the same async
//! mutex, so once `stop` returns no further renewal is written.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::host::HostMonitor;
use crate::lease::LeaseClient;

pub const DEFAULT_JITTER: f64 = 0.05;

/// Consecutive transient failures logged at `warn` before escalating to
/// `error`. Non-transient failures log at `error` straight away.
const ESCALATE_AFTER: u32 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Stopped,
    Starting,
    Running,
}

/// Renewal progress shared with the health endpoint.
///
/// Outlives any single renewer: the controller hands the same state to each
/// renewer it starts.
#[derive(Debug, Default)]
pub struct RenewState {
    running: AtomicBool,
    consecutive_failures: AtomicU32,
    last_renew: Mutex<Option<DateTime<Utc>>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RenewSnapshot {
    pub renewing: bool,
    pub last_renew: Option<DateTime<Utc>>,
    pub consecutive_failures: u32,
}

impl RenewState {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn snapshot(&self) -> RenewSnapshot {
        RenewSnapshot {
            renewing: self.running.load(Ordering::Acquire),
            last_renew: *self.last_renew.lock().unwrap_or_else(|e| e.into_inner()),
            consecutive_failures: self.consecutive_failures.load(Ordering::Acquire),
        }
    }

    fn set_running(&self, running: bool) {
        self.running.store(running, Ordering::Release);
    }

    fn record_success(&self, at: Option<DateTime<Utc>>) {
        self.consecutive_failures.store(0, Ordering::Release);
        *self.last_renew.lock().unwrap_or_else(|e| e.into_inner()) = at;
    }

    fn record_failure(&self) -> u32 {
        self.consecutive_failures.fetch_add(1, Ordering::AcqRel) + 1
    }
}

struct Inner {
    phase: Phase,
    cancel: Option<CancellationToken>,
}

/// Owns the renewal loop for one lease client.
pub struct LeaseRenewer {
    client: LeaseClient,
    liveness: Option<Arc<dyn HostMonitor>>,
    jitter: f64,
    inner: Arc<tokio::sync::Mutex<Inner>>,
    state: Arc<RenewState>,
    /// Parent of every loop's token; cancelled on drop.
    lifetime: CancellationToken,
}

impl LeaseRenewer {
    pub fn new(client: LeaseClient, state: Arc<RenewState>) -> Self {
        Self {
            client,
            liveness: None,
            jitter: DEFAULT_JITTER,
            inner: Arc::new(tokio::sync::Mutex::new(Inner { phase: Phase::Stopped, cancel: None })),
            state,
            lifetime: CancellationToken::new(),
        }
    }

    /// Skip ticks while `host` reports not live.
    pub fn with_liveness(mut self, host: Arc<dyn HostMonitor>) -> Self {
        self.liveness = Some(host);
        self
    }

    /// Jitter factor in `[0, 1]`; 0 disables.
    pub fn with_jitter(mut self, factor: f64) -> Self {
        self.jitter = factor.clamp(0.0, 1.0);
        self
    }

    pub fn client(&self) -> &LeaseClient {
        &self.client
    }

    pub async fn phase(&self) -> Phase {
        self.inner.lock().await.phase
    }

    pub async fn is_running(&self) -> bool {
        self.phase().await == Phase::Running
    }

    /// Ensure the lease exists, then begin renewing every `duration`.
    ///
    /// Errors if already started, or if the lease cannot be ensured; in the
    /// latter case nothing is scheduled.
    pub async fn start(&self, duration: Duration) -> anyhow::Result<()> {
        let mut inner = self.inner.lock().await;
        if inner.phase != Phase::Stopped {
            anyhow::bail!("renewer for lease {} already started", self.client.key());
        }
        let secs = i32::try_from(duration.as_secs())
            .map_err(|_| anyhow::anyhow!("lease duration {duration:?} out of range"))?;
        if secs == 0 {
            anyhow::bail!("lease duration must be at least one second");
        }

        inner.phase = Phase::Starting;
        if let Err(e) = self.client.ensure_exists(secs).await {
            inner.phase = Phase::Stopped;
            return Err(anyhow::anyhow!("ensuring lease {}: {e}", self.client.key()));
        }

        let cancel = self.lifetime.child_token();
        inner.cancel = Some(cancel.clone());
        inner.phase = Phase::Running;
        self.state.set_running(true);

        tracing::info!(lease = %self.client.key(), duration_secs = secs, "lease renewal started");
        tokio::spawn(renew_loop(
            Ticker {
                client: self.client.clone(),
                liveness: self.liveness.clone(),
                state: Arc::clone(&self.state),
            },
            Arc::clone(&self.inner),
            duration,
            self.jitter,
            cancel,
        ));
        Ok(())
    }

    /// Stop renewing. Idempotent. No renewal is written after this returns.
    pub async fn stop(&self) {
        let mut inner = self.inner.lock().await;
        if let Some(cancel) = inner.cancel.take() {
            cancel.cancel();
            tracing::info!(lease = %self.client.key(), "lease renewal stopped");
        }
        inner.phase = Phase::Stopped;
        self.state.set_running(false);
    }
}

impl Drop for LeaseRenewer {
    fn drop(&mut self) {
        self.lifetime.cancel();
    }
}

/// `period` stretched by a random fraction of up to `factor`.
pub fn jittered(period: Duration, factor: f64) -> Duration {
    if factor <= 0.0 {
        return period;
    }
    period.mul_f64(1.0 + factor * rand::random::<f64>())
}

struct Ticker {
    client: LeaseClient,
    liveness: Option<Arc<dyn HostMonitor>>,
    state: Arc<RenewState>,
}

impl Ticker {
    async fn tick(&self) {
        if let Some(ref host) = self.liveness {
            match host.is_live().await {
                Ok(true) => {}
                Ok(false) => {
                    tracing::debug!(lease = %self.client.key(), host = %host.describe(), "host not live, skipping renewal");
                    return;
                }
                Err(e) => {
                    tracing::warn!(lease = %self.client.key(), host = %host.describe(), err = %e, "host liveness check failed, skipping renewal");
                    return;
                }
            }
        }

        match self.client.renew().await {
            Ok(lease) => {
                self.state.record_success(lease.spec.renew_time);
                tracing::debug!(lease = %self.client.key(), renew_time = ?lease.spec.renew_time, "lease renewed");
            }
            Err(e) => {
                let failures = self.state.record_failure();
                let transient = e.is_transient();
                if transient && failures <= ESCALATE_AFTER {
                    tracing::warn!(lease = %self.client.key(), err = %e, failures, "lease renewal failed, retrying next tick");
                } else {
                    tracing::error!(lease = %self.client.key(), err = %e, failures, transient, "lease renewal failing");
                }
            }
        }
    }
}

async fn renew_loop(
    ticker: Ticker,
    inner: Arc<tokio::sync::Mutex<Inner>>,
    period: Duration,
    jitter: f64,
    cancel: CancellationToken,
) {
    loop {
        {
            let _guard = inner.lock().await;
            if cancel.is_cancelled() {
                break;
            }
            ticker.tick().await;
        }

        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(jittered(period, jitter)) => {}
        }
    }
}

#[cfg(test)]
#[path = "renewer_tests.rs"]
mod tests;
