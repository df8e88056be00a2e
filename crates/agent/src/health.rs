// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Optional HTTP health endpoint exposing renewal progress.

use std::sync::Arc;

use axum::extract::State;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::lease::LeaseKey;
use crate::renewer::RenewState;

pub struct HealthState {
    pub lease: LeaseKey,
    pub renew: Arc<RenewState>,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub lease: String,
    pub renewing: bool,
    pub last_renew: Option<DateTime<Utc>>,
    pub consecutive_failures: u32,
}

/// `GET /api/v1/health`
pub async fn health(State(s): State<Arc<HealthState>>) -> impl IntoResponse {
    let snap = s.renew.snapshot();
    Json(HealthResponse {
        status: "ok",
        lease: s.lease.to_string(),
        renewing: snap.renewing,
        last_renew: snap.last_renew,
        consecutive_failures: snap.consecutive_failures,
    })
}

pub fn build_health_router(state: Arc<HealthState>) -> Router {
    Router::new().route("/api/v1/health", get(health)).with_state(state)
}

/// Serve the health router on `addr` until `shutdown`.
pub async fn serve(addr: &str, state: Arc<HealthState>, shutdown: CancellationToken) -> anyhow::Result<()> {
    let listener = TcpListener::bind(addr).await?;
    tracing::info!("health probe listening on {addr}");
    tokio::spawn(async move {
        let result = axum::serve(listener, build_health_router(state))
            .with_graceful_shutdown(shutdown.cancelled_owned())
            .await;
        if let Err(e) = result {
            tracing::error!("health server error: {e}");
        }
    });
    Ok(())
}

#[cfg(test)]
#[path = "health_tests.rs"]
mod tests;
