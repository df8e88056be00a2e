// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! One-shot check of whether a credential can reach the lease store.

use std::fmt;

use crate::error::ApiError;
use crate::lease::LeaseClient;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reachability {
    Reachable,
    Unreachable,
}

impl Reachability {
    pub fn is_reachable(self) -> bool {
        self == Self::Reachable
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Reachable => "reachable",
            Self::Unreachable => "unreachable",
        }
    }
}

impl fmt::Display for Reachability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Read the lease once through `client`. A missing lease still proves the
/// credential works; every other failure means it does not. No retries.
pub async fn probe(client: Option<&LeaseClient>) -> Reachability {
    let Some(client) = client else {
        tracing::info!("credential probe: no client, unreachable");
        return Reachability::Unreachable;
    };
    match client.get().await {
        Ok(_) => {
            tracing::info!(lease = %client.key(), "credential probe: reachable");
            Reachability::Reachable
        }
        Err(ApiError::NotFound) => {
            tracing::info!(lease = %client.key(), "credential probe: reachable, lease not found");
            Reachability::Reachable
        }
        Err(e) => {
            tracing::info!(lease = %client.key(), err = %e, "credential probe: unreachable");
            Reachability::Unreachable
        }
    }
}

#[cfg(test)]
#[path = "probe_tests.rs"]
mod tests;
