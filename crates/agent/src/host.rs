// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Liveness of the workload hosting this agent.
//!
//! Renewal is only meaningful while the host is up, and a credential rotation
//! under the restart policy is applied by asking the host to restart.

use serde::Deserialize;

use crate::error::ApiError;
use crate::kube::KubeClient;
use crate::BoxFuture;

/// The host this agent runs in.
pub trait HostMonitor: Send + Sync {
    /// Whether the host is currently live. Lookup failures are errors, not
    /// "not live": callers decide how to treat them.
    fn is_live(&self) -> BoxFuture<'_, Result<bool, ApiError>>;

    /// Ask for the host to be restarted so it picks up new credentials.
    fn request_restart(&self) -> BoxFuture<'_, Result<(), ApiError>>;

    /// Identity for logs.
    fn describe(&self) -> String;
}

#[derive(Debug, Deserialize)]
struct Pod {
    #[serde(default)]
    status: PodStatus,
}

#[derive(Debug, Default, Deserialize)]
struct PodStatus {
    #[serde(default)]
    phase: Option<String>,
}

/// [`HostMonitor`] for the pod this agent runs in, via the local cluster API.
pub struct PodMonitor {
    client: KubeClient,
    namespace: String,
    name: String,
}

impl PodMonitor {
    pub fn new(client: KubeClient, namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self { client, namespace: namespace.into(), name: name.into() }
    }

    fn path(&self) -> String {
        format!("/api/v1/namespaces/{}/pods/{}", self.namespace, self.name)
    }
}

impl HostMonitor for PodMonitor {
    fn is_live(&self) -> BoxFuture<'_, Result<bool, ApiError>> {
        Box::pin(async move {
            let pod: Pod = self.client.get(&self.path()).await?;
            Ok(pod.status.phase.as_deref() == Some("Running"))
        })
    }

    fn request_restart(&self) -> BoxFuture<'_, Result<(), ApiError>> {
        Box::pin(async move {
            tracing::info!(pod = %self.describe(), "deleting pod to pick up rotated credential");
            match self.client.delete(&self.path()).await {
                Err(ApiError::NotFound) => Ok(()),
                other => other,
            }
        })
    }

    fn describe(&self) -> String {
        format!("{}/{}", self.namespace, self.name)
    }
}
