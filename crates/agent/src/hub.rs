// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Turning a hub credential record into a lease store handle.

use std::path::Path;
use std::sync::Arc;

use crate::credential::CredentialRecord;
use crate::kube::config::read_local_file;
use crate::kube::{KubeClient, Kubeconfig};
use crate::lease::kube::KubeLeaseStore;
use crate::lease::LeaseStore;

/// Builds a store handle from exactly one credential record.
pub trait ClientBuilder: Send + Sync {
    fn build(&self, record: &CredentialRecord) -> anyhow::Result<Arc<dyn LeaseStore>>;
}

/// Reads a kubeconfig from one key of the record.
///
/// Paths the kubeconfig references (CA, client cert/key, token file) are
/// looked up by file name among the record's other keys first, which is how a
/// mounted Secret lays them out, then on the local filesystem.
pub struct KubeconfigBuilder {
    key: String,
}

impl KubeconfigBuilder {
    pub fn new(key: impl Into<String>) -> Self {
        Self { key: key.into() }
    }
}

impl ClientBuilder for KubeconfigBuilder {
    fn build(&self, record: &CredentialRecord) -> anyhow::Result<Arc<dyn LeaseStore>> {
        let raw = record.get(&self.key).ok_or_else(|| {
            anyhow::anyhow!(
                "credential {}/{} has no {:?} key",
                record.namespace,
                record.name,
                self.key
            )
        })?;
        let config = Kubeconfig::from_yaml(raw)?.rest_config(|path| resolve_file(record, path))?;
        let client = KubeClient::new(&config)?;
        tracing::debug!(server = client.base_url(), revision = %record.revision, "built hub client");
        Ok(Arc::new(KubeLeaseStore::new(client)))
    }
}

fn resolve_file(record: &CredentialRecord, path: &str) -> anyhow::Result<Vec<u8>> {
    let sibling = Path::new(path).file_name().and_then(|n| n.to_str()).and_then(|n| record.get(n));
    match sibling {
        Some(data) => Ok(data.to_vec()),
        None => read_local_file(path),
    }
}

#[cfg(test)]
#[path = "hub_tests.rs"]
mod tests;
