// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Credential read from a Secret through the local cluster API.

use std::collections::BTreeMap;

use base64::Engine;
use serde::Deserialize;

use super::{CredentialRecord, CredentialSource};
use crate::error::ApiError;
use crate::kube::KubeClient;
use crate::BoxFuture;

#[derive(Debug, Deserialize)]
struct Secret {
    metadata: SecretMeta,
    #[serde(default)]
    data: BTreeMap<String, String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SecretMeta {
    #[serde(default)]
    resource_version: Option<String>,
    #[serde(default)]
    deletion_timestamp: Option<String>,
}

pub struct SecretSource {
    client: KubeClient,
    namespace: String,
    name: String,
}

impl SecretSource {
    pub fn new(client: KubeClient, namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self { client, namespace: namespace.into(), name: name.into() }
    }

    fn path(&self) -> String {
        format!("/api/v1/namespaces/{}/secrets/{}", self.namespace, self.name)
    }

    fn decode(&self, secret: Secret) -> anyhow::Result<CredentialRecord> {
        let mut data = BTreeMap::new();
        for (key, value) in secret.data {
            let bytes = base64::engine::general_purpose::STANDARD
                .decode(value.trim())
                .map_err(|e| anyhow::anyhow!("secret {}: key {key:?}: invalid base64: {e}", self.describe()))?;
            data.insert(key, bytes);
        }
        Ok(CredentialRecord {
            name: self.name.clone(),
            namespace: self.namespace.clone(),
            data,
            deleting: secret.metadata.deletion_timestamp.is_some(),
            revision: secret.metadata.resource_version.unwrap_or_default(),
        })
    }
}

impl CredentialSource for SecretSource {
    fn describe(&self) -> String {
        format!("{}/{}", self.namespace, self.name)
    }

    fn fetch(&self) -> BoxFuture<'_, anyhow::Result<Option<CredentialRecord>>> {
        Box::pin(async move {
            match self.client.get::<Secret>(&self.path()).await {
                Ok(secret) => Ok(Some(self.decode(secret)?)),
                Err(ApiError::NotFound) => Ok(None),
                Err(e) => Err(anyhow::anyhow!("reading secret {}: {e}", self.describe())),
            }
        })
    }
}
