// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! [`LeaseStore`] over the `coordination.k8s.io/v1` REST API.

use crate::error::ApiError;
use crate::kube::KubeClient;
use crate::lease::{Lease, LeaseKey, LeaseStore};
use crate::BoxFuture;

pub struct KubeLeaseStore {
    client: KubeClient,
}

impl KubeLeaseStore {
    pub fn new(client: KubeClient) -> Self {
        Self { client }
    }
}

fn collection_path(namespace: &str) -> String {
    format!("/apis/coordination.k8s.io/v1/namespaces/{namespace}/leases")
}

fn object_path(namespace: &str, name: &str) -> String {
    format!("{}/{name}", collection_path(namespace))
}

impl LeaseStore for KubeLeaseStore {
    fn get<'a>(&'a self, key: &'a LeaseKey) -> BoxFuture<'a, Result<Lease, ApiError>> {
        Box::pin(async move { self.client.get(&object_path(&key.namespace, &key.name)).await })
    }

    fn create<'a>(&'a self, lease: &'a Lease) -> BoxFuture<'a, Result<Lease, ApiError>> {
        Box::pin(async move {
            self.client.post(&collection_path(&lease.metadata.namespace), lease).await
        })
    }

    fn update<'a>(&'a self, lease: &'a Lease) -> BoxFuture<'a, Result<Lease, ApiError>> {
        Box::pin(async move {
            let path = object_path(&lease.metadata.namespace, &lease.metadata.name);
            self.client.put(&path, lease).await
        })
    }
}
