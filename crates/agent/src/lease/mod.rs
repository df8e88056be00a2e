// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Remote lease records and the client operations the renewal engine needs.
//!
//! [`LeaseStore`] is the raw get/create/update capability. [`LeaseClient`]
//! binds a store to one lease key and layers the two engine operations on top:
//! ensure-exists and renew.

pub mod kube;

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Duration as ChronoDuration, SecondsFormat, SubsecRound, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ApiError;
use crate::BoxFuture;

pub const LEASE_API_VERSION: &str = "coordination.k8s.io/v1";
pub const LEASE_KIND: &str = "Lease";

/// Identity of one lease record on the remote store.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LeaseKey {
    pub namespace: String,
    pub name: String,
}

impl LeaseKey {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self { namespace: namespace.into(), name: name.into() }
    }
}

impl fmt::Display for LeaseKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// A `coordination.k8s.io/v1` Lease.
///
/// Fields this agent does not own are carried in `extra` so an update
/// never drops them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Lease {
    #[serde(default = "default_api_version")]
    pub api_version: String,
    #[serde(default = "default_kind")]
    pub kind: String,
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub spec: LeaseSpec,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectMeta {
    pub name: String,
    #[serde(default)]
    pub namespace: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_version: Option<String>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LeaseSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lease_duration_seconds: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none", with = "micro_time")]
    pub renew_time: Option<DateTime<Utc>>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

fn default_api_version() -> String {
    LEASE_API_VERSION.to_owned()
}

fn default_kind() -> String {
    LEASE_KIND.to_owned()
}

impl Lease {
    /// A fresh lease with a duration and no renew time.
    pub fn new(key: &LeaseKey, duration_secs: i32) -> Self {
        Self {
            api_version: default_api_version(),
            kind: default_kind(),
            metadata: ObjectMeta {
                name: key.name.clone(),
                namespace: key.namespace.clone(),
                ..Default::default()
            },
            spec: LeaseSpec { lease_duration_seconds: Some(duration_secs), ..Default::default() },
            extra: Default::default(),
        }
    }

    pub fn key(&self) -> LeaseKey {
        LeaseKey::new(self.metadata.namespace.clone(), self.metadata.name.clone())
    }
}

/// RFC 3339 with microsecond precision, the `MicroTime` wire format.
mod micro_time {
    use chrono::{DateTime, Utc};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(t: &Option<DateTime<Utc>>, s: S) -> Result<S::Ok, S::Error> {
        match t {
            Some(t) => s.serialize_str(&super::format_micro_time(t)),
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<DateTime<Utc>>, D::Error> {
        let raw: Option<String> = Option::deserialize(d)?;
        raw.map(|s| {
            DateTime::parse_from_rfc3339(&s)
                .map(|t| t.with_timezone(&Utc))
                .map_err(serde::de::Error::custom)
        })
        .transpose()
    }
}

/// Format a renew time the way it appears on the wire.
pub fn format_micro_time(t: &DateTime<Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Raw access to a lease store.
///
/// Object-safe so the engine can hold `Arc<dyn LeaseStore>` built from a
/// credential at runtime.
pub trait LeaseStore: Send + Sync {
    fn get<'a>(&'a self, key: &'a LeaseKey) -> BoxFuture<'a, Result<Lease, ApiError>>;

    fn create<'a>(&'a self, lease: &'a Lease) -> BoxFuture<'a, Result<Lease, ApiError>>;

    fn update<'a>(&'a self, lease: &'a Lease) -> BoxFuture<'a, Result<Lease, ApiError>>;
}

/// Outcome of [`LeaseClient::ensure_exists`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ensured {
    Created,
    Existing,
}

/// A lease store bound to one lease key.
#[derive(Clone)]
pub struct LeaseClient {
    store: Arc<dyn LeaseStore>,
    key: LeaseKey,
}

impl LeaseClient {
    pub fn new(store: Arc<dyn LeaseStore>, key: LeaseKey) -> Self {
        Self { store, key }
    }

    pub fn key(&self) -> &LeaseKey {
        &self.key
    }

    /// Read the current record.
    pub async fn get(&self) -> Result<Lease, ApiError> {
        self.store.get(&self.key).await
    }

    /// Create the lease with `duration_secs` and no renew time if absent.
    ///
    /// Losing a create race to another writer counts as success.
    pub async fn ensure_exists(&self, duration_secs: i32) -> Result<Ensured, ApiError> {
        match self.store.get(&self.key).await {
            Ok(_) => return Ok(Ensured::Existing),
            Err(ApiError::NotFound) => {}
            Err(e) => return Err(e),
        }
        tracing::info!(lease = %self.key, duration_secs, "creating lease");
        match self.store.create(&Lease::new(&self.key, duration_secs)).await {
            Ok(_) => Ok(Ensured::Created),
            Err(ApiError::AlreadyExists) => Ok(Ensured::Existing),
            Err(e) => Err(e),
        }
    }

    /// Stamp the current time into the lease's renew time.
    ///
    /// Reads first so a vanished lease fails as `NotFound` rather than being
    /// recreated. The update carries the fetched `resourceVersion`; a write
    /// that lands in between fails this tick with `Conflict` and is not retried.
    pub async fn renew(&self) -> Result<Lease, ApiError> {
        let mut lease = self.store.get(&self.key).await?;
        lease.spec.renew_time = Some(next_renew_time(lease.spec.renew_time, Utc::now()));
        self.store.update(&lease).await
    }
}

/// How far ahead of the local clock a stored renew time may be and still be
/// treated as our own previous stamp.
const MAX_CLOCK_SKEW_MS: i64 = 1000;

/// Renew time to write given the stored one: wall clock, but never at or
/// before a previous stamp that is within [`MAX_CLOCK_SKEW_MS`] of it.
pub fn next_renew_time(previous: Option<DateTime<Utc>>, now: DateTime<Utc>) -> DateTime<Utc> {
    // Truncate to the wire precision so the comparison matches what is stored.
    let now = now.trunc_subsecs(6);
    match previous {
        Some(prev) if prev >= now && prev - now <= ChronoDuration::milliseconds(MAX_CLOCK_SKEW_MS) => {
            prev + ChronoDuration::microseconds(1)
        }
        _ => now,
    }
}

#[cfg(test)]
#[path = "mod_tests.rs"]
mod tests;
