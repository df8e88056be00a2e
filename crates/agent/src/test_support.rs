// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Shared test infrastructure: in-memory fakes and assertion helpers.

pub mod fake_api;

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};

use crate::credential::{CredentialRecord, CredentialSource};
use crate::error::ApiError;
use crate::host::HostMonitor;
use crate::hub::ClientBuilder;
use crate::lease::{Lease, LeaseKey, LeaseStore};
use crate::BoxFuture;

/// Assert that a `Result` is an error whose display contains `needle`.
#[macro_export]
macro_rules! assert_err_contains {
    ($result:expr, $needle:expr) => {{
        match $result {
            Ok(_) => panic!("expected error containing {:?}, got Ok", $needle),
            Err(e) => {
                let msg = format!("{e:#}");
                assert!(msg.contains($needle), "expected error containing {:?}, got {msg:?}", $needle);
            }
        }
    }};
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}

#[derive(Debug, Default)]
pub struct CallCounts {
    gets: AtomicUsize,
    creates: AtomicUsize,
    updates: AtomicUsize,
}

/// In-memory [`LeaseStore`] with the API server's create/update semantics.
///
/// Clones share everything. [`MemoryLeaseStore::view`] shares the records but
/// has its own failure switch and call counters, so two credentials can point
/// at the same remote store and fail independently.
#[derive(Clone, Default)]
pub struct MemoryLeaseStore {
    records: Arc<Mutex<HashMap<LeaseKey, Lease>>>,
    version: Arc<AtomicUsize>,
    failure: Arc<Mutex<Option<ApiError>>>,
    calls: Arc<CallCounts>,
}

impl MemoryLeaseStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn view(&self) -> Self {
        Self {
            records: Arc::clone(&self.records),
            version: Arc::clone(&self.version),
            failure: Arc::default(),
            calls: Arc::default(),
        }
    }

    pub fn handle(&self) -> Arc<dyn LeaseStore> {
        Arc::new(self.clone())
    }

    /// Fail every call with `err` until cleared with `None`.
    pub fn fail_with(&self, err: Option<ApiError>) {
        *lock(&self.failure) = err;
    }

    /// Store `lease` as an external writer would, bumping its version.
    pub fn insert(&self, mut lease: Lease) {
        self.stamp(&mut lease);
        lock(&self.records).insert(lease.key(), lease);
    }

    pub fn remove(&self, key: &LeaseKey) {
        lock(&self.records).remove(key);
    }

    pub fn lease(&self, key: &LeaseKey) -> Option<Lease> {
        lock(&self.records).get(key).cloned()
    }

    pub fn renew_time(&self, key: &LeaseKey) -> Option<DateTime<Utc>> {
        self.lease(key).and_then(|l| l.spec.renew_time)
    }

    pub fn gets(&self) -> usize {
        self.calls.gets.load(Ordering::SeqCst)
    }

    pub fn creates(&self) -> usize {
        self.calls.creates.load(Ordering::SeqCst)
    }

    pub fn updates(&self) -> usize {
        self.calls.updates.load(Ordering::SeqCst)
    }

    fn check_failure(&self) -> Result<(), ApiError> {
        match lock(&self.failure).clone() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn stamp(&self, lease: &mut Lease) {
        let v = self.version.fetch_add(1, Ordering::SeqCst) + 1;
        lease.metadata.resource_version = Some(v.to_string());
    }
}

impl LeaseStore for MemoryLeaseStore {
    fn get<'a>(&'a self, key: &'a LeaseKey) -> BoxFuture<'a, Result<Lease, ApiError>> {
        Box::pin(async move {
            self.calls.gets.fetch_add(1, Ordering::SeqCst);
            self.check_failure()?;
            lock(&self.records).get(key).cloned().ok_or(ApiError::NotFound)
        })
    }

    fn create<'a>(&'a self, lease: &'a Lease) -> BoxFuture<'a, Result<Lease, ApiError>> {
        Box::pin(async move {
            self.calls.creates.fetch_add(1, Ordering::SeqCst);
            self.check_failure()?;
            let mut records = lock(&self.records);
            let key = lease.key();
            if records.contains_key(&key) {
                return Err(ApiError::AlreadyExists);
            }
            let mut stored = lease.clone();
            self.stamp(&mut stored);
            records.insert(key, stored.clone());
            Ok(stored)
        })
    }

    fn update<'a>(&'a self, lease: &'a Lease) -> BoxFuture<'a, Result<Lease, ApiError>> {
        Box::pin(async move {
            self.calls.updates.fetch_add(1, Ordering::SeqCst);
            self.check_failure()?;
            let mut records = lock(&self.records);
            let key = lease.key();
            let current = records.get(&key).ok_or(ApiError::NotFound)?;
            let Some(ref rv) = lease.metadata.resource_version else {
                return Err(ApiError::Status {
                    code: 422,
                    message: "metadata.resourceVersion: must be specified for an update".to_owned(),
                });
            };
            if current.metadata.resource_version.as_ref() != Some(rv) {
                return Err(ApiError::Conflict(format!("stale resourceVersion {rv}")));
            }
            let mut stored = lease.clone();
            self.stamp(&mut stored);
            records.insert(key, stored.clone());
            Ok(stored)
        })
    }
}

/// A credential record with a single `kubeconfig` key.
pub fn credential(content: &str, revision: &str) -> CredentialRecord {
    let mut data = BTreeMap::new();
    data.insert("kubeconfig".to_owned(), content.as_bytes().to_vec());
    CredentialRecord {
        name: "hub-kubeconfig-secret".to_owned(),
        namespace: "agent".to_owned(),
        data,
        deleting: false,
        revision: revision.to_owned(),
    }
}

/// [`CredentialSource`] whose current record is set directly by the test.
#[derive(Clone, Default)]
pub struct StaticSource {
    record: Arc<Mutex<Option<CredentialRecord>>>,
    failure: Arc<Mutex<Option<String>>>,
    fetches: Arc<AtomicUsize>,
}

impl StaticSource {
    pub fn new(record: Option<CredentialRecord>) -> Self {
        let source = Self::default();
        source.set(record);
        source
    }

    pub fn set(&self, record: Option<CredentialRecord>) {
        *lock(&self.record) = record;
    }

    pub fn fail_with(&self, message: Option<&str>) {
        *lock(&self.failure) = message.map(str::to_owned);
    }

    pub fn fetches(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }
}

impl CredentialSource for StaticSource {
    fn describe(&self) -> String {
        "static".to_owned()
    }

    fn fetch(&self) -> BoxFuture<'_, anyhow::Result<Option<CredentialRecord>>> {
        Box::pin(async move {
            self.fetches.fetch_add(1, Ordering::SeqCst);
            if let Some(msg) = lock(&self.failure).clone() {
                anyhow::bail!(msg);
            }
            Ok(lock(&self.record).clone())
        })
    }
}

/// [`HostMonitor`] with a switchable liveness answer.
#[derive(Default)]
pub struct ScriptedHost {
    live: AtomicBool,
    lookup_error: Mutex<Option<ApiError>>,
    restart_error: Mutex<Option<ApiError>>,
    checks: AtomicUsize,
    restarts: AtomicUsize,
}

impl ScriptedHost {
    pub fn new(live: bool) -> Arc<Self> {
        let host = Self::default();
        host.live.store(live, Ordering::SeqCst);
        Arc::new(host)
    }

    pub fn set_live(&self, live: bool) {
        self.live.store(live, Ordering::SeqCst);
    }

    pub fn fail_lookup(&self, err: Option<ApiError>) {
        *lock(&self.lookup_error) = err;
    }

    pub fn fail_restart(&self, err: Option<ApiError>) {
        *lock(&self.restart_error) = err;
    }

    pub fn checks(&self) -> usize {
        self.checks.load(Ordering::SeqCst)
    }

    pub fn restarts(&self) -> usize {
        self.restarts.load(Ordering::SeqCst)
    }
}

impl HostMonitor for ScriptedHost {
    fn is_live(&self) -> BoxFuture<'_, Result<bool, ApiError>> {
        Box::pin(async move {
            self.checks.fetch_add(1, Ordering::SeqCst);
            if let Some(err) = lock(&self.lookup_error).clone() {
                return Err(err);
            }
            Ok(self.live.load(Ordering::SeqCst))
        })
    }

    fn request_restart(&self) -> BoxFuture<'_, Result<(), ApiError>> {
        Box::pin(async move {
            if let Some(err) = lock(&self.restart_error).clone() {
                return Err(err);
            }
            self.restarts.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
    }

    fn describe(&self) -> String {
        "scripted".to_owned()
    }
}

/// [`ClientBuilder`] that maps the `kubeconfig` content to a prepared store.
#[derive(Default)]
pub struct ScriptedBuilder {
    stores: Mutex<HashMap<Vec<u8>, Arc<dyn LeaseStore>>>,
    builds: AtomicUsize,
}

impl ScriptedBuilder {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn route(&self, content: &str, store: Arc<dyn LeaseStore>) {
        lock(&self.stores).insert(content.as_bytes().to_vec(), store);
    }

    pub fn builds(&self) -> usize {
        self.builds.load(Ordering::SeqCst)
    }
}

impl ClientBuilder for ScriptedBuilder {
    fn build(&self, record: &CredentialRecord) -> anyhow::Result<Arc<dyn LeaseStore>> {
        self.builds.fetch_add(1, Ordering::SeqCst);
        let content = record.get("kubeconfig").unwrap_or_default();
        lock(&self.stores)
            .get(content)
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("no store routed for credential {}", record.revision))
    }
}

/// Extension trait to convert any `Display` error into `anyhow::Error`.
pub trait AnyhowExt<T> {
    fn anyhow(self) -> anyhow::Result<T>;
}

impl<T, E: std::fmt::Display> AnyhowExt<T> for Result<T, E> {
    fn anyhow(self) -> anyhow::Result<T> {
        self.map_err(|e| anyhow::anyhow!("{e}"))
    }
}
