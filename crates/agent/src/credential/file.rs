// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Credential read from a mounted Secret volume.

use std::collections::BTreeMap;
use std::path::PathBuf;

use sha2::{Digest, Sha256};
use tokio::sync::mpsc;

use super::{CredentialRecord, CredentialSource};
use crate::BoxFuture;

/// Each regular, non-hidden file in `dir` is one key. Hidden entries are the
/// kubelet's `..data` indirection and are skipped; the key files are symlinks
/// into it and are followed.
pub struct FileSource {
    dir: PathBuf,
    name: String,
    namespace: String,
}

impl FileSource {
    pub fn new(dir: impl Into<PathBuf>, name: impl Into<String>, namespace: impl Into<String>) -> Self {
        Self { dir: dir.into(), name: name.into(), namespace: namespace.into() }
    }

    /// Snapshot the directory. Missing or empty reads as `None`.
    pub fn read(&self) -> anyhow::Result<Option<CredentialRecord>> {
        let entries = match std::fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(anyhow::anyhow!("reading {}: {e}", self.dir.display())),
        };

        let mut data = BTreeMap::new();
        for entry in entries {
            let entry = entry?;
            let Some(key) = entry.file_name().to_str().map(str::to_owned) else {
                continue;
            };
            if key.starts_with('.') {
                continue;
            }
            let path = entry.path();
            // Follows symlinks.
            match std::fs::metadata(&path) {
                Ok(meta) if meta.is_file() => {}
                _ => continue,
            }
            let bytes = match std::fs::read(&path) {
                Ok(bytes) => bytes,
                // Removed between listing and reading; the next pass sees the new state.
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => return Err(anyhow::anyhow!("reading {}: {e}", path.display())),
            };
            data.insert(key, bytes);
        }

        if data.is_empty() {
            return Ok(None);
        }
        let revision = content_revision(&data);
        Ok(Some(CredentialRecord {
            name: self.name.clone(),
            namespace: self.namespace.clone(),
            data,
            deleting: false,
            revision,
        }))
    }
}

/// Hex SHA-256 over the sorted keys and their content.
pub fn content_revision(data: &BTreeMap<String, Vec<u8>>) -> String {
    let mut hasher = Sha256::new();
    for (key, value) in data {
        hasher.update(key.as_bytes());
        hasher.update([0u8]);
        hasher.update((value.len() as u64).to_le_bytes());
        hasher.update(value);
    }
    hasher.finalize().iter().map(|b| format!("{b:02x}")).collect()
}

impl CredentialSource for FileSource {
    fn describe(&self) -> String {
        self.dir.display().to_string()
    }

    fn fetch(&self) -> BoxFuture<'_, anyhow::Result<Option<CredentialRecord>>> {
        Box::pin(async move { self.read() })
    }

    fn subscribe(&self, wake_tx: mpsc::Sender<()>) -> Option<notify::RecommendedWatcher> {
        use notify::{RecursiveMode, Watcher};

        let mut watcher = notify::recommended_watcher(move |_: notify::Result<notify::Event>| {
            let _ = wake_tx.try_send(());
        })
        .ok()?;

        // Watch the parent until the directory itself exists.
        let watch_path = if self.dir.is_dir() {
            self.dir.as_path()
        } else {
            self.dir.parent().unwrap_or(self.dir.as_path())
        };
        watcher.watch(watch_path, RecursiveMode::NonRecursive).ok()?;
        Some(watcher)
    }
}

#[cfg(test)]
#[path = "file_tests.rs"]
mod tests;
