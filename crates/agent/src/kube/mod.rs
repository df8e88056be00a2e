// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Minimal Kubernetes API access: connection settings and a JSON REST client.

pub mod client;
pub mod config;

use std::sync::Once;

pub use client::KubeClient;
pub use config::{Auth, Kubeconfig, RestConfig};

static CRYPTO_INIT: Once = Once::new();

/// Install the ring crypto provider for reqwest/rustls.
/// Safe to call multiple times; only the first call has effect.
pub fn ensure_crypto() {
    CRYPTO_INIT.call_once(|| {
        let _ = rustls::crypto::ring::default_provider().install_default();
    });
}
