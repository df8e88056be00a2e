// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

pub mod config;
pub mod controller;
pub mod credential;
pub mod error;
pub mod health;
pub mod host;
pub mod hub;
pub mod kube;
pub mod lease;
pub mod probe;
pub mod renewer;
pub mod test_support;

use std::future::Future;
use std::pin::Pin;

/// Boxed future returned by the object-safe async traits in this crate.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;
