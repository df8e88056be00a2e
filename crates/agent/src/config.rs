// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::path::PathBuf;
use std::time::Duration;

use clap::{ArgAction, Parser};

use crate::controller::{ControllerSettings, RotationPolicy};
use crate::lease::LeaseKey;

/// Keeps an add-on lease on the hub cluster renewed with the hub kubeconfig.
#[derive(Debug, Parser)]
#[command(name = "addon-lease", version, about)]
pub struct Config {
    /// Name of the lease on the hub.
    #[arg(long, env = "ADDON_LEASE_NAME")]
    pub lease_name: Option<String>,

    /// Namespace of the lease on the hub.
    #[arg(long, env = "ADDON_LEASE_NAMESPACE")]
    pub lease_namespace: Option<String>,

    /// Secret holding the hub kubeconfig.
    #[arg(long, env = "ADDON_LEASE_HUB_KUBECONFIG_SECRET", default_value = "hub-kubeconfig-secret")]
    pub hub_kubeconfig_secret: String,

    /// Read the hub kubeconfig from this mounted directory instead of the Secret API.
    #[arg(long, env = "ADDON_LEASE_HUB_KUBECONFIG_DIR")]
    pub hub_kubeconfig_dir: Option<PathBuf>,

    /// Namespace of the hub kubeconfig Secret. Defaults to the pod namespace.
    #[arg(long, env = "ADDON_LEASE_CREDENTIAL_NAMESPACE")]
    pub credential_namespace: Option<String>,

    /// Key in the credential that holds the kubeconfig.
    #[arg(long, env = "ADDON_LEASE_KUBECONFIG_KEY", default_value = "kubeconfig")]
    pub kubeconfig_key: String,

    /// Lease duration and renew period, in seconds.
    #[arg(long, env = "ADDON_LEASE_DURATION", default_value_t = 60)]
    pub lease_duration: u64,

    /// Extra random fraction of the period added to each wait (0 disables).
    #[arg(long, env = "ADDON_LEASE_RENEW_JITTER", default_value_t = crate::renewer::DEFAULT_JITTER)]
    pub renew_jitter: f64,

    /// Seconds to wait before the controller starts.
    #[arg(long, env = "ADDON_LEASE_STARTUP_DELAY", default_value_t = 10)]
    pub startup_delay: u64,

    /// Seconds between credential polls.
    #[arg(long, env = "ADDON_LEASE_POLL_INTERVAL", default_value_t = 5)]
    pub poll_interval: u64,

    /// What to do when the credential rotates and the old one stops working
    /// (restart, backoff).
    #[arg(long, env = "ADDON_LEASE_ROTATION_POLICY", default_value = "restart")]
    pub rotation_policy: String,

    /// Check that a credential reaches the hub before using it.
    #[arg(long, env = "ADDON_LEASE_CREDENTIAL_PROBE", default_value_t = true, action = ArgAction::Set)]
    pub credential_probe: bool,

    /// Pod this agent runs in, for startup gating and restarts.
    #[arg(long, env = "POD_NAME")]
    pub pod_name: Option<String>,

    #[arg(long, env = "POD_NAMESPACE")]
    pub pod_namespace: Option<String>,

    /// Health endpoint port.
    #[arg(long, env = "ADDON_LEASE_HEALTH_PORT")]
    pub health_port: Option<u16>,

    /// Address the health endpoint binds to.
    #[arg(long, env = "ADDON_LEASE_HOST", default_value = "0.0.0.0")]
    pub host: String,

    /// Log format (json or text).
    #[arg(long, env = "ADDON_LEASE_LOG_FORMAT", default_value = "json")]
    pub log_format: String,

    /// Log level filter.
    #[arg(long, env = "ADDON_LEASE_LOG_LEVEL", default_value = "info")]
    pub log_level: String,
}

impl Config {
    /// Validate the configuration after parsing.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.lease_name.as_deref().is_none_or(str::is_empty) {
            anyhow::bail!("--lease-name is required");
        }
        if self.lease_namespace.as_deref().is_none_or(str::is_empty) {
            anyhow::bail!("--lease-namespace is required");
        }
        if self.lease_duration == 0 {
            anyhow::bail!("--lease-duration must be at least 1 second");
        }
        if i32::try_from(self.lease_duration).is_err() {
            anyhow::bail!("--lease-duration is too large");
        }
        if !(0.0..=1.0).contains(&self.renew_jitter) {
            anyhow::bail!("--renew-jitter must be between 0 and 1");
        }
        if self.poll_interval == 0 {
            anyhow::bail!("--poll-interval must be at least 1 second");
        }
        self.rotation_policy()?;
        match self.log_format.as_str() {
            "json" | "text" => {}
            other => anyhow::bail!("invalid log format: {other}"),
        }
        if self.hub_kubeconfig_dir.is_none() && self.hub_kubeconfig_secret.is_empty() {
            anyhow::bail!("--hub-kubeconfig-secret must not be empty");
        }
        Ok(())
    }

    pub fn rotation_policy(&self) -> anyhow::Result<RotationPolicy> {
        self.rotation_policy.parse()
    }

    pub fn lease_key(&self) -> LeaseKey {
        LeaseKey::new(
            self.lease_namespace.clone().unwrap_or_default(),
            self.lease_name.clone().unwrap_or_default(),
        )
    }

    /// Namespace the credential lives in, when it can be known from flags.
    pub fn credential_namespace(&self) -> Option<&str> {
        self.credential_namespace.as_deref().or(self.pod_namespace.as_deref()).filter(|s| !s.is_empty())
    }

    /// Pod identity, when both halves are set.
    pub fn pod(&self) -> Option<(&str, &str)> {
        match (self.pod_namespace.as_deref(), self.pod_name.as_deref()) {
            (Some(ns), Some(name)) if !ns.is_empty() && !name.is_empty() => Some((ns, name)),
            _ => None,
        }
    }

    pub fn startup_delay(&self) -> Duration {
        Duration::from_secs(self.startup_delay)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval)
    }

    pub fn controller_settings(&self) -> anyhow::Result<ControllerSettings> {
        Ok(ControllerSettings {
            lease: self.lease_key(),
            lease_duration: Duration::from_secs(self.lease_duration),
            jitter: self.renew_jitter,
            policy: self.rotation_policy()?,
            probe_credentials: self.credential_probe,
        })
    }
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
