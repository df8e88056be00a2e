// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::sync::Arc;

use clap::Parser;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use addon_lease::config::Config;
use addon_lease::controller::LeaseController;
use addon_lease::credential::file::FileSource;
use addon_lease::credential::secret::SecretSource;
use addon_lease::credential::{self, CredentialSource};
use addon_lease::health::{self, HealthState};
use addon_lease::host::{HostMonitor, PodMonitor};
use addon_lease::hub::KubeconfigBuilder;
use addon_lease::kube::{KubeClient, RestConfig};

/// Capacity of the credential notification queue.
const EVENT_QUEUE: usize = 16;

#[tokio::main]
async fn main() {
    let config = Config::parse();

    if let Err(e) = config.validate() {
        eprintln!("error: {e}");
        std::process::exit(2);
    }

    init_tracing(&config);

    if let Err(e) = run(config).await {
        error!("fatal: {e:#}");
        std::process::exit(1);
    }
}

fn init_tracing(config: &Config) {
    use tracing_subscriber::fmt;
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_new(&config.log_level).unwrap_or_else(|_| EnvFilter::new("info"));

    match config.log_format.as_str() {
        "json" => {
            fmt::fmt().with_env_filter(filter).json().init();
        }
        _ => {
            fmt::fmt().with_env_filter(filter).init();
        }
    }
}

async fn run(config: Config) -> anyhow::Result<()> {
    let shutdown = CancellationToken::new();
    spawn_signal_handler(shutdown.clone());

    let settings = config.controller_settings()?;
    info!(lease = %settings.lease, version = env!("CARGO_PKG_VERSION"), "starting addon lease agent");

    // The local cluster is only needed for the Secret API and the pod monitor.
    let local = if config.hub_kubeconfig_dir.is_none() || config.pod().is_some() {
        let rest = RestConfig::infer()?;
        let client = KubeClient::new(&rest)?;
        info!(server = client.base_url(), "local cluster config loaded");
        Some((rest.namespace, client))
    } else {
        None
    };

    let source: Arc<dyn CredentialSource> = match (&config.hub_kubeconfig_dir, &local) {
        (Some(dir), _) => Arc::new(FileSource::new(
            dir.clone(),
            config.hub_kubeconfig_secret.clone(),
            config.credential_namespace().unwrap_or_default(),
        )),
        (None, Some((default_ns, client))) => {
            let namespace = config
                .credential_namespace()
                .map(str::to_owned)
                .or_else(|| default_ns.clone())
                .ok_or_else(|| {
                    anyhow::anyhow!("cannot determine credential namespace; set --credential-namespace")
                })?;
            Arc::new(SecretSource::new(client.clone(), namespace, config.hub_kubeconfig_secret.clone()))
        }
        (None, None) => anyhow::bail!("no local cluster client for the credential Secret"),
    };
    info!(source = %source.describe(), "watching hub credential");

    let builder = Arc::new(KubeconfigBuilder::new(config.kubeconfig_key.clone()));
    let mut controller = LeaseController::new(settings.clone(), Arc::clone(&source), builder);
    if let (Some((namespace, name)), Some((_, client))) = (config.pod(), &local) {
        let host: Arc<dyn HostMonitor> = Arc::new(PodMonitor::new(client.clone(), namespace, name));
        info!(pod = %host.describe(), "gating renewal on pod readiness");
        controller = controller.with_host(host);
    }

    if let Some(port) = config.health_port {
        let addr = format!("{}:{}", config.host, port);
        let state = Arc::new(HealthState { lease: settings.lease.clone(), renew: controller.renew_state() });
        health::serve(&addr, state, shutdown.clone()).await?;
    }

    let delay = config.startup_delay();
    if !delay.is_zero() {
        info!("waiting {}s before starting", delay.as_secs());
        tokio::select! {
            _ = shutdown.cancelled() => return Ok(()),
            _ = tokio::time::sleep(delay) => {}
        }
    }

    let (event_tx, event_rx) = mpsc::channel(EVENT_QUEUE);
    tokio::spawn(credential::watch(source, config.poll_interval(), event_tx, shutdown.clone()));

    info!("starting controller");
    controller.run(event_rx, shutdown).await;
    info!("shut down");
    Ok(())
}

fn spawn_signal_handler(shutdown: CancellationToken) {
    tokio::spawn(async move {
        let mut sigterm =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()).ok();
        let mut sigint =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::interrupt()).ok();

        tokio::select! {
            _ = async {
                if let Some(ref mut s) = sigterm { s.recv().await } else { std::future::pending().await }
            } => {
                info!("received SIGTERM");
                shutdown.cancel();
            }
            _ = async {
                if let Some(ref mut s) = sigint { s.recv().await } else { std::future::pending().await }
            } => {
                info!("received SIGINT");
                shutdown.cancel();
            }
        }
    });
}
