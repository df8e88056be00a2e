// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Test harness for end-to-end binary smoke tests.
//!
//! Spawns the real `addon-lease` binary as a subprocess against a mounted
//! kubeconfig directory and an in-process fake hub API server.

use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::time::Duration;

pub use addon_lease::kube::ensure_crypto;

/// Resolve the path to the compiled `addon-lease` binary.
pub fn agent_binary() -> PathBuf {
    let manifest = Path::new(env!("CARGO_MANIFEST_DIR"));
    // tests/specs → tests → workspace root
    let workspace = manifest.parent().and_then(|p| p.parent()).unwrap_or(manifest);
    workspace.join("target").join("debug").join("addon-lease")
}

/// Find a free TCP port by binding to :0 then releasing.
pub fn free_port() -> anyhow::Result<u16> {
    let listener = std::net::TcpListener::bind("127.0.0.1:0")?;
    Ok(listener.local_addr()?.port())
}

/// Run the binary to completion with `args` and return its exit status.
pub fn run_to_exit(args: &[&str]) -> anyhow::Result<ExitStatus> {
    let binary = agent_binary();
    anyhow::ensure!(binary.exists(), "addon-lease binary not found at {}", binary.display());
    Ok(Command::new(&binary)
        .args(args)
        .env_clear()
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()?)
}

/// A running `addon-lease` process that is killed on drop.
pub struct AgentProcess {
    child: Child,
    health_port: u16,
}

/// Builder for an agent reading its hub kubeconfig from `dir`.
pub struct AgentBuilder {
    dir: PathBuf,
    lease_name: String,
    lease_namespace: String,
    lease_duration: u64,
    extra: Vec<String>,
}

impl AgentBuilder {
    pub fn new(dir: &Path) -> Self {
        Self {
            dir: dir.to_path_buf(),
            lease_name: "addon-lease".to_owned(),
            lease_namespace: "cluster1".to_owned(),
            lease_duration: 1,
            extra: Vec::new(),
        }
    }

    pub fn lease_duration(mut self, secs: u64) -> Self {
        self.lease_duration = secs;
        self
    }

    pub fn arg(mut self, arg: &str) -> Self {
        self.extra.push(arg.to_owned());
        self
    }

    pub fn spawn(self) -> anyhow::Result<AgentProcess> {
        let binary = agent_binary();
        anyhow::ensure!(binary.exists(), "addon-lease binary not found at {}", binary.display());
        let health_port = free_port()?;

        let mut args: Vec<String> = vec![
            "--lease-name".into(),
            self.lease_name,
            "--lease-namespace".into(),
            self.lease_namespace,
            "--hub-kubeconfig-dir".into(),
            self.dir.to_string_lossy().into_owned(),
            "--lease-duration".into(),
            self.lease_duration.to_string(),
            "--renew-jitter".into(),
            "0".into(),
            "--startup-delay".into(),
            "0".into(),
            "--poll-interval".into(),
            "1".into(),
            "--host".into(),
            "127.0.0.1".into(),
            "--health-port".into(),
            health_port.to_string(),
            "--log-format".into(),
            "text".into(),
            "--log-level".into(),
            "warn".into(),
        ];
        args.extend(self.extra);

        // No pod identity and no in-cluster config: file source only.
        let child = Command::new(&binary)
            .args(&args)
            .env_clear()
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()?;

        Ok(AgentProcess { child, health_port })
    }
}

impl AgentProcess {
    pub fn pid(&self) -> u32 {
        self.child.id()
    }

    pub fn health_url(&self) -> String {
        format!("http://127.0.0.1:{}/api/v1/health", self.health_port)
    }

    /// Fetch the health document.
    pub async fn health(&self) -> anyhow::Result<serde_json::Value> {
        ensure_crypto();
        Ok(reqwest::get(self.health_url()).await?.json().await?)
    }

    /// Poll health until `pred` holds for the document.
    pub async fn wait_health<F>(&self, timeout: Duration, pred: F) -> anyhow::Result<serde_json::Value>
    where
        F: Fn(&serde_json::Value) -> bool,
    {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if tokio::time::Instant::now() > deadline {
                anyhow::bail!("health condition not met within {timeout:?}");
            }
            if let Ok(doc) = self.health().await {
                if pred(&doc) {
                    return Ok(doc);
                }
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    }

    /// Send SIGTERM.
    pub fn terminate(&self) -> anyhow::Result<()> {
        nix::sys::signal::kill(
            nix::unistd::Pid::from_raw(self.pid() as i32),
            nix::sys::signal::Signal::SIGTERM,
        )?;
        Ok(())
    }

    /// Wait for the process to exit within `timeout`.
    pub async fn wait_exit(&mut self, timeout: Duration) -> anyhow::Result<ExitStatus> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if tokio::time::Instant::now() > deadline {
                anyhow::bail!("addon-lease did not exit within {timeout:?}");
            }
            if let Some(status) = self.child.try_wait()? {
                return Ok(status);
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    }
}

impl Drop for AgentProcess {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}
