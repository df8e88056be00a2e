// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! End-to-end smoke tests that spawn the real `addon-lease` binary against a
//! fake hub and a mounted kubeconfig directory.

use std::time::Duration;

use addon_lease::test_support::fake_api::FakeApi;
use addon_lease_specs::{run_to_exit, AgentBuilder};

const TIMEOUT: Duration = Duration::from_secs(10);
const LEASE_PATH: &str = "/apis/coordination.k8s.io/v1/namespaces/cluster1/leases/addon-lease";

fn renew_time(api: &FakeApi) -> Option<String> {
    api.object(LEASE_PATH)
        .and_then(|l| l["spec"]["renewTime"].as_str().map(str::to_owned))
}

async fn hub_with_kubeconfig() -> anyhow::Result<(FakeApi, tempfile::TempDir)> {
    let api = FakeApi::start().await?;
    api.require_token("hub-token");
    let dir = tempfile::tempdir()?;
    std::fs::write(dir.path().join("kubeconfig"), api.kubeconfig("hub-token"))?;
    Ok((api, dir))
}

// -- Startup validation -------------------------------------------------------

#[test]
fn missing_lease_name_exits_2() -> anyhow::Result<()> {
    let status = run_to_exit(&["--lease-namespace", "cluster1"])?;
    assert_eq!(status.code(), Some(2));
    Ok(())
}

#[test]
fn invalid_rotation_policy_exits_2() -> anyhow::Result<()> {
    let status = run_to_exit(&[
        "--lease-name",
        "addon-lease",
        "--lease-namespace",
        "cluster1",
        "--rotation-policy",
        "never",
    ])?;
    assert_eq!(status.code(), Some(2));
    Ok(())
}

// -- Renewal ------------------------------------------------------------------

#[tokio::test]
async fn renews_lease_with_mounted_kubeconfig() -> anyhow::Result<()> {
    let (api, dir) = hub_with_kubeconfig().await?;
    let agent = AgentBuilder::new(dir.path()).spawn()?;

    let doc = agent
        .wait_health(TIMEOUT, |d| d["renewing"] == true && d["last_renew"].is_string())
        .await?;
    assert_eq!(doc["status"], "ok");
    assert_eq!(doc["lease"], "cluster1/addon-lease");

    let lease = api.object(LEASE_PATH).ok_or_else(|| anyhow::anyhow!("lease not created"))?;
    assert_eq!(lease["spec"]["leaseDurationSeconds"], 1);

    let first = renew_time(&api);
    tokio::time::sleep(Duration::from_millis(1500)).await;
    assert_ne!(renew_time(&api), first);
    Ok(())
}

#[tokio::test]
async fn removed_credential_stops_renewal() -> anyhow::Result<()> {
    let (api, dir) = hub_with_kubeconfig().await?;
    let agent = AgentBuilder::new(dir.path()).spawn()?;
    agent.wait_health(TIMEOUT, |d| d["renewing"] == true).await?;

    std::fs::remove_file(dir.path().join("kubeconfig"))?;
    agent.wait_health(TIMEOUT, |d| d["renewing"] == false).await?;

    let frozen = renew_time(&api);
    tokio::time::sleep(Duration::from_secs(3)).await;
    assert_eq!(renew_time(&api), frozen);
    Ok(())
}

#[tokio::test]
async fn rejected_credential_is_not_used() -> anyhow::Result<()> {
    let (api, dir) = hub_with_kubeconfig().await?;
    std::fs::write(dir.path().join("kubeconfig"), api.kubeconfig("stale-token"))?;
    let agent = AgentBuilder::new(dir.path()).spawn()?;

    tokio::time::sleep(Duration::from_secs(2)).await;
    let doc = agent.health().await?;
    assert_eq!(doc["renewing"], false);
    assert_eq!(api.object(LEASE_PATH), None);
    Ok(())
}

#[tokio::test]
async fn sigterm_exits_cleanly() -> anyhow::Result<()> {
    let (api, dir) = hub_with_kubeconfig().await?;
    let mut agent = AgentBuilder::new(dir.path()).spawn()?;
    agent.wait_health(TIMEOUT, |d| d["renewing"] == true).await?;

    agent.terminate()?;
    let status = agent.wait_exit(TIMEOUT).await?;
    assert!(status.success(), "exit status: {status}");

    let frozen = renew_time(&api);
    tokio::time::sleep(Duration::from_millis(1500)).await;
    assert_eq!(renew_time(&api), frozen);
    Ok(())
}
