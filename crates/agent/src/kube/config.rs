// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Connection settings for a Kubernetes API server.
//!
//! Two entry points:
//! - [`Kubeconfig::from_yaml`] + [`Kubeconfig::rest_config`] for the hub
//!   credential, where file references resolve against sibling keys of the
//!   credential record before falling back to the local filesystem.
//! - [`RestConfig::infer`] for the local cluster: in-cluster service account
//!   first, then `$KUBECONFIG`, then `~/.kube/config`.

use std::path::{Path, PathBuf};

use base64::Engine;
use serde::Deserialize;

const SERVICE_ACCOUNT_DIR: &str = "/var/run/secrets/kubernetes.io/serviceaccount";

/// Resolved settings for one API server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RestConfig {
    /// Base URL without a trailing slash.
    pub server: String,
    /// PEM bundle of extra trusted roots.
    pub ca_pem: Option<Vec<u8>>,
    pub insecure_skip_tls_verify: bool,
    pub auth: Auth,
    /// PEM client certificate followed by its private key.
    pub identity_pem: Option<Vec<u8>>,
    /// Namespace named by the selected context, if any.
    pub namespace: Option<String>,
}

/// Request authentication applied on every call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum Auth {
    #[default]
    None,
    Bearer(String),
    Basic { username: String, password: String },
}

/// Subset of the kubeconfig file format this agent understands.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct Kubeconfig {
    #[serde(default)]
    pub clusters: Vec<NamedCluster>,
    #[serde(default)]
    pub users: Vec<NamedUser>,
    #[serde(default)]
    pub contexts: Vec<NamedContext>,
    #[serde(default)]
    pub current_context: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NamedCluster {
    pub name: String,
    pub cluster: Cluster,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct Cluster {
    pub server: String,
    #[serde(default)]
    pub certificate_authority: Option<String>,
    #[serde(default)]
    pub certificate_authority_data: Option<String>,
    #[serde(default)]
    pub insecure_skip_tls_verify: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NamedUser {
    pub name: String,
    #[serde(default)]
    pub user: AuthInfo,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct AuthInfo {
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default)]
    pub token_file: Option<String>,
    #[serde(default)]
    pub client_certificate: Option<String>,
    #[serde(default)]
    pub client_certificate_data: Option<String>,
    #[serde(default)]
    pub client_key: Option<String>,
    #[serde(default)]
    pub client_key_data: Option<String>,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NamedContext {
    pub name: String,
    pub context: Context,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Context {
    pub cluster: String,
    #[serde(default)]
    pub user: Option<String>,
    #[serde(default)]
    pub namespace: Option<String>,
}

impl Kubeconfig {
    pub fn from_yaml(bytes: &[u8]) -> anyhow::Result<Self> {
        let config: Kubeconfig = serde_yaml::from_slice(bytes)
            .map_err(|e| anyhow::anyhow!("invalid kubeconfig: {e}"))?;
        Ok(config)
    }

    /// Resolve the current context into connection settings.
    ///
    /// `read_file` loads any path referenced by the kubeconfig
    /// (`certificate-authority`, `client-certificate`, `client-key`,
    /// `token-file`).
    pub fn rest_config<F>(&self, read_file: F) -> anyhow::Result<RestConfig>
    where
        F: Fn(&str) -> anyhow::Result<Vec<u8>>,
    {
        let context = self.select_context()?;
        let cluster = self
            .clusters
            .iter()
            .find(|c| c.name == context.cluster)
            .map(|c| &c.cluster)
            .ok_or_else(|| anyhow::anyhow!("kubeconfig: cluster {:?} not found", context.cluster))?;
        if cluster.server.is_empty() {
            anyhow::bail!("kubeconfig: cluster {:?} has no server", context.cluster);
        }

        let user = match context.user.as_deref() {
            Some(name) => self
                .users
                .iter()
                .find(|u| u.name == name)
                .map(|u| u.user.clone())
                .ok_or_else(|| anyhow::anyhow!("kubeconfig: user {name:?} not found"))?,
            None => AuthInfo::default(),
        };

        let ca_pem = inline_or_file(
            cluster.certificate_authority_data.as_deref(),
            cluster.certificate_authority.as_deref(),
            &read_file,
        )?;

        let cert = inline_or_file(
            user.client_certificate_data.as_deref(),
            user.client_certificate.as_deref(),
            &read_file,
        )?;
        let key =
            inline_or_file(user.client_key_data.as_deref(), user.client_key.as_deref(), &read_file)?;
        let identity_pem = match (cert, key) {
            (Some(mut cert), Some(key)) => {
                if !cert.ends_with(b"\n") {
                    cert.push(b'\n');
                }
                cert.extend_from_slice(&key);
                Some(cert)
            }
            (None, None) => None,
            _ => anyhow::bail!("kubeconfig: client certificate and key must be set together"),
        };

        let auth = if let Some(ref token) = user.token {
            Auth::Bearer(token.trim().to_owned())
        } else if let Some(ref path) = user.token_file {
            let raw = read_file(path)?;
            Auth::Bearer(String::from_utf8_lossy(&raw).trim().to_owned())
        } else if let (Some(username), Some(password)) = (&user.username, &user.password) {
            Auth::Basic { username: username.clone(), password: password.clone() }
        } else {
            Auth::None
        };

        Ok(RestConfig {
            server: cluster.server.trim_end_matches('/').to_owned(),
            ca_pem,
            insecure_skip_tls_verify: cluster.insecure_skip_tls_verify,
            auth,
            identity_pem,
            namespace: context.namespace.clone(),
        })
    }

    fn select_context(&self) -> anyhow::Result<&Context> {
        match self.current_context.as_deref() {
            Some(name) if !name.is_empty() => self
                .contexts
                .iter()
                .find(|c| c.name == name)
                .map(|c| &c.context)
                .ok_or_else(|| anyhow::anyhow!("kubeconfig: context {name:?} not found")),
            // No current-context: accept a file with exactly one context.
            _ => match self.contexts.as_slice() {
                [only] => Ok(&only.context),
                _ => anyhow::bail!("kubeconfig: no current-context set"),
            },
        }
    }
}

fn inline_or_file<F>(
    data: Option<&str>,
    path: Option<&str>,
    read_file: &F,
) -> anyhow::Result<Option<Vec<u8>>>
where
    F: Fn(&str) -> anyhow::Result<Vec<u8>>,
{
    if let Some(data) = data {
        let decoded = base64::engine::general_purpose::STANDARD
            .decode(data.trim())
            .map_err(|e| anyhow::anyhow!("kubeconfig: invalid base64 data: {e}"))?;
        return Ok(Some(decoded));
    }
    match path {
        Some(path) if !path.is_empty() => Ok(Some(read_file(path)?)),
        _ => Ok(None),
    }
}

/// Read a referenced file from the local filesystem.
pub fn read_local_file(path: &str) -> anyhow::Result<Vec<u8>> {
    std::fs::read(path).map_err(|e| anyhow::anyhow!("reading {path}: {e}"))
}

impl RestConfig {
    /// Settings for the cluster this process runs in.
    pub fn infer() -> anyhow::Result<Self> {
        if let Some(config) = Self::in_cluster()? {
            return Ok(config);
        }
        let path = kubeconfig_path()
            .ok_or_else(|| anyhow::anyhow!("no in-cluster config and no kubeconfig found"))?;
        Self::from_kubeconfig_file(&path)
    }

    /// Service-account settings, or `None` when not running in a pod.
    pub fn in_cluster() -> anyhow::Result<Option<Self>> {
        let (Ok(host), Ok(port)) =
            (std::env::var("KUBERNETES_SERVICE_HOST"), std::env::var("KUBERNETES_SERVICE_PORT"))
        else {
            return Ok(None);
        };
        let dir = Path::new(SERVICE_ACCOUNT_DIR);
        let token = std::fs::read_to_string(dir.join("token"))
            .map_err(|e| anyhow::anyhow!("reading service account token: {e}"))?;
        let ca_pem = std::fs::read(dir.join("ca.crt")).ok();
        let namespace = std::fs::read_to_string(dir.join("namespace"))
            .ok()
            .map(|s| s.trim().to_owned());

        // IPv6 service hosts must be bracketed.
        let host = if host.contains(':') { format!("[{host}]") } else { host };
        Ok(Some(Self {
            server: format!("https://{host}:{port}"),
            ca_pem,
            insecure_skip_tls_verify: false,
            auth: Auth::Bearer(token.trim().to_owned()),
            identity_pem: None,
            namespace,
        }))
    }

    pub fn from_kubeconfig_file(path: &Path) -> anyhow::Result<Self> {
        let bytes = std::fs::read(path)
            .map_err(|e| anyhow::anyhow!("reading kubeconfig {}: {e}", path.display()))?;
        let base = path.parent().map(Path::to_path_buf).unwrap_or_default();
        Kubeconfig::from_yaml(&bytes)?.rest_config(|p| {
            let p = Path::new(p);
            if p.is_absolute() {
                read_local_file(&p.to_string_lossy())
            } else {
                read_local_file(&base.join(p).to_string_lossy())
            }
        })
    }
}

fn kubeconfig_path() -> Option<PathBuf> {
    if let Ok(paths) = std::env::var("KUBECONFIG") {
        // Only the first entry of a merged list is used.
        if let Some(first) = std::env::split_paths(&paths).next() {
            if !first.as_os_str().is_empty() {
                return Some(first);
            }
        }
    }
    let home = std::env::var_os("HOME")?;
    let path = PathBuf::from(home).join(".kube").join("config");
    path.exists().then_some(path)
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
