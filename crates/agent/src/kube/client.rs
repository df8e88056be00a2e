// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! HTTP client for one Kubernetes API server.

use std::time::Duration;

use reqwest::{Client, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::ApiError;
use crate::kube::config::{Auth, RestConfig};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// JSON REST client bound to one API server and one identity.
#[derive(Clone)]
pub struct KubeClient {
    base_url: String,
    auth: Auth,
    client: Client,
}

/// The `Status` object the API server returns on failures.
#[derive(Debug, Default, Deserialize)]
struct StatusBody {
    #[serde(default)]
    reason: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

impl KubeClient {
    pub fn new(config: &RestConfig) -> anyhow::Result<Self> {
        super::ensure_crypto();

        let mut builder = Client::builder().timeout(REQUEST_TIMEOUT);
        if let Some(ref ca) = config.ca_pem {
            for cert in reqwest::Certificate::from_pem_bundle(ca)
                .map_err(|e| anyhow::anyhow!("invalid certificate authority: {e}"))?
            {
                builder = builder.add_root_certificate(cert);
            }
        }
        if let Some(ref pem) = config.identity_pem {
            let identity = reqwest::Identity::from_pem(pem)
                .map_err(|e| anyhow::anyhow!("invalid client certificate: {e}"))?;
            builder = builder.identity(identity);
        }
        if config.insecure_skip_tls_verify {
            builder = builder.danger_accept_invalid_certs(true);
        }
        let client = builder.build().map_err(|e| anyhow::anyhow!("building http client: {e}"))?;

        Ok(Self { base_url: config.server.clone(), auth: config.auth.clone(), client })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn apply_auth(&self, req: RequestBuilder) -> RequestBuilder {
        match &self.auth {
            Auth::None => req,
            Auth::Bearer(token) => req.bearer_auth(token),
            Auth::Basic { username, password } => req.basic_auth(username, Some(password)),
        }
    }

    async fn send(&self, req: RequestBuilder) -> Result<Response, ApiError> {
        let resp = self.apply_auth(req).header("Accept", "application/json").send().await?;
        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }
        let code = status.as_u16();
        let bytes = resp.bytes().await.unwrap_or_default();
        let body: StatusBody = serde_json::from_slice(&bytes).unwrap_or_default();
        let message = body
            .message
            .unwrap_or_else(|| String::from_utf8_lossy(&bytes).trim().to_owned());
        Err(ApiError::from_status(code, body.reason.as_deref(), message))
    }

    pub async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T, ApiError> {
        let resp = self.send(self.client.get(self.url(path))).await?;
        Ok(resp.json().await?)
    }

    pub async fn post<B, T>(&self, path: &str, body: &B) -> Result<T, ApiError>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let resp = self.send(self.client.post(self.url(path)).json(body)).await?;
        Ok(resp.json().await?)
    }

    pub async fn put<B, T>(&self, path: &str, body: &B) -> Result<T, ApiError>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let resp = self.send(self.client.put(self.url(path)).json(body)).await?;
        Ok(resp.json().await?)
    }

    pub async fn delete(&self, path: &str) -> Result<(), ApiError> {
        self.send(self.client.delete(self.url(path))).await?;
        Ok(())
    }
}
