// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! In-process stand-in for a Kubernetes API server.
//!
//! Objects are stored by request path. GET/PUT/DELETE address an object,
//! POST to a collection creates `{collection}/{metadata.name}`. Errors come
//! back as `Status` bodies with the reasons a real server uses.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, Method, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::{Json, Router};
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

#[derive(Default)]
struct FakeState {
    objects: Mutex<HashMap<String, Value>>,
    version: AtomicU64,
    token: Mutex<Option<String>>,
    requests: Mutex<Vec<String>>,
}

/// A running fake API server; stops when dropped.
pub struct FakeApi {
    state: Arc<FakeState>,
    addr: SocketAddr,
    shutdown: CancellationToken,
}

impl FakeApi {
    pub async fn start() -> anyhow::Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let state = Arc::new(FakeState::default());
        let shutdown = CancellationToken::new();

        let router = Router::new().fallback(handle).with_state(Arc::clone(&state));
        let sd = shutdown.clone();
        tokio::spawn(async move {
            let _ = axum::serve(listener, router).with_graceful_shutdown(sd.cancelled_owned()).await;
        });
        Ok(Self { state, addr, shutdown })
    }

    pub fn url(&self) -> String {
        format!("http://{}", self.addr)
    }

    /// Reject requests without `Authorization: Bearer {token}`.
    pub fn require_token(&self, token: &str) {
        *lock(&self.state.token) = Some(token.to_owned());
    }

    pub fn put_object(&self, path: &str, value: Value) {
        lock(&self.state.objects).insert(path.to_owned(), value);
    }

    pub fn object(&self, path: &str) -> Option<Value> {
        lock(&self.state.objects).get(path).cloned()
    }

    pub fn remove_object(&self, path: &str) {
        lock(&self.state.objects).remove(path);
    }

    /// `"METHOD /path"` for every request received so far.
    pub fn requests(&self) -> Vec<String> {
        lock(&self.state.requests).clone()
    }

    /// A kubeconfig pointing at this server with a bearer token.
    pub fn kubeconfig(&self, token: &str) -> String {
        format!(
            "apiVersion: v1\nkind: Config\nclusters:\n- name: fake\n  cluster:\n    server: {}\ncontexts:\n- name: fake\n  context:\n    cluster: fake\n    user: fake\ncurrent-context: fake\nusers:\n- name: fake\n  user:\n    token: {token}\n",
            self.url()
        )
    }
}

impl Drop for FakeApi {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

fn lock<T>(m: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}

fn status(code: StatusCode, reason: &str, message: impl Into<String>) -> Response {
    let body = json!({
        "kind": "Status",
        "apiVersion": "v1",
        "status": "Failure",
        "message": message.into(),
        "reason": reason,
        "code": code.as_u16(),
    });
    (code, Json(body)).into_response()
}

fn stamp(state: &FakeState, object: &mut Value) {
    let v = state.version.fetch_add(1, Ordering::SeqCst) + 1;
    if let Some(meta) = object.get_mut("metadata").and_then(Value::as_object_mut) {
        meta.insert("resourceVersion".to_owned(), json!(v.to_string()));
    }
}

async fn handle(
    State(state): State<Arc<FakeState>>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let path = uri.path().trim_end_matches('/').to_owned();
    lock(&state.requests).push(format!("{method} {path}"));

    if let Some(ref token) = *lock(&state.token) {
        let expected = format!("Bearer {token}");
        let given = headers.get("authorization").and_then(|v| v.to_str().ok());
        if given != Some(expected.as_str()) {
            return status(StatusCode::UNAUTHORIZED, "Unauthorized", "Unauthorized");
        }
    }

    let parsed = || -> Result<Value, Response> {
        serde_json::from_slice(&body)
            .map_err(|e| status(StatusCode::BAD_REQUEST, "BadRequest", e.to_string()))
    };

    let mut objects = lock(&state.objects);
    match method {
        Method::GET => match objects.get(&path) {
            Some(object) => Json(object.clone()).into_response(),
            None => status(StatusCode::NOT_FOUND, "NotFound", format!("{path} not found")),
        },
        Method::POST => {
            let mut object = match parsed() {
                Ok(object) => object,
                Err(resp) => return resp,
            };
            let Some(name) = object.pointer("/metadata/name").and_then(Value::as_str) else {
                return status(StatusCode::UNPROCESSABLE_ENTITY, "Invalid", "metadata.name required");
            };
            let target = format!("{path}/{name}");
            if objects.contains_key(&target) {
                return status(StatusCode::CONFLICT, "AlreadyExists", format!("{name} already exists"));
            }
            stamp(&state, &mut object);
            objects.insert(target, object.clone());
            (StatusCode::CREATED, Json(object)).into_response()
        }
        Method::PUT => {
            let mut object = match parsed() {
                Ok(object) => object,
                Err(resp) => return resp,
            };
            let Some(current) = objects.get(&path) else {
                return status(StatusCode::NOT_FOUND, "NotFound", format!("{path} not found"));
            };
            let sent = object.pointer("/metadata/resourceVersion").and_then(Value::as_str);
            let stored = current.pointer("/metadata/resourceVersion").and_then(Value::as_str);
            if sent.is_none() {
                return status(
                    StatusCode::UNPROCESSABLE_ENTITY,
                    "Invalid",
                    "metadata.resourceVersion: must be specified for an update",
                );
            }
            if sent != stored {
                return status(StatusCode::CONFLICT, "Conflict", "the object has been modified");
            }
            stamp(&state, &mut object);
            objects.insert(path, object.clone());
            Json(object).into_response()
        }
        Method::DELETE => match objects.remove(&path) {
            Some(object) => Json(object).into_response(),
            None => status(StatusCode::NOT_FOUND, "NotFound", format!("{path} not found")),
        },
        _ => status(StatusCode::METHOD_NOT_ALLOWED, "MethodNotAllowed", method.to_string()),
    }
}
