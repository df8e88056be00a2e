// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::fmt;

/// Classified failure from a Kubernetes API call.
///
/// The lease engine only cares about a handful of outcomes: the object is
/// missing, the caller is not allowed in, or the remote is unreachable. Every
/// response is folded into one of these variants at the client boundary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApiError {
    /// The addressed object does not exist (404).
    NotFound,
    /// A create raced with another creator (409, reason `AlreadyExists`).
    AlreadyExists,
    /// Optimistic concurrency failure (409, any other reason).
    Conflict(String),
    /// Authentication or authorization rejected the request (401/403).
    Unauthorized { code: u16, message: String },
    /// Any other non-success status.
    Status { code: u16, message: String },
    /// Connection, DNS, TLS or timeout failure before a response arrived.
    Transport(String),
    /// The response body could not be decoded.
    Decode(String),
}

impl ApiError {
    /// Errors worth retrying on the next tick without any other action.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Transport(_) | Self::Conflict(_) => true,
            Self::Status { code, .. } => *code == 429 || *code >= 500,
            _ => false,
        }
    }

    /// Map an HTTP status and the decoded `Status.reason` into a variant.
    pub fn from_status(code: u16, reason: Option<&str>, message: String) -> Self {
        match code {
            404 => Self::NotFound,
            409 if reason == Some("AlreadyExists") => Self::AlreadyExists,
            409 => Self::Conflict(message),
            401 | 403 => Self::Unauthorized { code, message },
            _ => Self::Status { code, message },
        }
    }
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotFound => f.write_str("not found"),
            Self::AlreadyExists => f.write_str("already exists"),
            Self::Conflict(msg) => write!(f, "conflict: {msg}"),
            Self::Unauthorized { code, message } => write!(f, "unauthorized ({code}): {message}"),
            Self::Status { code, message } => write!(f, "status {code}: {message}"),
            Self::Transport(msg) => write!(f, "transport: {msg}"),
            Self::Decode(msg) => write!(f, "decode: {msg}"),
        }
    }
}

impl std::error::Error for ApiError {}

impl From<reqwest::Error> for ApiError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            return Self::Decode(e.to_string());
        }
        // reqwest hides the TLS/IO cause behind `source()`; keep the whole chain
        // so certificate failures stay visible in logs.
        let mut msg = e.to_string();
        let mut source = std::error::Error::source(&e);
        while let Some(inner) = source {
            msg.push_str(": ");
            msg.push_str(&inner.to_string());
            source = inner.source();
        }
        Self::Transport(msg)
    }
}

#[cfg(test)]
#[path = "error_tests.rs"]
mod tests;
