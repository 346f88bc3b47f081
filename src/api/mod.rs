//! Inference API boundary.
//!
//! The pipeline only talks to [`InferenceClient`]; request building and
//! authentication live in the implementations.

#[cfg(feature = "http")]
pub mod http;
pub mod mock;

pub use mock::{ScriptedClient, ScriptedResponse};

use crate::pipeline::types::{ChunkOutput, Payload};
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Classified failure returned by an inference API call.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ApiError {
    #[error("rate limited{}", fmt_hint(.retry_after))]
    RateLimited { retry_after: Option<Duration> },

    #[error("quota exceeded{}", fmt_hint(.retry_after))]
    QuotaExceeded { retry_after: Option<Duration> },

    #[error("invalid API credential")]
    InvalidCredential,

    #[error("invalid request: {message}")]
    InvalidRequest { message: String },

    #[error("server error {code}: {message}")]
    ServerError { code: u16, message: String },

    #[error("network error: {detail}")]
    NetworkError { detail: String, transient: bool },
}

fn fmt_hint(retry_after: &Option<Duration>) -> String {
    match retry_after {
        Some(d) => format!(" (retry after {})", humantime::format_duration(*d)),
        None => String::new(),
    }
}

impl ApiError {
    /// Whether another attempt could succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            ApiError::RateLimited { .. } | ApiError::QuotaExceeded { .. } => true,
            ApiError::InvalidCredential | ApiError::InvalidRequest { .. } => false,
            ApiError::ServerError { code, .. } => is_transient_status(*code),
            ApiError::NetworkError { transient, .. } => *transient,
        }
    }

    /// Whether this failure should pause every worker, not just the caller.
    pub fn is_rate_limit(&self) -> bool {
        matches!(
            self,
            ApiError::RateLimited { .. } | ApiError::QuotaExceeded { .. }
        )
    }

    /// Server-provided delay before the next attempt.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            ApiError::RateLimited { retry_after } | ApiError::QuotaExceeded { retry_after } => {
                *retry_after
            }
            _ => None,
        }
    }
}

/// HTTP status codes worth retrying.
pub fn is_transient_status(code: u16) -> bool {
    matches!(code, 408 | 409 | 425) || (code >= 500 && code != 501)
}

/// Model identifier passed to the API.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelSelector(String);

impl ModelSelector {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ModelSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// API secret. The value never appears in `Debug` output or logs.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential(String);

impl Credential {
    pub fn new(secret: impl Into<String>) -> Self {
        Self(secret.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }

    /// Read the credential from an environment variable.
    pub fn from_env(var: &str) -> Option<Self> {
        std::env::var(var)
            .ok()
            .filter(|v| !v.trim().is_empty())
            .map(|v| Self(v.trim().to_string()))
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Credential(***)")
    }
}

/// Remote inference service that turns one chunk payload into output.
///
/// Each call is expected to enforce its own deadline.
#[async_trait::async_trait]
pub trait InferenceClient: Send + Sync {
    async fn invoke(
        &self,
        payload: &Payload,
        model: &ModelSelector,
        credential: &Credential,
    ) -> Result<ChunkOutput, ApiError>;
}
