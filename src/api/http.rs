//! HTTP inference client.
//!
//! Posts the raw chunk payload to a single endpoint and maps the response
//! status onto [`ApiError`]. Endpoint-specific request shapes are left to
//! other [`InferenceClient`] implementations.

use crate::api::{ApiError, Credential, InferenceClient, ModelSelector, is_transient_status};
use crate::error::{LongformError, Result};
use crate::pipeline::types::{ChunkOutput, OutputKind, Payload};
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE, HeaderMap};
use std::time::Duration;
use tracing::debug;

/// Longest error body excerpt kept in error messages.
const MAX_ERROR_BODY: usize = 300;

/// Client for a single inference endpoint.
pub struct HttpClient {
    client: reqwest::Client,
    endpoint: reqwest::Url,
    output: OutputKind,
    timeout: Duration,
}

impl HttpClient {
    pub fn new(endpoint: &str, output: OutputKind, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("longform/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| LongformError::HttpClient {
                message: e.to_string(),
            })?;
        let endpoint = reqwest::Url::parse(endpoint).map_err(|e| LongformError::HttpClient {
            message: format!("invalid endpoint {endpoint}: {e}"),
        })?;

        Ok(Self {
            client,
            endpoint,
            output,
            timeout,
        })
    }
}

#[async_trait::async_trait]
impl InferenceClient for HttpClient {
    async fn invoke(
        &self,
        payload: &Payload,
        model: &ModelSelector,
        credential: &Credential,
    ) -> std::result::Result<ChunkOutput, ApiError> {
        let (content_type, body) = match payload {
            Payload::Text(text) => ("text/plain; charset=utf-8", text.clone().into_bytes()),
            Payload::Audio(bytes) => ("audio/wav", bytes.clone()),
        };

        let mut url = self.endpoint.clone();
        url.query_pairs_mut().append_pair("model", model.as_str());

        let response = self
            .client
            .post(url)
            .header(AUTHORIZATION, format!("Bearer {}", credential.expose()))
            .header(CONTENT_TYPE, content_type)
            .timeout(self.timeout)
            .body(body)
            .send()
            .await
            .map_err(classify_transport)?;

        let status = response.status().as_u16();
        let retry_after = parse_retry_after(response.headers());
        debug!("{} responded {}", self.endpoint, status);

        if (200..300).contains(&status) {
            let bytes = response.bytes().await.map_err(classify_transport)?;
            return match self.output {
                OutputKind::Text => String::from_utf8(bytes.to_vec())
                    .map(|text| ChunkOutput::Text(text.trim().to_string()))
                    .map_err(|e| ApiError::InvalidRequest {
                        message: format!("response is not UTF-8 text: {e}"),
                    }),
                OutputKind::Audio => Ok(ChunkOutput::Audio(bytes.to_vec())),
            };
        }

        let body = response.text().await.unwrap_or_default();
        Err(classify_status(status, retry_after, &body))
    }
}

/// Map a non-success HTTP status onto an [`ApiError`].
pub fn classify_status(status: u16, retry_after: Option<Duration>, body: &str) -> ApiError {
    let message: String = body.trim().chars().take(MAX_ERROR_BODY).collect();

    match status {
        401 | 403 => ApiError::InvalidCredential,
        429 if body.to_ascii_lowercase().contains("quota") => {
            ApiError::QuotaExceeded { retry_after }
        }
        429 => ApiError::RateLimited { retry_after },
        code if is_transient_status(code) => ApiError::ServerError { code, message },
        501 => ApiError::ServerError {
            code: status,
            message,
        },
        _ => ApiError::InvalidRequest {
            message: format!("HTTP {status}: {message}"),
        },
    }
}

fn classify_transport(error: reqwest::Error) -> ApiError {
    let transient = error.is_timeout() || error.is_connect() || error.is_request() || error.is_body();
    ApiError::NetworkError {
        detail: error.to_string(),
        transient,
    }
}

/// Read a retry hint from `retry-after-ms` or `retry-after`.
pub fn parse_retry_after(headers: &HeaderMap) -> Option<Duration> {
    if let Some(ms) = headers
        .get("retry-after-ms")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok())
    {
        return Some(Duration::from_millis(ms));
    }

    headers
        .get("retry-after")
        .and_then(|v| v.to_str().ok())
        .and_then(parse_retry_after_value)
}

/// Parse a retry-after value: integer seconds, fractional seconds, or a
/// duration string like `"1s"` / `"500ms"`.
pub fn parse_retry_after_value(value: &str) -> Option<Duration> {
    let value = value.trim();
    if let Ok(secs) = value.parse::<u64>() {
        return Some(Duration::from_secs(secs));
    }
    if let Ok(secs) = value.parse::<f64>() {
        return Duration::try_from_secs_f64(secs).ok();
    }
    humantime::parse_duration(value).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::HeaderValue;

    #[test]
    fn classify_auth_failures() {
        assert_eq!(classify_status(401, None, ""), ApiError::InvalidCredential);
        assert_eq!(classify_status(403, None, "nope"), ApiError::InvalidCredential);
    }

    #[test]
    fn classify_rate_limit_and_quota() {
        let hint = Some(Duration::from_secs(7));
        assert_eq!(
            classify_status(429, hint, "slow down"),
            ApiError::RateLimited { retry_after: hint }
        );
        assert_eq!(
            classify_status(429, None, r#"{"error":{"code":"insufficient_quota"}}"#),
            ApiError::QuotaExceeded { retry_after: None }
        );
    }

    #[test]
    fn classify_server_errors() {
        let err = classify_status(503, None, "overloaded");
        assert!(err.is_retryable());
        assert!(matches!(err, ApiError::ServerError { code: 503, .. }));

        let err = classify_status(501, None, "");
        assert!(!err.is_retryable());
    }

    #[test]
    fn classify_client_errors() {
        let err = classify_status(413, None, "payload too large");
        assert_eq!(
            err,
            ApiError::InvalidRequest {
                message: "HTTP 413: payload too large".to_string()
            }
        );
        assert!(!err.is_retryable());
    }

    #[test]
    fn classify_timeout_status_is_retryable() {
        assert!(classify_status(408, None, "").is_retryable());
    }

    #[test]
    fn error_body_is_truncated() {
        let body = "x".repeat(1000);
        let ApiError::ServerError { message, .. } = classify_status(500, None, &body) else {
            panic!("expected server error");
        };
        assert_eq!(message.len(), MAX_ERROR_BODY);
    }

    #[test]
    fn parse_retry_after_forms() {
        assert_eq!(parse_retry_after_value("10"), Some(Duration::from_secs(10)));
        assert_eq!(
            parse_retry_after_value("1.5"),
            Some(Duration::from_millis(1500))
        );
        assert_eq!(
            parse_retry_after_value("500ms"),
            Some(Duration::from_millis(500))
        );
        assert_eq!(parse_retry_after_value("2m"), Some(Duration::from_secs(120)));
        assert_eq!(parse_retry_after_value("soon"), None);
    }

    #[test]
    fn out_of_range_retry_after_is_ignored() {
        assert_eq!(parse_retry_after_value("1e20"), None);
        assert_eq!(parse_retry_after_value("-3.5"), None);
        assert_eq!(parse_retry_after_value("inf"), None);
        assert_eq!(parse_retry_after_value("NaN"), None);
        assert_eq!(
            parse_retry_after_value("18446744073709551615"),
            Some(Duration::from_secs(u64::MAX))
        );
    }

    #[test]
    fn retry_after_ms_header_wins() {
        let mut headers = HeaderMap::new();
        headers.insert("retry-after", HeaderValue::from_static("30"));
        headers.insert("retry-after-ms", HeaderValue::from_static("250"));
        assert_eq!(parse_retry_after(&headers), Some(Duration::from_millis(250)));
    }

    #[test]
    fn retry_after_header_seconds() {
        let mut headers = HeaderMap::new();
        headers.insert("retry-after", HeaderValue::from_static("12"));
        assert_eq!(parse_retry_after(&headers), Some(Duration::from_secs(12)));
        assert_eq!(parse_retry_after(&HeaderMap::new()), None);
    }

    #[test]
    fn invalid_endpoint_is_rejected() {
        let client = HttpClient::new("not a url", OutputKind::Text, Duration::from_secs(5));
        assert!(matches!(client, Err(LongformError::HttpClient { .. })));
    }

    #[test]
    fn client_builds() {
        let client = HttpClient::new(
            "http://localhost:9/v1/infer",
            OutputKind::Text,
            Duration::from_secs(5),
        );
        assert!(client.is_ok());
    }
}
