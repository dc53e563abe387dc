//! Retrying JSON GET shared by the HTTP providers.
//!
//! Transport errors and 5xx responses are retried with the policy's backoff.
//! Other non-200 statuses and undecodable bodies fail immediately.

use serde::de::DeserializeOwned;
use tracing::debug;

use crate::retry::RetryPolicy;

/// Upper bound on how much of an error body is echoed into messages.
const MAX_ERROR_BODY: usize = 2048;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub(crate) enum HttpError {
    #[error("{0}")]
    Transient(String),
    #[error("{0}")]
    Permanent(String),
    /// Non-retryable status with its (truncated) body.
    #[error("status {status}: {body}")]
    Status { status: u16, body: String },
}

impl HttpError {
    fn is_transient(&self) -> bool {
        matches!(self, HttpError::Transient(_))
    }
}

pub(crate) async fn get_json<T: DeserializeOwned>(
    client: &reqwest::Client,
    url: &str,
    query: &[(&str, &str)],
    retry: &RetryPolicy,
) -> Result<T, HttpError> {
    retry
        .run("http_get", HttpError::is_transient, |attempt| async move {
            debug!(url, attempt, "http request");
            let response = client
                .get(url)
                .query(query)
                .send()
                .await
                .map_err(|e| HttpError::Transient(format!("request failed: {e}")))?;

            let status = response.status();
            if !status.is_success() {
                let body = response.text().await.unwrap_or_default();
                let snippet: String = body.trim().chars().take(MAX_ERROR_BODY).collect();
                if status.is_server_error() {
                    return Err(HttpError::Transient(if snippet.is_empty() {
                        format!("server error {}", status.as_u16())
                    } else {
                        format!("server error {}: {snippet}", status.as_u16())
                    }));
                }
                return Err(HttpError::Status {
                    status: status.as_u16(),
                    body: snippet,
                });
            }

            response
                .json::<T>()
                .await
                .map_err(|e| HttpError::Permanent(format!("decode: {e}")))
        })
        .await
}
