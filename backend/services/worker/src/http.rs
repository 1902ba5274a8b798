use std::time::Duration;

use reqwest::{RequestBuilder, Response, StatusCode};

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("HTTP {status}: {body}")]
    HttpError { status: StatusCode, body: String },

    #[error("request failed: {0}")]
    RequestError(#[from] reqwest::Error),

    #[error("max retries exceeded after {attempts} attempts: {last_error}")]
    MaxRetriesExceeded { attempts: u32, last_error: String },

    #[error("unexpected response: {0}")]
    Unexpected(String),
}

impl ClientError {
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            Self::HttpError { status, .. } => Some(*status),
            _ => None,
        }
    }
}

/// Parse an optional numeric env var, failing on garbage instead of silently defaulting.
pub fn parse_env_or<T: std::str::FromStr>(key: &str, default: T) -> Result<T, String> {
    match std::env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|_| format!("{key} must be a number, got '{raw}'")),
        Err(_) => Ok(default),
    }
}

/// Send a request built by `build`, retrying transient failures.
///
/// Timeouts, connect errors, 5xx and 429 are retried with exponential backoff
/// (429 honours `Retry-After`). Other 4xx fail fast. Returns the first
/// successful response.
pub async fn send_with_retry<F>(max_retries: u32, mut build: F) -> Result<Response, ClientError>
where
    F: FnMut() -> RequestBuilder,
{
    let mut last_error = String::new();

    for attempt in 0..=max_retries {
        if attempt > 0 {
            let backoff_secs = std::cmp::min(1u64 << attempt, 30);
            tracing::warn!(attempt, backoff_secs, "retrying after backoff");
            tokio::time::sleep(Duration::from_secs(backoff_secs)).await;
        }

        let response = match build().send().await {
            Ok(resp) => resp,
            Err(e) => {
                last_error = e.to_string();
                if e.is_timeout() || e.is_connect() {
                    continue;
                }
                return Err(ClientError::RequestError(e));
            }
        };

        let status = response.status();

        if status.is_success() {
            return Ok(response);
        }

        // Honor Retry-After header for 429
        if status == StatusCode::TOO_MANY_REQUESTS {
            if let Some(retry_after) = response
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<u64>().ok())
            {
                let wait = std::cmp::min(retry_after, 60);
                tracing::warn!(wait, "rate-limited, waiting Retry-After");
                tokio::time::sleep(Duration::from_secs(wait)).await;
            }
            last_error = "429 Too Many Requests".to_string();
            continue;
        }

        // Retry on 5xx
        if status.is_server_error() {
            let body = response.text().await.unwrap_or_default();
            last_error = format!("{status}: {body}");
            continue;
        }

        // Fail fast on 4xx (except 429 handled above)
        let body = response.text().await.unwrap_or_default();
        return Err(ClientError::HttpError { status, body });
    }

    Err(ClientError::MaxRetriesExceeded {
        attempts: max_retries + 1,
        last_error,
    })
}
