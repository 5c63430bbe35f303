//! Shared kline HTTP plumbing
//!
//! One reqwest client per venue client, 15s timeout. Rate-limit responses
//! back off 2s/4s/6s across up to three attempts; 5xx and timeouts retry
//! the same way. Everything else surfaces as a protocol error for the
//! caller to log and skip.

use std::time::Duration;

use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use thiserror::Error;
use tokio::time::sleep;
use tracing::{debug, warn};

const HTTP_TIMEOUT: Duration = Duration::from_secs(15);
const MAX_ATTEMPTS: u32 = 3;

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("rate limited")]
    RateLimited,
    #[error("request timed out")]
    Timeout,
    #[error("http status {0}")]
    Status(StatusCode),
    #[error("network error: {0}")]
    Network(String),
    #[error("protocol error: {0}")]
    Protocol(String),
    #[error("symbol not found")]
    SymbolNotFound,
}

impl FetchError {
    /// Transient errors are worth a backoff-retry; protocol errors are not.
    pub fn is_transient(&self) -> bool {
        match self {
            FetchError::RateLimited | FetchError::Timeout | FetchError::Network(_) => true,
            FetchError::Status(status) => status.is_server_error(),
            _ => false,
        }
    }
}

#[derive(Debug, Clone)]
pub struct KlineHttp {
    client: reqwest::Client,
    request_delay: Duration,
}

impl KlineHttp {
    pub fn new(request_delay_ms: u64) -> Self {
        let client = reqwest::Client::builder()
            .timeout(HTTP_TIMEOUT)
            .user_agent("marketscan/0.1")
            .build()
            .expect("failed to build HTTP client");
        Self {
            client,
            request_delay: Duration::from_millis(request_delay_ms),
        }
    }

    /// Small pause between paginated requests to stay rate-friendly.
    pub async fn pace(&self) {
        if !self.request_delay.is_zero() {
            sleep(self.request_delay).await;
        }
    }

    /// GET with query params, JSON-decoded, with backoff on transient
    /// failures.
    pub async fn get_json<T: DeserializeOwned>(
        &self,
        url: &str,
        params: &[(&str, String)],
    ) -> Result<T, FetchError> {
        let mut last_err = FetchError::Network("no attempt made".into());

        for attempt in 0..MAX_ATTEMPTS {
            match self.get_json_once(url, params).await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_transient() && attempt + 1 < MAX_ATTEMPTS => {
                    let backoff = Duration::from_secs(2 * (attempt as u64 + 1));
                    debug!(url, attempt = attempt + 1, error = %e, backoff_s = backoff.as_secs(), "retrying kline request");
                    sleep(backoff).await;
                    last_err = e;
                }
                Err(e) => return Err(e),
            }
        }
        Err(last_err)
    }

    async fn get_json_once<T: DeserializeOwned>(
        &self,
        url: &str,
        params: &[(&str, String)],
    ) -> Result<T, FetchError> {
        let response = self
            .client
            .get(url)
            .query(params)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    FetchError::Timeout
                } else {
                    FetchError::Network(e.to_string())
                }
            })?;

        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            warn!(url, "rate limited");
            return Err(FetchError::RateLimited);
        }
        if !status.is_success() {
            return Err(FetchError::Status(status));
        }

        response
            .json::<T>()
            .await
            .map_err(|e| FetchError::Protocol(e.to_string()))
    }
}

/// Parse a numeric field that venues deliver as either a JSON number or a
/// numeric string.
pub fn json_f64(value: &serde_json::Value) -> Option<f64> {
    match value {
        serde_json::Value::Number(n) => n.as_f64(),
        serde_json::Value::String(s) => s.parse().ok(),
        _ => None,
    }
}

pub fn json_i64(value: &serde_json::Value) -> Option<i64> {
    match value {
        serde_json::Value::Number(n) => n.as_i64(),
        serde_json::Value::String(s) => s.parse().ok(),
        _ => None,
    }
}

/// Millisecond epoch → tz-naive timestamp.
pub fn ts_from_millis(ms: i64) -> Option<chrono::NaiveDateTime> {
    chrono::DateTime::from_timestamp_millis(ms).map(|dt| dt.naive_utc())
}

/// Second epoch → tz-naive timestamp.
pub fn ts_from_secs(s: i64) -> Option<chrono::NaiveDateTime> {
    chrono::DateTime::from_timestamp(s, 0).map(|dt| dt.naive_utc())
}
