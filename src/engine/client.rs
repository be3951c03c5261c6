//! HTTP client for the VOICEVOX engine.
//!
//! Every call goes through [`EngineClient::post`], which applies an independent timeout
//! to each attempt and retries transport failures and 5xx responses with exponential
//! backoff. 4xx responses are never retried.

use std::fmt;
use std::time::Duration;

use reqwest::StatusCode;
use reqwest::header::CONTENT_TYPE;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

/// Default number of attempts per engine call.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Default base delay between attempts in milliseconds.
pub const DEFAULT_BASE_DELAY_MS: u64 = 400;

/// Default per-attempt timeout in milliseconds.
pub const DEFAULT_TIMEOUT_MS: u64 = 15000;

/// Upper bound on the backoff exponent so the shift can never overflow.
const MAX_BACKOFF_EXPONENT: u32 = 20;

/// Engine operation a request belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Operation {
    /// `POST /audio_query`
    #[serde(rename = "query")]
    AudioQuery,
    /// `POST /synthesis`
    #[serde(rename = "synthesis")]
    Synthesis,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operation::AudioQuery => write!(f, "audio_query"),
            Operation::Synthesis => write!(f, "synthesis"),
        }
    }
}

/// Retry and timeout parameters for engine calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    pub max_attempts: u32,  // Attempts per call, counted from 1
    pub base_delay_ms: u64, // Delay before the second attempt
    pub timeout_ms: u64,    // Independent timeout for each attempt
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self { max_attempts: DEFAULT_MAX_ATTEMPTS, base_delay_ms: DEFAULT_BASE_DELAY_MS, timeout_ms: DEFAULT_TIMEOUT_MS }
    }
}

impl RetryPolicy {
    /// Delay to wait after a failed `attempt` (1-based) before the next one.
    pub fn backoff(&self, attempt: u32) -> Duration {
        Duration::from_millis(backoff_ms(attempt, self.base_delay_ms))
    }

    /// Timeout applied to a single attempt.
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// Exponential backoff: `base_delay_ms * 2^(attempt - 1)`.
pub fn backoff_ms(attempt: u32, base_delay_ms: u64) -> u64 {
    let exponent = attempt.saturating_sub(1).min(MAX_BACKOFF_EXPONENT);
    base_delay_ms.saturating_mul(1_u64 << exponent)
}

/// Final failure of an engine call after the retry policy gave up.
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct RequestError {
    pub operation: Operation,
    pub audio_key: String,
    pub endpoint: String,
    pub attempts: u32,
    pub status_code: Option<u16>,
    pub retriable: bool,
    pub message: String,
}

/// Successful (2xx) engine response.
#[derive(Debug, Clone)]
pub struct EngineResponse {
    pub status: StatusCode,
    pub body: Vec<u8>,
}

/// Outcome of a single failed attempt.
enum AttemptFailure {
    Transport(String),
    Status(StatusCode),
}

impl AttemptFailure {
    /// Transport errors (including timeouts) and 5xx responses may be retried.
    fn is_retriable(&self) -> bool {
        match self {
            AttemptFailure::Transport(_) => true,
            AttemptFailure::Status(status) => status.is_server_error(),
        }
    }
}

/// VOICEVOX engine client.
///
/// Holds one connection pool and the retry policy; it is cheap to clone and carries no
/// per-build state, so one instance can serve every utterance of every build.
#[derive(Debug, Clone)]
pub struct EngineClient {
    http: reqwest::Client, // Shared connection pool
    base_url: String,      // Normalized base URL without trailing slash
    retry: RetryPolicy,    // Applied to every call
}

impl EngineClient {
    /// Create a new engine client.
    ///
    /// # Arguments
    /// * `base_url` - Engine base URL (a trailing slash is stripped)
    /// * `retry` - Retry policy applied to every call
    ///
    /// # Errors
    /// Returns an error if the HTTP client cannot be constructed (e.g., TLS backend failure).
    pub fn new(base_url: &str, retry: RetryPolicy) -> Result<Self, reqwest::Error> {
        let http = reqwest::Client::builder().build()?;
        Ok(Self { http, base_url: super::normalize_engine_url(Some(base_url)), retry })
    }

    /// Engine base URL.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Retry policy used by this client.
    pub fn retry_policy(&self) -> RetryPolicy {
        self.retry
    }

    /// Build an endpoint URL from a path and query parameters.
    ///
    /// Parameter values are percent-encoded, so arbitrary utterance text is safe.
    pub fn endpoint(&self, path: &str, params: &[(&str, &str)]) -> String {
        let mut url = format!("{}/{}", self.base_url, path.trim_start_matches('/'));
        for (i, (key, value)) in params.iter().enumerate() {
            url.push(if i == 0 { '?' } else { '&' });
            url.push_str(&urlencoding::encode(key));
            url.push('=');
            url.push_str(&urlencoding::encode(value));
        }
        url
    }

    /// POST to an engine endpoint, retrying according to the policy.
    ///
    /// # Arguments
    /// * `endpoint` - Full endpoint URL (see [`EngineClient::endpoint`])
    /// * `json_body` - Optional JSON body, sent with `content-type: application/json`
    /// * `operation` - Operation the call belongs to (recorded in errors)
    /// * `audio_key` - Utterance the call is made for (recorded in errors)
    ///
    /// # Returns
    /// The successful response and the number of attempts it took.
    ///
    /// # Errors
    /// Returns a [`RequestError`] on a 4xx response, or once transport failures / 5xx
    /// responses have exhausted `max_attempts`. The error is never marked retriable.
    pub async fn post(&self, endpoint: &str, json_body: Option<Vec<u8>>, operation: Operation, audio_key: &str) -> Result<(EngineResponse, u32), RequestError> {
        let max_attempts = self.retry.max_attempts.max(1);
        let mut attempts = 0;

        loop {
            attempts += 1;
            debug!("{} {} attempt {}/{}", operation, audio_key, attempts, max_attempts);

            let failure = match tokio::time::timeout(self.retry.timeout(), self.send_once(endpoint, json_body.as_deref())).await {
                Ok(Ok(response)) if response.status.is_success() => return Ok((response, attempts)),
                Ok(Ok(response)) => AttemptFailure::Status(response.status),
                Ok(Err(e)) => AttemptFailure::Transport(e.to_string()),
                Err(_) => AttemptFailure::Transport(format!("request timed out after {} ms", self.retry.timeout_ms)),
            };

            if failure.is_retriable() && attempts < max_attempts {
                let delay = self.retry.backoff(attempts);
                warn!("{} for {} failed on attempt {}/{}, retrying in {} ms", operation, audio_key, attempts, max_attempts, delay.as_millis());
                tokio::time::sleep(delay).await;
                continue;
            }

            return Err(self.to_error(failure, endpoint, operation, audio_key, attempts));
        }
    }

    /// Perform one HTTP attempt and read the whole body.
    async fn send_once(&self, endpoint: &str, json_body: Option<&[u8]>) -> Result<EngineResponse, reqwest::Error> {
        let mut request = self.http.post(endpoint);
        if let Some(body) = json_body {
            request = request.header(CONTENT_TYPE, "application/json").body(body.to_vec());
        }

        let response = request.send().await?;
        let status = response.status();
        let body = response.bytes().await?.to_vec();
        Ok(EngineResponse { status, body })
    }

    fn to_error(&self, failure: AttemptFailure, endpoint: &str, operation: Operation, audio_key: &str, attempts: u32) -> RequestError {
        let (message, status_code) = match failure {
            AttemptFailure::Transport(reason) => (format!("Failed to call VOICEVOX {} for {} at {}: {}", operation, audio_key, endpoint, reason), None),
            AttemptFailure::Status(status) => (
                format!(
                    "VOICEVOX {} returned {} {} for {} at {}",
                    operation,
                    status.as_u16(),
                    status.canonical_reason().unwrap_or(""),
                    audio_key,
                    endpoint
                ),
                Some(status.as_u16()),
            ),
        };

        RequestError { operation, audio_key: audio_key.to_string(), endpoint: endpoint.to_string(), attempts, status_code, retriable: false, message }
    }
}
