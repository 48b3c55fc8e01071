//! Shared HTTP GET with retry, back-off, and manual redirect handling.
//!
//! All provider clients and the cover-art fetchers go through here so the
//! retry policy is applied uniformly. Redirects are followed manually and
//! do not consume retry attempts.

use reqwest::header::{HeaderValue, CONTENT_TYPE, LOCATION, RETRY_AFTER};
use reqwest::redirect::Policy;
use reqwest::StatusCode;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

pub const USER_AGENT: &str = concat!("cdrip/", env!("CARGO_PKG_VERSION"));

/// How many bytes of an error response body end up in diagnostics.
const ERROR_BODY_SNIPPET_BYTES: usize = 300;

const MAX_RETRY_AFTER_SECS: u64 = 60 * 60;

#[derive(Debug, Error)]
pub enum FetchError {
    /// All retry attempts exhausted on transient failures
    #[error("{0}")]
    Transient(String),
    /// Terminal failure; retrying would not help
    #[error("{0}")]
    Fatal(String),
}

/// Retry/redirect policy for a single logical GET
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub timeout_sec: u64,
    pub max_attempts: u32,
    pub retry_delay_ms: u64,
    pub max_redirects: u32,
    pub respect_retry_after: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            timeout_sec: 10,
            max_attempts: 3,
            retry_delay_ms: 1200,
            max_redirects: 2,
            respect_retry_after: true,
        }
    }
}

impl RetryPolicy {
    /// Cover-art downloads get a longer timeout than metadata queries.
    pub fn cover_art() -> Self {
        Self {
            timeout_sec: 15,
            ..Default::default()
        }
    }
}

/// A successful response body with its Content-Type, when reported.
#[derive(Debug, Clone)]
pub struct FetchedBody {
    pub bytes: Vec<u8>,
    pub content_type: Option<String>,
}

fn status_is_retryable(status: StatusCode) -> bool {
    status == StatusCode::REQUEST_TIMEOUT
        || status == StatusCode::TOO_MANY_REQUESTS
        || status.is_server_error()
}

/// Transport-level failures that may clear up on a retry. Hard TLS
/// failures (bad certificates) come through `is_builder`/`is_request`
/// without the connect flag and stay terminal.
fn reqwest_error_is_retryable(err: &reqwest::Error) -> bool {
    err.is_timeout() || err.is_connect() || err.is_body() || err.is_decode()
}

fn parse_retry_after_secs(value: Option<&HeaderValue>) -> Option<u64> {
    let raw = value?.to_str().ok()?.trim();
    let secs: i64 = raw.parse().ok()?;
    if secs <= 0 {
        return None;
    }
    Some((secs as u64).min(MAX_RETRY_AFTER_SECS))
}

fn body_snippet(body: &[u8]) -> String {
    let end = body.len().min(ERROR_BODY_SNIPPET_BYTES);
    String::from_utf8_lossy(&body[..end]).into_owned()
}

/// GET `url`, returning the body bytes and Content-Type. `service` names
/// the remote side in diagnostics ("MusicBrainz", "Cover Art Archive"...).
pub async fn get_bytes(
    service: &str,
    url: &str,
    accept: &str,
    policy: &RetryPolicy,
) -> Result<FetchedBody, FetchError> {
    let client = reqwest::Client::builder()
        .user_agent(USER_AGENT)
        .timeout(Duration::from_secs(policy.timeout_sec.max(1)))
        .redirect(Policy::none())
        .build()
        .map_err(|e| FetchError::Fatal(format!("{}: failed to create HTTP client: {}", service, e)))?;

    let mut current_url = url.to_string();
    let mut redirects = 0u32;
    let mut attempt = 0u32;
    let max_attempts = policy.max_attempts.max(1);

    loop {
        debug!("{} GET {} (attempt {})", service, current_url, attempt + 1);
        let mut request = client.get(&current_url);
        if !accept.is_empty() {
            request = request.header(reqwest::header::ACCEPT, accept);
        }

        let retry_allowed = attempt + 1 < max_attempts;
        let mut retry_delay = Duration::from_millis(policy.retry_delay_ms);

        let outcome: Result<FetchedBody, (bool, String)> = match request.send().await {
            Ok(response) => {
                let status = response.status();

                if status.is_redirection() {
                    let location = response
                        .headers()
                        .get(LOCATION)
                        .and_then(|v| v.to_str().ok())
                        .map(str::to_string);
                    if let Some(location) = location {
                        if redirects < policy.max_redirects {
                            current_url = reqwest::Url::parse(&current_url)
                                .and_then(|base| base.join(&location))
                                .map(|u| u.to_string())
                                .unwrap_or(location);
                            redirects += 1;
                            continue;
                        }
                    }
                }

                if policy.respect_retry_after {
                    if let Some(secs) = parse_retry_after_secs(response.headers().get(RETRY_AFTER)) {
                        retry_delay = Duration::from_secs(secs);
                    }
                }

                let content_type = response
                    .headers()
                    .get(CONTENT_TYPE)
                    .and_then(|v| v.to_str().ok())
                    .map(str::to_string);
                let body = response.bytes().await.map(|b| b.to_vec());

                match body {
                    Ok(body) if status.is_success() && !body.is_empty() => Ok(FetchedBody {
                        bytes: body,
                        content_type,
                    }),
                    Ok(_) if status.is_success() => {
                        Err((true, format!("{} response body is empty", service)))
                    }
                    Ok(body) => {
                        let mut msg =
                            format!("{} request failed with status {}", service, status.as_u16());
                        let snippet = body_snippet(&body);
                        if !snippet.is_empty() {
                            msg.push_str(&format!(" ({})", snippet));
                        }
                        Err((status_is_retryable(status), msg))
                    }
                    Err(e) => Err((true, format!("{} response read failed: {}", service, e))),
                }
            }
            Err(e) => Err((
                reqwest_error_is_retryable(&e),
                format!("{} request failed: {}", service, e),
            )),
        };

        match outcome {
            Ok(body) => return Ok(body),
            Err((retryable, message)) => {
                if retryable && retry_allowed {
                    warn!("{} (retrying in {:?})", message, retry_delay);
                    tokio::time::sleep(retry_delay).await;
                    attempt += 1;
                    continue;
                }
                if retryable {
                    return Err(FetchError::Transient(message));
                }
                return Err(FetchError::Fatal(message));
            }
        }
    }
}
