//! Shared HTTP client for provider backends.
//!
//! One `reqwest::Client` per provider value, with timeout and retry
//! policies: up to two retries with exponential backoff for 5xx and
//! network failures, no retries for 4xx.

use reqwest::{Client, Response, StatusCode};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use storyforge_types::ProviderError;

/// Maximum HTTP timeout regardless of what callers ask for (10 minutes;
/// image turns can legitimately run minutes).
const MAX_HTTP_TIMEOUT: Duration = Duration::from_secs(600);

/// Connect timeout.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Retry attempts for 5xx and network failures.
const MAX_RETRIES: u32 = 2;

/// Initial backoff between retries.
const INITIAL_BACKOFF: Duration = Duration::from_secs(1);

/// HTTP client shared by a provider backend's invocations.
#[derive(Clone)]
pub(crate) struct HttpClient {
    client: Arc<Client>,
}

impl HttpClient {
    /// # Errors
    /// `ProviderError::Misconfiguration` if the client cannot be built.
    pub fn new() -> Result<Self, ProviderError> {
        let client = Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .pool_idle_timeout(Duration::from_secs(90))
            .use_rustls_tls()
            .build()
            .map_err(|e| {
                ProviderError::Misconfiguration(format!("failed to build HTTP client: {e}"))
            })?;

        Ok(Self {
            client: Arc::new(client),
        })
    }

    /// Execute a request with timeout and bounded retry.
    ///
    /// # Errors
    /// - `ProviderError::Auth` for 401/403
    /// - `ProviderError::Quota` for 429
    /// - `ProviderError::Outage` for 5xx after retries
    /// - `ProviderError::Timeout` for timeouts
    /// - `ProviderError::Transport` for network errors after retries
    pub async fn execute_with_retry(
        &self,
        request_builder: reqwest::RequestBuilder,
        request_timeout: Duration,
        provider_name: &str,
    ) -> Result<Response, ProviderError> {
        let effective_timeout = request_timeout.min(MAX_HTTP_TIMEOUT);
        let mut attempt = 0;

        loop {
            attempt += 1;

            let request = request_builder
                .try_clone()
                .ok_or_else(|| {
                    ProviderError::Transport("failed to clone request for retry".to_string())
                })?
                .timeout(effective_timeout)
                .build()
                .map_err(|e| ProviderError::Transport(format!("failed to build request: {e}")))?;

            debug!(
                provider = provider_name,
                attempt,
                timeout_secs = effective_timeout.as_secs(),
                "executing HTTP request"
            );

            match self.client.execute(request).await {
                Ok(response) => {
                    let status = response.status();

                    if status.is_client_error() {
                        return Err(map_client_error(status, provider_name));
                    }

                    if status.is_server_error() {
                        if attempt <= MAX_RETRIES {
                            warn!(
                                provider = provider_name,
                                attempt,
                                status = status.as_u16(),
                                "server error, will retry"
                            );
                            tokio::time::sleep(INITIAL_BACKOFF * attempt).await;
                            continue;
                        }
                        return Err(ProviderError::Outage(format!(
                            "{provider_name} returned server error: {status}"
                        )));
                    }

                    return Ok(response);
                }
                Err(e) => {
                    if e.is_timeout() {
                        return Err(ProviderError::Timeout {
                            duration: effective_timeout,
                        });
                    }

                    if attempt <= MAX_RETRIES {
                        warn!(
                            provider = provider_name,
                            attempt,
                            error = %e,
                            "network error, will retry"
                        );
                        tokio::time::sleep(INITIAL_BACKOFF * attempt).await;
                        continue;
                    }

                    return Err(ProviderError::Transport(format!(
                        "{provider_name} request failed: {e}"
                    )));
                }
            }
        }
    }
}

/// Map 4xx status codes to non-retryable error variants.
fn map_client_error(status: StatusCode, provider_name: &str) -> ProviderError {
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => ProviderError::Auth(format!(
            "{provider_name} authentication failed: {status}"
        )),
        StatusCode::TOO_MANY_REQUESTS => {
            ProviderError::Quota(format!("{provider_name} rate limit exceeded: {status}"))
        }
        _ => ProviderError::Transport(format!("{provider_name} client error: {status}")),
    }
}
