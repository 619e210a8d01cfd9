//! Retrying upstream calls.
//!
//! Each attempt runs under the route deadline. Transient failures (transport
//! errors, 5xx, timeouts) are retried with jittered backoff up to the route's
//! retry count; client errors end the loop immediately.

use std::time::Duration;

use crate::config::RetryConfig;
use crate::resilience::backoff::backoff_for;
use crate::resilience::timeouts::with_deadline;
use crate::upstream::{Upstream, UpstreamError, UpstreamRequest, UpstreamResponse};

/// Final failure after the retry loop gave up.
#[derive(Debug, Clone)]
pub enum CallFailure {
    /// The last attempt ran out of time.
    Timeout,
    Transient { status: Option<u16>, message: String },
    Client { status: u16, body: Vec<u8> },
}

impl CallFailure {
    /// Whether the failure says anything about upstream health.
    ///
    /// Client errors mean the upstream answered correctly, so they are not
    /// held against its circuit breaker.
    pub fn counts_against_breaker(&self) -> bool {
        !matches!(self, CallFailure::Client { .. })
    }
}

impl From<UpstreamError> for CallFailure {
    fn from(err: UpstreamError) -> Self {
        match err {
            UpstreamError::Transient { status, message } => CallFailure::Transient { status, message },
            UpstreamError::Client { status, body } => CallFailure::Client { status, body },
            UpstreamError::UnknownService(service) => CallFailure::Client {
                status: 502,
                body: format!("no upstream configured for service `{service}`").into_bytes(),
            },
        }
    }
}

/// Outcome of [`call_with_retries`].
#[derive(Debug)]
pub struct CallReport {
    pub result: Result<UpstreamResponse, CallFailure>,
    pub attempts: u32,
}

/// Invoke `service_id` until it succeeds, fails permanently, or runs out of
/// retries.
pub async fn call_with_retries(
    upstream: &dyn Upstream,
    service_id: &str,
    request: &UpstreamRequest,
    timeout: Duration,
    retry_count: u32,
    retry: &RetryConfig,
) -> CallReport {
    let max_attempts = retry_count.saturating_add(1);
    let mut attempt = 0;

    loop {
        attempt += 1;

        let failure = match with_deadline(timeout, upstream.invoke(service_id, request)).await {
            Ok(Ok(response)) => {
                return CallReport {
                    result: Ok(response),
                    attempts: attempt,
                }
            }
            Ok(Err(err)) => {
                let transient = err.is_transient();
                let failure = CallFailure::from(err);
                if !transient {
                    return CallReport {
                        result: Err(failure),
                        attempts: attempt,
                    };
                }
                failure
            }
            Err(_) => CallFailure::Timeout,
        };

        if attempt >= max_attempts {
            return CallReport {
                result: Err(failure),
                attempts: attempt,
            };
        }

        let delay = backoff_for(attempt, retry);
        tracing::debug!(
            service = %service_id,
            attempt,
            delay_ms = delay.as_millis() as u64,
            failure = ?failure,
            "Retrying upstream call"
        );
        tokio::time::sleep(delay).await;
    }
}
