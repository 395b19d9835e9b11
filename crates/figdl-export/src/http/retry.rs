//! Bounded retry with linear backoff.
//!
//! A request is retried when the transport fails in a retryable way or when
//! the response status is in the policy's retry set. The delay before retry
//! `n` (1-based) is `base_delay * n`. There is no pause after the final
//! attempt: the last response or error is handed back to the caller.

use std::fmt;
use std::thread;
use std::time::Duration;

use tracing::{debug, warn};

use super::transport::{HttpRequest, HttpResponse, Transport};
use crate::error::TransportError;

/// Default base delay between attempts.
pub const DEFAULT_BASE_DELAY: Duration = Duration::from_secs(10);

/// When and how often a request is retried.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total number of attempts, including the first (at least 1).
    pub max_attempts: u32,
    /// Delay unit for linear backoff.
    pub base_delay: Duration,
    /// Response statuses that trigger a retry.
    pub retry_statuses: Vec<u16>,
}

impl RetryPolicy {
    /// Policy for the document fetch: 4 attempts, retries 429 and 5xx gateway errors.
    pub fn document() -> Self {
        Self {
            max_attempts: 4,
            base_delay: DEFAULT_BASE_DELAY,
            retry_statuses: vec![429, 500, 502, 503, 504],
        }
    }

    /// Policy for render-URL requests: 3 attempts, retries 429 and 500.
    pub fn render() -> Self {
        Self {
            max_attempts: 3,
            base_delay: DEFAULT_BASE_DELAY,
            retry_statuses: vec![429, 500],
        }
    }

    /// Policy for asset downloads: 3 attempts, connection failures only.
    pub fn download() -> Self {
        Self {
            max_attempts: 3,
            base_delay: DEFAULT_BASE_DELAY,
            retry_statuses: Vec::new(),
        }
    }

    /// Set the number of attempts.
    #[must_use]
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    /// Set the backoff unit.
    #[must_use]
    pub fn with_base_delay(mut self, base_delay: Duration) -> Self {
        self.base_delay = base_delay;
        self
    }

    /// Delay after failed attempt `attempt` (1-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.base_delay * attempt
    }

    /// Whether a response with `status` should be retried.
    pub fn retries_status(&self, status: u16) -> bool {
        self.retry_statuses.contains(&status)
    }
}

/// Sends requests through a [`Transport`], retrying per [`RetryPolicy`].
#[derive(Debug)]
pub struct RetryingClient<T> {
    transport: T,
}

impl<T: Transport> RetryingClient<T> {
    /// Wrap a transport.
    pub fn new(transport: T) -> Self {
        Self { transport }
    }

    /// Underlying transport.
    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Send `request`, retrying according to `policy`.
    ///
    /// Statuses outside the retry set are returned on the first attempt.
    /// Once attempts are exhausted the last response (or transport error) is
    /// returned as-is; interpreting it is up to the caller.
    pub fn send(
        &self,
        request: &HttpRequest,
        policy: &RetryPolicy,
    ) -> Result<HttpResponse, TransportError> {
        self.send_with(request, policy, Ok)
    }

    /// Send `request` and hand the response to `read`, retrying the whole
    /// exchange.
    ///
    /// A retryable status is retried before `read` sees the response. When
    /// `read` fails with a retryable error (a connection dropped while the
    /// body streams in), the request is sent again and `read` runs on the new
    /// response. Attempts are shared between both kinds of failure.
    pub fn send_with<R, E, F>(
        &self,
        request: &HttpRequest,
        policy: &RetryPolicy,
        mut read: F,
    ) -> Result<R, E>
    where
        F: FnMut(HttpResponse) -> Result<R, E>,
        E: From<TransportError> + Retryable + fmt::Display,
    {
        let max_attempts = policy.max_attempts.max(1);
        let mut attempt = 1;

        loop {
            debug!(url = %request.url, attempt, max_attempts, "Sending request");
            let last = attempt >= max_attempts;
            let delay = policy.delay_for(attempt);

            let result = match self.transport.send(request) {
                Ok(response) if !last && policy.retries_status(response.status()) => {
                    warn!(
                        url = %request.url,
                        status = response.status(),
                        attempt,
                        max_attempts,
                        delay_secs = delay.as_secs_f64(),
                        "Retryable status, retrying"
                    );
                    pause(delay);
                    attempt += 1;
                    continue;
                }
                Ok(response) => read(response),
                Err(err) => Err(E::from(err)),
            };

            match result {
                Err(err) if !last && err.is_retryable() => {
                    warn!(
                        url = %request.url,
                        error = %err,
                        attempt,
                        max_attempts,
                        delay_secs = delay.as_secs_f64(),
                        "Request failed, retrying"
                    );
                    pause(delay);
                    attempt += 1;
                }
                result => return result,
            }
        }
    }
}

/// Errors that may clear up when the request is sent again.
pub trait Retryable {
    /// Whether another attempt may succeed.
    fn is_retryable(&self) -> bool;
}

impl Retryable for TransportError {
    fn is_retryable(&self) -> bool {
        self.kind.is_retryable()
    }
}

/// Block the current thread for `delay`. Zero delays return immediately.
pub fn pause(delay: Duration) {
    if !delay.is_zero() {
        thread::sleep(delay);
    }
}
