//! One-request execution: breaker admission, host gate, timeout-bounded
//! fetch, outcome classification, and backoff computation.
//!
//! The downloader never loops: a retryable failure is returned as
//! [`Outcome::Retry`] and re-admission goes through the scheduler, so the
//! retry waits in the frontier instead of holding a worker.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;

use crate::circuit_breaker::{Admission, Transition};
use crate::config::CrawlConfig;
use crate::error::CrawlError;
use crate::events::CrawlObserver;
use crate::hosts::{HostRegistry, HostState};
use crate::request::Request;
use crate::response::{CrawlFailure, Response};
use crate::traits::Fetcher;

/// Result of executing one request.
#[derive(Debug)]
pub enum Outcome {
    /// A response came back; its status may still be an error status.
    /// Whether to act on a 404 is the consumer's call.
    Success(Response),
    /// Retryable failure with budget remaining. The scheduler re-admits
    /// the request after `delay`.
    Retry {
        request: Request,
        reason: CrawlError,
        delay: Duration,
    },
    /// Terminal failure: budget spent or the error is not retryable.
    Exhausted(CrawlFailure),
}

/// Executes requests against a [`Fetcher`], consulting per-host breaker
/// and gate state on the way in and feeding results back on the way out.
pub struct Downloader<F: Fetcher> {
    fetcher: F,
    hosts: Arc<HostRegistry>,
    config: CrawlConfig,
    observer: Arc<dyn CrawlObserver>,
}

impl<F: Fetcher> Downloader<F> {
    pub fn new(
        fetcher: F,
        hosts: Arc<HostRegistry>,
        config: CrawlConfig,
        observer: Arc<dyn CrawlObserver>,
    ) -> Self {
        Self {
            fetcher,
            hosts,
            config,
            observer,
        }
    }

    /// Execute one request end to end.
    ///
    /// Order of operations: breaker admission (cheap rejection, no slot
    /// consumed), gate slot plus politeness delay, fetch bounded by the
    /// request timeout, then classification. The gate slot is held for
    /// the duration of the fetch only.
    pub async fn execute(&self, request: Request) -> Outcome {
        let host_state = request.host_key().map(|key| self.hosts.host(&key));

        match &host_state {
            Some(state) => match state.breaker.admit() {
                Admission::Allowed { .. } => {}
                Admission::Rejected { retry_after } => {
                    let reason = CrawlError::BreakerOpen {
                        host: state.breaker.host().to_string(),
                        retry_after_secs: retry_after.as_secs(),
                    };
                    tracing::debug!(
                        url = %request.url,
                        retry_after_ms = %retry_after.as_millis(),
                        "Breaker rejected dispatch"
                    );
                    // Rejection consumes a retry, with the breaker's own
                    // recovery window as the backoff, so a request to a
                    // host that never recovers still terminates.
                    return self.retry_or_exhaust(request, reason, Some(retry_after));
                }
            },
            None => {}
        }

        let fetched = {
            let _permit = match &host_state {
                Some(state) => Some(state.gate.acquire().await),
                None => None,
            };

            self.observer.request_started(&request);
            let started = Instant::now();
            match tokio::time::timeout(self.config.request_timeout, self.fetcher.fetch(&request))
                .await
            {
                Ok(Ok(mut response)) => {
                    response.elapsed = started.elapsed();
                    Ok(response)
                }
                Ok(Err(error)) => Err(error),
                Err(_) => Err(CrawlError::Timeout(self.config.request_timeout.as_secs())),
            }
            // Permit dropped here: slot freed before retry/backoff
            // bookkeeping, never held across a backoff delay.
        };

        match fetched {
            Ok(response) => self.classify_response(response, host_state.as_deref()),
            Err(error) => self.classify_error(request, error, host_state.as_deref()),
        }
    }

    fn classify_response(&self, response: Response, host_state: Option<&HostState>) -> Outcome {
        if self.config.trips_breaker(response.status) {
            let error = CrawlError::Http {
                status: response.status,
            };
            if let Some(state) = host_state
                && let Some(Transition::Opened) = state.breaker.record_failure(&error)
            {
                self.observer.breaker_opened(state.breaker.host());
            }
            return self.retry_or_exhaust(response.request, error, None);
        }

        if let Some(state) = host_state {
            // 2xx always resets the failure counter; other completed
            // statuses reset only when the config says reachability
            // counts as recovery.
            let resets = response.is_success() || state.breaker.config().reset_on_http_success;
            if resets {
                if let Some(Transition::Closed) = state.breaker.record_success() {
                    self.observer.breaker_closed(state.breaker.host());
                }
            } else {
                // Completed but not counted either way; still resolves a
                // half-open trial.
                state.breaker.record_neutral();
            }
        }

        self.observer.request_succeeded(&response);
        Outcome::Success(response)
    }

    fn classify_error(
        &self,
        request: Request,
        error: CrawlError,
        host_state: Option<&HostState>,
    ) -> Outcome {
        if let Some(state) = host_state {
            if error.should_trip_breaker() {
                if let Some(Transition::Opened) = state.breaker.record_failure(&error) {
                    self.observer.breaker_opened(state.breaker.host());
                }
            } else {
                state.breaker.record_neutral();
            }
        }

        if error.is_retryable() {
            self.retry_or_exhaust(request, error, None)
        } else {
            self.exhaust(request, error)
        }
    }

    fn retry_or_exhaust(
        &self,
        request: Request,
        reason: CrawlError,
        delay_override: Option<Duration>,
    ) -> Outcome {
        if request.can_retry(self.config.max_retries) {
            let delay = delay_override
                .unwrap_or_else(|| {
                    self.config
                        .retry
                        .jittered_delay_for_attempt(request.retry_count + 1)
                });
            Outcome::Retry {
                request,
                reason,
                delay,
            }
        } else {
            self.exhaust(request, reason)
        }
    }

    fn exhaust(&self, request: Request, error: CrawlError) -> Outcome {
        let failure = CrawlFailure {
            retries: request.retry_count,
            request,
            error,
        };
        self.observer.request_exhausted(&failure);
        Outcome::Exhausted(failure)
    }
}
