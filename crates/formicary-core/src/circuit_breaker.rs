//! Per-host circuit breaker.
//!
//! Protects the crawl (and the remote host) from request storms when a
//! host is in persistent failure.
//!
//! # Circuit States
//!
//! ```text
//! CLOSED (healthy) --[N failures]--> OPEN (rejecting) --[timeout]--> HALF_OPEN (probing)
//!                                                                         |
//!                                       <--[failure]--                    |
//!                                                                         |
//! CLOSED <-----------------------[trial success]--------------------------+
//! ```
//!
//! Half-open admits exactly one trial request; everything else is rejected
//! as if open until the trial resolves.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use crate::error::CrawlError;

/// Current state of the circuit breaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Requests flow normally.
    Closed,
    /// Requests are rejected immediately.
    Open,
    /// A single trial request is allowed to test recovery.
    HalfOpen,
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CircuitState::Closed => write!(f, "closed"),
            CircuitState::Open => write!(f, "open"),
            CircuitState::HalfOpen => write!(f, "half-open"),
        }
    }
}

/// Configuration for circuit breaker behavior.
#[derive(Debug, Clone)]
pub struct BreakerConfig {
    /// Consecutive failures before opening the circuit.
    pub failure_threshold: u32,

    /// Time to wait before transitioning from Open to Half-Open.
    pub recovery_timeout: Duration,

    /// Whether a completed non-2xx HTTP response resets the
    /// consecutive-failure counter. When false such responses leave the
    /// counter untouched; they never count as failures either way.
    pub reset_on_http_success: bool,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            recovery_timeout: Duration::from_secs(30),
            reset_on_http_success: true,
        }
    }
}

/// Admission decision for one request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// Proceed. `trial` marks the single half-open probe.
    Allowed { trial: bool },
    /// Rejected without a network call; eligible again after `retry_after`.
    Rejected { retry_after: Duration },
}

/// State change reported by `record_*`, for observer events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Opened,
    Closed,
}

#[derive(Debug)]
struct BreakerInner {
    state: CircuitState,
    failure_count: u32,
    last_failure_time: Option<Instant>,
    last_error_message: Option<String>,
    /// True while the half-open trial is in flight.
    probe_in_flight: bool,
}

/// Snapshot of breaker state for monitoring.
#[derive(Debug, Clone)]
pub struct BreakerStats {
    pub host: String,
    pub state: CircuitState,
    pub failure_count: u32,
    pub last_error: Option<String>,
    pub time_until_half_open: Option<Duration>,
}

/// Thread-safe per-host circuit breaker.
#[derive(Clone)]
pub struct CircuitBreaker {
    host: String,
    config: BreakerConfig,
    inner: Arc<Mutex<BreakerInner>>,
}

impl CircuitBreaker {
    pub fn new(host: impl Into<String>, config: BreakerConfig) -> Self {
        Self {
            host: host.into(),
            config,
            inner: Arc::new(Mutex::new(BreakerInner {
                state: CircuitState::Closed,
                failure_count: 0,
                last_failure_time: None,
                last_error_message: None,
                probe_in_flight: false,
            })),
        }
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn config(&self) -> &BreakerConfig {
        &self.config
    }

    /// Acquires the inner mutex lock, recovering from poison if necessary.
    fn lock_inner(&self) -> std::sync::MutexGuard<'_, BreakerInner> {
        self.inner.lock().unwrap_or_else(|poisoned| {
            tracing::warn!(host = %self.host, "Recovered from poisoned breaker mutex");
            poisoned.into_inner()
        })
    }

    /// Returns the current state, handling lazy Open → HalfOpen transitions.
    pub fn state(&self) -> CircuitState {
        let mut inner = self.lock_inner();
        self.maybe_transition_to_half_open(&mut inner);
        inner.state
    }

    /// Whether the scheduler may hand out a request for this host right now.
    /// False while Open, and while the half-open trial is unresolved.
    pub fn is_dispatchable(&self) -> bool {
        let mut inner = self.lock_inner();
        self.maybe_transition_to_half_open(&mut inner);
        match inner.state {
            CircuitState::Closed => true,
            CircuitState::Open => false,
            CircuitState::HalfOpen => !inner.probe_in_flight,
        }
    }

    /// Gate a request. Must be called before any network activity; the
    /// caller must resolve an `Allowed` admission with exactly one of
    /// `record_success`, `record_failure`, or `record_neutral`.
    pub fn admit(&self) -> Admission {
        let mut inner = self.lock_inner();
        self.maybe_transition_to_half_open(&mut inner);

        match inner.state {
            CircuitState::Closed => Admission::Allowed { trial: false },
            CircuitState::Open => Admission::Rejected {
                retry_after: self.remaining_recovery(&inner),
            },
            CircuitState::HalfOpen => {
                if inner.probe_in_flight {
                    // Trial already out; treated as open until it resolves.
                    Admission::Rejected {
                        retry_after: self.config.recovery_timeout,
                    }
                } else {
                    inner.probe_in_flight = true;
                    Admission::Allowed { trial: true }
                }
            }
        }
    }

    /// Record a successful exchange.
    pub fn record_success(&self) -> Option<Transition> {
        let mut inner = self.lock_inner();
        inner.probe_in_flight = false;

        match inner.state {
            CircuitState::HalfOpen => {
                tracing::info!(host = %self.host, "Circuit breaker closing after successful trial");
                inner.state = CircuitState::Closed;
                inner.failure_count = 0;
                inner.last_error_message = None;
                Some(Transition::Closed)
            }
            CircuitState::Closed => {
                inner.failure_count = 0;
                None
            }
            CircuitState::Open => None,
        }
    }

    /// Record a breaker-relevant failure (connect error, timeout,
    /// configured 5xx).
    pub fn record_failure(&self, error: &CrawlError) -> Option<Transition> {
        let mut inner = self.lock_inner();
        inner.probe_in_flight = false;

        match inner.state {
            CircuitState::Closed => {
                inner.failure_count += 1;
                inner.last_failure_time = Some(Instant::now());
                inner.last_error_message = Some(error.to_string());

                if inner.failure_count >= self.config.failure_threshold {
                    tracing::warn!(
                        host = %self.host,
                        failures = inner.failure_count,
                        error = %error,
                        "Circuit breaker opening after {} consecutive failures",
                        inner.failure_count
                    );
                    inner.state = CircuitState::Open;
                    Some(Transition::Opened)
                } else {
                    None
                }
            }
            CircuitState::HalfOpen => {
                tracing::warn!(
                    host = %self.host,
                    error = %error,
                    "Circuit breaker trial failed, returning to open state"
                );
                inner.state = CircuitState::Open;
                inner.last_failure_time = Some(Instant::now());
                inner.last_error_message = Some(error.to_string());
                Some(Transition::Opened)
            }
            CircuitState::Open => {
                inner.last_error_message = Some(error.to_string());
                None
            }
        }
    }

    /// Resolve an admission without touching the failure counter
    /// (breaker-neutral outcomes such as content errors, or non-2xx
    /// completions when `reset_on_http_success` is off). A neutral trial
    /// leaves the circuit half-open so another trial may go out.
    pub fn record_neutral(&self) {
        let mut inner = self.lock_inner();
        inner.probe_in_flight = false;
    }

    /// Time until the breaker would admit again, if currently open.
    pub fn retry_after(&self) -> Option<Duration> {
        let mut inner = self.lock_inner();
        self.maybe_transition_to_half_open(&mut inner);
        (inner.state == CircuitState::Open).then(|| self.remaining_recovery(&inner))
    }

    pub fn stats(&self) -> BreakerStats {
        let mut inner = self.lock_inner();
        self.maybe_transition_to_half_open(&mut inner);

        let time_until_half_open =
            (inner.state == CircuitState::Open).then(|| self.remaining_recovery(&inner));

        BreakerStats {
            host: self.host.clone(),
            state: inner.state,
            failure_count: inner.failure_count,
            last_error: inner.last_error_message.clone(),
            time_until_half_open,
        }
    }

    fn remaining_recovery(&self, inner: &BreakerInner) -> Duration {
        inner
            .last_failure_time
            .map(|t| self.config.recovery_timeout.saturating_sub(t.elapsed()))
            .unwrap_or(self.config.recovery_timeout)
    }

    fn maybe_transition_to_half_open(&self, inner: &mut BreakerInner) {
        if inner.state == CircuitState::Open
            && let Some(last_failure) = inner.last_failure_time
            && last_failure.elapsed() >= self.config.recovery_timeout
        {
            tracing::info!(host = %self.host, "Circuit breaker transitioning to half-open");
            inner.state = CircuitState::HalfOpen;
            inner.probe_in_flight = false;
        }
    }
}
