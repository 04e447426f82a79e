use std::time::Duration;

use crate::backoff::RetryPolicy;
use crate::circuit_breaker::BreakerConfig;
use crate::error::CrawlError;

/// Crawl-lifetime configuration. Immutable once the crawler is built;
/// validated at startup so bad limits fail fast instead of mid-crawl.
#[derive(Debug, Clone)]
pub struct CrawlConfig {
    /// Number of worker loops pulling from the scheduler.
    pub worker_count: usize,

    /// Frontier capacity; `enqueue` rejects once reached. 0 = unbounded.
    pub queue_capacity: usize,

    /// Maximum simultaneous in-flight requests per host.
    pub per_host_concurrency: usize,

    /// Minimum spacing between dispatches to the same host.
    pub host_delay: Duration,

    /// Random extra spacing (uniform [0, jitter]) on top of `host_delay`.
    pub host_delay_jitter: Duration,

    /// Hard wall-clock timeout for a single fetch attempt.
    pub request_timeout: Duration,

    /// Default retry budget for requests that don't set their own.
    pub max_retries: u32,

    /// Backoff schedule for retry re-queueing.
    pub retry: RetryPolicy,

    /// Per-host circuit breaker parameters.
    pub breaker: BreakerConfig,

    /// 5xx statuses that count as breaker-relevant failures and are
    /// retried. Empty disables status-based tripping.
    pub trip_statuses: Vec<u16>,
}

impl Default for CrawlConfig {
    fn default() -> Self {
        Self {
            worker_count: 10,
            queue_capacity: 10_000,
            per_host_concurrency: 8,
            host_delay: Duration::ZERO,
            host_delay_jitter: Duration::ZERO,
            request_timeout: Duration::from_secs(30),
            max_retries: 3,
            retry: RetryPolicy::default(),
            breaker: BreakerConfig::default(),
            trip_statuses: vec![500, 502, 503, 504],
        }
    }
}

impl CrawlConfig {
    pub fn with_worker_count(mut self, count: usize) -> Self {
        self.worker_count = count;
        self
    }

    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity;
        self
    }

    pub fn with_per_host_concurrency(mut self, limit: usize) -> Self {
        self.per_host_concurrency = limit;
        self
    }

    pub fn with_host_delay(mut self, delay: Duration) -> Self {
        self.host_delay = delay;
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn with_max_retries(mut self, max: u32) -> Self {
        self.max_retries = max;
        self
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_breaker(mut self, breaker: BreakerConfig) -> Self {
        self.breaker = breaker;
        self
    }

    /// Whether `status` counts as a breaker-relevant, retryable failure.
    pub fn trips_breaker(&self, status: u16) -> bool {
        self.trip_statuses.contains(&status)
    }

    /// Reject invalid limits and thresholds. Fatal at startup.
    pub fn validate(&self) -> Result<(), CrawlError> {
        if self.worker_count == 0 {
            return Err(CrawlError::InvalidConfig("worker_count must be > 0".into()));
        }
        if self.per_host_concurrency == 0 {
            return Err(CrawlError::InvalidConfig(
                "per_host_concurrency must be > 0".into(),
            ));
        }
        if self.request_timeout.is_zero() {
            return Err(CrawlError::InvalidConfig(
                "request_timeout must be > 0".into(),
            ));
        }
        if self.retry.multiplier < 1.0 {
            return Err(CrawlError::InvalidConfig(
                "retry multiplier must be >= 1.0".into(),
            ));
        }
        if self.retry.base.is_zero() {
            return Err(CrawlError::InvalidConfig(
                "retry base delay must be > 0".into(),
            ));
        }
        if self.breaker.failure_threshold == 0 {
            return Err(CrawlError::InvalidConfig(
                "breaker failure_threshold must be > 0".into(),
            ));
        }
        if self.breaker.recovery_timeout.is_zero() {
            return Err(CrawlError::InvalidConfig(
                "breaker recovery_timeout must be > 0".into(),
            ));
        }
        if let Some(status) = self.trip_statuses.iter().find(|s| !(500..600).contains(*s)) {
            return Err(CrawlError::InvalidConfig(format!(
                "trip status {status} is not a 5xx status"
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        assert!(CrawlConfig::default().validate().is_ok());
    }

    #[test]
    fn builder_chain() {
        let config = CrawlConfig::default()
            .with_worker_count(4)
            .with_per_host_concurrency(2)
            .with_request_timeout(Duration::from_secs(5))
            .with_max_retries(1);

        assert_eq!(config.worker_count, 4);
        assert_eq!(config.per_host_concurrency, 2);
        assert_eq!(config.max_retries, 1);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn rejects_zero_limits() {
        assert!(CrawlConfig::default().with_worker_count(0).validate().is_err());
        assert!(
            CrawlConfig::default()
                .with_per_host_concurrency(0)
                .validate()
                .is_err()
        );
        assert!(
            CrawlConfig::default()
                .with_request_timeout(Duration::ZERO)
                .validate()
                .is_err()
        );
    }

    #[test]
    fn rejects_shrinking_backoff() {
        let mut config = CrawlConfig::default();
        config.retry.multiplier = 0.5;
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_non_5xx_trip_status() {
        let mut config = CrawlConfig::default();
        config.trip_statuses.push(404);
        assert!(config.validate().is_err());
    }

    #[test]
    fn trip_statuses_classify() {
        let config = CrawlConfig::default();
        assert!(config.trips_breaker(503));
        assert!(!config.trips_breaker(501));
        assert!(!config.trips_breaker(404));
    }
}
