use thiserror::Error;

/// Error taxonomy for the crawl core.
#[derive(Error, Debug, Clone)]
pub enum CrawlError {
    /// A single fetch attempt exceeded the wall-clock timeout.
    #[error("request timed out after {0} seconds")]
    Timeout(u64),

    /// Connection-level failure (refused, reset, DNS).
    #[error("connection error: {0}")]
    Connect(String),

    /// The server answered with a status the retry policy treats as failure.
    #[error("HTTP {status} from upstream")]
    Http { status: u16 },

    /// The response completed but its body could not be read or decoded.
    /// Never retried: the host answered, the content is simply unusable.
    #[error("content error: {0}")]
    Content(String),

    /// The host's circuit breaker rejected the request without a network call.
    #[error("circuit breaker open for {host}, retry in {retry_after_secs}s")]
    BreakerOpen { host: String, retry_after_secs: u64 },

    /// The frontier is at its configured capacity.
    #[error("frontier at capacity, request rejected")]
    QueueCapacity,

    /// The request target cannot be keyed to a host.
    #[error("invalid URL: {0}")]
    InvalidUrl(String),

    /// Invalid limits or thresholds; fatal at startup.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

impl CrawlError {
    /// Returns true if the failure is transient and worth retrying.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            CrawlError::Timeout(_)
                | CrawlError::Connect(_)
                | CrawlError::Http { .. }
                | CrawlError::BreakerOpen { .. }
        )
    }

    /// Returns true if the failure should count against the host's
    /// circuit breaker. Breaker rejections themselves do not: the host
    /// was never contacted.
    pub fn should_trip_breaker(&self) -> bool {
        matches!(
            self,
            CrawlError::Timeout(_) | CrawlError::Connect(_) | CrawlError::Http { .. }
        )
    }
}
