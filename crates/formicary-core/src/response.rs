use std::time::Duration;

use crate::error::CrawlError;
use crate::request::Request;

/// A completed transport-level exchange.
///
/// Built by the downloader, consumed by the parser. Any HTTP status is a
/// valid `Response`; what to do with a 404 is the consumer's concern.
#[derive(Debug)]
pub struct Response {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: String,
    pub elapsed: Duration,
    /// The originating request, including its `meta`.
    pub request: Request,
}

impl Response {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn is_server_error(&self) -> bool {
        (500..600).contains(&self.status)
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// Terminal failure record for a request whose retry budget is spent
/// (or that failed non-retryably). Surfaced to the caller, never dropped.
#[derive(Debug)]
pub struct CrawlFailure {
    pub request: Request,
    pub error: CrawlError,
    /// Retries actually performed before giving up.
    pub retries: u32,
}
