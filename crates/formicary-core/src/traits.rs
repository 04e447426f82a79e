use std::future::Future;

use crate::error::CrawlError;
use crate::request::Request;
use crate::response::Response;

/// Executes a single HTTP exchange for the downloader.
///
/// Transport-level contract: any received HTTP status is an
/// `Ok(Response)`; a 404 completed the exchange. Errors are reserved for
/// connect failures, timeouts, and unreadable bodies. The downloader
/// layers breaker, gate, timeout, and retry policy on top.
pub trait Fetcher: Send + Sync + Clone {
    fn fetch(&self, request: &Request) -> impl Future<Output = Result<Response, CrawlError>> + Send;
}
