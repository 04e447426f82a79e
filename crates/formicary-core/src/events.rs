//! Lifecycle event hooks.
//!
//! Observers are injected, synchronous, and fire-and-forget: the core
//! never waits on them and never needs them for correctness. Every method
//! defaults to a no-op.

use std::time::Duration;

use crate::error::CrawlError;
use crate::request::Request;
use crate::response::{CrawlFailure, Response};

/// Receives crawl lifecycle events (decoupled logging/metrics).
pub trait CrawlObserver: Send + Sync {
    /// A request was newly admitted to the frontier.
    fn request_scheduled(&self, request: &Request) {
        let _ = request;
    }

    /// A request is about to go on the wire.
    fn request_started(&self, request: &Request) {
        let _ = request;
    }

    /// A transport-level exchange completed.
    fn request_succeeded(&self, response: &Response) {
        let _ = response;
    }

    /// A request was re-queued for retry after `delay`.
    fn request_retried(&self, request: &Request, reason: &CrawlError, delay: Duration) {
        let _ = (request, reason, delay);
    }

    /// A request's retry budget is spent; terminal failure.
    fn request_exhausted(&self, failure: &CrawlFailure) {
        let _ = failure;
    }

    fn breaker_opened(&self, host: &str) {
        let _ = host;
    }

    fn breaker_closed(&self, host: &str) {
        let _ = host;
    }
}

/// Observer that ignores every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopObserver;

impl CrawlObserver for NoopObserver {}

/// Observer that logs through the `tracing` crate.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingObserver;

impl CrawlObserver for TracingObserver {
    fn request_scheduled(&self, request: &Request) {
        tracing::debug!(request_id = %request.id, url = %request.url, "Request scheduled");
    }

    fn request_started(&self, request: &Request) {
        tracing::debug!(request_id = %request.id, url = %request.url, "Request started");
    }

    fn request_succeeded(&self, response: &Response) {
        tracing::info!(
            request_id = %response.request.id,
            url = %response.request.url,
            status = response.status,
            elapsed_ms = %response.elapsed.as_millis(),
            "Request succeeded"
        );
    }

    fn request_retried(&self, request: &Request, reason: &CrawlError, delay: Duration) {
        tracing::warn!(
            request_id = %request.id,
            url = %request.url,
            retry = request.retry_count,
            delay_ms = %delay.as_millis(),
            reason = %reason,
            "Request retried"
        );
    }

    fn request_exhausted(&self, failure: &CrawlFailure) {
        tracing::warn!(
            request_id = %failure.request.id,
            url = %failure.request.url,
            retries = failure.retries,
            error = %failure.error,
            "Request exhausted"
        );
    }

    fn breaker_opened(&self, host: &str) {
        tracing::warn!(%host, "Circuit breaker opened");
    }

    fn breaker_closed(&self, host: &str) {
        tracing::info!(%host, "Circuit breaker closed");
    }
}
