//! Test doubles shared by unit and integration tests.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::error::CrawlError;
use crate::request::Request;
use crate::response::Response;
use crate::traits::Fetcher;

/// What the mock produces for one call.
#[derive(Debug, Clone)]
pub enum MockReply {
    Status(u16),
    ConnectError,
    ContentError,
    /// Never resolves; only the caller's timeout ends it.
    Hang,
}

/// Scripted [`Fetcher`] with call counting and a concurrency gauge.
///
/// Replies resolve in order: the per-call script first, then any per-host
/// reply, then the fallback. Clones share all state, so a clone handed to
/// a downloader still reports into the test's counters.
#[derive(Clone)]
pub struct MockFetcher {
    script: Arc<Mutex<VecDeque<MockReply>>>,
    by_host: Arc<Mutex<HashMap<String, MockReply>>>,
    fallback: MockReply,
    latency: Duration,
    calls: Arc<AtomicUsize>,
    in_flight: Arc<AtomicUsize>,
    max_in_flight: Arc<AtomicUsize>,
    fetched: Arc<Mutex<Vec<String>>>,
}

impl MockFetcher {
    pub fn new(fallback: MockReply) -> Self {
        Self {
            script: Arc::new(Mutex::new(VecDeque::new())),
            by_host: Arc::new(Mutex::new(HashMap::new())),
            fallback,
            latency: Duration::ZERO,
            calls: Arc::new(AtomicUsize::new(0)),
            in_flight: Arc::new(AtomicUsize::new(0)),
            max_in_flight: Arc::new(AtomicUsize::new(0)),
            fetched: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn always_status(status: u16) -> Self {
        Self::new(MockReply::Status(status))
    }

    pub fn always_connect_error() -> Self {
        Self::new(MockReply::ConnectError)
    }

    pub fn always_content_error() -> Self {
        Self::new(MockReply::ContentError)
    }

    pub fn always_hang() -> Self {
        Self::new(MockReply::Hang)
    }

    /// Consume these replies in order before falling back.
    pub fn with_script(self, replies: impl IntoIterator<Item = MockReply>) -> Self {
        self.script.lock().unwrap().extend(replies);
        self
    }

    /// Fixed reply for every request whose URL host matches `host`.
    pub fn with_host_reply(self, host: &str, reply: MockReply) -> Self {
        self.by_host.lock().unwrap().insert(host.to_string(), reply);
        self
    }

    /// Simulated network time per call.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Highest number of fetches observed running at once.
    pub fn max_concurrency(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    pub fn fetched_urls(&self) -> Vec<String> {
        self.fetched.lock().unwrap().clone()
    }

    fn reply_for(&self, request: &Request) -> MockReply {
        if let Some(scripted) = self.script.lock().unwrap().pop_front() {
            return scripted;
        }
        if let Some(host) = request.url.host_str()
            && let Some(reply) = self.by_host.lock().unwrap().get(host)
        {
            return reply.clone();
        }
        self.fallback.clone()
    }
}

impl Fetcher for MockFetcher {
    fn fetch(
        &self,
        request: &Request,
    ) -> impl std::future::Future<Output = Result<Response, CrawlError>> + Send {
        let reply = self.reply_for(request);
        let request = request.clone();
        let latency = self.latency;
        let calls = Arc::clone(&self.calls);
        let in_flight = Arc::clone(&self.in_flight);
        let max_in_flight = Arc::clone(&self.max_in_flight);
        let fetched = Arc::clone(&self.fetched);

        async move {
            calls.fetch_add(1, Ordering::SeqCst);
            fetched.lock().unwrap().push(request.url.to_string());

            let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            max_in_flight.fetch_max(now, Ordering::SeqCst);

            if !latency.is_zero() {
                tokio::time::sleep(latency).await;
            }

            let result = match reply {
                MockReply::Status(status) => Ok(Response {
                    status,
                    headers: vec![("content-type".to_string(), "text/html".to_string())],
                    body: format!("<html>{}</html>", request.url),
                    elapsed: latency,
                    request,
                }),
                MockReply::ConnectError => Err(CrawlError::Connect("connection refused".into())),
                MockReply::ContentError => Err(CrawlError::Content("invalid body encoding".into())),
                MockReply::Hang => {
                    in_flight.fetch_sub(1, Ordering::SeqCst);
                    std::future::pending::<()>().await;
                    unreachable!()
                }
            };

            in_flight.fetch_sub(1, Ordering::SeqCst);
            result
        }
    }
}
