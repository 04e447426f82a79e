//! Worker pool wiring: scheduler, downloader, and result channels.
//!
//! [`Crawler::start`] spawns `worker_count` identical tasks. Each loops
//! on `scheduler.next()`, executes through the downloader, and reports
//! back with `scheduler.complete()`; terminal results flow out on two
//! bounded channels. When the frontier drains (or the crawl is shut
//! down) every worker sees the finished sentinel, drops its channel
//! senders, and the receivers close, so consumers need no separate
//! end-of-crawl signal.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::circuit_breaker::BreakerStats;
use crate::config::CrawlConfig;
use crate::downloader::Downloader;
use crate::error::CrawlError;
use crate::events::{CrawlObserver, NoopObserver};
use crate::hosts::HostRegistry;
use crate::request::Request;
use crate::response::{CrawlFailure, Response};
use crate::scheduler::{Completion, Scheduler, SchedulerStats};
use crate::traits::Fetcher;

const RESULT_CHANNEL_CAPACITY: usize = 128;

/// Builder for a crawl run.
pub struct Crawler<F: Fetcher> {
    config: CrawlConfig,
    fetcher: F,
    observer: Arc<dyn CrawlObserver>,
}

impl<F: Fetcher + 'static> Crawler<F> {
    pub fn new(config: CrawlConfig, fetcher: F) -> Result<Self, CrawlError> {
        config.validate()?;
        Ok(Self {
            config,
            fetcher,
            observer: Arc::new(NoopObserver),
        })
    }

    pub fn with_observer(mut self, observer: Arc<dyn CrawlObserver>) -> Self {
        self.observer = observer;
        self
    }

    /// Spawn the worker pool.
    ///
    /// Returns a handle for feeding and controlling the crawl plus the
    /// two result streams. The channels are bounded, so a slow consumer
    /// backpressures the workers instead of growing memory.
    pub fn start(
        self,
    ) -> (
        CrawlHandle,
        mpsc::Receiver<Response>,
        mpsc::Receiver<CrawlFailure>,
    ) {
        let hosts = Arc::new(HostRegistry::new(&self.config));
        let scheduler = Arc::new(Scheduler::new(
            &self.config,
            Arc::clone(&hosts),
            Arc::clone(&self.observer),
        ));
        let downloader = Arc::new(Downloader::new(
            self.fetcher,
            Arc::clone(&hosts),
            self.config.clone(),
            Arc::clone(&self.observer),
        ));

        let (response_tx, response_rx) = mpsc::channel(RESULT_CHANNEL_CAPACITY);
        let (failure_tx, failure_rx) = mpsc::channel(RESULT_CHANNEL_CAPACITY);
        let cancel = CancellationToken::new();

        let mut workers = Vec::with_capacity(self.config.worker_count);
        for worker_id in 0..self.config.worker_count {
            workers.push(tokio::spawn(worker_loop(
                worker_id,
                Arc::clone(&scheduler),
                Arc::clone(&downloader),
                cancel.clone(),
                response_tx.clone(),
                failure_tx.clone(),
            )));
        }
        tracing::info!(workers = self.config.worker_count, "Crawl started");

        let handle = CrawlHandle {
            scheduler,
            hosts,
            cancel,
            workers,
        };
        (handle, response_rx, failure_rx)
    }
}

async fn worker_loop<F: Fetcher>(
    worker_id: usize,
    scheduler: Arc<Scheduler>,
    downloader: Arc<Downloader<F>>,
    cancel: CancellationToken,
    response_tx: mpsc::Sender<Response>,
    failure_tx: mpsc::Sender<CrawlFailure>,
) {
    loop {
        let request = tokio::select! {
            _ = cancel.cancelled() => break,
            next = scheduler.next() => match next {
                Some(request) => request,
                None => break,
            },
        };

        tracing::trace!(worker = worker_id, url = %request.url, "Executing request");
        // The in-flight execution runs to completion even under
        // cancellation; it is timeout-bounded, and completing it keeps
        // the frontier's in-flight accounting exact.
        let outcome = downloader.execute(request).await;
        match scheduler.complete(outcome) {
            Some(Completion::Fetched(response)) => {
                if response_tx.send(response).await.is_err() {
                    tracing::debug!(worker = worker_id, "Response consumer gone");
                }
            }
            Some(Completion::Failed(failure)) => {
                if failure_tx.send(failure).await.is_err() {
                    tracing::debug!(worker = worker_id, "Failure consumer gone");
                }
            }
            None => {}
        }
    }
    tracing::debug!(worker = worker_id, "Worker finished");
}

/// Live controls for a started crawl.
pub struct CrawlHandle {
    scheduler: Arc<Scheduler>,
    hosts: Arc<HostRegistry>,
    cancel: CancellationToken,
    workers: Vec<JoinHandle<()>>,
}

impl CrawlHandle {
    /// Feed a request into the frontier. Pages discovered mid-crawl go
    /// through here too.
    pub fn enqueue(&self, request: Request) -> Result<bool, CrawlError> {
        self.scheduler.enqueue(request)
    }

    pub fn stats(&self) -> SchedulerStats {
        self.scheduler.stats()
    }

    pub fn breaker_stats(&self) -> Vec<BreakerStats> {
        self.hosts.breaker_stats()
    }

    /// Stop the crawl: idle workers exit immediately, in-flight requests
    /// finish their current execution, queued requests are abandoned.
    pub fn shutdown(&self) {
        tracing::info!("Crawl shutdown requested");
        self.cancel.cancel();
        self.scheduler.shutdown();
    }

    /// Wait for every worker to exit. Resolves after the frontier drains
    /// or after [`shutdown`](Self::shutdown).
    pub async fn join(self) {
        for worker in self.workers {
            if let Err(error) = worker.await {
                tracing::error!(%error, "Worker task panicked");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::MockFetcher;
    use url::Url;

    fn req(url: &str) -> Request {
        Request::get(Url::parse(url).unwrap())
    }

    #[tokio::test]
    async fn crawl_drains_and_workers_exit() {
        let config = CrawlConfig::default().with_worker_count(4);
        let crawler = Crawler::new(config, MockFetcher::always_status(200)).unwrap();
        let (handle, mut responses, _failures) = crawler.start();

        for i in 0..10 {
            handle.enqueue(req(&format!("https://example.com/{i}"))).unwrap();
        }

        let mut seen = 0;
        while let Some(response) = responses.recv().await {
            assert_eq!(response.status, 200);
            seen += 1;
        }
        assert_eq!(seen, 10);
        handle.join().await;
    }

    #[tokio::test]
    async fn shutdown_stops_idle_workers() {
        let config = CrawlConfig::default().with_worker_count(2);
        let crawler = Crawler::new(config, MockFetcher::always_status(200)).unwrap();
        let (handle, _responses, _failures) = crawler.start();

        handle.enqueue(req("https://example.com/seed")).unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        handle.shutdown();

        tokio::time::timeout(std::time::Duration::from_secs(1), handle.join())
            .await
            .expect("workers exit promptly after shutdown");
    }

    #[tokio::test]
    async fn invalid_config_is_rejected_at_build() {
        let config = CrawlConfig::default().with_worker_count(0);
        let result = Crawler::new(config, MockFetcher::always_status(200));
        assert!(matches!(result, Err(CrawlError::InvalidConfig(_))));
    }
}
