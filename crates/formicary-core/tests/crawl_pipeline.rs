//! End-to-end crawl runs against a scripted fetcher: frontier to worker
//! pool to result channels, with real breaker, gate, and retry behavior.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use formicary_core::testutil::{MockFetcher, MockReply};
use formicary_core::{
    BreakerConfig, CrawlConfig, CrawlError, CrawlFailure, CrawlObserver, Crawler, Request,
    Response, RetryPolicy,
};
use url::Url;

fn req(url: &str) -> Request {
    Request::get(Url::parse(url).unwrap())
}

/// RUST_LOG-controlled log output for debugging test runs.
fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
}

/// Default config with delays shrunk so tests finish fast.
fn fast_config() -> CrawlConfig {
    let mut config = CrawlConfig::default();
    config.retry = RetryPolicy {
        base: Duration::from_millis(10),
        multiplier: 2.0,
        cap: Duration::from_millis(100),
        jitter: Duration::ZERO,
    };
    config.breaker = BreakerConfig {
        failure_threshold: 2,
        recovery_timeout: Duration::from_millis(50),
        reset_on_http_success: true,
    };
    config.request_timeout = Duration::from_secs(2);
    config
}

async fn run_to_completion(
    crawler: Crawler<MockFetcher>,
    seeds: Vec<Request>,
) -> (Vec<Response>, Vec<CrawlFailure>) {
    let (handle, mut response_rx, mut failure_rx) = crawler.start();
    for seed in seeds {
        handle.enqueue(seed).unwrap();
    }

    let collector = tokio::spawn(async move {
        let mut responses = Vec::new();
        let mut failures = Vec::new();
        loop {
            tokio::select! {
                next = response_rx.recv() => match next {
                    Some(response) => responses.push(response),
                    None => break,
                },
                next = failure_rx.recv() => if let Some(failure) = next {
                    failures.push(failure);
                },
            }
        }
        while let Some(failure) = failure_rx.recv().await {
            failures.push(failure);
        }
        (responses, failures)
    });

    tokio::time::timeout(Duration::from_secs(10), handle.join())
        .await
        .expect("crawl terminates");
    collector.await.unwrap()
}

#[tokio::test]
async fn crawl_visits_every_unique_url_once() {
    init_tracing();
    let fetcher = MockFetcher::always_status(200);
    let crawler = Crawler::new(fast_config(), fetcher.clone()).unwrap();

    let mut seeds = Vec::new();
    for i in 0..20 {
        seeds.push(req(&format!("https://example.com/page/{i}")));
    }
    // Every URL seeded twice; dedup must collapse the second copy.
    for i in 0..20 {
        seeds.push(req(&format!("https://example.com/page/{i}")));
    }

    let (responses, failures) = run_to_completion(crawler, seeds).await;
    assert_eq!(responses.len(), 20);
    assert!(failures.is_empty());
    assert_eq!(fetcher.calls(), 20);

    let mut urls = fetcher.fetched_urls();
    urls.sort();
    urls.dedup();
    assert_eq!(urls.len(), 20);
}

#[tokio::test]
async fn concurrent_discovery_of_same_url_fetches_once() {
    let fetcher = MockFetcher::always_status(200);
    let crawler = Crawler::new(fast_config(), fetcher.clone()).unwrap();
    let (handle, mut response_rx, _failure_rx) = crawler.start();
    let handle = Arc::new(handle);

    let mut tasks = Vec::new();
    for _ in 0..16 {
        let handle = Arc::clone(&handle);
        tasks.push(tokio::spawn(async move {
            handle.enqueue(req("https://example.com/contended")).unwrap()
        }));
    }
    let mut admitted = 0;
    for task in tasks {
        if task.await.unwrap() {
            admitted += 1;
        }
    }
    assert_eq!(admitted, 1);

    let response = response_rx.recv().await.unwrap();
    assert_eq!(response.request.url.path(), "/contended");
    assert_eq!(fetcher.calls(), 1);

    let handle = Arc::into_inner(handle).unwrap();
    handle.join().await;
}

#[tokio::test]
async fn per_host_concurrency_is_respected_under_load() {
    let mut config = fast_config();
    config.per_host_concurrency = 2;
    config.worker_count = 8;

    let fetcher = MockFetcher::always_status(200).with_latency(Duration::from_millis(30));
    let crawler = Crawler::new(config, fetcher.clone()).unwrap();

    let seeds = (0..6)
        .map(|i| req(&format!("https://single-host.com/{i}")))
        .collect();
    let (responses, _) = run_to_completion(crawler, seeds).await;

    assert_eq!(responses.len(), 6);
    assert!(
        fetcher.max_concurrency() <= 2,
        "observed {} concurrent fetches",
        fetcher.max_concurrency()
    );
}

#[tokio::test]
async fn transient_failures_recover_within_retry_budget() {
    let mut config = fast_config();
    config.worker_count = 1;
    // Two failures then success; threshold is 2 so keep it from tripping.
    config.breaker.failure_threshold = 5;

    let fetcher = MockFetcher::always_status(200)
        .with_script([MockReply::ConnectError, MockReply::ConnectError]);
    let crawler = Crawler::new(config, fetcher.clone()).unwrap();

    let (responses, failures) =
        run_to_completion(crawler, vec![req("https://flaky.com/page")]).await;

    assert!(failures.is_empty());
    assert_eq!(responses.len(), 1);
    assert_eq!(responses[0].request.retry_count, 2);
    assert_eq!(fetcher.calls(), 3);
}

#[tokio::test]
async fn persistent_failure_exhausts_and_terminates() {
    let mut config = fast_config();
    config.max_retries = 2;

    let fetcher = MockFetcher::always_connect_error();
    let crawler = Crawler::new(config, fetcher).unwrap();

    let (responses, failures) =
        run_to_completion(crawler, vec![req("https://down.com/page")]).await;

    assert!(responses.is_empty());
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].retries, 2);
}

#[tokio::test]
async fn open_breaker_isolates_sick_host_from_healthy_one() {
    init_tracing();
    let mut config = fast_config();
    config.max_retries = 3;
    config.worker_count = 4;

    let fetcher =
        MockFetcher::always_status(200).with_host_reply("down.com", MockReply::ConnectError);
    let crawler = Crawler::new(config, fetcher.clone()).unwrap();

    let mut seeds = Vec::new();
    for i in 0..4 {
        seeds.push(req(&format!("https://down.com/{i}")));
    }
    for i in 0..8 {
        seeds.push(req(&format!("https://healthy.com/{i}")));
    }

    let (responses, failures) = run_to_completion(crawler, seeds).await;

    // Every healthy request completed, every sick one failed terminally.
    assert_eq!(responses.len(), 8);
    assert!(responses.iter().all(|r| r.request.url.host_str() == Some("healthy.com")));
    assert_eq!(failures.len(), 4);
    assert!(failures.iter().all(|f| f.request.url.host_str() == Some("down.com")));
    assert!(failures.iter().all(|f| matches!(
        f.error,
        CrawlError::Connect(_) | CrawlError::BreakerOpen { .. }
    )));
}

#[tokio::test]
async fn shutdown_is_prompt_with_work_still_queued() {
    let mut config = fast_config();
    config.worker_count = 2;

    let fetcher = MockFetcher::always_status(200).with_latency(Duration::from_millis(20));
    let crawler = Crawler::new(config, fetcher).unwrap();
    let (handle, _response_rx, _failure_rx) = crawler.start();

    for i in 0..100 {
        handle.enqueue(req(&format!("https://example.com/{i}"))).unwrap();
    }
    tokio::time::sleep(Duration::from_millis(30)).await;
    handle.shutdown();

    tokio::time::timeout(Duration::from_secs(2), handle.join())
        .await
        .expect("workers exit promptly; queued work is abandoned");
}

#[derive(Default)]
struct RecordingObserver {
    events: Mutex<Vec<String>>,
}

impl RecordingObserver {
    fn events(&self) -> Vec<String> {
        self.events.lock().unwrap().clone()
    }

    fn push(&self, event: impl Into<String>) {
        self.events.lock().unwrap().push(event.into());
    }
}

impl CrawlObserver for RecordingObserver {
    fn request_scheduled(&self, request: &Request) {
        self.push(format!("scheduled {}", request.url.path()));
    }

    fn request_started(&self, request: &Request) {
        self.push(format!("started {}", request.url.path()));
    }

    fn request_succeeded(&self, response: &Response) {
        self.push(format!("succeeded {}", response.request.url.path()));
    }

    fn request_retried(&self, request: &Request, _reason: &CrawlError, _delay: Duration) {
        self.push(format!("retried {}", request.url.path()));
    }

    fn request_exhausted(&self, failure: &CrawlFailure) {
        self.push(format!("exhausted {}", failure.request.url.path()));
    }

    fn breaker_opened(&self, host: &str) {
        self.push(format!("breaker_opened {host}"));
    }
}

#[tokio::test]
async fn observer_sees_the_request_lifecycle() {
    let observer = Arc::new(RecordingObserver::default());
    let mut config = fast_config();
    config.worker_count = 1;
    config.max_retries = 1;

    let fetcher =
        MockFetcher::always_status(200).with_script([MockReply::ConnectError]);
    let crawler = Crawler::new(config, fetcher)
        .unwrap()
        .with_observer(Arc::clone(&observer) as Arc<dyn CrawlObserver>);

    let (responses, failures) = run_to_completion(crawler, vec![req("https://example.com/a")]).await;
    assert_eq!(responses.len(), 1);
    assert!(failures.is_empty());

    let events = observer.events();
    assert_eq!(
        events,
        vec![
            "scheduled /a",
            "started /a",
            "retried /a",
            "started /a",
            "succeeded /a",
        ]
    );
}

#[tokio::test]
async fn breaker_opening_is_reported_once() {
    let observer = Arc::new(RecordingObserver::default());
    let mut config = fast_config();
    config.max_retries = 2;
    config.worker_count = 1;

    let crawler = Crawler::new(config, MockFetcher::always_connect_error())
        .unwrap()
        .with_observer(Arc::clone(&observer) as Arc<dyn CrawlObserver>);

    let seeds = (0..3).map(|i| req(&format!("https://down.com/{i}"))).collect();
    let (_, failures) = run_to_completion(crawler, seeds).await;
    assert_eq!(failures.len(), 3);

    let opened = observer
        .events()
        .iter()
        .filter(|e| e.starts_with("breaker_opened"))
        .count();
    assert!(opened >= 1);
}

#[tokio::test]
async fn host_delay_spaces_out_requests() {
    let mut config = fast_config();
    config.worker_count = 4;
    config.host_delay = Duration::from_millis(40);

    let crawler = Crawler::new(config, MockFetcher::always_status(200)).unwrap();
    let seeds = (0..4).map(|i| req(&format!("https://polite.com/{i}"))).collect();

    let started = std::time::Instant::now();
    let (responses, _) = run_to_completion(crawler, seeds).await;
    assert_eq!(responses.len(), 4);
    // 4 dispatches with 40ms spacing need at least 3 gaps.
    assert!(started.elapsed() >= Duration::from_millis(120));
}
