//! Concurrency and resilience core of the formicary crawl pipeline.
//!
//! The pieces compose in one direction: [`Crawler`] spawns workers, each
//! worker pulls from the [`Scheduler`] frontier, executes through the
//! [`Downloader`] (per-host circuit breaker, concurrency gate, timeout,
//! retry policy), and reports the outcome back. Transport is abstracted
//! behind the [`Fetcher`] trait; a reqwest-backed implementation lives in
//! the companion client crate.

pub mod backoff;
pub mod circuit_breaker;
pub mod config;
pub mod crawler;
pub mod downloader;
pub mod error;
pub mod events;
pub mod hosts;
pub mod request;
pub mod response;
pub mod scheduler;
pub mod testutil;
pub mod traits;

pub use backoff::RetryPolicy;
pub use circuit_breaker::{Admission, BreakerConfig, BreakerStats, CircuitBreaker, CircuitState};
pub use config::CrawlConfig;
pub use crawler::{CrawlHandle, Crawler};
pub use downloader::{Downloader, Outcome};
pub use error::CrawlError;
pub use events::{CrawlObserver, NoopObserver, TracingObserver};
pub use hosts::{HostGate, HostRegistry, HostState};
pub use request::{Method, Request};
pub use response::{CrawlFailure, Response};
pub use scheduler::{Completion, Scheduler, SchedulerStats};
pub use traits::Fetcher;
