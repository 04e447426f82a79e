//! Per-host concurrency gate and the lazy host registry.
//!
//! Every distinct host (`scheme://host:port`) gets one [`HostState`]:
//! a [`CircuitBreaker`] and a [`HostGate`] bounding simultaneous in-flight
//! requests and enforcing a minimum inter-request delay. Entries are
//! created on first request to the host and live for the whole crawl.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::backoff::rand_jitter_ms;
use crate::circuit_breaker::{BreakerConfig, BreakerStats, CircuitBreaker};
use crate::config::CrawlConfig;

/// Concurrency slot plus politeness spacing for one host.
pub struct HostGate {
    host: String,
    semaphore: Arc<Semaphore>,
    limit: usize,

    /// Minimum delay between consecutive dispatches to this host.
    delay: Duration,

    /// Maximum random jitter added on top of `delay` (uniform [0, jitter]).
    jitter: Duration,

    /// When the last request to this host was dispatched.
    last_dispatch: Mutex<Option<Instant>>,
}

/// Held for the duration of one execution; dropping it releases the slot.
/// Release is therefore guaranteed on every exit path, including timeout
/// and cancellation.
pub struct GatePermit {
    _permit: OwnedSemaphorePermit,
}

impl HostGate {
    pub fn new(host: impl Into<String>, limit: usize, delay: Duration, jitter: Duration) -> Self {
        Self {
            host: host.into(),
            semaphore: Arc::new(Semaphore::new(limit)),
            limit,
            delay,
            jitter,
            last_dispatch: Mutex::new(None),
        }
    }

    /// Free slots right now. Zero means the host is at its limit.
    pub fn available(&self) -> usize {
        self.semaphore.available_permits()
    }

    /// Requests currently executing against this host.
    pub fn in_flight(&self) -> usize {
        self.limit - self.semaphore.available_permits()
    }

    /// Acquire a slot, then wait out the politeness delay.
    ///
    /// Suspends while the host is at its concurrency limit. The dispatch
    /// timestamp is stamped once the delay has elapsed, so concurrent
    /// acquirers space out rather than bunch up.
    pub async fn acquire(&self) -> GatePermit {
        let permit = self
            .semaphore
            .clone()
            .acquire_owned()
            .await
            .expect("host semaphore is never closed");

        self.wait_for_turn().await;
        GatePermit { _permit: permit }
    }

    fn effective_delay(&self) -> Duration {
        if self.jitter.is_zero() {
            return self.delay;
        }
        self.delay + Duration::from_millis(rand_jitter_ms(self.jitter.as_millis() as u64))
    }

    async fn wait_for_turn(&self) {
        if self.delay.is_zero() && self.jitter.is_zero() {
            return;
        }
        loop {
            let sleep_for = {
                let mut last = self
                    .last_dispatch
                    .lock()
                    .unwrap_or_else(|poisoned| poisoned.into_inner());

                match *last {
                    Some(at) => {
                        let required = self.effective_delay();
                        let elapsed = at.elapsed();
                        if elapsed < required {
                            required - elapsed
                        } else {
                            *last = Some(Instant::now());
                            return;
                        }
                    }
                    None => {
                        *last = Some(Instant::now());
                        return;
                    }
                }
            };
            // Lock dropped while sleeping so other hosts aren't blocked.
            tracing::debug!(
                host = %self.host,
                sleep_ms = %sleep_for.as_millis(),
                "Throttling request"
            );
            tokio::time::sleep(sleep_for).await;
        }
    }
}

/// Breaker plus gate for one host.
pub struct HostState {
    pub breaker: CircuitBreaker,
    pub gate: HostGate,
}

/// Owned collection of per-host state, keyed by `scheme://host:port`.
///
/// Passed as a handle into the downloader (admission, updates) and into
/// the scheduler (read-only eligibility checks). Not ambient global state.
pub struct HostRegistry {
    per_host_concurrency: usize,
    host_delay: Duration,
    host_delay_jitter: Duration,
    breaker_config: BreakerConfig,
    hosts: Mutex<HashMap<String, Arc<HostState>>>,
}

impl HostRegistry {
    pub fn new(config: &CrawlConfig) -> Self {
        Self {
            per_host_concurrency: config.per_host_concurrency,
            host_delay: config.host_delay,
            host_delay_jitter: config.host_delay_jitter,
            breaker_config: config.breaker.clone(),
            hosts: Mutex::new(HashMap::new()),
        }
    }

    /// State for `host_key`, created lazily on first sight.
    pub fn host(&self, host_key: &str) -> Arc<HostState> {
        let mut hosts = self
            .hosts
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        Arc::clone(hosts.entry(host_key.to_string()).or_insert_with(|| {
            tracing::debug!(host = %host_key, "Registering new host");
            Arc::new(HostState {
                breaker: CircuitBreaker::new(host_key, self.breaker_config.clone()),
                gate: HostGate::new(
                    host_key,
                    self.per_host_concurrency,
                    self.host_delay,
                    self.host_delay_jitter,
                ),
            })
        }))
    }

    /// State for `host_key` if it has been seen, without creating it.
    pub fn get(&self, host_key: &str) -> Option<Arc<HostState>> {
        let hosts = self
            .hosts
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        hosts.get(host_key).cloned()
    }

    /// Whether the scheduler may hand out a request for this host: the
    /// breaker admits dispatch and a concurrency slot is free. Unknown
    /// hosts are trivially eligible.
    pub fn is_dispatchable(&self, host_key: &str) -> bool {
        let existing = {
            let hosts = self
                .hosts
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            hosts.get(host_key).cloned()
        };
        match existing {
            Some(state) => state.breaker.is_dispatchable() && state.gate.available() > 0,
            None => true,
        }
    }

    /// Breaker snapshots for every host seen so far.
    pub fn breaker_stats(&self) -> Vec<BreakerStats> {
        let hosts = self
            .hosts
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        hosts.values().map(|state| state.breaker.stats()).collect()
    }
}
