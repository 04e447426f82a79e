//! Request frontier: priority ordering, duplicate suppression, per-host
//! eligibility, and crawl termination.
//!
//! The frontier is owned exclusively by the scheduler; workers reach it
//! only through `enqueue` / `next` / `complete`. `next()` suspends on a
//! wake-channel (no polling loop) until a request becomes eligible, and
//! resolves to `None` (the finished sentinel) for every waiter once the
//! frontier is empty with nothing in flight.

use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::Notify;
use tokio::time::Instant;

use crate::config::CrawlConfig;
use crate::downloader::Outcome;
use crate::error::CrawlError;
use crate::events::CrawlObserver;
use crate::hosts::HostRegistry;
use crate::request::Request;
use crate::response::{CrawlFailure, Response};

/// One frontier entry. Ordered by (priority, insertion sequence), both
/// ascending, so equal priorities dequeue FIFO.
struct QueuedRequest {
    request: Request,
    seq: u64,
    /// Retries are not eligible before this instant.
    not_before: Option<Instant>,
}

impl Ord for QueuedRequest {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reversed: BinaryHeap is a max-heap, lower (priority, seq) wins.
        other
            .request
            .priority
            .cmp(&self.request.priority)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

impl PartialOrd for QueuedRequest {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for QueuedRequest {
    fn eq(&self, other: &Self) -> bool {
        self.request.priority == other.request.priority && self.seq == other.seq
    }
}

impl Eq for QueuedRequest {}

/// What a finished execution produced for the caller, if anything.
/// Retries are consumed internally by re-queueing.
#[derive(Debug)]
pub enum Completion {
    Fetched(Response),
    Failed(CrawlFailure),
}

/// Frontier counters, snapshotted under the lock.
#[derive(Debug, Clone, Default)]
pub struct SchedulerStats {
    pub scheduled: u64,
    pub deduplicated: u64,
    pub retried: u64,
    pub completed: u64,
    pub exhausted: u64,
    pub queued: usize,
    pub in_flight: usize,
}

#[derive(Default)]
struct Frontier {
    heap: BinaryHeap<QueuedRequest>,
    seen: HashSet<String>,
    in_flight: usize,
    next_seq: u64,
    shutdown: bool,
    /// Becomes true on the first admission. An empty frontier only reads
    /// as finished after it has held work at least once, so workers that
    /// start before the seeds land do not exit immediately.
    seeded: bool,

    scheduled: u64,
    deduplicated: u64,
    retried: u64,
    completed: u64,
    exhausted: u64,
}

enum Poll {
    Ready(Request),
    Finished,
    /// Nothing eligible; re-check after the bound (earliest retry
    /// eligibility or breaker recovery), or on the next wake.
    Wait(Option<Duration>),
}

pub struct Scheduler {
    state: Mutex<Frontier>,
    notify: Notify,
    hosts: Arc<HostRegistry>,
    capacity: usize,
    default_max_retries: u32,
    observer: Arc<dyn CrawlObserver>,
}

impl Scheduler {
    pub fn new(
        config: &CrawlConfig,
        hosts: Arc<HostRegistry>,
        observer: Arc<dyn CrawlObserver>,
    ) -> Self {
        Self {
            state: Mutex::new(Frontier::default()),
            notify: Notify::new(),
            hosts,
            capacity: config.queue_capacity,
            default_max_retries: config.max_retries,
            observer,
        }
    }

    fn lock_state(&self) -> std::sync::MutexGuard<'_, Frontier> {
        self.state.lock().unwrap_or_else(|poisoned| {
            tracing::warn!("Recovered from poisoned frontier mutex");
            poisoned.into_inner()
        })
    }

    /// Admit a request to the frontier.
    ///
    /// `Ok(false)` if the request's dedup key has been seen before
    /// (idempotent no-op) or the crawl is shutting down;
    /// `Err(QueueCapacity)` if the frontier is full. The seen-set check
    /// and insert happen under one lock, so concurrent discoveries of the
    /// same URL collapse to a single admission.
    pub fn enqueue(&self, request: Request) -> Result<bool, CrawlError> {
        let admitted = {
            let mut state = self.lock_state();
            if state.shutdown {
                return Ok(false);
            }
            // Dedup before the capacity check: a re-discovered URL is a
            // no-op even when the frontier is full. Rejected requests must
            // not leave their key in the seen-set, so insert only after
            // capacity clears.
            if request.dedup && state.seen.contains(&request.dedup_key()) {
                state.deduplicated += 1;
                tracing::trace!(url = %request.url, "Duplicate request suppressed");
                return Ok(false);
            }
            if self.capacity > 0 && state.heap.len() >= self.capacity {
                tracing::warn!(url = %request.url, "Frontier at capacity, rejecting request");
                return Err(CrawlError::QueueCapacity);
            }
            if request.dedup {
                state.seen.insert(request.dedup_key());
            }

            let snapshot = request.clone();
            let seq = state.next_seq;
            state.next_seq += 1;
            state.scheduled += 1;
            state.seeded = true;
            state.heap.push(QueuedRequest {
                request,
                seq,
                not_before: None,
            });
            snapshot
        };

        self.observer.request_scheduled(&admitted);
        self.notify.notify_waiters();
        Ok(true)
    }

    /// Pull the next eligible request, suspending until one exists.
    ///
    /// Returns `None` once the crawl is finished (frontier empty, nothing
    /// in flight) or shut down; every concurrent and future caller gets
    /// the same sentinel. A request whose host is breaker-open or
    /// slot-saturated stays queued and never blocks other hosts behind it.
    pub async fn next(&self) -> Option<Request> {
        loop {
            // Register for wakeups before inspecting state, so a wake
            // between the check and the await is not lost.
            let notified = self.notify.notified();
            match self.poll_frontier() {
                Poll::Ready(request) => return Some(request),
                Poll::Finished => {
                    // Chain the wake so every sibling waiter also exits.
                    self.notify.notify_waiters();
                    return None;
                }
                Poll::Wait(Some(bound)) => {
                    tokio::select! {
                        _ = notified => {}
                        _ = tokio::time::sleep(bound) => {}
                    }
                }
                Poll::Wait(None) => notified.await,
            }
        }
    }

    fn poll_frontier(&self) -> Poll {
        let mut state = self.lock_state();
        if state.shutdown || (state.seeded && state.heap.is_empty() && state.in_flight == 0) {
            return Poll::Finished;
        }

        let now = Instant::now();
        let mut skipped = Vec::new();
        let mut found = None;
        let mut recheck_at: Option<Instant> = None;

        // Scan in (priority, seq) order; an ineligible entry goes to the
        // side so lower-priority entries for other hosts still get served.
        while let Some(entry) = state.heap.pop() {
            if let Some(at) = entry.not_before
                && at > now
            {
                recheck_at = Some(recheck_at.map_or(at, |cur| cur.min(at)));
                skipped.push(entry);
                continue;
            }

            match entry.request.host_key() {
                Some(host) if !self.hosts.is_dispatchable(&host) => {
                    if let Some(host_state) = self.hosts.get(&host)
                        && let Some(retry_after) = host_state.breaker.retry_after()
                    {
                        let at = now + retry_after;
                        recheck_at = Some(recheck_at.map_or(at, |cur| cur.min(at)));
                    }
                    skipped.push(entry);
                }
                _ => {
                    found = Some(entry.request);
                    break;
                }
            }
        }

        for entry in skipped {
            state.heap.push(entry);
        }

        match found {
            Some(request) => {
                state.in_flight += 1;
                Poll::Ready(request)
            }
            None => Poll::Wait(
                recheck_at.map(|at| at.saturating_duration_since(now).max(Duration::from_millis(1))),
            ),
        }
    }

    /// Report the outcome of an execution.
    ///
    /// `Retry` re-admits with an incremented retry count and a not-before
    /// delay; a spent budget degrades to a terminal failure instead, so
    /// exhaustion is never silent. Returns what, if anything, the caller
    /// should forward downstream.
    pub fn complete(&self, outcome: Outcome) -> Option<Completion> {
        let result = match outcome {
            Outcome::Success(response) => {
                let mut state = self.lock_state();
                state.in_flight -= 1;
                state.completed += 1;
                Some(Completion::Fetched(response))
            }
            Outcome::Exhausted(failure) => {
                let mut state = self.lock_state();
                state.in_flight -= 1;
                state.exhausted += 1;
                Some(Completion::Failed(failure))
            }
            Outcome::Retry {
                mut request,
                reason,
                delay,
            } => {
                if request.can_retry(self.default_max_retries) {
                    request.retry_count += 1;
                    let snapshot = request.clone();
                    {
                        let mut state = self.lock_state();
                        state.in_flight -= 1;
                        state.retried += 1;
                        let seq = state.next_seq;
                        state.next_seq += 1;
                        state.heap.push(QueuedRequest {
                            request,
                            seq,
                            not_before: Some(Instant::now() + delay),
                        });
                    }
                    self.observer.request_retried(&snapshot, &reason, delay);
                    None
                } else {
                    let mut state = self.lock_state();
                    state.in_flight -= 1;
                    state.exhausted += 1;
                    Some(Completion::Failed(CrawlFailure {
                        retries: request.retry_count,
                        request,
                        error: reason,
                    }))
                }
            }
        };

        // New work, a freed host slot, or possible termination: either
        // way the waiters must re-check.
        self.notify.notify_waiters();
        result
    }

    /// Stop the crawl: `next()` resolves to the finished sentinel for all
    /// current and future callers. In-flight executions are unaffected.
    pub fn shutdown(&self) {
        self.lock_state().shutdown = true;
        self.notify.notify_waiters();
    }

    pub fn stats(&self) -> SchedulerStats {
        let state = self.lock_state();
        SchedulerStats {
            scheduled: state.scheduled,
            deduplicated: state.deduplicated,
            retried: state.retried,
            completed: state.completed,
            exhausted: state.exhausted,
            queued: state.heap.len(),
            in_flight: state.in_flight,
        }
    }
}
