//! Scheduler contract and an in-memory reference implementation.
//!
//! The engine depends only on the [`Scheduler`] trait; a persistent or
//! distributed scheduler can be dropped in without the engine or scraper
//! noticing, as long as `close` re-enqueues whatever was in flight so a
//! resumable implementation has something to resume from.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::http::Request;
use crate::stats::Stats;

#[async_trait]
pub trait Scheduler: Send + Sync {
    /// Enqueue a request. Returns `false` if a filtering policy (dedup,
    /// depth limit, anything layered on top of this trait) rejected it;
    /// the core itself applies no such policy and always returns `true`.
    async fn enqueue(&self, request: Request) -> bool;

    /// Pop the next request to download, if any is ready.
    async fn next(&self) -> Option<Request>;

    fn has_pending_requests(&self) -> bool;

    /// Mark `request` as no longer in flight (it either produced a
    /// response or exhausted retries). Schedulers that track an
    /// in-progress set for resumability use this to clear it.
    async fn mark_done(&self, request: &Request);

    /// Close the scheduler. A persistent implementation re-enqueues
    /// whatever requests were marked in-progress but never reached
    /// `mark_done`, so a future run can resume where this one left off.
    async fn close(&self);
}

#[derive(Debug, Clone)]
struct PrioritizedRequest {
    request: Request,
    sequence: u64,
}

impl PartialEq for PrioritizedRequest {
    fn eq(&self, other: &Self) -> bool {
        self.request.priority == other.request.priority && self.sequence == other.sequence
    }
}
impl Eq for PrioritizedRequest {}

impl Ord for PrioritizedRequest {
    fn cmp(&self, other: &Self) -> Ordering {
        // Higher priority first; within equal priority, FIFO (earlier
        // sequence number first), so we reverse sequence since
        // `BinaryHeap` is a max-heap.
        self.request
            .priority
            .cmp(&other.request.priority)
            .then_with(|| other.sequence.cmp(&self.sequence))
    }
}
impl PartialOrd for PrioritizedRequest {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Simple in-process priority queue. Not persistent; `close` just logs the
/// count of abandoned in-progress requests since there is nowhere durable
/// to put them.
pub struct MemoryScheduler {
    inner: Mutex<Inner>,
    stats: Arc<Stats>,
}

struct Inner {
    heap: BinaryHeap<PrioritizedRequest>,
    in_progress: Vec<Request>,
    next_sequence: u64,
}

impl MemoryScheduler {
    pub fn new(stats: Arc<Stats>) -> Self {
        Self {
            inner: Mutex::new(Inner {
                heap: BinaryHeap::new(),
                in_progress: Vec::new(),
                next_sequence: 0,
            }),
            stats,
        }
    }
}

#[async_trait]
impl Scheduler for MemoryScheduler {
    async fn enqueue(&self, request: Request) -> bool {
        let mut inner = self.inner.lock().await;
        let sequence = inner.next_sequence;
        inner.next_sequence += 1;
        inner.heap.push(PrioritizedRequest { request, sequence });
        self.stats.requests_scheduled.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        true
    }

    async fn next(&self) -> Option<Request> {
        let mut inner = self.inner.lock().await;
        let popped = inner.heap.pop().map(|p| p.request);
        if let Some(request) = &popped {
            inner.in_progress.push(request.clone());
        }
        popped
    }

    fn has_pending_requests(&self) -> bool {
        // `try_lock` avoids introducing an await point in a fn that other
        // call sites (idle checks) want to use synchronously.
        match self.inner.try_lock() {
            Ok(inner) => !inner.heap.is_empty(),
            Err(_) => true,
        }
    }

    async fn mark_done(&self, request: &Request) {
        let mut inner = self.inner.lock().await;
        if let Some(pos) = inner
            .in_progress
            .iter()
            .position(|r| r.url == request.url && r.priority == request.priority)
        {
            inner.in_progress.remove(pos);
        }
    }

    async fn close(&self) {
        let mut inner = self.inner.lock().await;
        let abandoned: Vec<Request> = inner.in_progress.drain(..).collect();
        if !abandoned.is_empty() {
            tracing::warn!(
                count = abandoned.len(),
                "scheduler closing with requests still in progress; re-enqueueing for a resumable scheduler to pick up"
            );
            for (i, request) in abandoned.into_iter().enumerate() {
                inner.heap.push(PrioritizedRequest {
                    request,
                    sequence: inner.next_sequence + i as u64,
                });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use url::Url;

    fn req(priority: i32) -> Request {
        Request::new(Url::parse("https://example.com").unwrap()).with_priority(priority)
    }

    #[tokio::test]
    async fn higher_priority_served_first() {
        let scheduler = MemoryScheduler::new(Arc::new(Stats::new()));
        scheduler.enqueue(req(0)).await;
        scheduler.enqueue(req(5)).await;
        scheduler.enqueue(req(-1)).await;

        assert_eq!(scheduler.next().await.unwrap().priority, 5);
        assert_eq!(scheduler.next().await.unwrap().priority, 0);
        assert_eq!(scheduler.next().await.unwrap().priority, -1);
        assert!(scheduler.next().await.is_none());
    }

    #[tokio::test]
    async fn equal_priority_is_fifo() {
        let scheduler = MemoryScheduler::new(Arc::new(Stats::new()));
        for i in 0..5 {
            scheduler
                .enqueue(req(0).with_meta("seq", serde_json::json!(i)))
                .await;
        }
        for i in 0..5 {
            let next = scheduler.next().await.unwrap();
            assert_eq!(next.meta.get("seq"), Some(&serde_json::json!(i)));
        }
    }

    #[tokio::test]
    async fn has_pending_requests_reflects_heap_state() {
        let scheduler = MemoryScheduler::new(Arc::new(Stats::new()));
        assert!(!scheduler.has_pending_requests());
        scheduler.enqueue(req(0)).await;
        assert!(scheduler.has_pending_requests());
        scheduler.next().await;
        assert!(!scheduler.has_pending_requests());
    }

    #[tokio::test]
    async fn close_reenqueues_requests_left_in_progress() {
        let scheduler = MemoryScheduler::new(Arc::new(Stats::new()));
        scheduler.enqueue(req(0)).await;
        let popped = scheduler.next().await.unwrap();
        assert!(!scheduler.has_pending_requests());

        // never marked done: close() must re-enqueue it for resumability.
        scheduler.close().await;
        assert!(scheduler.has_pending_requests());
        let resumed = scheduler.next().await.unwrap();
        assert_eq!(resumed.url, popped.url);
    }

    #[tokio::test]
    async fn mark_done_clears_in_progress_so_close_does_not_reenqueue() {
        let scheduler = MemoryScheduler::new(Arc::new(Stats::new()));
        scheduler.enqueue(req(0)).await;
        let popped = scheduler.next().await.unwrap();
        scheduler.mark_done(&popped).await;

        scheduler.close().await;
        assert!(!scheduler.has_pending_requests());
    }
}
