//! Downloader: per-host [`Slot`] scheduling with a global concurrency cap.
//!
//! Each host gets its own `Slot` tracking an active-request count, a
//! queue of requests waiting for a free transfer slot, and a download
//! delay applied between dispatches. A background task per slot drains
//! its queue; an idle-slot reaper removes slots that have had nothing
//! in flight for a while, so a long crawl doesn't accumulate one `Slot`
//! per host visited ever.
//!
//! REDESIGN: the source this was distilled from builds a brand new `Slot`
//! per request and leaves its real multi-slot-per-host map commented out.
//! This implementation keeps one persistent `Slot` per host for the
//! lifetime of the crawl, which is the design the source's own comments
//! describe as intended.

pub mod handler;

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};

use rand::Rng;
use tokio::sync::{oneshot, Mutex, Notify, RwLock, Semaphore};
use uuid::Uuid;

use crate::config::Settings;
use crate::error::{CrawlError, CrawlResult};
use crate::http::{Request, Response};
use crate::middleware::{DownloaderMiddlewareManager, RequestOutcome, ResponseOutcome};
use crate::stats::Stats;

use handler::DownloadHandler;

/// Shared state every `Slot`'s background task needs. Slots hold a
/// back-reference to this context rather than to the `Downloader` that
/// owns them, keeping the reference graph one-directional.
struct DownloaderContext {
    handler: Arc<dyn DownloadHandler>,
    middleware: Arc<DownloaderMiddlewareManager>,
    global_semaphore: Arc<Semaphore>,
    settings: Arc<Settings>,
    stats: Arc<Stats>,
}

struct QueuedRequest {
    request: Request,
    id: Uuid,
    responder: oneshot::Sender<CrawlResult<Response>>,
}

/// Per-host scheduling state. `concurrency` bounds how many requests for
/// this host may be in flight simultaneously; `delay` is applied between
/// dispatches (with optional jitter).
pub struct Slot {
    key: String,
    concurrency: usize,
    delay: Duration,
    randomize_delay: bool,
    ctx: Arc<DownloaderContext>,
    queue: Mutex<VecDeque<QueuedRequest>>,
    transferring: Mutex<HashSet<Uuid>>,
    lastseen: Mutex<Instant>,
    notify: Notify,
}

impl Slot {
    fn new(key: String, concurrency: usize, delay: Duration, randomize_delay: bool, ctx: Arc<DownloaderContext>) -> Arc<Self> {
        let slot = Arc::new(Self {
            key,
            concurrency,
            delay,
            randomize_delay,
            ctx,
            queue: Mutex::new(VecDeque::new()),
            transferring: Mutex::new(HashSet::new()),
            lastseen: Mutex::new(Instant::now()),
            notify: Notify::new(),
        });
        tokio::spawn(Slot::run(slot.clone()));
        slot
    }

    async fn free_transfer_slots(&self) -> usize {
        self.concurrency
            .saturating_sub(self.transferring.lock().await.len())
    }

    async fn is_idle(&self) -> bool {
        self.queue.lock().await.is_empty() && self.transferring.lock().await.is_empty()
    }

    fn jittered_delay(&self) -> Duration {
        if self.delay.is_zero() {
            return self.delay;
        }
        if !self.randomize_delay {
            return self.delay;
        }
        let mut rng = rand::thread_rng();
        let factor = rng.gen_range(
            crate::config::defaults::JITTER_LOW_FACTOR..=crate::config::defaults::JITTER_HIGH_FACTOR,
        );
        Duration::from_secs_f64(self.delay.as_secs_f64() * factor)
    }

    async fn enqueue(&self, request: Request, responder: oneshot::Sender<CrawlResult<Response>>) {
        let id = Uuid::new_v4();
        self.queue.lock().await.push_back(QueuedRequest { request, id, responder });
        self.notify.notify_one();
    }

    /// Background task: wakes on `notify`, drains as many queued requests
    /// as `free_transfer_slots` allows. When a per-host delay is
    /// configured, only one request is dispatched per wake before sleeping
    /// the delay and re-notifying itself, matching the one-dispatch-then-
    /// pace-out behavior a polite crawler needs.
    async fn run(self: Arc<Self>) {
        loop {
            self.notify.notified().await;
            self.clone().drain().await;
        }
    }

    async fn drain(self: Arc<Self>) {
        loop {
            if self.queue.lock().await.is_empty() {
                return;
            }
            if self.free_transfer_slots().await == 0 {
                return;
            }
            let queued = { self.queue.lock().await.pop_front() };
            let Some(queued) = queued else {
                return;
            };

            // Hold the global permit before counting this request as
            // transferring, not after: otherwise the sum of `transferring`
            // across every host's slot can run ahead of
            // `CONCURRENT_REQUESTS` while requests from several hosts all
            // sit waiting on the same global semaphore.
            let permit = match self.ctx.global_semaphore.clone().acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => {
                    let _ = queued.responder.send(Err(CrawlError::ShutdownRequested));
                    continue;
                }
            };

            self.transferring.lock().await.insert(queued.id);
            *self.lastseen.lock().await = Instant::now();

            let slot = self.clone();
            tokio::spawn(async move {
                let result = download_one(&slot.ctx, queued.request, permit).await;
                slot.transferring.lock().await.remove(&queued.id);
                *slot.lastseen.lock().await = Instant::now();
                let _ = queued.responder.send(result);
                slot.notify.notify_one();
            });

            if !self.delay.is_zero() {
                let wait = self.jittered_delay();
                tokio::time::sleep(wait).await;
                self.notify.notify_one();
                return;
            }
        }
    }
}

async fn download_one(
    ctx: &Arc<DownloaderContext>,
    request: Request,
    _permit: tokio::sync::OwnedSemaphorePermit,
) -> CrawlResult<Response> {
    let timeout = ctx.settings.download_timeout;
    match tokio::time::timeout(timeout, ctx.handler.download(&request)).await {
        Ok(Ok(response)) => {
            ctx.stats
                .responses_received
                .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
            ctx.stats
                .response_bytes
                .fetch_add(response.body.len() as u64, std::sync::atomic::Ordering::Relaxed);
            Ok(response)
        }
        Ok(Err(error)) => Err(error),
        Err(_elapsed) => Err(CrawlError::Transport {
            url: request.url.to_string(),
            source: anyhow::anyhow!("download timed out after {:?}", timeout),
        }),
    }
}

/// The Downloader: maintains one [`Slot`] per host, applies the downloader
/// middleware chain around every fetch, and enforces the process-wide
/// `CONCURRENT_REQUESTS` cap via a semaphore shared across all slots.
pub struct Downloader {
    settings: Arc<Settings>,
    ctx: Arc<DownloaderContext>,
    slots: RwLock<HashMap<String, Arc<Slot>>>,
}

impl Downloader {
    pub fn new(
        settings: Arc<Settings>,
        handler: Arc<dyn DownloadHandler>,
        middleware: Arc<DownloaderMiddlewareManager>,
        stats: Arc<Stats>,
    ) -> Arc<Self> {
        let ctx = Arc::new(DownloaderContext {
            handler,
            middleware,
            global_semaphore: Arc::new(Semaphore::new(settings.concurrent_requests)),
            settings: settings.clone(),
            stats,
        });
        let downloader = Arc::new(Self {
            settings,
            ctx,
            slots: RwLock::new(HashMap::new()),
        });
        tokio::spawn(Downloader::gc_loop(downloader.clone()));
        downloader
    }

    /// `true` once every slot's in-flight count has reached the process
    /// concurrency cap; the engine uses this to pace scheduling.
    pub fn needs_backout(&self) -> bool {
        self.ctx.global_semaphore.available_permits() == 0
    }

    /// `true` when nothing is queued or transferring in any slot. Used by
    /// the engine's idle predicate.
    pub async fn is_idle(&self) -> bool {
        for slot in self.slots.read().await.values() {
            if !slot.is_idle().await {
                return false;
            }
        }
        true
    }

    pub async fn open_spider(&self) -> anyhow::Result<()> {
        self.ctx.middleware.open_spider().await
    }

    pub async fn close_spider(&self) {
        self.ctx.middleware.close_spider().await
    }

    async fn get_or_create_slot(&self, key: &str) -> Arc<Slot> {
        if let Some(slot) = self.slots.read().await.get(key) {
            return slot.clone();
        }
        let mut slots = self.slots.write().await;
        if let Some(slot) = slots.get(key) {
            return slot.clone();
        }
        let slot = Slot::new(
            key.to_string(),
            self.settings.per_host_concurrency(),
            self.settings.download_delay,
            self.settings.randomize_download_delay,
            self.ctx.clone(),
        );
        slots.insert(key.to_string(), slot.clone());
        slot
    }

    /// Dispatch `request` through the per-host slot and return the raw
    /// transport result, with no middleware applied. Used by [`fetch`]
    /// as the innermost step of its request/response middleware loop.
    async fn dispatch_to_slot(&self, request: Request) -> CrawlResult<Response> {
        let key = request.slot_key().unwrap_or_default();
        let slot = self.get_or_create_slot(&key).await;
        let (tx, rx) = oneshot::channel();
        slot.enqueue(request, tx).await;
        rx.await.map_err(|_| CrawlError::ShutdownRequested)?
    }

    /// Fetch `request`, running it through the full downloader middleware
    /// chain. A `Retry` outcome from either the response or the exception
    /// chain restarts the whole chain from `process_request` with the
    /// replacement request, per the request-chain-restart design note.
    pub async fn fetch(&self, mut request: Request) -> CrawlResult<Response> {
        loop {
            let after_request = self.ctx.middleware.process_request(request.clone()).await?;

            let response_outcome = match after_request {
                RequestOutcome::Respond(response) => {
                    self.ctx.middleware.process_response(response).await?
                }
                RequestOutcome::Continue(continued) => {
                    request = continued;
                    match self.dispatch_to_slot(request.clone()).await {
                        Ok(response) => self.ctx.middleware.process_response(response).await?,
                        Err(error) => self.ctx.middleware.process_exception(&request, error).await?,
                    }
                }
            };

            match response_outcome {
                ResponseOutcome::Continue(response) => return Ok(response),
                ResponseOutcome::Retry(retry_request) => {
                    request = retry_request;
                    continue;
                }
            }
        }
    }

    async fn gc_loop(self: Arc<Self>) {
        let interval = Duration::from_secs(crate::config::defaults::SLOT_GC_INTERVAL_SECS);
        let idle_after = Duration::from_secs(crate::config::defaults::SLOT_GC_IDLE_SECS);
        loop {
            tokio::time::sleep(interval).await;
            let mut dead = Vec::new();
            for (key, slot) in self.slots.read().await.iter() {
                if slot.is_idle().await && slot.lastseen.lock().await.elapsed() > idle_after {
                    dead.push(key.clone());
                }
            }
            if !dead.is_empty() {
                let mut slots = self.slots.write().await;
                for key in dead {
                    slots.remove(&key);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::middleware::DownloaderMiddlewareManager;

    struct UnusedHandler;

    #[async_trait::async_trait]
    impl DownloadHandler for UnusedHandler {
        async fn download(&self, request: &Request) -> CrawlResult<Response> {
            Err(CrawlError::Transport {
                url: request.url.to_string(),
                source: anyhow::anyhow!("not called in this test"),
            })
        }
    }

    fn test_ctx() -> Arc<DownloaderContext> {
        Arc::new(DownloaderContext {
            handler: Arc::new(UnusedHandler),
            middleware: Arc::new(DownloaderMiddlewareManager::new(Vec::new())),
            global_semaphore: Arc::new(Semaphore::new(4)),
            settings: Arc::new(Settings::default()),
            stats: Arc::new(Stats::new()),
        })
    }

    #[tokio::test]
    async fn zero_delay_never_jitters() {
        let slot = Slot::new("host".into(), 2, Duration::ZERO, true, test_ctx());
        for _ in 0..20 {
            assert_eq!(slot.jittered_delay(), Duration::ZERO);
        }
    }

    #[tokio::test]
    async fn jitter_stays_within_half_to_one_and_a_half_times_delay() {
        let base = Duration::from_millis(100);
        let slot = Slot::new("host".into(), 2, base, true, test_ctx());
        for _ in 0..200 {
            let delay = slot.jittered_delay();
            assert!(delay >= base.mul_f64(0.5) && delay <= base.mul_f64(1.5));
        }
    }

    #[tokio::test]
    async fn no_randomization_returns_exact_delay() {
        let base = Duration::from_millis(100);
        let slot = Slot::new("host".into(), 2, base, false, test_ctx());
        for _ in 0..20 {
            assert_eq!(slot.jittered_delay(), base);
        }
    }

    #[tokio::test]
    async fn free_transfer_slots_tracks_concurrency_cap() {
        let slot = Slot::new("host".into(), 2, Duration::ZERO, false, test_ctx());
        assert_eq!(slot.free_transfer_slots().await, 2);
        slot.transferring.lock().await.insert(uuid::Uuid::new_v4());
        assert_eq!(slot.free_transfer_slots().await, 1);
        slot.transferring.lock().await.insert(uuid::Uuid::new_v4());
        assert_eq!(slot.free_transfer_slots().await, 0);
    }

    #[tokio::test]
    async fn needs_backout_reflects_global_semaphore_exhaustion() {
        let ctx = test_ctx();
        let downloader = Arc::new(Downloader {
            settings: ctx.settings.clone(),
            ctx: ctx.clone(),
            slots: RwLock::new(HashMap::new()),
        });
        assert!(!downloader.needs_backout());

        let _permits = ctx.global_semaphore.clone().acquire_many_owned(4).await.unwrap();
        assert!(downloader.needs_backout());
    }
}
