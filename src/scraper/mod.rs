//! Scraper: callback dispatch and item-pipeline fan-out, with byte-weighted
//! backpressure against the downloader outpacing callback processing.
//!
//! Grounded on the scraper's `Slot` bookkeeping: every queued response adds
//! its (floored) byte size to `active_size`; the size is released once the
//! response's callback and every item it yielded have finished processing.
//! `CONCURRENT_ITEMS` bounds how many yielded items are in the pipeline at
//! once, independent of how many responses are mid-callback.

use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::sync::{mpsc, Mutex, Notify, Semaphore};
use uuid::Uuid;

use crate::config::Settings;
use crate::error::CrawlError;
use crate::http::{Request, Response};
use crate::middleware::ItemPipelineManager;
use crate::signals::{Signal, SignalBus};
use crate::spider::{CallbackOutput, Spider};
use crate::stats::Stats;

struct QueuedResponse {
    response: Response,
    id: Uuid,
    weight: usize,
}

/// Backpressure and in-flight bookkeeping for the scraper.
struct ScraperSlot {
    queue: Mutex<VecDeque<QueuedResponse>>,
    active: Mutex<HashSet<Uuid>>,
    active_size: AtomicUsize,
    max_active_size: usize,
    notify: Notify,
}

impl ScraperSlot {
    fn new(max_active_size: usize) -> Self {
        Self {
            queue: Mutex::new(VecDeque::new()),
            active: Mutex::new(HashSet::new()),
            active_size: AtomicUsize::new(0),
            max_active_size,
            notify: Notify::new(),
        }
    }

    /// `true` once the queued+active weight exceeds the configured budget;
    /// the engine should stop pulling new responses in off the downloader
    /// until this clears.
    fn needs_backout(&self) -> bool {
        self.active_size.load(Ordering::Relaxed) > self.max_active_size
    }

    /// Idle means no queued response AND no response still being
    /// processed. A prior revision of this check only looked at one of
    /// the two, which let the engine close while a callback was still
    /// running.
    async fn is_idle(&self) -> bool {
        self.queue.lock().await.is_empty() && self.active.lock().await.is_empty()
    }
}

pub struct Scraper {
    slot: Arc<ScraperSlot>,
    spider: Arc<dyn Spider>,
    item_pipeline: Arc<ItemPipelineManager>,
    concurrent_items: Arc<Semaphore>,
    signals: Arc<SignalBus>,
    stats: Arc<Stats>,
    min_response_size: usize,
    new_requests: mpsc::UnboundedSender<Request>,
    /// Lets a callback's `CloseSpider` propagate to `engine::close` without
    /// the scraper holding a reference back to the `Engine` — the same
    /// sibling-channel pattern `new_requests` uses to route yielded
    /// requests without a cyclic reference.
    shutdown: mpsc::UnboundedSender<String>,
}

impl Scraper {
    pub fn new(
        settings: &Settings,
        spider: Arc<dyn Spider>,
        item_pipeline: Arc<ItemPipelineManager>,
        signals: Arc<SignalBus>,
        stats: Arc<Stats>,
        new_requests: mpsc::UnboundedSender<Request>,
        shutdown: mpsc::UnboundedSender<String>,
    ) -> Arc<Self> {
        Arc::new(Self {
            slot: Arc::new(ScraperSlot::new(settings.scraper_slot_max_active_size)),
            spider,
            item_pipeline,
            concurrent_items: Arc::new(Semaphore::new(settings.concurrent_items)),
            signals,
            stats,
            min_response_size: crate::config::defaults::MIN_RESPONSE_SIZE,
            new_requests,
            shutdown,
        })
    }

    pub fn needs_backout(&self) -> bool {
        self.slot.needs_backout()
    }

    pub async fn is_idle(&self) -> bool {
        self.slot.is_idle().await
    }

    /// Queue `response` for scraping and spawn its processing task. Adds
    /// the response's floored byte weight to `active_size` immediately, so
    /// a burst of large responses throttles the downloader even before any
    /// callback runs.
    pub async fn enqueue_scrape(self: Arc<Self>, response: Response) {
        let id = Uuid::new_v4();
        let weight = response.weight(self.min_response_size);
        self.slot.active_size.fetch_add(weight, Ordering::Relaxed);
        self.slot.active.lock().await.insert(id);
        self.slot
            .queue
            .lock()
            .await
            .push_back(QueuedResponse { response, id, weight });

        tokio::spawn(async move {
            let queued = {
                let mut q = self.slot.queue.lock().await;
                q.pop_front()
            };
            if let Some(queued) = queued {
                self.scrape(queued).await;
            }
        });
    }

    async fn scrape(self: Arc<Self>, queued: QueuedResponse) {
        let QueuedResponse { response, id, weight } = queued;
        let callback = response
            .request
            .callback
            .clone()
            .unwrap_or_else(|| "parse".to_string());

        let dispatch = self.spider.dispatch(&callback, response.clone()).await;

        let stream = match dispatch {
            Ok(stream) => stream,
            Err(error) => {
                self.handle_spider_error(error, &response).await;
                self.finish(id, weight).await;
                return;
            }
        };

        self.handle_spider_output(stream).await;
        self.finish(id, weight).await;
    }

    /// Drain every output a callback yields. `Request`s are forwarded to
    /// the engine unconditionally; `Item`s are dispatched to the item
    /// pipeline bounded by `CONCURRENT_ITEMS`, and this call waits for all
    /// of them to finish before returning so `finish` only releases the
    /// response's backpressure weight once every item it produced has
    /// either been scraped, dropped, or errored.
    async fn handle_spider_output(&self, mut stream: crate::spider::CallbackStream) {
        use futures::StreamExt;

        let mut item_tasks = Vec::new();
        while let Some(output) = stream.next().await {
            match output {
                Ok(CallbackOutput::Request(request)) => {
                    // `requests_scheduled` is bumped once the request
                    // actually reaches the scheduler (`Scheduler::enqueue`),
                    // not here, so a followup request is counted exactly
                    // once rather than once per hop.
                    let _ = self.new_requests.send(request);
                }
                Ok(CallbackOutput::Item(item)) => {
                    let permit = self.concurrent_items.clone().acquire_owned().await;
                    let pipeline = self.item_pipeline.clone();
                    let signals = self.signals.clone();
                    let stats = self.stats.clone();
                    item_tasks.push(tokio::spawn(async move {
                        let _permit = permit;
                        Self::itemproc_finished(pipeline, signals, stats, item).await;
                    }));
                }
                Err(error) => {
                    self.handle_spider_error_value(error).await;
                }
            }
        }

        for task in item_tasks {
            let _ = task.await;
        }
    }

    async fn itemproc_finished(
        pipeline: Arc<ItemPipelineManager>,
        signals: Arc<SignalBus>,
        stats: Arc<Stats>,
        item: serde_json::Value,
    ) {
        match pipeline.process_item(item.clone()).await {
            Ok(processed) => {
                stats.items_scraped.fetch_add(1, Ordering::Relaxed);
                signals
                    .send(Signal::ItemScraped {
                        item: Arc::new(processed),
                    })
                    .await;
            }
            Err(CrawlError::DropItem { reason, .. }) => {
                stats.items_dropped.fetch_add(1, Ordering::Relaxed);
                signals.send(Signal::ItemDropped { reason }).await;
            }
            Err(other) => {
                stats.errors.fetch_add(1, Ordering::Relaxed);
                signals
                    .send(Signal::ItemError {
                        error: other.to_string(),
                    })
                    .await;
            }
        }
    }

    async fn handle_spider_error(&self, error: CrawlError, response: &Response) {
        if let CrawlError::CloseSpider { reason } = &error {
            tracing::info!(reason = %reason, url = %response.url, "spider requested close from callback");
            // Route the close request to the engine rather than declaring
            // the crawl closed here: the scraper has no business emitting
            // the terminal `spider_closed` signal itself (that's `close`'s
            // job, and it must only fire once), so hand the reason off
            // through the sibling channel and let the engine drive its own
            // shutdown sequence.
            let _ = self.shutdown.send(reason.clone());
            return;
        }
        self.handle_spider_error_value(error).await;
    }

    async fn handle_spider_error_value(&self, error: CrawlError) {
        self.stats.errors.fetch_add(1, Ordering::Relaxed);
        tracing::error!(error = %error, "spider callback raised an error");
        self.signals
            .send(Signal::SpiderError {
                error: error.to_string(),
            })
            .await;
    }

    async fn finish(&self, id: Uuid, weight: usize) {
        self.slot.active.lock().await.remove(&id);
        self.slot.active_size.fetch_sub(weight, Ordering::Relaxed);
        self.slot.notify.notify_waiters();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn needs_backout_trips_only_once_budget_is_exceeded() {
        let slot = ScraperSlot::new(1000);
        assert!(!slot.needs_backout());

        slot.active_size.fetch_add(1000, Ordering::Relaxed);
        assert!(!slot.needs_backout(), "exactly at budget must not trip backout");

        slot.active_size.fetch_add(1, Ordering::Relaxed);
        assert!(slot.needs_backout());
    }

    #[tokio::test]
    async fn is_idle_requires_both_empty_queue_and_empty_active_set() {
        let slot = ScraperSlot::new(1000);
        assert!(slot.is_idle().await);

        let id = Uuid::new_v4();
        slot.active.lock().await.insert(id);
        assert!(
            !slot.is_idle().await,
            "a response still mid-callback must block idle even with an empty queue"
        );

        slot.active.lock().await.remove(&id);
        assert!(slot.is_idle().await);
    }
}
