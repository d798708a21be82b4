//! Execution Engine: the `_next_request` pull loop, idle detection, and
//! graceful shutdown. Grounded on the execution engine/slot source, with
//! three corrections called for by this crate's design:
//!
//! - the idle predicate's scraper check is "no queued AND no active work",
//!   not the inverted `queue or active` the source computes;
//! - `Slot`-style polled booleans are replaced by real channels/locks,
//!   since nothing here can assume a single-threaded event loop;
//! - exception middleware runs in the same reversed order as response
//!   middleware (see [`crate::middleware`]).
//!
//! Background tasks (the pump loop, the new-request drain, the heartbeat)
//! are spawned from free functions taking an owned `Arc<Engine>` rather
//! than methods on `self`, so each task can hold its own clone of the
//! engine for its whole lifetime.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use tokio::sync::Mutex;

use crate::crawler::Crawler;
use crate::error::CrawlError;
use crate::http::Request;
use crate::signals::Signal;
use crate::spider::CallbackOutput;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    Idle,
    Starting,
    Running,
    Closing,
    Closed,
}

/// Pulls requests from the scheduler, dispatches them through the
/// downloader, and routes responses to the scraper. Owns the crawl's
/// lifecycle state machine.
pub struct Engine {
    crawler: Arc<Crawler>,
    state: Mutex<EngineState>,
    in_progress: AtomicUsize,
    /// Guards the `_next_request` body against re-entrant invocation —
    /// the loop task and the "new request arrived" wakeups both want to
    /// drive it, but only one drive should run at a time.
    next_request_lock: Mutex<()>,
}

impl Engine {
    pub fn new(crawler: Arc<Crawler>) -> Arc<Self> {
        Arc::new(Self {
            crawler,
            state: Mutex::new(EngineState::Idle),
            in_progress: AtomicUsize::new(0),
            next_request_lock: Mutex::new(()),
        })
    }

    pub async fn state(&self) -> EngineState {
        *self.state.lock().await
    }

    /// Schedule `request`, counting it as in-progress from this point until
    /// its response (or error) has been fully handled. If a filtering
    /// scheduler rejects the request, emit `request_dropped` instead and
    /// never count it as in-progress — the request never reaches the
    /// Downloader, so nothing will ever forward a result for it.
    pub async fn crawl(&self, request: Request) {
        self.in_progress.fetch_add(1, Ordering::SeqCst);
        if self.crawler.scheduler.enqueue(request.clone()).await {
            self.crawler
                .signals
                .send(Signal::RequestScheduled {
                    request: Arc::new(request),
                })
                .await;
        } else {
            self.in_progress.fetch_sub(1, Ordering::SeqCst);
            self.crawler.stats.requests_dropped.fetch_add(1, Ordering::Relaxed);
            self.crawler
                .signals
                .send(Signal::RequestDropped {
                    request: Arc::new(request),
                })
                .await;
        }
    }

    /// `true` once there is no pending work anywhere in the pipeline: no
    /// scheduler requests, nothing in flight at the engine level, the
    /// downloader has nothing queued or transferring, and the scraper has
    /// no queued response and no response still being processed.
    async fn is_idle(&self) -> bool {
        !self.crawler.scheduler.has_pending_requests()
            && self.in_progress.load(Ordering::SeqCst) == 0
            && self.crawler.downloader.is_idle().await
            && self.crawler.scraper.is_idle().await
    }

    async fn handle_download_error(&self, request: Request, error: CrawlError) {
        if let Some(errback) = request.errback.clone() {
            match self
                .crawler
                .spider
                .dispatch_errback(&errback, &request, &error)
                .await
            {
                Ok(mut stream) => {
                    while let Some(output) = stream.next().await {
                        if let Ok(CallbackOutput::Request(next)) = output {
                            self.crawl(next).await;
                        }
                    }
                    return;
                }
                Err(dispatch_err) => {
                    tracing::error!(error = %dispatch_err, "errback dispatch failed");
                }
            }
        }

        tracing::warn!(url = %request.url, error = %error, "request failed with no errback");
        self.crawler.stats.errors.fetch_add(1, Ordering::Relaxed);
        self.crawler
            .signals
            .send(Signal::SpiderError {
                error: error.to_string(),
            })
            .await;
    }
}

/// Open the spider, seed its start requests, and spawn the pump,
/// new-request-drain, and heartbeat tasks. Returns once the spider is
/// open and the first pull loop iteration is scheduled; does not block
/// until the crawl finishes.
pub async fn start(engine: Arc<Engine>) -> anyhow::Result<()> {
    {
        let mut state = engine.state.lock().await;
        *state = EngineState::Starting;
    }

    engine.crawler.spider.open().await?;
    engine.crawler.downloader.open_spider().await?;
    engine.crawler.item_pipeline.open_spider().await?;

    engine.crawler.signals.send(Signal::EngineStarted).await;
    engine.crawler.signals.send(Signal::SpiderOpened).await;

    let mut seeds = engine.crawler.spider.start_requests();
    while let Some(request) = seeds.next().await {
        engine.crawl(request).await;
    }

    {
        let mut state = engine.state.lock().await;
        *state = EngineState::Running;
    }

    tokio::spawn(pump_loop(engine.clone()));
    tokio::spawn(drain_new_requests(engine.clone()));
    tokio::spawn(drain_shutdown_requests(engine.clone()));
    tokio::spawn(heartbeat_loop(engine.clone()));

    Ok(())
}

async fn drain_new_requests(engine: Arc<Engine>) {
    let mut rx = {
        let mut guard = engine.crawler.new_requests_rx.lock().await;
        guard.take().expect("drain_new_requests spawned twice")
    };
    while let Some(request) = rx.recv().await {
        engine.crawl(request).await;
    }
}

/// A callback raising `CloseSpider` reaches here via the scraper's
/// `shutdown` channel rather than the scraper calling `close` itself —
/// the scraper has no reference back to the engine (see [`crate::crawler`]).
async fn drain_shutdown_requests(engine: Arc<Engine>) {
    let mut rx = {
        let mut guard = engine.crawler.shutdown_rx.lock().await;
        guard.take().expect("drain_shutdown_requests spawned twice")
    };
    if let Some(reason) = rx.recv().await {
        close(engine, &reason).await;
    }
}

/// The non-reentrant pull loop. Runs until the engine transitions out of
/// `Running`.
async fn pump_loop(engine: Arc<Engine>) {
    loop {
        if engine.state().await != EngineState::Running {
            return;
        }
        next_request(&engine).await;
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
}

async fn next_request(engine: &Arc<Engine>) {
    let Ok(_guard) = engine.next_request_lock.try_lock() else {
        return; // a drive is already in flight
    };

    if engine.crawler.downloader.needs_backout() || engine.crawler.scraper.needs_backout() {
        maybe_close(engine).await;
        return;
    }

    match engine.crawler.scheduler.next().await {
        Some(request) => {
            tokio::spawn(dispatch(engine.clone(), request));
        }
        None => {
            maybe_close(engine).await;
        }
    }
}

async fn dispatch(engine: Arc<Engine>, request: Request) {
    let result = engine.crawler.downloader.fetch(request.clone()).await;
    engine.crawler.scheduler.mark_done(&request).await;

    match result {
        Ok(response) => {
            engine
                .crawler
                .signals
                .send(Signal::ResponseReceived {
                    response: Arc::new(response.clone()),
                })
                .await;
            engine.crawler.scraper.clone().enqueue_scrape(response).await;
        }
        Err(error) => engine.handle_download_error(request, error).await,
    }

    engine.in_progress.fetch_sub(1, Ordering::SeqCst);
}

async fn maybe_close(engine: &Arc<Engine>) {
    if !engine.is_idle().await {
        return;
    }
    if engine.crawler.signals.send(Signal::SpiderIdle).await {
        // A listener vetoed closure; stay running and check again on the
        // next pump tick.
        return;
    }
    close(engine.clone(), "finished").await;
}

async fn heartbeat_loop(engine: Arc<Engine>) {
    let interval = engine.crawler.settings.logstats_interval;
    loop {
        tokio::time::sleep(interval).await;
        if engine.state().await != EngineState::Running {
            return;
        }
        tracing::info!(stats = %engine.crawler.stats.logstats_line(), "heartbeat");
        maybe_close(&engine).await;
    }
}

/// Sequential close, one step per component, each step's failure logged
/// and swallowed so a broken pipeline doesn't stop the others from
/// shutting down.
pub async fn close(engine: Arc<Engine>, reason: &str) {
    {
        let mut state = engine.state.lock().await;
        if *state == EngineState::Closing || *state == EngineState::Closed {
            return;
        }
        *state = EngineState::Closing;
    }

    if let Err(err) = engine.crawler.spider.close(reason).await {
        tracing::error!(error = %err, step = "spider.close", "close step failed");
    }
    engine.crawler.downloader.close_spider().await;
    engine.crawler.item_pipeline.close_spider().await;
    engine.crawler.scheduler.close().await;

    engine
        .crawler
        .signals
        .send(Signal::SpiderClosed {
            reason: reason.to_string(),
        })
        .await;

    {
        let mut state = engine.state.lock().await;
        *state = EngineState::Closed;
    }
    engine.crawler.signals.send(Signal::EngineStopped).await;
}
