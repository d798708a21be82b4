//! Shared context every long-lived component holds a reference to, instead
//! of components holding references to each other directly. The engine is
//! the one exception — it calls its children (`Scheduler`, `Downloader`,
//! `Scraper`) directly, since it is the only thing that orchestrates their
//! interaction.

use std::sync::Arc;

use tokio::sync::mpsc;

use crate::config::Settings;
use crate::downloader::Downloader;
use crate::http::Request;
use crate::middleware::{DownloaderMiddlewareManager, ItemPipelineManager};
use crate::scheduler::Scheduler;
use crate::scraper::Scraper;
use crate::signals::SignalBus;
use crate::spider::Spider;
use crate::stats::Stats;

/// Everything the engine, downloader, and scraper need to reach each
/// other's ambient services (settings, stats, signals) without holding a
/// pointer back to the engine itself.
pub struct Crawler {
    pub settings: Arc<Settings>,
    pub spider: Arc<dyn Spider>,
    pub scheduler: Arc<dyn Scheduler>,
    pub downloader: Arc<Downloader>,
    pub scraper: Arc<Scraper>,
    pub item_pipeline: Arc<ItemPipelineManager>,
    pub signals: Arc<SignalBus>,
    pub stats: Arc<Stats>,
    pub new_requests_rx: tokio::sync::Mutex<Option<mpsc::UnboundedReceiver<Request>>>,
    /// Carries a reason string from `Scraper::handle_spider_error` (a
    /// callback-raised `CloseSpider`) to the engine's own shutdown task.
    pub shutdown_rx: tokio::sync::Mutex<Option<mpsc::UnboundedReceiver<String>>>,
}

/// Already-constructed components a `Crawler` is assembled from. This
/// crate has no DI container to resolve component *names* into instances
/// (that's out of scope); callers build the trait objects themselves and
/// hand them here.
///
/// `stats` is supplied rather than created here because a `Scheduler`
/// implementation (e.g. `MemoryScheduler`) is itself built from an
/// `Arc<Stats>` before a `Crawler` exists to hand one out — the caller
/// constructs one `Arc<Stats>` first and threads it through both.
pub struct CrawlerParts {
    pub settings: Settings,
    pub stats: Arc<Stats>,
    pub spider: Arc<dyn Spider>,
    pub scheduler: Arc<dyn Scheduler>,
    pub downloader_middleware: Arc<DownloaderMiddlewareManager>,
    pub item_pipeline: Arc<ItemPipelineManager>,
    pub download_handler: Arc<dyn crate::downloader::handler::DownloadHandler>,
}

impl Crawler {
    pub fn new(parts: CrawlerParts) -> Arc<Self> {
        let settings = Arc::new(parts.settings);
        let stats = parts.stats;
        let signals = Arc::new(SignalBus::new());
        let downloader = Downloader::new(
            settings.clone(),
            parts.download_handler,
            parts.downloader_middleware,
            stats.clone(),
        );
        let (tx, rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = mpsc::unbounded_channel();
        let scraper = Scraper::new(
            &settings,
            parts.spider.clone(),
            parts.item_pipeline.clone(),
            signals.clone(),
            stats.clone(),
            tx,
            shutdown_tx,
        );

        Arc::new(Self {
            settings,
            spider: parts.spider,
            scheduler: parts.scheduler,
            downloader,
            scraper,
            item_pipeline: parts.item_pipeline,
            signals,
            stats,
            new_requests_rx: tokio::sync::Mutex::new(Some(rx)),
            shutdown_rx: tokio::sync::Mutex::new(Some(shutdown_rx)),
        })
    }
}
