// Concurrent crawl engine core: scheduler, per-host downloader, and
// scraper pipeline, bound together by an execution engine.
pub mod config;
pub mod crawler;
pub mod downloader;
pub mod engine;
pub mod error;
pub mod http;
pub mod logging;
pub mod middleware;
pub mod scheduler;
pub mod scraper;
pub mod signals;
pub mod spider;
pub mod stats;

// Re-exports for convenience
pub use config::{Settings, defaults};
pub use crawler::{Crawler, CrawlerParts};
pub use downloader::Downloader;
pub use downloader::handler::{DownloadHandler, ReqwestDownloadHandler};
pub use engine::{Engine, EngineState};
pub use engine::{close as close_engine, start as start_engine};
pub use error::{CrawlError, CrawlResult, ErrorSeverity};
pub use http::{Headers, Method, Request, Response};
pub use logging::{CrawlEvent, CrawlEventLogger, init_logging};
pub use middleware::{
    DownloaderMiddleware, DownloaderMiddlewareManager, ItemPipeline, ItemPipelineManager,
    RequestOutcome, ResponseOutcome,
};
pub use scheduler::{MemoryScheduler, Scheduler};
pub use scraper::Scraper;
pub use signals::{ListenerOutcome, Signal, SignalBus, SignalListener};
pub use spider::{CallbackOutput, Spider};
pub use stats::{Stats, StatsSnapshot};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
