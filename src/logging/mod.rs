// Centralized logging configuration and utilities

pub mod events;

// Re-export logging components
pub use events::{
    CrawlEvent, CrawlEventLogger, ErrorEvent, ErrorType, PerformanceEvent, PerformanceEventType,
};

/// Install a `tracing` subscriber reading `RUST_LOG`, defaulting to
/// `info` when unset. Call once from an application's `main`; the crate
/// itself never installs a global subscriber on its own.
pub fn init_logging() {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .try_init();
}
