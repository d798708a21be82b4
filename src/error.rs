//! Crate-wide error taxonomy.
//!
//! Mirrors the shape of a typical component error enum: a closed set of
//! variants the engine can match on and route to an errback or a signal,
//! plus a severity/retryability classification used by the stats collector
//! and the logging layer.

use thiserror::Error;

/// Errors produced anywhere in the crawl core.
#[derive(Debug, Error)]
pub enum CrawlError {
    /// The download handler failed to produce a response at all (connect,
    /// TLS, timeout, DNS). Distinct from an HTTP error status, which is a
    /// normal `Response` the spider is free to handle.
    #[error("transport failure fetching {url}: {source}")]
    Transport {
        url: String,
        #[source]
        source: anyhow::Error,
    },

    /// A middleware returned something other than what its hook is allowed
    /// to return (e.g. `process_request` returning neither `None`, a
    /// `Request`, nor a `Response`). Named for parity with the source's
    /// error taxonomy; a Rust `DownloaderMiddleware` hook's return type is
    /// `CrawlResult<RequestOutcome>`/`CrawlResult<ResponseOutcome>`, so the
    /// compiler rejects the disallowed-type case this variant names before
    /// any middleware runs — nothing in this crate constructs it today, but
    /// it remains part of the taxonomy for a future hook whose outcome type
    /// can't be checked statically (e.g. one resolved dynamically by name).
    #[error("middleware '{middleware}' violated its {hook} contract: {detail}")]
    MiddlewareContractViolation {
        middleware: String,
        hook: &'static str,
        detail: String,
    },

    /// A spider callback panicked, returned an error, or its resolved name
    /// does not exist on the spider.
    #[error("callback '{callback}' failed: {source}")]
    CallbackError {
        callback: String,
        #[source]
        source: anyhow::Error,
    },

    /// An item pipeline elected to silently discard an item. Not a failure;
    /// carried as an error variant only so pipelines can return it from a
    /// `Result`-returning hook and have the scraper route it to the
    /// `item_dropped` signal instead of `item_error`.
    #[error("item dropped by '{pipeline}': {reason}")]
    DropItem { pipeline: String, reason: String },

    /// A spider callback requested the engine close down, optionally citing
    /// a reason that becomes part of the `engine_stopped` signal payload.
    #[error("spider requested close: {reason}")]
    CloseSpider { reason: String },

    /// Caller-side misuse: a request for an unknown scheme, a settings
    /// value out of range, registering two middlewares at the same
    /// position, etc. These are programming errors, not runtime failures.
    #[error("usage error: {0}")]
    UsageError(String),

    /// The engine is shutting down and can no longer accept new work.
    #[error("shutdown requested, request rejected")]
    ShutdownRequested,
}

impl CrawlError {
    /// Whether retrying the operation that produced this error is ever
    /// sensible. Used by the stats collector to decide whether to bump a
    /// `retryable` vs `fatal` counter; this crate ships no retry
    /// middleware itself (that is a Non-goal), but the classification is
    /// part of the contract a retry middleware further up the chain relies
    /// on.
    pub fn is_retryable(&self) -> bool {
        matches!(self, CrawlError::Transport { .. })
    }

    pub fn severity(&self) -> ErrorSeverity {
        match self {
            CrawlError::Transport { .. } => ErrorSeverity::Warning,
            CrawlError::MiddlewareContractViolation { .. } => ErrorSeverity::Error,
            CrawlError::CallbackError { .. } => ErrorSeverity::Error,
            CrawlError::DropItem { .. } => ErrorSeverity::Info,
            CrawlError::CloseSpider { .. } => ErrorSeverity::Info,
            CrawlError::UsageError(_) => ErrorSeverity::Error,
            CrawlError::ShutdownRequested => ErrorSeverity::Info,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorSeverity {
    Info,
    Warning,
    Error,
}

pub type CrawlResult<T> = std::result::Result<T, CrawlError>;
