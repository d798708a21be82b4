//! The contract a crawl target implements.

use std::pin::Pin;

use async_trait::async_trait;
use futures::stream::Stream;

use crate::error::CrawlResult;
use crate::http::{Request, Response};

/// One item yielded by a callback, queued behind the scraper's
/// concurrent-items semaphore before reaching the item pipeline.
pub type Item = serde_json::Value;

/// Anything a callback can produce: either more work for the scheduler, or
/// a scraped item for the pipeline.
pub enum CallbackOutput {
    Request(Request),
    Item(Item),
}

pub type RequestStream = Pin<Box<dyn Stream<Item = Request> + Send>>;
pub type CallbackStream = Pin<Box<dyn Stream<Item = CrawlResult<CallbackOutput>> + Send>>;

#[async_trait]
pub trait Spider: Send + Sync {
    fn name(&self) -> &str;

    /// Seed requests issued when the engine opens this spider.
    fn start_requests(&self) -> RequestStream;

    /// Resolve a callback name (as stored on a `Request`) to its
    /// implementation and invoke it. `"parse"` is the conventional default
    /// callback name a spider's `start_requests` should point at.
    async fn dispatch(&self, callback: &str, response: Response) -> CrawlResult<CallbackStream>;

    /// Resolve an errback name (as stored on a `Request`) and invoke it
    /// with the request that failed and the error it failed with. Default
    /// implementation yields nothing, so a spider only needs to override
    /// this if any of its requests actually set an `errback`.
    async fn dispatch_errback(
        &self,
        _errback: &str,
        _request: &Request,
        _error: &crate::error::CrawlError,
    ) -> CrawlResult<CallbackStream> {
        Ok(Box::pin(futures::stream::empty()))
    }

    /// Called once before the first request is scheduled.
    async fn open(&self) -> anyhow::Result<()> {
        Ok(())
    }

    /// Called once as the engine begins closing, `reason` carrying why
    /// (`"finished"`, `"shutdown"`, a spider-requested close reason, ...).
    async fn close(&self, _reason: &str) -> anyhow::Result<()> {
        Ok(())
    }
}
