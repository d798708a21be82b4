//! Generic ordered middleware/pipeline registry.
//!
//! Grounded on the base middleware manager's `_add_middleware` split:
//! `process_request`-shaped hooks are appended in registration order,
//! `process_response`/`process_exception`-shaped hooks are built in
//! reverse so the outbound direction undoes the inbound one, matching how
//! a stack of onion layers is traversed in and out. `open_spider`/
//! `close_spider` run in parallel across all registered components.

use std::sync::Arc;

use async_trait::async_trait;
use futures::future::join_all;

use crate::error::{CrawlError, CrawlResult};
use crate::http::{Request, Response};

/// What a downloader middleware's `process_request` hook may return.
pub enum RequestOutcome {
    /// Pass the (possibly unmodified) request to the next middleware /
    /// the downloader.
    Continue(Request),
    /// Short-circuit: treat this as the response without hitting the
    /// network, running the response chain from here.
    Respond(Response),
}

/// What a downloader middleware's `process_response`/`process_exception`
/// hook may return.
pub enum ResponseOutcome {
    Continue(Response),
    /// Retry from the top of the request chain instead of continuing the
    /// response chain.
    Retry(Request),
}

#[async_trait]
pub trait DownloaderMiddleware: Send + Sync {
    fn name(&self) -> &str;

    async fn process_request(&self, request: Request) -> CrawlResult<RequestOutcome> {
        Ok(RequestOutcome::Continue(request))
    }

    async fn process_response(&self, response: Response) -> CrawlResult<ResponseOutcome> {
        Ok(ResponseOutcome::Continue(response))
    }

    /// Given a transport failure, either convert it into a `Response`/
    /// retry `Request`, or return the error unchanged to let the next
    /// middleware (closer to the start of the chain) try.
    async fn process_exception(
        &self,
        _request: &Request,
        error: CrawlError,
    ) -> CrawlResult<ResponseOutcome> {
        Err(error)
    }

    async fn open_spider(&self) -> anyhow::Result<()> {
        Ok(())
    }

    async fn close_spider(&self) -> anyhow::Result<()> {
        Ok(())
    }
}

#[async_trait]
pub trait ItemPipeline: Send + Sync {
    fn name(&self) -> &str;

    async fn process_item(&self, item: serde_json::Value) -> CrawlResult<serde_json::Value>;

    async fn open_spider(&self) -> anyhow::Result<()> {
        Ok(())
    }

    async fn close_spider(&self) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Ordered registry of downloader middlewares. Built once at `Crawler`
/// construction time from a list of already-instantiated components — this
/// crate has no DI container to resolve names against (out of scope), so
/// callers hand it trait objects directly.
pub struct DownloaderMiddlewareManager {
    middlewares: Vec<Arc<dyn DownloaderMiddleware>>,
}

impl DownloaderMiddlewareManager {
    pub fn new(middlewares: Vec<Arc<dyn DownloaderMiddleware>>) -> Self {
        Self { middlewares }
    }

    pub async fn process_request(&self, mut request: Request) -> CrawlResult<RequestOutcome> {
        for mw in &self.middlewares {
            match mw.process_request(request).await? {
                RequestOutcome::Continue(r) => request = r,
                outcome @ RequestOutcome::Respond(_) => return Ok(outcome),
            }
        }
        Ok(RequestOutcome::Continue(request))
    }

    /// Response chain runs in reverse registration order: the last
    /// middleware to touch the request is the first to see the response.
    pub async fn process_response(&self, mut response: Response) -> CrawlResult<ResponseOutcome> {
        for mw in self.middlewares.iter().rev() {
            match mw.process_response(response).await? {
                ResponseOutcome::Continue(r) => response = r,
                outcome @ ResponseOutcome::Retry(_) => return Ok(outcome),
            }
        }
        Ok(ResponseOutcome::Continue(response))
    }

    /// Exception chain also runs in reverse registration order, symmetric
    /// with `process_response` — a fix relative to the inconsistency in
    /// the source this design was distilled from.
    pub async fn process_exception(
        &self,
        request: &Request,
        mut error: CrawlError,
    ) -> CrawlResult<ResponseOutcome> {
        for mw in self.middlewares.iter().rev() {
            match mw.process_exception(request, error).await {
                Ok(outcome) => return Ok(outcome),
                Err(e) => error = e,
            }
        }
        Err(error)
    }

    pub async fn open_spider(&self) -> anyhow::Result<()> {
        let results = join_all(self.middlewares.iter().map(|m| m.open_spider())).await;
        results.into_iter().collect()
    }

    pub async fn close_spider(&self) {
        let results = join_all(self.middlewares.iter().map(|m| m.close_spider())).await;
        for (mw, result) in self.middlewares.iter().zip(results) {
            if let Err(err) = result {
                tracing::error!(middleware = mw.name(), error = %err, "middleware close_spider failed");
            }
        }
    }
}

pub struct ItemPipelineManager {
    pipelines: Vec<Arc<dyn ItemPipeline>>,
}

impl ItemPipelineManager {
    pub fn new(pipelines: Vec<Arc<dyn ItemPipeline>>) -> Self {
        Self { pipelines }
    }

    pub async fn process_item(&self, mut item: serde_json::Value) -> CrawlResult<serde_json::Value> {
        for pipeline in &self.pipelines {
            item = pipeline.process_item(item).await?;
        }
        Ok(item)
    }

    pub async fn open_spider(&self) -> anyhow::Result<()> {
        let results = join_all(self.pipelines.iter().map(|p| p.open_spider())).await;
        results.into_iter().collect()
    }

    pub async fn close_spider(&self) {
        let results = join_all(self.pipelines.iter().map(|p| p.close_spider())).await;
        for (pipeline, result) in self.pipelines.iter().zip(results) {
            if let Err(err) = result {
                tracing::error!(pipeline = pipeline.name(), error = %err, "pipeline close_spider failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex as StdMutex;
    use url::Url;

    /// Records its name into a shared log on every hook call, so tests can
    /// assert the order the manager invoked each middleware in.
    struct RecordingMiddleware {
        name: &'static str,
        log: Arc<StdMutex<Vec<String>>>,
    }

    #[async_trait]
    impl DownloaderMiddleware for RecordingMiddleware {
        fn name(&self) -> &str {
            self.name
        }

        async fn process_request(&self, request: Request) -> CrawlResult<RequestOutcome> {
            self.log.lock().unwrap().push(format!("{}:request", self.name));
            Ok(RequestOutcome::Continue(request))
        }

        async fn process_response(&self, response: Response) -> CrawlResult<ResponseOutcome> {
            self.log.lock().unwrap().push(format!("{}:response", self.name));
            Ok(ResponseOutcome::Continue(response))
        }

        async fn process_exception(
            &self,
            _request: &Request,
            error: CrawlError,
        ) -> CrawlResult<ResponseOutcome> {
            self.log.lock().unwrap().push(format!("{}:exception", self.name));
            Err(error)
        }
    }

    fn sample_request() -> Request {
        Request::new(Url::parse("https://example.com").unwrap())
    }

    fn sample_response() -> Response {
        Response::new(
            Url::parse("https://example.com").unwrap(),
            200,
            crate::http::Headers::new(),
            Vec::new(),
            Arc::new(sample_request()),
        )
    }

    #[tokio::test]
    async fn process_request_runs_in_registration_order() {
        let log = Arc::new(StdMutex::new(Vec::new()));
        let manager = DownloaderMiddlewareManager::new(vec![
            Arc::new(RecordingMiddleware { name: "a", log: log.clone() }),
            Arc::new(RecordingMiddleware { name: "b", log: log.clone() }),
            Arc::new(RecordingMiddleware { name: "c", log: log.clone() }),
        ]);

        manager.process_request(sample_request()).await.unwrap();
        assert_eq!(*log.lock().unwrap(), vec!["a:request", "b:request", "c:request"]);
    }

    #[tokio::test]
    async fn process_response_runs_in_reverse_registration_order() {
        let log = Arc::new(StdMutex::new(Vec::new()));
        let manager = DownloaderMiddlewareManager::new(vec![
            Arc::new(RecordingMiddleware { name: "a", log: log.clone() }),
            Arc::new(RecordingMiddleware { name: "b", log: log.clone() }),
            Arc::new(RecordingMiddleware { name: "c", log: log.clone() }),
        ]);

        manager.process_response(sample_response()).await.unwrap();
        assert_eq!(*log.lock().unwrap(), vec!["c:response", "b:response", "a:response"]);
    }

    #[tokio::test]
    async fn process_exception_runs_in_reverse_order_symmetric_with_response() {
        let log = Arc::new(StdMutex::new(Vec::new()));
        let manager = DownloaderMiddlewareManager::new(vec![
            Arc::new(RecordingMiddleware { name: "a", log: log.clone() }),
            Arc::new(RecordingMiddleware { name: "b", log: log.clone() }),
        ]);

        let request = sample_request();
        let error = CrawlError::Transport {
            url: request.url.to_string(),
            source: anyhow::anyhow!("boom"),
        };
        let result = manager.process_exception(&request, error).await;
        assert!(result.is_err());
        assert_eq!(*log.lock().unwrap(), vec!["b:exception", "a:exception"]);
    }

    #[tokio::test]
    async fn request_chain_short_circuits_on_respond() {
        struct ShortCircuit;
        #[async_trait]
        impl DownloaderMiddleware for ShortCircuit {
            fn name(&self) -> &str {
                "short_circuit"
            }
            async fn process_request(&self, _request: Request) -> CrawlResult<RequestOutcome> {
                Ok(RequestOutcome::Respond(sample_response()))
            }
        }

        let log = Arc::new(StdMutex::new(Vec::new()));
        let manager = DownloaderMiddlewareManager::new(vec![
            Arc::new(ShortCircuit),
            Arc::new(RecordingMiddleware { name: "never", log: log.clone() }),
        ]);

        match manager.process_request(sample_request()).await.unwrap() {
            RequestOutcome::Respond(_) => {}
            RequestOutcome::Continue(_) => panic!("expected short-circuit to a Respond outcome"),
        }
        assert!(log.lock().unwrap().is_empty(), "later middleware must not run after a short-circuit");
    }
}
