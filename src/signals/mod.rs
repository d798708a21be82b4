//! Named event bus.
//!
//! Listeners are invoked in registration order; a listener that panics or
//! returns an error is logged and does not stop delivery to the others.
//! `spider_idle` listeners may additionally veto engine shutdown by
//! returning [`ListenerOutcome::DontClose`].
//!
//! Grounded on the catch-log-collect-results dispatch used by the original
//! source's signal helper: every receiver runs, every result (success,
//! error, or veto) is collected rather than the first error aborting the
//! rest.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::http::{Request, Response};

/// Keyword payload for a dispatched signal. Each variant corresponds to one
/// named event in the crawl lifecycle.
#[derive(Debug, Clone)]
pub enum Signal {
    EngineStarted,
    EngineStopped,
    SpiderOpened,
    SpiderClosed { reason: String },
    /// Dispatched before the engine decides whether to close. A listener
    /// returning `DontClose` from its outcome keeps the engine alive for
    /// another idle check.
    SpiderIdle,
    RequestScheduled { request: Arc<Request> },
    RequestDropped { request: Arc<Request> },
    ResponseReceived { response: Arc<Response> },
    ItemScraped { item: Arc<serde_json::Value> },
    ItemDropped { reason: String },
    ItemError { error: String },
    SpiderError { error: String },
}

impl Signal {
    pub fn name(&self) -> &'static str {
        match self {
            Signal::EngineStarted => "engine_started",
            Signal::EngineStopped => "engine_stopped",
            Signal::SpiderOpened => "spider_opened",
            Signal::SpiderClosed { .. } => "spider_closed",
            Signal::SpiderIdle => "spider_idle",
            Signal::RequestScheduled { .. } => "request_scheduled",
            Signal::RequestDropped { .. } => "request_dropped",
            Signal::ResponseReceived { .. } => "response_received",
            Signal::ItemScraped { .. } => "item_scraped",
            Signal::ItemDropped { .. } => "item_dropped",
            Signal::ItemError { .. } => "item_error",
            Signal::SpiderError { .. } => "spider_error",
        }
    }
}

/// What a listener returns. Plain `Ok(())`/`Err` for ordinary signals;
/// `spider_idle` listeners use `DontClose` to keep the engine running.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListenerOutcome {
    Ok,
    DontClose,
}

#[async_trait]
pub trait SignalListener: Send + Sync {
    async fn handle(&self, signal: &Signal) -> anyhow::Result<ListenerOutcome>;
}

/// A closure-backed listener, for callers who don't want to define a type
/// just to hook one signal.
pub struct FnListener<F>(pub F);

#[async_trait]
impl<F> SignalListener for FnListener<F>
where
    F: Fn(&Signal) -> anyhow::Result<ListenerOutcome> + Send + Sync,
{
    async fn handle(&self, signal: &Signal) -> anyhow::Result<ListenerOutcome> {
        (self.0)(signal)
    }
}

#[derive(Default)]
pub struct SignalBus {
    listeners: RwLock<HashMap<&'static str, Vec<Arc<dyn SignalListener>>>>,
}

impl SignalBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn connect(&self, signal_name: &'static str, listener: Arc<dyn SignalListener>) {
        self.listeners
            .write()
            .await
            .entry(signal_name)
            .or_default()
            .push(listener);
    }

    /// Dispatch `signal` to every listener registered for its name, in
    /// registration order. Returns `true` if any listener vetoed closure
    /// via [`ListenerOutcome::DontClose`]; failures are logged, not
    /// propagated.
    pub async fn send(&self, signal: Signal) -> bool {
        let name = signal.name();
        let listeners = {
            let guard = self.listeners.read().await;
            guard.get(name).cloned().unwrap_or_default()
        };

        let mut veto = false;
        for listener in listeners {
            match listener.handle(&signal).await {
                Ok(ListenerOutcome::DontClose) => veto = true,
                Ok(ListenerOutcome::Ok) => {}
                Err(err) => {
                    tracing::error!(signal = name, error = %err, "signal listener failed");
                }
            }
        }
        veto
    }
}
