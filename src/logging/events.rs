// Structured logging events for crawl engine operations
use serde::{Deserialize, Serialize};
use std::time::{Duration, SystemTime};
use tracing::{debug, error, info, warn};
use url::Url;

/// Comprehensive request/response lifecycle event
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrawlEvent {
    pub url: String,
    pub event_type: CrawlEventType,
    pub timestamp: SystemTime,
    pub duration_ms: Option<u64>,
    pub status_code: Option<u16>,
    pub content_length: Option<u64>,
    pub retry_count: Option<u32>,
    pub error_message: Option<String>,
    pub session_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum CrawlEventType {
    Scheduled,
    Downloading,
    Downloaded,
    Dropped,
    Retrying,
    RateLimited,
    Timeout,
}

/// Performance/backpressure monitoring events
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PerformanceEvent {
    pub event_type: PerformanceEventType,
    pub timestamp: SystemTime,
    pub duration_ms: u64,
    pub active_connections: Option<usize>,
    pub queue_size: Option<usize>,
    pub scraper_active_size: Option<usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum PerformanceEventType {
    RequestProcessed,
    SlotQueueProcessed,
    ScraperBackpressure,
    Heartbeat,
    SessionComplete,
}

/// Error event logging
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorEvent {
    pub error_type: ErrorType,
    pub timestamp: SystemTime,
    pub url: Option<String>,
    pub error_message: String,
    pub context: Option<String>,
    pub retry_count: Option<u32>,
    pub session_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ErrorType {
    TransportError,
    MiddlewareError,
    CallbackError,
    ItemError,
    ConfigError,
    RateLimitError,
    TimeoutError,
}

/// Main crawl event logger. Every call fires a structured `tracing` event
/// at the appropriate level AND a `debug!` dump of the full typed event —
/// the former is what an operator tails, the latter is what a log
/// aggregator indexes.
pub struct CrawlEventLogger {
    session_id: String,
}

impl CrawlEventLogger {
    pub fn new(session_id: String) -> Self {
        Self { session_id }
    }

    pub fn log_request_scheduled(&self, url: &Url, priority: i32) {
        let event = CrawlEvent {
            url: url.to_string(),
            event_type: CrawlEventType::Scheduled,
            timestamp: SystemTime::now(),
            duration_ms: None,
            status_code: None,
            content_length: None,
            retry_count: None,
            error_message: None,
            session_id: Some(self.session_id.clone()),
        };

        info!(
            url = %url,
            priority = priority,
            session_id = %self.session_id,
            event = "request_scheduled",
            "Scheduled request"
        );

        debug!(event = ?event, "Detailed request scheduled event");
    }

    pub fn log_response_received(
        &self,
        url: &Url,
        duration: Duration,
        status_code: u16,
        content_length: u64,
    ) {
        let event = CrawlEvent {
            url: url.to_string(),
            event_type: CrawlEventType::Downloaded,
            timestamp: SystemTime::now(),
            duration_ms: Some(duration.as_millis() as u64),
            status_code: Some(status_code),
            content_length: Some(content_length),
            retry_count: None,
            error_message: None,
            session_id: Some(self.session_id.clone()),
        };

        info!(
            url = %url,
            duration_ms = duration.as_millis(),
            status_code = status_code,
            content_length = content_length,
            session_id = %self.session_id,
            event = "response_received",
            "Downloaded response"
        );

        debug!(event = ?event, "Detailed response received event");
    }

    pub fn log_transport_failure(
        &self,
        url: &Url,
        duration: Duration,
        error_message: &str,
        retry_count: Option<u32>,
    ) {
        let event = CrawlEvent {
            url: url.to_string(),
            event_type: CrawlEventType::Retrying,
            timestamp: SystemTime::now(),
            duration_ms: Some(duration.as_millis() as u64),
            status_code: None,
            content_length: None,
            retry_count,
            error_message: Some(error_message.to_string()),
            session_id: Some(self.session_id.clone()),
        };

        warn!(
            url = %url,
            duration_ms = duration.as_millis(),
            error_message = error_message,
            retry_count = ?retry_count,
            session_id = %self.session_id,
            event = "transport_failure",
            "Request transport failed"
        );

        debug!(event = ?event, "Detailed transport failure event");
    }

    pub fn log_item_dropped(&self, pipeline: &str, reason: &str) {
        info!(
            pipeline = pipeline,
            reason = reason,
            session_id = %self.session_id,
            event = "item_dropped",
            "Item pipeline dropped item"
        );
    }

    pub fn log_rate_limited(&self, url: &Url, wait_time_ms: u64, domain: &str) {
        let event = CrawlEvent {
            url: url.to_string(),
            event_type: CrawlEventType::RateLimited,
            timestamp: SystemTime::now(),
            duration_ms: Some(wait_time_ms),
            status_code: None,
            content_length: None,
            retry_count: None,
            error_message: Some(format!("delayed for host: {}", domain)),
            session_id: Some(self.session_id.clone()),
        };

        debug!(
            url = %url,
            wait_time_ms = wait_time_ms,
            domain = domain,
            session_id = %self.session_id,
            event = "slot_delay",
            "Request held for per-host delay"
        );

        debug!(event = ?event, "Detailed slot delay event");
    }

    pub fn log_performance(
        &self,
        event_type: PerformanceEventType,
        duration: Duration,
        scraper_active_size: Option<usize>,
    ) {
        let event = PerformanceEvent {
            event_type: event_type.clone(),
            timestamp: SystemTime::now(),
            duration_ms: duration.as_millis() as u64,
            active_connections: None,
            queue_size: None,
            scraper_active_size,
        };

        debug!(
            event_type = ?event_type,
            duration_ms = duration.as_millis(),
            scraper_active_size = ?scraper_active_size,
            session_id = %self.session_id,
            event = "performance",
            "Performance metric recorded"
        );

        debug!(event = ?event, "Detailed performance event");
    }

    pub fn log_error(
        &self,
        error_type: ErrorType,
        error_message: &str,
        url: Option<&Url>,
        context: Option<&str>,
    ) {
        let event = ErrorEvent {
            error_type: error_type.clone(),
            timestamp: SystemTime::now(),
            url: url.map(|u| u.to_string()),
            error_message: error_message.to_string(),
            context: context.map(|s| s.to_string()),
            retry_count: None,
            session_id: Some(self.session_id.clone()),
        };

        error!(
            error_type = ?error_type,
            error_message = error_message,
            url = ?url,
            context = ?context,
            session_id = %self.session_id,
            event = "error",
            "Error occurred during crawl"
        );

        debug!(event = ?event, "Detailed error event");
    }
}
