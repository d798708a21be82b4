//! Ambient counters, collected for the lifetime of one crawl.
//!
//! Plain atomics rather than a mutex-guarded struct: every counter is
//! independent and the crawl doesn't need a consistent snapshot across
//! fields, only monotonic counts it can log periodically.

use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};

pub struct Stats {
    pub requests_scheduled: AtomicU64,
    pub requests_dropped: AtomicU64,
    pub responses_received: AtomicU64,
    pub response_bytes: AtomicU64,
    pub items_scraped: AtomicU64,
    pub items_dropped: AtomicU64,
    pub errors: AtomicU64,
    /// When this crawl's stats started accumulating, for the heartbeat
    /// line's elapsed-time column.
    pub started_at: DateTime<Utc>,
}

impl Default for Stats {
    fn default() -> Self {
        Self {
            requests_scheduled: AtomicU64::new(0),
            requests_dropped: AtomicU64::new(0),
            responses_received: AtomicU64::new(0),
            response_bytes: AtomicU64::new(0),
            items_scraped: AtomicU64::new(0),
            items_dropped: AtomicU64::new(0),
            errors: AtomicU64::new(0),
            started_at: Utc::now(),
        }
    }
}

impl Stats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            requests_scheduled: self.requests_scheduled.load(Ordering::Relaxed),
            requests_dropped: self.requests_dropped.load(Ordering::Relaxed),
            responses_received: self.responses_received.load(Ordering::Relaxed),
            response_bytes: self.response_bytes.load(Ordering::Relaxed),
            items_scraped: self.items_scraped.load(Ordering::Relaxed),
            items_dropped: self.items_dropped.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
            started_at: self.started_at,
        }
    }

    /// Pipe-delimited one-liner, for a periodic heartbeat log line.
    pub fn logstats_line(&self) -> String {
        let s = self.snapshot();
        let elapsed = Utc::now().signed_duration_since(s.started_at);
        format!(
            "elapsed={}s|scheduled={}|dropped={}|responses={}|bytes={}|items={}|items_dropped={}|errors={}",
            elapsed.num_seconds(),
            s.requests_scheduled,
            s.requests_dropped,
            s.responses_received,
            s.response_bytes,
            s.items_scraped,
            s.items_dropped,
            s.errors,
        )
    }
}

#[derive(Debug, Clone, Copy)]
pub struct StatsSnapshot {
    pub requests_scheduled: u64,
    pub requests_dropped: u64,
    pub responses_received: u64,
    pub response_bytes: u64,
    pub items_scraped: u64,
    pub items_dropped: u64,
    pub errors: u64,
    pub started_at: DateTime<Utc>,
}
