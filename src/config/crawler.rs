use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Typed configuration consumed by the engine, downloader, and scraper.
///
/// This crate does not load `Settings` from a file or environment — that
/// is the bootstrap layer's job — but it ships the same typed-struct-plus-
/// constants-module shape a loader would populate.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Settings {
    pub concurrent_requests: usize,
    pub concurrent_requests_per_domain: usize,
    pub concurrent_requests_per_ip: usize,
    pub concurrent_items: usize,
    pub download_delay: Duration,
    pub randomize_download_delay: bool,
    pub download_timeout: Duration,
    pub scraper_slot_max_active_size: usize,
    pub logstats_interval: Duration,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            concurrent_requests: defaults::CONCURRENT_REQUESTS,
            concurrent_requests_per_domain: defaults::CONCURRENT_REQUESTS_PER_DOMAIN,
            concurrent_requests_per_ip: defaults::CONCURRENT_REQUESTS_PER_IP,
            concurrent_items: defaults::CONCURRENT_ITEMS,
            download_delay: Duration::from_secs_f64(defaults::DOWNLOAD_DELAY_SECS),
            randomize_download_delay: defaults::RANDOMIZE_DOWNLOAD_DELAY,
            download_timeout: Duration::from_secs(defaults::DOWNLOAD_TIMEOUT_SECS),
            scraper_slot_max_active_size: defaults::SCRAPER_SLOT_MAX_ACTIVE_SIZE,
            logstats_interval: Duration::from_secs(defaults::LOGSTATS_INTERVAL_SECS),
        }
    }
}

impl Settings {
    /// Effective per-host concurrency cap: the tighter of the per-domain
    /// and per-IP limits, since both apply to the same slot in this
    /// crate's "IP-hostname when configured, else URL hostname" slot-key
    /// scheme.
    pub fn per_host_concurrency(&self) -> usize {
        self.concurrent_requests_per_domain
            .min(self.concurrent_requests_per_ip)
            .max(1)
    }
}

/// Crawl engine default constants.
pub mod defaults {
    pub const CONCURRENT_REQUESTS: usize = 16;
    pub const CONCURRENT_REQUESTS_PER_DOMAIN: usize = 8;
    pub const CONCURRENT_REQUESTS_PER_IP: usize = 8;
    pub const CONCURRENT_ITEMS: usize = 100;

    pub const DOWNLOAD_DELAY_SECS: f64 = 0.0;
    pub const RANDOMIZE_DOWNLOAD_DELAY: bool = true;
    pub const DOWNLOAD_TIMEOUT_SECS: u64 = 180;

    /// Floor applied to every response's byte weight when accounting
    /// against the scraper's `active_size` backpressure budget, so a
    /// flood of empty/tiny responses still counts for something.
    pub const MIN_RESPONSE_SIZE: usize = 1024;
    pub const SCRAPER_SLOT_MAX_ACTIVE_SIZE: usize = 5_000_000;

    /// Also the engine heartbeat's cadence: the source's heartbeat task and
    /// its periodic stats dump run off the same clock, so one setting
    /// drives both.
    pub const LOGSTATS_INTERVAL_SECS: u64 = 5;

    /// How long an idle per-host slot is kept around before the
    /// downloader's garbage collector drops it.
    pub const SLOT_GC_IDLE_SECS: u64 = 60;
    pub const SLOT_GC_INTERVAL_SECS: u64 = 60;

    /// Jitter range applied to `download_delay` when randomization is on:
    /// uniform between `0.5 * delay` and `1.5 * delay`.
    pub const JITTER_LOW_FACTOR: f64 = 0.5;
    pub const JITTER_HIGH_FACTOR: f64 = 1.5;
}
