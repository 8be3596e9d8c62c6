//! Throughput statistics for one mirror run.
//!
//! Counters only ever grow. Workers record their own completions; the
//! walk records processed, skipped and replaced nodes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

const GIB: f64 = (1u64 << 30) as f64;
const MIB: f64 = (1u64 << 20) as f64;
const KIB: f64 = (1u64 << 10) as f64;

/// Log one "skipping" line per this many skips.
const SKIP_LOG_INTERVAL: u64 = 10;

pub struct ThroughputStats {
    processed: AtomicU64,
    downloaded: AtomicU64,
    skipped: AtomicU64,
    replaced: AtomicU64,
    failed: AtomicU64,
    total_bytes: AtomicU64,
    started: Instant,
    started_at: DateTime<Utc>,
}

/// Point-in-time copy of the counters.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StatsSnapshot {
    pub processed: u64,
    pub downloaded: u64,
    pub skipped: u64,
    pub replaced: u64,
    pub failed: u64,
    pub total_bytes: u64,
    pub elapsed_secs: f64,
    /// Bytes per second over the whole run.
    pub average_rate: f64,
    pub started_at: DateTime<Utc>,
}

impl Default for ThroughputStats {
    fn default() -> Self {
        Self::new()
    }
}

impl ThroughputStats {
    pub fn new() -> Self {
        Self {
            processed: AtomicU64::new(0),
            downloaded: AtomicU64::new(0),
            skipped: AtomicU64::new(0),
            replaced: AtomicU64::new(0),
            failed: AtomicU64::new(0),
            total_bytes: AtomicU64::new(0),
            started: Instant::now(),
            started_at: Utc::now(),
        }
    }

    /// Returns the new processed count.
    pub fn record_processed(&self) -> u64 {
        self.processed.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn record_skip(&self, path: &str) {
        let n = self.skipped.fetch_add(1, Ordering::Relaxed) + 1;
        if n % SKIP_LOG_INTERVAL == 0 {
            log::info!("Skipping {} ({} skipped so far)", path, n);
        } else {
            log::debug!("Skipping {}", path);
        }
    }

    pub fn record_replace(&self, path: &str) {
        self.replaced.fetch_add(1, Ordering::Relaxed);
        log::debug!("Replacing {}", path);
    }

    pub fn record_failure(&self) {
        self.failed.fetch_add(1, Ordering::Relaxed);
    }

    /// Count a finished download and log its rate.
    pub fn record_download(&self, path: &str, bytes: u64, elapsed: Duration) {
        self.downloaded.fetch_add(1, Ordering::Relaxed);
        self.total_bytes.fetch_add(bytes, Ordering::Relaxed);
        log::info!(
            "Complete: {}; Size: {}; Rate {}",
            path,
            bytes,
            humanize_rate(bytes, elapsed)
        );
    }

    pub fn processed(&self) -> u64 {
        self.processed.load(Ordering::Relaxed)
    }

    pub fn downloaded(&self) -> u64 {
        self.downloaded.load(Ordering::Relaxed)
    }

    pub fn skipped(&self) -> u64 {
        self.skipped.load(Ordering::Relaxed)
    }

    pub fn replaced(&self) -> u64 {
        self.replaced.load(Ordering::Relaxed)
    }

    pub fn failed(&self) -> u64 {
        self.failed.load(Ordering::Relaxed)
    }

    pub fn total_bytes(&self) -> u64 {
        self.total_bytes.load(Ordering::Relaxed)
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        let elapsed = self.elapsed();
        let total_bytes = self.total_bytes();
        StatsSnapshot {
            processed: self.processed(),
            downloaded: self.downloaded(),
            skipped: self.skipped(),
            replaced: self.replaced(),
            failed: self.failed(),
            total_bytes,
            elapsed_secs: elapsed.as_secs_f64(),
            average_rate: bytes_per_second(total_bytes, elapsed),
            started_at: self.started_at,
        }
    }

    /// Periodic progress line.
    pub fn log_report(&self) {
        log::info!(
            "Elapsed Time: {:.1}s; Processed: {}; Total: {}; Downloaded: {}; Skipped: {};",
            self.elapsed().as_secs_f64(),
            self.processed(),
            self.total_bytes(),
            self.downloaded(),
            self.skipped()
        );
    }

    /// End-of-run summary including the average rate.
    pub fn summary(&self) -> String {
        format!(
            "time: {:.1}s, processed: {}, total: {}, downloaded: {}, skipped: {}, replaced: {}, failed: {}, avg rate: {}",
            self.elapsed().as_secs_f64(),
            self.processed(),
            humanize_bytes(self.total_bytes()),
            self.downloaded(),
            self.skipped(),
            self.replaced(),
            self.failed(),
            humanize_rate(self.total_bytes(), self.elapsed())
        )
    }
}

fn bytes_per_second(bytes: u64, elapsed: Duration) -> f64 {
    let secs = elapsed.as_secs_f64();
    if secs > 0.0 {
        bytes as f64 / secs
    } else {
        0.0
    }
}

fn scaled(value: f64) -> (f64, &'static str) {
    if value >= GIB {
        (value / GIB, "GiB")
    } else if value >= MIB {
        (value / MIB, "MiB")
    } else if value >= KIB {
        (value / KIB, "KiB")
    } else {
        (value, "B")
    }
}

/// `"1.50 MiB"`
pub fn humanize_bytes(bytes: u64) -> String {
    let (value, suffix) = scaled(bytes as f64);
    format!("{:.2} {}", value, suffix)
}

/// `"1.50 MiB/s"`
pub fn humanize_rate(bytes: u64, elapsed: Duration) -> String {
    let (value, suffix) = scaled(bytes_per_second(bytes, elapsed));
    format!("{:.2} {}/s", value, suffix)
}
