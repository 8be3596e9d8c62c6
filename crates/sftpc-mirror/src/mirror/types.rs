//! Options, jobs and reports for a mirror run.

use crate::mirror::stats::StatsSnapshot;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sftpc_ftp::ftp::{FtpError, FtpResult};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// What to do when a remote file already exists locally.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum ReplacePolicy {
    /// Keep the local file when it is at least as large as the remote one.
    SkipIfSmallerEqual,
    /// Refetch whenever the sizes differ.
    ReplaceIfDifferent,
    /// Never touch an existing local file.
    NeverReplace,
}

impl Default for ReplacePolicy {
    fn default() -> Self {
        Self::SkipIfSmallerEqual
    }
}

/// Per-run configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MirrorOptions {
    /// Maximum number of simultaneous transfers.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    #[serde(default)]
    pub replace_policy: ReplacePolicy,
    /// Glob patterns matched against entry names and full remote paths.
    #[serde(default)]
    pub exclude: Vec<String>,
    /// Listings kept for the duration of the run; 0 disables caching.
    #[serde(default = "default_cache_capacity")]
    pub listing_cache_capacity: usize,
    /// Log a progress line every N processed nodes; 0 disables it.
    #[serde(default = "default_report_every")]
    pub report_every: u64,
}

fn default_concurrency() -> usize {
    3
}
fn default_cache_capacity() -> usize {
    256
}
fn default_report_every() -> u64 {
    100
}

impl Default for MirrorOptions {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
            replace_policy: ReplacePolicy::default(),
            exclude: Vec::new(),
            listing_cache_capacity: default_cache_capacity(),
            report_every: default_report_every(),
        }
    }
}

impl MirrorOptions {
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency;
        self
    }

    pub fn with_policy(mut self, policy: ReplacePolicy) -> Self {
        self.replace_policy = policy;
        self
    }

    pub fn validate(&self) -> FtpResult<()> {
        if self.concurrency == 0 {
            return Err(FtpError::invalid_config("Concurrency must be at least 1"));
        }
        for pattern in &self.exclude {
            glob::Pattern::new(pattern).map_err(|e| {
                FtpError::invalid_config(format!("Invalid exclude pattern '{}': {}", pattern, e))
            })?;
        }
        Ok(())
    }
}

/// One file to fetch. Consumed exactly once by a worker.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TransferJob {
    pub remote_path: String,
    pub local_path: PathBuf,
    /// Size from the listing; orders the pool's waits.
    pub expected_size: u64,
}

/// What a worker reports back to the scheduler.
#[derive(Debug)]
pub struct JobOutcome {
    pub job: TransferJob,
    pub result: FtpResult<u64>,
}

/// A node or job that did not succeed.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobFailure {
    pub path: String,
    pub error: FtpError,
}

/// Final result of a mirror run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MirrorReport {
    pub run_id: String,
    pub remote_root: String,
    pub local_root: PathBuf,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub stats: StatsSnapshot,
    pub failures: Vec<JobFailure>,
    /// False when the walk stopped early (lost listing connection or
    /// cancellation). Counts cover everything done up to that point.
    pub completed: bool,
    pub cancelled: bool,
}

impl MirrorReport {
    pub fn is_clean(&self) -> bool {
        self.completed && self.failures.is_empty()
    }
}

/// Stops a running mirror walk. In-flight transfers are allowed to finish.
#[derive(Debug, Clone, Default)]
pub struct MirrorCanceller {
    flag: Arc<AtomicBool>,
}

impl MirrorCanceller {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}
