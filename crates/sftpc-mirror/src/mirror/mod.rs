//! Remote-to-local tree mirroring.
//!
//! - `types`: options, jobs, failures, reports, cancellation
//! - `stats`: per-run throughput counters
//! - `remote`: `RemoteTree` / `Fetcher` seams and their FTP impls
//! - `cache`: per-run listing cache
//! - `pool`: bounded worker pool (smallest running job freed first)
//! - `scheduler`: the fetch/skip/replace walk
//! - `service`: `mirror()` over a live FTP server

pub mod types;
pub mod stats;
pub mod remote;
pub mod cache;
pub mod pool;
pub mod scheduler;
pub mod service;

pub use remote::{Fetcher, FtpFetcher, RemoteTree};
pub use scheduler::{decide, Decision, Mirror};
pub use service::mirror;
pub use stats::{StatsSnapshot, ThroughputStats};
pub use types::*;
