//! Seams between the scheduler and the FTP client.
//!
//! The walk only needs directory listings from one long-lived session,
//! and each worker only needs to fetch a single file. Both are traits so
//! the scheduler can run against in-memory trees in tests.

use crate::mirror::types::TransferJob;
use async_trait::async_trait;
use sftpc_ftp::ftp::{DirectoryEntry, FtpClient, FtpConnectionConfig, FtpResult};

/// Something that can list remote directories.
#[async_trait]
pub trait RemoteTree: Send {
    /// Identifies the session; listing cache entries are keyed on it.
    fn connection_id(&self) -> &str;

    /// Full machine listing of `path`, structural entries included.
    async fn list_dir(&mut self, path: &str) -> FtpResult<Vec<DirectoryEntry>>;
}

#[async_trait]
impl RemoteTree for FtpClient {
    fn connection_id(&self) -> &str {
        &self.id
    }

    async fn list_dir(&mut self, path: &str) -> FtpResult<Vec<DirectoryEntry>> {
        self.list_directory(path).await
    }
}

/// Executes one transfer job, returning the number of bytes written.
#[async_trait]
pub trait Fetcher: Send + Sync + 'static {
    async fn fetch(&self, job: &TransferJob) -> FtpResult<u64>;
}

/// Fetches every job over its own freshly opened session.
pub struct FtpFetcher {
    config: FtpConnectionConfig,
}

impl FtpFetcher {
    pub fn new(config: FtpConnectionConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl Fetcher for FtpFetcher {
    async fn fetch(&self, job: &TransferJob) -> FtpResult<u64> {
        let mut client = FtpClient::open(self.config.clone()).await?;
        let result = client.get_file(&job.remote_path, &job.local_path, None).await;
        if let Err(e) = client.quit().await {
            log::debug!("[{}] QUIT after {} failed: {}", client.id, job.remote_path, e);
        }
        result
    }
}
