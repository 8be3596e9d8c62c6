//! FTP-backed entry point.

use crate::mirror::remote::FtpFetcher;
use crate::mirror::scheduler::Mirror;
use crate::mirror::types::{MirrorOptions, MirrorReport};
use sftpc_ftp::ftp::{FtpClient, FtpConnectionConfig, FtpResult};
use std::path::Path;
use std::sync::Arc;

/// Mirror `remote_root` on the server described by `config` into
/// `local_root`.
///
/// One session does all the listing; every transfer opens its own
/// session, so at most `options.concurrency + 1` control connections are
/// open at once.
pub async fn mirror(
    config: FtpConnectionConfig,
    local_root: impl AsRef<Path>,
    remote_root: &str,
    options: MirrorOptions,
) -> FtpResult<MirrorReport> {
    config.validate()?;
    options.validate()?;

    let mut lister = FtpClient::open(config.clone()).await?;
    let fetcher = Arc::new(FtpFetcher::new(config));
    let result = match Mirror::new(&mut lister, fetcher, options) {
        Ok(run) => run.run(local_root.as_ref(), remote_root).await,
        Err(e) => Err(e),
    };

    if let Err(e) = lister.quit().await {
        log::debug!("[{}] QUIT failed: {}", lister.id, e);
    }
    result
}
