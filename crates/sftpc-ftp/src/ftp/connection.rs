//! TCP connection establishment and greeting.

use crate::ftp::error::{FtpError, FtpResult};
use crate::ftp::protocol::FtpCodec;
use crate::ftp::types::{FtpConnectionConfig, FtpReply};
use tokio::net::TcpStream;
use tokio::time::timeout;

/// Open the control connection and consume the server greeting.
///
/// A `120` ("service ready in nnn minutes") is followed by the real
/// greeting; anything other than a final 2xx fails the connection.
pub async fn connect(config: &FtpConnectionConfig) -> FtpResult<(FtpCodec, FtpReply)> {
    let target = format!("{}:{}", config.host, config.port);
    log::debug!("Connecting to {}", target);

    let tcp = timeout(config.timeout(), TcpStream::connect((config.host.as_str(), config.port)))
        .await
        .map_err(|_| FtpError::timeout(format!("Connection to {} timed out", target)))?
        .map_err(|e| FtpError::connection_failed(format!("Cannot connect to {}: {}", target, e)))?;

    if let Err(e) = tcp.set_nodelay(true) {
        log::debug!("set_nodelay on {}: {}", target, e);
    }

    let mut codec = FtpCodec::new(tcp, config)?;

    let mut banner = codec.read_response().await?;
    while banner.is_preliminary() {
        log::debug!("{}: {}", target, banner.message());
        banner = codec.read_response().await?;
    }

    if !banner.is_completion() {
        return Err(FtpError::connection_failed(format!(
            "Server at {} refused the session: {}",
            target,
            banner.text()
        ))
        .with_code(banner.code));
    }

    log::info!("Connected to {} ({})", target, banner.message());
    Ok((codec, banner))
}
