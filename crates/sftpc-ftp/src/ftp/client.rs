//! Stateful FTP client: owns the control connection and issues commands.
//!
//! Lifecycle: `connect()` → `login()` → commands and transfers → `quit()`.
//! [`FtpClient::open`] performs the first two steps in one call.
//!
//! The client exposes low-level command helpers used by `transfer.rs`,
//! `directory.rs` and `file_ops.rs` for higher-level operations. Errors
//! that leave the control channel out of sync (framing, timeouts, EOF)
//! close the session; later commands fail with `Disconnected`.

use crate::ftp::connection;
use crate::ftp::error::{FtpError, FtpResult};
use crate::ftp::protocol::FtpCodec;
use crate::ftp::reply;
use crate::ftp::types::*;
use chrono::Utc;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::watch;
use uuid::Uuid;

/// Cloneable handle that asks the owning client to abort its current
/// transfer. Has no effect while no transfer is running.
#[derive(Clone)]
pub struct AbortHandle {
    signal: Arc<watch::Sender<bool>>,
}

impl AbortHandle {
    pub fn abort(&self) {
        self.signal.send_replace(true);
    }
}

/// A connected FTP client session.
pub struct FtpClient {
    pub id: String,
    pub config: FtpConnectionConfig,
    pub info: FtpSessionInfo,
    pub(crate) codec: FtpCodec,
    resume_state: SessionState,
    abort_signal: Arc<watch::Sender<bool>>,
}

impl FtpClient {
    /// Establish a new control connection and read the greeting.
    pub async fn connect(config: FtpConnectionConfig) -> FtpResult<Self> {
        config.validate()?;

        let session_id = Uuid::new_v4().to_string();
        let (codec, banner) = connection::connect(&config).await?;
        let (abort_signal, _) = watch::channel(false);

        let info = FtpSessionInfo {
            id: session_id.clone(),
            host: config.host.clone(),
            port: config.port,
            username: config.username.clone(),
            state: SessionState::Connected,
            server_banner: banner.text(),
            current_directory: None,
            connected_at: Utc::now(),
            last_activity: Utc::now(),
            bytes_uploaded: 0,
            bytes_downloaded: 0,
        };

        Ok(Self {
            id: session_id,
            config,
            info,
            codec,
            resume_state: SessionState::Connected,
            abort_signal: Arc::new(abort_signal),
        })
    }

    /// Connect and log in with the configured credentials.
    pub async fn open(config: FtpConnectionConfig) -> FtpResult<Self> {
        let mut client = Self::connect(config).await?;
        let (user, pass) = (client.config.username.clone(), client.config.password.clone());
        if let Err(e) = client.login(&user, &pass).await {
            client.close().await;
            return Err(e);
        }
        Ok(client)
    }

    // ─── Authentication ──────────────────────────────────────────

    /// USER, then PASS when the server asks for one.
    pub async fn login(&mut self, user: &str, password: &str) -> FtpResult<FtpReply> {
        let mut resp = self.execute(&format!("USER {}", user)).await.map_err(as_auth)?;
        if resp.is_intermediate() {
            resp = self.execute(&format!("PASS {}", password)).await.map_err(as_auth)?;
        }
        if !resp.is_completion() {
            return Err(FtpError::auth_failed(format!("Login not completed: {}", resp.text()))
                .with_code(resp.code));
        }

        self.set_state(SessionState::Authenticated);
        log::info!("[{}] Logged in to {} as {}", self.id, self.config.host, user);
        Ok(resp)
    }

    // ─── Command helpers ─────────────────────────────────────────

    /// Send a command and return a 1xx–3xx reply; 4xx/5xx become errors.
    pub async fn execute(&mut self, cmd: &str) -> FtpResult<FtpReply> {
        self.ensure_open()?;
        let result = self.codec.execute(cmd).await;
        self.track(result)
    }

    /// Send a command and require a 2xx reply.
    pub async fn expect_ok(&mut self, cmd: &str) -> FtpResult<FtpReply> {
        self.ensure_open()?;
        let result = self.codec.expect_ok(cmd).await;
        self.track(result)
    }

    /// Read the next reply without sending anything.
    pub async fn read_response(&mut self) -> FtpResult<FtpReply> {
        self.ensure_open()?;
        let result = self.codec.read_response().await;
        self.track(result)
    }

    /// Send a NOOP to keep the control connection alive.
    pub async fn noop(&mut self) -> FtpResult<()> {
        self.expect_ok("NOOP").await?;
        Ok(())
    }

    // ─── TYPE command ────────────────────────────────────────────

    /// Switch transfer type.
    pub async fn set_type(&mut self, tt: TransferType) -> FtpResult<()> {
        self.expect_ok(tt.command()).await?;
        Ok(())
    }

    // ─── PWD / CWD / CDUP ───────────────────────────────────────

    pub async fn pwd(&mut self) -> FtpResult<String> {
        let resp = self.expect_ok("PWD").await?;
        let path = reply::parse_257(&resp.text())?;
        self.info.current_directory = Some(path.clone());
        Ok(path)
    }

    /// Change into `path` and return the new working directory.
    /// `..` is sent as CDUP and an empty path means `.`.
    pub async fn cwd(&mut self, path: &str) -> FtpResult<String> {
        match path {
            ".." => {
                self.expect_ok("CDUP").await?;
            }
            "" => {
                self.expect_ok("CWD .").await?;
            }
            _ => {
                self.expect_ok(&format!("CWD {}", path)).await?;
            }
        }
        self.pwd().await
    }

    /// Move to the parent directory.
    pub async fn cdup(&mut self) -> FtpResult<String> {
        self.cwd("..").await
    }

    // ─── SIZE ────────────────────────────────────────────────────

    /// Get the size of a remote file (RFC 3659 SIZE).
    pub async fn size(&mut self, path: &str) -> FtpResult<u64> {
        let resp = self
            .expect_ok(&format!("SIZE {}", path))
            .await
            .map_err(|e| e.with_path(path))?;
        let last = resp.lines.last().map(String::as_str).unwrap_or("");
        reply::parse_213(last)
    }

    // ─── ABORT ───────────────────────────────────────────────────

    /// Handle that aborts the transfer running on this client.
    pub fn abort_handle(&self) -> AbortHandle {
        AbortHandle {
            signal: self.abort_signal.clone(),
        }
    }

    /// Clear any stale abort request and subscribe for the next one.
    pub(crate) fn arm_abort(&self) -> watch::Receiver<bool> {
        self.abort_signal.send_replace(false);
        self.abort_signal.subscribe()
    }

    // ─── QUIT ────────────────────────────────────────────────────

    /// Gracefully close the session. Safe to call more than once.
    pub async fn quit(&mut self) -> FtpResult<()> {
        if self.info.state == SessionState::Closed {
            return Ok(());
        }
        if let Err(e) = self.codec.execute("QUIT").await {
            log::debug!("[{}] QUIT: {}", self.id, e);
        }
        self.close().await;
        Ok(())
    }

    /// Drop the control connection without sending QUIT.
    pub async fn close(&mut self) {
        if self.info.state != SessionState::Closed {
            self.codec.shutdown().await;
            self.set_state(SessionState::Closed);
            log::debug!("[{}] Session closed", self.id);
        }
    }

    // ─── State ───────────────────────────────────────────────────

    pub fn state(&self) -> SessionState {
        self.info.state
    }

    pub fn is_connected(&self) -> bool {
        !matches!(self.info.state, SessionState::Closed | SessionState::Disconnected)
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.codec.peer_addr()
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.codec.local_addr()
    }

    pub(crate) fn begin_transfer(&mut self) {
        if self.info.state != SessionState::Transferring {
            self.resume_state = self.info.state;
        }
        self.set_state(SessionState::Transferring);
    }

    pub(crate) fn end_transfer(&mut self) {
        if self.info.state == SessionState::Transferring {
            self.set_state(self.resume_state);
        }
    }

    pub(crate) fn ensure_open(&self) -> FtpResult<()> {
        match self.info.state {
            SessionState::Closed | SessionState::Disconnected => Err(FtpError::disconnected(format!(
                "Session {} is closed",
                self.id
            ))),
            _ => Ok(()),
        }
    }

    fn set_state(&mut self, state: SessionState) {
        self.info.state = state;
    }

    /// Close the session on errors that desynchronise the control channel.
    pub(crate) fn track<T>(&mut self, result: FtpResult<T>) -> FtpResult<T> {
        self.touch();
        if let Err(ref e) = result {
            if e.is_connection_fatal() {
                log::warn!("[{}] Control connection lost: {}", self.id, e);
                self.set_state(SessionState::Closed);
            }
        }
        result
    }

    pub(crate) fn touch(&mut self) {
        self.info.last_activity = Utc::now();
    }
}

fn as_auth(e: FtpError) -> FtpError {
    match e.code {
        Some(code) if code >= 400 && code != 421 => FtpError {
            kind: crate::ftp::FtpErrorKind::AuthFailed,
            ..e
        },
        _ => e,
    }
}
