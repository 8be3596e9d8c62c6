//! FTP-specific error type.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Categorised FTP error.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FtpError {
    pub kind: FtpErrorKind,
    pub message: String,
    /// FTP reply code that triggered the error, if any.
    pub code: Option<u16>,
    /// Remote or local path the failing operation was working on.
    pub path: Option<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum FtpErrorKind {
    /// TCP / DNS resolution failure, or a refused data connection.
    ConnectionFailed,
    /// Wrong username/password.
    AuthFailed,
    /// Server returned a 4xx/5xx for a command.
    CommandRejected,
    /// Data channel could not be established (PASV/PORT failed).
    DataChannelFailed,
    /// Data connection failed mid-stream or the transfer was refused.
    TransferFailed,
    /// Malformed reply line or reply body.
    Framing,
    /// Illegal command text or a reply class that is not allowed here.
    ProtocolViolation,
    /// Unparseable machine-listing line or missing listing fact.
    Listing,
    /// Local path could not be created, removed or written.
    Filesystem,
    /// Any other local I/O error.
    IoError,
    /// Control read, data connect or data accept timed out.
    Timeout,
    /// Server closed the control connection.
    Disconnected,
    /// Permission denied on the server.
    PermissionDenied,
    /// File/directory not found on the server.
    NotFound,
    /// Disk quota exceeded.
    QuotaExceeded,
    /// Transfer aborted on request.
    Cancelled,
    /// Config / parameter validation error.
    InvalidConfig,
    /// Catch-all.
    Unknown,
}

pub type FtpResult<T> = Result<T, FtpError>;

// ── Construction helpers ─────────────────────────────────────────────

impl FtpError {
    pub fn new(kind: FtpErrorKind, msg: impl Into<String>) -> Self {
        Self {
            kind,
            message: msg.into(),
            code: None,
            path: None,
        }
    }

    pub fn with_code(mut self, code: u16) -> Self {
        self.code = Some(code);
        self
    }

    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }

    /// Attach `path` unless a more specific one is already set.
    pub fn or_path(self, path: impl Into<String>) -> Self {
        if self.path.is_some() {
            self
        } else {
            self.with_path(path)
        }
    }

    // ── Convenience constructors ─────────────────────────────────

    pub fn connection_failed(msg: impl Into<String>) -> Self {
        Self::new(FtpErrorKind::ConnectionFailed, msg)
    }

    pub fn auth_failed(msg: impl Into<String>) -> Self {
        Self::new(FtpErrorKind::AuthFailed, msg)
    }

    pub fn data_channel(msg: impl Into<String>) -> Self {
        Self::new(FtpErrorKind::DataChannelFailed, msg)
    }

    pub fn transfer_failed(msg: impl Into<String>) -> Self {
        Self::new(FtpErrorKind::TransferFailed, msg)
    }

    pub fn framing(msg: impl Into<String>) -> Self {
        Self::new(FtpErrorKind::Framing, msg)
    }

    pub fn protocol_violation(msg: impl Into<String>) -> Self {
        Self::new(FtpErrorKind::ProtocolViolation, msg)
    }

    pub fn listing(msg: impl Into<String>) -> Self {
        Self::new(FtpErrorKind::Listing, msg)
    }

    /// Local filesystem failure on `path`.
    pub fn filesystem(path: impl Into<String>, err: &std::io::Error) -> Self {
        let path = path.into();
        Self::new(FtpErrorKind::Filesystem, format!("{}: {}", path, err)).with_path(path)
    }

    pub fn io_error(msg: impl Into<String>) -> Self {
        Self::new(FtpErrorKind::IoError, msg)
    }

    pub fn timeout(msg: impl Into<String>) -> Self {
        Self::new(FtpErrorKind::Timeout, msg)
    }

    pub fn disconnected(msg: impl Into<String>) -> Self {
        Self::new(FtpErrorKind::Disconnected, msg)
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::new(FtpErrorKind::NotFound, msg)
    }

    pub fn cancelled(msg: impl Into<String>) -> Self {
        Self::new(FtpErrorKind::Cancelled, msg)
    }

    pub fn invalid_config(msg: impl Into<String>) -> Self {
        Self::new(FtpErrorKind::InvalidConfig, msg)
    }

    /// Classify an FTP reply code into the most appropriate error kind.
    pub fn from_reply(code: u16, text: &str) -> Self {
        let kind = match code {
            421 => FtpErrorKind::Disconnected,
            425 | 426 => FtpErrorKind::DataChannelFailed,
            430 | 530 => FtpErrorKind::AuthFailed,
            450 | 550 => {
                let lower = text.to_lowercase();
                if lower.contains("permission") || lower.contains("denied") {
                    FtpErrorKind::PermissionDenied
                } else if lower.contains("not found") || lower.contains("no such") {
                    FtpErrorKind::NotFound
                } else if lower.contains("quota") {
                    FtpErrorKind::QuotaExceeded
                } else {
                    FtpErrorKind::CommandRejected
                }
            }
            451 | 452 | 552 => FtpErrorKind::TransferFailed,
            500..=504 => FtpErrorKind::CommandRejected,
            _ if code >= 400 => FtpErrorKind::CommandRejected,
            _ => FtpErrorKind::ProtocolViolation,
        };
        Self {
            kind,
            message: text.to_string(),
            code: Some(code),
            path: None,
        }
    }

    /// Whether the control connection that produced this error must be
    /// dropped. Reply-level rejections leave the connection usable.
    pub fn is_connection_fatal(&self) -> bool {
        matches!(
            self.kind,
            FtpErrorKind::Framing
                | FtpErrorKind::Disconnected
                | FtpErrorKind::Timeout
                | FtpErrorKind::ConnectionFailed
                | FtpErrorKind::IoError
        )
    }
}

impl fmt::Display for FtpError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(code) = self.code {
            write!(f, "[FTP {:?} {}] {}", self.kind, code, self.message)
        } else {
            write!(f, "[FTP {:?}] {}", self.kind, self.message)
        }
    }
}

impl std::error::Error for FtpError {}

impl From<std::io::Error> for FtpError {
    fn from(e: std::io::Error) -> Self {
        if e.kind() == std::io::ErrorKind::TimedOut {
            Self::timeout(format!("I/O timeout: {}", e))
        } else {
            Self::io_error(e.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_reply_classification() {
        assert_eq!(FtpError::from_reply(530, "530 Login incorrect").kind, FtpErrorKind::AuthFailed);
        assert_eq!(FtpError::from_reply(425, "425 Can't open").kind, FtpErrorKind::DataChannelFailed);
        assert_eq!(
            FtpError::from_reply(550, "550 /x: No such file").kind,
            FtpErrorKind::NotFound
        );
        assert_eq!(
            FtpError::from_reply(550, "550 Permission denied").kind,
            FtpErrorKind::PermissionDenied
        );
        assert_eq!(FtpError::from_reply(502, "502 nope").kind, FtpErrorKind::CommandRejected);
        assert_eq!(FtpError::from_reply(421, "421 bye").code, Some(421));
    }

    #[test]
    fn test_connection_fatal() {
        assert!(FtpError::framing("bad").is_connection_fatal());
        assert!(FtpError::timeout("slow").is_connection_fatal());
        assert!(!FtpError::from_reply(550, "550 gone").is_connection_fatal());
        assert!(!FtpError::listing("bad line").is_connection_fatal());
    }

    #[test]
    fn test_display_includes_code() {
        let e = FtpError::from_reply(550, "550 Not found");
        assert_eq!(e.to_string(), "[FTP NotFound 550] 550 Not found");
        let e = FtpError::framing("short");
        assert_eq!(e.to_string(), "[FTP Framing] short");
    }

    #[test]
    fn test_io_timeout_maps_to_timeout() {
        let io = std::io::Error::new(std::io::ErrorKind::TimedOut, "t");
        assert_eq!(FtpError::from(io).kind, FtpErrorKind::Timeout);
    }
}
