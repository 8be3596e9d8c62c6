//! Shared types for the FTP crate.

use crate::ftp::error::{FtpError, FtpResult};
use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

/// Largest line accepted on the control or text data channel.
pub const MAX_LINE_LENGTH: usize = 1 << 24;

/// Default read size for binary transfers.
pub const DEFAULT_BLOCK_SIZE: usize = 65_536;

// ─── Connection / Session ────────────────────────────────────────────

/// Transfer type (RFC 959 TYPE command).
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum TransferType {
    Ascii,
    Binary,
}

impl TransferType {
    pub fn command(self) -> &'static str {
        match self {
            TransferType::Ascii => "TYPE A",
            TransferType::Binary => "TYPE I",
        }
    }
}

impl Default for TransferType {
    fn default() -> Self {
        Self::Binary
    }
}

/// How the data channel is established.
///
/// `Passive` and `Active` pick PASV/PORT on an IPv4 control connection and
/// EPSV/EPRT otherwise; the extended variants always use EPSV/EPRT.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum DataChannelMode {
    Passive,
    ExtendedPassive,
    Active,
    ExtendedActive,
}

impl DataChannelMode {
    pub fn is_passive(self) -> bool {
        matches!(self, Self::Passive | Self::ExtendedPassive)
    }

    /// Whether the RFC 2428 command form must be used on a control
    /// connection of the given family.
    pub fn use_extended(self, peer_is_ipv4: bool) -> bool {
        match self {
            Self::ExtendedPassive | Self::ExtendedActive => true,
            Self::Passive | Self::Active => !peer_is_ipv4,
        }
    }
}

impl Default for DataChannelMode {
    fn default() -> Self {
        Self::Passive
    }
}

/// Character encoding of the control channel and text-mode data.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum TextEncoding {
    Utf8,
    Latin1,
}

impl TextEncoding {
    pub fn decode(self, bytes: &[u8]) -> String {
        match self {
            TextEncoding::Utf8 => String::from_utf8_lossy(bytes).into_owned(),
            TextEncoding::Latin1 => bytes.iter().map(|&b| b as char).collect(),
        }
    }

    pub fn encode(self, text: &str) -> FtpResult<Vec<u8>> {
        match self {
            TextEncoding::Utf8 => Ok(text.as_bytes().to_vec()),
            TextEncoding::Latin1 => text
                .chars()
                .map(|c| {
                    u8::try_from(u32::from(c)).map_err(|_| {
                        FtpError::protocol_violation(format!(
                            "character {:?} is not representable in latin-1",
                            c
                        ))
                    })
                })
                .collect(),
        }
    }
}

impl Default for TextEncoding {
    fn default() -> Self {
        Self::Utf8
    }
}

/// Configuration for a single FTP connection.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FtpConnectionConfig {
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_username")]
    pub username: String,
    #[serde(default = "default_password")]
    pub password: String,
    #[serde(default)]
    pub data_channel_mode: DataChannelMode,
    /// Applies to connect, control reads, data connect/accept and data reads.
    #[serde(default = "default_timeout")]
    pub timeout_sec: u64,
    #[serde(default)]
    pub encoding: TextEncoding,
    /// Local address to bind for active-mode data connections.
    #[serde(default)]
    pub active_bind_address: Option<String>,
    /// Connect to the address announced in a 227 reply rather than the
    /// control connection's peer.
    #[serde(default = "default_true")]
    pub trust_pasv_host: bool,
    #[serde(default = "default_max_line")]
    pub max_line_length: usize,
    #[serde(default = "default_block_size")]
    pub block_size: usize,
}

fn default_port() -> u16 {
    21
}
fn default_username() -> String {
    "anonymous".into()
}
fn default_password() -> String {
    "anonymous@".into()
}
fn default_timeout() -> u64 {
    30
}
fn default_true() -> bool {
    true
}
fn default_max_line() -> usize {
    MAX_LINE_LENGTH
}
fn default_block_size() -> usize {
    DEFAULT_BLOCK_SIZE
}

fn decode_credential(raw: &str) -> FtpResult<String> {
    percent_encoding::percent_decode_str(raw)
        .decode_utf8()
        .map(|c| c.into_owned())
        .map_err(|e| FtpError::invalid_config(format!("FTP URL credentials are not UTF-8: {}", e)))
}

impl Default for FtpConnectionConfig {
    fn default() -> Self {
        Self {
            host: String::new(),
            port: default_port(),
            username: default_username(),
            password: default_password(),
            data_channel_mode: DataChannelMode::Passive,
            timeout_sec: default_timeout(),
            encoding: TextEncoding::Utf8,
            active_bind_address: None,
            trust_pasv_host: true,
            max_line_length: MAX_LINE_LENGTH,
            block_size: DEFAULT_BLOCK_SIZE,
        }
    }
}

impl FtpConnectionConfig {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            ..Self::default()
        }
    }

    pub fn with_credentials(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.username = username.into();
        self.password = password.into();
        self
    }

    /// Build a config from `ftp://[user[:password]@]host[:port][/path]`.
    /// The path component is ignored; credentials are percent-decoded.
    pub fn from_url(raw: &str) -> FtpResult<Self> {
        let url = url::Url::parse(raw)
            .map_err(|e| FtpError::invalid_config(format!("Invalid FTP URL '{}': {}", raw, e)))?;
        if url.scheme() != "ftp" {
            return Err(FtpError::invalid_config(format!(
                "Unsupported URL scheme '{}'",
                url.scheme()
            )));
        }
        let host = url
            .host_str()
            .filter(|h| !h.is_empty())
            .ok_or_else(|| FtpError::invalid_config("FTP URL has no host"))?
            .trim_start_matches('[')
            .trim_end_matches(']')
            .to_string();

        let mut config = Self::new(host, url.port().unwrap_or_else(default_port));
        if !url.username().is_empty() {
            config.username = decode_credential(url.username())?;
            config.password = decode_credential(url.password().unwrap_or_default())?;
        }
        Ok(config)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_sec.max(1))
    }

    pub fn validate(&self) -> FtpResult<()> {
        if self.host.is_empty() {
            return Err(FtpError::invalid_config("Host must not be empty"));
        }
        if self.block_size == 0 {
            return Err(FtpError::invalid_config("Block size must be positive"));
        }
        if self.max_line_length == 0 {
            return Err(FtpError::invalid_config("Maximum line length must be positive"));
        }
        Ok(())
    }
}

/// Lifecycle of a control connection.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum SessionState {
    Disconnected,
    /// Greeting received, not logged in.
    Connected,
    /// Logged in and idle.
    Authenticated,
    /// A data connection is open for a single command.
    Transferring,
    Closed,
}

/// Snapshot of a live session, kept up to date by the client.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FtpSessionInfo {
    pub id: String,
    pub host: String,
    pub port: u16,
    pub username: String,
    pub state: SessionState,
    pub server_banner: String,
    /// Last directory reported by PWD/CWD, if any.
    pub current_directory: Option<String>,
    pub connected_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
    pub bytes_uploaded: u64,
    pub bytes_downloaded: u64,
}

// ─── FTP Reply ───────────────────────────────────────────────────────

/// Reply class selected by the first digit of the code.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum ReplyClass {
    Preliminary,
    Completion,
    Intermediate,
    TransientNegative,
    PermanentNegative,
}

/// A single FTP reply (may be multi-line).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct FtpReply {
    pub code: u16,
    /// Raw lines in arrival order, first line through terminator.
    pub lines: Vec<String>,
}

impl FtpReply {
    /// Full reply text (all lines joined).
    pub fn text(&self) -> String {
        self.lines.join("\n")
    }

    /// Text following the code on the terminating line.
    pub fn message(&self) -> &str {
        self.lines
            .last()
            .and_then(|l| l.get(4..))
            .unwrap_or("")
    }

    pub fn class(&self) -> ReplyClass {
        match self.code / 100 {
            1 => ReplyClass::Preliminary,
            2 => ReplyClass::Completion,
            3 => ReplyClass::Intermediate,
            4 => ReplyClass::TransientNegative,
            _ => ReplyClass::PermanentNegative,
        }
    }

    pub fn is_multiline(&self) -> bool {
        self.lines.len() > 1
    }

    /// Whether the reply is positive (1xx–3xx).
    pub fn is_positive(&self) -> bool {
        self.code < 400
    }

    /// Whether this is a positive-preliminary reply (1xx).
    pub fn is_preliminary(&self) -> bool {
        (100..200).contains(&self.code)
    }

    /// Whether this is a positive-completion reply (2xx).
    pub fn is_completion(&self) -> bool {
        (200..300).contains(&self.code)
    }

    /// Whether this is a positive-intermediate reply (3xx).
    pub fn is_intermediate(&self) -> bool {
        (300..400).contains(&self.code)
    }

    pub(crate) fn into_error(self) -> FtpError {
        FtpError::from_reply(self.code, &self.text())
    }
}

// ─── Directory Listing ───────────────────────────────────────────────

/// Entry type taken from the MLSD `type` fact.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum EntryKind {
    File,
    Directory,
    /// `type=cdir`: the listed directory itself.
    CurrentDir,
    /// `type=pdir`: its parent.
    ParentDir,
    /// Any other type, e.g. `OS.unix=symlink`.
    Other(String),
}

/// One entry from an MLSD listing.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct DirectoryEntry {
    pub name: String,
    /// Remote directory that was listed to produce this entry.
    pub parent: String,
    /// Fact map with lower-cased keys (e.g. "type" → "file", "size" → "1234").
    pub facts: HashMap<String, String>,
}

impl DirectoryEntry {
    pub fn new(name: impl Into<String>, parent: impl Into<String>, facts: HashMap<String, String>) -> Self {
        Self {
            name: name.into(),
            parent: parent.into(),
            facts,
        }
    }

    /// Full remote path of the entry.
    pub fn path(&self) -> String {
        join_remote(&self.parent, &self.name)
    }

    pub fn fact(&self, key: &str) -> Option<&str> {
        self.facts.get(key).map(String::as_str)
    }

    /// Entry type. Listings without a `type` fact cannot be classified.
    pub fn kind(&self) -> FtpResult<EntryKind> {
        let raw = self.fact("type").ok_or_else(|| {
            FtpError::listing(format!("Entry '{}' has no type fact", self.name)).with_path(self.path())
        })?;
        Ok(match raw.to_ascii_lowercase().as_str() {
            "file" => EntryKind::File,
            "dir" => EntryKind::Directory,
            "cdir" => EntryKind::CurrentDir,
            "pdir" => EntryKind::ParentDir,
            _ => EntryKind::Other(raw.to_string()),
        })
    }

    pub fn is_directory(&self) -> bool {
        matches!(
            self.kind(),
            Ok(EntryKind::Directory | EntryKind::CurrentDir | EntryKind::ParentDir)
        )
    }

    pub fn is_file(&self) -> bool {
        matches!(self.kind(), Ok(EntryKind::File))
    }

    /// `.`/`..` and `cdir`/`pdir` entries describe the listing itself.
    pub fn is_structural(&self) -> bool {
        self.name == "."
            || self.name == ".."
            || matches!(self.kind(), Ok(EntryKind::CurrentDir | EntryKind::ParentDir))
    }

    /// Declared size: `size` for files, `sizd` for directories.
    pub fn size(&self) -> Option<u64> {
        let key = if self.is_directory() { "sizd" } else { "size" };
        self.fact(key).and_then(|v| v.trim().parse::<u64>().ok())
    }

    pub fn permissions(&self) -> Option<&str> {
        self.fact("perm").or_else(|| self.fact("unix.mode"))
    }

    /// `modify` fact: `YYYYMMDDHHMMSS[.sss]` in UTC.
    pub fn modified(&self) -> Option<DateTime<Utc>> {
        let raw = self.fact("modify")?;
        let base = raw.get(..14).unwrap_or(raw);
        NaiveDateTime::parse_from_str(base, "%Y%m%d%H%M%S")
            .ok()
            .map(|dt| Utc.from_utc_datetime(&dt))
    }
}

/// Join a remote directory and a child name with `/`.
pub fn join_remote(parent: &str, name: &str) -> String {
    let parent = parent.replace('\\', "/");
    if parent.is_empty() || parent == "." {
        name.to_string()
    } else if parent.ends_with('/') {
        format!("{}{}", parent, name)
    } else {
        format!("{}/{}", parent, name)
    }
}
