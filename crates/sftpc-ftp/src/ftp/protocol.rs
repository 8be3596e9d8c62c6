//! Low-level FTP command/reply codec (RFC 959 §4).
//!
//! Handles:
//! - Sending FTP commands terminated with `\r\n`
//! - Reading bounded lines and assembling single- and multi-line replies
//! - Parsing the 3-digit reply code

use crate::ftp::error::{FtpError, FtpResult};
use crate::ftp::types::{FtpConnectionConfig, FtpReply, TextEncoding};
use std::borrow::Cow;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::time::timeout;

/// Telnet IP + DM, sent ahead of ABOR (RFC 959 §4.1.3).
const TELNET_INTERRUPT: [u8; 4] = [0xFF, 0xF4, 0xFF, 0xF2];

/// Most lines accepted in one multi-line reply.
pub const MAX_REPLY_LINES: usize = 4096;

/// The FTP command/reply codec operating on split halves of the control
/// connection.
pub struct FtpCodec {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
    peer: SocketAddr,
    local: SocketAddr,
    encoding: TextEncoding,
    timeout: Duration,
    max_line: usize,
}

impl FtpCodec {
    pub fn new(stream: TcpStream, config: &FtpConnectionConfig) -> FtpResult<Self> {
        let peer = stream.peer_addr()?;
        let local = stream.local_addr()?;
        let (rd, wr) = stream.into_split();
        Ok(Self {
            reader: BufReader::new(rd),
            writer: wr,
            peer,
            local,
            encoding: config.encoding,
            timeout: config.timeout(),
            max_line: config.max_line_length,
        })
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local
    }

    pub fn encoding(&self) -> TextEncoding {
        self.encoding
    }

    /// Send a raw FTP command (without the trailing CRLF, which is appended here).
    pub async fn send_command(&mut self, cmd: &str) -> FtpResult<()> {
        log::trace!(">>> {}", mask_command(cmd));
        timeout(self.timeout, write_command(&mut self.writer, cmd, self.encoding))
            .await
            .map_err(|_| FtpError::timeout(format!("Timed out sending '{}'", mask_command(cmd))))?
    }

    /// Send `ABOR` preceded by the Telnet interrupt sequence.
    pub async fn send_abort(&mut self) -> FtpResult<()> {
        log::trace!(">>> ABOR");
        let mut line = TELNET_INTERRUPT.to_vec();
        line.extend_from_slice(b"ABOR\r\n");
        let limit = self.timeout;
        let writer = &mut self.writer;
        let write = async move {
            writer.write_all(&line).await?;
            writer.flush().await
        };
        timeout(limit, write)
            .await
            .map_err(|_| FtpError::timeout("Timed out sending ABOR"))??;
        Ok(())
    }

    /// Read a complete FTP reply (possibly multi-line).
    ///
    /// Multi-line replies look like:
    /// ```text
    /// 220-Welcome to my FTP server
    /// 220-This is line 2
    /// 220 End of greeting
    /// ```
    pub async fn read_response(&mut self) -> FtpResult<FtpReply> {
        let reply = timeout(
            self.timeout,
            read_reply(&mut self.reader, self.encoding, self.max_line),
        )
        .await
        .map_err(|_| FtpError::timeout("Timed out waiting for server reply"))??;

        log::trace!("<<< {}", reply.lines.last().map(String::as_str).unwrap_or(""));
        Ok(reply)
    }

    /// Send a command and return the reply. Classes 1–3 are returned,
    /// 4xx/5xx become errors.
    pub async fn execute(&mut self, cmd: &str) -> FtpResult<FtpReply> {
        self.send_command(cmd).await?;
        let reply = self.read_response().await?;
        if reply.is_positive() {
            Ok(reply)
        } else {
            Err(reply.into_error())
        }
    }

    /// Convenience: send a command, expect a specific reply-code class.
    pub async fn expect(&mut self, cmd: &str, expected_first_digit: u16) -> FtpResult<FtpReply> {
        let reply = self.execute(cmd).await?;
        if reply.code / 100 != expected_first_digit {
            return Err(FtpError::protocol_violation(format!(
                "'{}' expected a {}xx reply, got: {}",
                mask_command(cmd),
                expected_first_digit,
                reply.text()
            ))
            .with_code(reply.code));
        }
        Ok(reply)
    }

    /// Expect a 2xx reply.
    pub async fn expect_ok(&mut self, cmd: &str) -> FtpResult<FtpReply> {
        self.expect(cmd, 2).await
    }

    /// Close the write half; the server sees EOF.
    pub async fn shutdown(&mut self) {
        if let Err(e) = self.writer.shutdown().await {
            log::debug!("control channel shutdown: {}", e);
        }
    }
}

/// Reject command text that would break line framing.
pub fn validate_command(cmd: &str) -> FtpResult<()> {
    if cmd.contains('\r') || cmd.contains('\n') {
        return Err(FtpError::protocol_violation(format!(
            "Command contains a line terminator: {:?}",
            mask_command(cmd)
        )));
    }
    Ok(())
}

/// Mask the argument of `PASS` for logging.
pub fn mask_command(cmd: &str) -> Cow<'_, str> {
    match cmd.get(..5) {
        Some(prefix) if prefix.eq_ignore_ascii_case("PASS ") => {
            let hidden = cmd.len().saturating_sub(5);
            Cow::Owned(format!("{}{}", prefix, "*".repeat(hidden)))
        }
        _ => Cow::Borrowed(cmd),
    }
}

/// Write `cmd` followed by CRLF.
pub async fn write_command<W>(writer: &mut W, cmd: &str, encoding: TextEncoding) -> FtpResult<()>
where
    W: AsyncWrite + Unpin + ?Sized,
{
    validate_command(cmd)?;
    let mut line = encoding.encode(cmd)?;
    line.extend_from_slice(b"\r\n");
    writer.write_all(&line).await?;
    writer.flush().await?;
    Ok(())
}

/// Read one line (terminator included) into `buf`, refusing lines longer
/// than `limit` bytes. Returns the number of bytes read; 0 means EOF.
pub async fn read_line_bounded<R>(reader: &mut R, buf: &mut Vec<u8>, limit: usize) -> FtpResult<usize>
where
    R: AsyncBufRead + Unpin + ?Sized,
{
    buf.clear();
    loop {
        let (used, done) = {
            let available = reader.fill_buf().await?;
            if available.is_empty() {
                return Ok(buf.len());
            }
            let (used, done) = match available.iter().position(|&b| b == b'\n') {
                Some(i) => (i + 1, true),
                None => (available.len(), false),
            };
            buf.extend_from_slice(&available[..used]);
            (used, done)
        };
        reader.consume(used);

        let content = if done { strip_line_ending(buf).len() } else { buf.len().saturating_sub(1) };
        if content > limit {
            return Err(FtpError::framing(format!("Line exceeds {} bytes", limit)));
        }
        if done {
            return Ok(buf.len());
        }
    }
}

/// Drop a trailing CRLF, LF or CR.
pub fn strip_line_ending(line: &[u8]) -> &[u8] {
    if line.ends_with(b"\r\n") {
        &line[..line.len() - 2]
    } else if line.ends_with(b"\n") || line.ends_with(b"\r") {
        &line[..line.len() - 1]
    } else {
        line
    }
}

async fn next_line<R>(reader: &mut R, buf: &mut Vec<u8>, encoding: TextEncoding, limit: usize) -> FtpResult<String>
where
    R: AsyncBufRead + Unpin + ?Sized,
{
    if read_line_bounded(reader, buf, limit).await? == 0 {
        return Err(FtpError::disconnected("Server closed connection"));
    }
    Ok(encoding.decode(strip_line_ending(buf)))
}

/// Read one logical reply: a single line, or a `NNN-` line followed by
/// continuation lines up to the `NNN ` terminator.
pub async fn read_reply<R>(reader: &mut R, encoding: TextEncoding, limit: usize) -> FtpResult<FtpReply>
where
    R: AsyncBufRead + Unpin + ?Sized,
{
    let mut buf = Vec::new();
    let first = next_line(reader, &mut buf, encoding, limit).await?;
    let code = parse_code(&first)?;
    let multiline = first.as_bytes().get(3) == Some(&b'-');
    let mut lines = vec![first];

    if multiline {
        let prefix = code.to_string();
        loop {
            let next = match next_line(reader, &mut buf, encoding, limit).await {
                Ok(line) => line,
                Err(e) if e.kind == crate::ftp::FtpErrorKind::Disconnected => {
                    return Err(FtpError::framing(format!(
                        "Multi-line {} reply ended without a terminator",
                        code
                    ))
                    .with_code(code));
                }
                Err(e) => return Err(e),
            };
            let terminated = next.get(..3) == Some(prefix.as_str()) && next.as_bytes().get(3) != Some(&b'-');
            if lines.len() >= MAX_REPLY_LINES {
                return Err(FtpError::framing(format!(
                    "Multi-line {} reply exceeds {} lines",
                    code, MAX_REPLY_LINES
                ))
                .with_code(code));
            }
            lines.push(next);
            if terminated {
                break;
            }
        }
    }

    Ok(FtpReply { code, lines })
}

/// Parse the 3-digit reply code from the start of a line.
pub fn parse_code(line: &str) -> FtpResult<u16> {
    let digits = line
        .get(..3)
        .filter(|d| d.bytes().all(|b| b.is_ascii_digit()))
        .ok_or_else(|| FtpError::framing(format!("Invalid reply line: '{}'", line)))?;
    let code: u16 = digits
        .parse()
        .map_err(|_| FtpError::framing(format!("Invalid reply code in: '{}'", line)))?;
    if !(100..600).contains(&code) {
        return Err(FtpError::framing(format!("Reply code out of range: '{}'", line)));
    }
    match line.as_bytes().get(3) {
        None | Some(b' ') | Some(b'-') => Ok(code),
        Some(_) => Err(FtpError::framing(format!("Invalid reply separator in: '{}'", line))),
    }
}
