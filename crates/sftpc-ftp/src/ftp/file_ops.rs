//! Transfer engine: binary and line-oriented retrieve/store, plus
//! file-level download and upload on top of them.
//!
//! Every transfer follows the same sequence: TYPE, data negotiation,
//! command, stream until EOF, close the data connection, read the closing
//! reply. An [`AbortHandle`](crate::ftp::AbortHandle) request interrupts
//! the stream and runs the ABOR exchange instead.

use crate::ftp::client::FtpClient;
use crate::ftp::error::{FtpError, FtpResult};
use crate::ftp::protocol::{read_line_bounded, strip_line_ending};
use crate::ftp::transfer::DataConnection;
use crate::ftp::types::*;
use std::path::Path;
use std::time::{Duration, Instant};
use tokio::fs;
use tokio::io::{
    AsyncBufRead, AsyncRead, AsyncReadExt, AsyncSeekExt, AsyncWrite, AsyncWriteExt, BufReader,
    BufWriter,
};
use tokio::net::TcpStream;
use tokio::sync::watch;
use tokio::time::timeout;

/// How the streaming phase of a transfer ended.
enum Flow {
    /// EOF reached; carries the byte or line count.
    Done(u64),
    Aborted,
}

impl FtpClient {
    // ─── Binary ──────────────────────────────────────────────────

    /// Run `cmd` (usually `RETR <path>`) in binary mode and copy the data
    /// connection into `sink` until EOF. Returns the number of bytes copied.
    pub async fn retrieve_binary<W>(&mut self, cmd: &str, sink: &mut W, rest: Option<u64>) -> FtpResult<u64>
    where
        W: AsyncWrite + Unpin + ?Sized,
    {
        self.set_type(TransferType::Binary).await?;
        let mut abort = self.arm_abort();
        let mut data = self.open_transfer(cmd, rest).await?;
        let flow = copy_to_sink(
            &mut data.stream,
            sink,
            &mut abort,
            self.config.block_size,
            self.config.timeout(),
        )
        .await;
        if let Ok(Flow::Done(received)) = &flow {
            if let Some(announced) = size_mismatch(data.size_hint, *received) {
                log::warn!(
                    "[{}] '{}' announced {} bytes but {} arrived",
                    self.id,
                    cmd,
                    announced,
                    received
                );
            }
        }
        self.finish_transfer(cmd, data, flow).await
    }

    /// Run `cmd` (usually `STOR <path>`) in binary mode, sending `source`
    /// until it is exhausted. Returns the number of bytes sent.
    pub async fn store_binary<R>(&mut self, cmd: &str, source: &mut R, rest: Option<u64>) -> FtpResult<u64>
    where
        R: AsyncRead + Unpin + ?Sized,
    {
        self.set_type(TransferType::Binary).await?;
        let mut abort = self.arm_abort();
        let mut data = self.open_transfer(cmd, rest).await?;
        let flow = copy_from_source(
            &mut data.stream,
            source,
            &mut abort,
            self.config.block_size,
            self.config.timeout(),
        )
        .await;
        self.finish_transfer(cmd, data, flow).await
    }

    // ─── Text ────────────────────────────────────────────────────

    /// Run `cmd` in ASCII mode and hand each received line, without its
    /// line ending, to `on_line`. Returns the number of lines.
    pub async fn retrieve_lines<F>(&mut self, cmd: &str, mut on_line: F) -> FtpResult<usize>
    where
        F: FnMut(String),
    {
        self.set_type(TransferType::Ascii).await?;
        let mut abort = self.arm_abort();
        let mut data = self.open_transfer(cmd, None).await?;
        let flow = read_lines(
            &mut data.stream,
            &mut on_line,
            &mut abort,
            self.codec.encoding(),
            self.config.max_line_length,
            self.config.timeout(),
        )
        .await;
        self.finish_transfer(cmd, data, flow).await.map(|n| n as usize)
    }

    /// Run `cmd` in ASCII mode, sending each line of `source` terminated
    /// by CRLF. Returns the number of bytes sent.
    pub async fn store_lines<R>(&mut self, cmd: &str, source: &mut R) -> FtpResult<u64>
    where
        R: AsyncBufRead + Unpin + ?Sized,
    {
        self.set_type(TransferType::Ascii).await?;
        let mut abort = self.arm_abort();
        let mut data = self.open_transfer(cmd, None).await?;
        let flow = write_lines(
            &mut data.stream,
            source,
            &mut abort,
            self.config.max_line_length,
            self.config.timeout(),
        )
        .await;
        self.finish_transfer(cmd, data, flow).await
    }

    // ─── DOWNLOAD (RETR) ─────────────────────────────────────────

    /// Download a remote file to a local path, creating parent
    /// directories. With `rest`, the local file is appended to.
    pub async fn get_file(&mut self, remote_path: &str, local_path: &Path, rest: Option<u64>) -> FtpResult<u64> {
        let resume = rest.filter(|&o| o > 0);
        let local_display = local_path.display().to_string();

        if let Some(parent) = local_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| FtpError::filesystem(parent.display().to_string(), &e))?;
        }
        let file = if resume.is_some() {
            fs::OpenOptions::new().append(true).open(local_path).await
        } else {
            fs::File::create(local_path).await
        }
        .map_err(|e| FtpError::filesystem(local_display.clone(), &e))?;

        let started = Instant::now();
        let mut sink = BufWriter::new(file);
        let bytes = match self
            .retrieve_binary(&format!("RETR {}", remote_path), &mut sink, resume)
            .await
        {
            Ok(bytes) => bytes,
            Err(e) => {
                discard_partial(sink, local_path, resume.is_some()).await;
                return Err(e.or_path(remote_path));
            }
        };

        self.info.bytes_downloaded += bytes;
        log::info!(
            "[{}] Downloaded {} → {} ({} bytes in {:.2?})",
            self.id,
            remote_path,
            local_display,
            bytes,
            started.elapsed()
        );
        Ok(bytes)
    }

    // ─── UPLOAD (STOR) ───────────────────────────────────────────

    /// Upload a local file. With `rest`, sending starts at that offset of
    /// the local file and the server is asked to resume there.
    pub async fn put_file(&mut self, local_path: &Path, remote_path: &str, rest: Option<u64>) -> FtpResult<u64> {
        let resume = rest.filter(|&o| o > 0);
        let local_display = local_path.display().to_string();

        let mut file = fs::File::open(local_path)
            .await
            .map_err(|e| FtpError::filesystem(local_display.clone(), &e))?;
        if let Some(offset) = resume {
            file.seek(std::io::SeekFrom::Start(offset))
                .await
                .map_err(|e| FtpError::filesystem(local_display.clone(), &e))?;
        }

        let started = Instant::now();
        let bytes = self
            .store_binary(&format!("STOR {}", remote_path), &mut file, resume)
            .await
            .map_err(|e| e.or_path(remote_path))?;

        self.info.bytes_uploaded += bytes;
        log::info!(
            "[{}] Uploaded {} → {} ({} bytes in {:.2?})",
            self.id,
            local_display,
            remote_path,
            bytes,
            started.elapsed()
        );
        Ok(bytes)
    }

    // ─── Completion / ABOR ───────────────────────────────────────

    /// Close the data connection and settle the control channel.
    async fn finish_transfer(&mut self, cmd: &str, data: DataConnection, flow: FtpResult<Flow>) -> FtpResult<u64> {
        match flow {
            Ok(Flow::Done(count)) => {
                drop(data);
                let result = self.read_response().await;
                self.end_transfer();
                let done = result?;
                if !done.is_completion() {
                    return Err(done.into_error());
                }
                Ok(count)
            }
            Ok(Flow::Aborted) => {
                log::info!("[{}] Aborting '{}'", self.id, cmd);
                let result = self.abort_transfer(data).await;
                self.end_transfer();
                result?;
                Err(FtpError::cancelled(format!("'{}' aborted", cmd)))
            }
            Err(e) => {
                drop(data);
                // The server still owes a closing reply for the command.
                if let Err(close_err) = self.read_response().await {
                    log::debug!("[{}] No closing reply after failed transfer: {}", self.id, close_err);
                }
                self.end_transfer();
                Err(e)
            }
        }
    }

    /// Send ABOR and consume the 426 / 225 / 226 replies it produces.
    async fn abort_transfer(&mut self, data: DataConnection) -> FtpResult<()> {
        if self.state() != SessionState::Transferring {
            return Err(FtpError::protocol_violation("ABOR sent with no transfer in progress"));
        }
        drop(data);

        self.ensure_open()?;
        let sent = self.codec.send_abort().await;
        self.track(sent)?;

        let mut resp = self.read_response().await?;
        if resp.code == 426 {
            resp = self.read_response().await?;
        }
        if !matches!(resp.code, 225 | 226) {
            return Err(FtpError::protocol_violation(format!(
                "Unexpected reply to ABOR: {}",
                resp.text()
            ))
            .with_code(resp.code));
        }
        Ok(())
    }
}

/// A failed fresh download leaves no file behind, since an existing file
/// counts as already fetched. A failed resume keeps what was appended.
async fn discard_partial(mut sink: BufWriter<fs::File>, local_path: &Path, resumed: bool) {
    if resumed {
        if let Err(e) = sink.flush().await {
            log::debug!("Flushing partial {}: {}", local_path.display(), e);
        }
        return;
    }
    drop(sink);
    if let Err(e) = fs::remove_file(local_path).await {
        log::debug!("Removing partial {}: {}", local_path.display(), e);
    }
}

/// The announced size when it disagrees with what arrived.
fn size_mismatch(announced: Option<u64>, received: u64) -> Option<u64> {
    announced.filter(|&n| n != received)
}

/// Resolves once an abort has been requested.
async fn abort_requested(abort: &mut watch::Receiver<bool>) {
    loop {
        if *abort.borrow_and_update() {
            return;
        }
        if abort.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

fn read_failed(e: std::io::Error) -> FtpError {
    FtpError::transfer_failed(format!("Data connection read: {}", e))
}

fn write_failed(e: std::io::Error) -> FtpError {
    FtpError::transfer_failed(format!("Data connection write: {}", e))
}

fn data_timed_out() -> FtpError {
    FtpError::timeout("Data connection stalled")
}

async fn copy_to_sink<W>(
    data: &mut TcpStream,
    sink: &mut W,
    abort: &mut watch::Receiver<bool>,
    block_size: usize,
    limit: Duration,
) -> FtpResult<Flow>
where
    W: AsyncWrite + Unpin + ?Sized,
{
    let mut buf = vec![0u8; block_size];
    let mut total = 0u64;
    loop {
        let n = tokio::select! {
            biased;
            _ = abort_requested(abort) => return Ok(Flow::Aborted),
            read = timeout(limit, data.read(&mut buf)) => {
                read.map_err(|_| data_timed_out())?.map_err(read_failed)?
            }
        };
        if n == 0 {
            break;
        }
        sink.write_all(&buf[..n])
            .await
            .map_err(|e| FtpError::transfer_failed(format!("Writing received data: {}", e)))?;
        total += n as u64;
    }
    sink.flush()
        .await
        .map_err(|e| FtpError::transfer_failed(format!("Flushing received data: {}", e)))?;
    Ok(Flow::Done(total))
}

async fn copy_from_source<R>(
    data: &mut TcpStream,
    source: &mut R,
    abort: &mut watch::Receiver<bool>,
    block_size: usize,
    limit: Duration,
) -> FtpResult<Flow>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let mut buf = vec![0u8; block_size];
    let mut total = 0u64;
    loop {
        let n = source
            .read(&mut buf)
            .await
            .map_err(|e| FtpError::transfer_failed(format!("Reading upload source: {}", e)))?;
        if n == 0 {
            break;
        }
        tokio::select! {
            biased;
            _ = abort_requested(abort) => return Ok(Flow::Aborted),
            written = timeout(limit, data.write_all(&buf[..n])) => {
                written.map_err(|_| data_timed_out())?.map_err(write_failed)?
            }
        }
        total += n as u64;
    }
    timeout(limit, data.shutdown())
        .await
        .map_err(|_| data_timed_out())?
        .map_err(write_failed)?;
    Ok(Flow::Done(total))
}

async fn read_lines<F>(
    data: &mut TcpStream,
    on_line: &mut F,
    abort: &mut watch::Receiver<bool>,
    encoding: TextEncoding,
    max_line: usize,
    limit: Duration,
) -> FtpResult<Flow>
where
    F: FnMut(String),
{
    let mut reader = BufReader::new(data);
    let mut buf = Vec::new();
    let mut count = 0u64;
    loop {
        let n = tokio::select! {
            biased;
            _ = abort_requested(abort) => return Ok(Flow::Aborted),
            read = timeout(limit, read_line_bounded(&mut reader, &mut buf, max_line)) => {
                read.map_err(|_| data_timed_out())??
            }
        };
        if n == 0 {
            break;
        }
        on_line(encoding.decode(strip_line_ending(&buf)));
        count += 1;
    }
    Ok(Flow::Done(count))
}

async fn write_lines<R>(
    data: &mut TcpStream,
    source: &mut R,
    abort: &mut watch::Receiver<bool>,
    max_line: usize,
    limit: Duration,
) -> FtpResult<Flow>
where
    R: AsyncBufRead + Unpin + ?Sized,
{
    let mut line = Vec::new();
    let mut out = Vec::new();
    let mut total = 0u64;
    loop {
        if read_line_bounded(source, &mut line, max_line).await? == 0 {
            break;
        }
        out.clear();
        out.extend_from_slice(strip_line_ending(&line));
        out.extend_from_slice(b"\r\n");

        tokio::select! {
            biased;
            _ = abort_requested(abort) => return Ok(Flow::Aborted),
            written = timeout(limit, data.write_all(&out)) => {
                written.map_err(|_| data_timed_out())?.map_err(write_failed)?
            }
        }
        total += out.len() as u64;
    }
    timeout(limit, data.shutdown())
        .await
        .map_err(|_| data_timed_out())?
        .map_err(write_failed)?;
    Ok(Flow::Done(total))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_size_mismatch() {
        assert_eq!(size_mismatch(None, 10), None);
        assert_eq!(size_mismatch(Some(10), 10), None);
        assert_eq!(size_mismatch(Some(64), 4), Some(64));
    }
}
