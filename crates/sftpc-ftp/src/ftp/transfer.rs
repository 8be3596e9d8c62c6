//! Data-channel management for FTP transfers.
//!
//! Supports four modes (RFC 959 + RFC 2428):
//! - **PASV**: server opens a port, client connects
//! - **EPSV**: extended passive (IPv6-ready)
//! - **PORT**: client opens a port, tells server
//! - **EPRT**: extended active (IPv6-ready)
//!
//! Passive connections are made *before* the transfer command is sent;
//! active connections are accepted *after* its preliminary reply.

use crate::ftp::client::FtpClient;
use crate::ftp::error::{FtpError, FtpResult};
use crate::ftp::reply;
use crate::ftp::types::FtpReply;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;

/// An open data connection plus what the preliminary reply announced.
pub struct DataConnection {
    pub stream: TcpStream,
    /// Byte count from a `150 ... (N bytes)` reply.
    pub size_hint: Option<u64>,
}

/// Data endpoint prepared before the transfer command goes out.
enum PendingData {
    Connected(TcpStream),
    Listening(TcpListener),
}

impl FtpClient {
    /// Negotiate a data connection and issue `cmd` (RETR, STOR, MLSD ...).
    ///
    /// `rest` sends `REST <offset>` first when non-zero. The reply to `cmd`
    /// must be 1xx, or a 2xx immediately followed by a 1xx. On any failure
    /// the data connection is closed before the error is returned.
    pub async fn open_transfer(&mut self, cmd: &str, rest: Option<u64>) -> FtpResult<DataConnection> {
        let pending = self.negotiate_data().await?;

        let reply = match self.send_transfer_command(cmd, rest).await {
            Ok(reply) => reply,
            Err(e) => {
                drop(pending);
                return Err(e);
            }
        };

        let stream = match pending {
            PendingData::Connected(stream) => stream,
            PendingData::Listening(listener) => {
                let accepted = self.accept_data(listener).await;
                match self.track(accepted) {
                    Ok(stream) => stream,
                    Err(e) => {
                        self.settle_failed_accept().await;
                        return Err(e);
                    }
                }
            }
        };

        let size_hint = if reply.code == 150 {
            reply::parse_150(&reply.lines[0]).ok().flatten()
        } else {
            None
        };

        self.begin_transfer();
        log::debug!("[{}] Data connection open for '{}'", self.id, cmd);
        Ok(DataConnection { stream, size_hint })
    }

    async fn negotiate_data(&mut self) -> FtpResult<PendingData> {
        let mode = self.config.data_channel_mode;
        let extended = mode.use_extended(self.peer_addr().is_ipv4());
        if mode.is_passive() {
            self.open_passive(extended).await.map(PendingData::Connected)
        } else {
            self.open_active(extended).await.map(PendingData::Listening)
        }
    }

    async fn send_transfer_command(&mut self, cmd: &str, rest: Option<u64>) -> FtpResult<FtpReply> {
        if let Some(offset) = rest.filter(|&o| o > 0) {
            let resp = self.execute(&format!("REST {}", offset)).await?;
            if !resp.is_intermediate() {
                return Err(FtpError::protocol_violation(format!(
                    "REST expected a 3xx reply, got: {}",
                    resp.text()
                ))
                .with_code(resp.code));
            }
        }

        let mut resp = self.execute(cmd).await?;
        if resp.is_completion() {
            resp = self.read_response().await?;
            if !resp.is_positive() {
                return Err(resp.into_error());
            }
        }
        if !resp.is_preliminary() {
            return Err(FtpError::protocol_violation(format!(
                "'{}' expected a 1xx reply, got: {}",
                cmd,
                resp.text()
            ))
            .with_code(resp.code));
        }
        Ok(resp)
    }

    // ─── PASV / EPSV ─────────────────────────────────────────────

    /// Issue `PASV` or `EPSV` and connect to the announced port.
    async fn open_passive(&mut self, extended: bool) -> FtpResult<TcpStream> {
        let peer = self.peer_addr().ip();
        let addr = if extended {
            let resp = self.expect_ok("EPSV").await?;
            reply::parse_229(&resp.text(), peer)?
        } else {
            let resp = self.expect_ok("PASV").await?;
            let (host, port) = reply::parse_227(&resp.text())?;
            SocketAddr::new(pasv_target(host, peer, self.config.trust_pasv_host), port)
        };

        log::debug!("[{}] Data connect to {}", self.id, addr);
        timeout(self.config.timeout(), TcpStream::connect(addr))
            .await
            .map_err(|_| FtpError::timeout(format!("Data connect to {} timed out", addr)))?
            .map_err(|e| FtpError::data_channel(format!("Data connect to {}: {}", addr, e)))
    }

    // ─── PORT / EPRT ─────────────────────────────────────────────

    /// Bind a local TCP listener and announce it via `PORT` or `EPRT`.
    async fn open_active(&mut self, extended: bool) -> FtpResult<TcpListener> {
        let ip = match self.config.active_bind_address.as_deref() {
            Some(raw) => raw.parse::<IpAddr>().map_err(|e| {
                FtpError::invalid_config(format!("Invalid active bind address '{}': {}", raw, e))
            })?,
            None => self.local_addr().ip(),
        };

        let listener = TcpListener::bind(SocketAddr::new(ip, 0))
            .await
            .map_err(|e| FtpError::data_channel(format!("Data bind on {}: {}", ip, e)))?;
        let port = listener
            .local_addr()
            .map_err(|e| FtpError::data_channel(format!("Data listener address: {}", e)))?
            .port();

        let cmd = match (extended, ip) {
            (false, IpAddr::V4(v4)) => format_port_command(v4, port),
            (false, IpAddr::V6(_)) => {
                return Err(FtpError::data_channel("PORT requires an IPv4 address; use EPRT"));
            }
            (true, ip) => format_eprt_command(ip, port),
        };
        self.expect_ok(&cmd).await?;
        Ok(listener)
    }

    /// The server answered 1xx but no data connection arrived. It still owes
    /// a closing reply for the command; consume it so the next command reads
    /// its own reply. A closed session has nothing left to settle.
    async fn settle_failed_accept(&mut self) {
        if !self.is_connected() {
            return;
        }
        match self.read_response().await {
            Ok(reply) => log::debug!("[{}] Discarded reply after failed accept: {}", self.id, reply.text()),
            Err(e) => log::debug!("[{}] No reply after failed accept: {}", self.id, e),
        }
    }

    /// Accept exactly one connection, then drop the listener.
    async fn accept_data(&mut self, listener: TcpListener) -> FtpResult<TcpStream> {
        let (stream, from) = timeout(self.config.timeout(), listener.accept())
            .await
            .map_err(|_| FtpError::timeout("Timed out waiting for the server's data connection"))?
            .map_err(|e| FtpError::data_channel(format!("Data accept: {}", e)))?;
        log::debug!("[{}] Accepted data connection from {}", self.id, from);
        Ok(stream)
    }
}

/// Host to dial after a 227 reply. An unspecified or untrusted announced
/// address falls back to the control connection's peer.
fn pasv_target(announced: Ipv4Addr, peer: IpAddr, trust_announced: bool) -> IpAddr {
    if trust_announced && !announced.is_unspecified() {
        IpAddr::V4(announced)
    } else {
        peer
    }
}

/// `PORT h1,h2,h3,h4,p1,p2`
pub fn format_port_command(ip: Ipv4Addr, port: u16) -> String {
    let o = ip.octets();
    format!("PORT {},{},{},{},{},{}", o[0], o[1], o[2], o[3], port >> 8, port & 0xFF)
}

/// `EPRT |af|addr|port|` with af 1 for IPv4 and 2 for IPv6.
pub fn format_eprt_command(ip: IpAddr, port: u16) -> String {
    let af = if ip.is_ipv4() { 1 } else { 2 };
    format!("EPRT |{}|{}|{}|", af, ip, port)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_port() {
        let ip: Ipv4Addr = "192.168.1.20".parse().unwrap();
        assert_eq!(format_port_command(ip, 50_000), "PORT 192,168,1,20,195,80");
        assert_eq!(format_port_command(ip, 21), "PORT 192,168,1,20,0,21");
    }

    #[test]
    fn test_format_eprt() {
        assert_eq!(
            format_eprt_command("10.0.0.1".parse().unwrap(), 6446),
            "EPRT |1|10.0.0.1|6446|"
        );
        assert_eq!(format_eprt_command("::1".parse().unwrap(), 6446), "EPRT |2|::1|6446|");
    }

    #[test]
    fn test_pasv_target() {
        let peer: IpAddr = "203.0.113.9".parse().unwrap();
        let announced: Ipv4Addr = "10.1.1.1".parse().unwrap();
        assert_eq!(pasv_target(announced, peer, true), IpAddr::V4(announced));
        assert_eq!(pasv_target(announced, peer, false), peer);
        assert_eq!(pasv_target(Ipv4Addr::UNSPECIFIED, peer, true), peer);
    }
}
