//! Scripted in-process FTP server for tests.
//!
//! Serves an in-memory tree over real loopback sockets: login, TYPE,
//! PASV/EPSV/PORT/EPRT, REST, RETR, STOR, MLSD, NLST, SIZE, PWD, CWD,
//! CDUP, MKD, RMD, DELE, RNFR/RNTO, NOOP, ABOR and QUIT. Every command
//! line is recorded so tests can assert on the exact wire traffic.

use crate::ftp::reply::quote_257;
use crate::ftp::types::FtpConnectionConfig;
use std::collections::{BTreeMap, BTreeSet};
use std::io;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tokio::time::timeout;

const DATA_ACCEPT_TIMEOUT: Duration = Duration::from_secs(5);
const WITHHELD_DATA_DELAY: Duration = Duration::from_millis(1500);

#[derive(Default)]
struct FakeState {
    user: String,
    password: String,
    dirs: BTreeSet<String>,
    files: BTreeMap<String, Vec<u8>>,
    commands: Vec<String>,
    omit_type_fact: bool,
    stall_retrieves: bool,
    withhold_data: bool,
    accept_before_opening: bool,
    sessions: usize,
    peak_sessions: usize,
    retrieves: usize,
}

impl FakeState {
    fn add_dir(&mut self, path: &str) {
        let mut current = normalize(path);
        loop {
            self.dirs.insert(current.clone());
            if current == "/" {
                break;
            }
            current = parent_of(&current);
        }
    }

    fn children(&self, dir: &str) -> (Vec<String>, Vec<(String, usize)>) {
        let dirs = self
            .dirs
            .iter()
            .filter(|d| d.as_str() != "/" && parent_of(d) == dir)
            .map(|d| base_name(d).to_string())
            .collect();
        let files = self
            .files
            .iter()
            .filter(|(f, _)| parent_of(f) == dir)
            .map(|(f, content)| (base_name(f).to_string(), content.len()))
            .collect();
        (dirs, files)
    }
}

/// Builder for [`FakeFtpServer`].
pub struct FakeFtpServerBuilder {
    state: FakeState,
}

impl FakeFtpServerBuilder {
    pub fn credentials(mut self, user: &str, password: &str) -> Self {
        self.state.user = user.to_string();
        self.state.password = password.to_string();
        self
    }

    /// Add a directory (and its ancestors).
    pub fn dir(mut self, path: &str) -> Self {
        self.state.add_dir(path);
        self
    }

    /// Add a file (and its parent directories).
    pub fn file(mut self, path: &str, content: impl Into<Vec<u8>>) -> Self {
        let path = normalize(path);
        self.state.add_dir(&parent_of(&path));
        self.state.files.insert(path, content.into());
        self
    }

    /// List entries without the `type` fact.
    pub fn omit_type_fact(mut self) -> Self {
        self.state.omit_type_fact = true;
        self
    }

    /// RETR sends a few bytes and then waits for ABOR.
    pub fn stall_retrieves(mut self) -> Self {
        self.state.stall_retrieves = true;
        self
    }

    /// Transfers are answered with 150 but no data connection is made;
    /// a 425 follows after a delay.
    pub fn withhold_data_connections(mut self) -> Self {
        self.state.withhold_data = true;
        self
    }

    /// Transfers are answered with 200 and then 150.
    pub fn accept_before_opening(mut self) -> Self {
        self.state.accept_before_opening = true;
        self
    }

    /// Bind to an ephemeral loopback port and start serving.
    pub async fn start(self) -> io::Result<FakeFtpServer> {
        let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).await?;
        let addr = listener.local_addr()?;
        let state = Arc::new(Mutex::new(self.state));

        let accept_state = state.clone();
        let task = tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let session_state = accept_state.clone();
                tokio::spawn(async move {
                    if let Err(e) = Session::new(stream, session_state).run().await {
                        log::debug!("fake ftp session ended: {}", e);
                    }
                });
            }
        });

        Ok(FakeFtpServer { addr, state, task })
    }
}

/// A running fake server; stops accepting when dropped.
pub struct FakeFtpServer {
    addr: SocketAddr,
    state: Arc<Mutex<FakeState>>,
    task: JoinHandle<()>,
}

impl FakeFtpServer {
    /// Builder with credentials `user` / `secret` and an empty root.
    pub fn builder() -> FakeFtpServerBuilder {
        let mut state = FakeState {
            user: "user".into(),
            password: "secret".into(),
            ..FakeState::default()
        };
        state.add_dir("/");
        FakeFtpServerBuilder { state }
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Client config pointing at this server with its credentials.
    pub fn config(&self) -> FtpConnectionConfig {
        let state = self.lock();
        let mut config = FtpConnectionConfig::new(self.addr.ip().to_string(), self.addr.port())
            .with_credentials(state.user.clone(), state.password.clone());
        config.timeout_sec = 5;
        config
    }

    /// Every command line received so far, across all sessions.
    pub fn commands(&self) -> Vec<String> {
        self.lock().commands.clone()
    }

    pub fn file(&self, path: &str) -> Option<Vec<u8>> {
        self.lock().files.get(&normalize(path)).cloned()
    }

    pub fn has_dir(&self, path: &str) -> bool {
        self.lock().dirs.contains(&normalize(path))
    }

    pub fn set_file(&self, path: &str, content: impl Into<Vec<u8>>) {
        let path = normalize(path);
        let mut state = self.lock();
        state.add_dir(&parent_of(&path));
        state.files.insert(path, content.into());
    }

    pub fn set_stall_retrieves(&self, stall: bool) {
        self.lock().stall_retrieves = stall;
    }

    /// Highest number of simultaneously open control connections.
    pub fn peak_sessions(&self) -> usize {
        self.lock().peak_sessions
    }

    /// Number of completed RETR transfers.
    pub fn retrieves(&self) -> usize {
        self.lock().retrieves
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, FakeState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Drop for FakeFtpServer {
    fn drop(&mut self) {
        self.task.abort();
    }
}

// ─── Session ─────────────────────────────────────────────────────────

struct Session {
    state: Arc<Mutex<FakeState>>,
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
    local_ip: IpAddr,
    user_ok: bool,
    logged_in: bool,
    counted: bool,
    cwd: String,
    passive: Option<TcpListener>,
    active: Option<SocketAddr>,
    rest: u64,
    rename_from: Option<String>,
}

impl Session {
    fn new(stream: TcpStream, state: Arc<Mutex<FakeState>>) -> Self {
        let local_ip = stream
            .local_addr()
            .map(|a| a.ip())
            .unwrap_or(IpAddr::V4(Ipv4Addr::LOCALHOST));
        let (rd, wr) = stream.into_split();
        Self {
            state,
            reader: BufReader::new(rd),
            writer: wr,
            local_ip,
            user_ok: false,
            logged_in: false,
            counted: false,
            cwd: "/".into(),
            passive: None,
            active: None,
            rest: 0,
            rename_from: None,
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, FakeState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn enter(&mut self) {
        let mut state = self.lock();
        state.sessions += 1;
        state.peak_sessions = state.peak_sessions.max(state.sessions);
        drop(state);
        self.counted = true;
    }

    fn leave(&mut self) {
        if self.counted {
            self.lock().sessions -= 1;
            self.counted = false;
        }
    }

    async fn run(mut self) -> io::Result<()> {
        self.enter();
        let result = self.serve().await;
        self.leave();
        result
    }

    async fn serve(&mut self) -> io::Result<()> {
        self.send("220-sftpc fake server\r\n220 Ready").await?;
        loop {
            let Some(line) = self.next_command().await? else {
                return Ok(());
            };
            let (verb, arg) = match line.split_once(' ') {
                Some((v, a)) => (v.to_ascii_uppercase(), a.to_string()),
                None => (line.to_ascii_uppercase(), String::new()),
            };
            if !self.handle(&verb, &arg).await? {
                return Ok(());
            }
        }
    }

    /// Next command line with the terminator and any Telnet bytes removed.
    async fn next_command(&mut self) -> io::Result<Option<String>> {
        let mut raw = Vec::new();
        if self.reader.read_until(b'\n', &mut raw).await? == 0 {
            return Ok(None);
        }
        let text = String::from_utf8_lossy(&raw);
        let line = text
            .trim_end_matches(['\r', '\n'])
            .trim_start_matches(|c: char| !c.is_ascii_alphabetic())
            .to_string();
        self.lock().commands.push(line.clone());
        Ok(Some(line))
    }

    async fn send(&mut self, reply: &str) -> io::Result<()> {
        self.writer.write_all(reply.as_bytes()).await?;
        self.writer.write_all(b"\r\n").await?;
        self.writer.flush().await
    }

    fn resolve(&self, arg: &str) -> String {
        if arg.is_empty() {
            self.cwd.clone()
        } else if arg.starts_with('/') {
            normalize(arg)
        } else {
            normalize(&format!("{}/{}", self.cwd, arg))
        }
    }

    async fn handle(&mut self, verb: &str, arg: &str) -> io::Result<bool> {
        match verb {
            "USER" => {
                let expected = self.lock().user.clone();
                self.user_ok = arg == expected;
                self.send("331 Password required").await?;
            }
            "PASS" => {
                let ok = self.user_ok && arg == self.lock().password;
                if ok {
                    self.logged_in = true;
                    self.send("230 Logged in").await?;
                } else {
                    self.send("530 Login incorrect").await?;
                }
            }
            "QUIT" => {
                self.leave();
                self.send("221 Goodbye").await?;
                return Ok(false);
            }
            _ if !self.logged_in => self.send("530 Please login with USER and PASS").await?,
            "TYPE" => self.send(&format!("200 Type set to {}", arg)).await?,
            "NOOP" => self.send("200 NOOP ok").await?,
            "OPTS" => self.send("200 MLST OPTS type;size;").await?,
            "PWD" => {
                let reply = format!("257 {} is the current directory", quote_257(&self.cwd));
                self.send(&reply).await?;
            }
            "CWD" => {
                let target = self.resolve(arg);
                if self.lock().dirs.contains(&target) {
                    self.cwd = target;
                    self.send("250 Directory changed").await?;
                } else {
                    self.send("550 No such directory").await?;
                }
            }
            "CDUP" => {
                self.cwd = parent_of(&self.cwd);
                self.send("250 Directory changed").await?;
            }
            "PASV" | "EPSV" => {
                let listener = TcpListener::bind((self.local_ip, 0)).await?;
                let port = listener.local_addr()?.port();
                self.passive = Some(listener);
                self.active = None;
                let reply = if verb == "PASV" {
                    let ip = match self.local_ip {
                        IpAddr::V4(v4) => v4,
                        IpAddr::V6(_) => Ipv4Addr::LOCALHOST,
                    };
                    let o = ip.octets();
                    format!(
                        "227 Entering Passive Mode ({},{},{},{},{},{}).",
                        o[0],
                        o[1],
                        o[2],
                        o[3],
                        port >> 8,
                        port & 0xFF
                    )
                } else {
                    format!("229 Entering Extended Passive Mode (|||{}|)", port)
                };
                self.send(&reply).await?;
            }
            "PORT" => match parse_port_arg(arg) {
                Some(addr) => {
                    self.active = Some(addr);
                    self.passive = None;
                    self.send("200 PORT command successful").await?;
                }
                None => self.send("501 Bad PORT argument").await?,
            },
            "EPRT" => match parse_eprt_arg(arg) {
                Some(addr) => {
                    self.active = Some(addr);
                    self.passive = None;
                    self.send("200 EPRT command successful").await?;
                }
                None => self.send("501 Bad EPRT argument").await?,
            },
            "REST" => match arg.parse::<u64>() {
                Ok(offset) => {
                    self.rest = offset;
                    self.send(&format!("350 Restarting at {}", offset)).await?;
                }
                Err(_) => self.send("501 Bad REST argument").await?,
            },
            "SIZE" => {
                let size = self.lock().files.get(&self.resolve(arg)).map(Vec::len);
                match size {
                    Some(n) => self.send(&format!("213 {}", n)).await?,
                    None => self.send("550 No such file").await?,
                }
            }
            "MKD" => {
                let target = self.resolve(arg);
                self.lock().add_dir(&target);
                self.send(&format!("257 {} created", quote_257(&target))).await?;
            }
            "RMD" => {
                let target = self.resolve(arg);
                if self.lock().dirs.remove(&target) {
                    self.send("250 Directory removed").await?;
                } else {
                    self.send("550 No such directory").await?;
                }
            }
            "DELE" => {
                let target = self.resolve(arg);
                if self.lock().files.remove(&target).is_some() {
                    self.send("250 File deleted").await?;
                } else {
                    self.send("550 No such file").await?;
                }
            }
            "RNFR" => {
                let source = self.resolve(arg);
                if self.lock().files.contains_key(&source) {
                    self.rename_from = Some(source);
                    self.send("350 Ready for RNTO").await?;
                } else {
                    self.send("550 No such file").await?;
                }
            }
            "RNTO" => match self.rename_from.take() {
                Some(source) => {
                    let target = self.resolve(arg);
                    {
                        let mut state = self.lock();
                        if let Some(content) = state.files.remove(&source) {
                            state.files.insert(target, content);
                        }
                    }
                    self.send("250 Rename successful").await?;
                }
                None => self.send("503 RNFR required first").await?,
            },
            "RETR" => self.retrieve(arg).await?,
            "STOR" => self.store(arg).await?,
            "MLSD" => self.listing(arg, true).await?,
            "NLST" => self.listing(arg, false).await?,
            "ABOR" => self.send("225 No transfer to abort").await?,
            _ => self.send("502 Command not implemented").await?,
        }
        Ok(true)
    }

    /// Preliminary reply for a transfer command.
    async fn opening(&mut self, text: &str) -> io::Result<()> {
        if self.lock().accept_before_opening {
            self.send("200 Command accepted").await?;
        }
        self.send(text).await
    }

    async fn open_data(&mut self) -> io::Result<Option<TcpStream>> {
        if self.lock().withhold_data {
            self.passive = None;
            self.active = None;
            tokio::time::sleep(WITHHELD_DATA_DELAY).await;
            return Ok(None);
        }
        if let Some(listener) = self.passive.take() {
            let (stream, _) = timeout(DATA_ACCEPT_TIMEOUT, listener.accept())
                .await
                .map_err(|_| io::Error::new(io::ErrorKind::TimedOut, "data accept timed out"))??;
            return Ok(Some(stream));
        }
        if let Some(addr) = self.active.take() {
            return Ok(Some(TcpStream::connect(addr).await?));
        }
        Ok(None)
    }

    async fn retrieve(&mut self, arg: &str) -> io::Result<()> {
        let path = self.resolve(arg);
        let offset = std::mem::take(&mut self.rest) as usize;
        let (content, stall) = {
            let state = self.lock();
            (state.files.get(&path).cloned(), state.stall_retrieves)
        };
        let Some(content) = content else {
            self.passive = None;
            return self.send("550 No such file").await;
        };

        let body = content[offset.min(content.len())..].to_vec();
        self.opening(&format!(
            "150 Opening BINARY mode data connection for {} ({} bytes)",
            arg,
            body.len()
        ))
        .await?;
        let Some(mut data) = self.open_data().await? else {
            return self.send("425 Can't open data connection").await;
        };

        if stall {
            data.write_all(&body[..body.len().min(4)]).await?;
            data.flush().await?;
            // Hold the data connection open until the client aborts.
            if let Some(line) = self.next_command().await? {
                if line.eq_ignore_ascii_case("ABOR") {
                    drop(data);
                    self.send("426 Connection closed; transfer aborted").await?;
                    return self.send("226 ABOR command successful").await;
                }
            }
            return Ok(());
        }

        let sent = async {
            data.write_all(&body).await?;
            data.shutdown().await
        }
        .await;
        drop(data);
        if sent.is_err() {
            return self.send("426 Connection closed; transfer aborted").await;
        }
        self.lock().retrieves += 1;
        self.send("226 Transfer complete").await
    }

    async fn store(&mut self, arg: &str) -> io::Result<()> {
        let path = self.resolve(arg);
        let offset = std::mem::take(&mut self.rest) as usize;
        self.send("150 Ok to send data").await?;
        let Some(mut data) = self.open_data().await? else {
            return self.send("425 Can't open data connection").await;
        };
        let mut received = Vec::new();
        data.read_to_end(&mut received).await?;
        drop(data);

        {
            let mut state = self.lock();
            let mut content = state.files.get(&path).cloned().unwrap_or_default();
            content.truncate(offset.min(content.len()));
            content.extend_from_slice(&received);
            state.add_dir(&parent_of(&path));
            state.files.insert(path, content);
        }
        self.send("226 Transfer complete").await
    }

    async fn listing(&mut self, arg: &str, machine: bool) -> io::Result<()> {
        let dir = self.resolve(arg);
        let body = {
            let state = self.lock();
            if !state.dirs.contains(&dir) {
                None
            } else {
                let (dirs, files) = state.children(&dir);
                let mut lines = Vec::new();
                if machine {
                    let typed = |t: &str| {
                        if state.omit_type_fact {
                            String::new()
                        } else {
                            format!("type={};", t)
                        }
                    };
                    lines.push(format!("{}perm=el; .", typed("cdir")));
                    lines.push(format!("{}perm=el; ..", typed("pdir")));
                    for d in &dirs {
                        lines.push(format!("{}sizd=4096;perm=el; {}", typed("dir"), d));
                    }
                    for (f, len) in &files {
                        lines.push(format!(
                            "{}size={};modify=20260101120000;perm=r; {}",
                            typed("file"),
                            len,
                            f
                        ));
                    }
                } else {
                    lines.extend(dirs);
                    lines.extend(files.into_iter().map(|(f, _)| f));
                }
                Some(lines)
            }
        };

        let Some(lines) = body else {
            self.passive = None;
            return self.send("550 No such directory").await;
        };

        self.opening("150 Here comes the directory listing").await?;
        let Some(mut data) = self.open_data().await? else {
            return self.send("425 Can't open data connection").await;
        };
        for line in &lines {
            data.write_all(line.as_bytes()).await?;
            data.write_all(b"\r\n").await?;
        }
        data.shutdown().await?;
        drop(data);
        self.send("226 Directory send OK").await
    }
}

// ─── Path helpers ────────────────────────────────────────────────────

fn normalize(path: &str) -> String {
    let mut parts: Vec<&str> = Vec::new();
    for part in path.split('/') {
        match part {
            "" | "." => {}
            ".." => {
                parts.pop();
            }
            p => parts.push(p),
        }
    }
    format!("/{}", parts.join("/"))
}

fn parent_of(path: &str) -> String {
    match path.rfind('/') {
        Some(0) | None => "/".to_string(),
        Some(i) => path[..i].to_string(),
    }
}

fn base_name(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

fn parse_port_arg(arg: &str) -> Option<SocketAddr> {
    let nums: Vec<u8> = arg
        .split(',')
        .map(|n| n.trim().parse::<u8>())
        .collect::<Result<_, _>>()
        .ok()?;
    if nums.len() != 6 {
        return None;
    }
    let ip = Ipv4Addr::new(nums[0], nums[1], nums[2], nums[3]);
    let port = u16::from(nums[4]) * 256 + u16::from(nums[5]);
    Some(SocketAddr::new(IpAddr::V4(ip), port))
}

fn parse_eprt_arg(arg: &str) -> Option<SocketAddr> {
    let delim = arg.chars().next()?;
    let parts: Vec<&str> = arg.split(delim).collect();
    if parts.len() != 5 {
        return None;
    }
    let ip: IpAddr = parts[2].parse().ok()?;
    let port: u16 = parts[3].parse().ok()?;
    Some(SocketAddr::new(ip, port))
}
