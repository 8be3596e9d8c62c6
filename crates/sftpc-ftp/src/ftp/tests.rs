//! End-to-end tests against the in-process fake server.

use crate::ftp::testing::FakeFtpServer;
use crate::ftp::*;
use std::time::Duration;

async fn server() -> FakeFtpServer {
    FakeFtpServer::builder()
        .file("/pub/a.txt", b"hello world".to_vec())
        .file("/pub/sub/b.bin", vec![7u8; 200_000])
        .dir("/pub/empty")
        .start()
        .await
        .unwrap()
}

#[tokio::test]
async fn test_open_logs_in_and_navigates() {
    let srv = server().await;
    let mut client = FtpClient::open(srv.config()).await.unwrap();
    assert_eq!(client.state(), SessionState::Authenticated);
    assert!(client.info.server_banner.starts_with("220-"));

    assert_eq!(client.pwd().await.unwrap(), "/");
    assert_eq!(client.cwd("pub").await.unwrap(), "/pub");
    assert_eq!(client.cwd("..").await.unwrap(), "/");
    client.noop().await.unwrap();
    client.quit().await.unwrap();

    let commands = srv.commands();
    assert_eq!(commands[0], "USER user");
    assert_eq!(commands[1], "PASS secret");
    assert!(commands.contains(&"CDUP".to_string()));
    assert_eq!(commands.last().unwrap(), "QUIT");
}

#[tokio::test]
async fn test_wrong_password_is_auth_failure() {
    let srv = server().await;
    let config = srv.config().with_credentials("user", "wrong");
    let err = FtpClient::open(config).await.err().unwrap();
    assert_eq!(err.kind, FtpErrorKind::AuthFailed);
    assert_eq!(err.code, Some(530));
}

#[tokio::test]
async fn test_connect_refused() {
    let srv = server().await;
    let mut config = srv.config();
    drop(srv);
    tokio::time::sleep(Duration::from_millis(50)).await;
    config.port = {
        let spare = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        spare.local_addr().unwrap().port()
    };
    let err = FtpClient::connect(config).await.err().unwrap();
    assert_eq!(err.kind, FtpErrorKind::ConnectionFailed);
}

async fn download_with(mode: DataChannelMode, expected_cmd: &str) {
    let srv = server().await;
    let dir = tempfile::tempdir().unwrap();
    let mut config = srv.config();
    config.data_channel_mode = mode;

    let mut client = FtpClient::open(config).await.unwrap();
    let local = dir.path().join("nested").join("a.txt");
    let n = client.get_file("/pub/a.txt", &local, None).await.unwrap();
    assert_eq!(n, 11);
    assert_eq!(std::fs::read(&local).unwrap(), b"hello world");
    assert_eq!(client.state(), SessionState::Authenticated);
    assert_eq!(client.info.bytes_downloaded, 11);
    client.quit().await.unwrap();

    let commands = srv.commands();
    assert!(commands.iter().any(|c| c == "TYPE I"));
    assert!(commands.iter().any(|c| c.starts_with(expected_cmd)), "{:?}", commands);
    assert!(commands.iter().any(|c| c == "RETR /pub/a.txt"));
}

#[tokio::test]
async fn test_download_passive() {
    download_with(DataChannelMode::Passive, "PASV").await;
}

#[tokio::test]
async fn test_download_extended_passive() {
    download_with(DataChannelMode::ExtendedPassive, "EPSV").await;
}

#[tokio::test]
async fn test_download_active() {
    download_with(DataChannelMode::Active, "PORT 127,0,0,1,").await;
}

#[tokio::test]
async fn test_download_extended_active() {
    download_with(DataChannelMode::ExtendedActive, "EPRT |1|127.0.0.1|").await;
}

#[tokio::test]
async fn test_large_binary_download_spans_blocks() {
    let srv = server().await;
    let mut config = srv.config();
    config.block_size = 4096;
    let mut client = FtpClient::open(config).await.unwrap();

    let mut sink = Vec::new();
    let n = client
        .retrieve_binary("RETR /pub/sub/b.bin", &mut sink, None)
        .await
        .unwrap();
    assert_eq!(n, 200_000);
    assert!(sink.iter().all(|&b| b == 7));
}

#[tokio::test]
async fn test_resume_download_with_rest() {
    let srv = server().await;
    let dir = tempfile::tempdir().unwrap();
    let local = dir.path().join("a.txt");
    std::fs::write(&local, b"hello").unwrap();

    let mut client = FtpClient::open(srv.config()).await.unwrap();
    let n = client.get_file("/pub/a.txt", &local, Some(5)).await.unwrap();
    assert_eq!(n, 6);
    assert_eq!(std::fs::read(&local).unwrap(), b"hello world");
    assert!(srv.commands().contains(&"REST 5".to_string()));
}

#[tokio::test]
async fn test_missing_file_leaves_session_usable() {
    let srv = server().await;
    let mut client = FtpClient::open(srv.config()).await.unwrap();
    let mut sink = Vec::new();
    let err = client
        .retrieve_binary("RETR /pub/nope.txt", &mut sink, None)
        .await
        .unwrap_err();
    assert_eq!(err.kind, FtpErrorKind::NotFound);
    assert_eq!(err.code, Some(550));
    assert_eq!(client.state(), SessionState::Authenticated);
    client.noop().await.unwrap();
}

#[tokio::test]
async fn test_missed_active_data_connection_closes_session() {
    let srv = FakeFtpServer::builder()
        .file("/pub/a.txt", b"hello".to_vec())
        .withhold_data_connections()
        .start()
        .await
        .unwrap();
    let mut config = srv.config();
    config.data_channel_mode = DataChannelMode::Active;
    config.timeout_sec = 1;
    let mut client = FtpClient::open(config).await.unwrap();

    let mut sink = Vec::new();
    let err = client
        .retrieve_binary("RETR /pub/a.txt", &mut sink, None)
        .await
        .unwrap_err();
    assert_eq!(err.kind, FtpErrorKind::Timeout);
    assert!(!client.is_connected());

    // The late 425 must never be read as the reply to a later command.
    let err = client.noop().await.unwrap_err();
    assert_eq!(err.kind, FtpErrorKind::Disconnected);
    assert!(!srv.commands().contains(&"NOOP".to_string()));
}

#[tokio::test]
async fn test_failed_download_leaves_no_file() {
    let srv = FakeFtpServer::builder()
        .file("/big.bin", vec![1u8; 64])
        .stall_retrieves()
        .start()
        .await
        .unwrap();
    let dir = tempfile::tempdir().unwrap();
    let mut config = srv.config();
    config.timeout_sec = 1;

    let fresh = dir.path().join("fresh.bin");
    let mut client = FtpClient::open(config.clone()).await.unwrap();
    let err = client.get_file("/big.bin", &fresh, None).await.unwrap_err();
    assert_eq!(err.kind, FtpErrorKind::Timeout);
    assert_eq!(err.path.as_deref(), Some("/big.bin"));
    assert!(!fresh.exists());

    let resumed = dir.path().join("resumed.bin");
    std::fs::write(&resumed, [1u8; 2]).unwrap();
    let mut client = FtpClient::open(config).await.unwrap();
    client.get_file("/big.bin", &resumed, Some(2)).await.unwrap_err();
    assert_eq!(std::fs::read(&resumed).unwrap(), vec![1u8; 6]);
}

#[tokio::test]
async fn test_accepted_then_opening_transfer_reply() {
    let srv = FakeFtpServer::builder()
        .file("/pub/a.txt", b"hello world".to_vec())
        .accept_before_opening()
        .start()
        .await
        .unwrap();
    let mut client = FtpClient::open(srv.config()).await.unwrap();

    let mut sink = Vec::new();
    let n = client.retrieve_binary("RETR /pub/a.txt", &mut sink, None).await.unwrap();
    assert_eq!(n, 11);
    assert_eq!(sink, b"hello world");

    let entries = client.list_directory("/pub").await.unwrap();
    assert!(entries.iter().any(|e| e.name == "a.txt"));
    client.noop().await.unwrap();
}

#[tokio::test]
async fn test_overlong_data_line_is_framing_error() {
    let text = format!("short\r\n{}\r\ntail\r\n", "x".repeat(300));
    let srv = FakeFtpServer::builder()
        .file("/long.txt", text)
        .start()
        .await
        .unwrap();
    let mut config = srv.config();
    config.max_line_length = 128;
    let mut client = FtpClient::open(config).await.unwrap();

    let mut seen = Vec::new();
    let err = client
        .retrieve_lines("RETR /long.txt", |line| seen.push(line))
        .await
        .unwrap_err();
    assert_eq!(err.kind, FtpErrorKind::Framing);
    assert_eq!(seen, vec!["short"]);

    assert_eq!(client.state(), SessionState::Authenticated);
    client.noop().await.unwrap();
}

#[tokio::test]
async fn test_machine_listing() {
    let srv = server().await;
    let mut client = FtpClient::open(srv.config()).await.unwrap();
    let entries = client.list_directory("/pub").await.unwrap();

    let names: Vec<&str> = entries.iter().map(|e| e.name.as_str()).collect();
    assert_eq!(names, vec![".", "..", "empty", "sub", "a.txt"]);
    assert!(entries[0].is_structural());
    let file = entries.iter().find(|e| e.name == "a.txt").unwrap();
    assert!(file.is_file());
    assert_eq!(file.size(), Some(11));
    assert_eq!(file.path(), "/pub/a.txt");
    assert!(file.modified().is_some());
    assert!(entries.iter().find(|e| e.name == "sub").unwrap().is_directory());

    let commands = srv.commands();
    assert!(commands.iter().any(|c| c == "TYPE A"));
    assert!(commands.iter().any(|c| c == "MLSD /pub"));
}

#[tokio::test]
async fn test_mlsd_requests_facts() {
    let srv = server().await;
    let mut client = FtpClient::open(srv.config()).await.unwrap();
    client.cwd("/pub").await.unwrap();
    let entries = client.mlsd(None, &["type", "size"]).await.unwrap();
    assert_eq!(entries.len(), 5);
    assert_eq!(entries[4].path(), "a.txt");

    let commands = srv.commands();
    assert!(commands.contains(&"OPTS MLST type;size;".to_string()));
    assert!(commands.contains(&"MLSD".to_string()));
}

#[tokio::test]
async fn test_listing_without_type_fact() {
    let srv = FakeFtpServer::builder()
        .file("/r/a.txt", b"x".to_vec())
        .omit_type_fact()
        .start()
        .await
        .unwrap();
    let mut client = FtpClient::open(srv.config()).await.unwrap();
    let entries = client.list_directory("/r").await.unwrap();
    let file = entries.iter().find(|e| e.name == "a.txt").unwrap();
    assert_eq!(file.kind().unwrap_err().kind, FtpErrorKind::Listing);
}

#[tokio::test]
async fn test_listing_missing_directory() {
    let srv = server().await;
    let mut client = FtpClient::open(srv.config()).await.unwrap();
    let err = client.list_directory("/nowhere").await.unwrap_err();
    assert_eq!(err.code, Some(550));
    assert_eq!(err.path.as_deref(), Some("/nowhere"));
    client.noop().await.unwrap();
}

#[tokio::test]
async fn test_name_listing_and_line_count() {
    let srv = server().await;
    let mut client = FtpClient::open(srv.config()).await.unwrap();
    let names = client.nlst(Some("/pub")).await.unwrap();
    assert_eq!(names, vec!["empty", "sub", "a.txt"]);

    let mut seen = Vec::new();
    let count = client
        .retrieve_lines("MLSD /pub/sub", |line| seen.push(line))
        .await
        .unwrap();
    assert_eq!(count, 3);
    assert!(seen[2].ends_with(" b.bin"));
    assert!(!seen[2].ends_with('\r'));
}

#[tokio::test]
async fn test_upload_binary_and_lines() {
    let srv = server().await;
    let dir = tempfile::tempdir().unwrap();
    let local = dir.path().join("up.bin");
    std::fs::write(&local, vec![1u8, 2, 3, 0, 255]).unwrap();

    let mut client = FtpClient::open(srv.config()).await.unwrap();
    assert_eq!(client.put_file(&local, "/in/up.bin", None).await.unwrap(), 5);
    assert_eq!(srv.file("/in/up.bin").unwrap(), vec![1u8, 2, 3, 0, 255]);
    assert_eq!(client.info.bytes_uploaded, 5);

    let mut source: &[u8] = b"one\ntwo\r\nthree";
    let sent = client.store_lines("STOR /in/notes.txt", &mut source).await.unwrap();
    assert_eq!(sent, 17);
    assert_eq!(srv.file("/in/notes.txt").unwrap(), b"one\r\ntwo\r\nthree\r\n");
}

#[tokio::test]
async fn test_directory_commands() {
    let srv = server().await;
    let mut client = FtpClient::open(srv.config()).await.unwrap();

    assert_eq!(client.mkdir("/new dir").await.unwrap(), "/new dir");
    assert!(srv.has_dir("/new dir"));
    client.rmdir("/new dir").await.unwrap();
    assert!(!srv.has_dir("/new dir"));

    assert_eq!(client.size("/pub/a.txt").await.unwrap(), 11);
    client.rename("/pub/a.txt", "/pub/c.txt").await.unwrap();
    assert!(srv.file("/pub/a.txt").is_none());
    assert_eq!(srv.file("/pub/c.txt").unwrap(), b"hello world");

    client.delete("/pub/c.txt").await.unwrap();
    let err = client.delete("/pub/c.txt").await.unwrap_err();
    assert_eq!(err.kind, FtpErrorKind::NotFound);
    assert_eq!(err.path.as_deref(), Some("/pub/c.txt"));
}

#[tokio::test]
async fn test_abort_interrupts_transfer() {
    let srv = FakeFtpServer::builder()
        .file("/big.bin", vec![1u8; 64])
        .stall_retrieves()
        .start()
        .await
        .unwrap();
    let mut client = FtpClient::open(srv.config()).await.unwrap();

    let handle = client.abort_handle();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(200)).await;
        handle.abort();
    });

    let mut sink = Vec::new();
    let err = client
        .retrieve_binary("RETR /big.bin", &mut sink, None)
        .await
        .unwrap_err();
    assert_eq!(err.kind, FtpErrorKind::Cancelled);
    assert_eq!(sink, vec![1u8; 4]);
    assert_eq!(client.state(), SessionState::Authenticated);
    assert!(srv.commands().contains(&"ABOR".to_string()));

    client.noop().await.unwrap();
}

#[tokio::test]
async fn test_abort_outside_transfer_is_ignored() {
    let srv = server().await;
    let mut client = FtpClient::open(srv.config()).await.unwrap();
    client.abort_handle().abort();

    let mut sink = Vec::new();
    let n = client.retrieve_binary("RETR /pub/a.txt", &mut sink, None).await.unwrap();
    assert_eq!(n, 11);
    assert!(!srv.commands().contains(&"ABOR".to_string()));
}

#[tokio::test]
async fn test_quit_is_idempotent() {
    let srv = server().await;
    let mut client = FtpClient::open(srv.config()).await.unwrap();
    client.quit().await.unwrap();
    client.quit().await.unwrap();
    assert_eq!(client.state(), SessionState::Closed);
    assert!(!client.is_connected());

    let err = client.noop().await.unwrap_err();
    assert_eq!(err.kind, FtpErrorKind::Disconnected);
    let quits = srv.commands().iter().filter(|c| c.as_str() == "QUIT").count();
    assert_eq!(quits, 1);
}

#[tokio::test]
async fn test_command_injection_rejected_before_sending() {
    let srv = server().await;
    let mut client = FtpClient::open(srv.config()).await.unwrap();
    let err = client.execute("NOOP\r\nDELE /pub/a.txt").await.unwrap_err();
    assert_eq!(err.kind, FtpErrorKind::ProtocolViolation);
    assert!(srv.file("/pub/a.txt").is_some());
    client.noop().await.unwrap();
}
