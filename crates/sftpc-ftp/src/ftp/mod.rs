//! # sftpc-ftp: raw FTP client engine
//!
//! Implementation of the FTP protocol (RFC 959) written directly against
//! tokio sockets, with the extensions a mirroring client needs:
//! - **RFC 2428**: EPSV / EPRT for non-IPv4 control connections
//! - **RFC 3659**: MLSD machine listings, SIZE, REST STREAM
//!
//! Architecture:
//! - `types`: config, reply, session state, directory entries
//! - `error`: FTP-specific error type
//! - `reply`: pure parsers for 150/213/227/229/257 reply bodies
//! - `protocol`: control-channel codec (line framing, multiline replies)
//! - `connection`: TCP connect + greeting
//! - `client`: stateful client (login, CWD, PWD, TYPE, QUIT, abort)
//! - `transfer`: data channel negotiation (PASV/EPSV/PORT/EPRT)
//! - `file_ops`: retrieve/store in binary and text framing
//! - `parser`: MLSD fact-line parser
//! - `directory`: MLSD/NLST listings, MKD, RMD, rename, delete
//! - `testing`: scripted fake server (tests and `test-support` only)

pub mod types;
pub mod error;
pub mod reply;
pub mod protocol;
pub mod connection;
pub mod client;
pub mod transfer;
pub mod file_ops;
pub mod parser;
pub mod directory;

#[cfg(any(test, feature = "test-support"))]
pub mod testing;

#[cfg(test)]
mod tests;

pub use client::{AbortHandle, FtpClient};
pub use error::{FtpError, FtpErrorKind, FtpResult};
pub use types::*;
