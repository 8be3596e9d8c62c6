//! Reply-body parsers (RFC 959 §4.2, RFC 2428 §3, RFC 3659 §4).
//!
//! Pure functions over the reply text; they never touch a connection.

use crate::ftp::error::{FtpError, FtpResult};
use lazy_static::lazy_static;
use regex::Regex;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};

lazy_static! {
    static ref RE_150: Regex = Regex::new(r"(?i)^150 .* \((\d+) bytes\)").unwrap();
    static ref RE_227: Regex = Regex::new(r"(\d+),(\d+),(\d+),(\d+),(\d+),(\d+)").unwrap();
}

fn require_code(text: &str, code: &str) -> FtpResult<()> {
    if text.starts_with(code) {
        Ok(())
    } else {
        Err(FtpError::framing(format!("Expected a {} reply, got '{}'", code, text)))
    }
}

/// Byte count announced by `150 ... (<N> bytes)`; `None` when the server
/// does not announce one.
pub fn parse_150(text: &str) -> FtpResult<Option<u64>> {
    require_code(text, "150")?;
    Ok(RE_150
        .captures(text)
        .and_then(|caps| caps[1].parse::<u64>().ok()))
}

/// Size from a `213 <N>` reply to SIZE.
pub fn parse_213(text: &str) -> FtpResult<u64> {
    require_code(text, "213")?;
    text.get(3..)
        .map(str::trim)
        .and_then(|s| s.parse::<u64>().ok())
        .ok_or_else(|| FtpError::framing(format!("Cannot parse SIZE reply: '{}'", text)))
}

/// Address from `227 Entering Passive Mode (h1,h2,h3,h4,p1,p2)`.
pub fn parse_227(text: &str) -> FtpResult<(Ipv4Addr, u16)> {
    require_code(text, "227")?;
    let caps = RE_227
        .captures(text)
        .ok_or_else(|| FtpError::framing(format!("Cannot parse PASV reply: '{}'", text)))?;

    let nums = (1..=6)
        .map(|i| {
            caps[i]
                .parse::<u8>()
                .map_err(|_| FtpError::framing(format!("PASV field out of range: '{}'", &caps[i])))
        })
        .collect::<FtpResult<Vec<u8>>>()?;

    let host = Ipv4Addr::new(nums[0], nums[1], nums[2], nums[3]);
    let port = u16::from(nums[4]) * 256 + u16::from(nums[5]);
    Ok((host, port))
}

/// Address from `229 Entering Extended Passive Mode (|||port|)`.
///
/// The reply carries no host; the data connection goes to `peer`.
pub fn parse_229(text: &str, peer: IpAddr) -> FtpResult<SocketAddr> {
    require_code(text, "229")?;
    let malformed = || FtpError::framing(format!("Cannot parse EPSV reply: '{}'", text));

    let left = text.find('(').ok_or_else(malformed)?;
    let right = text[left + 1..]
        .find(')')
        .map(|r| left + 1 + r)
        .ok_or_else(malformed)?;
    let inner = &text[left + 1..right];

    let delim = inner.chars().next().ok_or_else(malformed)?;
    if !inner.ends_with(delim) {
        return Err(malformed());
    }
    let parts: Vec<&str> = inner.split(delim).collect();
    if parts.len() != 5 {
        return Err(malformed());
    }
    let port = parts[3].parse::<u16>().map_err(|_| malformed())?;
    Ok(SocketAddr::new(peer, port))
}

/// Path from `257 "<path>" ...`, where `""` inside the quotes stands for
/// one literal quote.
pub fn parse_257(text: &str) -> FtpResult<String> {
    require_code(text, "257")?;
    let open = text
        .find('"')
        .ok_or_else(|| FtpError::framing(format!("No quoted path in 257 reply: '{}'", text)))?;

    let mut path = String::new();
    let mut chars = text[open + 1..].chars().peekable();
    while let Some(c) = chars.next() {
        if c == '"' {
            if chars.peek() == Some(&'"') {
                chars.next();
            } else {
                return Ok(path);
            }
        }
        path.push(c);
    }
    Err(FtpError::framing(format!("Unbalanced quotes in 257 reply: '{}'", text)))
}

/// Quote a path for a 257 reply; the inverse of [`parse_257`].
pub fn quote_257(path: &str) -> String {
    format!("\"{}\"", path.replace('"', "\"\""))
}
