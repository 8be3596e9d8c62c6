//! MLSD fact-line parser (RFC 3659 §7).
//!
//! ```text
//! type=file;size=1234;modify=20240101120000;perm=rw; filename.txt
//! ```
//!
//! Everything before the first space is a `;`-separated fact list, the
//! rest of the line (spaces included) is the entry name.

use crate::ftp::error::{FtpError, FtpResult};
use crate::ftp::types::DirectoryEntry;
use std::collections::HashMap;

/// Parse one MLSD line into an entry under `parent`.
pub fn parse_mlsd_line(line: &str, parent: &str) -> FtpResult<DirectoryEntry> {
    let line = line.trim_end_matches(['\r', '\n']);
    let (facts_block, name) = line
        .split_once(' ')
        .ok_or_else(|| FtpError::listing(format!("MLSD line has no name: '{}'", line)))?;
    if name.is_empty() {
        return Err(FtpError::listing(format!("MLSD line has an empty name: '{}'", line)));
    }

    let mut facts = HashMap::new();
    for fact in facts_block.split(';').filter(|f| !f.is_empty()) {
        let (key, value) = fact.split_once('=').unwrap_or((fact, ""));
        facts.insert(key.trim().to_ascii_lowercase(), value.to_string());
    }

    Ok(DirectoryEntry::new(name, parent, facts))
}

/// Parse a full MLSD body, skipping blank lines.
pub fn parse_mlsd<S: AsRef<str>>(lines: &[S], parent: &str) -> FtpResult<Vec<DirectoryEntry>> {
    lines
        .iter()
        .map(AsRef::as_ref)
        .filter(|l| !l.trim().is_empty())
        .map(|l| parse_mlsd_line(l, parent))
        .collect()
}
