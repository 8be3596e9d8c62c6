//! Directory operations: machine listings, name listings, mkdir, rmdir,
//! rename and delete.

use crate::ftp::client::FtpClient;
use crate::ftp::error::{FtpError, FtpResult};
use crate::ftp::parser;
use crate::ftp::reply;
use crate::ftp::types::*;

impl FtpClient {
    // ─── MLSD ────────────────────────────────────────────────────

    /// Machine listing of `path` (or the working directory).
    ///
    /// When `facts` is non-empty the server is asked to report exactly
    /// those facts with `OPTS MLST f1;f2;` first.
    pub async fn mlsd(&mut self, path: Option<&str>, facts: &[&str]) -> FtpResult<Vec<DirectoryEntry>> {
        if !facts.is_empty() {
            let mut opts = String::from("OPTS MLST ");
            for fact in facts {
                opts.push_str(fact);
                opts.push(';');
            }
            self.expect_ok(&opts).await?;
        }

        let (cmd, parent) = match path.filter(|p| !p.is_empty()) {
            Some(p) => (format!("MLSD {}", p), p.replace('\\', "/")),
            None => ("MLSD".to_string(), String::new()),
        };

        let mut lines = Vec::new();
        self.retrieve_lines(&cmd, |line| lines.push(line))
            .await
            .map_err(|e| e.or_path(parent.clone()))?;
        let entries = parser::parse_mlsd(&lines, &parent).map_err(|e| e.or_path(parent.clone()))?;
        log::debug!("[{}] MLSD {}: {} entries", self.id, parent, entries.len());
        Ok(entries)
    }

    /// Full machine listing of `path`, structural entries included.
    pub async fn list_directory(&mut self, path: &str) -> FtpResult<Vec<DirectoryEntry>> {
        self.mlsd(Some(path), &[]).await
    }

    // ─── NLST ────────────────────────────────────────────────────

    /// Plain name listing.
    pub async fn nlst(&mut self, path: Option<&str>) -> FtpResult<Vec<String>> {
        let cmd = match path.filter(|p| !p.is_empty()) {
            Some(p) => format!("NLST {}", p),
            None => "NLST".to_string(),
        };
        let mut names = Vec::new();
        self.retrieve_lines(&cmd, |line| {
            if !line.is_empty() {
                names.push(line);
            }
        })
        .await?;
        Ok(names)
    }

    // ─── MKD ─────────────────────────────────────────────────────

    /// Create a directory on the remote server and return the path the
    /// server reports for it.
    pub async fn mkdir(&mut self, path: &str) -> FtpResult<String> {
        let resp = self
            .expect_ok(&format!("MKD {}", path))
            .await
            .map_err(|e| e.with_path(path))?;
        // Some servers answer MKD with a bare 250.
        if resp.code == 257 {
            reply::parse_257(&resp.text())
        } else {
            Ok(path.to_string())
        }
    }

    // ─── RMD ─────────────────────────────────────────────────────

    /// Remove an empty directory.
    pub async fn rmdir(&mut self, path: &str) -> FtpResult<()> {
        self.expect_ok(&format!("RMD {}", path))
            .await
            .map_err(|e| e.with_path(path))?;
        Ok(())
    }

    // ─── RNFR / RNTO ─────────────────────────────────────────────

    pub async fn rename(&mut self, from: &str, to: &str) -> FtpResult<()> {
        let resp = self
            .execute(&format!("RNFR {}", from))
            .await
            .map_err(|e| e.with_path(from))?;
        if !resp.is_intermediate() {
            return Err(FtpError::protocol_violation(format!(
                "RNFR expected a 3xx reply, got: {}",
                resp.text()
            ))
            .with_code(resp.code)
            .with_path(from));
        }
        self.expect_ok(&format!("RNTO {}", to))
            .await
            .map_err(|e| e.with_path(to))?;
        Ok(())
    }

    // ─── DELE ────────────────────────────────────────────────────

    /// Delete a remote file.
    pub async fn delete(&mut self, path: &str) -> FtpResult<()> {
        self.expect_ok(&format!("DELE {}", path))
            .await
            .map_err(|e| e.with_path(path))?;
        Ok(())
    }
}
