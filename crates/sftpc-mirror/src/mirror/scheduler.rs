//! The mirror walk.
//!
//! Walks the remote tree depth-first from a single listing session,
//! compares every file against the local tree and hands fetches to the
//! worker pool. The walk itself is iterative and never spawns; only
//! transfers run concurrently, bounded by the pool.

use crate::mirror::cache::ListingCache;
use crate::mirror::pool::{Finished, WorkerPool};
use crate::mirror::remote::{Fetcher, RemoteTree};
use crate::mirror::stats::ThroughputStats;
use crate::mirror::types::*;
use chrono::Utc;
use sftpc_ftp::ftp::{DirectoryEntry, EntryKind, FtpError, FtpResult};
use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tokio::fs;

/// What to do with a remote file that already exists locally.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Skip,
    Replace,
}

/// Compare a local file against its remote counterpart. An unknown remote
/// size never triggers a replace.
pub fn decide(policy: ReplacePolicy, local_len: u64, remote_len: Option<u64>) -> Decision {
    let remote_len = match remote_len {
        Some(len) => len,
        None => return Decision::Skip,
    };
    let replace = match policy {
        ReplacePolicy::SkipIfSmallerEqual => local_len < remote_len,
        ReplacePolicy::ReplaceIfDifferent => local_len != remote_len,
        ReplacePolicy::NeverReplace => false,
    };
    if replace {
        Decision::Replace
    } else {
        Decision::Skip
    }
}

/// Names that would escape or alias the local directory they land in.
fn is_safe_name(name: &str) -> bool {
    !(name.is_empty()
        || name == "."
        || name == ".."
        || name.contains('/')
        || name.contains('\\')
        || name.contains('\0'))
}

/// One mirror run. Consumed by [`Mirror::run`].
pub struct Mirror<'a, R: RemoteTree, F: Fetcher> {
    remote: &'a mut R,
    fetcher: Arc<F>,
    options: MirrorOptions,
    stats: Arc<ThroughputStats>,
    pool: WorkerPool<JobOutcome>,
    cache: ListingCache,
    exclude: Vec<glob::Pattern>,
    failures: Vec<JobFailure>,
    canceller: MirrorCanceller,
    fatal: Option<FtpError>,
}

impl<'a, R: RemoteTree, F: Fetcher> Mirror<'a, R, F> {
    pub fn new(remote: &'a mut R, fetcher: Arc<F>, options: MirrorOptions) -> FtpResult<Self> {
        options.validate()?;
        let exclude = options
            .exclude
            .iter()
            .map(|p| {
                glob::Pattern::new(p)
                    .map_err(|e| FtpError::invalid_config(format!("Invalid exclude pattern '{}': {}", p, e)))
            })
            .collect::<FtpResult<Vec<_>>>()?;

        Ok(Self {
            remote,
            fetcher,
            pool: WorkerPool::new(options.concurrency),
            cache: ListingCache::new(options.listing_cache_capacity),
            options,
            stats: Arc::new(ThroughputStats::new()),
            exclude,
            failures: Vec::new(),
            canceller: MirrorCanceller::new(),
            fatal: None,
        })
    }

    /// Handle for stopping the walk from another task.
    pub fn canceller(&self) -> MirrorCanceller {
        self.canceller.clone()
    }

    /// Live counters for this run.
    pub fn stats(&self) -> Arc<ThroughputStats> {
        self.stats.clone()
    }

    /// Mirror `remote_root` into `local_root`. A directory root's children
    /// land directly in `local_root`; a file root lands beside them.
    pub async fn run(mut self, local_root: &Path, remote_root: &str) -> FtpResult<MirrorReport> {
        let run_id = uuid::Uuid::new_v4().to_string();
        let started_at = Utc::now();
        log::info!(
            "[{}] Mirroring {} → {} (concurrency {})",
            run_id,
            remote_root,
            local_root.display(),
            self.options.concurrency
        );

        let root = self.resolve_root(remote_root).await?;
        let root_local = if root.is_file() {
            local_root.join(&root.name)
        } else {
            local_root.to_path_buf()
        };

        let mut cancelled = false;
        let mut stack = vec![(root_local, root)];
        while let Some((local, entry)) = stack.pop() {
            if self.canceller.is_cancelled() {
                log::info!("[{}] Cancelled with {} nodes left to visit", run_id, stack.len() + 1);
                cancelled = true;
                break;
            }
            self.visit(local, entry, &mut stack).await;
            if self.fatal.is_some() {
                break;
            }
        }

        let remaining = self.pool.drain().await;
        self.absorb(remaining);

        let completed = self.fatal.is_none() && !cancelled;
        if let Some(fatal) = self.fatal.take() {
            log::warn!("[{}] Walk stopped: {}", run_id, fatal);
            self.stats.record_failure();
            self.failures.push(JobFailure {
                path: fatal.path.clone().unwrap_or_else(|| remote_root.to_string()),
                error: fatal,
            });
        }

        let (hits, misses) = self.cache.counters();
        log::debug!("[{}] Listing cache: {} hits, {} misses", run_id, hits, misses);
        log::info!("[{}] Mirror finished: {}", run_id, self.stats.summary());

        Ok(MirrorReport {
            run_id,
            remote_root: remote_root.to_string(),
            local_root: local_root.to_path_buf(),
            started_at,
            finished_at: Utc::now(),
            stats: self.stats.snapshot(),
            failures: self.failures,
            completed,
            cancelled,
        })
    }

    /// Find the root's own entry in its parent's listing. `/` is always a
    /// directory; a root missing from (or unlistable through) its parent
    /// is tried as a directory directly.
    async fn resolve_root(&mut self, remote_root: &str) -> FtpResult<DirectoryEntry> {
        let trimmed = remote_root.trim_end_matches('/');
        if trimmed.is_empty() {
            return Ok(synthetic_dir("/", ""));
        }
        let (parent, name) = match trimmed.rsplit_once('/') {
            Some(("", name)) => ("/", name),
            Some((parent, name)) => (parent, name),
            None => ("", trimmed),
        };

        match self.list(parent).await {
            Ok(entries) => {
                if let Some(entry) = entries.into_iter().find(|e| e.name == name && !e.is_structural()) {
                    return Ok(entry);
                }
            }
            Err(e) if e.is_connection_fatal() => return Err(e),
            Err(e) => log::debug!("Parent listing of {} failed: {}", trimmed, e),
        }

        // Not visible through the parent; it must list as a directory.
        self.list(trimmed).await.map_err(|e| e.or_path(trimmed))?;
        Ok(synthetic_dir(name, parent))
    }

    async fn visit(&mut self, local: PathBuf, entry: DirectoryEntry, stack: &mut Vec<(PathBuf, DirectoryEntry)>) {
        let remote_path = entry.path();
        if self.is_excluded(&entry.name, &remote_path) {
            log::debug!("Excluded {}", remote_path);
            return;
        }

        let processed = self.stats.record_processed();
        if self.options.report_every > 0 && processed % self.options.report_every == 0 {
            self.stats.log_report();
        }

        match entry.kind() {
            Err(e) => self.record_failure(remote_path, e),
            Ok(EntryKind::File) => {
                if let Err(e) = self.visit_file(local, &entry, &remote_path).await {
                    self.record_failure(remote_path, e);
                }
            }
            Ok(EntryKind::Directory | EntryKind::CurrentDir) => self.visit_dir(local, &remote_path, stack).await,
            Ok(EntryKind::ParentDir) => {}
            Ok(EntryKind::Other(kind)) => log::debug!("Ignoring {} ({})", remote_path, kind),
        }
    }

    async fn visit_file(&mut self, local: PathBuf, entry: &DirectoryEntry, remote_path: &str) -> FtpResult<()> {
        let remote_size = entry.size();
        match fs::symlink_metadata(&local).await {
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => return Err(FtpError::filesystem(local.display().to_string(), &e)),
            Ok(meta) if meta.is_dir() => {
                // Only an empty directory may give way to a file.
                fs::remove_dir(&local)
                    .await
                    .map_err(|e| FtpError::filesystem(local.display().to_string(), &e))?;
            }
            Ok(meta) => match decide(self.options.replace_policy, meta.len(), remote_size) {
                Decision::Skip => {
                    self.stats.record_skip(remote_path);
                    return Ok(());
                }
                Decision::Replace => {
                    fs::remove_file(&local)
                        .await
                        .map_err(|e| FtpError::filesystem(local.display().to_string(), &e))?;
                    self.stats.record_replace(remote_path);
                }
            },
        }

        self.enqueue(TransferJob {
            remote_path: remote_path.to_string(),
            local_path: local,
            expected_size: remote_size.unwrap_or(0),
        })
        .await;
        Ok(())
    }

    async fn visit_dir(&mut self, local: PathBuf, remote_path: &str, stack: &mut Vec<(PathBuf, DirectoryEntry)>) {
        if let Err(e) = ensure_local_dir(&local).await {
            self.record_failure(remote_path.to_string(), e);
            return;
        }

        let entries = match self.list(remote_path).await {
            Ok(entries) => entries,
            Err(e) if e.is_connection_fatal() => {
                self.fatal = Some(e.or_path(remote_path));
                return;
            }
            Err(e) => {
                self.record_failure(remote_path.to_string(), e.or_path(remote_path));
                return;
            }
        };

        // Reversed so the stack pops children in listing order.
        for child in entries.into_iter().rev() {
            if child.is_structural() {
                continue;
            }
            if !is_safe_name(&child.name) {
                let path = child.path();
                self.record_failure(
                    path.clone(),
                    FtpError::listing(format!("Refusing entry name '{}'", child.name)).with_path(path),
                );
                continue;
            }
            stack.push((local.join(&child.name), child));
        }
    }

    async fn list(&mut self, path: &str) -> FtpResult<Vec<DirectoryEntry>> {
        let connection_id = self.remote.connection_id().to_string();
        if let Some(entries) = self.cache.get(&connection_id, path) {
            return Ok(entries);
        }
        let entries = self.remote.list_dir(path).await?;
        self.cache.insert(&connection_id, path, entries.clone());
        Ok(entries)
    }

    async fn enqueue(&mut self, job: TransferJob) {
        let fetcher = self.fetcher.clone();
        let stats = self.stats.clone();
        let label = job.remote_path.clone();
        let declared_size = job.expected_size;

        let finished = self
            .pool
            .submit(label, declared_size, async move {
                let started = Instant::now();
                let result = fetcher.fetch(&job).await;
                match &result {
                    Ok(bytes) => stats.record_download(&job.remote_path, *bytes, started.elapsed()),
                    Err(e) => {
                        stats.record_failure();
                        log::warn!("Failed: {}: {}", job.remote_path, e);
                    }
                }
                JobOutcome { job, result }
            })
            .await;
        self.absorb(finished);
    }

    /// Fold finished workers into the failure list. Worker-side failures
    /// were already counted by the worker.
    fn absorb(&mut self, finished: Vec<Finished<JobOutcome>>) {
        for done in finished {
            match done.output {
                Ok(JobOutcome { result: Ok(_), .. }) => {}
                Ok(JobOutcome {
                    job, result: Err(error), ..
                }) => self.failures.push(JobFailure {
                    path: job.remote_path,
                    error,
                }),
                Err(error) => {
                    self.stats.record_failure();
                    self.failures.push(JobFailure {
                        path: done.label,
                        error,
                    });
                }
            }
        }
    }

    fn record_failure(&mut self, path: String, error: FtpError) {
        log::warn!("Failed: {}: {}", path, error);
        self.stats.record_failure();
        self.failures.push(JobFailure { path, error });
    }

    fn is_excluded(&self, name: &str, path: &str) -> bool {
        self.exclude.iter().any(|p| p.matches(name) || p.matches(path))
    }
}

fn synthetic_dir(name: &str, parent: &str) -> DirectoryEntry {
    let mut facts = HashMap::new();
    facts.insert("type".to_string(), "dir".to_string());
    DirectoryEntry::new(name, parent, facts)
}

/// Make `path` a directory, removing a file that occupies it.
async fn ensure_local_dir(path: &Path) -> FtpResult<()> {
    let fs_err = |e: std::io::Error| FtpError::filesystem(path.display().to_string(), &e);
    match fs::symlink_metadata(path).await {
        Ok(meta) if meta.is_dir() => return Ok(()),
        Ok(_) => {
            log::debug!("Replacing file {} with a directory", path.display());
            fs::remove_file(path).await.map_err(fs_err)?;
        }
        Err(e) if e.kind() == ErrorKind::NotFound => {}
        Err(e) => return Err(fs_err(e)),
    }
    fs::create_dir_all(path).await.map_err(fs_err)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use sftpc_ftp::ftp::FtpErrorKind;
    use std::collections::HashSet;
    use std::sync::Mutex;

    fn entry(name: &str, parent: &str, facts: &[(&str, &str)]) -> DirectoryEntry {
        let facts = facts
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        DirectoryEntry::new(name, parent, facts)
    }

    fn file(name: &str, parent: &str, size: u64) -> DirectoryEntry {
        let size = size.to_string();
        entry(name, parent, &[("type", "file"), ("size", &size)])
    }

    fn dir(name: &str, parent: &str) -> DirectoryEntry {
        entry(name, parent, &[("type", "dir")])
    }

    fn listing(parent: &str, children: Vec<DirectoryEntry>) -> Vec<DirectoryEntry> {
        let mut all = vec![
            entry(".", parent, &[("type", "cdir")]),
            entry("..", parent, &[("type", "pdir")]),
        ];
        all.extend(children);
        all
    }

    /// `/r/a.txt` (10 bytes) and `/r/sub/b.txt` (20 bytes).
    struct MemTree {
        id: String,
        dirs: HashMap<String, Vec<DirectoryEntry>>,
        errors: HashMap<String, FtpError>,
        listed: Vec<String>,
    }

    impl MemTree {
        fn sample() -> Self {
            let mut dirs = HashMap::new();
            dirs.insert("/".to_string(), listing("/", vec![dir("r", "/")]));
            dirs.insert(
                "/r".to_string(),
                listing("/r", vec![file("a.txt", "/r", 10), dir("sub", "/r")]),
            );
            dirs.insert("/r/sub".to_string(), listing("/r/sub", vec![file("b.txt", "/r/sub", 20)]));
            Self {
                id: "mem-1".into(),
                dirs,
                errors: HashMap::new(),
                listed: Vec::new(),
            }
        }

        fn add(&mut self, path: &str, child: DirectoryEntry) {
            self.dirs.entry(path.to_string()).or_default().push(child);
        }

        fn fail(&mut self, path: &str, error: FtpError) {
            self.errors.insert(path.to_string(), error);
        }
    }

    #[async_trait]
    impl RemoteTree for MemTree {
        fn connection_id(&self) -> &str {
            &self.id
        }

        async fn list_dir(&mut self, path: &str) -> FtpResult<Vec<DirectoryEntry>> {
            self.listed.push(path.to_string());
            if let Some(e) = self.errors.get(path) {
                return Err(e.clone());
            }
            self.dirs
                .get(path)
                .cloned()
                .ok_or_else(|| FtpError::not_found("No such directory").with_path(path))
        }
    }

    /// Writes `expected_size` bytes of `x` for every job.
    #[derive(Default)]
    struct MemFetcher {
        failing: HashSet<String>,
        fetched: Mutex<Vec<String>>,
    }

    impl MemFetcher {
        fn failing(path: &str) -> Self {
            let mut failing = HashSet::new();
            failing.insert(path.to_string());
            Self {
                failing,
                ..Self::default()
            }
        }

        fn fetched(&self) -> Vec<String> {
            let mut v = self.fetched.lock().unwrap().clone();
            v.sort();
            v
        }
    }

    #[async_trait]
    impl Fetcher for MemFetcher {
        async fn fetch(&self, job: &TransferJob) -> FtpResult<u64> {
            self.fetched.lock().unwrap().push(job.remote_path.clone());
            if self.failing.contains(&job.remote_path) {
                return Err(FtpError::transfer_failed("connection reset").with_path(job.remote_path.as_str()));
            }
            if let Some(parent) = job.local_path.parent() {
                fs::create_dir_all(parent).await?;
            }
            fs::write(&job.local_path, vec![b'x'; job.expected_size as usize]).await?;
            Ok(job.expected_size)
        }
    }

    async fn run(
        tree: &mut MemTree,
        fetcher: Arc<MemFetcher>,
        options: MirrorOptions,
        local: &Path,
        remote: &str,
    ) -> MirrorReport {
        Mirror::new(tree, fetcher, options)
            .unwrap()
            .run(local, remote)
            .await
            .unwrap()
    }

    fn len(path: PathBuf) -> u64 {
        std::fs::metadata(path).unwrap().len()
    }

    #[test]
    fn test_decide() {
        use crate::mirror::types::ReplacePolicy::*;
        assert_eq!(decide(SkipIfSmallerEqual, 10, Some(10)), Decision::Skip);
        assert_eq!(decide(SkipIfSmallerEqual, 11, Some(10)), Decision::Skip);
        assert_eq!(decide(SkipIfSmallerEqual, 5, Some(10)), Decision::Replace);
        assert_eq!(decide(ReplaceIfDifferent, 11, Some(10)), Decision::Replace);
        assert_eq!(decide(ReplaceIfDifferent, 10, Some(10)), Decision::Skip);
        assert_eq!(decide(NeverReplace, 0, Some(10)), Decision::Skip);
        assert_eq!(decide(SkipIfSmallerEqual, 0, None), Decision::Skip);
    }

    #[test]
    fn test_safe_names() {
        assert!(is_safe_name("a.txt"));
        assert!(is_safe_name("..hidden"));
        for bad in ["", ".", "..", "../x", "a/b", "a\\b", "nul\0"] {
            assert!(!is_safe_name(bad), "{:?}", bad);
        }
    }

    #[tokio::test]
    async fn test_fresh_mirror() {
        let tmp = tempfile::tempdir().unwrap();
        let mut tree = MemTree::sample();
        let fetcher = Arc::new(MemFetcher::default());
        let report = run(&mut tree, fetcher.clone(), MirrorOptions::default().with_concurrency(2), tmp.path(), "/r").await;

        assert!(report.is_clean());
        assert_eq!(report.stats.downloaded, 2);
        assert_eq!(report.stats.skipped, 0);
        assert_eq!(report.stats.total_bytes, 30);
        assert_eq!(len(tmp.path().join("a.txt")), 10);
        assert_eq!(len(tmp.path().join("sub").join("b.txt")), 20);
        assert_eq!(fetcher.fetched(), vec!["/r/a.txt", "/r/sub/b.txt"]);
    }

    #[tokio::test]
    async fn test_equal_size_is_skipped() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(tmp.path().join("a.txt"), [b'y'; 10]).unwrap();
        let mut tree = MemTree::sample();
        let fetcher = Arc::new(MemFetcher::default());
        let report = run(&mut tree, fetcher.clone(), MirrorOptions::default(), tmp.path(), "/r").await;

        assert_eq!(report.stats.skipped, 1);
        assert_eq!(report.stats.downloaded, 1);
        assert_eq!(fetcher.fetched(), vec!["/r/sub/b.txt"]);
        assert_eq!(std::fs::read(tmp.path().join("a.txt")).unwrap(), vec![b'y'; 10]);
    }

    #[tokio::test]
    async fn test_smaller_file_is_replaced() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(tmp.path().join("a.txt"), [b'y'; 5]).unwrap();
        let mut tree = MemTree::sample();
        let report = run(&mut tree, Arc::new(MemFetcher::default()), MirrorOptions::default(), tmp.path(), "/r").await;

        assert_eq!(report.stats.replaced, 1);
        assert_eq!(report.stats.downloaded, 2);
        assert_eq!(len(tmp.path().join("a.txt")), 10);
    }

    #[tokio::test]
    async fn test_second_run_downloads_nothing() {
        let tmp = tempfile::tempdir().unwrap();
        let mut tree = MemTree::sample();
        run(&mut tree, Arc::new(MemFetcher::default()), MirrorOptions::default(), tmp.path(), "/r").await;

        let fetcher = Arc::new(MemFetcher::default());
        let second = run(&mut tree, fetcher.clone(), MirrorOptions::default(), tmp.path(), "/r").await;
        assert_eq!(second.stats.downloaded, 0);
        assert_eq!(second.stats.skipped, 2);
        assert!(fetcher.fetched().is_empty());
        assert_eq!(len(tmp.path().join("a.txt")), 10);
        assert_eq!(len(tmp.path().join("sub").join("b.txt")), 20);
    }

    #[tokio::test]
    async fn test_policies() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(tmp.path().join("a.txt"), [b'y'; 12]).unwrap();
        let mut tree = MemTree::sample();

        let never = MirrorOptions::default().with_policy(ReplacePolicy::NeverReplace);
        let report = run(&mut tree, Arc::new(MemFetcher::default()), never, tmp.path(), "/r").await;
        assert_eq!(report.stats.replaced, 0);
        assert_eq!(len(tmp.path().join("a.txt")), 12);

        let different = MirrorOptions::default().with_policy(ReplacePolicy::ReplaceIfDifferent);
        let report = run(&mut tree, Arc::new(MemFetcher::default()), different, tmp.path(), "/r").await;
        assert_eq!(report.stats.replaced, 1);
        assert_eq!(len(tmp.path().join("a.txt")), 10);
    }

    #[tokio::test]
    async fn test_missing_type_fact_is_recorded() {
        let tmp = tempfile::tempdir().unwrap();
        let mut tree = MemTree::sample();
        tree.add("/r", entry("mystery", "/r", &[("size", "3")]));
        let report = run(&mut tree, Arc::new(MemFetcher::default()), MirrorOptions::default(), tmp.path(), "/r").await;

        assert!(report.completed);
        assert_eq!(report.stats.downloaded, 2);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].path, "/r/mystery");
        assert_eq!(report.failures[0].error.kind, FtpErrorKind::Listing);
    }

    #[tokio::test]
    async fn test_unsafe_names_are_refused() {
        let tmp = tempfile::tempdir().unwrap();
        let local = tmp.path().join("local");
        let mut tree = MemTree::sample();
        tree.add("/r", file("../escape.txt", "/r", 4));
        let fetcher = Arc::new(MemFetcher::default());
        let report = run(&mut tree, fetcher.clone(), MirrorOptions::default(), &local, "/r").await;

        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].error.kind, FtpErrorKind::Listing);
        assert!(!tmp.path().join("escape.txt").exists());
        assert_eq!(fetcher.fetched().len(), 2);
    }

    #[tokio::test]
    async fn test_exclude_patterns() {
        let tmp = tempfile::tempdir().unwrap();
        let mut tree = MemTree::sample();
        let options = MirrorOptions {
            exclude: vec!["sub".into()],
            ..MirrorOptions::default()
        };
        let fetcher = Arc::new(MemFetcher::default());
        let report = run(&mut tree, fetcher.clone(), options, tmp.path(), "/r").await;

        assert_eq!(fetcher.fetched(), vec!["/r/a.txt"]);
        assert!(!tmp.path().join("sub").exists());
        assert!(!tree.listed.contains(&"/r/sub".to_string()));
        assert!(report.is_clean());
    }

    #[tokio::test]
    async fn test_lost_listing_connection_stops_walk() {
        let tmp = tempfile::tempdir().unwrap();
        let mut tree = MemTree::sample();
        tree.fail("/r/sub", FtpError::disconnected("control connection closed"));
        let report = run(&mut tree, Arc::new(MemFetcher::default()), MirrorOptions::default(), tmp.path(), "/r").await;

        assert!(!report.completed);
        assert!(!report.cancelled);
        assert_eq!(report.stats.downloaded, 1);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].error.kind, FtpErrorKind::Disconnected);
        assert_eq!(report.failures[0].path, "/r/sub");
    }

    #[tokio::test]
    async fn test_unlistable_directory_skips_subtree() {
        let tmp = tempfile::tempdir().unwrap();
        let mut tree = MemTree::sample();
        tree.fail("/r/sub", FtpError::from_reply(550, "Permission denied"));
        let report = run(&mut tree, Arc::new(MemFetcher::default()), MirrorOptions::default(), tmp.path(), "/r").await;

        assert!(report.completed);
        assert_eq!(report.stats.downloaded, 1);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].error.kind, FtpErrorKind::PermissionDenied);
    }

    #[tokio::test]
    async fn test_failed_job_does_not_stop_walk() {
        let tmp = tempfile::tempdir().unwrap();
        let mut tree = MemTree::sample();
        let report = run(
            &mut tree,
            Arc::new(MemFetcher::failing("/r/a.txt")),
            MirrorOptions::default(),
            tmp.path(),
            "/r",
        )
        .await;

        assert!(report.completed);
        assert_eq!(report.stats.downloaded, 1);
        assert_eq!(report.stats.failed, 1);
        assert_eq!(report.failures[0].path, "/r/a.txt");
        assert_eq!(report.failures[0].error.kind, FtpErrorKind::TransferFailed);
        assert!(tmp.path().join("sub").join("b.txt").exists());
    }

    #[tokio::test]
    async fn test_cancelled_before_start() {
        let tmp = tempfile::tempdir().unwrap();
        let mut tree = MemTree::sample();
        let fetcher = Arc::new(MemFetcher::default());
        let mirror = Mirror::new(&mut tree, fetcher.clone(), MirrorOptions::default()).unwrap();
        mirror.canceller().cancel();
        let report = mirror.run(tmp.path(), "/r").await.unwrap();

        assert!(report.cancelled);
        assert!(!report.completed);
        assert_eq!(report.stats.processed, 0);
        assert!(fetcher.fetched().is_empty());
    }

    #[tokio::test]
    async fn test_file_root() {
        let tmp = tempfile::tempdir().unwrap();
        let mut tree = MemTree::sample();
        let report = run(&mut tree, Arc::new(MemFetcher::default()), MirrorOptions::default(), tmp.path(), "/r/sub/b.txt").await;

        assert_eq!(report.stats.downloaded, 1);
        assert_eq!(len(tmp.path().join("b.txt")), 20);
    }

    #[tokio::test]
    async fn test_root_slash_and_missing_root() {
        let tmp = tempfile::tempdir().unwrap();
        let mut tree = MemTree::sample();
        let report = run(&mut tree, Arc::new(MemFetcher::default()), MirrorOptions::default(), tmp.path(), "/").await;
        assert_eq!(report.stats.downloaded, 2);
        assert_eq!(len(tmp.path().join("r").join("sub").join("b.txt")), 20);

        let err = Mirror::new(&mut tree, Arc::new(MemFetcher::default()), MirrorOptions::default())
            .unwrap()
            .run(tmp.path(), "/nope")
            .await
            .unwrap_err();
        assert_eq!(err.kind, FtpErrorKind::NotFound);
    }

    #[tokio::test]
    async fn test_wrong_local_node_types_are_fixed() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::create_dir(tmp.path().join("a.txt")).unwrap();
        std::fs::write(tmp.path().join("sub"), b"not a dir").unwrap();
        let mut tree = MemTree::sample();
        let report = run(&mut tree, Arc::new(MemFetcher::default()), MirrorOptions::default(), tmp.path(), "/r").await;

        assert!(report.is_clean());
        assert_eq!(len(tmp.path().join("a.txt")), 10);
        assert_eq!(len(tmp.path().join("sub").join("b.txt")), 20);
    }

    #[tokio::test]
    async fn test_non_empty_directory_blocks_file() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(tmp.path().join("a.txt").join("inner")).unwrap();
        let mut tree = MemTree::sample();
        let report = run(&mut tree, Arc::new(MemFetcher::default()), MirrorOptions::default(), tmp.path(), "/r").await;

        assert!(report.completed);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].error.kind, FtpErrorKind::Filesystem);
        assert_eq!(report.stats.downloaded, 1);
    }

    #[tokio::test]
    async fn test_listings_are_cached_per_run() {
        let tmp = tempfile::tempdir().unwrap();
        let mut tree = MemTree::sample();
        run(&mut tree, Arc::new(MemFetcher::default()), MirrorOptions::default(), tmp.path(), "/r").await;
        assert_eq!(tree.listed, vec!["/", "/r", "/r/sub"]);

        // A new run starts with an empty cache.
        run(&mut tree, Arc::new(MemFetcher::default()), MirrorOptions::default(), tmp.path(), "/r").await;
        assert_eq!(tree.listed.len(), 6);
    }
}
