//! Bounded pool of transfer workers.
//!
//! Each submitted job runs on its own tokio task. While the pool is full,
//! `submit` waits for the running job with the smallest declared size
//! before spawning the next one, so the caller (the directory walk) is
//! throttled to at most `capacity` in-flight transfers.

use sftpc_ftp::ftp::{FtpError, FtpErrorKind, FtpResult};
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::task::JoinHandle;

/// Membership record for a running job.
#[derive(Debug, Clone)]
struct ActiveJob {
    declared_size: u64,
}

struct Slot<T> {
    label: String,
    declared_size: u64,
    handle: JoinHandle<T>,
}

/// A job that has left the pool.
#[derive(Debug)]
pub struct Finished<T> {
    pub label: String,
    /// `Err` only when the worker task panicked or was cancelled.
    pub output: FtpResult<T>,
}

pub struct WorkerPool<T> {
    capacity: usize,
    next_id: u64,
    /// Jobs whose task has not returned yet. Each task removes itself.
    active: Arc<Mutex<HashMap<u64, ActiveJob>>>,
    slots: HashMap<u64, Slot<T>>,
}

impl<T: Send + 'static> WorkerPool<T> {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            next_id: 0,
            active: Arc::new(Mutex::new(HashMap::new())),
            slots: HashMap::new(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Jobs submitted and not yet collected.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Jobs whose task is still running.
    pub fn running(&self) -> usize {
        lock(&self.active).len()
    }

    /// Spawn `fut` once a slot is free. Returns every job collected while
    /// making room.
    pub async fn submit<F>(&mut self, label: impl Into<String>, declared_size: u64, fut: F) -> Vec<Finished<T>>
    where
        F: Future<Output = T> + Send + 'static,
    {
        let mut finished = self.reap().await;
        while self.slots.len() >= self.capacity {
            match self.smallest_running() {
                Some(id) => finished.push(self.join(id).await),
                None => finished.extend(self.reap().await),
            }
        }

        let id = self.next_id;
        self.next_id += 1;
        lock(&self.active).insert(id, ActiveJob { declared_size });

        let active = self.active.clone();
        let handle = tokio::spawn(async move {
            let output = fut.await;
            lock(&active).remove(&id);
            output
        });
        self.slots.insert(
            id,
            Slot {
                label: label.into(),
                declared_size,
                handle,
            },
        );
        finished
    }

    /// Collect jobs that have already finished, without blocking on
    /// running ones.
    pub async fn reap(&mut self) -> Vec<Finished<T>> {
        let done: Vec<u64> = self
            .slots
            .iter()
            .filter(|(_, slot)| slot.handle.is_finished())
            .map(|(id, _)| *id)
            .collect();
        let mut finished = Vec::with_capacity(done.len());
        for id in done {
            finished.push(self.join(id).await);
        }
        finished
    }

    /// Wait for every remaining job, smallest declared size first.
    pub async fn drain(&mut self) -> Vec<Finished<T>> {
        let mut order: Vec<(u64, u64)> = self
            .slots
            .iter()
            .map(|(id, slot)| (slot.declared_size, *id))
            .collect();
        order.sort_unstable();

        let mut finished = Vec::with_capacity(order.len());
        for (_, id) in order {
            finished.push(self.join(id).await);
        }
        finished
    }

    /// Running job with the smallest declared size; falls back to any
    /// uncollected job when none is running any more.
    fn smallest_running(&self) -> Option<u64> {
        let smallest = lock(&self.active)
            .iter()
            .map(|(id, job)| (job.declared_size, *id))
            .min()
            .map(|(_, id)| id)
            .filter(|id| self.slots.contains_key(id));
        smallest.or_else(|| {
            self.slots
                .iter()
                .filter(|(_, slot)| !slot.handle.is_finished())
                .map(|(id, slot)| (slot.declared_size, *id))
                .min()
                .map(|(_, id)| id)
        })
    }

    async fn join(&mut self, id: u64) -> Finished<T> {
        let slot = self.slots.remove(&id);
        let joined = match slot {
            Some(slot) => Some((slot.label, slot.handle.await)),
            None => None,
        };
        // A panicked task never removed its own entry.
        lock(&self.active).remove(&id);
        match joined {
            Some((label, result)) => Finished {
                label,
                output: Self::output_of(result),
            },
            None => Finished {
                label: String::new(),
                output: Err(FtpError::new(FtpErrorKind::Unknown, format!("Unknown worker {}", id))),
            },
        }
    }

    fn output_of(joined: Result<T, tokio::task::JoinError>) -> FtpResult<T> {
        joined.map_err(|e| FtpError::new(FtpErrorKind::Unknown, format!("Worker task failed: {}", e)))
    }
}

impl<T> Drop for WorkerPool<T> {
    fn drop(&mut self) {
        for slot in self.slots.values() {
            slot.handle.abort();
        }
    }
}

fn lock(active: &Mutex<HashMap<u64, ActiveJob>>) -> MutexGuard<'_, HashMap<u64, ActiveJob>> {
    active.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::{Duration, Instant};

    fn tracked(
        running: Arc<AtomicUsize>,
        peak: Arc<AtomicUsize>,
        millis: u64,
    ) -> impl Future<Output = u64> + Send + 'static {
        async move {
            let now = running.fetch_add(1, Ordering::SeqCst) + 1;
            peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(millis)).await;
            running.fetch_sub(1, Ordering::SeqCst);
            millis
        }
    }

    #[tokio::test]
    async fn test_capacity_never_exceeded() {
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let mut pool = WorkerPool::new(3);
        let mut collected = 0;

        // Large declared sizes on short jobs and the reverse.
        for i in 0..20u64 {
            let (size, millis) = if i % 2 == 0 { (1 << 30, 2) } else { (1, 25) };
            collected += pool
                .submit(format!("job-{}", i), size, tracked(running.clone(), peak.clone(), millis))
                .await
                .len();
            assert!(pool.len() <= 3);
        }
        collected += pool.drain().await.len();

        assert_eq!(collected, 20);
        assert!(peak.load(Ordering::SeqCst) <= 3);
        assert_eq!(pool.running(), 0);
        assert!(pool.is_empty());
    }

    #[tokio::test]
    async fn test_waits_on_smallest_first() {
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let mut pool = WorkerPool::new(2);

        assert!(pool
            .submit("big", 1_000_000, tracked(running.clone(), peak.clone(), 500))
            .await
            .is_empty());
        assert!(pool
            .submit("small", 10, tracked(running.clone(), peak.clone(), 10))
            .await
            .is_empty());

        let started = Instant::now();
        let freed = pool
            .submit("next", 10, tracked(running.clone(), peak.clone(), 10))
            .await;
        assert!(started.elapsed() < Duration::from_millis(400));
        assert_eq!(freed.len(), 1);
        assert_eq!(freed[0].label, "small");
        assert_eq!(freed[0].output.as_ref().ok(), Some(&10));

        let rest = pool.drain().await;
        let labels: Vec<&str> = rest.iter().map(|f| f.label.as_str()).collect();
        assert_eq!(labels, vec!["next", "big"]);
    }

    #[tokio::test]
    async fn test_panicking_worker_is_reported() {
        let mut pool: WorkerPool<u64> = WorkerPool::new(1);
        fn explode() -> u64 {
            panic!("worker exploded")
        }
        pool.submit("boom", 1, async { explode() }).await;
        let finished = pool.drain().await;
        assert_eq!(finished.len(), 1);
        assert_eq!(finished[0].output.as_ref().unwrap_err().kind, FtpErrorKind::Unknown);
    }
}
