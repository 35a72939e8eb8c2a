use crate::worker::{WorkerConn, WorkerSpawner};
use diffproxy_core::{DiffJob, DiffOutcome, Error, Result};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;

/// One slot in the pool: a single isolated worker process plus the lock
/// guarding it. Each slot rebuilds independently, so a crash in one worker
/// never blocks jobs routed to the others.
struct WorkerSlot {
    conn: Mutex<Option<Box<dyn WorkerConn>>>,
}

/// A fixed-size pool of isolated diff worker processes (spec.md §4.3),
/// rebuilt slot-by-slot on demand when a worker breaks. Mirrors the
/// cooperative-rebuild behavior of the original's `BrokenProcessPoolExecutor`
/// test: when a submit fails, the caller attempts one rebuild-and-retry; if
/// two callers race to rebuild the same broken slot at once, only the first
/// actually spawns a replacement, the second just waits on the slot's lock
/// and finds it already healthy.
///
/// Jobs are spread across slots round-robin, so concurrent requests landing
/// on different slots run their diffs in parallel rather than queuing behind
/// one shared lock; concurrency is bounded by `worker_count`, as spec.md
/// requires, rather than serialized through a single mutex.
pub struct DiffWorkerPool {
    spawner: Arc<dyn WorkerSpawner>,
    slots: Vec<WorkerSlot>,
    generation: AtomicU64,
    next_slot: AtomicUsize,
    max_consecutive_failures: u32,
}

impl DiffWorkerPool {
    pub fn new(spawner: Arc<dyn WorkerSpawner>, worker_count: usize) -> Self {
        let worker_count = worker_count.max(1);
        let slots = (0..worker_count)
            .map(|_| WorkerSlot {
                conn: Mutex::new(None),
            })
            .collect();
        Self {
            spawner,
            slots,
            generation: AtomicU64::new(0),
            next_slot: AtomicUsize::new(0),
            // spec.md §4.3: one retry after rebuild; a second consecutive
            // corruption marks the pool fatally broken.
            max_consecutive_failures: 2,
        }
    }

    pub fn with_max_consecutive_failures(mut self, max: u32) -> Self {
        self.max_consecutive_failures = max;
        self
    }

    pub fn worker_count(&self) -> usize {
        self.slots.len()
    }

    fn pick_slot(&self) -> &WorkerSlot {
        let i = self.next_slot.fetch_add(1, Ordering::Relaxed) % self.slots.len();
        &self.slots[i]
    }

    async fn ensure_spawned(&self, slot: &WorkerSlot) -> Result<()> {
        let mut guard = slot.conn.lock().await;
        if guard.is_none() {
            *guard = Some(self.spawner.spawn().await?);
            self.generation.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }

    /// Submits one diff job to a round-robin slot. On a broken-worker error,
    /// rebuilds that slot once and retries; a failure on the retry is
    /// surfaced as `WorkerPoolBroken` so the caller can decide whether to
    /// keep serving (default) or exit after repeated breakage (spec.md §9,
    /// `RESTART_BROKEN_DIFFER`/exit-code-10 behavior lives in the server).
    pub async fn submit(&self, job: DiffJob) -> Result<DiffOutcome> {
        let slot = self.pick_slot();
        let mut consecutive_failures = 0u32;
        loop {
            self.ensure_spawned(slot).await?;

            let result = {
                let mut guard = slot.conn.lock().await;
                match guard.as_mut() {
                    Some(conn) => conn.submit(job.clone()).await,
                    None => Err(Error::WorkerPoolBroken(
                        "worker pool has no live worker".to_string(),
                    )),
                }
            };

            match result {
                Ok(outcome) => return Ok(outcome),
                Err(Error::WorkerPoolBroken(reason)) => {
                    consecutive_failures += 1;
                    {
                        let mut guard = slot.conn.lock().await;
                        *guard = None;
                    }
                    if consecutive_failures >= self.max_consecutive_failures {
                        return Err(Error::WorkerPoolBroken(format!(
                            "diff worker pool failed {consecutive_failures} times in a row: {reason}"
                        )));
                    }
                }
                Err(other) => return Err(other),
            }
        }
    }

    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }
}
