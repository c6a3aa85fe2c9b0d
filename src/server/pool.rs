//! Fixed-size worker pool with a shared task queue
//!
//! Workers block on a condition variable until a task is queued, then run
//! it to completion; a task here is one connection's whole request loop.
//! Dropping the pool signals shutdown, wakes every worker, and joins them
//! all; tasks already queued are drained first, so nothing accepted is
//! silently discarded.
// (c) 2025 Ross Younger

use std::collections::VecDeque;
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::thread::JoinHandle;

use tracing::{debug, trace};

type Task = Box<dyn FnOnce() + Send + 'static>;

struct PoolState {
    tasks: VecDeque<Task>,
    shutdown: bool,
}

struct Shared {
    state: Mutex<PoolState>,
    available: Condvar,
}

/// A bounded set of threads consuming a shared task queue.
///
/// At most `size` tasks execute concurrently; the queue itself is
/// unbounded, so excess tasks wait rather than being refused.
pub(crate) struct WorkerPool {
    shared: Arc<Shared>,
    workers: Vec<JoinHandle<()>>,
}

impl std::fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPool")
            .field("size", &self.workers.len())
            .finish_non_exhaustive()
    }
}

impl WorkerPool {
    /// Spawns `size` workers (at least one).
    pub(crate) fn new(size: usize) -> std::io::Result<Self> {
        let shared = Arc::new(Shared {
            state: Mutex::new(PoolState {
                tasks: VecDeque::new(),
                shutdown: false,
            }),
            available: Condvar::new(),
        });
        let workers = (0..size.max(1))
            .map(|index| {
                let shared = Arc::clone(&shared);
                std::thread::Builder::new()
                    .name(format!("tagrpc-worker-{index}"))
                    .spawn(move || worker_loop(&shared))
            })
            .collect::<std::io::Result<Vec<_>>>()?;
        debug!("worker pool of {} started", workers.len());
        Ok(Self { shared, workers })
    }

    /// Queues a task; a free worker picks it up.
    pub(crate) fn execute(&self, task: impl FnOnce() + Send + 'static) {
        {
            let mut state = self
                .shared
                .state
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            state.tasks.push_back(Box::new(task));
        }
        self.shared.available.notify_one();
    }

    /// Number of workers
    pub(crate) fn size(&self) -> usize {
        self.workers.len()
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        {
            let mut state = self
                .shared
                .state
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            state.shutdown = true;
        }
        self.shared.available.notify_all();
        for handle in self.workers.drain(..) {
            let _ = handle.join();
        }
        debug!("worker pool shut down");
    }
}

fn worker_loop(shared: &Shared) {
    loop {
        let task = {
            let mut state = shared
                .state
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            loop {
                if let Some(task) = state.tasks.pop_front() {
                    break task;
                }
                if state.shutdown {
                    return;
                }
                state = shared
                    .available
                    .wait(state)
                    .unwrap_or_else(PoisonError::into_inner);
            }
        };
        trace!("worker picked up a task");
        task();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::mpsc;
    use std::time::Duration;

    #[test]
    fn tasks_run() {
        let pool = WorkerPool::new(4).unwrap();
        let (tx, rx) = mpsc::channel();
        for i in 0..20 {
            let tx = tx.clone();
            pool.execute(move || tx.send(i).unwrap());
        }
        let mut seen: Vec<i32> = (0..20)
            .map(|_| rx.recv_timeout(Duration::from_secs(5)).unwrap())
            .collect();
        seen.sort_unstable();
        assert_eq!(seen, (0..20).collect::<Vec<_>>());
    }

    #[test]
    fn concurrency_is_bounded_by_pool_size() {
        const POOL: usize = 3;
        let pool = WorkerPool::new(POOL).unwrap();
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let (tx, rx) = mpsc::channel();
        for _ in 0..12 {
            let running = Arc::clone(&running);
            let peak = Arc::clone(&peak);
            let tx = tx.clone();
            pool.execute(move || {
                let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                std::thread::sleep(Duration::from_millis(20));
                running.fetch_sub(1, Ordering::SeqCst);
                tx.send(()).unwrap();
            });
        }
        for _ in 0..12 {
            rx.recv_timeout(Duration::from_secs(5)).unwrap();
        }
        assert!(peak.load(Ordering::SeqCst) <= POOL);
        assert!(peak.load(Ordering::SeqCst) >= 1);
    }

    #[test]
    fn drop_drains_queued_tasks() {
        let counter = Arc::new(AtomicUsize::new(0));
        {
            let pool = WorkerPool::new(1).unwrap();
            for _ in 0..5 {
                let counter = Arc::clone(&counter);
                pool.execute(move || {
                    std::thread::sleep(Duration::from_millis(5));
                    let _ = counter.fetch_add(1, Ordering::SeqCst);
                });
            }
            // pool dropped here: joins after the queue drains
        }
        assert_eq!(counter.load(Ordering::SeqCst), 5);
    }

    #[test]
    fn zero_size_is_clamped_to_one() {
        let pool = WorkerPool::new(0).unwrap();
        assert_eq!(pool.size(), 1);
    }
}
