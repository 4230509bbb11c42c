//! Bounded worker pool
//!
//! A fixed number of worker threads consume jobs from a bounded queue. While
//! the pool is running `dispatch` blocks when the queue is full and returns
//! `true` once the job is queued. After `shutdown` it returns `false` and the
//! job is dropped unexecuted. `shutdown` drains: every accepted job runs
//! before it returns.

mod worker;

use log::{debug, info, warn};
use std::sync::mpsc::{self, Receiver, SyncSender};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};

/// Jobs queued per pool unless a capacity is given.
pub const DEFAULT_QUEUE_CAPACITY: usize = 1024;

/// A unit of work: runs once, takes nothing, returns nothing.
pub type Job = Box<dyn FnOnce() + Send + 'static>;

/// Fixed-size pool of worker threads.
pub struct WorkPool {
    sender: Mutex<Option<SyncSender<Job>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    size: usize,
    capacity: usize,
}

impl WorkPool {
    /// Starts `workers` worker threads (at least one) with the default queue capacity.
    pub fn new(workers: usize) -> std::io::Result<Self> {
        Self::with_capacity(workers, DEFAULT_QUEUE_CAPACITY)
    }

    /// Starts `workers` worker threads sharing a queue of `capacity` jobs.
    pub fn with_capacity(workers: usize, capacity: usize) -> std::io::Result<Self> {
        let size = workers.max(1);
        let capacity = capacity.max(1);
        let (sender, receiver) = mpsc::sync_channel::<Job>(capacity);
        let queue: Arc<Mutex<Receiver<Job>>> = Arc::new(Mutex::new(receiver));

        let mut handles = Vec::with_capacity(size);
        for id in 0..size {
            handles.push(worker::spawn(id, Arc::clone(&queue))?);
        }
        info!("Work pool started with {size} worker(s), queue capacity {capacity}");

        Ok(Self {
            sender: Mutex::new(Some(sender)),
            workers: Mutex::new(handles),
            size,
            capacity,
        })
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Returns true until `shutdown` has been called.
    pub fn is_running(&self) -> bool {
        self.sender
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    /// Queues `job` for execution. Returns false, without running the job,
    /// once the pool has been shut down.
    pub fn dispatch<F>(&self, job: F) -> bool
    where
        F: FnOnce() + Send + 'static,
    {
        // Clone so a full queue does not block `shutdown` on the sender lock.
        let sender = match self
            .sender
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
        {
            Some(sender) => sender.clone(),
            None => return false,
        };
        sender.send(Box::new(job)).is_ok()
    }

    /// Stops accepting jobs and waits for every accepted job to finish.
    /// Safe to call more than once and from any thread, including a worker.
    pub fn shutdown(&self) {
        let sender = self
            .sender
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if sender.is_none() {
            debug!("Work pool already shut down");
        }
        drop(sender);

        let handles: Vec<JoinHandle<()>> = self
            .workers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain(..)
            .collect();
        if handles.is_empty() {
            return;
        }

        let current = thread::current().id();
        for handle in handles {
            if handle.thread().id() == current {
                // Called from a job; this worker exits once the job returns.
                continue;
            }
            if handle.join().is_err() {
                warn!("Worker thread terminated abnormally");
            }
        }
        info!("Work pool shut down");
    }
}

impl Drop for WorkPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[test]
    fn test_all_dispatched_jobs_run_before_shutdown_returns() {
        let counter = Arc::new(AtomicUsize::new(0));
        let workers = 5;
        let pool = WorkPool::new(workers).unwrap();

        for _ in 0..workers * 2 {
            let counter = Arc::clone(&counter);
            assert!(pool.dispatch(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            }));
        }
        pool.shutdown();
        assert_eq!(counter.load(Ordering::SeqCst), workers * 2);

        let late = Arc::clone(&counter);
        assert!(!pool.dispatch(move || {
            late.fetch_add(1, Ordering::SeqCst);
        }));
        assert_eq!(counter.load(Ordering::SeqCst), workers * 2);
    }

    #[test]
    fn test_shutdown_drains_slow_jobs() {
        let counter = Arc::new(AtomicUsize::new(0));
        let pool = WorkPool::with_capacity(2, 4).unwrap();
        assert_eq!(pool.capacity(), 4);

        for _ in 0..12 {
            let counter = Arc::clone(&counter);
            assert!(pool.dispatch(move || {
                thread::sleep(Duration::from_millis(5));
                counter.fetch_add(1, Ordering::SeqCst);
            }));
        }
        pool.shutdown();
        assert_eq!(counter.load(Ordering::SeqCst), 12);
    }

    #[test]
    fn test_shutdown_is_idempotent() {
        let pool = WorkPool::new(3).unwrap();
        pool.shutdown();
        pool.shutdown();
        assert!(!pool.is_running());
    }

    #[test]
    fn test_shutdown_from_another_thread() {
        let pool = Arc::new(WorkPool::new(2).unwrap());
        let remote = Arc::clone(&pool);
        thread::spawn(move || remote.shutdown()).join().unwrap();
        assert!(!pool.dispatch(|| {}));
    }

    #[test]
    fn test_shutdown_from_inside_a_job() {
        let pool = Arc::new(WorkPool::new(2).unwrap());
        let (done_tx, done_rx) = mpsc::channel();
        let inner = Arc::clone(&pool);
        assert!(pool.dispatch(move || {
            inner.shutdown();
            let _ = done_tx.send(());
        }));
        done_rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert!(!pool.is_running());
    }

    #[test]
    fn test_panicking_job_does_not_kill_worker() {
        let counter = Arc::new(AtomicUsize::new(0));
        let pool = WorkPool::new(1).unwrap();
        assert!(pool.dispatch(|| panic!("boom")));
        let after = Arc::clone(&counter);
        assert!(pool.dispatch(move || {
            after.fetch_add(1, Ordering::SeqCst);
        }));
        pool.shutdown();
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_zero_workers_is_clamped() {
        let pool = WorkPool::with_capacity(0, 0).unwrap();
        assert_eq!(pool.size(), 1);
        assert_eq!(pool.capacity(), 1);
    }
}
