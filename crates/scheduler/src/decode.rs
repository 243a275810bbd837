//! Decode jobs, their queue, and the worker pool that runs them.
//!
//! The queue is bounded and LIFO: the most recently requested image (the one
//! the user just scrolled to) is decoded first. A full queue rejects new
//! jobs; the entry stays unloaded and is offered again on the next tick.

use std::collections::VecDeque;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc, Condvar, Mutex, MutexGuard, PoisonError,
};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use lazyimg_cache::{EntryId, ImageError, ImageSource, JobId, SizeMode, SizeRequest};

use crate::cancel::CancellationToken;

/// Everything a worker needs to produce pixels for one entry, captured at
/// the tick that requested the load.
#[derive(Debug, Clone)]
pub struct DecodeJob {
    pub id: JobId,
    pub entry: EntryId,
    pub source: ImageSource,
    pub request: SizeRequest,
    /// Natural size cached from an earlier decode, if any
    pub natural_size: Option<(u32, u32)>,
    pub size_mode: SizeMode,
    pub token: CancellationToken,
}

struct QueueState {
    jobs: VecDeque<DecodeJob>,
    capacity: usize,
    closed: bool,
}

/// Bounded LIFO queue of pending decode jobs.
pub struct DecodeQueue {
    state: Mutex<QueueState>,
    available: Condvar,
}

impl DecodeQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            state: Mutex::new(QueueState {
                jobs: VecDeque::with_capacity(capacity),
                capacity,
                closed: false,
            }),
            available: Condvar::new(),
        }
    }

    fn state(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Enqueue a job, handing it back if the queue is full or closed.
    pub fn push(&self, job: DecodeJob) -> Result<(), DecodeJob> {
        let mut state = self.state();
        if state.closed || state.jobs.len() >= state.capacity {
            return Err(job);
        }
        state.jobs.push_back(job);
        drop(state);

        self.available.notify_one();
        Ok(())
    }

    /// Take the newest job without waiting.
    pub fn try_pop(&self) -> Option<DecodeJob> {
        self.state().jobs.pop_back()
    }

    /// Take the newest job, waiting up to `timeout` for one to arrive.
    pub fn pop_timeout(&self, timeout: Duration) -> Option<DecodeJob> {
        let state = self.state();
        let (mut state, _) = self
            .available
            .wait_timeout_while(state, timeout, |state| {
                state.jobs.is_empty() && !state.closed
            })
            .unwrap_or_else(PoisonError::into_inner);
        state.jobs.pop_back()
    }

    /// Drop a job that has not been picked up yet.
    pub fn remove(&self, job_id: JobId) -> bool {
        let mut state = self.state();
        let before = state.jobs.len();
        state.jobs.retain(|job| job.id != job_id);
        state.jobs.len() != before
    }

    /// Refuse new jobs, wake every waiting worker, and return what was queued.
    pub fn close(&self) -> Vec<DecodeJob> {
        let mut state = self.state();
        state.closed = true;
        let drained = state.jobs.drain(..).collect();
        drop(state);

        self.available.notify_all();
        drained
    }

    pub fn is_closed(&self) -> bool {
        self.state().closed
    }

    pub fn len(&self) -> usize {
        self.state().jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state().jobs.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.state().capacity
    }
}

/// Callback that runs one decode job to completion.
pub type DecodeExecutor = Arc<dyn Fn(DecodeJob) + Send + Sync>;

/// Pool of threads pulling jobs from a [`DecodeQueue`].
///
/// Dropping the pool without calling [`DecodePool::shutdown`] detaches the
/// workers; they exit once the queue is closed.
pub struct DecodePool {
    workers: Vec<Worker>,
    shutdown: Arc<AtomicBool>,
    queue: Arc<DecodeQueue>,
}

impl DecodePool {
    /// Spawn `num_workers` threads.
    ///
    /// # Errors
    /// Returns [`ImageError::Spawn`] if a thread cannot be created; workers
    /// started before the failure are stopped.
    pub fn new(
        queue: Arc<DecodeQueue>,
        executor: DecodeExecutor,
        num_workers: usize,
        idle_timeout: Duration,
    ) -> Result<Self, ImageError> {
        let shutdown = Arc::new(AtomicBool::new(false));
        let mut pool = Self {
            workers: Vec::with_capacity(num_workers),
            shutdown: shutdown.clone(),
            queue: queue.clone(),
        };

        for id in 0..num_workers {
            match Worker::spawn(id, queue.clone(), executor.clone(), shutdown.clone(), idle_timeout) {
                Ok(worker) => pool.workers.push(worker),
                Err(err) => {
                    pool.stop();
                    return Err(err);
                }
            }
        }

        tracing::debug!("started {} decode workers", num_workers);
        Ok(pool)
    }

    pub fn num_workers(&self) -> usize {
        self.workers.len()
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutdown.load(Ordering::Acquire)
    }

    /// Stop the workers and wait for their current job to finish.
    pub fn shutdown(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        self.shutdown.store(true, Ordering::Release);
        self.queue.close();

        for worker in self.workers.drain(..) {
            worker.join();
        }
    }
}

struct Worker {
    id: usize,
    thread: JoinHandle<()>,
}

impl Worker {
    fn spawn(
        id: usize,
        queue: Arc<DecodeQueue>,
        executor: DecodeExecutor,
        shutdown: Arc<AtomicBool>,
        idle_timeout: Duration,
    ) -> Result<Self, ImageError> {
        let thread = thread::Builder::new()
            .name(format!("lazyimg-decode-{}", id))
            .spawn(move || Self::run(queue, executor, shutdown, idle_timeout))
            .map_err(|err| ImageError::Spawn {
                name: format!("lazyimg-decode-{}", id),
                reason: err.to_string(),
            })?;

        Ok(Self { id, thread })
    }

    fn run(
        queue: Arc<DecodeQueue>,
        executor: DecodeExecutor,
        shutdown: Arc<AtomicBool>,
        idle_timeout: Duration,
    ) {
        while !shutdown.load(Ordering::Acquire) {
            match queue.pop_timeout(idle_timeout) {
                Some(job) => executor(job),
                None if queue.is_closed() => break,
                None => {}
            }
        }
    }

    fn join(self) {
        if self.thread.join().is_err() {
            tracing::warn!("decode worker {} panicked", self.id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::time::Instant;

    fn job(id: JobId) -> DecodeJob {
        DecodeJob {
            id,
            entry: EntryId::new(id),
            source: ImageSource::from("img.png"),
            request: SizeRequest::default(),
            natural_size: None,
            size_mode: SizeMode::LongerAxis,
            token: CancellationToken::new(),
        }
    }

    #[test]
    fn test_queue_is_lifo() {
        let queue = DecodeQueue::new(4);
        for id in 1..=3 {
            queue.push(job(id)).unwrap();
        }
        assert_eq!(queue.try_pop().map(|job| job.id), Some(3));
        assert_eq!(queue.try_pop().map(|job| job.id), Some(2));
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn test_queue_rejects_when_full() {
        let queue = DecodeQueue::new(2);
        queue.push(job(1)).unwrap();
        queue.push(job(2)).unwrap();

        let rejected = queue.push(job(3)).unwrap_err();
        assert_eq!(rejected.id, 3);
        assert_eq!(queue.len(), 2);
        assert_eq!(queue.capacity(), 2);
    }

    #[test]
    fn test_queue_remove() {
        let queue = DecodeQueue::new(4);
        queue.push(job(1)).unwrap();
        queue.push(job(2)).unwrap();

        assert!(queue.remove(1));
        assert!(!queue.remove(1));
        assert_eq!(queue.try_pop().map(|job| job.id), Some(2));
        assert!(queue.is_empty());
    }

    #[test]
    fn test_closed_queue() {
        let queue = DecodeQueue::new(4);
        queue.push(job(1)).unwrap();

        let drained = queue.close();
        assert_eq!(drained.len(), 1);
        assert!(queue.is_closed());
        assert!(queue.push(job(2)).is_err());

        // Does not block once closed
        let start = Instant::now();
        assert!(queue.pop_timeout(Duration::from_secs(5)).is_none());
        assert!(start.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn test_pool_executes_jobs() {
        let queue = Arc::new(DecodeQueue::new(8));
        let executed = Arc::new(AtomicUsize::new(0));
        let executed_clone = executed.clone();
        let executor: DecodeExecutor = Arc::new(move |_job| {
            executed_clone.fetch_add(1, Ordering::SeqCst);
        });

        let pool = DecodePool::new(queue.clone(), executor, 2, Duration::from_millis(10)).unwrap();
        assert_eq!(pool.num_workers(), 2);
        assert!(!pool.is_shutting_down());

        for id in 0..5 {
            queue.push(job(id)).unwrap();
        }

        let deadline = Instant::now() + Duration::from_secs(5);
        while executed.load(Ordering::SeqCst) < 5 && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(executed.load(Ordering::SeqCst), 5);

        pool.shutdown();
        assert!(queue.is_closed());
    }

    #[test]
    fn test_pool_with_no_workers() {
        let queue = Arc::new(DecodeQueue::new(1));
        let executor: DecodeExecutor = Arc::new(|_job| {});
        let pool = DecodePool::new(queue, executor, 0, Duration::from_millis(10)).unwrap();
        assert_eq!(pool.num_workers(), 0);
        pool.shutdown();
    }
}
