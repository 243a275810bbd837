//! Background polling thread.
//!
//! Calls [`VisibilityScheduler::tick`] every `poll_interval`. The interval
//! is re-read from the scheduler's configuration after each tick, so
//! [`VisibilityScheduler::configure`] takes effect without a restart.

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::thread::{self, JoinHandle};
use std::time::Instant;

use lazyimg_cache::ImageError;

use crate::scheduler::VisibilityScheduler;

/// Handle to the thread driving a [`VisibilityScheduler`].
///
/// Dropping the handle stops the thread and waits for the tick in progress.
pub struct PollLoop {
    stop: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl PollLoop {
    /// Spawn the polling thread.
    ///
    /// # Errors
    /// Returns [`ImageError::Spawn`] if the thread cannot be created.
    pub fn start(scheduler: VisibilityScheduler) -> Result<Self, ImageError> {
        let stop = Arc::new(AtomicBool::new(false));
        let stop_flag = stop.clone();

        let name = "lazyimg-poll".to_string();
        let thread = thread::Builder::new()
            .name(name.clone())
            .spawn(move || Self::run(scheduler, stop_flag))
            .map_err(|err| ImageError::Spawn {
                name,
                reason: err.to_string(),
            })?;

        Ok(Self {
            stop,
            thread: Some(thread),
        })
    }

    fn run(scheduler: VisibilityScheduler, stop: Arc<AtomicBool>) {
        tracing::debug!("poll loop started");

        while !stop.load(Ordering::Acquire) && !scheduler.is_shut_down() {
            let ticked_at = Instant::now();
            let report = scheduler.tick();
            if report.loads_started > 0 || report.evicted > 0 {
                tracing::trace!(?report, "tick");
            }

            // Spurious wakeups and wake() both land here; the deadline is
            // recomputed so a shorter interval applies at once.
            loop {
                if stop.load(Ordering::Acquire) {
                    break;
                }
                let deadline = ticked_at + scheduler.config().poll_interval;
                let now = Instant::now();
                if now >= deadline {
                    break;
                }
                thread::park_timeout(deadline - now);
            }
        }

        tracing::debug!("poll loop stopped");
    }

    pub fn is_running(&self) -> bool {
        self.thread
            .as_ref()
            .is_some_and(|thread| !thread.is_finished())
    }

    /// Cut the current sleep short, e.g. after the poll interval changed.
    pub fn wake(&self) {
        if let Some(thread) = &self.thread {
            thread.thread().unpark();
        }
    }

    /// Stop the thread and wait for it to exit.
    pub fn stop(&mut self) {
        self.stop.store(true, Ordering::Release);
        if let Some(thread) = self.thread.take() {
            thread.thread().unpark();
            if thread.join().is_err() {
                tracing::warn!("poll loop panicked");
            }
        }
    }
}

impl Drop for PollLoop {
    fn drop(&mut self) {
        self.stop();
    }
}
