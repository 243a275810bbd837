//! Cancellation tokens for decode jobs
//!
//! A decode job carries a token. Unregistering or resizing an entry cancels
//! the token of its in-flight job; workers check the token before decoding
//! and completions for cancelled jobs are discarded.

use std::collections::HashMap;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc, Mutex, MutexGuard, PoisonError,
};

use lazyimg_cache::JobId;

/// Cooperative cancellation flag shared between the scheduler and a worker.
///
/// # Example
///
/// ```
/// use lazyimg_scheduler::CancellationToken;
///
/// let token = CancellationToken::new();
/// let worker_token = token.clone();
///
/// token.cancel();
/// assert!(worker_token.is_cancelled());
/// ```
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cancel this token and every clone of it. Idempotent.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }
}

/// Tokens of decode jobs that have not completed yet, by job id.
#[derive(Debug, Default)]
pub struct CancellationRegistry {
    tokens: Mutex<HashMap<JobId, CancellationToken>>,
}

impl CancellationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn tokens(&self) -> MutexGuard<'_, HashMap<JobId, CancellationToken>> {
        self.tokens.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Create and track a token for `job_id`.
    pub fn register(&self, job_id: JobId) -> CancellationToken {
        let token = CancellationToken::new();
        self.tokens().insert(job_id, token.clone());
        token
    }

    /// Cancel and forget the job. Returns `true` if it was tracked.
    pub fn cancel(&self, job_id: JobId) -> bool {
        match self.tokens().remove(&job_id) {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    /// Cancel every tracked job. Returns how many were cancelled.
    pub fn cancel_all(&self) -> usize {
        let mut tokens = self.tokens();
        let count = tokens.len();
        for (_, token) in tokens.drain() {
            token.cancel();
        }
        count
    }

    /// Forget a job that finished. Returns `true` if it was tracked.
    pub fn unregister(&self, job_id: JobId) -> bool {
        self.tokens().remove(&job_id).is_some()
    }

    pub fn len(&self) -> usize {
        self.tokens().len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_clone_observes_cancel() {
        let token = CancellationToken::new();
        let clone = token.clone();
        assert!(!clone.is_cancelled());

        token.cancel();
        token.cancel();
        assert!(clone.is_cancelled());
    }

    #[test]
    fn test_registry_cancel() {
        let registry = CancellationRegistry::new();
        let token = registry.register(1);
        assert_eq!(registry.len(), 1);

        assert!(registry.cancel(1));
        assert!(token.is_cancelled());
        assert!(registry.is_empty());

        // Already gone
        assert!(!registry.cancel(1));
    }

    #[test]
    fn test_registry_unregister_does_not_cancel() {
        let registry = CancellationRegistry::new();
        let token = registry.register(4);

        assert!(registry.unregister(4));
        assert!(!registry.unregister(4));
        assert!(!token.is_cancelled());
    }

    #[test]
    fn test_registry_cancel_all() {
        let registry = CancellationRegistry::new();
        let tokens: Vec<_> = (0..3).map(|id| registry.register(id)).collect();

        assert_eq!(registry.cancel_all(), 3);
        assert!(tokens.iter().all(CancellationToken::is_cancelled));
        assert!(registry.is_empty());
    }
}
