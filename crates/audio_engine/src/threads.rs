//! Worker thread registry
//!
//! Streams run their decode/feed loops on dedicated OS threads. The
//! registry tracks each live worker by a stable identity so the owner can
//! later terminate or join it without holding the `JoinHandle` itself.
//!
//! Cancellation is cooperative only: every worker receives a
//! [`CancelToken`] and must poll it as its sole stop signal. A worker
//! that never polls makes [`ThreadRegistry::join`] block indefinitely.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

/// Cooperative cancellation signal polled by a worker loop
#[derive(Clone)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    fn new() -> Self {
        Self {
            flag: Arc::new(AtomicBool::new(false)),
        }
    }

    /// True once the owner has requested the worker to stop
    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Acquire)
    }

    fn cancel(&self) {
        self.flag.store(true, Ordering::Release);
    }
}

/// Stable identity of a registered worker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WorkerId(u64);

struct WorkerEntry {
    token: CancelToken,
    handle: JoinHandle<()>,
    label: String,
}

/// Registry of live worker threads
pub struct ThreadRegistry {
    workers: HashMap<WorkerId, WorkerEntry>,
    next_id: u64,
}

impl ThreadRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self {
            workers: HashMap::new(),
            next_id: 0,
        }
    }

    /// Spawn `worker` on a new thread and register it under a fresh id.
    ///
    /// The worker receives its own [`CancelToken`] and must poll it.
    pub fn spawn<F>(&mut self, label: &str, worker: F) -> WorkerId
    where
        F: FnOnce(CancelToken) + Send + 'static,
    {
        let token = CancelToken::new();
        let worker_token = token.clone();
        let handle = std::thread::spawn(move || worker(worker_token));

        let id = WorkerId(self.next_id);
        self.next_id = self.next_id.wrapping_add(1);
        self.workers.insert(
            id,
            WorkerEntry {
                token,
                handle,
                label: label.to_string(),
            },
        );
        id
    }

    /// Request cancellation and detach without waiting.
    ///
    /// For callers that cannot afford to block; the worker exits on its
    /// next flag poll.
    pub fn terminate(&mut self, id: WorkerId) {
        debug_assert!(self.workers.contains_key(&id), "terminate of unknown worker");
        if let Some(entry) = self.workers.remove(&id) {
            entry.token.cancel();
            drop(entry.handle);
        }
    }

    /// Request cancellation and block until the worker has exited
    pub fn join(&mut self, id: WorkerId) {
        debug_assert!(self.workers.contains_key(&id), "join of unknown worker");
        if let Some(entry) = self.workers.remove(&id) {
            entry.token.cancel();
            if entry.handle.join().is_err() {
                log::warn!("worker thread `{}` panicked", entry.label);
            }
        }
    }

    /// Cancel and join every registered worker
    pub fn join_all(&mut self) {
        let ids: Vec<WorkerId> = self.workers.keys().copied().collect();
        for id in ids {
            self.join(id);
        }
    }

    /// Whether a worker is still registered (it may have already exited
    /// on its own; registration only ends at terminate/join)
    pub fn is_registered(&self, id: WorkerId) -> bool {
        self.workers.contains_key(&id)
    }

    /// Number of registered workers
    pub fn len(&self) -> usize {
        self.workers.len()
    }

    /// True when no workers are registered
    pub fn is_empty(&self) -> bool {
        self.workers.is_empty()
    }
}

impl Default for ThreadRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for ThreadRegistry {
    fn drop(&mut self) {
        self.join_all();
    }
}
