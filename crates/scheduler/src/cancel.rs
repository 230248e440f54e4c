//! Cooperative cancellation for background tasks
//!
//! A task is never interrupted. Whoever launched it cancels its token, the
//! worker may notice before starting, and the delivery side drops the result
//! of any task whose token is cancelled.

use std::collections::HashMap;
use std::sync::{
    atomic::{AtomicBool, AtomicU64, Ordering},
    Arc, Mutex,
};

/// Identifier of a task registered in a [`CancellationRegistry`]. Never zero.
pub type TaskId = u64;

/// Cancellation flag shared between a task's owner and its worker
///
/// # Example
///
/// ```
/// use thumbgrid_scheduler::CancellationToken;
///
/// let token = CancellationToken::new();
/// let worker_token = token.clone();
///
/// token.cancel();
/// assert!(worker_token.is_cancelled());
/// ```
#[derive(Clone, Debug, Default)]
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

/// Tracks live tasks, each with a token and a payload describing it
///
/// A task stays registered until it is taken by its completion or cancelled.
/// Both remove it, so a completion arriving for a cancelled task finds
/// nothing and is dropped.
///
/// # Example
///
/// ```
/// use thumbgrid_scheduler::CancellationRegistry;
///
/// let registry = CancellationRegistry::new();
/// let (id, token) = registry.register("thumb-17");
///
/// assert_eq!(registry.cancel(id), Some("thumb-17"));
/// assert!(token.is_cancelled());
/// assert!(registry.take(id).is_none());
/// ```
pub struct CancellationRegistry<T> {
    tasks: Mutex<HashMap<TaskId, (CancellationToken, T)>>,
    next_id: AtomicU64,
}

impl<T> CancellationRegistry<T> {
    pub fn new() -> Self {
        Self {
            tasks: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Register a new task and return its id and token
    pub fn register(&self, payload: T) -> (TaskId, CancellationToken) {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let token = CancellationToken::new();
        let mut tasks = self.tasks.lock().unwrap();
        tasks.insert(id, (token.clone(), payload));
        (id, token)
    }

    /// Cancel a task and forget it, returning its payload
    pub fn cancel(&self, id: TaskId) -> Option<T> {
        let mut tasks = self.tasks.lock().unwrap();
        let (token, payload) = tasks.remove(&id)?;
        token.cancel();
        Some(payload)
    }

    /// Remove a finished task. `None` if it was cancelled or never existed.
    pub fn take(&self, id: TaskId) -> Option<(CancellationToken, T)> {
        let mut tasks = self.tasks.lock().unwrap();
        tasks.remove(&id)
    }

    /// Inspect a live task's payload
    pub fn with<R>(&self, id: TaskId, f: impl FnOnce(&T) -> R) -> Option<R> {
        let tasks = self.tasks.lock().unwrap();
        tasks.get(&id).map(|(_, payload)| f(payload))
    }

    pub fn contains(&self, id: TaskId) -> bool {
        let tasks = self.tasks.lock().unwrap();
        tasks.contains_key(&id)
    }

    /// Cancel every live task. Returns how many were cancelled.
    pub fn cancel_all(&self) -> usize {
        let mut tasks = self.tasks.lock().unwrap();
        let count = tasks.len();
        for (_, (token, _)) in tasks.drain() {
            token.cancel();
        }
        count
    }

    pub fn len(&self) -> usize {
        let tasks = self.tasks.lock().unwrap();
        tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<T> Default for CancellationRegistry<T> {
    fn default() -> Self {
        Self::new()
    }
}
