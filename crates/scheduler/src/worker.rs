//! Worker pool for fetch and decode jobs.
//!
//! Jobs are boxed closures queued FIFO. Each worker thread pulls a job,
//! skips it if its token was cancelled while it waited in the queue, and
//! otherwise runs it. Results leave a job through whatever channel the
//! closure captured, usually a [`crate::MailSender`].

use crate::CancellationToken;
use std::collections::VecDeque;
use std::io;
use std::sync::{
    atomic::{AtomicBool, AtomicUsize, Ordering},
    Arc, Condvar, Mutex,
};
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// A unit of background work. Receives its own cancellation token.
pub type Job = Box<dyn FnOnce(&CancellationToken) + Send + 'static>;

/// Configuration for a worker pool.
#[derive(Debug, Clone)]
pub struct WorkerPoolConfig {
    /// Number of worker threads to spawn.
    pub num_workers: usize,

    /// Longest time an idle worker waits before re-checking for shutdown.
    pub poll_interval: Duration,

    /// Thread names are `{name}-{index}`.
    pub name: String,
}

impl Default for WorkerPoolConfig {
    fn default() -> Self {
        Self {
            num_workers: num_cpus(),
            poll_interval: Duration::from_millis(100),
            name: "thumbgrid-worker".to_string(),
        }
    }
}

impl WorkerPoolConfig {
    pub fn new(name: impl Into<String>, num_workers: usize) -> Self {
        Self {
            num_workers: num_workers.max(1),
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }
}

struct QueuedJob {
    token: CancellationToken,
    job: Job,
}

struct Shared {
    queue: Mutex<VecDeque<QueuedJob>>,
    ready: Condvar,
    shutdown: AtomicBool,
    running: AtomicUsize,
}

/// Fixed-size pool of worker threads.
///
/// # Example
///
/// ```
/// use std::sync::mpsc;
/// use thumbgrid_scheduler::{CancellationToken, WorkerPool, WorkerPoolConfig};
///
/// let pool = WorkerPool::new(WorkerPoolConfig::new("decode", 2)).unwrap();
/// let (tx, rx) = mpsc::channel();
///
/// pool.submit(CancellationToken::new(), Box::new(move |_token: &CancellationToken| {
///     tx.send(6 * 7).unwrap();
/// }));
///
/// assert_eq!(rx.recv().unwrap(), 42);
/// pool.shutdown();
/// ```
pub struct WorkerPool {
    shared: Arc<Shared>,
    workers: Vec<Worker>,
}

impl WorkerPool {
    /// Start a pool.
    ///
    /// # Errors
    /// Fails if the OS refuses to spawn a thread; threads spawned so far are
    /// shut down.
    pub fn new(config: WorkerPoolConfig) -> io::Result<Self> {
        let shared = Arc::new(Shared {
            queue: Mutex::new(VecDeque::new()),
            ready: Condvar::new(),
            shutdown: AtomicBool::new(false),
            running: AtomicUsize::new(0),
        });

        let mut pool = Self {
            shared: shared.clone(),
            workers: Vec::with_capacity(config.num_workers),
        };

        for id in 0..config.num_workers.max(1) {
            let worker = Worker::spawn(
                format!("{}-{}", config.name, id),
                shared.clone(),
                config.poll_interval,
            )?;
            pool.workers.push(worker);
        }

        Ok(pool)
    }

    /// Queue a job. Jobs submitted after shutdown are dropped.
    pub fn submit(&self, token: CancellationToken, job: Job) {
        if self.is_shutting_down() {
            log::debug!("job submitted after shutdown, dropped");
            return;
        }
        let mut queue = self.shared.queue.lock().unwrap();
        queue.push_back(QueuedJob { token, job });
        drop(queue);
        self.shared.ready.notify_one();
    }

    pub fn num_workers(&self) -> usize {
        self.workers.len()
    }

    /// Jobs waiting for a worker.
    pub fn queued(&self) -> usize {
        self.shared.queue.lock().unwrap().len()
    }

    /// Jobs currently executing.
    pub fn running(&self) -> usize {
        self.shared.running.load(Ordering::Acquire)
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shared.shutdown.load(Ordering::Acquire)
    }

    /// Stop accepting jobs and wait for every worker to exit.
    ///
    /// Queued jobs that have not started are dropped; running jobs finish.
    pub fn shutdown(mut self) {
        self.signal_shutdown();
        for worker in self.workers.drain(..) {
            worker.join();
        }
    }

    fn signal_shutdown(&self) {
        self.shared.shutdown.store(true, Ordering::Release);
        self.shared.queue.lock().unwrap().clear();
        self.shared.ready.notify_all();
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        // Threads exit on their own; a job stuck on the network must not
        // block the interactive thread here.
        self.signal_shutdown();
    }
}

struct Worker {
    name: String,
    thread: Option<JoinHandle<()>>,
}

impl Worker {
    fn spawn(name: String, shared: Arc<Shared>, poll_interval: Duration) -> io::Result<Self> {
        let thread = thread::Builder::new()
            .name(name.clone())
            .spawn(move || Self::run(shared, poll_interval))?;

        Ok(Self {
            name,
            thread: Some(thread),
        })
    }

    fn run(shared: Arc<Shared>, poll_interval: Duration) {
        loop {
            let next = {
                let mut queue = shared.queue.lock().unwrap();
                loop {
                    if shared.shutdown.load(Ordering::Acquire) {
                        return;
                    }
                    if let Some(job) = queue.pop_front() {
                        shared.running.fetch_add(1, Ordering::AcqRel);
                        break job;
                    }
                    queue = shared.ready.wait_timeout(queue, poll_interval).unwrap().0;
                }
            };

            if next.token.is_cancelled() {
                log::trace!("skipping job cancelled while queued");
            } else {
                (next.job)(&next.token);
            }
            shared.running.fetch_sub(1, Ordering::AcqRel);
        }
    }

    fn join(mut self) {
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                log::error!("worker thread {} panicked", self.name);
            }
        }
    }
}

/// Number of logical CPU cores, the default worker count.
fn num_cpus() -> usize {
    thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4)
}
