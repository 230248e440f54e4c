//! thumbgrid scheduler library
//!
//! Background execution for the image pipeline: cooperative cancellation
//! tokens, worker pools for fetch and decode jobs, and the mailbox that
//! carries results back to the interactive thread.
//!
//! # Example
//!
//! ```
//! use std::time::Duration;
//! use thumbgrid_scheduler::{
//!     CancellationRegistry, CancellationToken, Mailbox, WorkerPool, WorkerPoolConfig,
//! };
//!
//! let pool = WorkerPool::new(WorkerPoolConfig::new("decode", 1)).unwrap();
//! let tasks = CancellationRegistry::new();
//! let mailbox = Mailbox::new();
//!
//! let (id, token) = tasks.register("thumb.img");
//! let sender = mailbox.sender();
//! pool.submit(token, Box::new(move |_token: &CancellationToken| {
//!     sender.post(id);
//! }));
//!
//! // Back on the interactive thread:
//! let finished = mailbox.recv_timeout(Duration::from_secs(5)).unwrap();
//! assert_eq!(tasks.take(finished).map(|(_, key)| key), Some("thumb.img"));
//! pool.shutdown();
//! ```

mod cancel;
mod mailbox;
mod worker;

pub use cancel::{CancellationRegistry, CancellationToken, TaskId};
pub use mailbox::{MailSender, Mailbox};
pub use worker::{Job, WorkerPool, WorkerPoolConfig};
