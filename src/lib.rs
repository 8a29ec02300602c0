//! # Workgroup
//!
//! This crate runs a set of tasks in parallel that may grow while it is being processed:
//! tasks can add more tasks of the same kind.
//! The [`Worker`] struct never runs more than a configured number of tasks at once, stops all
//! further work on the first error and can be cancelled through a [`Context`].
//! The [`CancellableQueue`] it is built around can also be used on its own.
//!
//! ## Worker
//! A worker takes tasks from a [`TaskQueue`] (by default an in-memory [`MemoryQueue`]) and calls
//! the work function for each of them. The work function gets the worker itself and can add
//! new tasks to it. [`Worker::wait`] returns once no task is left.
//!
//! ## Example
//! ```rust
//! use std::sync::{Arc, Mutex};
//! use workgroup::prelude::*;
//!
//! fn main() -> Result<(), Error> {
//!     let visited = Arc::new(Mutex::new(Vec::new()));
//!     let seen = visited.clone();
//!
//!     let worker = Worker::with_limit(4, move |worker: &Worker<String>, word: String| {
//!         if word.is_empty() {
//!             return Ok(());
//!         }
//!         seen.lock().unwrap().push(word.clone());
//!         worker.add(word[1..].to_string())
//!     });
//!
//!     worker.add("abcdef".to_string())?;
//!     worker.wait()?;
//!
//!     assert_eq!(visited.lock().unwrap().len(), 6);
//!     Ok(())
//! }
//! ```
//!
//! ## Tasks can be cancelled
//! A task fails the whole run by returning an error. Tasks that have not started yet will not run.
//! Running tasks can stop early with [`check_if_cancelled!`].
//! ```rust
//! use workgroup::prelude::*;
//!
//! let ctx = Context::background();
//! let worker = Worker::builder(|worker: &Worker<u32>, _n: u32| {
//!     check_if_cancelled!(worker.context());
//!     Ok(())
//! })
//! .context(ctx.clone())
//! .build();
//!
//! worker.add_all(0..10).unwrap();
//! ctx.cancel();
//!
//! assert!(matches!(worker.wait(), Err(Error::Cancelled)));
//! ```
//!
//! ## Cancellable queue
//! [`CancellableQueue::remove`] blocks on an empty queue until an item arrives or the context fires.
//! ```rust
//! use std::{thread, time::Duration};
//! use workgroup::prelude::*;
//!
//! let ctx = Context::background();
//! let queue = CancellableQueue::with_context(&ctx);
//!
//! queue.add(42).unwrap();
//! assert_eq!(queue.remove().unwrap(), 42);
//!
//! let canceller = ctx.clone();
//! thread::spawn(move || {
//!     thread::sleep(Duration::from_millis(10));
//!     canceller.cancel();
//! });
//!
//! assert!(matches!(queue.remove(), Err(Error::Cancelled)));
//! queue.close();
//! ```

mod config;
mod context;
mod error;
mod internal;
mod queue;
mod task_queue;
mod worker;

pub use config::WorkerConfig;
pub use context::{Context, Reason};
pub use error::{BoxError, Error, Result};
pub use queue::CancellableQueue;
pub use task_queue::{MemoryQueue, TaskQueue};
pub use worker::{Builder, Worker};

pub mod prelude {
    pub use crate::check_if_cancelled;
    pub use crate::{
        CancellableQueue, Context, Error, MemoryQueue, Reason, TaskQueue, Worker, WorkerConfig,
    };
}
