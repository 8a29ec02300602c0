use std::{sync::Arc, time::Duration};

use parking_lot::Mutex;
use tracing::{debug, trace};

use crate::{
    config::WorkerConfig,
    context::Context,
    error::{Error, Result},
    internal::Group,
    task_queue::{MemoryQueue, TaskQueue},
};

type WorkFn<T> = dyn Fn(&Worker<T>, T) -> Result<()> + Send + Sync;

struct Shared<T> {
    queue: Arc<dyn TaskQueue<T>>,
    limit: usize,
    work: Box<WorkFn<T>>,
    ctx: Context,
    batch_ctx: Mutex<Option<Context>>,
}

/// Runs a work function on every task in a queue, with at most `limit` tasks running at once.
///
/// The work function receives the worker itself, so a task can [`Worker::add`] more tasks
/// while the worker is running. [`Worker::wait`] returns once the queue stays empty after all
/// running tasks have finished, or as soon as a task fails or the context fires.
///
/// Clones share the same queue and settings.
pub struct Worker<T> {
    shared: Arc<Shared<T>>,
}

impl<T> Clone for Worker<T> {
    fn clone(&self) -> Worker<T> {
        Worker {
            shared: self.shared.clone(),
        }
    }
}

impl<T> Worker<T>
where
    T: Send + 'static,
{
    /// Create a worker with the default settings: one task at a time, an in-memory queue and a
    /// context that is never cancelled.
    pub fn new<F>(work: F) -> Worker<T>
    where
        F: Fn(&Worker<T>, T) -> Result<()> + Send + Sync + 'static,
    {
        Worker::builder(work).build()
    }

    /// Create a worker that runs up to `limit` tasks at once.
    pub fn with_limit<F>(limit: usize, work: F) -> Worker<T>
    where
        F: Fn(&Worker<T>, T) -> Result<()> + Send + Sync + 'static,
    {
        Worker::builder(work).limit(limit).build()
    }

    pub fn builder<F>(work: F) -> Builder<T>
    where
        F: Fn(&Worker<T>, T) -> Result<()> + Send + Sync + 'static,
    {
        Builder {
            work: Box::new(work),
            limit: 1,
            queue: None,
            ctx: None,
            timeout: None,
        }
    }

    /// Add a task to the queue. Can be called from inside a running task.
    pub fn add(&self, item: T) -> Result<()> {
        self.shared.queue.add(&self.shared.ctx, item)
    }

    /// Add multiple tasks to the queue, stopping at the first error.
    pub fn add_all(&self, items: impl IntoIterator<Item = T>) -> Result<()> {
        items.into_iter().try_for_each(|item| self.add(item))
    }

    /// Block until every task, including tasks added while waiting, has been processed.
    ///
    /// Returns the first error from a task, or the context's error if it fires. Tasks that
    /// have not started when that happens are never run.
    pub fn wait(&self) -> Result<()> {
        let mut batch = 0usize;
        while self.shared.queue.has_next(&self.shared.ctx) {
            batch += 1;
            debug!(batch, limit = self.shared.limit, "starting batch");
            if let Err(err) = self.run_batch() {
                debug!(batch, error = %err, "batch failed");
                return Err(err);
            }
            debug!(batch, "batch finished");
        }
        Ok(())
    }

    // One thread of the group is taken by the draining loop itself.
    fn run_batch(&self) -> Result<()> {
        let capacity = self.shared.limit.saturating_add(1);
        let group = Arc::new(Group::with_limit(&self.shared.ctx, capacity));
        *self.shared.batch_ctx.lock() = Some(group.context().clone());

        let worker = self.clone();
        let drain_group = group.clone();
        let result = group
            .go(move || worker.drain(&drain_group))
            .and_then(|()| group.wait());

        *self.shared.batch_ctx.lock() = None;
        result
    }

    fn drain(&self, group: &Group) -> Result<()> {
        let ctx = group.context();
        loop {
            let item = match self.shared.queue.next(ctx) {
                Ok(item) => item,
                Err(Error::EmptyQueue) => {
                    trace!("queue drained");
                    return Ok(());
                }
                Err(err) => return Err(err),
            };

            trace!("submitting task");
            let worker = self.clone();
            group.go(move || worker.run_task(item))?;
        }
    }

    // An empty-queue error from a task is that task's failure, not the end of the queue.
    fn run_task(&self, item: T) -> Result<()> {
        (self.shared.work)(self, item).map_err(|err| match err {
            Error::EmptyQueue => Error::task(err),
            err => err,
        })
    }
}

impl<T> Worker<T> {
    /// The context of the batch that is currently running, or the worker's own context
    /// between batches. It fires when the worker's context fires or a task fails.
    pub fn context(&self) -> Context {
        match &*self.shared.batch_ctx.lock() {
            Some(ctx) => ctx.clone(),
            None => self.shared.ctx.clone(),
        }
    }

    pub fn limit(&self) -> usize {
        self.shared.limit
    }
}

impl<T> std::fmt::Debug for Worker<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Worker")
            .field("limit", &self.shared.limit)
            .field("ctx", &self.shared.ctx)
            .finish_non_exhaustive()
    }
}

/// Configures a [`Worker`]. Created with [`Worker::builder`].
pub struct Builder<T> {
    work: Box<WorkFn<T>>,
    limit: usize,
    queue: Option<Arc<dyn TaskQueue<T>>>,
    ctx: Option<Context>,
    timeout: Option<Duration>,
}

impl<T> Builder<T>
where
    T: Send + 'static,
{
    /// Maximum number of tasks running at once. Zero is treated as one.
    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = limit.max(1);
        self
    }

    /// Take tasks from `queue` instead of an in-memory queue.
    pub fn queue<Q>(mut self, queue: Q) -> Self
    where
        Q: TaskQueue<T> + 'static,
    {
        let queue: Arc<dyn TaskQueue<T>> = Arc::new(queue);
        self.queue = Some(queue);
        self
    }

    /// Stop the worker when `ctx` fires.
    pub fn context(mut self, ctx: Context) -> Self {
        self.ctx = Some(ctx);
        self
    }

    /// Fail with [`Error::DeadlineExceeded`] once `timeout` has passed since [`Builder::build`].
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Apply the limit and timeout from a [`WorkerConfig`].
    pub fn config(self, config: &WorkerConfig) -> Self {
        let builder = self.limit(config.limit);
        match config.timeout() {
            Some(timeout) => builder.timeout(timeout),
            None => builder,
        }
    }

    pub fn build(self) -> Worker<T> {
        let ctx = self.ctx.unwrap_or_default();
        let ctx = match self.timeout {
            Some(timeout) => ctx.with_timeout(timeout),
            None => ctx,
        };
        let queue: Arc<dyn TaskQueue<T>> = match self.queue {
            Some(queue) => queue,
            None => Arc::new(MemoryQueue::<T>::new()),
        };

        Worker {
            shared: Arc::new(Shared {
                queue,
                limit: self.limit.max(1),
                work: self.work,
                ctx,
                batch_ctx: Mutex::new(None),
            }),
        }
    }
}
