use std::{collections::VecDeque, sync::Arc};

use parking_lot::Mutex;

use crate::{
    context::Context,
    error::{Error, Result},
};

/// The queue a [`crate::Worker`] takes its tasks from.
///
/// Implement this to back a worker with something other than memory. Implementations must be
/// safe to call from many threads at once, including from inside running tasks.
pub trait TaskQueue<T>: Send + Sync {
    /// Add a task to the end of the queue.
    /// Whether `ctx` is honored is up to the implementation.
    fn add(&self, ctx: &Context, item: T) -> Result<()>;

    /// Take the next task without blocking.
    /// Fails with [`Error::EmptyQueue`] if there is nothing to take right now.
    fn next(&self, ctx: &Context) -> Result<T>;

    /// Returns true if the queue looks non-empty. This is only a hint: another thread
    /// may add or take a task before the following [`TaskQueue::next`].
    fn has_next(&self, ctx: &Context) -> bool;
}

impl<T, Q> TaskQueue<T> for Arc<Q>
where
    Q: TaskQueue<T> + ?Sized,
{
    fn add(&self, ctx: &Context, item: T) -> Result<()> {
        (**self).add(ctx, item)
    }

    fn next(&self, ctx: &Context) -> Result<T> {
        (**self).next(ctx)
    }

    fn has_next(&self, ctx: &Context) -> bool {
        (**self).has_next(ctx)
    }
}

/// The default in-memory [`TaskQueue`]. Never blocks and ignores the context.
pub struct MemoryQueue<T> {
    tasks: Mutex<VecDeque<T>>,
}

impl<T> MemoryQueue<T> {
    pub fn new() -> MemoryQueue<T> {
        MemoryQueue {
            tasks: Mutex::new(VecDeque::new()),
        }
    }

    pub fn len(&self) -> usize {
        self.tasks.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.lock().is_empty()
    }

    /// Add multiple tasks and return how many were added.
    pub fn extend(&self, new_tasks: impl IntoIterator<Item = T>) -> usize {
        let mut tasks = self.tasks.lock();
        let len = tasks.len();
        tasks.extend(new_tasks);
        tasks.len() - len
    }

    /// Remove all queued tasks and return how many were removed.
    pub fn clear(&self) -> usize {
        let mut tasks = self.tasks.lock();
        tasks.drain(..).len()
    }
}

impl<T> Default for MemoryQueue<T> {
    fn default() -> MemoryQueue<T> {
        MemoryQueue::new()
    }
}

impl<T: Send> TaskQueue<T> for MemoryQueue<T> {
    fn add(&self, _ctx: &Context, item: T) -> Result<()> {
        self.tasks.lock().push_back(item);
        Ok(())
    }

    fn next(&self, _ctx: &Context) -> Result<T> {
        self.tasks.lock().pop_front().ok_or(Error::EmptyQueue)
    }

    fn has_next(&self, _ctx: &Context) -> bool {
        !self.is_empty()
    }
}

impl<T> std::fmt::Debug for MemoryQueue<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryQueue").field("len", &self.len()).finish()
    }
}
