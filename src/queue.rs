use std::{
    collections::VecDeque,
    sync::atomic::{AtomicBool, Ordering},
};

use crossbeam_channel::{Receiver, Sender, select};
use parking_lot::Mutex;

use crate::{
    context::Context,
    error::{Error, Result},
    task_queue::TaskQueue,
};

/// A thread-safe, unbounded FIFO queue bound to a [`Context`].
///
/// [`CancellableQueue::remove`] blocks while the queue is empty until an item is added or the
/// context fires. Insertion and removal are guarded by separate locks, so producers never wait
/// behind a consumer that is blocked on an empty queue.
pub struct CancellableQueue<T> {
    ctx: Context,
    // Add lock. Also taken by a remover for the pop itself.
    buffer: Mutex<VecDeque<T>>,
    // Remove lock. Held by at most one remover, including while it waits.
    remove_lock: Mutex<()>,
    // Single slot, full while an item is waiting for a blocked remover.
    non_empty_tx: Sender<()>,
    non_empty_rx: Receiver<()>,
    closed: AtomicBool,
}

impl<T> CancellableQueue<T> {
    /// Create an empty queue that stops accepting and handing out items once `ctx` fires.
    pub fn with_context(ctx: &Context) -> CancellableQueue<T> {
        let (non_empty_tx, non_empty_rx) = crossbeam_channel::bounded(1);
        CancellableQueue {
            ctx: ctx.clone(),
            buffer: Mutex::new(VecDeque::new()),
            remove_lock: Mutex::new(()),
            non_empty_tx,
            non_empty_rx,
            closed: AtomicBool::new(false),
        }
    }

    /// Add an item to the end of the queue. Never blocks for long.
    ///
    /// Fails with [`Error::Cancelled`] or [`Error::DeadlineExceeded`] once the context has fired.
    pub fn add(&self, item: T) -> Result<()> {
        self.check_usable()?;
        let mut buffer = self.buffer.lock();
        buffer.push_back(item);
        if buffer.len() == 1 {
            let _ = self.non_empty_tx.try_send(());
        }
        Ok(())
    }

    /// Remove the item at the front of the queue.
    ///
    /// Blocks while the queue is empty until an item is added or the context fires.
    /// Fails with [`Error::Cancelled`] or [`Error::DeadlineExceeded`] once the context has fired,
    /// even if items are still queued.
    pub fn remove(&self) -> Result<T> {
        self.check_usable()?;
        let _remover = self.remove_lock.lock();

        loop {
            self.check_usable()?;
            if let Some(item) = self.pop_front() {
                return Ok(item);
            }
            // A `try_remove` may take the item behind a notification, so wait again if so.
            select! {
                recv(self.ctx.done()) -> _ => return Err(self.cancelled()),
                recv(self.non_empty_rx) -> _ => (),
            }
        }
    }

    /// Remove the item at the front of the queue without blocking.
    /// Fails with [`Error::EmptyQueue`] if there is nothing to remove.
    pub fn try_remove(&self) -> Result<T> {
        self.check_usable()?;
        self.pop_front().ok_or(Error::EmptyQueue)
    }

    pub fn len(&self) -> usize {
        self.buffer.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.lock().is_empty()
    }

    /// Drop all queued items. Every later [`CancellableQueue::add`] or
    /// [`CancellableQueue::remove`] fails with [`Error::Closed`].
    ///
    /// Callers must make sure no other thread is still using the queue.
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
        let mut buffer = self.buffer.lock();
        buffer.clear();
        let _ = self.non_empty_rx.try_recv();
    }

    pub fn context(&self) -> &Context {
        &self.ctx
    }

    fn pop_front(&self) -> Option<T> {
        let mut buffer = self.buffer.lock();
        let item = buffer.pop_front();
        if buffer.is_empty() {
            let _ = self.non_empty_rx.try_recv();
        }
        item
    }

    fn check_usable(&self) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(Error::Closed);
        }
        match self.ctx.err() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn cancelled(&self) -> Error {
        self.ctx.err().unwrap_or(Error::Cancelled)
    }
}

impl<T: Send> TaskQueue<T> for CancellableQueue<T> {
    fn add(&self, ctx: &Context, item: T) -> Result<()> {
        if let Some(err) = ctx.err() {
            return Err(err);
        }
        CancellableQueue::add(self, item)
    }

    fn next(&self, _ctx: &Context) -> Result<T> {
        self.try_remove()
    }

    fn has_next(&self, _ctx: &Context) -> bool {
        !self.is_empty()
    }
}

impl<T> std::fmt::Debug for CancellableQueue<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CancellableQueue")
            .field("len", &self.len())
            .field("closed", &self.closed.load(Ordering::Relaxed))
            .field("ctx", &self.ctx)
            .finish()
    }
}
