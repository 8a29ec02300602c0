use std::{
    sync::{Arc, Weak},
    time::{Duration, Instant},
};

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use parking_lot::Mutex;

use crate::error::Error;

/// Return the context's error from the enclosing function if it has been cancelled.
/// Can be used inside a work function to stop early.
///
/// ## Example usage:
/// ```rust ignore
/// fn work(worker: &Worker<T>, item: T) -> Result<()> {
///     while work_not_done {
///         check_if_cancelled!(worker.context());
///         do_work();
///     }
///     Ok(())
/// }
/// ```
///
/// ## Shorthand for:
/// ```rust ignore
/// if let Some(err) = ctx.err() {
///    return Err(err.into());
/// }
/// ```
#[macro_export]
macro_rules! check_if_cancelled {
    ($ctx:expr) => {
        if let Some(err) = $ctx.err() {
            return Err(err.into());
        }
    };
}

/// Why a context fired.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Reason {
    Cancelled,
    DeadlineExceeded,
}

struct Inner {
    reason: Mutex<Option<Reason>>,
    children: Mutex<Vec<Weak<Inner>>>,
    // Dropped on cancel, which disconnects every clone of `done_rx`.
    done_tx: Mutex<Option<Sender<()>>>,
    done_rx: Receiver<()>,
    deadline: Option<Instant>,
}

impl Inner {
    fn new(deadline: Option<Instant>) -> Inner {
        let (done_tx, done_rx) = crossbeam_channel::bounded(0);
        Inner {
            reason: Mutex::new(None),
            children: Mutex::new(Vec::new()),
            done_tx: Mutex::new(Some(done_tx)),
            done_rx,
            deadline,
        }
    }

    fn cancel(&self, reason: Reason) {
        let children = {
            let mut current = self.reason.lock();
            if current.is_some() {
                return;
            }
            *current = Some(reason);
            drop(self.done_tx.lock().take());
            std::mem::take(&mut *self.children.lock())
        };

        for child in children.iter().filter_map(Weak::upgrade) {
            child.cancel(reason);
        }
    }
}

/// A cancellation signal shared between the code that starts work and the work itself.
///
/// Clones share the same signal. Contexts form a tree: a derived context fires when its
/// parent fires, but cancelling a derived context leaves the parent untouched.
#[derive(Clone)]
pub struct Context {
    inner: Arc<Inner>,
}

impl Context {
    /// A root context. It only fires if a holder calls [`Context::cancel`].
    pub fn background() -> Context {
        Context {
            inner: Arc::new(Inner::new(None)),
        }
    }

    /// Derive a context that fires together with this one, or on its own [`Context::cancel`].
    pub fn child(&self) -> Context {
        self.derive(self.inner.deadline)
    }

    /// Derive a context that also fires with [`Reason::DeadlineExceeded`] after `timeout`.
    pub fn with_timeout(&self, timeout: Duration) -> Context {
        self.with_deadline(Instant::now() + timeout)
    }

    /// Derive a context that also fires with [`Reason::DeadlineExceeded`] at `deadline`.
    /// If this context already has an earlier deadline, the earlier one is kept.
    pub fn with_deadline(&self, deadline: Instant) -> Context {
        let deadline = match self.inner.deadline {
            Some(parent) if parent <= deadline => parent,
            _ => deadline,
        };
        let ctx = self.derive(Some(deadline));
        if !ctx.is_cancelled() {
            spawn_deadline_timer(&ctx.inner, deadline);
        }
        ctx
    }

    fn derive(&self, deadline: Option<Instant>) -> Context {
        let child = Arc::new(Inner::new(deadline));
        let fired = {
            let reason = self.inner.reason.lock();
            if reason.is_none() {
                let mut children = self.inner.children.lock();
                children.retain(|c| c.strong_count() > 0);
                children.push(Arc::downgrade(&child));
            }
            *reason
        };
        if let Some(reason) = fired {
            child.cancel(reason);
        }
        Context { inner: child }
    }

    /// Fire this context and every context derived from it. Calling it again has no effect.
    pub fn cancel(&self) {
        self.inner.cancel(Reason::Cancelled);
    }

    /// Returns true once the context has fired.
    pub fn is_cancelled(&self) -> bool {
        self.inner.reason.lock().is_some()
    }

    /// Why the context fired, or [`None`] while it is still live.
    pub fn reason(&self) -> Option<Reason> {
        *self.inner.reason.lock()
    }

    /// The error matching [`Context::reason`].
    pub fn err(&self) -> Option<Error> {
        self.reason().map(Error::from)
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.inner.deadline
    }

    /// A channel that disconnects when the context fires. Meant for
    /// [`crossbeam_channel::select!`]; nothing is ever sent on it.
    pub fn done(&self) -> &Receiver<()> {
        &self.inner.done_rx
    }

    /// Block until the context fires and return the reason.
    pub fn wait(&self) -> Reason {
        let _ = self.inner.done_rx.recv();
        self.fired_reason()
    }

    /// Block until the context fires or `timeout` elapses.
    /// Returns the reason if the context fired in time.
    pub fn wait_timeout(&self, timeout: Duration) -> Option<Reason> {
        match self.inner.done_rx.recv_timeout(timeout) {
            Err(RecvTimeoutError::Timeout) => None,
            _ => Some(self.fired_reason()),
        }
    }

    // The done channel is only disconnected after the reason has been stored.
    fn fired_reason(&self) -> Reason {
        self.reason().unwrap_or(Reason::Cancelled)
    }
}

impl Default for Context {
    fn default() -> Context {
        Context::background()
    }
}

impl std::fmt::Debug for Context {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Context")
            .field("reason", &self.reason())
            .field("deadline", &self.inner.deadline)
            .finish()
    }
}

fn spawn_deadline_timer(inner: &Arc<Inner>, deadline: Instant) {
    let weak = Arc::downgrade(inner);
    let done = inner.done_rx.clone();
    std::thread::spawn(move || {
        let timeout = deadline.saturating_duration_since(Instant::now());
        // Disconnected means the context fired or was dropped first.
        if let Err(RecvTimeoutError::Timeout) = done.recv_timeout(timeout) {
            if let Some(inner) = weak.upgrade() {
                tracing::debug!("context deadline exceeded");
                inner.cancel(Reason::DeadlineExceeded);
            }
        }
    });
}
