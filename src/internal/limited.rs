use std::{
    any::Any,
    mem,
    panic::{self, AssertUnwindSafe},
    sync::Arc,
    thread::JoinHandle,
};

use crossbeam_channel::{Receiver, Sender, TrySendError, select};
use parking_lot::{Condvar, Mutex};

use crate::{
    context::Context,
    error::{Error, Result},
};

type Unit = Box<dyn FnOnce() -> Result<()> + Send>;

/// A group of up to `capacity` worker threads running submitted units.
///
/// Threads are started on demand and live until the group is waited on. The
/// first unit to fail fires the group's context, which makes every later
/// [`Group::go`] fail and tells running units to stop.
pub(crate) struct Group {
    shared: Arc<Shared>,
    capacity: usize,
    // Zero capacity: a send only completes when an idle thread takes the unit.
    unit_tx: Sender<Unit>,
    unit_rx: Receiver<Unit>,
    threads: Mutex<Vec<JoinHandle<()>>>,
}

struct Shared {
    ctx: Context,
    first_error: Mutex<Option<Error>>,
    panicked: Mutex<Option<Box<dyn Any + Send>>>,
    active: Mutex<usize>,
    idle: Condvar,
}

impl Shared {
    fn serve(&self, units: &Receiver<Unit>) {
        loop {
            select! {
                recv(units) -> unit => match unit {
                    Ok(unit) => self.run(unit),
                    Err(_) => return,
                },
                recv(self.ctx.done()) -> _ => return,
            }
        }
    }

    fn run(&self, unit: Unit) {
        // A unit handed over after a failure never starts.
        if !self.ctx.is_cancelled() {
            match panic::catch_unwind(AssertUnwindSafe(unit)) {
                Ok(Ok(())) => (),
                Ok(Err(err)) => {
                    self.first_error.lock().get_or_insert(err);
                    self.ctx.cancel();
                }
                Err(payload) => {
                    tracing::warn!("unit of work panicked");
                    self.panicked.lock().get_or_insert(payload);
                    self.ctx.cancel();
                }
            }
        }
        self.finish();
    }

    fn finish(&self) {
        let mut active = self.active.lock();
        *active -= 1;
        if *active == 0 {
            self.idle.notify_all();
        }
    }

    fn cancelled(&self) -> Error {
        self.ctx.err().unwrap_or(Error::Cancelled)
    }
}

impl Group {
    /// Create a group running at most `capacity` units at once, with a context derived from `ctx`.
    pub(crate) fn with_limit(ctx: &Context, capacity: usize) -> Group {
        let (unit_tx, unit_rx) = crossbeam_channel::bounded(0);
        Group {
            shared: Arc::new(Shared {
                ctx: ctx.child(),
                first_error: Mutex::new(None),
                panicked: Mutex::new(None),
                active: Mutex::new(0),
                idle: Condvar::new(),
            }),
            capacity: capacity.max(1),
            unit_tx,
            unit_rx,
            threads: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn context(&self) -> &Context {
        &self.shared.ctx
    }

    /// Run `unit` on one of the group's threads once one is free.
    ///
    /// Blocks while every thread is busy and no more may be started. Fails
    /// with the context's error if the context fires first or has already
    /// fired.
    pub(crate) fn go<F>(&self, unit: F) -> Result<()>
    where
        F: FnOnce() -> Result<()> + Send + 'static,
    {
        if let Some(err) = self.shared.ctx.err() {
            return Err(err);
        }

        *self.shared.active.lock() += 1;
        if let Err(err) = self.dispatch(Box::new(unit)) {
            self.shared.finish();
            return Err(err);
        }

        // A thread freed by a failing unit must not start another one.
        if let Some(err) = self.shared.ctx.err() {
            return Err(err);
        }
        Ok(())
    }

    /// Wait for every unit, including units started while waiting, and return the first error.
    pub(crate) fn wait(&self) -> Result<()> {
        {
            let mut active = self.shared.active.lock();
            while *active > 0 {
                self.shared.idle.wait(&mut active);
            }
        }

        // Firing the context stops the idle threads.
        self.shared.ctx.cancel();
        for handle in mem::take(&mut *self.threads.lock()) {
            let _ = handle.join();
        }

        if let Some(payload) = self.shared.panicked.lock().take() {
            panic::resume_unwind(payload);
        }
        match self.shared.first_error.lock().take() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn dispatch(&self, unit: Unit) -> Result<()> {
        let unit = match self.unit_tx.try_send(unit) {
            Ok(()) => return Ok(()),
            Err(TrySendError::Full(unit) | TrySendError::Disconnected(unit)) => unit,
        };

        let unit = {
            let mut threads = self.threads.lock();
            if threads.len() < self.capacity {
                let shared = self.shared.clone();
                let units = self.unit_rx.clone();
                threads.push(std::thread::spawn(move || {
                    shared.run(unit);
                    shared.serve(&units);
                }));
                return Ok(());
            }
            unit
        };

        select! {
            send(self.unit_tx, unit) -> sent => sent.map_err(|_| self.shared.cancelled()),
            recv(self.shared.ctx.done()) -> _ => Err(self.shared.cancelled()),
        }
    }

    #[cfg(test)]
    fn thread_count(&self) -> usize {
        self.threads.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use std::{
        sync::atomic::{AtomicBool, AtomicUsize, Ordering},
        thread::sleep,
        time::Duration,
    };

    use super::*;

    #[test]
    fn test_limit() {
        let group = Group::with_limit(&Context::background(), 3);
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        for _ in 0..20 {
            let running = running.clone();
            let peak = peak.clone();
            group
                .go(move || {
                    let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    sleep(Duration::from_millis(5));
                    running.fetch_sub(1, Ordering::SeqCst);
                    Ok(())
                })
                .unwrap();
        }

        group.wait().unwrap();
        assert!(peak.load(Ordering::SeqCst) <= 3);
        assert_eq!(running.load(Ordering::SeqCst), 0);
        assert!(group.context().is_cancelled());
    }

    #[test]
    fn test_threads_are_reused() {
        let group = Group::with_limit(&Context::background(), 3);
        let count = Arc::new(AtomicUsize::new(0));

        for _ in 0..10_000 {
            let count = count.clone();
            group
                .go(move || {
                    count.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                })
                .unwrap();
        }

        assert!(group.thread_count() <= 3);
        group.wait().unwrap();
        assert_eq!(count.load(Ordering::SeqCst), 10_000);
    }

    #[test]
    fn test_unbounded_limit() {
        let group = Group::with_limit(&Context::background(), usize::MAX);
        let count = Arc::new(AtomicUsize::new(0));

        for _ in 0..100 {
            let count = count.clone();
            group
                .go(move || {
                    count.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                })
                .unwrap();
        }

        group.wait().unwrap();
        assert_eq!(count.load(Ordering::SeqCst), 100);
        assert!(group.thread_count() <= 100);
    }

    #[test]
    fn test_first_error() {
        let group = Group::with_limit(&Context::background(), 1);
        let started = Arc::new(AtomicBool::new(false));
        group.go(|| Err(Error::task("first"))).unwrap();

        // The failing unit fires the context before its thread takes more work.
        let started_clone = started.clone();
        let second = group.go(move || {
            started_clone.store(true, Ordering::SeqCst);
            Ok(())
        });
        assert!(matches!(second, Err(Error::Cancelled)));

        let err = group.wait().unwrap_err();
        assert_eq!(err.to_string(), "first");
        assert!(!started.load(Ordering::SeqCst));
    }

    #[test]
    fn test_go_after_cancel() {
        let ctx = Context::background();
        let group = Group::with_limit(&ctx, 4);
        ctx.cancel();

        assert!(matches!(group.go(|| Ok(())), Err(Error::Cancelled)));
        assert!(group.wait().is_ok());
        assert_eq!(group.thread_count(), 0);
    }

    #[test]
    fn test_nested_go() {
        let group = Arc::new(Group::with_limit(&Context::background(), 2));
        let count = Arc::new(AtomicUsize::new(0));

        let inner_group = group.clone();
        let inner_count = count.clone();
        group
            .go(move || {
                for _ in 0..10 {
                    let count = inner_count.clone();
                    inner_group.go(move || {
                        count.fetch_add(1, Ordering::SeqCst);
                        Ok(())
                    })?;
                }
                Ok(())
            })
            .unwrap();

        group.wait().unwrap();
        assert_eq!(count.load(Ordering::SeqCst), 10);
    }

    #[test]
    #[should_panic(expected = "unit panicked")]
    fn test_panic_reaches_wait() {
        let group = Group::with_limit(&Context::background(), 2);
        group.go(|| panic!("unit panicked")).unwrap();
        let _ = group.wait();
    }
}
