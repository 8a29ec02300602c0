use crate::context::Reason;

/// Boxed error returned by a work function.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Errors returned by queues, contexts and workers.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// The context was cancelled explicitly.
    #[error("context canceled")]
    Cancelled,

    /// The context's deadline passed.
    #[error("context deadline exceeded")]
    DeadlineExceeded,

    /// Nothing to take from the queue right now. Only used between a queue and
    /// the draining loop of a worker, [`crate::Worker::wait`] never returns it.
    #[error("queue is empty")]
    EmptyQueue,

    /// The queue was closed with [`crate::CancellableQueue::close`].
    #[error("queue is closed")]
    Closed,

    /// An error returned by a work function, passed through unchanged.
    #[error(transparent)]
    Task(BoxError),
}

impl Error {
    /// Wrap any error (or message) returned from a work function.
    pub fn task(err: impl Into<BoxError>) -> Self {
        Error::Task(err.into())
    }

    /// Returns true for [`Error::Cancelled`] and [`Error::DeadlineExceeded`].
    pub fn is_cancellation(&self) -> bool {
        matches!(self, Error::Cancelled | Error::DeadlineExceeded)
    }

    /// Returns the task error as `E` if this is an [`Error::Task`] holding an `E`.
    pub fn downcast_task_ref<E>(&self) -> Option<&E>
    where
        E: std::error::Error + 'static,
    {
        match self {
            Error::Task(err) => err.downcast_ref::<E>(),
            _ => None,
        }
    }
}

impl From<Reason> for Error {
    fn from(reason: Reason) -> Self {
        match reason {
            Reason::Cancelled => Error::Cancelled,
            Reason::DeadlineExceeded => Error::DeadlineExceeded,
        }
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, PartialEq, thiserror::Error)]
    #[error("letter {0} failed")]
    struct LetterFailed(char);

    #[test]
    fn test_display() {
        assert_eq!(Error::Cancelled.to_string(), "context canceled");
        assert_eq!(Error::DeadlineExceeded.to_string(), "context deadline exceeded");
        assert_eq!(Error::task(LetterFailed('f')).to_string(), "letter f failed");
        assert_eq!(Error::task("plain message").to_string(), "plain message");
    }

    #[test]
    fn test_downcast_task() {
        let err = Error::task(LetterFailed('f'));
        assert_eq!(err.downcast_task_ref::<LetterFailed>(), Some(&LetterFailed('f')));
        assert!(!err.is_cancellation());

        assert!(Error::Cancelled.downcast_task_ref::<LetterFailed>().is_none());
        assert!(Error::from(Reason::DeadlineExceeded).is_cancellation());
    }
}
