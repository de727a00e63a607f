//! Error types
//!
//! Cancellation is reported separately from failure so that callers can tell
//! "stopped on request" apart from "went wrong".

use std::error::Error as StdError;
use std::fmt;
use std::io;

use thiserror::Error;

/// Boxed error carried by [`TaskError::Failed`].
pub type BoxError = Box<dyn StdError + Send + Sync + 'static>;

/// Raised at a checkpoint once cancellation has been requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Error)]
#[error("thread interrupted")]
pub struct Interrupted;

/// Error returned by a task running inside a managed thread.
#[derive(Debug, Error)]
pub enum TaskError {
    /// The task observed a cancellation request at a checkpoint.
    #[error(transparent)]
    Interrupted(#[from] Interrupted),

    /// The task failed.
    #[error("task failed: {0}")]
    Failed(BoxError),
}

impl TaskError {
    /// Wrap an arbitrary error as a task failure.
    pub fn failed<E>(error: E) -> Self
    where
        E: Into<BoxError>,
    {
        Self::Failed(error.into())
    }

    /// Check whether this error is a cancellation rather than a failure.
    #[must_use]
    pub const fn is_interrupted(&self) -> bool {
        matches!(self, Self::Interrupted(_))
    }
}

/// Errors reported by [`ManagedThread`](crate::ManagedThread).
#[derive(Debug, Error)]
pub enum ThreadError {
    /// The task returned an error; rethrown on join.
    #[error(transparent)]
    Task(#[from] TaskError),

    /// The task panicked; carries the panic message.
    #[error("task panicked: {0}")]
    Panicked(String),

    /// `join_thread` was called before `run`.
    #[error("thread has not been started")]
    NotStarted,

    /// `run` was called more than once.
    #[error("thread has already been started")]
    AlreadyStarted,

    /// The result was already consumed by an earlier join.
    #[error("thread has already been joined")]
    AlreadyJoined,

    /// The worker exited without reporting an outcome.
    #[error("worker exited without reporting a result")]
    ResultLost,

    /// The OS refused to spawn the worker thread.
    #[error("failed to spawn worker thread: {0}")]
    Spawn(#[from] io::Error),
}

impl ThreadError {
    /// Check whether the worker stopped because it was interrupted.
    #[must_use]
    pub const fn is_interrupted(&self) -> bool {
        matches!(self, Self::Task(TaskError::Interrupted(_)))
    }
}

impl From<Interrupted> for ThreadError {
    fn from(err: Interrupted) -> Self {
        Self::Task(TaskError::Interrupted(err))
    }
}

/// Result type for managed thread operations.
pub type ThreadResult<T> = Result<T, ThreadError>;

/// Errors reported by a one-shot [`slot`](crate::slot).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum SlotError {
    /// The value was already taken.
    #[error("value already consumed")]
    Consumed,

    /// The sending side was dropped without providing a value.
    #[error("sender dropped without a value")]
    Abandoned,
}

/// A push that was interrupted before a slot became free.
///
/// The rejected value is handed back to the caller.
#[derive(Clone, PartialEq, Eq)]
pub struct PushInterrupted<T>(pub T);

impl<T> PushInterrupted<T> {
    /// Recover the value that was not pushed.
    pub fn into_inner(self) -> T {
        self.0
    }
}

impl<T> fmt::Debug for PushInterrupted<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PushInterrupted").finish_non_exhaustive()
    }
}

impl<T> fmt::Display for PushInterrupted<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("push interrupted before a slot became free")
    }
}

impl<T> StdError for PushInterrupted<T> {}

impl<T> From<PushInterrupted<T>> for Interrupted {
    fn from(_: PushInterrupted<T>) -> Self {
        Self
    }
}

impl<T> From<PushInterrupted<T>> for TaskError {
    fn from(_: PushInterrupted<T>) -> Self {
        Self::Interrupted(Interrupted)
    }
}
