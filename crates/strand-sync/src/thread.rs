//! Managed threads
//!
//! A [`ManagedThread`] owns one worker thread running one task. Whatever the
//! task does, the worker never takes the process down: returned errors and
//! panics are captured and rethrown on the thread that joins it.
//!
//! # Lifecycle
//!
//! ```text
//!          run()            task returns            join_thread()
//! +------+       +---------+              +-----------+            +--------+
//! | Idle | ----> | Running | -----------> | Completed | ---------> | Joined |
//! +------+       +---------+              +-----------+            +--------+
//!                     |
//!                     | interrupt() ... next checkpoint -> Err(Interrupted)
//! ```
//!
//! Dropping a managed thread that is running or completed but unjoined blocks
//! until the worker exits, then discards the outcome. Join explicitly whenever
//! the outcome matters.
//!
//! # Cancellation
//!
//! Each managed thread owns a [`CancelToken`] that is handed to its task.
//! [`ManagedThread::interrupt`] cancels it; the task observes this only at
//! checkpoints and usually stops by propagating [`Interrupted`] with `?`.
//!
//! [`Interrupted`]: crate::Interrupted

use std::any::Any;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread::JoinHandle;
use std::time::Duration;

use tracing::{debug, error, warn};

use crate::config::ThreadConfig;
use crate::error::{SlotError, TaskError, ThreadError, ThreadResult};
use crate::interrupt::CancelToken;
use crate::slot::{self, SlotReceiver, SlotSender};

type BoxedTask<T> = Box<dyn FnOnce(&CancelToken) -> Result<T, TaskError> + Send + 'static>;
type ErrorHandler = Box<dyn FnOnce(&ThreadError) + Send + 'static>;

/// Unique identifier for a managed thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ThreadId(u64);

impl ThreadId {
    fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the raw ID value.
    #[must_use]
    pub const fn raw(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for ThreadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Thread({})", self.0)
    }
}

/// Lifecycle state of a managed thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThreadState {
    /// Constructed, worker not spawned.
    Idle,
    /// Worker is executing the task.
    Running,
    /// Worker finished; outcome waiting to be joined.
    Completed,
    /// Outcome consumed by a join.
    Joined,
}

/// An owned worker thread with captured errors and cooperative interruption.
///
/// # Example
///
/// ```
/// use std::sync::Arc;
/// use parking_lot::{Condvar, Mutex};
/// use strand_sync::{interruptible_wait, ManagedThread};
///
/// let mut worker: ManagedThread = ManagedThread::spawn(|token| {
///     let mutex = Mutex::new(());
///     let condvar = Arc::new(Condvar::new());
///     let mut guard = mutex.lock();
///     loop {
///         interruptible_wait(token, &condvar, &mut guard)?;
///     }
/// })
/// .unwrap();
///
/// worker.interrupt();
/// let err = worker.join_thread().unwrap_err();
/// assert!(err.is_interrupted());
/// ```
pub struct ManagedThread<T: Send + 'static = ()> {
    id: ThreadId,
    config: ThreadConfig,
    token: CancelToken,
    task: Option<BoxedTask<T>>,
    on_error: Option<ErrorHandler>,
    handle: Option<JoinHandle<()>>,
    result: Option<SlotReceiver<ThreadResult<T>>>,
    joined: bool,
}

impl<T: Send + 'static> ManagedThread<T> {
    /// Bind a task without starting it.
    ///
    /// The task receives the thread's cancellation token. Arguments are bound
    /// by capturing them in the closure.
    pub fn new<F>(task: F) -> Self
    where
        F: FnOnce(&CancelToken) -> Result<T, TaskError> + Send + 'static,
    {
        Self {
            id: ThreadId::new(),
            config: ThreadConfig::default(),
            token: CancelToken::new(),
            task: Some(Box::new(task)),
            on_error: None,
            handle: None,
            result: None,
            joined: false,
        }
    }

    /// Bind a task and start it immediately.
    ///
    /// # Errors
    ///
    /// Returns [`ThreadError::Spawn`] if the worker thread cannot be created.
    pub fn spawn<F>(task: F) -> ThreadResult<Self>
    where
        F: FnOnce(&CancelToken) -> Result<T, TaskError> + Send + 'static,
    {
        let mut thread = Self::new(task);
        thread.run()?;
        Ok(thread)
    }

    /// Replace the worker configuration. Takes effect on [`run`](Self::run).
    #[must_use]
    pub fn with_config(mut self, config: ThreadConfig) -> Self {
        self.config = config;
        self
    }

    /// Set a handler invoked on the worker when the task fails.
    ///
    /// The handler runs after the error is captured and before the outcome
    /// becomes visible to [`join_thread`](Self::join_thread). It also runs for
    /// interruption and panics.
    ///
    /// # Errors
    ///
    /// Returns [`ThreadError::AlreadyStarted`] after [`run`](Self::run), when
    /// the worker has already taken its handler.
    pub fn set_error_handler<H>(&mut self, handler: H) -> ThreadResult<()>
    where
        H: FnOnce(&ThreadError) + Send + 'static,
    {
        if self.task.is_none() {
            return Err(ThreadError::AlreadyStarted);
        }
        self.on_error = Some(Box::new(handler));
        Ok(())
    }

    /// Builder form of [`set_error_handler`](Self::set_error_handler).
    ///
    /// A handler supplied after [`run`](Self::run) is dropped with a warning.
    #[must_use]
    pub fn with_error_handler<H>(mut self, handler: H) -> Self
    where
        H: FnOnce(&ThreadError) + Send + 'static,
    {
        if let Err(err) = self.set_error_handler(handler) {
            warn!(thread = %self.id, error = %err, "error handler ignored");
        }
        self
    }

    /// Spawn the worker and start the task.
    ///
    /// # Errors
    ///
    /// Returns [`ThreadError::AlreadyStarted`] on a second call and
    /// [`ThreadError::Spawn`] if the OS refuses the thread; in the latter case
    /// the task is dropped and the thread cannot be run again.
    pub fn run(&mut self) -> ThreadResult<()> {
        let task = self.task.take().ok_or(ThreadError::AlreadyStarted)?;
        let on_error = self.on_error.take();
        let token = self.token.clone();
        let id = self.id;
        let (sender, receiver) = slot::oneshot();

        let handle = self
            .config
            .builder(id.raw())
            .spawn(move || worker_main(id, task, on_error, &token, sender))?;

        debug!(thread = %id, "worker spawned");
        self.handle = Some(handle);
        self.result = Some(receiver);
        Ok(())
    }

    /// Request cancellation of the task.
    ///
    /// Takes effect when the task next reaches a checkpoint. Calling this
    /// before [`run`](Self::run) makes the first checkpoint fail.
    pub fn interrupt(&self) {
        debug!(thread = %self.id, "interrupt requested");
        self.token.cancel();
    }

    /// Wait for the worker to finish and return the task's outcome.
    ///
    /// # Errors
    ///
    /// Rethrows the captured task error or panic. Returns
    /// [`ThreadError::NotStarted`] before [`run`](Self::run) and
    /// [`ThreadError::AlreadyJoined`] once the outcome has been consumed.
    pub fn join_thread(&mut self) -> ThreadResult<T> {
        if self.joined {
            return Err(ThreadError::AlreadyJoined);
        }
        let receiver = self.result.as_ref().ok_or(ThreadError::NotStarted)?;
        let outcome = receiver.wait();
        self.reap();
        flatten(outcome)
    }

    /// Like [`join_thread`](Self::join_thread), waiting at most `timeout`.
    ///
    /// Returns `Ok(None)` if the worker is still running; the thread stays
    /// joinable.
    ///
    /// # Errors
    ///
    /// Same as [`join_thread`](Self::join_thread).
    pub fn join_timeout(&mut self, timeout: Duration) -> ThreadResult<Option<T>> {
        if self.joined {
            return Err(ThreadError::AlreadyJoined);
        }
        let receiver = self.result.as_ref().ok_or(ThreadError::NotStarted)?;
        match receiver.wait_timeout(timeout) {
            Ok(None) => Ok(None),
            Ok(Some(outcome)) => {
                self.reap();
                outcome.map(Some)
            }
            Err(err) => {
                self.reap();
                flatten(Err(err))
            }
        }
    }

    /// Check whether the worker has been started and not yet joined.
    ///
    /// True while running and while completed but unjoined; false before
    /// [`run`](Self::run) and after a join.
    #[must_use]
    pub fn is_joinable(&self) -> bool {
        self.handle.is_some()
    }

    /// Check whether the worker has finished executing.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        match &self.handle {
            Some(handle) => handle.is_finished(),
            None => self.joined,
        }
    }

    /// Get the current lifecycle state.
    #[must_use]
    pub fn state(&self) -> ThreadState {
        if self.joined {
            return ThreadState::Joined;
        }
        match &self.handle {
            None => ThreadState::Idle,
            Some(handle) if handle.is_finished() => ThreadState::Completed,
            Some(_) => ThreadState::Running,
        }
    }

    /// Get the thread's ID.
    #[must_use]
    pub fn id(&self) -> ThreadId {
        self.id
    }

    /// Get the cancellation token handed to the task.
    #[must_use]
    pub fn token(&self) -> &CancelToken {
        &self.token
    }

    /// Join the OS thread after its outcome has been taken.
    fn reap(&mut self) {
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                error!(thread = %self.id, "worker panicked outside its task");
            }
        }
        self.joined = true;
    }
}

impl<T: Send + 'static> Drop for ManagedThread<T> {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            debug!(thread = %self.id, "joining unjoined worker on drop");
            let _ = handle.join();
        }
    }
}

impl<T: Send + 'static> fmt::Debug for ManagedThread<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ManagedThread")
            .field("id", &self.id)
            .field("state", &self.state())
            .field("interrupted", &self.token.is_cancelled())
            .finish()
    }
}

fn flatten<T>(outcome: Result<ThreadResult<T>, SlotError>) -> ThreadResult<T> {
    match outcome {
        Ok(result) => result,
        Err(SlotError::Consumed) => Err(ThreadError::AlreadyJoined),
        Err(SlotError::Abandoned) => Err(ThreadError::ResultLost),
    }
}

fn worker_main<T>(
    id: ThreadId,
    task: BoxedTask<T>,
    on_error: Option<ErrorHandler>,
    token: &CancelToken,
    sender: SlotSender<ThreadResult<T>>,
) {
    debug!(thread = %id, "worker started");

    let outcome = match panic::catch_unwind(AssertUnwindSafe(|| task(token))) {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(err)) => Err(ThreadError::Task(err)),
        Err(payload) => Err(ThreadError::Panicked(panic_message(payload.as_ref()))),
    };

    match &outcome {
        Ok(_) => debug!(thread = %id, "worker completed"),
        Err(err) if err.is_interrupted() => debug!(thread = %id, "worker interrupted"),
        Err(err) => warn!(thread = %id, error = %err, "worker failed"),
    }

    if let (Err(err), Some(handler)) = (&outcome, on_error) {
        if panic::catch_unwind(AssertUnwindSafe(|| handler(err))).is_err() {
            error!(thread = %id, "error handler panicked");
        }
    }

    sender.fill(outcome);
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&'static str>() {
        (*message).to_owned()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        String::from("non-string panic payload")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Interrupted;
    use crate::interrupt::interruptible_wait;
    use parking_lot::{Condvar, Mutex};
    use std::sync::atomic::{AtomicBool, AtomicUsize};
    use std::sync::Arc;
    use std::thread;
    use std::time::Instant;

    fn wait_forever(token: &CancelToken) -> Result<(), TaskError> {
        let mutex = Mutex::new(());
        let condvar = Arc::new(Condvar::new());
        let mut guard = mutex.lock();
        loop {
            interruptible_wait(token, &condvar, &mut guard)?;
        }
    }

    #[test]
    fn test_thread_id_uniqueness() {
        let a = ManagedThread::new(|_| Ok(()));
        let b = ManagedThread::new(|_| Ok(()));
        assert_ne!(a.id(), b.id());
    }

    #[test]
    fn test_join_returns_value() {
        let mut thread = ManagedThread::new(|_| Ok(21 * 2));
        assert_eq!(thread.state(), ThreadState::Idle);
        assert!(!thread.is_joinable());

        thread.run().unwrap();
        assert!(thread.is_joinable());

        assert_eq!(thread.join_thread().unwrap(), 42);
        assert_eq!(thread.state(), ThreadState::Joined);
        assert!(!thread.is_joinable());
        assert!(thread.is_finished());
    }

    #[test]
    fn test_join_before_run() {
        let mut thread = ManagedThread::new(|_| Ok(()));
        assert!(matches!(thread.join_thread(), Err(ThreadError::NotStarted)));
    }

    #[test]
    fn test_double_join_is_error() {
        let mut thread = ManagedThread::spawn(|_| Ok(())).unwrap();
        thread.join_thread().unwrap();
        assert!(matches!(thread.join_thread(), Err(ThreadError::AlreadyJoined)));
    }

    #[test]
    fn test_double_run_is_error() {
        let mut thread = ManagedThread::spawn(|_| Ok(())).unwrap();
        assert!(matches!(thread.run(), Err(ThreadError::AlreadyStarted)));
        thread.join_thread().unwrap();
    }

    #[test]
    fn test_completed_until_joined() {
        let mut thread = ManagedThread::spawn(|_| Ok(())).unwrap();
        let start = Instant::now();
        while !thread.is_finished() && start.elapsed() < Duration::from_secs(5) {
            thread::sleep(Duration::from_millis(1));
        }
        assert_eq!(thread.state(), ThreadState::Completed);
        assert!(thread.is_joinable());
        thread.join_thread().unwrap();
    }

    #[test]
    fn test_interrupt_stops_waiting_task() {
        let mut thread = ManagedThread::spawn(wait_forever).unwrap();
        thread::sleep(Duration::from_millis(20));
        assert_eq!(thread.state(), ThreadState::Running);

        thread.interrupt();
        let err = thread.join_thread().unwrap_err();
        assert!(err.is_interrupted());
        assert!(matches!(err, ThreadError::Task(TaskError::Interrupted(Interrupted))));
    }

    #[test]
    fn test_interrupt_before_run() {
        let mut thread = ManagedThread::new(wait_forever);
        thread.interrupt();
        thread.run().unwrap();
        assert!(thread.join_thread().unwrap_err().is_interrupted());
    }

    #[test]
    fn test_task_error_is_rethrown() {
        let mut thread: ManagedThread<()> =
            ManagedThread::spawn(|_| Err(TaskError::failed("bad input"))).unwrap();
        let err = thread.join_thread().unwrap_err();
        assert!(!err.is_interrupted());
        assert_eq!(err.to_string(), "task failed: bad input");
    }

    #[test]
    fn test_panic_is_captured() {
        let mut thread: ManagedThread<()> =
            ManagedThread::spawn(|_| panic!("worker exploded")).unwrap();
        match thread.join_thread() {
            Err(ThreadError::Panicked(message)) => assert_eq!(message, "worker exploded"),
            other => panic!("expected panic capture, got {other:?}"),
        }
    }

    #[test]
    fn test_error_handler_runs_before_join_returns() {
        let handled = Arc::new(AtomicBool::new(false));
        let handled_clone = Arc::clone(&handled);

        let mut thread: ManagedThread<()> =
            ManagedThread::new(|_| Err(TaskError::failed("boom"))).with_error_handler(move |err| {
                assert_eq!(err.to_string(), "task failed: boom");
                handled_clone.store(true, Ordering::SeqCst);
            });
        thread.run().unwrap();

        assert!(thread.join_thread().is_err());
        assert!(handled.load(Ordering::SeqCst));
    }

    #[test]
    fn test_error_handler_not_called_on_success() {
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_clone = Arc::clone(&calls);

        let mut thread = ManagedThread::new(|_| Ok(()));
        thread
            .set_error_handler(move |_| {
                calls_clone.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap();
        thread.run().unwrap();
        thread.join_thread().unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_error_handler_after_run_is_rejected() {
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_clone = Arc::clone(&calls);

        let mut thread: ManagedThread<()> =
            ManagedThread::spawn(|_| Err(TaskError::failed("late"))).unwrap();
        let result = thread.set_error_handler(move |_| {
            calls_clone.fetch_add(1, Ordering::SeqCst);
        });
        assert!(matches!(result, Err(ThreadError::AlreadyStarted)));

        assert!(thread.join_thread().is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_panicking_error_handler_keeps_original_error() {
        let mut thread: ManagedThread<()> = ManagedThread::new(|_| Err(TaskError::failed("first")))
            .with_error_handler(|_| panic!("handler exploded"));
        thread.run().unwrap();

        let err = thread.join_thread().unwrap_err();
        assert_eq!(err.to_string(), "task failed: first");
    }

    #[test]
    fn test_join_timeout() {
        let mut thread = ManagedThread::spawn(wait_forever).unwrap();
        assert!(matches!(thread.join_timeout(Duration::from_millis(10)), Ok(None)));
        assert!(thread.is_joinable());

        thread.interrupt();
        let err = thread.join_timeout(Duration::from_secs(5)).unwrap_err();
        assert!(err.is_interrupted());
        assert!(!thread.is_joinable());
    }

    #[test]
    fn test_drop_waits_for_worker() {
        let finished = Arc::new(AtomicBool::new(false));
        let finished_clone = Arc::clone(&finished);

        let thread = ManagedThread::spawn(move |_| {
            thread::sleep(Duration::from_millis(50));
            finished_clone.store(true, Ordering::SeqCst);
            Ok(())
        })
        .unwrap();

        drop(thread);
        assert!(finished.load(Ordering::SeqCst));
    }

    #[test]
    fn test_drop_discards_error() {
        let thread: ManagedThread<()> =
            ManagedThread::spawn(|_| Err(TaskError::failed("ignored"))).unwrap();
        drop(thread);
    }

    #[test]
    fn test_named_worker() {
        let mut thread = ManagedThread::new(|_| Ok(thread::current().name().map(str::to_owned)))
            .with_config(ThreadConfig::default().with_name("named-worker"));
        thread.run().unwrap();
        assert_eq!(thread.join_thread().unwrap().as_deref(), Some("named-worker"));
    }
}
