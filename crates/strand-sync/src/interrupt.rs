//! Cooperative cancellation
//!
//! A [`CancelToken`] is a shared flag that any thread may set. The thread that
//! owns the token observes it only at checkpoints:
//!
//! - [`CancelToken::checkpoint`], called explicitly by running code
//! - [`interruptible_wait`] and friends, before and after every wait
//!
//! # Waking a Blocked Waiter
//!
//! Before waiting, an interruptible wait associates the token with the
//! condition variable it is about to block on. [`CancelToken::cancel`] notifies
//! that condition, so a waiter normally wakes immediately. The wait is also
//! bounded by a short tick, which covers the window between the last check
//! and the start of the wait where a notification could be missed.
//!
//! ```text
//! Waiter (holds caller lock)          Canceller
//! ───────────────────────────         ───────────────────────────
//! checkpoint()
//! associate(cv)    [token lock]
//! checkpoint()                        store(flag, true)
//! cv.wait_for(tick)                   [token lock] cv.notify_all()
//! clear association [token lock]
//! checkpoint() -> Interrupted
//! ```
//!
//! Lock order is always caller lock, then token lock. `cancel` holds only the
//! token lock and never touches a caller's lock.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::{Condvar, Mutex, MutexGuard};
use tracing::debug;

use crate::error::Interrupted;

/// Default bound on a single wait before the token is rechecked.
pub const DEFAULT_WAIT_TICK: Duration = Duration::from_millis(1);

struct TokenInner {
    cancelled: AtomicBool,
    /// Condition the owning thread is currently blocked on, if any.
    waiting_on: Mutex<Option<Weak<Condvar>>>,
}

/// A cooperative cancellation flag.
///
/// Cloning a token yields another handle to the same flag.
#[derive(Clone)]
pub struct CancelToken {
    inner: Arc<TokenInner>,
}

impl CancelToken {
    /// Create a token that has not been cancelled.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Arc::new(TokenInner {
                cancelled: AtomicBool::new(false),
                waiting_on: Mutex::new(None),
            }),
        }
    }

    /// Request cancellation.
    ///
    /// If the owning thread is blocked in an interruptible wait, the condition
    /// it waits on is notified. Cancellation is sticky and cannot be undone.
    pub fn cancel(&self) {
        // Relaxed is enough: no other state is published through the flag.
        self.inner.cancelled.store(true, Ordering::Relaxed);

        let waiting_on = self.inner.waiting_on.lock();
        if let Some(condvar) = waiting_on.as_ref().and_then(Weak::upgrade) {
            debug!("cancellation requested, waking blocked waiter");
            condvar.notify_all();
        } else {
            debug!("cancellation requested");
        }
    }

    /// Check whether cancellation has been requested.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::Relaxed)
    }

    /// Explicit cancellation checkpoint.
    ///
    /// # Errors
    ///
    /// Returns [`Interrupted`] if cancellation has been requested.
    pub fn checkpoint(&self) -> Result<(), Interrupted> {
        if self.is_cancelled() {
            Err(Interrupted)
        } else {
            Ok(())
        }
    }

    /// Associate the token with the condition about to be waited on.
    ///
    /// The association lasts until the returned guard is dropped, which
    /// happens on every exit path including unwinding.
    #[must_use = "the association is cleared as soon as the guard is dropped"]
    pub fn associate(&self, condvar: &Arc<Condvar>) -> Association<'_> {
        *self.inner.waiting_on.lock() = Some(Arc::downgrade(condvar));
        Association { token: self }
    }

    /// Remove the association with any condition.
    pub fn clear_association(&self) {
        *self.inner.waiting_on.lock() = None;
    }

    /// Check whether the token is currently associated with a condition.
    #[must_use]
    pub fn is_associated(&self) -> bool {
        self.inner.waiting_on.lock().is_some()
    }
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for CancelToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CancelToken")
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

/// Scoped association between a token and a condition.
///
/// Clears the association when dropped.
pub struct Association<'a> {
    token: &'a CancelToken,
}

impl Drop for Association<'_> {
    fn drop(&mut self) {
        self.token.clear_association();
    }
}

/// Wait once on `condvar`, observing cancellation before and after.
///
/// This is a single wait attempt bounded by [`DEFAULT_WAIT_TICK`]: it returns
/// on notification, timeout or spurious wakeup, and the caller must re-evaluate
/// its own predicate.
///
/// # Errors
///
/// Returns [`Interrupted`] if the token is cancelled before or after the wait.
pub fn interruptible_wait<T: ?Sized>(
    token: &CancelToken,
    condvar: &Arc<Condvar>,
    guard: &mut MutexGuard<'_, T>,
) -> Result<(), Interrupted> {
    interruptible_wait_for(token, condvar, guard, DEFAULT_WAIT_TICK)
}

/// Like [`interruptible_wait`] with an explicit bound on the wait.
///
/// # Errors
///
/// Returns [`Interrupted`] if the token is cancelled before or after the wait.
pub fn interruptible_wait_for<T: ?Sized>(
    token: &CancelToken,
    condvar: &Arc<Condvar>,
    guard: &mut MutexGuard<'_, T>,
    tick: Duration,
) -> Result<(), Interrupted> {
    token.checkpoint()?;

    let association = token.associate(condvar);
    // A cancel between the first check and the association would notify
    // nobody, so look again now that we are reachable.
    token.checkpoint()?;

    let _ = condvar.wait_for(guard, tick);
    drop(association);

    token.checkpoint()
}

/// Wait on `condvar` while `condition` holds, observing cancellation.
///
/// The predicate is evaluated with the lock held, first before any wait.
///
/// # Errors
///
/// Returns [`Interrupted`] as soon as a checkpoint observes cancellation. A
/// condition that is already false returns `Ok` without a checkpoint.
pub fn interruptible_wait_while<T, F>(
    token: &CancelToken,
    condvar: &Arc<Condvar>,
    guard: &mut MutexGuard<'_, T>,
    mut condition: F,
) -> Result<(), Interrupted>
where
    T: ?Sized,
    F: FnMut(&mut T) -> bool,
{
    while condition(&mut **guard) {
        interruptible_wait(token, condvar, guard)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Instant;

    #[test]
    fn test_token_starts_clear() {
        let token = CancelToken::new();
        assert!(!token.is_cancelled());
        assert!(token.checkpoint().is_ok());
        assert!(!token.is_associated());
    }

    #[test]
    fn test_cancel_is_shared_between_clones() {
        let token = CancelToken::new();
        let clone = token.clone();

        clone.cancel();
        assert!(token.is_cancelled());
        assert_eq!(token.checkpoint(), Err(Interrupted));
    }

    #[test]
    fn test_association_cleared_on_drop() {
        let token = CancelToken::new();
        let condvar = Arc::new(Condvar::new());

        {
            let _association = token.associate(&condvar);
            assert!(token.is_associated());
        }
        assert!(!token.is_associated());
    }

    #[test]
    fn test_cancel_after_condvar_dropped_is_harmless() {
        let token = CancelToken::new();
        let condvar = Arc::new(Condvar::new());
        let association = token.associate(&condvar);
        drop(condvar);

        token.cancel();
        drop(association);
        assert!(token.is_cancelled());
    }

    #[test]
    fn test_wait_on_cancelled_token_does_not_wait() {
        let token = CancelToken::new();
        token.cancel();

        let mutex = Mutex::new(());
        let condvar = Arc::new(Condvar::new());
        let mut guard = mutex.lock();

        let start = Instant::now();
        let result = interruptible_wait_for(&token, &condvar, &mut guard, Duration::from_secs(5));
        assert_eq!(result, Err(Interrupted));
        assert!(start.elapsed() < Duration::from_secs(1));
        assert!(!token.is_associated());
    }

    #[test]
    fn test_wait_returns_after_tick() {
        let token = CancelToken::new();
        let mutex = Mutex::new(0);
        let condvar = Arc::new(Condvar::new());
        let mut guard = mutex.lock();

        let result = interruptible_wait_for(&token, &condvar, &mut guard, Duration::from_millis(5));
        assert!(result.is_ok());
        assert!(!token.is_associated());
    }

    #[test]
    fn test_cancel_wakes_long_wait() {
        let token = CancelToken::new();
        let mutex = Arc::new(Mutex::new(()));
        let condvar = Arc::new(Condvar::new());

        let waiter = {
            let token = token.clone();
            let mutex = Arc::clone(&mutex);
            let condvar = Arc::clone(&condvar);
            thread::spawn(move || {
                let mut guard = mutex.lock();
                let start = Instant::now();
                let mut result = Ok(());
                while result.is_ok() && start.elapsed() < Duration::from_secs(10) {
                    result = interruptible_wait_for(
                        &token,
                        &condvar,
                        &mut guard,
                        Duration::from_secs(10),
                    );
                }
                (result, start.elapsed())
            })
        };

        thread::sleep(Duration::from_millis(50));
        token.cancel();

        let (result, elapsed) = waiter.join().unwrap();
        assert_eq!(result, Err(Interrupted));
        assert!(elapsed < Duration::from_secs(5), "waiter took {elapsed:?}");
    }

    #[test]
    fn test_wait_while_returns_when_condition_clears() {
        let token = CancelToken::new();
        let state = Arc::new(Mutex::new(false));
        let condvar = Arc::new(Condvar::new());

        let setter = {
            let state = Arc::clone(&state);
            let condvar = Arc::clone(&condvar);
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(20));
                *state.lock() = true;
                condvar.notify_all();
            })
        };

        let mut guard = state.lock();
        let result = interruptible_wait_while(&token, &condvar, &mut guard, |ready| !*ready);
        assert!(result.is_ok());
        assert!(*guard);
        drop(guard);

        setter.join().unwrap();
    }

    #[test]
    fn test_wait_while_with_false_condition_skips_checkpoint() {
        let token = CancelToken::new();
        token.cancel();

        let mutex = Mutex::new(1);
        let condvar = Arc::new(Condvar::new());
        let mut guard = mutex.lock();
        assert!(interruptible_wait_while(&token, &condvar, &mut guard, |v| *v == 0).is_ok());
    }
}
