//! One-shot result slot
//!
//! A single-producer, single-consumer slot that carries one value from a
//! worker to whoever is waiting for it. The value can be taken exactly once;
//! later attempts report [`SlotError::Consumed`].
//!
//! ```text
//! Empty --fill--> Ready --take--> Consumed
//!   |
//!   +--sender dropped--> Abandoned
//! ```

use std::mem;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use crate::error::SlotError;
use crate::interrupt::DEFAULT_WAIT_TICK;

enum SlotState<V> {
    Empty,
    Ready(V),
    Consumed,
    Abandoned,
}

struct SlotInner<V> {
    state: Mutex<SlotState<V>>,
    condvar: Condvar,
}

/// Create a connected sender/receiver pair.
pub fn oneshot<V>() -> (SlotSender<V>, SlotReceiver<V>) {
    let inner = Arc::new(SlotInner {
        state: Mutex::new(SlotState::Empty),
        condvar: Condvar::new(),
    });
    (
        SlotSender {
            inner: Arc::clone(&inner),
            filled: false,
        },
        SlotReceiver { inner },
    )
}

/// The filling half of a slot.
///
/// Dropping it without calling [`fill`](SlotSender::fill) marks the slot
/// abandoned and wakes the receiver.
pub struct SlotSender<V> {
    inner: Arc<SlotInner<V>>,
    filled: bool,
}

impl<V> SlotSender<V> {
    /// Store the value and wake the receiver.
    pub fn fill(mut self, value: V) {
        *self.inner.state.lock() = SlotState::Ready(value);
        self.filled = true;
        self.inner.condvar.notify_all();
    }
}

impl<V> Drop for SlotSender<V> {
    fn drop(&mut self) {
        if self.filled {
            return;
        }
        *self.inner.state.lock() = SlotState::Abandoned;
        self.inner.condvar.notify_all();
    }
}

/// The consuming half of a slot.
pub struct SlotReceiver<V> {
    inner: Arc<SlotInner<V>>,
}

impl<V> SlotReceiver<V> {
    /// Take the value if it is ready, without blocking.
    ///
    /// # Errors
    ///
    /// Returns [`SlotError::Consumed`] if the value was already taken and
    /// [`SlotError::Abandoned`] if the sender was dropped without a value.
    pub fn try_take(&self) -> Result<Option<V>, SlotError> {
        let mut state = self.inner.state.lock();
        Self::take_ready(&mut state)
    }

    /// Block until the value is ready and take it.
    ///
    /// # Errors
    ///
    /// Same as [`try_take`](Self::try_take).
    pub fn wait(&self) -> Result<V, SlotError> {
        let mut state = self.inner.state.lock();
        loop {
            if let Some(value) = Self::take_ready(&mut state)? {
                return Ok(value);
            }
            self.inner.condvar.wait_for(&mut state, DEFAULT_WAIT_TICK);
        }
    }

    /// Block for at most `timeout` and take the value if it became ready.
    ///
    /// Returns `Ok(None)` on timeout; the value stays in the slot.
    ///
    /// # Errors
    ///
    /// Same as [`try_take`](Self::try_take).
    pub fn wait_timeout(&self, timeout: Duration) -> Result<Option<V>, SlotError> {
        let deadline = Instant::now() + timeout;
        let mut state = self.inner.state.lock();
        loop {
            if let Some(value) = Self::take_ready(&mut state)? {
                return Ok(Some(value));
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Ok(None);
            }
            self.inner
                .condvar
                .wait_for(&mut state, remaining.min(DEFAULT_WAIT_TICK));
        }
    }

    /// Check whether a value is waiting to be taken.
    #[must_use]
    pub fn is_ready(&self) -> bool {
        matches!(*self.inner.state.lock(), SlotState::Ready(_))
    }

    fn take_ready(state: &mut SlotState<V>) -> Result<Option<V>, SlotError> {
        match *state {
            SlotState::Empty => Ok(None),
            SlotState::Consumed => Err(SlotError::Consumed),
            SlotState::Abandoned => Err(SlotError::Abandoned),
            SlotState::Ready(_) => match mem::replace(state, SlotState::Consumed) {
                SlotState::Ready(value) => Ok(Some(value)),
                _ => unreachable!("state was checked to be ready"),
            },
        }
    }
}
