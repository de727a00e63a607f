//! Bounded blocking queue
//!
//! A multi-producer, multi-consumer FIFO built on a sentinel-terminated node
//! chain with split locking: producers contend only on the tail lock and
//! consumers only on the head lock, so a push and a pop can proceed in
//! parallel.
//!
//! # Lock Domains
//!
//! ```text
//! head lock                          tail lock
//! ┌──────────────────────┐           ┌──────────────────────────────┐
//! │ head pointer         │           │ tail pointer                 │
//! │ pop path             │           │ free slot count              │
//! │ waits on data_ready  │           │ push path                    │
//! └──────────────────────┘           │ waits on slot_free           │
//!                                    └──────────────────────────────┘
//! ```
//!
//! The only nesting is head lock, then tail lock, taken briefly by a consumer
//! to compare the head against the tail. The reverse order never occurs.
//!
//! # Backpressure
//!
//! The queue holds at most `capacity` elements. A push on a full queue blocks
//! until a pop releases a slot; each pop releases exactly one slot and wakes at
//! most one blocked producer.
//!
//! All blocking is a loop of waits bounded by a short tick, so the interruptible
//! variants observe cancellation promptly.

use std::fmt;
use std::ptr::NonNull;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Condvar, Mutex, MutexGuard};
use tracing::trace;

use crate::chain::{self, Node};
use crate::error::{Interrupted, PushInterrupted};
use crate::interrupt::{interruptible_wait_for, CancelToken, DEFAULT_WAIT_TICK};

/// State guarded by the tail lock.
struct Tail<T> {
    node: NonNull<Node<T>>,
    free_slots: usize,
}

/// A bounded, blocking, multi-producer multi-consumer FIFO queue.
///
/// # Example
///
/// ```
/// use strand_sync::BoundedQueue;
///
/// let queue = BoundedQueue::new(2);
/// queue.push("a");
/// queue.push("b");
///
/// assert_eq!(queue.pop(), "a");
/// assert_eq!(queue.try_pop(), Some("b"));
/// assert_eq!(queue.try_pop(), None);
/// ```
pub struct BoundedQueue<T> {
    /// Oldest unread node; owns the whole chain.
    head: Mutex<NonNull<Node<T>>>,
    tail: Mutex<Tail<T>>,
    /// Signalled after a push; waited on with the head lock.
    data_ready: Arc<Condvar>,
    /// Signalled after a pop; waited on with the tail lock.
    slot_free: Arc<Condvar>,
    capacity: usize,
    wait_tick: Duration,
}

// SAFETY: the raw node pointers are only dereferenced under the head or tail
// lock per the chain contract, and values of `T` move between threads only
// through push and pop.
unsafe impl<T: Send> Send for BoundedQueue<T> {}
// SAFETY: see above; shared access never hands out references to `T`.
unsafe impl<T: Send> Sync for BoundedQueue<T> {}

impl<T> BoundedQueue<T> {
    /// Create a queue holding at most `capacity` elements.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is 0.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self::with_wait_tick(capacity, DEFAULT_WAIT_TICK)
    }

    /// Create a queue whose blocking waits recheck every `wait_tick`.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is 0.
    #[must_use]
    pub fn with_wait_tick(capacity: usize, wait_tick: Duration) -> Self {
        assert!(capacity > 0, "queue capacity must be positive");

        let sentinel = Node::sentinel();
        Self {
            head: Mutex::new(sentinel),
            tail: Mutex::new(Tail {
                node: sentinel,
                free_slots: capacity,
            }),
            data_ready: Arc::new(Condvar::new()),
            slot_free: Arc::new(Condvar::new()),
            capacity,
            wait_tick,
        }
    }

    /// Maximum number of elements the queue holds.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of elements currently queued.
    ///
    /// Inaccurate in the presence of concurrent pushes and pops.
    #[must_use]
    pub fn len(&self) -> usize {
        self.capacity - self.tail.lock().free_slots
    }

    /// Check whether the queue is empty.
    ///
    /// Inaccurate in the presence of concurrent pushes and pops.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        let head = self.head.lock();
        self.is_drained(&head)
    }

    /// Push a value, blocking while the queue is full.
    pub fn push(&self, value: T) {
        let sentinel = Node::sentinel();
        let mut tail = self.tail.lock();
        if tail.free_slots == 0 {
            trace!(capacity = self.capacity, "push blocked on full queue");
        }
        while tail.free_slots == 0 {
            self.slot_free.wait_for(&mut tail, self.wait_tick);
        }
        self.link(tail, value, sentinel);
    }

    /// Push a value, blocking while the queue is full, unless interrupted.
    ///
    /// # Errors
    ///
    /// Returns the value inside [`PushInterrupted`] if `token` is cancelled
    /// before a slot becomes free. A push that finds a free slot immediately
    /// succeeds even on a cancelled token.
    pub fn push_interruptible(&self, value: T, token: &CancelToken) -> Result<(), PushInterrupted<T>> {
        let sentinel = Node::sentinel();
        let mut tail = self.tail.lock();
        while tail.free_slots == 0 {
            if let Err(Interrupted) =
                interruptible_wait_for(token, &self.slot_free, &mut tail, self.wait_tick)
            {
                drop(tail);
                // SAFETY: the sentinel was never linked into the chain.
                unsafe { chain::free(sentinel) };
                return Err(PushInterrupted(value));
            }
        }
        self.link(tail, value, sentinel);
        Ok(())
    }

    /// Pop the oldest value, blocking while the queue is empty.
    pub fn pop(&self) -> T {
        let mut head = self.head.lock();
        if self.is_drained(&head) {
            trace!("pop blocked on empty queue");
        }
        while self.is_drained(&head) {
            self.data_ready.wait_for(&mut head, self.wait_tick);
        }
        self.unlink(head)
    }

    /// Pop the oldest value into `out`, blocking while the queue is empty.
    pub fn pop_into(&self, out: &mut T) {
        *out = self.pop();
    }

    /// Pop the oldest value, blocking while the queue is empty, unless
    /// interrupted.
    ///
    /// # Errors
    ///
    /// Returns [`Interrupted`] if `token` is cancelled while the queue is
    /// empty. A value that is already available is returned even on a
    /// cancelled token.
    pub fn pop_interruptible(&self, token: &CancelToken) -> Result<T, Interrupted> {
        let mut head = self.head.lock();
        while self.is_drained(&head) {
            interruptible_wait_for(token, &self.data_ready, &mut head, self.wait_tick)?;
        }
        Ok(self.unlink(head))
    }

    /// Pop the oldest value without blocking.
    ///
    /// Returns `None` if the queue is empty.
    pub fn try_pop(&self) -> Option<T> {
        let head = self.head.lock();
        if self.is_drained(&head) {
            return None;
        }
        Some(self.unlink(head))
    }

    /// Pop the oldest value into `out` without blocking.
    ///
    /// Returns `false`, leaving `out` untouched, if the queue is empty.
    pub fn try_pop_into(&self, out: &mut T) -> bool {
        match self.try_pop() {
            Some(value) => {
                *out = value;
                true
            }
            None => false,
        }
    }

    /// Compare the head against the tail.
    ///
    /// Must be called with the head lock held; takes the tail lock briefly.
    fn is_drained(&self, head: &MutexGuard<'_, NonNull<Node<T>>>) -> bool {
        **head == self.tail.lock().node
    }

    /// Store `value` at the tail and publish it to consumers.
    fn link(&self, mut tail: MutexGuard<'_, Tail<T>>, value: T, sentinel: NonNull<Node<T>>) {
        // SAFETY: we hold the tail lock and `sentinel` is fresh. Consumers
        // compare against the tail under this lock, so they cannot reach the
        // node until the guard is released below.
        unsafe { chain::append(tail.node, value, sentinel) };
        tail.node = sentinel;
        tail.free_slots -= 1;
        drop(tail);

        // Never take the head lock here. A consumer that misses this
        // notification rechecks after at most one wait tick.
        self.data_ready.notify_one();
    }

    /// Detach the head node and release its slot.
    ///
    /// The caller must have observed that the queue is not drained.
    fn unlink(&self, mut head: MutexGuard<'_, NonNull<Node<T>>>) -> T {
        // SAFETY: we hold the head lock and the caller observed head != tail
        // under the tail lock.
        let (value, next) = unsafe { chain::detach(*head) };
        *head = next;
        drop(head);

        let mut tail = self.tail.lock();
        tail.free_slots += 1;
        self.slot_free.notify_one();
        value
    }
}

impl<T> Drop for BoundedQueue<T> {
    fn drop(&mut self) {
        // SAFETY: `&mut self` guarantees no other thread holds a pointer into
        // the chain, and the head owns every node through the tail.
        unsafe { chain::free(*self.head.get_mut()) };
    }
}

impl<T> fmt::Debug for BoundedQueue<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BoundedQueue")
            .field("capacity", &self.capacity)
            .field("len", &self.len())
            .finish()
    }
}
