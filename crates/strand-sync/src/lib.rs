//! Blocking queues and cooperatively cancellable threads.
//!
//! This crate provides two closely related building blocks for thread-based
//! concurrency:
//!
//! - **Bounded blocking queue** - a multi-producer, multi-consumer FIFO with
//!   split head/tail locking and capacity-based backpressure
//! - **Managed threads** - an owned worker thread that captures task failures
//!   and panics, rethrows them on join, and can be interrupted cooperatively
//!
//! Cancellation is strictly cooperative. A [`CancelToken`] is observed only at
//! checkpoints: explicit [`CancelToken::checkpoint`] calls and every
//! interruptible wait.
//!
//! # Modules
//!
//! - `chain` - Sentinel-terminated node chain backing the queue
//! - `queue` - Bounded blocking queue
//! - `interrupt` - Cancellation tokens and interruptible waits
//! - `slot` - One-shot result slot
//! - `thread` - Managed threads
//! - `config` - Thread configuration
//! - `error` - Error types
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use strand_sync::{BoundedQueue, ManagedThread};
//!
//! let queue = Arc::new(BoundedQueue::<u32>::new(4));
//!
//! let consumer_queue = Arc::clone(&queue);
//! let mut consumer = ManagedThread::spawn(move |token| {
//!     let mut sum = 0;
//!     for _ in 0..10 {
//!         sum += consumer_queue.pop_interruptible(token)?;
//!     }
//!     Ok(sum)
//! })
//! .unwrap();
//!
//! for i in 0..10 {
//!     queue.push(i);
//! }
//!
//! assert_eq!(consumer.join_thread().unwrap(), 45);
//! ```

#![warn(missing_docs)]
#![deny(unsafe_op_in_unsafe_fn)]

mod chain;
pub mod config;
pub mod error;
pub mod interrupt;
pub mod queue;
pub mod slot;
pub mod thread;

pub use config::ThreadConfig;
pub use error::{Interrupted, PushInterrupted, SlotError, TaskError, ThreadError, ThreadResult};
pub use interrupt::{
    interruptible_wait, interruptible_wait_for, interruptible_wait_while, CancelToken,
    DEFAULT_WAIT_TICK,
};
pub use queue::BoundedQueue;
pub use thread::{ManagedThread, ThreadId, ThreadState};
