//! strand-demo - Demonstrations for strand-sync
//!
//! Two scenarios:
//!
//! - `queue`: producers and consumers on managed threads exchange values
//!   through a bounded queue; the run fails unless every value arrives once.
//! - `interrupt`: a managed thread parks in a cancellable wait loop, is
//!   interrupted, and the joined outcome is reported.

mod config;

use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{ensure, Context, Result};
use clap::{Parser, Subcommand};
use parking_lot::{Condvar, Mutex};
use strand_sync::{
    interruptible_wait_for, BoundedQueue, ManagedThread, ThreadConfig, ThreadResult,
};
use tracing::{debug, info, warn, Level};
use tracing_subscriber::FmtSubscriber;

use crate::config::{DemoConfig, InterruptDemo, QueueDemo};

/// Bounded queue and managed thread demonstrations
#[derive(Parser, Debug)]
#[command(name = "strand-demo")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// The demo to run
    #[command(subcommand)]
    command: Commands,

    /// TOML configuration file
    #[arg(short, long, value_name = "FILE", global = true)]
    config: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

/// Subcommands
#[derive(Subcommand, Debug)]
enum Commands {
    /// Run producers and consumers over a bounded queue
    Queue {
        /// Queue capacity
        #[arg(long)]
        capacity: Option<usize>,

        /// Number of producer threads
        #[arg(long)]
        producers: Option<usize>,

        /// Number of consumer threads
        #[arg(long)]
        consumers: Option<usize>,

        /// Values pushed by each producer
        #[arg(long)]
        items: Option<u64>,

        /// Wait tick in milliseconds
        #[arg(long)]
        wait_tick_ms: Option<u64>,
    },

    /// Interrupt a managed thread blocked in a cancellable wait
    Interrupt {
        /// Delay before interrupting, in milliseconds
        #[arg(long)]
        delay_ms: Option<u64>,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_level = if cli.verbose { Level::DEBUG } else { Level::INFO };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .with_thread_names(true)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let mut config = DemoConfig::load(cli.config.as_deref())?;

    match cli.command {
        Commands::Queue {
            capacity,
            producers,
            consumers,
            items,
            wait_tick_ms,
        } => {
            let demo = &mut config.queue;
            demo.capacity = capacity.unwrap_or(demo.capacity);
            demo.producers = producers.unwrap_or(demo.producers);
            demo.consumers = consumers.unwrap_or(demo.consumers);
            demo.items_per_producer = items.unwrap_or(demo.items_per_producer);
            demo.wait_tick_ms = wait_tick_ms.unwrap_or(demo.wait_tick_ms);
            run_queue_demo(&config.queue)
        }
        Commands::Interrupt { delay_ms } => {
            let demo = &mut config.interrupt;
            demo.interrupt_delay_ms = delay_ms.unwrap_or(demo.interrupt_delay_ms);
            run_interrupt_demo(&config.interrupt, config.worker)
        }
    }
}

/// Move `producers * items_per_producer` values through the queue and check
/// that each one was consumed exactly once.
fn run_queue_demo(demo: &QueueDemo) -> Result<()> {
    ensure!(demo.capacity > 0, "queue capacity must be positive");
    ensure!(demo.consumers > 0, "at least one consumer is required");

    let total = total_items(demo.producers, demo.items_per_producer)?;
    info!(
        capacity = demo.capacity,
        producers = demo.producers,
        consumers = demo.consumers,
        total,
        "starting queue demo"
    );

    let queue = Arc::new(BoundedQueue::<u64>::with_wait_tick(demo.capacity, demo.wait_tick()));
    let remaining = Arc::new(AtomicU64::new(total));
    let start = Instant::now();

    let mut consumers = Vec::with_capacity(demo.consumers);
    for i in 0..demo.consumers {
        let queue = Arc::clone(&queue);
        let remaining = Arc::clone(&remaining);
        let consumer = ManagedThread::new(move |token| {
            let (mut count, mut sum) = (0u64, 0u128);
            while remaining
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
            {
                sum += u128::from(queue.pop_interruptible(token)?);
                count += 1;
            }
            Ok((count, sum))
        })
        .with_config(ThreadConfig::default().with_name(format!("consumer-{i}")));
        consumers.push(consumer);
    }

    let mut producers = Vec::with_capacity(demo.producers);
    for p in 0..demo.producers as u64 {
        let queue = Arc::clone(&queue);
        let items = demo.items_per_producer;
        let producer = ManagedThread::new(move |token| {
            for i in 0..items {
                queue.push_interruptible(p * items + i, token)?;
            }
            Ok(())
        })
        .with_config(ThreadConfig::default().with_name(format!("producer-{p}")));
        producers.push(producer);
    }

    // Consumers block on the queue until interrupted, so any early exit must
    // interrupt them before the handles are dropped.
    if let Err(err) = start_all(&mut consumers).and_then(|()| start_all(&mut producers)) {
        consumers.iter().for_each(ManagedThread::interrupt);
        producers.iter().for_each(ManagedThread::interrupt);
        return Err(err).context("failed to start workers");
    }

    for mut producer in producers {
        if let Err(err) = producer.join_thread() {
            consumers.iter().for_each(ManagedThread::interrupt);
            return Err(err).context("producer failed");
        }
    }

    let (mut count, mut sum) = (0u64, 0u128);
    for mut consumer in consumers {
        let id = consumer.id();
        let (consumed, subtotal) = consumer.join_thread().context("consumer failed")?;
        debug!(thread = %id, consumed, "consumer finished");
        count += consumed;
        sum += subtotal;
    }

    let expected_sum = sum_below(total);
    ensure!(count == total, "consumed {count} values, expected {total}");
    ensure!(sum == expected_sum, "value sum {sum} does not match {expected_sum}");
    ensure!(queue.is_empty(), "queue not drained");

    info!(count, elapsed = ?start.elapsed(), "every value consumed exactly once");
    Ok(())
}

/// Number of values pushed in total; fails instead of overflowing.
fn total_items(producers: usize, items_per_producer: u64) -> Result<u64> {
    u64::try_from(producers)
        .ok()
        .and_then(|producers| producers.checked_mul(items_per_producer))
        .with_context(|| {
            format!("{producers} producers x {items_per_producer} items overflows a u64 count")
        })
}

/// Sum of `0..total`, the values the producers push between them.
fn sum_below(total: u64) -> u128 {
    let total = u128::from(total);
    total * total.saturating_sub(1) / 2
}

fn start_all<T: Send + 'static>(workers: &mut [ManagedThread<T>]) -> ThreadResult<()> {
    workers.iter_mut().try_for_each(ManagedThread::run)
}

/// Park a worker in a cancellable wait that nothing else signals, then
/// interrupt it.
fn run_interrupt_demo(demo: &InterruptDemo, worker_config: ThreadConfig) -> Result<()> {
    let tick = Duration::from_millis(demo.wait_tick_ms);
    let wakeups = Arc::new(AtomicU64::new(0));
    let worker_wakeups = Arc::clone(&wakeups);

    let mut worker: ManagedThread = ManagedThread::new(move |token| {
        let mutex = Mutex::new(());
        let condvar = Arc::new(Condvar::new());
        let mut guard = mutex.lock();
        info!("worker waiting for interruption");
        loop {
            interruptible_wait_for(token, &condvar, &mut guard, tick)?;
            worker_wakeups.fetch_add(1, Ordering::Relaxed);
        }
    })
    .with_config(worker_config)
    .with_error_handler(|err| info!(error = %err, "worker error handler invoked"));

    worker.run()?;
    thread::sleep(Duration::from_millis(demo.interrupt_delay_ms));

    let interrupted_at = Instant::now();
    worker.interrupt();

    match worker.join_thread() {
        Err(err) if err.is_interrupted() => {
            info!(
                latency = ?interrupted_at.elapsed(),
                wakeups = wakeups.load(Ordering::Relaxed),
                "worker stopped on interrupt"
            );
            Ok(())
        }
        Err(err) => Err(err).context("worker failed"),
        Ok(()) => {
            warn!("worker returned without observing the interrupt");
            Ok(())
        }
    }
}
