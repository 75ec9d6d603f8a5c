//! Fan-out of the tick stream into per-pair delivery queues.
//!
//! The router is the sole owner of its pair registry: it reads the client's
//! tick stream on one thread and, on the first tick of a pair, creates a
//! single-slot queue plus a delivery worker thread for it. Every later tick of
//! that pair goes to the same queue, so per-pair order is the receipt order.
//! Nothing is ordered across pairs.
//!
//! A worker drains its queue into the shared [`TickStorage`]. A failed write is
//! retried with linear backoff and, once attempts run out, handed to the
//! dead-letter channel (or logged and dropped when none is attached). The
//! worker keeps going either way, so one pair's storage trouble stays with
//! that pair.
//!
//! When the upstream stream closes the router closes every queue and joins
//! every worker before returning its [`RouterReport`].
//!
//! The registry grows with every distinct pair the stream carries and is never
//! pruned; its size is bounded only by the pair set the upstream client
//! subscribed to.
use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use clap::ValueEnum;
use crossbeam_channel::{Receiver, Sender, TrySendError, bounded};
use fetcher_common::{FetcherError, PAIR_DEFAULT_DELIMITER, Result, Tick, TickStorage};
use log::{error, info, warn};
use serde::Serialize;
use strum_macros::{Display, EnumString};

/// Slots per pair queue: at most one tick waits while the worker writes another.
pub const PAIR_QUEUE_CAPACITY: usize = 1;

/// What the router does when a pair's queue slot is still occupied.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum, Display, EnumString)]
#[strum(ascii_case_insensitive)]
pub enum Overflow {
    /// Wait for the worker to drain the slot. Nothing is lost, but pairs are
    /// not isolated: while one pair's slot stays full the router thread is
    /// parked, so every other pair and eventually the read loop wait with it.
    #[default]
    #[strum(serialize = "block")]
    #[value(name = "block")]
    Block,
    /// Drop the incoming tick and keep routing. Keeps pairs isolated.
    #[strum(serialize = "drop")]
    #[value(name = "drop")]
    DropNewest,
}

/// Retry behaviour of delivery workers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeliveryPolicy {
    /// Write attempts per tick, including the first one.
    pub max_attempts: u32,
    /// Base delay; attempt `n` waits `n * backoff` before retrying.
    pub backoff: Duration,
}

impl Default for DeliveryPolicy {
    fn default() -> Self {
        DeliveryPolicy {
            max_attempts: 3,
            backoff: Duration::from_millis(200),
        }
    }
}

/// Router settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RouterConfig {
    /// Queue overflow behaviour.
    pub overflow: Overflow,
    /// Worker retry behaviour.
    pub delivery: DeliveryPolicy,
    /// Delimiter used to render pair names as registry keys.
    pub delimiter: char,
}

impl Default for RouterConfig {
    fn default() -> Self {
        RouterConfig {
            overflow: Overflow::default(),
            delivery: DeliveryPolicy::default(),
            delimiter: PAIR_DEFAULT_DELIMITER,
        }
    }
}

/// A tick the storage refused after every attempt.
#[derive(Debug, Clone, Serialize)]
pub struct DeadLetter {
    /// Rendered pair name of the worker that gave up.
    pub pair: String,
    /// The undelivered tick.
    pub tick: Tick,
    /// Last storage error.
    pub error: String,
}

/// Counters of one delivery worker.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WorkerReport {
    /// Rendered pair name.
    pub pair: String,
    /// Ticks written to storage.
    pub delivered: u64,
    /// Ticks given up on.
    pub dead_lettered: u64,
}

/// Summary returned once the router and all of its workers are done.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RouterReport {
    /// Ticks enqueued to a worker.
    pub routed: u64,
    /// Ticks dropped on overflow.
    pub dropped: u64,
    /// One entry per worker, sorted by pair name.
    pub workers: Vec<WorkerReport>,
}

impl RouterReport {
    /// Ticks written to storage by all workers.
    pub fn delivered(&self) -> u64 {
        self.workers.iter().map(|w| w.delivered).sum()
    }

    /// Report of the worker for `pair`, if one was created.
    pub fn worker(&self, pair: &str) -> Option<&WorkerReport> {
        self.workers.iter().find(|w| w.pair == pair)
    }
}

struct Route {
    queue: Sender<Tick>,
    worker: JoinHandle<WorkerReport>,
}

/// Partitions one tick stream into independent per-pair delivery paths.
pub struct FanoutRouter {
    sink: Arc<dyn TickStorage>,
    config: RouterConfig,
    dead_letters: Option<Sender<DeadLetter>>,
    routes: HashMap<String, Route>,
    routed: u64,
    dropped: u64,
}

impl FanoutRouter {
    /// Router delivering into `sink`.
    pub fn new(sink: Arc<dyn TickStorage>, config: RouterConfig) -> Self {
        FanoutRouter {
            sink,
            config,
            dead_letters: None,
            routes: HashMap::new(),
            routed: 0,
            dropped: 0,
        }
    }

    /// Sends ticks that exhausted their write attempts to `dead_letters`.
    pub fn with_dead_letters(mut self, dead_letters: Sender<DeadLetter>) -> Self {
        self.dead_letters = Some(dead_letters);
        self
    }

    /// Pair names that currently have a worker, sorted.
    pub fn pairs(&self) -> Vec<String> {
        let mut pairs: Vec<String> = self.routes.keys().cloned().collect();
        pairs.sort();
        pairs
    }

    /// Enqueues `tick` on its pair's queue, creating queue and worker on first sight.
    pub fn route(&mut self, tick: Tick) -> Result<()> {
        let name = tick.pair().render(self.config.delimiter);
        let route = match self.routes.entry(name) {
            Entry::Occupied(entry) => entry.into_mut(),
            Entry::Vacant(entry) => {
                let route = spawn_worker(
                    entry.key(),
                    Arc::clone(&self.sink),
                    self.config.delivery,
                    self.dead_letters.clone(),
                )?;
                info!("Delivery worker for {} started", entry.key());
                entry.insert(route)
            }
        };

        match self.config.overflow {
            Overflow::Block => route.queue.send(tick).map_err(|e| {
                FetcherError::ChannelSend(format!("delivery worker for {} is gone", e.0.pair()))
            })?,
            Overflow::DropNewest => match route.queue.try_send(tick) {
                Ok(()) => {}
                Err(TrySendError::Full(tick)) => {
                    self.dropped += 1;
                    warn!(
                        "Queue for {} is full, dropping tick at {}",
                        tick.pair(),
                        tick.timestamp()
                    );
                    return Ok(());
                }
                Err(TrySendError::Disconnected(tick)) => {
                    return Err(FetcherError::ChannelSend(format!(
                        "delivery worker for {} is gone",
                        tick.pair()
                    )));
                }
            },
        }
        self.routed += 1;
        Ok(())
    }

    /// Routes every tick until `ticks` closes, then shuts down.
    pub fn run(mut self, ticks: Receiver<Tick>) -> RouterReport {
        for tick in ticks.iter() {
            if let Err(e) = self.route(tick) {
                error!("Routing failed: {}", e);
            }
        }
        info!("Tick stream closed, stopping {} delivery workers", self.routes.len());
        self.shutdown()
    }

    /// Runs the router on its own thread.
    pub fn spawn(self, ticks: Receiver<Tick>) -> Result<JoinHandle<RouterReport>> {
        thread::Builder::new()
            .name(String::from("fanout-router"))
            .spawn(move || self.run(ticks))
            .map_err(FetcherError::Io)
    }

    /// Closes every queue and joins every worker.
    pub fn shutdown(self) -> RouterReport {
        let workers: Vec<(String, JoinHandle<WorkerReport>)> = self
            .routes
            .into_iter()
            .map(|(name, route)| {
                drop(route.queue);
                (name, route.worker)
            })
            .collect();

        let mut reports = Vec::with_capacity(workers.len());
        for (name, worker) in workers {
            match worker.join() {
                Ok(report) => reports.push(report),
                Err(_) => error!("Delivery worker for {} panicked", name),
            }
        }
        reports.sort_by(|a, b| a.pair.cmp(&b.pair));

        RouterReport {
            routed: self.routed,
            dropped: self.dropped,
            workers: reports,
        }
    }
}

fn spawn_worker(
    name: &str,
    sink: Arc<dyn TickStorage>,
    policy: DeliveryPolicy,
    dead_letters: Option<Sender<DeadLetter>>,
) -> Result<Route> {
    let (queue, queue_rx) = bounded::<Tick>(PAIR_QUEUE_CAPACITY);
    let pair = name.to_string();
    let worker = thread::Builder::new()
        .name(format!("deliver-{}", name))
        .spawn(move || deliver_loop(pair, queue_rx, sink, policy, dead_letters))
        .map_err(FetcherError::Io)?;
    Ok(Route { queue, worker })
}

fn deliver_loop(
    pair: String,
    queue: Receiver<Tick>,
    sink: Arc<dyn TickStorage>,
    policy: DeliveryPolicy,
    dead_letters: Option<Sender<DeadLetter>>,
) -> WorkerReport {
    let mut report = WorkerReport {
        pair,
        ..WorkerReport::default()
    };

    for tick in queue.iter() {
        match write_with_retry(sink.as_ref(), &tick, policy, &report.pair) {
            Ok(()) => report.delivered += 1,
            Err(e) => {
                report.dead_lettered += 1;
                error!(
                    "Giving up on {} tick at {}: {}",
                    report.pair,
                    tick.timestamp(),
                    e
                );
                if let Some(dead_letters) = &dead_letters {
                    let letter = DeadLetter {
                        pair: report.pair.clone(),
                        tick,
                        error: e.to_string(),
                    };
                    if dead_letters.send(letter).is_err() {
                        warn!("Dead-letter channel closed, tick for {} lost", report.pair);
                    }
                }
            }
        }
    }

    info!(
        "Delivery worker for {} finished: {} delivered, {} dead-lettered",
        report.pair, report.delivered, report.dead_lettered
    );
    report
}

fn write_with_retry(
    sink: &dyn TickStorage,
    tick: &Tick,
    policy: DeliveryPolicy,
    pair: &str,
) -> Result<()> {
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 1;
    loop {
        match sink.write_tick(tick) {
            Ok(()) => return Ok(()),
            Err(e) if attempt < max_attempts => {
                warn!(
                    "Write for {} failed (attempt {}/{}): {}",
                    pair, attempt, max_attempts, e
                );
                thread::sleep(retry_delay(policy.backoff, attempt));
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

/// Delay before retrying after failed attempt `attempt`; saturates instead of overflowing.
fn retry_delay(backoff: Duration, attempt: u32) -> Duration {
    backoff.saturating_mul(attempt)
}
