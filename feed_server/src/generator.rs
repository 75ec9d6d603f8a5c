//! Tick stream generator and event broadcasting.
//!
//! The `TickGenerator` runs a background thread that synthesizes best bid/ask
//! ticks and broadcasts them to every registered session using
//! `crossbeam_channel`. Sessions register by sending a [`Subscription`]; the set
//! of simulated products is the union of everything subscribed so far, so all
//! sessions observe the same price path for a shared pair.
//!
//! Event model:
//! - `TickEvent::Tick(Tick)`: one tick for one pair.
//! - `TickEvent::Shutdown`: consumers should terminate.
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use chrono::Utc;
use crossbeam_channel::{Receiver, Sender, unbounded};
use fetcher_common::{FetcherError, Pair, Result, Tick};
use log::{debug, info};
use rand::Rng;
use rust_decimal::Decimal;

/// Mid price a product starts from when first subscribed.
pub const INITIAL_MID: f64 = 100.0;
/// Half of the relative bid/ask spread.
const HALF_SPREAD: f64 = 0.0005;
/// Lowest mid price the walk may reach.
const MIN_MID: f64 = 1.0;

/// Message sent by the generator to its sessions.
#[derive(Debug, Clone)]
pub enum TickEvent {
    /// New tick for one pair.
    Tick(Tick),
    /// Global shutdown notification.
    Shutdown,
}

/// Registration of one session.
pub struct Subscription {
    /// Pairs the session asked for; added to the simulated universe.
    pub pairs: Vec<Pair>,
    /// Where every generated event is pushed.
    pub events: Sender<TickEvent>,
}

/// Background market generator.
pub struct TickGenerator {
    interval: Duration,
    products: Vec<(Pair, f64)>,
    sessions: Vec<Sender<TickEvent>>,
}

impl TickGenerator {
    /// Starts the generator thread.
    ///
    /// Returns the registration channel and the thread handle. The thread
    /// broadcasts `TickEvent::Shutdown` and exits once `shutdown` is raised.
    pub fn start(
        interval: Duration,
        shutdown: Arc<AtomicBool>,
    ) -> Result<(Sender<Subscription>, JoinHandle<()>)> {
        let (subscribe_tx, subscribe_rx) = unbounded::<Subscription>();
        let mut generator = TickGenerator {
            interval,
            products: Vec::new(),
            sessions: Vec::new(),
        };
        let handle = thread::Builder::new()
            .name(String::from("tick-generator"))
            .spawn(move || generator.run(subscribe_rx, shutdown))
            .map_err(FetcherError::Io)?;
        Ok((subscribe_tx, handle))
    }

    fn run(&mut self, subscribe_rx: Receiver<Subscription>, shutdown: Arc<AtomicBool>) {
        info!("Tick generator started (interval {:?})", self.interval);
        while !shutdown.load(Ordering::SeqCst) {
            while let Ok(subscription) = subscribe_rx.try_recv() {
                self.register(subscription);
            }
            self.round();
            thread::sleep(self.interval);
        }
        info!("Tick generator stopping; notifying {} sessions", self.sessions.len());
        for session in &self.sessions {
            let _ = session.send(TickEvent::Shutdown);
        }
    }

    fn register(&mut self, subscription: Subscription) {
        for pair in subscription.pairs {
            if !self.products.iter().any(|(known, _)| *known == pair) {
                debug!("Generator: new product {}", pair);
                self.products.push((pair, INITIAL_MID));
            }
        }
        self.sessions.push(subscription.events);
        info!("Generator: session added. Total sessions: {}", self.sessions.len());
    }

    fn round(&mut self) {
        let mut rng = rand::rng();
        for (pair, mid) in &mut self.products {
            *mid = next_mid(&mut rng, *mid);
            let tick = match quote_tick(pair, *mid) {
                Ok(tick) => tick,
                Err(e) => {
                    debug!("Generator: skipped {}: {}", pair, e);
                    continue;
                }
            };
            let event = TickEvent::Tick(tick);
            self.sessions.retain(|session| session.send(event.clone()).is_ok());
        }
    }
}

/// Next mid price: a uniform step within ±1% of `mid`, floored at [`MIN_MID`].
pub fn next_mid<R: Rng>(rng: &mut R, mid: f64) -> f64 {
    let change: f64 = rng.random_range(-0.01..0.01);
    (mid * (1.0 + change)).max(MIN_MID)
}

/// Builds a tick around `mid` with cent precision and an ask strictly above the bid.
pub fn quote_tick(pair: &Pair, mid: f64) -> Result<Tick> {
    let bid = to_cents(mid * (1.0 - HALF_SPREAD));
    let ask = to_cents(mid * (1.0 + HALF_SPREAD)).max(bid + Decimal::new(1, 2));
    Tick::new(Utc::now(), pair.clone(), bid, ask)
}

fn to_cents(value: f64) -> Decimal {
    Decimal::new((value * 100.0).round() as i64, 2)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn btc_usd() -> Pair {
        Pair::new("btc", "usd").unwrap()
    }

    #[test]
    fn quote_tick_keeps_ask_above_bid() {
        let tick = quote_tick(&btc_usd(), 1.0).unwrap();
        assert!(tick.best_bid() > Decimal::ZERO);
        assert!(tick.best_ask() > tick.best_bid());
        assert_eq!(tick.best_bid().scale(), 2);
    }

    #[test]
    fn next_mid_stays_within_one_percent() {
        let mut rng = rand::rng();
        for _ in 0..100 {
            let mid = next_mid(&mut rng, 100.0);
            assert!((99.0..=101.0).contains(&mid));
        }
        assert_eq!(next_mid(&mut rng, 0.5), MIN_MID);
    }

    #[test]
    fn broadcasts_subscribed_products_then_shutdown() {
        let shutdown = Arc::new(AtomicBool::new(false));
        let (subscribe_tx, handle) =
            TickGenerator::start(Duration::from_millis(5), Arc::clone(&shutdown)).unwrap();

        let (events_tx, events_rx) = unbounded();
        subscribe_tx
            .send(Subscription {
                pairs: vec![btc_usd()],
                events: events_tx,
            })
            .unwrap();

        match events_rx.recv_timeout(Duration::from_secs(5)).unwrap() {
            TickEvent::Tick(tick) => assert_eq!(tick.pair(), &btc_usd()),
            TickEvent::Shutdown => panic!("unexpected shutdown"),
        }

        shutdown.store(true, Ordering::SeqCst);
        handle.join().unwrap();
        let saw_shutdown = events_rx
            .try_iter()
            .any(|event| matches!(event, TickEvent::Shutdown));
        assert!(saw_shutdown);
    }
}
