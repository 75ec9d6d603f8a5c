//! Feed simulator: a local websocket server speaking the ticker feed protocol.
//!
//! It wires together two building blocks:
//!
//! - `TickGenerator`: produces tick events (`TickEvent`) for every product any
//!   session subscribed to and broadcasts them via `crossbeam_channel` senders.
//! - Per-session thread: performs the websocket handshake, reads the subscribe
//!   request, then filters ticks by the session's products and sends them as
//!   `ticker` frames. With `--noise-every N`, every N-th frame is malformed on
//!   purpose so clients can exercise their rejection paths.
//!
//! Usage example (CLI):
//! ```bash
//! feed_server --bind 127.0.0.1:8765 --interval-ms 200 --noise-every 10
//! fetcher_client --endpoint ws://127.0.0.1:8765 --pair BTC-USD --storage memory
//! ```
#![warn(missing_docs)]
mod args;
mod generator;
mod session;

use crate::args::Args;
use crate::generator::TickGenerator;
use clap::Parser;
use env_logger::{Builder, Env};
use fetcher_common::Result;
use log::{error, info};
use std::io::ErrorKind;
use std::net::TcpListener;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

/// Pause between two accept attempts while no connection is pending.
const ACCEPT_POLL: Duration = Duration::from_millis(50);

fn main() -> Result<()> {
    init_logger();
    let args = Args::parse();

    let shutdown = Arc::new(AtomicBool::new(false));
    {
        let shutdown = Arc::clone(&shutdown);
        ctrlc::set_handler(move || {
            info!("Ctrl+C received. Shutting down server...");
            shutdown.store(true, Ordering::SeqCst);
        })
        .expect("Error setting Ctrl+C handler");
    }

    let listener = TcpListener::bind(&args.bind)?;
    listener.set_nonblocking(true)?;
    info!("Feed simulator listening on ws://{}", listener.local_addr()?);

    let (subscription_tx, generator) =
        TickGenerator::start(Duration::from_millis(args.interval_ms), Arc::clone(&shutdown))?;

    while !shutdown.load(Ordering::SeqCst) {
        match listener.accept() {
            Ok((stream, peer)) => {
                stream.set_nonblocking(false)?;
                let subscription_tx = subscription_tx.clone();
                let noise_every = args.noise_every;
                let spawned = thread::Builder::new()
                    .name(format!("session-{peer}"))
                    .spawn(move || {
                        if let Err(e) = session::handle_client(stream, subscription_tx, noise_every)
                        {
                            error!("Session {} failed: {}", peer, e);
                        }
                    });
                if let Err(e) = spawned {
                    error!("Failed to start session for {}: {}", peer, e);
                }
            }
            Err(e) if e.kind() == ErrorKind::WouldBlock => thread::sleep(ACCEPT_POLL),
            Err(e) => {
                error!("Accept failed: {}", e);
                thread::sleep(ACCEPT_POLL);
            }
        }
    }

    if generator.join().is_err() {
        error!("Tick generator panicked");
    }
    info!("Feed simulator stopped");
    Ok(())
}

fn init_logger() {
    logger_builder(Env::default()).init();
}

/// `Info` by default; directives from `env` (normally `RUST_LOG`) override it.
fn logger_builder(env: Env<'_>) -> Builder {
    let mut builder = Builder::new();
    builder.filter_level(log::LevelFilter::Info).parse_env(env);
    builder
}
