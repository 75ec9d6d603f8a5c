//! Fetcher Client: subscribes to the ticker feed for a set of pairs and persists
//! every normalized tick through the selected storage backend. Ticks are fanned
//! out per pair, so a slow pair never holds back the others.
//!
//! Usage example (CLI):
//! ```bash
//! fetcher_client --pair BTC-USD --pair ETH-USD --storage sqlite --dsn ./ticks.db
//! fetcher_client --pairs-file ./pairs.txt --storage jsonl --dsn ./ticks.jsonl
//! ```
//!
//! The pairs file should contain pairs separated by commas, spaces, or new lines.
//! Press Ctrl+C to stop; queued ticks are written before the process exits.
#![warn(missing_docs)]
mod args;

use crate::args::Args;
use clap::Parser;
use crossbeam_channel::{Receiver, unbounded};
use fetcher_common::{FetcherError, Pair, PairParser, Result};
use fetcher_feed::{DeadLetter, FanoutRouter, StreamClient, WsConnector};
use log::{error, info, warn};
use std::fs::{File, OpenOptions};
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

fn main() -> Result<()> {
    init_logger();
    let args = Args::parse();

    let pairs = collect_pairs(&args)?;
    info!("Pairs: {:?}", pairs.iter().map(Pair::to_string).collect::<Vec<_>>());

    let storage = fetcher_storage::new(args.storage);
    storage.open(&args.dsn)?;
    info!("Storage {} opened at {}", args.storage, args.dsn);

    let mut client = StreamClient::new(WsConnector::default());
    if let Some(endpoint) = &args.endpoint {
        client = client.with_endpoint(endpoint.clone());
    }
    client.set_pairs(&pairs)?;
    if !args.channels.is_empty() {
        client.set_channels(args.channels.iter().cloned())?;
    }
    let ticks = client.ticks();

    {
        let stop = client.stop_handle();
        ctrlc::set_handler(move || {
            info!("Ctrl+C received. Shutting down client...");
            stop.stop(Some("interrupted"));
        })
        .expect("Error setting Ctrl+C handler");
    }

    let (dead_tx, dead_rx) = unbounded::<DeadLetter>();
    let dead_letter_writer = spawn_dead_letter_writer(dead_rx, args.dead_letter.as_deref())?;
    let router = FanoutRouter::new(Arc::clone(&storage), args.router_config())
        .with_dead_letters(dead_tx)
        .spawn(ticks)?;

    let served = client.connect().and_then(|()| {
        info!("Client is running. Press Ctrl+C to exit.");
        client.serve()
    });
    match &served {
        Ok(stats) => info!(
            "Feed closed: frames={} ticks={} rejected={} ignored={}",
            stats.frames, stats.ticks, stats.rejected, stats.ignored
        ),
        Err(e) => {
            error!("Feed session failed: {}", e);
            client.stop(Some("session failed"));
        }
    }

    match router.join() {
        Ok(report) => {
            info!(
                "Router finished: routed={} dropped={} delivered={}",
                report.routed,
                report.dropped,
                report.delivered()
            );
            for worker in &report.workers {
                info!(
                    "  {}: delivered={} dead_lettered={}",
                    worker.pair, worker.delivered, worker.dead_lettered
                );
            }
        }
        Err(_) => error!("Router thread panicked"),
    }
    if dead_letter_writer.join().is_err() {
        error!("Dead-letter writer panicked");
    }

    storage.close()?;
    info!("Storage closed");
    served.map(|_| ())
}

fn init_logger() {
    env_logger::Builder::new()
        .filter_level(log::LevelFilter::Info)
        .parse_default_env()
        .init();
}

/// Merges `--pair` values with the pairs file, keeping first-seen order.
fn collect_pairs(args: &Args) -> Result<Vec<Pair>> {
    let mut pairs = args.pairs.clone();
    if let Some(raw) = &args.pairs_file {
        let file_path = normalize_path(raw);
        if !is_file_exist(&file_path) {
            return Err(FetcherError::ParsePairsFile(format!(
                "file not found: {}",
                file_path.display()
            )));
        }
        let reader = BufReader::new(File::open(&file_path)?);
        for pair in Pair::parse_from_file(reader)? {
            if !pairs.contains(&pair) {
                pairs.push(pair);
            }
        }
    }
    Ok(pairs)
}

/// Drains dead letters until every router sender is gone. Letters are always
/// logged and, when `path` is set, appended to it as JSON lines.
fn spawn_dead_letter_writer(
    letters: Receiver<DeadLetter>,
    path: Option<&str>,
) -> Result<JoinHandle<()>> {
    let mut writer = match path {
        Some(raw) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(normalize_path(raw))?;
            Some(BufWriter::new(file))
        }
        None => None,
    };

    let handle = thread::Builder::new()
        .name("dead-letters".to_string())
        .spawn(move || {
            for letter in letters {
                warn!(
                    "Dead letter for {} at {}: {}",
                    letter.pair,
                    letter.tick.timestamp(),
                    letter.error
                );
                if let Some(out) = writer.as_mut() {
                    if let Err(e) = append_letter(out, &letter) {
                        error!("Failed to record dead letter: {}", e);
                    }
                }
            }
        })?;
    Ok(handle)
}

fn append_letter<W: Write>(out: &mut W, letter: &DeadLetter) -> Result<()> {
    serde_json::to_writer(&mut *out, letter)?;
    out.write_all(b"\n")?;
    out.flush()?;
    Ok(())
}

/// Normalize a CLI-provided path string by trimming whitespace and matching quotes.
fn normalize_path(raw: &str) -> PathBuf {
    let trimmed = raw.trim();
    let no_quotes = trimmed
        .strip_prefix('"')
        .and_then(|s| s.strip_suffix('"'))
        .unwrap_or(trimmed);
    PathBuf::from(no_quotes)
}

/// Returns `true` if the provided path exists and is a regular file.
fn is_file_exist(path: &Path) -> bool {
    path.exists() && path.is_file()
}
