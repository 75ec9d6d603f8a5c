//! Command-line arguments for the fetcher client.
//!
//! This module defines the CLI interface using `clap`. See `main` for end-to-end usage.
use std::time::Duration;

use clap::Parser;
use fetcher_common::Pair;
use fetcher_feed::{DeliveryPolicy, Overflow, RouterConfig};
use fetcher_storage::StorageKind;

/// Parsed command-line arguments.
#[derive(Debug, Parser)]
#[command(version, about, long_about = None)]
pub struct Args {
    /// Pair to subscribe to, e.g. `BTC-USD`. May be repeated.
    #[clap(long = "pair")]
    pub pairs: Vec<Pair>,

    /// Path to a text file with pairs to subscribe to.
    /// Pairs may be separated by commas, spaces, or new lines; `#` starts a comment line.
    #[clap(long)]
    pub pairs_file: Option<String>,

    /// Extra feed channel, e.g. `heartbeat`. The ticker channel is always requested.
    #[clap(long = "channel")]
    pub channels: Vec<String>,

    /// Storage backend.
    #[clap(long, value_enum, default_value_t = StorageKind::Sqlite)]
    pub storage: StorageKind,

    /// Storage descriptor: database or file path.
    #[clap(long, default_value = "ticks.db")]
    pub dsn: String,

    /// What to do when a pair's queue is still occupied.
    #[clap(long, value_enum, default_value_t = Overflow::Block)]
    pub overflow: Overflow,

    /// Write attempts per tick before it is dead-lettered.
    #[clap(long, default_value_t = 3)]
    pub delivery_attempts: u32,

    /// Base backoff between write attempts, in milliseconds.
    #[clap(long, default_value_t = 200)]
    pub delivery_backoff_ms: u64,

    /// JSON-lines file receiving dead-lettered ticks.
    #[clap(long)]
    pub dead_letter: Option<String>,

    /// Feed endpoint override, for a local `feed_server`.
    #[clap(long, hide = true)]
    pub endpoint: Option<String>,
}

impl Args {
    /// Router settings derived from the delivery flags.
    pub fn router_config(&self) -> RouterConfig {
        RouterConfig {
            overflow: self.overflow,
            delivery: DeliveryPolicy {
                max_attempts: self.delivery_attempts,
                backoff: Duration::from_millis(self.delivery_backoff_ms),
            },
            ..RouterConfig::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_repeated_pairs_and_defaults() {
        let args = Args::parse_from(["fetcher_client", "--pair", "btc-usd", "--pair", "ETH-BTC"]);
        let rendered: Vec<String> = args.pairs.iter().map(Pair::to_string).collect();
        assert_eq!(rendered, vec!["BTC-USD", "ETH-BTC"]);
        assert_eq!(args.storage, StorageKind::Sqlite);
        assert_eq!(args.dsn, "ticks.db");
        assert_eq!(args.router_config().overflow, Overflow::Block);
        assert_eq!(args.router_config().delivery.max_attempts, 3);
    }

    #[test]
    fn rejects_invalid_pair() {
        assert!(Args::try_parse_from(["fetcher_client", "--pair", "BTCUSD"]).is_err());
    }

    #[test]
    fn parses_delivery_flags() {
        let args = Args::try_parse_from([
            "fetcher_client",
            "--pairs-file",
            "pairs.txt",
            "--storage",
            "jsonl",
            "--overflow",
            "drop",
            "--delivery-attempts",
            "5",
            "--delivery-backoff-ms",
            "10",
        ])
        .unwrap();
        let config = args.router_config();
        assert_eq!(args.storage, StorageKind::Jsonl);
        assert_eq!(config.overflow, Overflow::DropNewest);
        assert_eq!(config.delivery.max_attempts, 5);
        assert_eq!(config.delivery.backoff, Duration::from_millis(10));
    }
}
