use clap::Parser;

/// Command-line arguments of the feed simulator.
#[derive(Debug, Parser)]
#[command(version, about, long_about = None)]
pub struct Args {
    /// Address the websocket listener binds to.
    #[clap(long, default_value = "127.0.0.1:8765")]
    pub bind: String,

    /// Milliseconds between two generated rounds of ticks.
    #[clap(long, default_value_t = 500)]
    pub interval_ms: u64,

    /// Replace every N-th outgoing ticker frame with a malformed one. `0` disables.
    #[clap(long, default_value_t = 0)]
    pub noise_every: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let args = Args::parse_from(["feed_server"]);
        assert_eq!(args.bind, "127.0.0.1:8765");
        assert_eq!(args.interval_ms, 500);
        assert_eq!(args.noise_every, 0);
    }
}
