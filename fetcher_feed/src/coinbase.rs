//! Coinbase websocket feed: endpoint, protocol constants and wire shapes.
//!
//! Wire messages (JSON):
//! - subscribe (sent once): `{"type":"subscribe","product_ids":["BTC-USD"],"channels":["ticker"]}`
//! - ticker (received): `{"type":"ticker","time":"...","product_id":"BTC-USD","best_bid":"1.0","best_ask":"1.1",...}`
//! - subscriptions / error / heartbeat (received): control messages.
use std::str::FromStr;

use chrono::{DateTime, Utc};
use fetcher_common::{FeedQuote, FetcherError, Pair, Result, Tick};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Public websocket endpoint of the feed.
pub const WS_ENDPOINT: &str = "wss://ws-feed.pro.coinbase.com";
/// Delimiter the feed uses inside product identifiers.
pub const PAIR_DELIMITER: char = '-';
/// Channel carrying best bid/ask updates.
pub const TICKER_CHANNEL: &str = "ticker";
/// Request type of the subscription message.
pub const SUBSCRIBE: &str = "subscribe";

/// Subscription request built once per session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscribeRequest {
    /// Always [`SUBSCRIBE`].
    #[serde(rename = "type")]
    pub request_type: String,
    /// Pairs rendered with [`PAIR_DELIMITER`].
    pub product_ids: Vec<String>,
    /// Channel names.
    pub channels: Vec<String>,
}

impl SubscribeRequest {
    /// Builds the request for `pairs` on `channels`.
    pub fn new(pairs: &[Pair], channels: &[String]) -> Self {
        SubscribeRequest {
            request_type: String::from(SUBSCRIBE),
            product_ids: pairs.iter().map(|p| p.render(PAIR_DELIMITER)).collect(),
            channels: channels.to_vec(),
        }
    }

    /// Encodes the request as a JSON text frame.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Quote as carried by a `ticker` frame. Extra fields are ignored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoinbaseTicker {
    /// Always `ticker` when encoded by [`CoinbaseTicker::from_tick`].
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub message_type: Option<String>,
    /// Exchange time.
    pub time: DateTime<Utc>,
    /// `PRIMARY-SECONDARY`.
    pub product_id: String,
    /// Best bid as a decimal string.
    pub best_bid: String,
    /// Best ask as a decimal string.
    pub best_ask: String,
}

impl CoinbaseTicker {
    /// Wire form of an already normalized tick.
    pub fn from_tick(tick: &Tick) -> Self {
        CoinbaseTicker {
            message_type: Some(String::from(TICKER_CHANNEL)),
            time: tick.timestamp(),
            product_id: tick.pair().render(PAIR_DELIMITER),
            best_bid: tick.best_bid().to_string(),
            best_ask: tick.best_ask().to_string(),
        }
    }
}

fn parse_price(field: &'static str, raw: &str) -> Result<Decimal> {
    Decimal::from_str(raw.trim()).map_err(|_| FetcherError::InvalidNumeric {
        field,
        value: raw.to_string(),
    })
}

impl FeedQuote for CoinbaseTicker {
    fn pair(&self) -> Result<Pair> {
        let mut legs = self.product_id.split(PAIR_DELIMITER);
        match (legs.next(), legs.next(), legs.next()) {
            (Some(primary), Some(secondary), None)
                if !primary.is_empty() && !secondary.is_empty() =>
            {
                Pair::new(primary, secondary)
            }
            _ => Err(FetcherError::InvalidProductId {
                product_id: self.product_id.clone(),
                delimiter: PAIR_DELIMITER,
            }),
        }
    }

    fn best_bid(&self) -> Result<Decimal> {
        parse_price("best_bid", &self.best_bid)
    }

    fn best_ask(&self) -> Result<Decimal> {
        parse_price("best_ask", &self.best_ask)
    }

    fn timestamp(&self) -> DateTime<Utc> {
        self.time
    }
}

/// Feed-side error report (`type = "error"`).
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ErrorMessage {
    /// Short description.
    #[serde(default)]
    pub message: String,
    /// Longer reason, when provided.
    #[serde(default)]
    pub reason: Option<String>,
}

/// Subscription confirmation (`type = "subscriptions"`).
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SubscriptionsMessage {
    /// Channels as echoed by the feed; their inner shape varies, so it is kept raw.
    #[serde(default)]
    pub channels: Vec<serde_json::Value>,
}

/// Encodes `tick` as a `ticker` frame payload.
pub fn encode_ticker(tick: &Tick) -> Result<String> {
    Ok(serde_json::to_string(&CoinbaseTicker::from_tick(tick))?)
}
