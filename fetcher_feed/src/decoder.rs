//! Raw frame decoding.
//!
//! Each inbound frame is one JSON message. Decoding is two-staged:
//! [`classify`] reads only the `type` discriminator, which is the dispatch key
//! of the read loop; type-specific decoders such as [`decode_quote`] run only
//! after classification succeeded.
//!
//! Quote decoding separates bad wire data (`MalformedQuote`,
//! `InvalidProductId`, `InvalidNumeric`) from bad business data
//! (`NormalizationFailed`, e.g. a one-letter currency or a zero price).
use fetcher_common::{FetcherError, Result, Tick};
use serde_json::Value;

use crate::coinbase::{CoinbaseTicker, ErrorMessage, SubscriptionsMessage, TICKER_CHANNEL};

/// Type of the subscription confirmation message.
pub const SUBSCRIPTIONS: &str = "subscriptions";
/// Type of feed-side error reports.
pub const ERROR: &str = "error";
/// Type of heartbeat messages.
pub const HEARTBEAT: &str = "heartbeat";

/// A decoded inbound frame.
#[derive(Debug, Clone)]
pub enum FeedMessage {
    /// Normalized quote from the ticker channel.
    Ticker(Tick),
    /// The feed confirmed the subscription.
    Subscriptions(SubscriptionsMessage),
    /// The feed reported an error.
    Error(ErrorMessage),
    /// Keep-alive.
    Heartbeat,
    /// Any other message type; ignored by the read loop.
    Other(String),
}

/// Extracts the message type discriminator.
pub fn classify(payload: &[u8]) -> Result<String> {
    let envelope: Value = serde_json::from_slice(payload)
        .map_err(|e| FetcherError::MalformedEnvelope(e.to_string()))?;
    let Value::Object(fields) = envelope else {
        return Err(FetcherError::MalformedEnvelope(String::from(
            "message is not a JSON object",
        )));
    };
    match fields.get("type") {
        None | Some(Value::Null) => Err(FetcherError::MissingType),
        Some(Value::String(kind)) if kind.is_empty() => Err(FetcherError::MissingType),
        Some(Value::String(kind)) => Ok(kind.clone()),
        Some(other) => Err(FetcherError::MalformedEnvelope(format!(
            "type is not a string: {other}"
        ))),
    }
}

/// Decodes a `ticker` payload into a normalized [`Tick`].
pub fn decode_quote(payload: &[u8]) -> Result<Tick> {
    let quote: CoinbaseTicker = serde_json::from_slice(payload)
        .map_err(|e| FetcherError::MalformedQuote(e.to_string()))?;
    Tick::from_quote(&quote).map_err(|e| match e {
        FetcherError::InvalidProductId { .. } | FetcherError::InvalidNumeric { .. } => e,
        other => FetcherError::NormalizationFailed(Box::new(other)),
    })
}

/// Classifies `payload` and decodes the message types the client understands.
pub fn decode(payload: &[u8]) -> Result<FeedMessage> {
    let kind = classify(payload)?;
    match kind.as_str() {
        TICKER_CHANNEL => decode_quote(payload).map(FeedMessage::Ticker),
        SUBSCRIPTIONS => serde_json::from_slice(payload)
            .map(FeedMessage::Subscriptions)
            .map_err(|e| FetcherError::MalformedEnvelope(e.to_string())),
        ERROR => serde_json::from_slice(payload)
            .map(FeedMessage::Error)
            .map_err(|e| FetcherError::MalformedEnvelope(e.to_string())),
        HEARTBEAT => Ok(FeedMessage::Heartbeat),
        _ => Ok(FeedMessage::Other(kind)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coinbase::encode_ticker;
    use chrono::{TimeZone, Utc};
    use fetcher_common::Pair;
    use rust_decimal::Decimal;

    fn quote_frame(product_id: &str, bid: &str, ask: &str) -> Vec<u8> {
        serde_json::json!({
            "type": "ticker",
            "sequence": 42,
            "time": "2019-01-05T13:01:12.354000Z",
            "product_id": product_id,
            "price": "3700.00",
            "best_bid": bid,
            "best_ask": ask,
        })
        .to_string()
        .into_bytes()
    }

    #[test]
    fn classify_rejects_envelopes_without_type() {
        assert!(matches!(classify(b"{}"), Err(FetcherError::MissingType)));
        assert!(matches!(classify(br#"{"field":"x"}"#), Err(FetcherError::MissingType)));
        assert!(matches!(classify(br#"{"type":""}"#), Err(FetcherError::MissingType)));
        assert!(matches!(classify(b"not json"), Err(FetcherError::MalformedEnvelope(_))));
        assert!(matches!(classify(br#""not json""#), Err(FetcherError::MalformedEnvelope(_))));
        assert!(matches!(classify(b"[1,2]"), Err(FetcherError::MalformedEnvelope(_))));
        assert!(matches!(classify(br#"{"type":7}"#), Err(FetcherError::MalformedEnvelope(_))));
    }

    #[test]
    fn classify_returns_discriminator() {
        assert_eq!(classify(br#"{"type":"anything"}"#).unwrap(), "anything");
        assert_eq!(classify(&quote_frame("BTC-USD", "1", "2")).unwrap(), "ticker");
    }

    #[test]
    fn decode_quote_builds_tick() {
        let tick = decode_quote(&quote_frame("BTC-USD", "3699.99", "3700.01")).unwrap();
        assert_eq!(tick.pair(), &Pair::new("BTC", "USD").unwrap());
        assert_eq!(tick.best_bid(), Decimal::new(369999, 2));
        assert_eq!(tick.best_ask(), Decimal::new(370001, 2));
        assert_eq!(
            tick.timestamp(),
            Utc.with_ymd_and_hms(2019, 1, 5, 13, 1, 12).unwrap()
                + chrono::Duration::milliseconds(354)
        );
    }

    #[test]
    fn decode_quote_reports_wire_errors() {
        assert!(matches!(
            decode_quote(&quote_frame("BTCUSD", "1", "2")),
            Err(FetcherError::InvalidProductId { .. })
        ));
        assert!(matches!(
            decode_quote(&quote_frame("BTC-USD", "WRONG", "2")),
            Err(FetcherError::InvalidNumeric { field: "best_bid", .. })
        ));
        assert!(matches!(
            decode_quote(br#"{"type":"ticker","product_id":"BTC-USD"}"#),
            Err(FetcherError::MalformedQuote(_))
        ));
        assert!(matches!(
            decode_quote(br#"{"type":"ticker","time":"yesterday","product_id":"BTC-USD","best_bid":"1","best_ask":"2"}"#),
            Err(FetcherError::MalformedQuote(_))
        ));
    }

    #[test]
    fn decode_quote_reports_business_errors_as_normalization() {
        for frame in [
            quote_frame("B-USD", "1", "2"),
            quote_frame("BTC-USD", "0", "2"),
            quote_frame("BTC-USD", "1", "-2"),
        ] {
            let err = decode_quote(&frame).unwrap_err();
            assert!(matches!(err, FetcherError::NormalizationFailed(_)), "{err:?}");
            assert!(err.is_decode_error());
        }
    }

    #[test]
    fn encoded_tick_decodes_to_same_tick() {
        let tick = Tick::new(
            Utc.with_ymd_and_hms(2024, 3, 1, 9, 30, 0).unwrap() + chrono::Duration::microseconds(17),
            Pair::new("eth", "eur").unwrap(),
            Decimal::new(312_345, 2),
            Decimal::new(3_123_500, 3),
        )
        .unwrap();
        let payload = encode_ticker(&tick).unwrap();
        assert_eq!(classify(payload.as_bytes()).unwrap(), "ticker");
        assert_eq!(decode_quote(payload.as_bytes()).unwrap(), tick);
    }

    #[test]
    fn decode_dispatches_control_messages() {
        assert!(matches!(
            decode(br#"{"type":"subscriptions","channels":[{"name":"ticker","product_ids":["BTC-USD"]}]}"#),
            Ok(FeedMessage::Subscriptions(s)) if s.channels.len() == 1
        ));
        assert!(matches!(
            decode(br#"{"type":"error","message":"Failed to subscribe","reason":"bad product"}"#),
            Ok(FeedMessage::Error(e)) if e.message == "Failed to subscribe"
        ));
        assert!(matches!(decode(br#"{"type":"heartbeat"}"#), Ok(FeedMessage::Heartbeat)));
        assert!(matches!(decode(br#"{"type":"l2update"}"#), Ok(FeedMessage::Other(kind)) if kind == "l2update"));
        assert!(matches!(decode(&quote_frame("BTC-USD", "1", "2")), Ok(FeedMessage::Ticker(_))));
    }
}
