//! Canonical tick record and the quote normalization contract.
//!
//! Every feed exposes its own quote shape; anything implementing
//! [`FeedQuote`] can be turned into a [`Tick`] with [`Tick::from_quote`].
//! Conversion either yields a fully populated tick or fails without producing
//! one. Accessors are consulted in a fixed order (pair, best bid, best ask) and
//! the first failure short-circuits the rest.
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;

use crate::error::FetcherError;
use crate::pair::Pair;
use crate::result::Result;

/// Feed-specific quote that can be normalized into a [`Tick`].
pub trait FeedQuote {
    /// Trading pair the quote belongs to.
    fn pair(&self) -> Result<Pair>;
    /// Best bid price.
    fn best_bid(&self) -> Result<Decimal>;
    /// Best ask price.
    fn best_ask(&self) -> Result<Decimal>;
    /// Exchange timestamp of the quote.
    fn timestamp(&self) -> DateTime<Utc>;
}

/// One normalized quote observation for a trading pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Tick {
    timestamp: DateTime<Utc>,
    pair: Pair,
    best_bid: Decimal,
    best_ask: Decimal,
}

impl Tick {
    /// Normalizes a feed quote.
    ///
    /// Fails with the accessor's own error, or with
    /// [`FetcherError::NonPositivePrice`] when a price is zero or negative.
    pub fn from_quote<Q: FeedQuote + ?Sized>(quote: &Q) -> Result<Self> {
        let timestamp = quote.timestamp();
        let pair = quote.pair()?;
        let best_bid = positive("best_bid", quote.best_bid()?)?;
        let best_ask = positive("best_ask", quote.best_ask()?)?;
        Ok(Self {
            timestamp,
            pair,
            best_bid,
            best_ask,
        })
    }

    /// Builds a tick from already typed parts, enforcing positive prices.
    pub fn new(
        timestamp: DateTime<Utc>,
        pair: Pair,
        best_bid: Decimal,
        best_ask: Decimal,
    ) -> Result<Self> {
        Ok(Self {
            timestamp,
            pair,
            best_bid: positive("best_bid", best_bid)?,
            best_ask: positive("best_ask", best_ask)?,
        })
    }

    /// Exchange timestamp.
    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    /// Trading pair.
    pub fn pair(&self) -> &Pair {
        &self.pair
    }

    /// Best bid.
    pub fn best_bid(&self) -> Decimal {
        self.best_bid
    }

    /// Best ask.
    pub fn best_ask(&self) -> Decimal {
        self.best_ask
    }
}

fn positive(field: &'static str, value: Decimal) -> Result<Decimal> {
    if value <= Decimal::ZERO {
        return Err(FetcherError::NonPositivePrice {
            field,
            value: value.to_string(),
        });
    }
    Ok(value)
}

/// A tick is trivially a quote of itself.
impl FeedQuote for Tick {
    fn pair(&self) -> Result<Pair> {
        Ok(self.pair.clone())
    }

    fn best_bid(&self) -> Result<Decimal> {
        Ok(self.best_bid)
    }

    fn best_ask(&self) -> Result<Decimal> {
        Ok(self.best_ask)
    }

    fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;
    use std::str::FromStr;

    struct FakeQuote {
        primary: &'static str,
        secondary: &'static str,
        best_bid: &'static str,
        best_ask: &'static str,
        timestamp: i64,
        consulted: Cell<u8>,
    }

    impl FakeQuote {
        fn new(
            primary: &'static str,
            secondary: &'static str,
            best_bid: &'static str,
            best_ask: &'static str,
        ) -> Self {
            Self {
                primary,
                secondary,
                best_bid,
                best_ask,
                timestamp: 1,
                consulted: Cell::new(0),
            }
        }
    }

    fn parse(field: &'static str, raw: &str) -> Result<Decimal> {
        Decimal::from_str(raw).map_err(|_| FetcherError::InvalidNumeric {
            field,
            value: raw.to_string(),
        })
    }

    impl FeedQuote for FakeQuote {
        fn pair(&self) -> Result<Pair> {
            self.consulted.set(self.consulted.get() + 1);
            Pair::new(self.primary, self.secondary)
        }

        fn best_bid(&self) -> Result<Decimal> {
            self.consulted.set(self.consulted.get() + 1);
            parse("best_bid", self.best_bid)
        }

        fn best_ask(&self) -> Result<Decimal> {
            self.consulted.set(self.consulted.get() + 1);
            parse("best_ask", self.best_ask)
        }

        fn timestamp(&self) -> DateTime<Utc> {
            DateTime::from_timestamp(self.timestamp, 0).unwrap_or_default()
        }
    }

    #[test]
    fn normalizes_complete_quote() {
        let tick = Tick::from_quote(&FakeQuote::new("btc", "usd", "1", "10")).unwrap();
        assert_eq!(tick.pair(), &Pair::new("BTC", "USD").unwrap());
        assert_eq!(tick.best_bid(), Decimal::ONE);
        assert_eq!(tick.best_ask(), Decimal::TEN);
        assert_eq!(tick.timestamp(), DateTime::from_timestamp(1, 0).unwrap());
    }

    #[test]
    fn fails_on_any_bad_accessor() {
        let cases = [
            FakeQuote::new("", "usd", "1", "10"),
            FakeQuote::new("btc", "", "1", "10"),
            FakeQuote::new("btc", "usd", "WRONG", "10"),
            FakeQuote::new("btc", "usd", "1", "WRONG"),
            FakeQuote::new("btc", "usd", "0", "10"),
            FakeQuote::new("btc", "usd", "1", "-2"),
        ];
        for quote in &cases {
            assert!(Tick::from_quote(quote).is_err());
        }
    }

    #[test]
    fn first_failure_short_circuits() {
        let quote = FakeQuote::new("x", "usd", "WRONG", "WRONG");
        let err = Tick::from_quote(&quote).unwrap_err();
        assert!(matches!(err, FetcherError::InvalidSymbol(_)));
        assert_eq!(quote.consulted.get(), 1);

        let quote = FakeQuote::new("btc", "usd", "WRONG", "WRONG");
        match Tick::from_quote(&quote) {
            Err(FetcherError::InvalidNumeric { field, .. }) => assert_eq!(field, "best_bid"),
            other => panic!("expected best_bid failure, got {other:?}"),
        }
        assert_eq!(quote.consulted.get(), 2);
    }

    #[test]
    fn new_rejects_non_positive_prices() {
        let pair = Pair::new("BTC", "USD").unwrap();
        let now = Utc::now();
        assert!(Tick::new(now, pair.clone(), Decimal::ONE, Decimal::TEN).is_ok());
        assert!(matches!(
            Tick::new(now, pair, Decimal::ZERO, Decimal::TEN),
            Err(FetcherError::NonPositivePrice { field: "best_bid", .. })
        ));
    }

    #[test]
    fn tick_renormalizes_to_itself() {
        let tick = Tick::from_quote(&FakeQuote::new("eth", "btc", "0.05", "0.051")).unwrap();
        assert_eq!(Tick::from_quote(&tick).unwrap(), tick);
    }
}
