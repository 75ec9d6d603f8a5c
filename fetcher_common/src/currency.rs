//! Currency symbols.
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::FetcherError;
use crate::result::Result;

/// Shortest accepted symbol length.
pub const MIN_SYMBOL_LEN: usize = 2;

/// A validated, uppercased currency symbol such as `BTC` or `USD`.
///
/// The only way to obtain a `Currency` is [`Currency::new`], so every value in
/// circulation satisfies the length floor.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Currency {
    id: String,
}

impl Currency {
    /// Validates `symbol` and stores it uppercased.
    pub fn new(symbol: &str) -> Result<Self> {
        if symbol.chars().count() < MIN_SYMBOL_LEN {
            return Err(FetcherError::InvalidSymbol(symbol.to_string()));
        }
        Ok(Self {
            id: symbol.to_uppercase(),
        })
    }

    /// Uppercased symbol.
    pub fn id(&self) -> &str {
        &self.id
    }
}

impl fmt::Display for Currency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.id)
    }
}

impl TryFrom<String> for Currency {
    type Error = FetcherError;

    fn try_from(value: String) -> Result<Self> {
        Currency::new(&value)
    }
}

impl From<Currency> for String {
    fn from(value: Currency) -> Self {
        value.id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uppercases_valid_symbols() {
        for (input, expected) in [("usd", "USD"), ("eTH", "ETH"), ("BtC", "BTC"), ("ar", "AR")] {
            let currency = Currency::new(input).unwrap();
            assert_eq!(currency.id(), expected);
        }
    }

    #[test]
    fn rejects_short_symbols() {
        for input in ["x", "X", ""] {
            match Currency::new(input) {
                Err(FetcherError::InvalidSymbol(symbol)) => assert_eq!(symbol, input),
                other => panic!("expected InvalidSymbol for {input:?}, got {other:?}"),
            }
        }
    }

    #[test]
    fn deserializes_through_validation() {
        let currency: Currency = serde_json::from_str("\"eur\"").unwrap();
        assert_eq!(currency.id(), "EUR");
        assert!(serde_json::from_str::<Currency>("\"e\"").is_err());
    }
}
