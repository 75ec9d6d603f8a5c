//! Trading pairs and the pairs-file parser.
use std::fmt;
use std::io::BufRead;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::currency::Currency;
use crate::error::FetcherError;
use crate::result::Result;

/// Delimiter used when a pair is rendered without an explicit one.
pub const PAIR_DEFAULT_DELIMITER: char = '-';

/// Ordered couple of currencies: `primary` is bought, `secondary` is sold.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Pair {
    primary: Currency,
    secondary: Currency,
}

impl Pair {
    /// Creates a pair from two raw symbols.
    ///
    /// The primary leg is validated first, so its error wins when both are bad.
    pub fn new(primary: &str, secondary: &str) -> Result<Self> {
        let primary = Currency::new(primary)?;
        let secondary = Currency::new(secondary)?;
        Ok(Self { primary, secondary })
    }

    /// Parses `PRIMARY<delimiter>SECONDARY`.
    pub fn parse(text: &str, delimiter: char) -> Result<Self> {
        let mut legs = text.split(delimiter);
        match (legs.next(), legs.next(), legs.next()) {
            (Some(primary), Some(secondary), None) => Pair::new(primary.trim(), secondary.trim()),
            _ => Err(FetcherError::InvalidSymbol(text.to_string())),
        }
    }

    /// Primary currency symbol.
    pub fn primary(&self) -> &str {
        self.primary.id()
    }

    /// Secondary currency symbol.
    pub fn secondary(&self) -> &str {
        self.secondary.id()
    }

    /// Joins both symbols with `delimiter`.
    pub fn render(&self, delimiter: char) -> String {
        format!("{}{}{}", self.primary.id(), delimiter, self.secondary.id())
    }
}

/// Renders with [`PAIR_DEFAULT_DELIMITER`].
impl fmt::Display for Pair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}{}{}",
            self.primary.id(),
            PAIR_DEFAULT_DELIMITER,
            self.secondary.id()
        )
    }
}

impl FromStr for Pair {
    type Err = FetcherError;

    fn from_str(s: &str) -> Result<Self> {
        Pair::parse(s, PAIR_DEFAULT_DELIMITER)
    }
}

impl TryFrom<String> for Pair {
    type Error = FetcherError;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<Pair> for String {
    fn from(value: Pair) -> Self {
        value.to_string()
    }
}

/// Trait providing file parsing for pairs.
pub trait PairParser {
    /// Parses pairs from a buffered reader.
    ///
    /// Pairs may be separated by new lines, commas or whitespace. Blank lines
    /// and lines starting with `#` are skipped, duplicates are kept once in
    /// first-seen order. Returns an error if any entry cannot be parsed.
    fn parse_from_file<R: BufRead>(reader: R) -> Result<Vec<Pair>>;
}

impl PairParser for Pair {
    fn parse_from_file<R: BufRead>(reader: R) -> Result<Vec<Self>> {
        let mut pairs: Vec<Pair> = Vec::new();

        for line_result in reader.lines() {
            let line = line_result.map_err(FetcherError::Io)?;
            let trimmed_line = line.trim();
            if trimmed_line.is_empty() || trimmed_line.starts_with('#') {
                continue;
            }

            for entry in trimmed_line
                .split(|c: char| c == ',' || c.is_whitespace())
                .filter(|entry| !entry.is_empty())
            {
                match entry.parse::<Self>() {
                    Ok(pair) if !pairs.contains(&pair) => pairs.push(pair),
                    Ok(_) => {}
                    Err(e) => return Err(FetcherError::ParsePairsFile(format!("{entry}: {e}"))),
                }
            }
        }
        Ok(pairs)
    }
}
