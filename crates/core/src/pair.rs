//! Currency pairs.
//!
//! A [`Pair`] can only be built through [`Pair::parse`] (or `FromStr`), so any
//! `Pair` value in the system is known to be well-formed and supported.

use core::str::FromStr;
use serde::{Deserialize, Serialize};

use crate::error::DomainError;

/// Supported currencies.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Currency {
    USD,
    EUR,
    MXN,
}

impl Currency {
    pub const ALL: [Currency; 3] = [Currency::USD, Currency::EUR, Currency::MXN];

    pub fn as_str(&self) -> &'static str {
        match self {
            Currency::USD => "USD",
            Currency::EUR => "EUR",
            Currency::MXN => "MXN",
        }
    }
}

impl core::fmt::Display for Currency {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Currency {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Currency::ALL
            .into_iter()
            .find(|c| c.as_str() == s)
            .ok_or_else(|| DomainError::validation(format!("unsupported currency: {s}")))
    }
}

/// Validated `BASE/QUOTE` currency pair.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Pair {
    base: Currency,
    quote: Currency,
}

impl Pair {
    /// Build a pair from two currencies. Base and quote must differ.
    pub fn new(base: Currency, quote: Currency) -> Result<Self, DomainError> {
        if base == quote {
            return Err(DomainError::validation(format!(
                "base and quote must differ: {base}/{quote}"
            )));
        }
        Ok(Self { base, quote })
    }

    /// Parse and validate a `BASE/QUOTE` string.
    ///
    /// Format is checked first (`[A-Z]{3}/[A-Z]{3}`), then currency support.
    pub fn parse(s: &str) -> Result<Self, DomainError> {
        let (base, quote) = split_pair(s)
            .ok_or_else(|| DomainError::validation(format!("invalid pair format: {s:?}")))?;
        Self::new(base.parse()?, quote.parse()?)
    }

    pub fn base(&self) -> Currency {
        self.base
    }

    pub fn quote(&self) -> Currency {
        self.quote
    }
}

fn split_pair(s: &str) -> Option<(&str, &str)> {
    let (base, quote) = s.split_once('/')?;
    let well_formed = |part: &str| part.len() == 3 && part.bytes().all(|b| b.is_ascii_uppercase());
    (well_formed(base) && well_formed(quote)).then_some((base, quote))
}

impl core::fmt::Display for Pair {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}/{}", self.base, self.quote)
    }
}

impl FromStr for Pair {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for Pair {
    type Error = DomainError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<Pair> for String {
    fn from(value: Pair) -> Self {
        value.to_string()
    }
}
