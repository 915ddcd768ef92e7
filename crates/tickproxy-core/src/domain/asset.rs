use std::fmt::{Display, Formatter};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::{Symbol, ValidationError};

/// Commodity short codes with a known front-month future.
const COMMODITY_CODES: &[(&str, &str)] = &[
    ("GOLD", "GC=F"),
    ("GC", "GC=F"),
    ("OIL", "CL=F"),
    ("CL", "CL=F"),
    ("SILVER", "SI=F"),
    ("SI", "SI=F"),
];

/// Instrument family a user-typed symbol belongs to.
///
/// Decides how the symbol is rewritten into the chart provider's form before
/// it is keyed or fetched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AssetClass {
    Stock,
    Forex,
    Commodity,
    Crypto,
    Index,
    #[default]
    Other,
}

impl AssetClass {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Stock => "stock",
            Self::Forex => "forex",
            Self::Commodity => "commodity",
            Self::Crypto => "crypto",
            Self::Index => "index",
            Self::Other => "other",
        }
    }

    /// Rewrite `symbol` into provider form.
    ///
    /// | Class | Input | Output |
    /// |-------|-------|--------|
    /// | forex | `EUR/USD`, `EURUSD` | `EURUSD=X` |
    /// | commodity | `GOLD`, `CL`, `HG` | `GC=F`, `CL=F`, `HG=F` |
    /// | crypto | `BTC/EUR`, `ETH` | `BTC-EUR`, `ETH-USD` |
    /// | stock, index, other | `AAPL`, `^GSPC` | unchanged |
    ///
    /// A `/` pair is only meaningful for forex and crypto; elsewhere it is
    /// rejected rather than sent upstream verbatim.
    pub fn normalize(self, symbol: Symbol) -> Result<Symbol, ValidationError> {
        let raw = symbol.as_str();
        let rewritten = match self {
            Self::Forex => {
                let joined = raw.replace('/', "");
                if joined.ends_with("=X") {
                    joined
                } else {
                    format!("{joined}=X")
                }
            }
            Self::Commodity => match COMMODITY_CODES.iter().find(|(code, _)| *code == raw) {
                Some((_, future)) => (*future).to_owned(),
                None if raw.ends_with("=F") => raw.to_owned(),
                None => format!("{raw}=F"),
            },
            Self::Crypto => {
                if raw.contains('/') {
                    raw.replace('/', "-")
                } else if raw.contains('-') {
                    raw.to_owned()
                } else {
                    format!("{raw}-USD")
                }
            }
            Self::Stock | Self::Index | Self::Other => {
                if raw.contains('/') {
                    return Err(ValidationError::AmbiguousPair {
                        symbol: raw.to_owned(),
                    });
                }
                return Ok(symbol);
            }
        };
        Symbol::parse(&rewritten)
    }
}

impl Display for AssetClass {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AssetClass {
    type Err = ValidationError;

    /// Case-insensitive; accepts plural and short forms (`Stocks`, `fx`, `Commodities`).
    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let lowered = value.trim().to_ascii_lowercase();
        let class = match lowered.as_str() {
            "fx" => Self::Forex,
            s if s.starts_with("stock") || s.starts_with("equit") => Self::Stock,
            s if s.starts_with("fore") => Self::Forex,
            s if s.starts_with("commod") => Self::Commodity,
            s if s.starts_with("crypto") => Self::Crypto,
            s if s.starts_with("ind") => Self::Index,
            "other" => Self::Other,
            _ => {
                return Err(ValidationError::InvalidAssetClass {
                    value: value.to_owned(),
                })
            }
        };
        Ok(class)
    }
}
