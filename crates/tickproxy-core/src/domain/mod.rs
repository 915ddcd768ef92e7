//! # Domain Models
//!
//! Canonical request and series types for the proxy.
//!
//! ## Models
//!
//! | Type | Description |
//! |------|-------------|
//! | [`Symbol`] | Validated provider ticker (`AAPL`, `EURUSD=X`, `^GSPC`) |
//! | [`AssetClass`] | Instrument family driving symbol rewriting (`EUR/USD` as forex) |
//! | [`Interval`] | Bar interval short-code (`1d`, `1h`, `1wk`) |
//! | [`Period`] | Lookback short-code (`1mo`, `1y`, `max`) |
//! | [`SeriesRequest`] | Symbol + range + interval + cache flags |
//! | [`RangeSpec`] | Resolved period-or-dates range sent upstream |
//! | [`SeriesRow`] | One OHLCV row |
//! | [`SeriesTable`] | Ordered, de-duplicated rows |
//!
//! ## Validation
//!
//! Request types validate at construction; series tables normalize instead of
//! failing, dropping rows whose OHLC fields cannot be used:
//!
//! ```rust
//! use tickproxy_core::{SeriesRequest, RangeSpec, Period};
//!
//! let request = SeriesRequest::parse("aapl", None, None, None, None).unwrap();
//! assert_eq!(request.symbol.as_str(), "AAPL");
//! assert_eq!(request.range(), RangeSpec::Period(Period::OneMonth));
//! ```

mod asset;
mod interval;
mod period;
mod request;
mod series;
mod symbol;

pub use asset::AssetClass;
pub use interval::Interval;
pub use period::Period;
pub use request::{format_date, parse_date, RangeSpec, SeriesRequest};
pub use series::{SeriesRow, SeriesTable};
pub use symbol::{escape_path_component, Symbol};
