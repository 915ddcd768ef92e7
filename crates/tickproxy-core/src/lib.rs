//! # Tickproxy Core
//!
//! Domain types and upstream plumbing for the tickproxy market-data proxy.
//!
//! ## Overview
//!
//! This crate provides everything the proxy server needs that is not HTTP
//! serving policy:
//!
//! - **Validated request types** for symbols, intervals, periods and date ranges
//! - **Series tables** of OHLCV rows with the ordering invariants enforced
//! - **CSV codec** used both for responses and for the on-disk cache
//! - **Upstream client seam** returning a tagged [`FetchOutcome`]
//! - **HTTP transport abstraction** backed by reqwest
//! - **Yahoo chart adapter** implementing the upstream seam
//!
//! ## Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`adapters`] | Provider adapters (Yahoo chart API) |
//! | [`codec`] | CSV encoding and decoding of series tables |
//! | [`domain`] | Symbol, Interval, Period, SeriesRequest, SeriesTable |
//! | [`error`] | Validation and core error types |
//! | [`http_client`] | HTTP client abstraction |
//! | [`throttling`] | Outbound request budget for the upstream provider |
//! | [`upstream`] | Upstream client trait and fetch outcome |
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────┐
//! │  Proxy pipeline │
//! └────────┬────────┘
//!          │ SeriesRequest
//!          ▼
//! ┌─────────────────┐     ┌──────────────────┐
//! │ UpstreamClient  │────▶│ UpstreamThrottle │
//! │ (Yahoo adapter) │     └──────────────────┘
//! └────────┬────────┘
//!          │
//!          ▼
//! ┌─────────────────┐
//! │ HttpClient      │
//! │ (reqwest)       │
//! └─────────────────┘
//!          │
//!          ▼
//!   FetchOutcome::{Table, Empty, Failed}
//! ```
//!
//! ## Error Handling
//!
//! Parsing user input yields [`ValidationError`]; upstream failures never
//! surface as Rust errors but as [`FetchOutcome::Failed`], so the caller can
//! tell "no data" apart from "could not reach the provider":
//!
//! ```rust
//! use tickproxy_core::FetchOutcome;
//!
//! fn describe(outcome: &FetchOutcome) -> &'static str {
//!     match outcome {
//!         FetchOutcome::Table(_) => "rows",
//!         FetchOutcome::Empty => "no data",
//!         FetchOutcome::Failed(_) => "upstream failure",
//!     }
//! }
//! ```

pub mod adapters;
pub mod codec;
pub mod domain;
pub mod error;
pub mod http_client;
pub mod throttling;
pub mod upstream;

pub use adapters::YahooChartClient;

pub use codec::{parse_series_timestamp, read_csv, write_csv};

pub use domain::{
    escape_path_component, format_date, parse_date, AssetClass, Interval, Period, RangeSpec, SeriesRequest,
    SeriesRow, SeriesTable, Symbol,
};

pub use error::{CoreError, ValidationError};

pub use http_client::{HttpClient, HttpError, HttpRequest, HttpResponse, ReqwestHttpClient};

pub use throttling::UpstreamThrottle;

pub use upstream::{fetch_with_timeout, FetchOutcome, UpstreamClient, UpstreamError};
