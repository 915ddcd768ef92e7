use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use time::OffsetDateTime;

use crate::http_client::{HttpClient, HttpRequest};
use crate::upstream::{FetchOutcome, UpstreamClient, UpstreamError};
use crate::{Interval, RangeSpec, SeriesRequest, SeriesRow, SeriesTable, UpstreamThrottle};

const DEFAULT_BASE_URL: &str = "https://query1.finance.yahoo.com";
const REFERER: &str = "https://finance.yahoo.com/";

/// Yahoo Finance chart API client (`/v8/finance/chart/{symbol}`).
///
/// The chart endpoint needs no crumb; a session cookie is picked up by the
/// transport's cookie jar when the provider sets one.
#[derive(Clone)]
pub struct YahooChartClient {
    http_client: Arc<dyn HttpClient>,
    base_url: String,
    timeout_ms: u64,
    throttle: Option<UpstreamThrottle>,
}

impl YahooChartClient {
    pub fn new(http_client: Arc<dyn HttpClient>) -> Self {
        Self {
            http_client,
            base_url: String::from(DEFAULT_BASE_URL),
            timeout_ms: 10_000,
            throttle: None,
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_owned();
        self
    }

    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = timeout_ms;
        self
    }

    pub fn with_throttle(mut self, throttle: UpstreamThrottle) -> Self {
        self.throttle = Some(throttle);
        self
    }

    /// Chart URL for a request. `now` closes open-ended date ranges.
    pub fn chart_url(&self, request: &SeriesRequest, now: OffsetDateTime) -> String {
        let range = match request.range() {
            RangeSpec::Period(period) => format!("range={}", period.as_str()),
            RangeSpec::Dates { start, end } => {
                let period1 = start.midnight().assume_utc().unix_timestamp();
                // period2 is exclusive; the midnight after `end` keeps the end day in range
                let period2 = end
                    .map(|end| {
                        let after = end.next_day().unwrap_or(end);
                        after.midnight().assume_utc().unix_timestamp()
                    })
                    .unwrap_or_else(|| now.unix_timestamp());
                format!("period1={period1}&period2={period2}")
            }
        };

        format!(
            "{}/v8/finance/chart/{}?interval={}&{}&includePrePost=false",
            self.base_url,
            urlencoding::encode(request.symbol.as_str()),
            request.interval.as_str(),
            range
        )
    }

    async fn fetch(&self, request: &SeriesRequest) -> FetchOutcome {
        if let Some(throttle) = &self.throttle {
            if let Err(wait) = throttle.try_acquire() {
                return FetchOutcome::failed(format!(
                    "upstream request budget exhausted; next slot in {}s",
                    wait.as_secs().max(1)
                ));
            }
        }

        let url = self.chart_url(request, OffsetDateTime::now_utc());
        tracing::debug!(symbol = %request.symbol, %url, "requesting yahoo chart");

        let http_request = HttpRequest::get(url)
            .with_header("referer", REFERER)
            .with_header("accept", "application/json")
            .with_timeout_ms(self.timeout_ms);

        let response = match self.http_client.execute(http_request).await {
            Ok(response) => response,
            Err(error) => {
                tracing::debug!(symbol = %request.symbol, timed_out = error.is_timeout(), %error, "yahoo transport error");
                if error.is_timeout() {
                    return FetchOutcome::Failed(UpstreamError::timeout(Duration::from_millis(self.timeout_ms)));
                }
                return FetchOutcome::failed(format!("yahoo {error}"));
            }
        };

        if !response.is_success() {
            if is_not_found(&response.body) {
                return FetchOutcome::Empty;
            }
            return FetchOutcome::failed(format!("yahoo returned status {}", response.status));
        }

        parse_chart(&response.body, request.interval)
    }
}

impl UpstreamClient for YahooChartClient {
    fn fetch_series<'a>(
        &'a self,
        request: &'a SeriesRequest,
    ) -> Pin<Box<dyn Future<Output = FetchOutcome> + Send + 'a>> {
        Box::pin(self.fetch(request))
    }
}

impl std::fmt::Debug for YahooChartClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("YahooChartClient")
            .field("base_url", &self.base_url)
            .field("timeout_ms", &self.timeout_ms)
            .finish_non_exhaustive()
    }
}

fn is_not_found(body: &str) -> bool {
    serde_json::from_str::<YahooChartResponse>(body)
        .ok()
        .and_then(|response| response.chart.error)
        .is_some_and(|error| error.code.eq_ignore_ascii_case("not found"))
}

fn parse_chart(body: &str, interval: Interval) -> FetchOutcome {
    let response: YahooChartResponse = match serde_json::from_str(body) {
        Ok(response) => response,
        Err(error) => return FetchOutcome::failed(format!("failed to parse yahoo chart: {error}")),
    };

    if let Some(error) = response.chart.error {
        if error.code.eq_ignore_ascii_case("not found") {
            return FetchOutcome::Empty;
        }
        return FetchOutcome::failed(format!(
            "yahoo chart API error: {} {}",
            error.code,
            error.description.unwrap_or_default()
        ));
    }

    let Some(result) = response.chart.result.and_then(|results| results.into_iter().next()) else {
        return FetchOutcome::Empty;
    };
    let Some(timestamps) = result.timestamp else {
        return FetchOutcome::Empty;
    };
    let Some(quote) = result.indicators.quote.into_iter().next() else {
        return FetchOutcome::Empty;
    };
    let gmt_offset = result.meta.and_then(|meta| meta.gmtoffset).unwrap_or(0);

    let mut rows = Vec::with_capacity(timestamps.len());
    for (i, ts_value) in timestamps.into_iter().enumerate() {
        let Some(date) = row_date(ts_value, gmt_offset, interval) else {
            continue;
        };
        if let Some(row) = SeriesRow::from_parts(
            date,
            value_at(&quote.open, i),
            value_at(&quote.high, i),
            value_at(&quote.low, i),
            value_at(&quote.close, i),
            value_at(&quote.volume, i),
        ) {
            rows.push(row);
        }
    }

    FetchOutcome::from_table(SeriesTable::from_rows(rows))
}

fn value_at(values: &[Option<f64>], index: usize) -> Option<f64> {
    values.get(index).copied().flatten()
}

/// Intraday rows keep their instant; daily and coarser rows are keyed by the
/// exchange-local calendar date.
fn row_date(ts_value: i64, gmt_offset: i64, interval: Interval) -> Option<OffsetDateTime> {
    if interval.is_intraday() {
        return OffsetDateTime::from_unix_timestamp(ts_value).ok();
    }
    OffsetDateTime::from_unix_timestamp(ts_value.saturating_add(gmt_offset))
        .ok()
        .map(|local| local.date().midnight().assume_utc())
}

#[derive(Debug, Clone, Deserialize)]
struct YahooChartResponse {
    chart: YahooChartData,
}

#[derive(Debug, Clone, Deserialize)]
struct YahooChartData {
    #[serde(default)]
    result: Option<Vec<YahooChartResult>>,
    #[serde(default)]
    error: Option<YahooChartError>,
}

#[derive(Debug, Clone, Deserialize)]
struct YahooChartError {
    code: String,
    #[serde(default)]
    description: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct YahooChartResult {
    #[serde(default)]
    meta: Option<YahooChartMeta>,
    #[serde(default)]
    timestamp: Option<Vec<i64>>,
    indicators: YahooChartIndicators,
}

#[derive(Debug, Clone, Deserialize)]
struct YahooChartMeta {
    #[serde(default)]
    gmtoffset: Option<i64>,
}

#[derive(Debug, Clone, Deserialize)]
struct YahooChartIndicators {
    #[serde(default)]
    quote: Vec<YahooChartQuote>,
}

#[derive(Debug, Clone, Deserialize)]
struct YahooChartQuote {
    #[serde(default)]
    open: Vec<Option<f64>>,
    #[serde(default)]
    high: Vec<Option<f64>>,
    #[serde(default)]
    low: Vec<Option<f64>>,
    #[serde(default)]
    close: Vec<Option<f64>>,
    #[serde(default)]
    volume: Vec<Option<f64>>,
}
