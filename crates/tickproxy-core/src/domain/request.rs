use std::str::FromStr;

use time::macros::format_description;
use time::Date;

use crate::{AssetClass, Interval, Period, Symbol, ValidationError};

/// Range actually sent upstream once the period/date precedence is applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RangeSpec {
    Period(Period),
    Dates { start: Date, end: Option<Date> },
}

/// One historical-series request as received by the proxy.
///
/// `period` takes precedence over `start`; with neither set the range falls
/// back to one month. `end` is only meaningful together with `start`, but it
/// is kept as given because it still distinguishes cache keys.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeriesRequest {
    pub symbol: Symbol,
    pub start: Option<Date>,
    pub end: Option<Date>,
    pub period: Option<Period>,
    pub interval: Interval,
    pub force_refresh: bool,
    pub save: bool,
}

impl SeriesRequest {
    pub fn new(symbol: Symbol) -> Self {
        Self {
            symbol,
            start: None,
            end: None,
            period: None,
            interval: Interval::default(),
            force_refresh: false,
            save: false,
        }
    }

    /// Build a request from raw query-string values. Blank values count as absent.
    pub fn parse(
        symbol: &str,
        start: Option<&str>,
        end: Option<&str>,
        period: Option<&str>,
        interval: Option<&str>,
    ) -> Result<Self, ValidationError> {
        Self::parse_for_asset(AssetClass::default(), symbol, start, end, period, interval)
    }

    /// Like [`SeriesRequest::parse`], rewriting the symbol for `asset` first.
    pub fn parse_for_asset(
        asset: AssetClass,
        symbol: &str,
        start: Option<&str>,
        end: Option<&str>,
        period: Option<&str>,
        interval: Option<&str>,
    ) -> Result<Self, ValidationError> {
        let mut request = Self::new(asset.normalize(Symbol::parse(symbol)?)?);

        if let Some(period) = non_blank(period) {
            request.period = Some(Period::from_str(period)?);
        }
        if let Some(interval) = non_blank(interval) {
            request.interval = Interval::from_str(interval)?;
        }

        let start = non_blank(start).map(parse_date).transpose()?;
        let end = non_blank(end).map(parse_date).transpose()?;
        if let (Some(start), Some(end)) = (start, end) {
            if end < start {
                return Err(ValidationError::InvertedRange {
                    start: format_date(start),
                    end: format_date(end),
                });
            }
        }
        request.start = start;
        request.end = end;

        Ok(request)
    }

    pub fn with_period(mut self, period: Period) -> Self {
        self.period = Some(period);
        self
    }

    pub fn with_dates(mut self, start: Date, end: Option<Date>) -> Result<Self, ValidationError> {
        if let Some(end) = end {
            if end < start {
                return Err(ValidationError::InvertedRange {
                    start: format_date(start),
                    end: format_date(end),
                });
            }
        }
        self.start = Some(start);
        self.end = end;
        Ok(self)
    }

    pub fn with_interval(mut self, interval: Interval) -> Self {
        self.interval = interval;
        self
    }

    pub fn with_force_refresh(mut self, force_refresh: bool) -> Self {
        self.force_refresh = force_refresh;
        self
    }

    pub fn with_save(mut self, save: bool) -> Self {
        self.save = save;
        self
    }

    pub fn range(&self) -> RangeSpec {
        match (self.period, self.start) {
            (Some(period), _) => RangeSpec::Period(period),
            (None, Some(start)) => RangeSpec::Dates {
                start,
                end: self.end,
            },
            (None, None) => RangeSpec::Period(Period::OneMonth),
        }
    }
}

/// Parse a `YYYY-MM-DD` date.
pub fn parse_date(value: &str) -> Result<Date, ValidationError> {
    Date::parse(value.trim(), format_description!("[year]-[month]-[day]")).map_err(|_| {
        ValidationError::InvalidDate {
            value: value.to_owned(),
        }
    })
}

pub fn format_date(date: Date) -> String {
    date.format(format_description!("[year]-[month]-[day]"))
        .unwrap_or_else(|_| date.to_string())
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|value| !value.is_empty())
}
