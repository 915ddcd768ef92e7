//! CSV encoding and decoding of series tables.
//!
//! The same format is served to HTTP clients and stored in the cache:
//!
//! ```text
//! Date,Open,High,Low,Close,Volume
//! 2024-01-02,185.1,186.2,183.9,185.6,52000000
//! ```
//!
//! `Volume` is only written when some row has one. Dates are written as
//! `YYYY-MM-DD` when every row falls on midnight UTC and as RFC3339 otherwise.
//! Reading is lenient: header names are matched case-insensitively, extra
//! columns are ignored and rows whose OHLC cells do not parse are dropped.

use time::format_description::well_known::Rfc3339;
use time::macros::format_description;
use time::{Date, OffsetDateTime, PrimitiveDateTime, Time, UtcOffset};

use crate::{CoreError, SeriesRow, SeriesTable, ValidationError};

const REQUIRED_COLUMNS: [&str; 4] = ["Open", "High", "Low", "Close"];

/// Serialize a table to CSV text.
pub fn write_csv(table: &SeriesTable) -> Result<String, CoreError> {
    let with_volume = table.has_volume();
    let date_only = table
        .rows()
        .iter()
        .all(|row| row.date.time() == Time::MIDNIGHT);

    let mut writer = csv::Writer::from_writer(Vec::new());
    let mut header = vec!["Date", "Open", "High", "Low", "Close"];
    if with_volume {
        header.push("Volume");
    }
    writer.write_record(&header)?;

    for row in table.rows() {
        let mut record = vec![
            format_row_date(row.date, date_only),
            row.open.to_string(),
            row.high.to_string(),
            row.low.to_string(),
            row.close.to_string(),
        ];
        if with_volume {
            record.push(row.volume.map(|volume| volume.to_string()).unwrap_or_default());
        }
        writer.write_record(&record)?;
    }

    let bytes = writer
        .into_inner()
        .map_err(|error| CoreError::Io(error.into_error()))?;
    String::from_utf8(bytes)
        .map_err(|error| CoreError::Io(std::io::Error::new(std::io::ErrorKind::InvalidData, error)))
}

/// Parse CSV text produced by [`write_csv`] or by a pandas-style export.
pub fn read_csv(input: &str) -> Result<SeriesTable, CoreError> {
    let mut reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .flexible(true)
        .from_reader(input.as_bytes());

    let headers = reader.headers()?.clone();
    let position = |name: &str| {
        headers
            .iter()
            .position(|header| header.eq_ignore_ascii_case(name))
    };

    let date_col = position("Date")
        .or_else(|| position("Datetime"))
        .ok_or(ValidationError::MissingColumn { column: "Date" })?;
    let mut ohlc_cols = [0_usize; 4];
    for (slot, column) in ohlc_cols.iter_mut().zip(REQUIRED_COLUMNS) {
        *slot = position(column).ok_or(ValidationError::MissingColumn { column })?;
    }
    let volume_col = position("Volume");

    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record?;
        let Some(date) = record.get(date_col).and_then(parse_series_timestamp) else {
            continue;
        };
        let cell = |index: usize| record.get(index).and_then(|value| value.parse::<f64>().ok());
        let row = SeriesRow::from_parts(
            date,
            cell(ohlc_cols[0]),
            cell(ohlc_cols[1]),
            cell(ohlc_cols[2]),
            cell(ohlc_cols[3]),
            volume_col.and_then(cell),
        );
        if let Some(row) = row {
            rows.push(row);
        }
    }

    Ok(SeriesTable::from_rows(rows))
}

/// Parse the timestamp forms found in series CSV files, normalized to UTC.
///
/// Accepts RFC3339, `YYYY-MM-DD HH:MM:SS[+HH:MM]` and bare `YYYY-MM-DD`
/// (midnight UTC).
pub fn parse_series_timestamp(value: &str) -> Option<OffsetDateTime> {
    let value = value.trim();
    if let Ok(parsed) = OffsetDateTime::parse(value, &Rfc3339) {
        return Some(parsed.to_offset(UtcOffset::UTC));
    }

    let spaced = value.replacen(' ', "T", 1);
    if let Ok(parsed) = OffsetDateTime::parse(&spaced, &Rfc3339) {
        return Some(parsed.to_offset(UtcOffset::UTC));
    }

    if let Ok(parsed) =
        PrimitiveDateTime::parse(value, format_description!("[year]-[month]-[day] [hour]:[minute]:[second]"))
    {
        return Some(parsed.assume_utc());
    }

    Date::parse(value, format_description!("[year]-[month]-[day]"))
        .ok()
        .map(|date| date.midnight().assume_utc())
}

fn format_row_date(date: OffsetDateTime, date_only: bool) -> String {
    if date_only {
        crate::domain::format_date(date.date())
    } else {
        date.format(&Rfc3339).unwrap_or_else(|_| date.to_string())
    }
}
