use time::OffsetDateTime;

/// One OHLCV row. `date` is always UTC.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SeriesRow {
    pub date: OffsetDateTime,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: Option<f64>,
}

impl SeriesRow {
    /// Build a row from possibly-missing upstream fields.
    ///
    /// Returns `None` when any of open/high/low/close is missing or not finite.
    /// A non-finite volume is dropped rather than rejecting the row.
    pub fn from_parts(
        date: OffsetDateTime,
        open: Option<f64>,
        high: Option<f64>,
        low: Option<f64>,
        close: Option<f64>,
        volume: Option<f64>,
    ) -> Option<Self> {
        let finite = |value: Option<f64>| value.filter(|value| value.is_finite());
        Some(Self {
            date,
            open: finite(open)?,
            high: finite(high)?,
            low: finite(low)?,
            close: finite(close)?,
            volume: finite(volume),
        })
    }

    fn has_finite_ohlc(&self) -> bool {
        [self.open, self.high, self.low, self.close]
            .iter()
            .all(|value| value.is_finite())
    }
}

/// Ordered OHLCV rows with strictly increasing timestamps.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SeriesTable {
    rows: Vec<SeriesRow>,
}

impl SeriesTable {
    /// Normalize rows into a table: non-finite OHLC rows are dropped, rows are
    /// sorted by date and duplicate timestamps keep their first occurrence.
    pub fn from_rows(rows: Vec<SeriesRow>) -> Self {
        let mut rows: Vec<SeriesRow> = rows
            .into_iter()
            .filter(SeriesRow::has_finite_ohlc)
            .collect();
        rows.sort_by_key(|row| row.date);
        rows.dedup_by_key(|row| row.date);
        Self { rows }
    }

    pub fn rows(&self) -> &[SeriesRow] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Whether at least one row carries a volume value.
    pub fn has_volume(&self) -> bool {
        self.rows.iter().any(|row| row.volume.is_some())
    }

    pub fn first_date(&self) -> Option<OffsetDateTime> {
        self.rows.first().map(|row| row.date)
    }

    pub fn last_date(&self) -> Option<OffsetDateTime> {
        self.rows.last().map(|row| row.date)
    }
}
