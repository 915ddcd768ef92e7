//! Upstream data-provider seam.
//!
//! The proxy never sees provider errors as `Err`: every fetch resolves to a
//! [`FetchOutcome`], and only [`FetchOutcome::Failed`] is eligible for the
//! stale-snapshot fallback. An empty result is a definitive "no data" answer.

use std::fmt::{Display, Formatter};
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use crate::{SeriesRequest, SeriesTable};

/// Result of one upstream fetch.
#[derive(Debug, Clone, PartialEq)]
pub enum FetchOutcome {
    Table(SeriesTable),
    Empty,
    Failed(UpstreamError),
}

impl FetchOutcome {
    /// Wrap a table, mapping a table without rows to [`FetchOutcome::Empty`].
    pub fn from_table(table: SeriesTable) -> Self {
        if table.is_empty() {
            Self::Empty
        } else {
            Self::Table(table)
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed(UpstreamError::new(message))
    }
}

/// Transport or provider failure detail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpstreamError {
    message: String,
    timed_out: bool,
}

impl UpstreamError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            timed_out: false,
        }
    }

    pub fn timeout(after: Duration) -> Self {
        Self {
            message: format!("upstream did not respond within {}ms", after.as_millis()),
            timed_out: true,
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub const fn timed_out(&self) -> bool {
        self.timed_out
    }
}

impl Display for UpstreamError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for UpstreamError {}

/// Fetches a tabular series for a request.
///
/// Implementations must be `Send + Sync`; one client is shared by every
/// in-flight request.
pub trait UpstreamClient: Send + Sync {
    fn fetch_series<'a>(
        &'a self,
        request: &'a SeriesRequest,
    ) -> Pin<Box<dyn Future<Output = FetchOutcome> + Send + 'a>>;
}

/// Run a fetch bounded by `timeout`; expiry yields a timed-out [`FetchOutcome::Failed`].
pub async fn fetch_with_timeout(
    client: &dyn UpstreamClient,
    request: &SeriesRequest,
    timeout: Duration,
) -> FetchOutcome {
    match tokio::time::timeout(timeout, client.fetch_series(request)).await {
        Ok(outcome) => outcome,
        Err(_) => FetchOutcome::Failed(UpstreamError::timeout(timeout)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Symbol;

    struct Stalled;

    impl UpstreamClient for Stalled {
        fn fetch_series<'a>(
            &'a self,
            _request: &'a SeriesRequest,
        ) -> Pin<Box<dyn Future<Output = FetchOutcome> + Send + 'a>> {
            Box::pin(std::future::pending())
        }
    }

    #[test]
    fn empty_table_maps_to_empty_outcome() {
        assert_eq!(FetchOutcome::from_table(SeriesTable::default()), FetchOutcome::Empty);
    }

    #[tokio::test]
    async fn stalled_fetch_times_out_as_failure() {
        let request = SeriesRequest::new(Symbol::parse("AAPL").expect("valid"));
        let outcome = fetch_with_timeout(&Stalled, &request, Duration::from_millis(20)).await;

        match outcome {
            FetchOutcome::Failed(error) => assert!(error.timed_out()),
            other => panic!("expected timeout failure, got {other:?}"),
        }
    }
}
