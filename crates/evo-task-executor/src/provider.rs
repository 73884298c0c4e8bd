//! The external market-data collaborator boundary. `spec.md` scopes
//! the data provider itself out as a black box; this trait is the
//! typed seam a real implementation plugs into.

use async_trait::async_trait;

/// One symbol's OHLCV series over a date range, already in the
/// canonical column layout a calculation tool expects.
#[derive(Debug, Clone, Default)]
pub struct OhlcvSeries {
    /// Symbol the series was fetched for.
    pub symbol: String,
    /// ISO `YYYY-MM-DD` dates, parallel to the other columns.
    pub dates: Vec<String>,
    /// Opening prices.
    pub open: Vec<f64>,
    /// Session highs.
    pub high: Vec<f64>,
    /// Session lows.
    pub low: Vec<f64>,
    /// Closing prices.
    pub close: Vec<f64>,
    /// Traded volume.
    pub volume: Vec<f64>,
}

/// Failure fetching market data. Kept deliberately thin — callers
/// only need a message to log and a trace to fail with.
#[derive(Debug, thiserror::Error)]
#[error("failed to fetch data for {symbol}: {message}")]
pub struct ProviderError {
    /// Symbol the fetch was for.
    pub symbol: String,
    /// Human-readable failure detail.
    pub message: String,
}

/// The external market-data collaborator. A real implementation talks
/// to whatever feed is configured; tests use [`StaticDataProvider`].
#[async_trait]
pub trait DataProvider: Send + Sync {
    /// Fetch OHLCV data for `symbol` between `start` and `end`
    /// (inclusive, `YYYY-MM-DD`).
    async fn fetch_ohlcv(&self, symbol: &str, start: &str, end: &str) -> Result<OhlcvSeries, ProviderError>;
}

/// Fixed, in-memory data provider for tests and offline demos —
/// returns the same series for every symbol regardless of date range.
#[derive(Debug, Clone, Default)]
pub struct StaticDataProvider {
    series: OhlcvSeries,
}

impl StaticDataProvider {
    /// Build a provider that always answers with `series` (its
    /// `symbol` field is overwritten per request).
    pub fn new(series: OhlcvSeries) -> Self {
        Self { series }
    }
}

#[async_trait]
impl DataProvider for StaticDataProvider {
    async fn fetch_ohlcv(&self, symbol: &str, _start: &str, _end: &str) -> Result<OhlcvSeries, ProviderError> {
        let mut series = self.series.clone();
        series.symbol = symbol.to_string();
        Ok(series)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn static_provider_stamps_requested_symbol() {
        let provider = StaticDataProvider::new(OhlcvSeries { close: vec![1.0, 2.0, 3.0], ..Default::default() });
        let series = provider.fetch_ohlcv("AAPL", "2023-01-01", "2023-12-31").await.unwrap();
        assert_eq!(series.symbol, "AAPL");
        assert_eq!(series.close, vec![1.0, 2.0, 3.0]);
    }
}
