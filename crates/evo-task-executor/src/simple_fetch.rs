//! The simple-fetch shortcut: some queries ask for a value that's
//! already sitting in the fetched OHLCV series (latest/highest/lowest
//! close). Answering directly skips a tool invocation entirely.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::provider::OhlcvSeries;

/// Queries naming financial-statement fields fall through to tool
/// execution rather than being answered from OHLCV alone — OHLCV has
/// no revenue/earnings columns to answer from.
static FINANCIAL_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        r"net\s+income",
        r"revenue",
        r"earnings",
        r"profit",
        r"eps",
        r"dividend",
        r"balance\s+sheet",
        r"income\s+statement",
        r"cash\s+flow",
        r"financial\s+(statement|info|data)",
    ]
    .iter()
    .map(|p| Regex::new(&format!("(?i){p}")).unwrap())
    .collect()
});

static HIGHEST_CLOSE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)highest\s+close\s*price").unwrap());
static LOWEST_CLOSE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)lowest\s+close\s*price").unwrap());
static LATEST_CLOSE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)latest\s+close\s*price|close\s*price").unwrap());

/// Answer a simple fetch query directly from `series`, or return
/// `None` to signal the caller should fall through to tool execution.
pub fn handle_simple_fetch(query: &str, series: &OhlcvSeries) -> Option<f64> {
    if FINANCIAL_PATTERNS.iter().any(|re| re.is_match(query)) {
        return None;
    }
    if series.close.is_empty() {
        return None;
    }

    if HIGHEST_CLOSE_RE.is_match(query) {
        return series.close.iter().cloned().fold(None, |acc, x| Some(acc.map_or(x, |a: f64| a.max(x))));
    }
    if LOWEST_CLOSE_RE.is_match(query) {
        return series.close.iter().cloned().fold(None, |acc, x| Some(acc.map_or(x, |a: f64| a.min(x))));
    }
    if LATEST_CLOSE_RE.is_match(query) {
        return series.close.last().copied();
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn series(close: Vec<f64>) -> OhlcvSeries {
        OhlcvSeries { close, ..Default::default() }
    }

    #[test]
    fn highest_close_takes_the_max() {
        assert_eq!(handle_simple_fetch("highest close price in 2023", &series(vec![1.0, 5.0, 2.0])), Some(5.0));
    }

    #[test]
    fn lowest_close_takes_the_min() {
        assert_eq!(handle_simple_fetch("lowest close price in 2023", &series(vec![1.0, 5.0, 2.0])), Some(2.0));
    }

    #[test]
    fn generic_close_price_means_latest() {
        assert_eq!(handle_simple_fetch("what is the close price today", &series(vec![1.0, 5.0, 2.0])), Some(2.0));
    }

    #[test]
    fn financial_queries_fall_through() {
        assert_eq!(handle_simple_fetch("what was the net income", &series(vec![1.0])), None);
    }

    #[test]
    fn non_matching_query_falls_through() {
        assert_eq!(handle_simple_fetch("calculate RSI", &series(vec![1.0])), None);
    }
}
