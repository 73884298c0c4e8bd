//! Pure text-extraction helpers: symbol(s), date range, and numeric
//! calculation parameters pulled out of a task's natural-language
//! query with a small fixed regex table.

use std::collections::HashMap;

use once_cell::sync::Lazy;
use regex::Regex;

/// Well-known index names mapped to their market symbols, checked
/// before ticker/regex matching so "S&P 500" doesn't get mistaken for
/// stray uppercase letters.
const INDEX_SYMBOLS: &[(&str, &str)] = &[
    ("S&P 500", "^GSPC"),
    ("S&P500", "^GSPC"),
    ("SP500", "^GSPC"),
    ("SP 500", "^GSPC"),
    ("DOW JONES", "^DJI"),
    ("DOW", "^DJI"),
    ("DJIA", "^DJI"),
    ("NASDAQ", "^IXIC"),
    ("RUSSELL 2000", "^RUT"),
    ("RUSSELL", "^RUT"),
    ("VIX", "^VIX"),
];

/// Commonly traded US tickers, checked before the generic uppercase
/// regex so they win over noisier matches.
const US_TICKERS: &[&str] = &[
    "AAPL", "MSFT", "GOOGL", "GOOG", "AMZN", "TSLA", "META", "NVDA", "AMD", "INTC", "SPY", "QQQ", "IWM", "DIA", "VOO",
    "VTI", "GLD", "SLV", "USO", "XLF", "NFLX", "PYPL", "CRM", "ADBE", "ORCL", "IBM", "CSCO", "QCOM", "TXN", "AVGO",
];

/// Common English words that look like 2-5 letter ticker symbols —
/// excluded from the fallback regex match.
const SYMBOL_EXCLUSIONS: &[&str] = &[
    "GET", "SET", "PUT", "AND", "THE", "FOR", "NOT", "ALL", "HAS", "ADD", "SUB", "DIV", "MUL", "MAX", "MIN", "AVG",
    "SUM", "END", "NEW", "OLD", "TOP", "LOW", "NET", "DAY", "ETF", "USA", "USD", "BUY", "NOW", "USE", "OUT", "OUR",
    "ANY", "CAN", "MAY", "SAY", "HOW", "WHY", "YES", "TWO", "TEN", "ONE", "ITS",
];

static TICKER_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\b([A-Z]{2,5})\b").unwrap());
static DATE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(\d{4}-\d{2}-\d{2})").unwrap());
static YEAR_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\b(20\d{2})\b").unwrap());
static QUARTER_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)Q(\d)|(\d)(?:st|nd|rd|th)?\s*quarter").unwrap());
static RSI_PERIOD_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)RSI[- ]?(\d+)").unwrap());
static MACD_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)MACD\s*\(?\s*(\d+)\s*,\s*(\d+)\s*,\s*(\d+)").unwrap());
static BOLLINGER_WINDOW_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(\d+)[-\s]*day").unwrap());
static GENERIC_PERIOD_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)(\d+)[-\s]*(天|日|day|period)").unwrap());

/// Pick one symbol out of a query: index name, then known ticker,
/// then a bare uppercase-word regex with a stoplist, defaulting to
/// `AAPL` when nothing matches.
pub fn extract_symbol(query: &str) -> String {
    let upper = query.to_uppercase();

    for (name, symbol) in INDEX_SYMBOLS {
        if upper.contains(name) {
            return symbol.to_string();
        }
    }
    for ticker in US_TICKERS {
        if upper.contains(ticker) {
            return ticker.to_string();
        }
    }

    let mut matches: Vec<&str> = TICKER_RE.captures_iter(&upper).map(|c| c.get(1).unwrap().as_str()).collect();
    matches.sort_by_key(|b| std::cmp::Reverse(b.len()));
    for m in matches {
        if !SYMBOL_EXCLUSIONS.contains(&m) {
            return m.to_string();
        }
    }

    "AAPL".to_string()
}

/// Whether the task needs more than one asset (correlation, portfolio).
pub fn is_multi_asset_task(query: &str) -> bool {
    let lower = query.to_lowercase();
    lower.contains("correlation") || lower.contains("portfolio")
}

/// Pick multiple symbols for correlation/portfolio tasks, falling
/// back to single-symbol extraction when fewer than two are found.
pub fn extract_multiple_symbols(query: &str) -> Vec<String> {
    let upper = query.to_uppercase();
    let mut symbols: Vec<String> = Vec::new();

    for (name, symbol) in INDEX_SYMBOLS {
        if upper.contains(name) && !symbols.iter().any(|s| s == symbol) {
            symbols.push(symbol.to_string());
        }
    }
    for ticker in US_TICKERS {
        if upper.contains(ticker) && !symbols.iter().any(|s| s == ticker) {
            let is_substring = symbols.iter().any(|existing| existing != ticker && existing.contains(ticker));
            if !is_substring {
                symbols.push(ticker.to_string());
            }
        }
    }

    if symbols.len() >= 2 {
        symbols
    } else {
        vec![extract_symbol(query)]
    }
}

/// Extract an explicit `YYYY-MM-DD` date range, defaulting to
/// calendar year 2023 when absent or only partially given.
pub fn extract_date_range(query: &str) -> (String, String) {
    let dates: Vec<&str> = DATE_RE.captures_iter(query).map(|c| c.get(1).unwrap().as_str()).collect();
    match dates.len() {
        0 => ("2023-01-01".to_string(), "2023-12-31".to_string()),
        1 => (dates[0].to_string(), "2023-12-31".to_string()),
        _ => (dates[0].to_string(), dates[1].to_string()),
    }
}

/// Numeric calculation parameters extracted from free text (RSI
/// period, MACD triple, Bollinger window, year/quarter, ...),
/// defaulting per-indicator when the text names the indicator but not
/// its parameters.
pub fn extract_task_params(query: &str) -> HashMap<String, f64> {
    let mut params = HashMap::new();
    let lower = query.to_lowercase();

    if let Some(c) = YEAR_RE.captures(query) {
        params.insert("year".to_string(), c[1].parse().unwrap_or(0.0));
    }
    if let Some(c) = QUARTER_RE.captures(query) {
        let q = c.get(1).or_else(|| c.get(2)).and_then(|m| m.as_str().parse::<f64>().ok());
        if let Some(q) = q {
            params.insert("quarter".to_string(), q);
        }
    }

    if let Some(c) = RSI_PERIOD_RE.captures(query) {
        params.insert("period".to_string(), c[1].parse().unwrap_or(14.0));
    } else if lower.contains("rsi") {
        params.insert("period".to_string(), 14.0);
    }

    if let Some(c) = MACD_RE.captures(query) {
        params.insert("fast_period".to_string(), c[1].parse().unwrap_or(12.0));
        params.insert("slow_period".to_string(), c[2].parse().unwrap_or(26.0));
        params.insert("signal_period".to_string(), c[3].parse().unwrap_or(9.0));
    } else if lower.contains("macd") {
        params.insert("fast_period".to_string(), 12.0);
        params.insert("slow_period".to_string(), 26.0);
        params.insert("signal_period".to_string(), 9.0);
    }

    if lower.contains("kdj") {
        params.insert("k_period".to_string(), 9.0);
        params.insert("d_period".to_string(), 3.0);
    }

    if lower.contains("bollinger") || query.contains('布') {
        let window = BOLLINGER_WINDOW_RE.captures(&lower).and_then(|c| c[1].parse().ok()).unwrap_or(20.0);
        params.insert("window".to_string(), window);
        params.insert("num_std".to_string(), 2.0);
    }

    if !params.contains_key("period") && !params.contains_key("window") {
        if let Some(c) = GENERIC_PERIOD_RE.captures(&lower) {
            params.insert("period".to_string(), c[1].parse().unwrap_or(0.0));
        }
    }

    params
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn index_names_win_over_bare_letters() {
        assert_eq!(extract_symbol("what was the S&P 500 high in 2023"), "^GSPC");
    }

    #[test]
    fn known_tickers_are_recognized() {
        assert_eq!(extract_symbol("give me AAPL close price"), "AAPL");
    }

    #[test]
    fn falls_back_to_aapl_with_no_symbol() {
        assert_eq!(extract_symbol("what is the latest close price"), "AAPL");
    }

    #[test]
    fn stoplist_excludes_common_english_words() {
        assert_eq!(extract_symbol("GET THE latest close price for AAPL"), "AAPL");
    }

    #[test]
    fn correlation_detected_as_multi_asset() {
        assert!(is_multi_asset_task("correlation between AAPL and MSFT"));
        assert!(!is_multi_asset_task("RSI of AAPL"));
    }

    #[test]
    fn extracts_two_explicit_symbols_for_correlation() {
        let symbols = extract_multiple_symbols("correlation between AAPL and MSFT over 2023");
        assert_eq!(symbols, vec!["AAPL".to_string(), "MSFT".to_string()]);
    }

    #[test]
    fn explicit_date_range_is_parsed() {
        assert_eq!(extract_date_range("from 2023-02-01 to 2023-05-01"), ("2023-02-01".to_string(), "2023-05-01".to_string()));
    }

    #[test]
    fn missing_dates_default_to_calendar_2023() {
        assert_eq!(extract_date_range("RSI of AAPL"), ("2023-01-01".to_string(), "2023-12-31".to_string()));
    }

    #[test]
    fn rsi_period_defaults_when_unspecified() {
        let params = extract_task_params("calculate RSI for AAPL");
        assert_eq!(params.get("period"), Some(&14.0));
    }

    #[test]
    fn rsi_period_override_is_parsed() {
        let params = extract_task_params("calculate RSI-21 for AAPL");
        assert_eq!(params.get("period"), Some(&21.0));
    }

    #[test]
    fn macd_triple_defaults_when_unspecified() {
        let params = extract_task_params("calculate MACD for AAPL");
        assert_eq!(params.get("fast_period"), Some(&12.0));
        assert_eq!(params.get("slow_period"), Some(&26.0));
        assert_eq!(params.get("signal_period"), Some(&9.0));
    }
}
