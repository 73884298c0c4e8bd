#![forbid(unsafe_code)]
#![deny(missing_docs)]

//! **evo-contracts** – declarative input/output contracts per task
//! family, plus deterministic inference from task text.
//!
//! A contract is a promise: if a tool is registered against it, its
//! output is checked to match. The table here is a closed, static set
//! (no persistence, no learning) — new contracts are added by editing
//! [`CONTRACTS`].

use std::collections::HashMap;

use evo_types::{Category, OutputType};
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};

/// Numeric output constraints (min/max/allow-negative/allow-nan).
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct NumericConstraints {
    /// Inclusive lower bound, if any.
    pub min: Option<f64>,
    /// Inclusive upper bound, if any.
    pub max: Option<f64>,
    /// Whether negative values are acceptable.
    pub allow_negative: bool,
    /// Whether `NaN` is an acceptable result (e.g. insufficient data).
    pub allow_nan: bool,
}

/// The declarative shape a task family expects a tool's output to
/// satisfy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolContract {
    /// Stable identifier, e.g. `"calc_rsi"`.
    pub contract_id: String,
    /// Category this contract applies to.
    pub category: Category,
    /// Declared input name -> type-hint string (informational).
    pub input_types: HashMap<String, String>,
    /// Input names that must be present.
    pub required_inputs: Vec<String>,
    /// Expected output shape.
    pub output_type: OutputType,
    /// Numeric range constraints (only meaningful for `Numeric`).
    pub numeric: NumericConstraints,
    /// Required keys for `Dict`/`DataFrame` outputs.
    pub required_keys: Vec<String>,
}

fn contract(
    id: &str,
    category: Category,
    required_inputs: &[&str],
    output_type: OutputType,
    numeric: NumericConstraints,
    required_keys: &[&str],
) -> ToolContract {
    ToolContract {
        contract_id: id.to_string(),
        category,
        input_types: HashMap::new(),
        required_inputs: required_inputs.iter().map(|s| s.to_string()).collect(),
        output_type,
        numeric,
        required_keys: required_keys.iter().map(|s| s.to_string()).collect(),
    }
}

/// The static contract catalog, keyed by contract id.
pub static CONTRACTS: Lazy<HashMap<&'static str, ToolContract>> = Lazy::new(|| {
    use Category::*;
    use OutputType::*;

    let mut m = HashMap::new();
    let mut insert = |c: ToolContract| {
        m.insert(Box::leak(c.contract_id.clone().into_boxed_str()) as &'static str, c);
    };

    insert(contract(
        "calc_rsi",
        Calculation,
        &["prices"],
        Numeric,
        NumericConstraints {
            min: Some(0.0),
            max: Some(100.0),
            ..Default::default()
        },
        &[],
    ));
    insert(contract(
        "calc_macd",
        Calculation,
        &["prices"],
        Dict,
        NumericConstraints::default(),
        &["macd", "signal", "histogram"],
    ));
    insert(contract(
        "calc_bollinger",
        Calculation,
        &["prices"],
        Dict,
        NumericConstraints::default(),
        &["upper", "middle", "lower"],
    ));
    insert(contract(
        "calc_kdj",
        Calculation,
        &["high", "low", "prices"],
        Dict,
        NumericConstraints::default(),
        &["k", "d", "j"],
    ));
    insert(contract(
        "calc_ma",
        Calculation,
        &["prices"],
        Numeric,
        NumericConstraints {
            allow_negative: false,
            ..Default::default()
        },
        &[],
    ));
    insert(contract(
        "calc_volatility",
        Calculation,
        &["prices"],
        Numeric,
        NumericConstraints {
            min: Some(0.0),
            ..Default::default()
        },
        &[],
    ));
    insert(contract(
        "calc_drawdown",
        Calculation,
        &["prices"],
        Numeric,
        NumericConstraints {
            max: Some(0.0),
            allow_negative: true,
            ..Default::default()
        },
        &[],
    ));
    insert(contract(
        "calc_correlation",
        Calculation,
        &["prices1", "prices2"],
        Numeric,
        NumericConstraints {
            min: Some(-1.0),
            max: Some(1.0),
            allow_negative: true,
            ..Default::default()
        },
        &[],
    ));
    insert(contract(
        "calc_volume_price_divergence",
        Calculation,
        &["prices", "volume"],
        Boolean,
        NumericConstraints::default(),
        &[],
    ));
    insert(contract(
        "calc_portfolio_return",
        Calculation,
        &["prices1", "prices2"],
        Numeric,
        NumericConstraints {
            allow_negative: true,
            ..Default::default()
        },
        &[],
    ));
    insert(contract(
        "get_stock_hist",
        Fetch,
        &["symbol", "start", "end"],
        DataFrame,
        NumericConstraints::default(),
        &["date", "open", "high", "low", "close", "volume"],
    ));
    insert(contract(
        "get_financial_data",
        Fetch,
        &["symbol"],
        Dict,
        NumericConstraints::default(),
        &["revenue", "net_income"],
    ));

    m
});

/// Keyword → contract id inference table, checked in order. The first
/// matching keyword wins, mirroring the original's deterministic
/// `infer_contract_from_query`.
const INFERENCE_TABLE: &[(&[&str], &str)] = &[
    (&["rsi", "relative strength"], "calc_rsi"),
    (&["macd"], "calc_macd"),
    (&["bollinger", "boll"], "calc_bollinger"),
    (&["kdj"], "calc_kdj"),
    (&["moving average", " ma ", "sma", "ema"], "calc_ma"),
    (&["volatility"], "calc_volatility"),
    (&["drawdown", "max_drawdown"], "calc_drawdown"),
    (&["correlation"], "calc_correlation"),
    (&["divergence", "volume price"], "calc_volume_price_divergence"),
    (&["portfolio", "weight"], "calc_portfolio_return"),
    (&["historical", "ohlcv", "daily data"], "get_stock_hist"),
    (&["financial", "revenue", "net income"], "get_financial_data"),
];

/// Look up a contract by its stable id.
pub fn get_contract(contract_id: &str) -> Option<&'static ToolContract> {
    CONTRACTS.get(contract_id)
}

/// Infer a contract from free task text and a category hint.
///
/// Returns `None` if nothing matches — callers proceed without a
/// contract and the verifier skips stage 3.
pub fn infer_contract_from_query(task: &str, category: Category) -> Option<&'static ToolContract> {
    let lower = task.to_lowercase();
    for (keywords, id) in INFERENCE_TABLE {
        if keywords.iter().any(|kw| lower.contains(kw)) {
            if let Some(c) = get_contract(id) {
                if c.category == category || category == Category::Composite {
                    return Some(c);
                }
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rsi_contract_bounds_match_spec_scenario() {
        let c = get_contract("calc_rsi").unwrap();
        assert_eq!(c.numeric.min, Some(0.0));
        assert_eq!(c.numeric.max, Some(100.0));
        assert_eq!(c.output_type, OutputType::Numeric);
    }

    #[test]
    fn infers_rsi_from_task_text() {
        let c = infer_contract_from_query("Calculate 14-day RSI", Category::Calculation).unwrap();
        assert_eq!(c.contract_id, "calc_rsi");
    }

    #[test]
    fn unmatched_task_returns_none() {
        assert!(infer_contract_from_query("do something bizarre", Category::Calculation).is_none());
    }

    #[test]
    fn bollinger_requires_three_keys() {
        let c = get_contract("calc_bollinger").unwrap();
        assert_eq!(c.required_keys, vec!["upper", "middle", "lower"]);
    }
}
