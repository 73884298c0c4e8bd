#![forbid(unsafe_code)]
#![deny(missing_docs)]

//! **evo-verifier** – four-stage sequential verification pipeline.
//!
//! Each stage is a gate: a failure aborts the remaining stages. The
//! verifier is pure — it never touches the registry, never logs
//! security violations (the executor already did that), and never
//! enforces risk tiers. Callers get a [`VerificationReport`] back and
//! decide what to do with it.

use std::time::Duration;

use evo_constraints::Constraints;
use evo_contracts::ToolContract;
use evo_executor::{ArgSpec, ArgType, ReturnType};
use evo_types::{Category, OutputType, VerificationStage};
use serde_json::Value;
use tracing::{instrument, warn};

/// Outcome of a single stage.
#[derive(Debug, Clone, serde::Serialize)]
pub struct StageResult {
    /// Which stage this is.
    pub stage: VerificationStage,
    /// Whether the stage passed.
    pub passed: bool,
    /// Human-readable detail (error message, or a short success note).
    pub detail: Option<String>,
}

/// Full report produced by [`verify_tool`].
#[derive(Debug, Clone, serde::Serialize)]
pub struct VerificationReport {
    /// Name of the tool under verification.
    pub tool_name: String,
    /// Declared category.
    pub category: Category,
    /// Per-stage results, in execution order.
    pub stages: Vec<StageResult>,
    /// Highest stage reached and passed.
    pub final_stage: VerificationStage,
    /// `true` iff no stage failed (stages skipped due to missing
    /// contract/real-data inputs do not count as failures).
    pub passed: bool,
}

/// Canonical sample data shared by every contract that needs a price
/// series — a 20-point series, consistent with `spec.md` §4.5's
/// "20-point price series" canonical sample.
const SAMPLE_PRICES: &[f64] = &[
    44.0, 44.5, 44.25, 43.75, 44.5, 44.25, 44.5, 45.0, 45.5, 46.0, 46.5, 47.0, 46.5, 47.0, 47.5, 48.0, 47.75, 48.25,
    48.5, 49.0,
];

fn sample_value_for(name: &str) -> (Value, ArgType) {
    match name {
        "prices" | "prices1" | "prices2" => (
            Value::Array(SAMPLE_PRICES.iter().map(|p| Value::from(*p)).collect()),
            ArgType::VecF64,
        ),
        "high" => (
            Value::Array(SAMPLE_PRICES.iter().map(|p| Value::from(p + 0.5)).collect()),
            ArgType::VecF64,
        ),
        "low" => (
            Value::Array(SAMPLE_PRICES.iter().map(|p| Value::from(p - 0.5)).collect()),
            ArgType::VecF64,
        ),
        "volume" => (
            Value::Array((0..SAMPLE_PRICES.len()).map(|i| Value::from(1_000_000 + i * 1_000)).collect()),
            ArgType::VecF64,
        ),
        "period" => (Value::from(14), ArgType::USize),
        "symbol" => (Value::from("AAPL"), ArgType::Str),
        "start" => (Value::from("2024-01-01"), ArgType::Str),
        "end" => (Value::from("2024-06-30"), ArgType::Str),
        _ => (Value::from(0.0), ArgType::F64),
    }
}

/// Synthesize representative input arguments from a contract's
/// required inputs, per `spec.md` §4.5's canonical sample table.
pub fn generate_sample_args(contract: &ToolContract) -> (Value, Vec<ArgSpec>) {
    let mut map = serde_json::Map::new();
    let mut schema = Vec::new();
    for name in &contract.required_inputs {
        let (value, ty) = sample_value_for(name);
        map.insert(name.clone(), value);
        schema.push(ArgSpec::new(name.clone(), ty));
    }
    (Value::Object(map), schema)
}

fn return_type_for(output_type: OutputType) -> ReturnType {
    match output_type {
        OutputType::Numeric => ReturnType::F64,
        OutputType::Dict | OutputType::DataFrame => ReturnType::Dict,
        OutputType::List => ReturnType::VecF64,
        OutputType::Boolean => ReturnType::Bool,
        OutputType::String | OutputType::Any => ReturnType::Str,
    }
}

/// Type-check and range-check a tool's output against its contract.
/// Parses leniently: a bare number, a quoted number, or a string
/// representation of one are all accepted where a numeric is expected.
pub fn validate_output(value: &Value, contract: &ToolContract) -> Result<(), String> {
    match contract.output_type {
        OutputType::Numeric => {
            let n = coerce_f64(value).ok_or_else(|| format!("expected numeric output, got {value}"))?;
            if n.is_nan() {
                if contract.numeric.allow_nan {
                    return Ok(());
                }
                return Err("output is NaN".to_string());
            }
            if !contract.numeric.allow_negative && n < 0.0 {
                return Err(format!("negative output {n} not permitted"));
            }
            if let Some(min) = contract.numeric.min {
                if n < min {
                    return Err(format!("output {n} below minimum {min}"));
                }
            }
            if let Some(max) = contract.numeric.max {
                if n > max {
                    return Err(format!("output {n} above maximum {max}"));
                }
            }
            Ok(())
        }
        OutputType::Dict | OutputType::DataFrame => {
            let obj = value.as_object().ok_or_else(|| format!("expected object output, got {value}"))?;
            for key in &contract.required_keys {
                if !obj.contains_key(key) {
                    return Err(format!("missing required key `{key}`"));
                }
            }
            Ok(())
        }
        OutputType::Boolean => {
            if coerce_bool(value).is_some() {
                Ok(())
            } else {
                Err(format!("expected boolean output, got {value}"))
            }
        }
        OutputType::List => {
            if value.is_array() {
                Ok(())
            } else {
                Err(format!("expected list output, got {value}"))
            }
        }
        OutputType::String => {
            if value.is_string() {
                Ok(())
            } else {
                Err(format!("expected string output, got {value}"))
            }
        }
        OutputType::Any => Ok(()),
    }
}

fn coerce_f64(value: &Value) -> Option<f64> {
    value.as_f64().or_else(|| value.as_str().and_then(|s| s.parse::<f64>().ok()))
}

fn coerce_bool(value: &Value) -> Option<bool> {
    value.as_bool().or_else(|| value.as_str().and_then(|s| s.parse::<bool>().ok()))
}

fn is_transient_error(stderr: &str) -> bool {
    let lower = stderr.to_lowercase();
    ["timeout", "connection", "timed out", "dns", "network", "temporarily unavailable"]
        .iter()
        .any(|marker| lower.contains(marker))
}

/// Real-data inputs supplied for the INTEGRATION stage, only relevant
/// for `category == fetch` tools.
pub struct IntegrationInputs {
    /// Argument values keyed by name.
    pub args: Value,
    /// Declared argument schema matching `args`.
    pub schema: Vec<ArgSpec>,
}

/// Run every applicable stage in order, stopping at the first failure.
#[instrument(skip(code, constraints, contract, integration), fields(tool_name, func_name))]
#[allow(clippy::too_many_arguments)]
pub async fn verify_tool(
    tool_name: &str,
    code: &str,
    func_name: &str,
    category: Category,
    contract: Option<&ToolContract>,
    constraints: &Constraints,
    task_id: &str,
    security_log_path: &std::path::Path,
    integration: Option<IntegrationInputs>,
) -> VerificationReport {
    let mut stages = Vec::new();
    let mut final_stage = VerificationStage::None;
    let mut passed = true;

    let ast_outcome = evo_executor::static_check(
        code,
        &constraints.allowed_modules(category),
        &constraints.banned_modules(category),
        constraints.always_banned_calls(),
        constraints.always_banned_attributes(),
    );
    let ast_passed = matches!(ast_outcome, evo_executor::StaticCheckOutcome::Safe);
    stages.push(StageResult {
        stage: VerificationStage::AstSecurity,
        passed: ast_passed,
        detail: match &ast_outcome {
            evo_executor::StaticCheckOutcome::Safe => None,
            evo_executor::StaticCheckOutcome::Unsafe(v) => Some(v.to_string()),
        },
    });
    if !ast_passed {
        return VerificationReport {
            tool_name: tool_name.to_string(),
            category,
            stages,
            final_stage,
            passed: false,
        };
    }
    final_stage = VerificationStage::AstSecurity;

    let self_test = evo_executor::execute(
        code,
        "verify_only",
        &Value::Object(Default::default()),
        &[],
        ReturnType::Bool,
        category,
        constraints,
        task_id,
        security_log_path,
    )
    .await;
    let self_test_passed = self_test.exit_code == 0;
    stages.push(StageResult {
        stage: VerificationStage::SelfTest,
        passed: self_test_passed,
        detail: if self_test_passed { None } else { Some(self_test.stderr.clone()) },
    });
    if !self_test_passed {
        passed = false;
        return VerificationReport {
            tool_name: tool_name.to_string(),
            category,
            stages,
            final_stage,
            passed,
        };
    }
    final_stage = VerificationStage::SelfTest;

    let Some(contract) = contract else {
        return VerificationReport {
            tool_name: tool_name.to_string(),
            category,
            stages,
            final_stage,
            passed,
        };
    };

    let (args, schema) = generate_sample_args(contract);
    let return_type = return_type_for(contract.output_type);
    let contract_run = evo_executor::execute(
        code,
        func_name,
        &args,
        &schema,
        return_type,
        category,
        constraints,
        task_id,
        security_log_path,
    )
    .await;

    let contract_result = if contract_run.exit_code != 0 {
        Err(format!("tool exited {} during CONTRACT_VALID: {}", contract_run.exit_code, contract_run.stderr))
    } else {
        match &contract_run.result {
            Some(v) => validate_output(v, contract),
            None => Err("tool produced no result payload".to_string()),
        }
    };
    let contract_passed = contract_result.is_ok();
    stages.push(StageResult {
        stage: VerificationStage::ContractValid,
        passed: contract_passed,
        detail: contract_result.err(),
    });
    if !contract_passed {
        passed = false;
        return VerificationReport {
            tool_name: tool_name.to_string(),
            category,
            stages,
            final_stage,
            passed,
        };
    }
    final_stage = VerificationStage::ContractValid;

    if category != Category::Fetch {
        return VerificationReport {
            tool_name: tool_name.to_string(),
            category,
            stages,
            final_stage,
            passed,
        };
    }
    let Some(integration) = integration else {
        return VerificationReport {
            tool_name: tool_name.to_string(),
            category,
            stages,
            final_stage,
            passed,
        };
    };

    let max_retries = constraints.verification.max_retries;
    let mut last_err = String::new();
    let mut integration_passed = false;
    for attempt in 0..=max_retries {
        let run = evo_executor::execute(
            code,
            func_name,
            &integration.args,
            &integration.schema,
            return_type,
            category,
            constraints,
            task_id,
            security_log_path,
        )
        .await;
        if run.exit_code == 0 && run.result.is_some() {
            integration_passed = true;
            break;
        }
        last_err = run.stderr.clone();
        if attempt < max_retries && is_transient_error(&last_err) {
            warn!(attempt, "transient-looking INTEGRATION failure, retrying");
            tokio::time::sleep(Duration::from_secs(constraints.verification.retry_delay_sec)).await;
            continue;
        }
        break;
    }
    stages.push(StageResult {
        stage: VerificationStage::Integration,
        passed: integration_passed,
        detail: if integration_passed { None } else { Some(last_err) },
    });
    if integration_passed {
        final_stage = VerificationStage::Integration;
    } else {
        passed = false;
    }

    VerificationReport {
        tool_name: tool_name.to_string(),
        category,
        stages,
        final_stage,
        passed,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rsi_contract() -> ToolContract {
        evo_contracts::get_contract("calc_rsi").unwrap().clone()
    }

    #[test]
    fn generates_20_point_price_sample() {
        let (args, schema) = generate_sample_args(&rsi_contract());
        let prices = args.get("prices").unwrap().as_array().unwrap();
        assert_eq!(prices.len(), 20);
        assert_eq!(schema.len(), 1);
        assert_eq!(schema[0].ty, ArgType::VecF64);
    }

    #[test]
    fn validates_numeric_within_bounds() {
        let c = rsi_contract();
        assert!(validate_output(&Value::from(55.2), &c).is_ok());
        assert!(validate_output(&Value::from(150.0), &c).is_err());
    }

    #[test]
    fn validates_dict_required_keys() {
        let c = evo_contracts::get_contract("calc_macd").unwrap();
        let good = serde_json::json!({"macd": 1.0, "signal": 0.5, "histogram": 0.5});
        assert!(validate_output(&good, c).is_ok());
        let bad = serde_json::json!({"macd": 1.0});
        assert!(validate_output(&bad, c).is_err());
    }

    #[test]
    fn coerces_stringified_numeric_output() {
        let c = rsi_contract();
        assert!(validate_output(&Value::from("42.0"), &c).is_ok());
    }

    #[test]
    fn recognizes_transient_network_errors() {
        assert!(is_transient_error("Error: connection timed out"));
        assert!(!is_transient_error("panicked at index out of bounds"));
    }
}
