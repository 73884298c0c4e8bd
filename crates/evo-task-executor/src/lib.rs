//! Bridges fetch tasks (need market data) and calculation tools
//! (expect data as arguments): extracts task parameters from text,
//! fetches OHLCV through the data-provider boundary, maps it onto a
//! tool's declared inputs, and runs the executor.
#![forbid(unsafe_code)]
#![deny(missing_docs)]

mod params;
mod provider;
mod simple_fetch;

pub use params::{extract_date_range, extract_multiple_symbols, extract_symbol, extract_task_params, is_multi_asset_task};
pub use provider::{DataProvider, OhlcvSeries, ProviderError, StaticDataProvider};
pub use simple_fetch::handle_simple_fetch;

use std::path::PathBuf;
use std::sync::Arc;

use chrono::Utc;
use evo_constraints::Constraints;
use evo_contracts::ToolContract;
use evo_executor::{ArgSpec, ArgType, ExecutionResult, ReturnType};
use evo_store::{ExecutionTrace, ToolArtifact};
use evo_types::{Category, OutputType};
use tracing::{info, instrument};

/// A task to resolve inputs for and run a tool against.
#[derive(Debug, Clone)]
pub struct Task {
    /// Stable task identifier, used in trace ids and logging.
    pub task_id: String,
    /// Natural-language description the task was raised from.
    pub query: String,
    /// Category the task was classified under.
    pub category: Category,
}

/// Declared type a contract input name maps to, for building the
/// execution-time argument schema. Kept separate from
/// `evo-verifier`'s own sample-value table — this one only needs to
/// know shapes, not representative values.
fn arg_type_for(name: &str) -> ArgType {
    match name {
        "prices" | "prices1" | "prices2" | "high" | "low" | "close" | "open" | "volume" => ArgType::VecF64,
        "symbol" | "start" | "end" | "date" => ArgType::Str,
        "period" | "window" | "k_period" | "d_period" | "fast_period" | "slow_period" | "signal_period" => {
            ArgType::USize
        }
        _ => ArgType::F64,
    }
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

fn args_schema_for(contract: &ToolContract) -> Vec<ArgSpec> {
    contract.required_inputs.iter().map(|name| ArgSpec::new(name.clone(), arg_type_for(name))).collect()
}

fn trace_from_execution(task: &Task, input_args: serde_json::Value, result: ExecutionResult) -> ExecutionTrace {
    ExecutionTrace {
        trace_id: format!("exec_{}", task.task_id),
        task_id: task.task_id.clone(),
        tool_id: None,
        input_args,
        output_repr: result.result.map(|v| v.to_string()).unwrap_or_default(),
        exit_code: result.exit_code,
        std_out: Some(result.stdout),
        std_err: if result.stderr.is_empty() { None } else { Some(result.stderr) },
        execution_time_ms: result.duration_ms,
        created_at: Utc::now(),
    }
}

fn simple_fetch_trace(task: &Task, symbol: &str, value: f64) -> ExecutionTrace {
    ExecutionTrace {
        trace_id: format!("simple_fetch_{}", task.task_id),
        task_id: task.task_id.clone(),
        tool_id: None,
        input_args: serde_json::json!({"query": task.query, "symbol": symbol}),
        output_repr: value.to_string(),
        exit_code: 0,
        std_out: Some(value.to_string()),
        std_err: None,
        execution_time_ms: 0,
        created_at: Utc::now(),
    }
}

fn fetch_error_trace(task: &Task, message: impl Into<String>) -> ExecutionTrace {
    let message = message.into();
    ExecutionTrace {
        trace_id: format!("fetch_error_{}", task.task_id),
        task_id: task.task_id.clone(),
        tool_id: None,
        input_args: serde_json::json!({"error": message}),
        output_repr: String::new(),
        exit_code: 1,
        std_out: None,
        std_err: Some(format!("data fetch failed: {message}")),
        execution_time_ms: 0,
        created_at: Utc::now(),
    }
}

/// Resolves a task's inputs (fetching data when needed) and runs the
/// selected tool through `evo-executor`.
pub struct TaskExecutor {
    provider: Arc<dyn DataProvider>,
    constraints: Constraints,
    security_log_path: PathBuf,
}

impl TaskExecutor {
    /// Construct a task executor around a data provider and the
    /// security-check constraints `evo-executor` enforces.
    pub fn new(provider: Arc<dyn DataProvider>, constraints: Constraints, security_log_path: impl Into<PathBuf>) -> Self {
        Self { provider, constraints, security_log_path: security_log_path.into() }
    }

    async fn fetch_single(&self, symbol: &str, start: &str, end: &str) -> Result<OhlcvSeries, String> {
        self.provider.fetch_ohlcv(symbol, start, end).await.map_err(|e| e.to_string())
    }

    /// Resolve inputs for `task` and execute `tool` against them,
    /// trying the simple-fetch shortcut first for single-asset
    /// queries and falling back to tool execution otherwise.
    #[instrument(skip(self, task, tool, contract), fields(task_id = %task.task_id))]
    pub async fn execute_task(&self, task: &Task, tool: &ToolArtifact, contract: Option<&ToolContract>) -> ExecutionTrace {
        let (start, end) = extract_date_range(&task.query);

        let args_value = if is_multi_asset_task(&task.query) {
            let symbols = extract_multiple_symbols(&task.query);
            let sym1 = symbols.first().cloned().unwrap_or_else(|| extract_symbol(&task.query));
            let sym2 = symbols.get(1).cloned().unwrap_or_else(|| sym1.clone());

            let (s1, s2) = match (self.fetch_single(&sym1, &start, &end).await, self.fetch_single(&sym2, &start, &end).await) {
                (Ok(a), Ok(b)) => (a, b),
                (Err(e), _) | (_, Err(e)) => return fetch_error_trace(task, e),
            };

            let mut value = serde_json::json!({"prices1": s1.close, "prices2": s2.close});
            for (k, v) in extract_task_params(&task.query) {
                value[k] = serde_json::json!(v);
            }
            value
        } else {
            let symbol = extract_symbol(&task.query);
            let series = match self.fetch_single(&symbol, &start, &end).await {
                Ok(series) => series,
                Err(e) => return fetch_error_trace(task, e),
            };

            if let Some(answer) = handle_simple_fetch(&task.query, &series) {
                info!(symbol, answer, "answered via simple-fetch shortcut");
                return simple_fetch_trace(task, &symbol, answer);
            }

            let mut value = serde_json::json!({
                "prices": series.close,
                "open": series.open,
                "high": series.high,
                "low": series.low,
                "close": series.close,
                "volume": series.volume,
                "symbol": series.symbol,
                "start": start,
                "end": end,
            });
            for (k, v) in extract_task_params(&task.query) {
                value[k] = serde_json::json!(v);
            }
            value
        };

        let Some(contract) = contract else {
            return fetch_error_trace(task, "no contract resolved for tool invocation");
        };
        let schema = args_schema_for(contract);
        let return_type = return_type_for(contract.output_type);

        let func_name = &tool.name;
        let result = evo_executor::execute(
            &tool.code_content,
            func_name,
            &args_value,
            &schema,
            return_type,
            task.category,
            &self.constraints,
            &task.task_id,
            &self.security_log_path,
        )
        .await;

        trace_from_execution(task, args_value, result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn task(query: &str, category: Category) -> Task {
        Task { task_id: "t1".to_string(), query: query.to_string(), category }
    }

    #[test]
    fn arg_types_match_contract_shapes() {
        assert_eq!(arg_type_for("prices"), ArgType::VecF64);
        assert_eq!(arg_type_for("symbol"), ArgType::Str);
        assert_eq!(arg_type_for("period"), ArgType::USize);
    }

    #[tokio::test]
    async fn simple_fetch_shortcut_skips_tool_execution() {
        let provider = Arc::new(StaticDataProvider::new(OhlcvSeries { close: vec![1.0, 9.0, 4.0], ..Default::default() }));
        let executor = TaskExecutor::new(provider, Constraints::default(), "/tmp/evo-task-executor-test-security.log");
        let t = task("highest close price for AAPL", Category::Fetch);
        let tool = ToolArtifact {
            id: 1,
            name: "unused".to_string(),
            semantic_version: "0.1.0".to_string(),
            file_path: String::new(),
            content_hash: String::new(),
            code_content: String::new(),
            args_schema: serde_json::json!({}),
            dependencies: vec![],
            permissions: vec![],
            status: evo_store::ToolStatus::Verified,
            parent_tool_ids: vec![],
            category: Some(Category::Fetch),
            contract_id: None,
            indicator: None,
            data_type: None,
            verification_stage: evo_types::VerificationStage::Integration,
            created_at: Utc::now(),
        };
        let trace = executor.execute_task(&t, &tool, None).await;
        assert_eq!(trace.exit_code, 0);
        assert_eq!(trace.output_repr, "9");
    }
}
