//! One-shot and retrying tool synthesis: generate via the LLM gateway,
//! submit via the registration gateway. All registration flows through
//! [`evo_gateway::Gateway::submit`] — nothing here writes to the
//! registry directly.

use std::sync::Arc;

use chrono::Utc;
use evo_contracts::ToolContract;
use evo_gateway::Gateway;
use evo_llm_gateway::LlmGateway;
use evo_store::{ExecutionTrace, ToolArtifact};
use evo_types::Category;
use tracing::{info, instrument};
use uuid::Uuid;

use crate::refiner::Refiner;

/// Keyword inference mirroring the task-level category classification
/// a one-shot synthesis call runs before ever talking to the LLM
/// (distinct from the LLM gateway's own inference, which runs again
/// internally if no category is supplied — the two are independently
/// grounded, matching the original's `Synthesizer._infer_category`
/// and `LLMAdapter`'s separate keyword lists).
fn infer_category(task: &str) -> Category {
    let lower = task.to_lowercase();
    let fetch_kw = ["获取", "fetch", "get", "查询", "历史", "price", "quote"];
    let calc_kw = ["calculate", "calc", "计算", "rsi", "macd", "bollinger", "volatility", "correlation"];
    let composite_kw = ["if ", "return true", "return false", "signal", "divergence", "portfolio", "after"];

    if fetch_kw.iter().any(|k| lower.contains(k)) {
        if calc_kw.iter().any(|k| lower.contains(k)) {
            Category::Calculation
        } else {
            Category::Fetch
        }
    } else if composite_kw.iter().any(|k| lower.contains(k)) {
        Category::Composite
    } else {
        Category::Calculation
    }
}

fn failure_trace(task: &str, trace_id: &str, stderr: impl Into<String>) -> ExecutionTrace {
    ExecutionTrace {
        trace_id: trace_id.to_string(),
        task_id: task.chars().take(50).collect(),
        tool_id: None,
        input_args: serde_json::json!({"task": task}),
        output_repr: String::new(),
        exit_code: 1,
        std_out: None,
        std_err: Some(stderr.into()),
        execution_time_ms: 0,
        created_at: Utc::now(),
    }
}

/// Generate → gateway submit → (optionally) retry/refine.
pub struct Synthesizer {
    llm: Arc<LlmGateway>,
    gateway: Arc<Gateway>,
}

impl Synthesizer {
    /// Construct a synthesizer around a shared LLM gateway and
    /// registration gateway.
    pub fn new(llm: Arc<LlmGateway>, gateway: Arc<Gateway>) -> Self {
        Self { llm, gateway }
    }

    /// One-shot synthesis for `task`.
    #[instrument(skip(self, task, tool_name, contract), fields(task = %task))]
    pub async fn synthesize(
        &self,
        task: &str,
        tool_name: Option<&str>,
        category: Option<Category>,
        contract: Option<&'static ToolContract>,
    ) -> (Option<ToolArtifact>, ExecutionTrace) {
        let category = category.unwrap_or_else(|| infer_category(task));
        let contract = contract.or_else(|| evo_contracts::infer_contract_from_query(task, category));

        info!(%category, "generating tool code");
        let mut task_prompt = task.to_string();
        if let Some(name) = tool_name {
            task_prompt.push_str(&format!("\n\nPlease name the function: {name}"));
        }
        let outcome = self.llm.generate_tool_code(&task_prompt, None, Some(category), contract).await;

        let Some(code) = outcome.code else {
            return (None, failure_trace(task, "gen_failed", "LLM failed to generate valid code"));
        };

        let func_name = evo_gateway::extract_function_name(&code).or_else(|| tool_name.map(str::to_string));
        let Some(_func_name) = func_name else {
            return (None, failure_trace(task, "no_func", "could not extract function name from generated code"));
        };

        let task_id: String = task.chars().take(50).collect();
        let submit = self.gateway.submit(&code, category, contract, None, Some(task), &task_id, None, false).await;

        match submit {
            Ok(outcome) if outcome.ok => {
                let trace = trace_from_report(task, &outcome.report);
                (outcome.tool, trace)
            }
            Ok(outcome) => (None, trace_from_report(task, &outcome.report)),
            Err(e) => (None, failure_trace(task, "submit_error", e.to_string())),
        }
    }

    /// Retry synthesis up to `max_attempts`, feeding the previous
    /// failure's stderr back as error context on each subsequent try.
    pub async fn synthesize_with_retry(&self, task: &str, max_attempts: u32) -> (Option<ToolArtifact>, Vec<ExecutionTrace>) {
        let mut traces = Vec::new();
        let category = infer_category(task);
        let contract = evo_contracts::infer_contract_from_query(task, category);
        let mut error_context: Option<String> = None;
        let task_id: String = task.chars().take(50).collect();

        for attempt in 0..max_attempts {
            info!(attempt, "synthesize_with_retry attempt");
            let outcome = self.llm.generate_tool_code(task, error_context.as_deref(), Some(category), contract).await;
            let Some(code) = outcome.code else {
                let trace = failure_trace(task, "gen_failed", outcome.text);
                error_context = trace.std_err.clone();
                traces.push(trace);
                continue;
            };

            let submit = self.gateway.submit(&code, category, contract, None, Some(task), &task_id, None, false).await;
            match submit {
                Ok(result) if result.ok => {
                    let trace = trace_from_report(task, &result.report);
                    traces.push(trace);
                    return (result.tool, traces);
                }
                Ok(result) => {
                    let trace = trace_from_report(task, &result.report);
                    error_context = trace.std_err.clone();
                    traces.push(trace);
                }
                Err(e) => {
                    let trace = failure_trace(task, "submit_error", e.to_string());
                    error_context = trace.std_err.clone();
                    traces.push(trace);
                }
            }
        }
        (None, traces)
    }

    /// Synthesize, falling back to the [`Refiner`] when the first
    /// attempt fails.
    pub async fn synthesize_with_refine(
        &self,
        task: &str,
        tool_name: Option<&str>,
        category: Option<Category>,
        contract: Option<&'static ToolContract>,
        refiner: &Refiner,
    ) -> (Option<ToolArtifact>, ExecutionTrace) {
        let (tool, trace) = self.synthesize(task, tool_name, category, contract).await;
        if tool.is_some() {
            return (tool, trace);
        }

        let category = category.unwrap_or_else(|| infer_category(task));
        let contract = contract.or_else(|| evo_contracts::infer_contract_from_query(task, category));
        let outcome = self.llm.generate_tool_code(task, None, Some(category), contract).await;
        let Some(code) = outcome.code else {
            return (None, trace);
        };

        info!("synthesis failed, invoking refiner");
        let (refined, _reports) = refiner.refine(&code, task, &trace, None, category, contract, 3).await;
        match refined {
            Some(tool) => {
                let success_trace = ExecutionTrace {
                    trace_id: format!("refined_{}", trace.trace_id),
                    task_id: trace.task_id.clone(),
                    tool_id: Some(tool.id),
                    input_args: serde_json::json!({"task": task}),
                    output_repr: String::new(),
                    exit_code: 0,
                    std_out: Some("refined successfully".to_string()),
                    std_err: None,
                    execution_time_ms: trace.execution_time_ms,
                    created_at: Utc::now(),
                };
                (Some(tool), success_trace)
            }
            None => (None, trace),
        }
    }
}

fn trace_from_report(task: &str, report: &Option<evo_verifier::VerificationReport>) -> ExecutionTrace {
    let trace_id = format!("verify_{}", Uuid::new_v4().simple());
    let Some(report) = report else {
        return failure_trace(task, &trace_id, "no verification report");
    };
    let errors: Vec<String> = report
        .stages
        .iter()
        .filter(|s| !s.passed)
        .map(|s| format!("{:?}: {}", s.stage, s.detail.clone().unwrap_or_default()))
        .collect();

    ExecutionTrace {
        trace_id,
        task_id: task.chars().take(50).collect(),
        tool_id: None,
        input_args: serde_json::json!({"task": task, "category": report.category.to_string()}),
        output_repr: format!("final_stage={:?}", report.final_stage),
        exit_code: if report.passed { 0 } else { 1 },
        std_out: None,
        std_err: if errors.is_empty() { None } else { Some(errors.join("; ")) },
        execution_time_ms: 0,
        created_at: Utc::now(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn infers_fetch_for_plain_quote_request() {
        assert_eq!(infer_category("获取 AAPL 历史价格"), Category::Fetch);
    }

    #[test]
    fn infers_calculation_when_fetch_and_calc_keywords_coexist() {
        assert_eq!(infer_category("fetch prices and calculate RSI"), Category::Calculation);
    }

    #[test]
    fn infers_composite_for_conditional_signal_language() {
        assert_eq!(infer_category("return true if divergence after crossover"), Category::Composite);
    }
}
