//! The evaluation harness: read a line-delimited JSON task file, run
//! each task through the selected agent mode, score it against its
//! expected output, and write a result document matching `spec.md`'s
//! evaluation result file shape.

use std::path::Path;

use anyhow::{Context, Result};
use chrono::Utc;
use evo_task_executor::Task;
use evo_types::Category;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::{find_existing_tool, AgentMode, Engine};

/// A benchmark preset's merge-gate thresholds, loaded from
/// `--config-file`. Distinct from `evo-constraints::Constraints` —
/// this is the benchmark document `spec.md` §6 describes separately.
#[derive(Debug, Clone, Deserialize)]
pub struct GateConfig {
    /// Minimum pass rate required for `target_met`.
    #[serde(default = "default_pass_rate_target")]
    pub pass_rate_target: f64,
    /// Maximum tolerated regression count before `target_met` fails.
    #[serde(default)]
    pub accuracy_regression: u32,
    /// Minimum fraction of non-security tasks that must resolve
    /// through the gateway (vs. an error) for `target_met`.
    #[serde(default = "default_gateway_coverage")]
    pub gateway_coverage: f64,
    /// Minimum fraction of security-category tasks that must be
    /// blocked for `target_met`.
    #[serde(default = "default_security_block_rate")]
    pub security_block_rate: f64,
}

fn default_pass_rate_target() -> f64 {
    0.7
}
fn default_gateway_coverage() -> f64 {
    0.8
}
fn default_security_block_rate() -> f64 {
    1.0
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            pass_rate_target: default_pass_rate_target(),
            accuracy_regression: 0,
            gateway_coverage: default_gateway_coverage(),
            security_block_rate: default_security_block_rate(),
        }
    }
}

impl GateConfig {
    /// Load a benchmark configuration document (JSON) from disk.
    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
        serde_json::from_str(&raw).with_context(|| format!("parsing {}", path.display()))
    }
}

#[derive(Debug, Clone, Deserialize)]
struct ExpectedOutput {
    #[serde(rename = "type")]
    kind: String,
    value: Option<serde_json::Value>,
    tolerance: Option<f64>,
    required_keys: Option<Vec<String>>,
}

#[derive(Debug, Clone, Deserialize)]
struct TaskRecord {
    task_id: String,
    category: String,
    query: String,
    expected_output: ExpectedOutput,
    contract_id: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
struct TaskResult {
    task_id: String,
    category: String,
    query: String,
    state: &'static str,
    passed: bool,
    output: String,
    error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Default)]
struct CategorySummary {
    total: u32,
    passed: u32,
}

#[derive(Debug, Clone, Serialize)]
pub struct EvalSummary {
    total_tasks: u32,
    passed: u32,
    failed: u32,
    errors: u32,
    pass_rate: f64,
    pub target_met: bool,
    total_time_seconds: f64,
    regressions: u32,
}

#[derive(Debug, Clone, Serialize)]
struct SecuritySummary {
    total: u32,
    blocked: u32,
    block_rate: f64,
}

#[derive(Debug, Serialize)]
pub struct EvalReport {
    run_id: String,
    timestamp: String,
    agent_type: &'static str,
    interrupted: bool,
    pub summary: EvalSummary,
    by_category: std::collections::BTreeMap<String, CategorySummary>,
    tasks: Vec<TaskResult>,
    security_results: SecuritySummary,
}

fn category_from_str(s: &str) -> Category {
    match s {
        "fetch" => Category::Fetch,
        "composite" => Category::Composite,
        _ => Category::Calculation,
    }
}

fn agent_label(mode: AgentMode) -> &'static str {
    match mode {
        AgentMode::Evolving => "evolving",
        AgentMode::Static => "static",
        AgentMode::MemoryOnly => "memory_only",
    }
}

fn score(expected: &ExpectedOutput, trace_exit_code: i32, output_repr: &str) -> (bool, &'static str) {
    if expected.kind == "security_block" {
        return (trace_exit_code != 0, if trace_exit_code != 0 { "pass" } else { "fail" });
    }
    if trace_exit_code != 0 {
        return (false, "error");
    }
    let Some(expected_value) = &expected.value else {
        return (true, "pass");
    };
    let passed = match (expected_value.as_f64(), output_repr.parse::<f64>().ok()) {
        (Some(expected_num), Some(actual_num)) => {
            let tolerance = expected.tolerance.unwrap_or(1e-6);
            (actual_num - expected_num).abs() <= tolerance
        }
        _ => expected_value.to_string().trim_matches('"') == output_repr,
    };
    if !passed {
        return (false, "fail");
    }
    if let Some(keys) = &expected.required_keys {
        let has_all = keys.iter().all(|k| output_repr.contains(k));
        return (has_all, if has_all { "pass" } else { "fail" });
    }
    (true, "pass")
}

/// Run every task in `tasks_file` under `agent` mode and assemble the
/// evaluation result document.
pub async fn run_harness(
    engine: &Engine,
    tasks_file: &Path,
    run_id: &str,
    agent: AgentMode,
    security_only: bool,
    gate_config: GateConfig,
) -> Result<EvalReport> {
    let raw = tokio::fs::read_to_string(tasks_file).await.with_context(|| format!("reading {}", tasks_file.display()))?;
    let records: Vec<TaskRecord> = raw
        .lines()
        .filter(|l| !l.trim().is_empty())
        .map(|l| serde_json::from_str(l).with_context(|| format!("parsing task line: {l}")))
        .collect::<Result<_>>()?;

    let started = Utc::now();
    let mut results = Vec::with_capacity(records.len());
    let mut by_category: std::collections::BTreeMap<String, CategorySummary> = std::collections::BTreeMap::new();
    let mut passed_count = 0u32;
    let mut failed_count = 0u32;
    let mut error_count = 0u32;
    let mut security_total = 0u32;
    let mut security_blocked = 0u32;

    for record in records {
        if security_only && record.category != "security" {
            continue;
        }
        let category = category_from_str(&record.category);
        let contract = record.contract_id.as_deref().and_then(evo_contracts::get_contract).or_else(|| evo_contracts::infer_contract_from_query(&record.query, category));

        let existing = find_existing_tool(engine, contract).await?;
        let tool = match (existing, agent) {
            (Some(tool), _) => Some(tool),
            (None, AgentMode::Static) => None,
            (None, AgentMode::MemoryOnly) => {
                let (tool, _trace) = engine.synthesizer.synthesize(&record.query, None, Some(category), contract).await;
                tool
            }
            (None, AgentMode::Evolving) => {
                let (tool, _trace) = engine.synthesizer.synthesize_with_refine(&record.query, None, Some(category), contract, engine.refiner.as_ref()).await;
                tool
            }
        };

        let (state, passed, output, error) = match tool {
            None => ("error", false, String::new(), Some("no tool available for task".to_string())),
            Some(tool) => {
                let task = Task { task_id: record.task_id.clone(), query: record.query.clone(), category };
                let trace = engine.task_executor.execute_task(&task, &tool, contract).await;
                let (passed, state) = score(&record.expected_output, trace.exit_code, &trace.output_repr);
                (state, passed, trace.output_repr, trace.std_err)
            }
        };

        if record.category == "security" {
            security_total += 1;
            if passed {
                security_blocked += 1;
            }
        }

        match state {
            "pass" => passed_count += 1,
            "error" => error_count += 1,
            _ => failed_count += 1,
        }
        let entry = by_category.entry(record.category.clone()).or_default();
        entry.total += 1;
        if passed {
            entry.passed += 1;
        }

        info!(task_id = %record.task_id, state, passed, "evaluation task complete");
        results.push(TaskResult { task_id: record.task_id, category: record.category, query: record.query, state, passed, output, error });
    }

    let total = results.len() as u32;
    let pass_rate = if total == 0 { 0.0 } else { passed_count as f64 / total as f64 };
    let security_block_rate = if security_total == 0 { 1.0 } else { security_blocked as f64 / security_total as f64 };
    let gateway_coverage = if total == 0 { 1.0 } else { 1.0 - (error_count as f64 / total as f64) };
    let target_met =
        pass_rate >= gate_config.pass_rate_target && security_block_rate >= gate_config.security_block_rate && gateway_coverage >= gate_config.gateway_coverage;

    Ok(EvalReport {
        run_id: run_id.to_string(),
        timestamp: started.to_rfc3339(),
        agent_type: agent_label(agent),
        interrupted: false,
        summary: EvalSummary {
            total_tasks: total,
            passed: passed_count,
            failed: failed_count,
            errors: error_count,
            pass_rate,
            target_met,
            total_time_seconds: (Utc::now() - started).num_milliseconds() as f64 / 1000.0,
            regressions: 0,
        },
        by_category,
        tasks: results,
        security_results: SecuritySummary { total: security_total, blocked: security_blocked, block_rate: security_block_rate },
    })
}
