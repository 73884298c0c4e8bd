//! The repair loop: classify the failure, ask the LLM for a root
//! cause and a patch, resubmit through the gateway. Every registration
//! still goes through [`evo_gateway::Gateway::submit`] — the refiner
//! never writes to the registry directly, only to the error-report
//! and patch-history tables that aren't part of the registration path.

use std::sync::Arc;
use std::time::Duration;

use evo_contracts::ToolContract;
use evo_gateway::Gateway;
use evo_llm_gateway::LlmGateway;
use evo_store::{ErrorReport, ExecutionTrace, ToolArtifact, ToolRegistry};
use evo_types::Category;
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::{info, instrument, warn};

/// Std-library replacement guide surfaced to the LLM when a patch
/// attempt fails on an unresolved import — the Rust-native analogue
/// of the original's talib/pandas replacement guide, since the only
/// dependency a compiled tool may ever reach for is `std`.
pub const MODULE_REPLACEMENT_GUIDE: &str = r#"
## Standard-library replacement guide
FORBIDDEN: any crate outside `std`. A compiled tool links against no
external crates, so a call into one will never resolve.
USE INSTEAD: plain `std` iterator arithmetic.

### RSI (14-period)
let mut gains = 0.0_f64;
let mut losses = 0.0_f64;
for w in prices.windows(2) {
    let delta = w[1] - w[0];
    if delta > 0.0 { gains += delta; } else { losses -= delta; }
}
let rs = gains / losses.max(f64::MIN_POSITIVE);
let rsi = 100.0 - (100.0 / (1.0 + rs));

### Simple moving average
let sum: f64 = prices.iter().rev().take(period).sum();
let ma = sum / period as f64;
"#;

struct ErrorPattern {
    name: &'static str,
    regex: Lazy<Regex>,
    strategy: &'static str,
}

macro_rules! pattern {
    ($name:expr, $re:expr, $strategy:expr) => {
        ErrorPattern { name: $name, regex: Lazy::new(|| Regex::new($re).unwrap()), strategy: $strategy }
    };
}

static ERROR_PATTERNS: &[ErrorPattern] = &[
    pattern!("CompileError", r"error\[E\d+\]", "Check type annotations, trait bounds, and that the function signature matches the declared argument types."),
    pattern!("UnresolvedImport", r"unresolved import|failed to resolve", "Replace the unresolved crate with a std-only equivalent. See the module replacement guide."),
    pattern!("IndexOutOfBounds", r"index out of bounds", "Add a length check before indexing."),
    pattern!("DivisionByZero", r"divide by zero", "Add a zero-denominator guard before dividing."),
    pattern!("ArithmeticOverflow", r"attempt to \w+ with overflow", "Use checked or saturating arithmetic."),
    pattern!("NoneUnwrap", r"on a `None` value", "Handle the `None` case explicitly instead of unwrapping."),
    pattern!("ErrUnwrap", r"on an `Err` value", "Handle the `Err` case explicitly instead of unwrapping."),
    pattern!("ParseError", r"ParseFloatError|ParseIntError|invalid digit", "Validate input format before parsing."),
    pattern!("AssertionError", r"assertion.*failed", "Fix the calculation logic to match the expected output. Do not modify test assertions."),
];

fn classify_error(stderr: &str) -> (&'static str, &'static str) {
    for p in ERROR_PATTERNS {
        if p.regex.is_match(stderr) {
            return (p.name, p.strategy);
        }
    }
    ("UnknownError", "Analyze the error message and fix accordingly.")
}

/// Substrings that make an error unfixable by patching — the refiner
/// should give up rather than burn attempts on it.
fn is_unfixable(stderr: &str) -> bool {
    let lower = stderr.to_lowercase();
    [
        "banned import",
        "banned call",
        "banned attribute",
        "banned identifier",
        "unsafe code is not permitted",
        "securityexception",
        "security exception",
        "security rejection",
        "timeout",
        "timed out",
        "connection",
        "llm error",
        "rate limit exceeded",
    ]
    .iter()
    .any(|m| lower.contains(m))
}

fn truncate_chars(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        return s.to_string();
    }
    s.chars().take(max).collect::<String>() + "...[truncated]"
}

fn truncate_explanation(text: &str) -> String {
    const MAX: usize = 2000;
    let chars: Vec<char> = text.chars().collect();
    if chars.len() <= MAX {
        return text.to_string();
    }
    let half = MAX / 2;
    let head: String = chars[..half].iter().collect();
    let tail: String = chars[chars.len() - half..].iter().collect();
    format!("{head}\n...[truncated]...\n{tail}")
}

/// One prior patch attempt, threaded into the next patch prompt so the
/// LLM doesn't repeat itself. `stderr_excerpt` is capped at 500 chars
/// so prompt size stays bounded across attempts.
#[derive(Debug, Clone)]
pub struct PreviousAttempt {
    /// What the attempt tried (e.g. "attempt 2 patch").
    pub approach: String,
    /// Why it failed.
    pub failure_reason: String,
    /// Truncated stderr/detail from the failing run.
    pub stderr_excerpt: String,
}

fn analysis_prompt(code: &str, stderr: &str, error_type: &str) -> String {
    format!(
        "Analyze the root cause of this Rust tool execution failure.\n\n## Code\n```rust\n{code}\n```\n\n## Error\n```\n{stderr}\n```\n\n## Classified type\n{error_type}\n\nExplain concisely:\n1. The specific cause of the failure.\n2. A suggested fix.\n\nOutput the analysis only, no code."
    )
}

fn patch_prompt(original_code: &str, task: &str, error_type: &str, root_cause: &str, history: &[PreviousAttempt], needs_module_guide: bool) -> String {
    let mut history_section = String::new();
    if !history.is_empty() {
        history_section.push_str("## Previous attempts\n");
        for (i, h) in history.iter().enumerate() {
            history_section.push_str(&format!("{}. {} — failed: {} ({})\n", i + 1, h.approach, h.failure_reason, h.stderr_excerpt));
        }
        history_section.push('\n');
    }
    let guide = if needs_module_guide { MODULE_REPLACEMENT_GUIDE } else { "" };
    format!(
        "Fix the following Rust tool.\n\n## Original task\n{task}\n\n## Original code\n```rust\n{original_code}\n```\n\n## Error analysis\nerror type: {error_type}\nroot cause: {root_cause}\n\n{history_section}{guide}\n## Requirements\n1. Fix the error while preserving the tool's intended behavior.\n2. Add necessary bounds/guard checks.\n3. Keep the function signature and `self_test` unless the error requires changing them.\n4. Never modify test assertions.\n\nOutput only the corrected code, wrapped in ```rust ```."
    )
}

/// Error analysis → patch → submit, with exponential backoff and a
/// fail-fast exit for unfixable error classes.
pub struct Refiner {
    llm: Arc<LlmGateway>,
    gateway: Arc<Gateway>,
    registry: ToolRegistry,
}

impl Refiner {
    /// Construct a refiner sharing the synthesizer's LLM gateway,
    /// registration gateway, and registry handle.
    pub fn new(llm: Arc<LlmGateway>, gateway: Arc<Gateway>, registry: ToolRegistry) -> Self {
        Self { llm, gateway, registry }
    }

    /// Run the repair loop for up to `max_attempts` tries.
    #[instrument(skip(self, code, task, trace, contract), fields(task = %task))]
    pub async fn refine(
        &self,
        code: &str,
        task: &str,
        trace: &ExecutionTrace,
        base_tool: Option<&ToolArtifact>,
        category: Category,
        contract: Option<&'static ToolContract>,
        max_attempts: u32,
    ) -> (Option<ToolArtifact>, Vec<ErrorReport>) {
        let mut reports = Vec::new();
        let mut history: Vec<PreviousAttempt> = Vec::new();
        let mut current_stderr = trace.std_err.clone().unwrap_or_default();
        let mut current_code = code.to_string();
        let task_id: String = task.chars().take(50).collect();

        for attempt in 1..=max_attempts {
            if is_unfixable(&current_stderr) {
                info!(attempt, "refiner fail-fast: unfixable error class");
                return (None, reports);
            }

            if attempt > 1 {
                let backoff = Duration::from_secs(2u64.saturating_pow(attempt - 1));
                tokio::time::sleep(backoff).await;
            }

            let (error_type, strategy) = classify_error(&current_stderr);
            info!(attempt, error_type, "analyzing failure");

            let analysis = self.llm.generate_tool_code(&analysis_prompt(&current_code, &current_stderr, error_type), None, None, None).await;
            let root_cause = if !analysis.text.trim().is_empty() {
                truncate_explanation(&analysis.text)
            } else if !analysis.thought.trim().is_empty() {
                truncate_explanation(&analysis.thought)
            } else {
                format!("{error_type}: {strategy}")
            };

            let error_report_id = match self.registry.insert_error_report(&trace.trace_id, error_type, &root_cause).await {
                Ok(id) => id,
                Err(e) => {
                    warn!(error = %e, "failed to persist error report");
                    0
                }
            };
            reports.push(ErrorReport {
                id: error_report_id,
                trace_id: trace.trace_id.clone(),
                error_type: error_type.to_string(),
                root_cause: root_cause.clone(),
                occurred_at: chrono::Utc::now(),
            });

            info!("generating patch");
            let needs_guide = error_type == "UnresolvedImport";
            let patch_outcome = self
                .llm
                .generate_tool_code(&patch_prompt(&current_code, task, error_type, &root_cause, &history, needs_guide), None, Some(category), contract)
                .await;

            let Some(patched_code) = patch_outcome.code else {
                history.push(PreviousAttempt {
                    approach: format!("attempt {attempt} patch generation"),
                    failure_reason: "LLM returned no code".to_string(),
                    stderr_excerpt: truncate_chars(&current_stderr, 500),
                });
                continue;
            };

            let submit = self.gateway.submit(&patched_code, category, contract, None, Some(task), &task_id, None, false).await;
            match submit {
                Ok(outcome) if outcome.ok => {
                    info!(attempt, "patch verified and registered");
                    if let (Some(tool), Some(base)) = (&outcome.tool, base_tool) {
                        let _ = self
                            .registry
                            .insert_tool_patch(error_report_id, base.id, &format!("Refined from v{}", base.semantic_version), &root_cause, Some(tool.id))
                            .await;
                    }
                    return (outcome.tool, reports);
                }
                Ok(outcome) => {
                    let detail = outcome
                        .report
                        .as_ref()
                        .and_then(|r| r.stages.last())
                        .and_then(|s| s.detail.clone())
                        .unwrap_or_else(|| "verification failed".to_string());
                    history.push(PreviousAttempt {
                        approach: format!("attempt {attempt} patch"),
                        failure_reason: detail.clone(),
                        stderr_excerpt: truncate_chars(&detail, 500),
                    });
                    current_stderr = detail;
                    current_code = patched_code;
                }
                Err(e) => {
                    let detail = e.to_string();
                    history.push(PreviousAttempt {
                        approach: format!("attempt {attempt} patch"),
                        failure_reason: detail.clone(),
                        stderr_excerpt: truncate_chars(&detail, 500),
                    });
                    current_stderr = detail;
                    current_code = patched_code;
                }
            }
        }

        info!(max_attempts, "refiner exhausted attempts");
        (None, reports)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_compile_errors() {
        assert_eq!(classify_error("error[E0308]: mismatched types").0, "CompileError");
    }

    #[test]
    fn classifies_unresolved_import() {
        assert_eq!(classify_error("unresolved import `reqwest`").0, "UnresolvedImport");
    }

    #[test]
    fn classifies_none_unwrap_panics() {
        assert_eq!(classify_error("called `Option::unwrap()` on a `None` value").0, "NoneUnwrap");
    }

    #[test]
    fn unknown_error_gets_generic_classification() {
        assert_eq!(classify_error("something totally unexpected").0, "UnknownError");
    }

    #[test]
    fn security_violations_are_unfixable() {
        assert!(is_unfixable("banned import `std::net`"));
        assert!(is_unfixable("unsafe code is not permitted"));
    }

    #[test]
    fn transient_network_errors_are_unfixable() {
        assert!(is_unfixable("connection timed out"));
    }

    #[test]
    fn ordinary_compile_errors_are_fixable() {
        assert!(!is_unfixable("error[E0308]: mismatched types"));
    }

    #[test]
    fn truncates_long_stderr_excerpts() {
        let long = "x".repeat(1000);
        let truncated = truncate_chars(&long, 500);
        assert!(truncated.chars().count() < long.chars().count());
    }
}
