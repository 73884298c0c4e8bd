#![forbid(unsafe_code)]
#![deny(missing_docs)]

//! **evo-gateway** – the single enforcement point through which all
//! tool registration passes. No other component may write to
//! [`evo_store::ToolRegistry`].
//!
//! `submit` strictly sequences LLM-produced code through verification,
//! risk-tier authorization, registration, and audit logging inside one
//! checkpoint. `verify_only` runs the same verification without the
//! registration side effect, for dry runs.

use std::path::PathBuf;

use evo_constraints::Constraints;
use evo_contracts::ToolContract;
use evo_gates::{CheckpointManager, EvolutionGatekeeper};
use evo_store::{default_permissions, ArtifactOrigin, ToolArtifact, ToolRegistry};
use evo_types::Category;
use evo_verifier::{IntegrationInputs, VerificationReport};
use once_cell::sync::Lazy;
use regex::Regex;
use tokio::io::AsyncWriteExt;
use tracing::{info, instrument, warn};

/// Errors the gateway can surface. A registration failure propagates
/// here rather than being swallowed — the caller observes the failed
/// checkpoint and the error both.
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    /// The submitted code had no recognizable function definition.
    #[error("could not find a function definition in the submitted code")]
    NoFunctionFound,
    /// The registry rejected the write.
    #[error(transparent)]
    Store(#[from] evo_store::StoreError),
    /// Checkpoint persistence failed.
    #[error(transparent)]
    Gate(#[from] evo_gates::GateError),
}

/// Result of [`Gateway::submit`].
#[derive(Debug)]
pub struct SubmitOutcome {
    /// Whether the tool was (or already is) registered.
    pub ok: bool,
    /// The registered artifact, present only when `ok`.
    pub tool: Option<ToolArtifact>,
    /// The full verification report, if verification ran.
    pub report: Option<VerificationReport>,
}

static FN_NAME_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?:pub\s+)?fn\s+([A-Za-z_][A-Za-z0-9_]*)").unwrap());

/// Extract the first function name from a Rust source snippet. A
/// light parse suffices — the executor's own `syn` pass is what
/// actually validates the code; this just needs a name to register
/// under.
pub fn extract_function_name(code: &str) -> Option<String> {
    FN_NAME_RE
        .captures_iter(code)
        .map(|c| c[1].to_string())
        .find(|name| name != "self_test" && name != "main")
}

fn derive_indicator(contract_id: &str) -> String {
    contract_id.strip_prefix("calc_").or_else(|| contract_id.strip_prefix("get_")).unwrap_or(contract_id).to_string()
}

/// Declared type string for a contract input name, used to build the
/// persisted argument schema. Mirrors the argument-shape mapping the
/// executor builds for harness generation, but only needs a
/// human-readable type name rather than an `ArgType` variant.
fn declared_type_for(name: &str) -> &'static str {
    match name {
        "prices" | "prices1" | "prices2" | "high" | "low" | "close" | "open" | "volume" => "Vec<f64>",
        "symbol" | "start" | "end" | "date" => "String",
        "period" | "window" | "k_period" | "d_period" | "fast_period" | "slow_period" | "signal_period" => "usize",
        _ => "f64",
    }
}

/// Build the `args_schema` persisted with a registered artifact: a
/// mapping of argument name to declared type string, derived from the
/// contract's required inputs.
fn args_schema_for(contract: Option<&ToolContract>) -> serde_json::Value {
    let Some(contract) = contract else {
        return serde_json::json!({});
    };
    let schema: std::collections::BTreeMap<&str, &str> =
        contract.required_inputs.iter().map(|name| (name.as_str(), declared_type_for(name))).collect();
    serde_json::to_value(schema).unwrap_or_else(|_| serde_json::json!({}))
}

/// The registration gateway. Owns the one checkpoint keyed on
/// `submit_tool`, the attempts log, and wiring between the verifier,
/// the gatekeeper, and the registry.
pub struct Gateway {
    registry: ToolRegistry,
    constraints: Constraints,
    gatekeeper: EvolutionGatekeeper,
    checkpoints: CheckpointManager,
    security_log_path: PathBuf,
    attempts_log_path: PathBuf,
}

impl Gateway {
    /// Construct a gateway around an already-open registry and
    /// gatekeeper.
    pub async fn new(
        registry: ToolRegistry,
        constraints: Constraints,
        gatekeeper: EvolutionGatekeeper,
        checkpoints_dir: impl Into<PathBuf>,
        security_log_path: impl Into<PathBuf>,
        attempts_log_path: impl Into<PathBuf>,
    ) -> Result<Self, GatewayError> {
        Ok(Self {
            registry,
            constraints,
            gatekeeper,
            checkpoints: CheckpointManager::new(checkpoints_dir).await?,
            security_log_path: security_log_path.into(),
            attempts_log_path: attempts_log_path.into(),
        })
    }

    async fn log_attempt(&self, entry: serde_json::Value) {
        if let Some(parent) = self.attempts_log_path.parent() {
            let _ = tokio::fs::create_dir_all(parent).await;
        }
        if let Ok(mut file) = tokio::fs::OpenOptions::new().create(true).append(true).open(&self.attempts_log_path).await {
            let line = format!("{}\n", entry);
            let _ = file.write_all(line.as_bytes()).await;
        }
    }

    fn resolve_contract(
        &self,
        explicit: Option<&'static ToolContract>,
        contract_id: Option<&str>,
        task: Option<&str>,
        category: Category,
    ) -> Option<&'static ToolContract> {
        explicit
            .or_else(|| contract_id.and_then(evo_contracts::get_contract))
            .or_else(|| task.and_then(|t| evo_contracts::infer_contract_from_query(t, category)))
    }

    /// Submit LLM-produced code for verification and, if it passes,
    /// registration. `force` bypasses the risk-tier authorization for
    /// trusted bootstrap paths (seeding) only.
    #[instrument(skip(self, code, contract, integration), fields(task_id))]
    #[allow(clippy::too_many_arguments)]
    pub async fn submit(
        &self,
        code: &str,
        category: Category,
        contract: Option<&'static ToolContract>,
        contract_id: Option<&str>,
        task: Option<&str>,
        task_id: &str,
        integration: Option<IntegrationInputs>,
        force: bool,
    ) -> Result<SubmitOutcome, GatewayError> {
        let func_name = extract_function_name(code).ok_or(GatewayError::NoFunctionFound)?;
        let resolved_contract = self.resolve_contract(contract, contract_id, task, category);

        self.log_attempt(serde_json::json!({
            "event": "SUBMIT", "task_id": task_id, "func_name": func_name, "category": category.to_string(),
        }))
        .await;

        let mut cp = self.checkpoints.open("submit_tool", serde_json::json!({"func_name": func_name, "task_id": task_id})).await?;

        let report = evo_verifier::verify_tool(
            &func_name,
            code,
            &func_name,
            category,
            resolved_contract,
            &self.constraints,
            task_id,
            &self.security_log_path,
            integration,
        )
        .await;

        if !report.passed {
            self.checkpoints.fail(&mut cp, "verification failed".to_string()).await?;
            self.log_attempt(serde_json::json!({
                "event": "VERIFICATION_FAILED", "task_id": task_id, "func_name": func_name,
                "final_stage": report.final_stage.as_u8(),
            }))
            .await;
            return Ok(SubmitOutcome { ok: false, tool: None, report: Some(report) });
        }

        let existing = self.registry.get_by_name(&func_name).await?;
        let action = if existing.is_none() { "create_tool" } else { "modify_tool" };
        let authorized = self.gatekeeper.authorize(action, &serde_json::json!({"func_name": func_name}), force).await;
        if !authorized {
            self.checkpoints.fail(&mut cp, format!("{action} denied")).await?;
            warn!(func_name, action, "gatekeeper denied tool registration");
            return Ok(SubmitOutcome { ok: false, tool: None, report: Some(report) });
        }

        let permissions = default_permissions(category);
        let origin = if force { ArtifactOrigin::Bootstrap } else { ArtifactOrigin::Generated };
        let args_schema = args_schema_for(resolved_contract);

        let artifact = self.registry.register(&func_name, code, args_schema, permissions, origin).await?;

        let indicator = resolved_contract.map(|c| derive_indicator(&c.contract_id));
        let data_type = resolved_contract.filter(|c| c.category == Category::Fetch).map(|_| "ohlcv".to_string());
        self.registry
            .update_schema(
                artifact.id,
                Some(category),
                resolved_contract.map(|c| c.contract_id.as_str()),
                indicator.as_deref(),
                data_type.as_deref(),
                report.final_stage,
            )
            .await?;

        self.checkpoints.complete(&mut cp).await?;
        self.log_attempt(serde_json::json!({
            "event": "REGISTERED", "task_id": task_id, "func_name": func_name, "tool_id": artifact.id,
        }))
        .await;
        info!(func_name, tool_id = artifact.id, "tool registered");

        let registered = self.registry.get_by_id(artifact.id).await?.ok_or(evo_store::StoreError::NotFound(artifact.id))?;
        Ok(SubmitOutcome { ok: true, tool: Some(registered), report: Some(report) })
    }

    /// Run verification without registering anything.
    pub async fn verify_only(
        &self,
        code: &str,
        category: Category,
        contract: Option<&'static ToolContract>,
        task_id: &str,
    ) -> (bool, VerificationReport) {
        let func_name = extract_function_name(code).unwrap_or_else(|| "unknown".to_string());
        let report = evo_verifier::verify_tool(&func_name, code, &func_name, category, contract, &self.constraints, task_id, &self.security_log_path, None).await;
        (report.passed, report)
    }

    /// Summarize the attempts log: total submissions, successes,
    /// failures, success rate.
    pub async fn stats(&self) -> GatewayStats {
        let Ok(content) = tokio::fs::read_to_string(&self.attempts_log_path).await else {
            return GatewayStats::default();
        };
        let mut total = 0u64;
        let mut success = 0u64;
        for line in content.lines() {
            let Ok(entry) = serde_json::from_str::<serde_json::Value>(line) else { continue };
            match entry.get("event").and_then(|v| v.as_str()) {
                Some("SUBMIT") => total += 1,
                Some("REGISTERED") => success += 1,
                _ => {}
            }
        }
        let failed = total.saturating_sub(success);
        let success_rate = if total == 0 { 0.0 } else { success as f64 / total as f64 };
        GatewayStats { total, success, failed, success_rate }
    }
}

/// Aggregate counts derived from the attempts log.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GatewayStats {
    /// Total `submit` calls attempted.
    pub total: u64,
    /// Calls that resulted in a registered artifact.
    pub success: u64,
    /// Calls that did not.
    pub failed: u64,
    /// `success / total`, or `0.0` if nothing was attempted yet.
    pub success_rate: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_first_public_function_name() {
        let code = "pub fn calc_rsi(prices: Vec<f64>, period: usize) -> f64 { 50.0 }\npub fn self_test() -> bool { true }";
        assert_eq!(extract_function_name(code).as_deref(), Some("calc_rsi"));
    }

    #[test]
    fn skips_self_test_and_main() {
        let code = "fn main() {}\nfn self_test() -> bool { true }\nfn calc_ma(prices: Vec<f64>) -> f64 { 1.0 }";
        assert_eq!(extract_function_name(code).as_deref(), Some("calc_ma"));
    }

    #[test]
    fn derives_indicator_from_contract_id() {
        assert_eq!(derive_indicator("calc_rsi"), "rsi");
        assert_eq!(derive_indicator("get_stock_hist"), "stock_hist");
    }

    async fn test_registry() -> (ToolRegistry, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let registry = ToolRegistry::in_memory(dir.path().to_path_buf()).await.unwrap();
        (registry, dir)
    }

    #[tokio::test]
    async fn submit_registers_passing_calculation_tool() {
        let (registry, dir) = test_registry().await;
        let constraints = Constraints::default();
        let gatekeeper = EvolutionGatekeeper::new(
            &constraints,
            dir.path().join("checkpoints"),
            dir.path().join("gate_audit.jsonl"),
            Box::new(evo_gates::AlwaysApprove),
        )
        .await
        .unwrap();
        let gateway = Gateway::new(
            registry,
            constraints,
            gatekeeper,
            dir.path().join("gw_checkpoints"),
            dir.path().join("security.log"),
            dir.path().join("attempts.jsonl"),
        )
        .await
        .unwrap();

        let code = "pub fn calc_rsi(prices: Vec<f64>, period: usize) -> f64 { 50.0 }\npub fn self_test() -> bool { true }";
        let contract = evo_contracts::get_contract("calc_rsi").unwrap();
        let outcome = gateway
            .submit(code, Category::Calculation, Some(contract), None, None, "task-1", None, false)
            .await
            .unwrap();

        assert!(outcome.ok);
        assert!(outcome.tool.is_some());
        assert_eq!(outcome.tool.unwrap().name, "calc_rsi");

        let stats = gateway.stats().await;
        assert_eq!(stats.total, 1);
        assert_eq!(stats.success, 1);
    }
}
