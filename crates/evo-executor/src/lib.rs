#![forbid(unsafe_code)]
#![deny(missing_docs)]

//! **evo-executor** – static AST security analysis plus isolated
//! subprocess execution of synthesized tools.
//!
//! Tools are single Rust source files (per `SPEC_FULL.md` §4.1's
//! host-language resolution). `static_check` walks a `syn::File` once
//! looking for banned imports, calls, attribute access, and string
//! literals. `execute` compiles the tool plus a generated harness with
//! `rustc`, runs the resulting binary in a fresh subprocess with a
//! wall-clock timeout, and recovers the sentinel-framed result.

mod harness;
mod security;

pub use harness::{ArgSpec, ArgType, ReturnType};
pub use security::{static_check, SecurityViolation, StaticCheckOutcome};

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use evo_constraints::Constraints;
use evo_types::Category;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tokio::time::timeout;
use tracing::{instrument, warn};

/// Exit code sentinel used when a subprocess is killed for exceeding
/// its wall-clock timeout.
pub const TIMEOUT_EXIT_CODE: i32 = 124;
/// Exit code sentinel used when the static security check rejects a
/// payload before any subprocess is spawned.
pub const SECURITY_REJECTION_EXIT_CODE: i32 = 126;

/// Outcome of one `execute` call.
#[derive(Debug, Clone)]
pub struct ExecutionResult {
    /// Process exit code (or one of the sentinels above).
    pub exit_code: i32,
    /// Captured standard output.
    pub stdout: String,
    /// Captured standard error.
    pub stderr: String,
    /// Wall-clock duration in milliseconds.
    pub duration_ms: i64,
    /// The recovered result payload, if any.
    pub result: Option<serde_json::Value>,
}

impl ExecutionResult {
    fn security_rejected(violation: &SecurityViolation) -> Self {
        Self {
            exit_code: SECURITY_REJECTION_EXIT_CODE,
            stdout: String::new(),
            stderr: format!("SecurityException: {violation}"),
            duration_ms: 0,
            result: None,
        }
    }

    fn timed_out(duration_ms: i64, timeout_sec: u64) -> Self {
        Self {
            exit_code: TIMEOUT_EXIT_CODE,
            stdout: String::new(),
            stderr: format!("Timeout: execution exceeded {timeout_sec}s"),
            duration_ms,
            result: None,
        }
    }
}

/// Recover the bracketed result, or acknowledge a `verify_only` pass.
/// Returns `None` on a non-success marker (caller decides what to do
/// based on exit code).
pub fn extract_result(stdout: &str) -> Option<serde_json::Value> {
    if stdout.contains("<<VERIFY_PASS>>") {
        return Some(serde_json::Value::Bool(true));
    }
    let start = stdout.find("<<RESULT_START>>")? + "<<RESULT_START>>".len();
    let end = stdout[start..].find("<<RESULT_END>>")? + start;
    let payload = stdout[start..end].trim();
    serde_json::from_str(payload).ok().or_else(|| Some(serde_json::Value::String(payload.to_string())))
}

/// Append a line to the append-only security violation log.
async fn log_security_violation(log_path: &std::path::Path, task_id: &str, violation: &SecurityViolation) {
    use tokio::io::AsyncWriteExt as _;
    if let Some(parent) = log_path.parent() {
        let _ = tokio::fs::create_dir_all(parent).await;
    }
    if let Ok(mut file) = tokio::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_path)
        .await
    {
        let line = format!(
            "{} task={} violation={}\n",
            chrono::Utc::now().to_rfc3339(),
            task_id,
            violation
        );
        let _ = file.write_all(line.as_bytes()).await;
    }
}

/// Run `static_check`, then — if it passes — compile and execute the
/// tool in an isolated subprocess with a wall-clock timeout.
///
/// `func_name == "verify_only"` runs the tool's own embedded
/// `self_test()` and treats a `true` return as success, mirroring the
/// original's "run the code's own main block" self-test convention.
#[instrument(skip(code, args, constraints), fields(func_name))]
#[allow(clippy::too_many_arguments)]
pub async fn execute(
    code: &str,
    func_name: &str,
    args: &serde_json::Value,
    args_schema: &[ArgSpec],
    return_type: ReturnType,
    category: Category,
    constraints: &Constraints,
    task_id: &str,
    security_log_path: &std::path::Path,
) -> ExecutionResult {
    let start = std::time::Instant::now();

    let outcome = static_check(
        code,
        &constraints.allowed_modules(category),
        &constraints.banned_modules(category),
        constraints.always_banned_calls(),
        constraints.always_banned_attributes(),
    );
    let violation = match outcome {
        StaticCheckOutcome::Safe => None,
        StaticCheckOutcome::Unsafe(v) => Some(v),
    };
    if let Some(violation) = violation {
        log_security_violation(security_log_path, task_id, &violation).await;
        return ExecutionResult::security_rejected(&violation);
    }

    let timeout_sec = constraints.execution.timeout_sec;
    match run_in_subprocess(code, func_name, args, args_schema, return_type, timeout_sec).await {
        Ok(mut result) => {
            result.duration_ms = start.elapsed().as_millis() as i64;
            result
        }
        Err(e) => {
            warn!(error = %e, "executor plumbing failure (compile/spawn), not a tool defect");
            ExecutionResult {
                exit_code: 1,
                stdout: String::new(),
                stderr: format!("executor error: {e}"),
                duration_ms: start.elapsed().as_millis() as i64,
                result: None,
            }
        }
    }
}

async fn run_in_subprocess(
    code: &str,
    func_name: &str,
    args: &serde_json::Value,
    args_schema: &[ArgSpec],
    return_type: ReturnType,
    timeout_sec: u64,
) -> anyhow::Result<ExecutionResult> {
    let start = std::time::Instant::now();
    let workdir = tempfile::tempdir()?;
    let main_rs = workdir.path().join("main.rs");
    let bin_path = workdir.path().join("tool_bin");
    let args_path = workdir.path().join("args.json");

    tokio::fs::write(&args_path, serde_json::to_vec(args)?).await?;
    let harness_src = harness::render_harness(code, func_name, args_schema, return_type);
    tokio::fs::write(&main_rs, harness_src).await?;

    let compile = Command::new("rustc")
        .arg("--edition")
        .arg("2021")
        .arg("-O")
        .arg("-o")
        .arg(&bin_path)
        .arg(&main_rs)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()
        .await?;

    if !compile.status.success() {
        return Ok(ExecutionResult {
            exit_code: compile.status.code().unwrap_or(1),
            stdout: String::from_utf8_lossy(&compile.stdout).to_string(),
            stderr: String::from_utf8_lossy(&compile.stderr).to_string(),
            duration_ms: start.elapsed().as_millis() as i64,
            result: None,
        });
    }

    let mut child = Command::new(&bin_path)
        .arg(&args_path)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()?;

    let wait_result = timeout(Duration::from_secs(timeout_sec), child.wait_with_output()).await;

    match wait_result {
        Ok(Ok(output)) => {
            let stdout = String::from_utf8_lossy(&output.stdout).to_string();
            let stderr = String::from_utf8_lossy(&output.stderr).to_string();
            let exit_code = output.status.code().unwrap_or(-1);
            let result = if exit_code == 0 { extract_result(&stdout) } else { None };
            Ok(ExecutionResult {
                exit_code,
                stdout,
                stderr,
                duration_ms: start.elapsed().as_millis() as i64,
                result,
            })
        }
        Ok(Err(e)) => Err(e.into()),
        Err(_) => Ok(ExecutionResult::timed_out(start.elapsed().as_millis() as i64, timeout_sec)),
    }
}

/// Path under the data directory where security violations are
/// appended, per `spec.md` §6's on-disk layout.
pub fn default_security_log_path(data_dir: &std::path::Path) -> PathBuf {
    data_dir.join("logs").join("security_violations.log")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_bracketed_result() {
        let stdout = "noise\n<<RESULT_START>>\n42.5\n<<RESULT_END>>\nmore noise";
        let v = extract_result(stdout).unwrap();
        assert_eq!(v, serde_json::json!(42.5));
    }

    #[test]
    fn extracts_verify_pass_as_true() {
        let stdout = "setup\n<<VERIFY_PASS>>\n";
        assert_eq!(extract_result(stdout), Some(serde_json::Value::Bool(true)));
    }

    #[test]
    fn missing_sentinel_yields_none() {
        assert_eq!(extract_result("nothing interesting here"), None);
    }
}
