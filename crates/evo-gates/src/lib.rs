#![forbid(unsafe_code)]
#![deny(missing_docs)]

//! **evo-gates** – action risk classification, durable checkpointing,
//! and dev/prod approval modes.
//!
//! Three tiers gate every action the engine takes: `AUTO` actions run
//! immediately, `CHECKPOINT` actions get a durable pending/completed/
//! failed record, and `APPROVAL` actions additionally require sign-off
//! before becoming a checkpoint. All three paths append a structured
//! line to the gate audit log.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use evo_constraints::Constraints;
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tracing::{instrument, warn};
use uuid::Uuid;

/// Risk tier an action is classified into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GateTier {
    /// Runs immediately, no checkpoint.
    Auto,
    /// Gets a durable pending/completed/failed checkpoint.
    Checkpoint,
    /// Requires approval before becoming a checkpoint.
    Approval,
}

/// Fixed action → tier table. Unknown actions default to `Approval`
/// (fail closed) rather than `Auto` — an unclassified action is an
/// engine bug, not license to skip the gate.
const ACTION_GATES: &[(&str, GateTier)] = &[
    ("read_tool", GateTier::Auto),
    ("list_tools", GateTier::Auto),
    ("execute_calculation", GateTier::Auto),
    ("lookup", GateTier::Auto),
    ("create_tool", GateTier::Checkpoint),
    ("modify_tool", GateTier::Checkpoint),
    ("execute_fetch", GateTier::Checkpoint),
    ("refine_tool", GateTier::Checkpoint),
    ("persist_tool", GateTier::Approval),
    ("delete_tool", GateTier::Approval),
    ("modify_verification_rules", GateTier::Approval),
    ("modify_constraints", GateTier::Approval),
];

/// Classify an action name into its risk tier.
pub fn classify_action(action: &str) -> GateTier {
    ACTION_GATES
        .iter()
        .find(|(name, _)| *name == action)
        .map(|(_, tier)| *tier)
        .unwrap_or(GateTier::Approval)
}

/// Dev lets `APPROVAL` actions through with a logged warning. Prod
/// consults an [`Approver`] with a timeout, denying on expiry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvolutionMode {
    /// Auto-approves `APPROVAL`-tier actions, logging a warning.
    Dev,
    /// Waits on an external approver, denying on timeout.
    Prod,
}

impl EvolutionMode {
    /// Parse from the constraints file's `default_mode` string.
    pub fn parse_or_default(s: &str) -> Self {
        match s.to_ascii_lowercase().as_str() {
            "prod" | "production" => EvolutionMode::Prod,
            _ => EvolutionMode::Dev,
        }
    }
}

/// Consulted for `APPROVAL`-tier actions in `prod` mode. A real
/// deployment wires this to an external callback or an interactive
/// prompt; tests and bootstrap wire in a canned answer.
#[async_trait]
pub trait Approver: Send + Sync {
    /// Decide whether `action` may proceed, given its context.
    async fn approve(&self, action: &str, context: &serde_json::Value) -> bool;
}

/// Denies every request. The safe default when no real approver is
/// wired in `prod` mode.
pub struct NullApprover;

#[async_trait]
impl Approver for NullApprover {
    async fn approve(&self, _action: &str, _context: &serde_json::Value) -> bool {
        false
    }
}

/// Lifecycle state of a checkpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckpointStatus {
    /// Action in flight.
    Pending,
    /// Action succeeded.
    Completed,
    /// Action failed or was denied.
    Failed,
}

/// A durable record of one gated action, per `spec.md` §3.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Checkpoint {
    /// Unique id, also the filename stem.
    pub id: Uuid,
    /// Action name this checkpoint guards.
    pub action: String,
    /// Caller-supplied context, serialized verbatim.
    pub context: serde_json::Value,
    /// Current lifecycle state.
    pub status: CheckpointStatus,
    /// When the checkpoint was opened.
    pub created_at: chrono::DateTime<Utc>,
    /// When the checkpoint last changed state.
    pub updated_at: chrono::DateTime<Utc>,
    /// Error text, set only when `status == Failed`.
    pub error: Option<String>,
}

/// Errors raised by checkpoint persistence.
#[derive(Debug, thiserror::Error)]
pub enum GateError {
    /// Writing or reading a checkpoint file failed.
    #[error("checkpoint io error at {path}: {source}")]
    Io {
        /// Path that failed.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },
    /// Encoding/decoding a checkpoint as JSON failed.
    #[error("checkpoint serde error: {0}")]
    Serde(#[from] serde_json::Error),
    /// The gatekeeper denied the action.
    #[error("action `{action}` denied")]
    Denied {
        /// The denied action's name.
        action: String,
    },
}

/// Append-only store of checkpoint files under `<data>/checkpoints/`.
pub struct CheckpointManager {
    dir: PathBuf,
}

impl CheckpointManager {
    /// Construct a manager rooted at `dir`, creating it if absent.
    pub async fn new(dir: impl Into<PathBuf>) -> Result<Self, GateError> {
        let dir = dir.into();
        tokio::fs::create_dir_all(&dir).await.map_err(|e| GateError::Io { path: dir.clone(), source: e })?;
        Ok(Self { dir })
    }

    fn path_for(&self, id: Uuid) -> PathBuf {
        self.dir.join(format!("{id}.json"))
    }

    async fn write(&self, cp: &Checkpoint) -> Result<(), GateError> {
        let path = self.path_for(cp.id);
        let body = serde_json::to_vec_pretty(cp)?;
        tokio::fs::write(&path, body).await.map_err(|e| GateError::Io { path, source: e })
    }

    /// Open a new checkpoint in `pending` state and persist it.
    pub async fn open(&self, action: &str, context: serde_json::Value) -> Result<Checkpoint, GateError> {
        let now = Utc::now();
        let cp = Checkpoint {
            id: Uuid::new_v4(),
            action: action.to_string(),
            context,
            status: CheckpointStatus::Pending,
            created_at: now,
            updated_at: now,
            error: None,
        };
        self.write(&cp).await?;
        Ok(cp)
    }

    /// Mark a checkpoint completed and persist it.
    pub async fn complete(&self, cp: &mut Checkpoint) -> Result<(), GateError> {
        cp.status = CheckpointStatus::Completed;
        cp.updated_at = Utc::now();
        self.write(cp).await
    }

    /// Mark a checkpoint failed with `error` and persist it.
    pub async fn fail(&self, cp: &mut Checkpoint, error: String) -> Result<(), GateError> {
        cp.status = CheckpointStatus::Failed;
        cp.error = Some(error);
        cp.updated_at = Utc::now();
        self.write(cp).await
    }

    /// Scan the checkpoint directory for anything still `pending`
    /// (a crash mid-action) and mark it failed. Returns the ids
    /// recovered. Intended to run once at startup.
    pub async fn recover(&self) -> Result<Vec<Uuid>, GateError> {
        let mut recovered = Vec::new();
        let mut entries = match tokio::fs::read_dir(&self.dir).await {
            Ok(e) => e,
            Err(e) => return Err(GateError::Io { path: self.dir.clone(), source: e }),
        };
        while let Some(entry) = entries.next_entry().await.map_err(|e| GateError::Io { path: self.dir.clone(), source: e })? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let Ok(bytes) = tokio::fs::read(&path).await else { continue };
            let Ok(mut cp) = serde_json::from_slice::<Checkpoint>(&bytes) else { continue };
            if cp.status == CheckpointStatus::Pending {
                self.fail(&mut cp, "recovered at startup: process exited mid-action".to_string()).await?;
                recovered.push(cp.id);
            }
        }
        Ok(recovered)
    }
}

/// Classifies actions, gates `APPROVAL`-tier ones, and wraps
/// `CHECKPOINT`/`APPROVAL` actions in a durable checkpoint.
pub struct EvolutionGatekeeper {
    mode: EvolutionMode,
    checkpoints: CheckpointManager,
    approver: Box<dyn Approver>,
    approval_timeout: Duration,
    audit_log_path: PathBuf,
}

impl EvolutionGatekeeper {
    /// Construct a gatekeeper from the engine's constraints and an
    /// approval callback (ignored in `dev` mode).
    pub async fn new(
        constraints: &Constraints,
        checkpoints_dir: impl Into<PathBuf>,
        audit_log_path: impl Into<PathBuf>,
        approver: Box<dyn Approver>,
    ) -> Result<Self, GateError> {
        Ok(Self {
            mode: EvolutionMode::parse_or_default(&constraints.evolution_gates.default_mode),
            checkpoints: CheckpointManager::new(checkpoints_dir).await?,
            approver,
            approval_timeout: Duration::from_secs(constraints.evolution_gates.approval_timeout_sec),
            audit_log_path: audit_log_path.into(),
        })
    }

    async fn audit(&self, entry: serde_json::Value) {
        if let Some(parent) = self.audit_log_path.parent() {
            let _ = tokio::fs::create_dir_all(parent).await;
        }
        if let Ok(mut file) = tokio::fs::OpenOptions::new().create(true).append(true).open(&self.audit_log_path).await {
            let line = format!("{}\n", entry);
            let _ = file.write_all(line.as_bytes()).await;
        }
    }

    /// Run `action` through the gate. `fn_` executes only if the
    /// action is permitted to proceed (`Auto`, or `Checkpoint`/
    /// `Approval` once approved).
    #[instrument(skip(self, context, fn_), fields(action))]
    pub async fn execute<F, Fut, T>(&self, action: &str, context: serde_json::Value, fn_: F) -> Result<(bool, Option<T>), GateError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = anyhow::Result<T>>,
    {
        let tier = classify_action(action);

        match tier {
            GateTier::Auto => {
                self.audit(serde_json::json!({
                    "ts": Utc::now().to_rfc3339(), "action": action, "tier": "auto", "outcome": "ran",
                }))
                .await;
                let result = fn_().await.map_err(|e| GateError::Denied { action: format!("{action}: {e}") })?;
                Ok((true, Some(result)))
            }
            GateTier::Checkpoint => self.run_as_checkpoint(action, context, fn_).await,
            GateTier::Approval => {
                let approved = self.decide_approval(action, &context).await;
                if !approved {
                    self.audit(serde_json::json!({
                        "ts": Utc::now().to_rfc3339(), "action": action, "tier": "approval", "outcome": "denied",
                    }))
                    .await;
                    return Ok((false, None));
                }
                self.run_as_checkpoint(action, context, fn_).await
            }
        }
    }

    async fn decide_approval(&self, action: &str, context: &serde_json::Value) -> bool {
        match self.mode {
            EvolutionMode::Dev => {
                warn!(action, "APPROVAL-tier action auto-approved in dev mode");
                true
            }
            EvolutionMode::Prod => {
                tokio::time::timeout(self.approval_timeout, self.approver.approve(action, context)).await.unwrap_or(false)
            }
        }
    }

    /// Decide whether `action` may proceed, without creating a
    /// checkpoint — for callers (like the gateway) that manage their
    /// own single checkpoint spanning a larger sequence. `Auto` and
    /// `Checkpoint` tiers always authorize; `Approval` consults the
    /// mode/approver exactly as [`Self::execute`] would, with `force`
    /// bypassing the check entirely for trusted bootstrap paths.
    pub async fn authorize(&self, action: &str, context: &serde_json::Value, force: bool) -> bool {
        if force {
            return true;
        }
        match classify_action(action) {
            GateTier::Auto | GateTier::Checkpoint => true,
            GateTier::Approval => {
                let approved = self.decide_approval(action, context).await;
                self.audit(serde_json::json!({
                    "ts": Utc::now().to_rfc3339(), "action": action, "tier": "approval",
                    "outcome": if approved { "approved" } else { "denied" },
                }))
                .await;
                approved
            }
        }
    }

    async fn run_as_checkpoint<F, Fut, T>(&self, action: &str, context: serde_json::Value, fn_: F) -> Result<(bool, Option<T>), GateError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = anyhow::Result<T>>,
    {
        let mut cp = self.checkpoints.open(action, context).await?;
        self.audit(serde_json::json!({
            "ts": Utc::now().to_rfc3339(), "action": action, "tier": "checkpoint", "outcome": "pending", "checkpoint_id": cp.id,
        }))
        .await;

        match fn_().await {
            Ok(result) => {
                self.checkpoints.complete(&mut cp).await?;
                self.audit(serde_json::json!({
                    "ts": Utc::now().to_rfc3339(), "action": action, "tier": "checkpoint", "outcome": "completed", "checkpoint_id": cp.id,
                }))
                .await;
                Ok((true, Some(result)))
            }
            Err(e) => {
                self.checkpoints.fail(&mut cp, e.to_string()).await?;
                self.audit(serde_json::json!({
                    "ts": Utc::now().to_rfc3339(), "action": action, "tier": "checkpoint", "outcome": "failed", "checkpoint_id": cp.id, "error": e.to_string(),
                }))
                .await;
                Err(GateError::Denied { action: format!("{action}: {e}") })
            }
        }
    }
}

/// A fake approver that always approves, used in bootstrap and tests.
pub struct AlwaysApprove;

#[async_trait]
impl Approver for AlwaysApprove {
    async fn approve(&self, _action: &str, _context: &serde_json::Value) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_constraints() -> Constraints {
        Constraints::default()
    }

    #[test]
    fn classifies_known_actions() {
        assert_eq!(classify_action("read_tool"), GateTier::Auto);
        assert_eq!(classify_action("create_tool"), GateTier::Checkpoint);
        assert_eq!(classify_action("persist_tool"), GateTier::Approval);
    }

    #[test]
    fn unknown_action_defaults_to_approval() {
        assert_eq!(classify_action("something_new"), GateTier::Approval);
    }

    #[tokio::test]
    async fn checkpoint_completes_on_success() {
        let dir = tempfile::tempdir().unwrap();
        let gate = EvolutionGatekeeper::new(
            &test_constraints(),
            dir.path().join("checkpoints"),
            dir.path().join("gate_audit.jsonl"),
            Box::new(NullApprover),
        )
        .await
        .unwrap();

        let (ok, result) = gate
            .execute("create_tool", serde_json::json!({"name": "calc_rsi"}), || async { Ok::<_, anyhow::Error>(42) })
            .await
            .unwrap();
        assert!(ok);
        assert_eq!(result, Some(42));
    }

    #[tokio::test]
    async fn dev_mode_auto_approves_approval_tier() {
        let dir = tempfile::tempdir().unwrap();
        let gate = EvolutionGatekeeper::new(
            &test_constraints(),
            dir.path().join("checkpoints"),
            dir.path().join("gate_audit.jsonl"),
            Box::new(NullApprover),
        )
        .await
        .unwrap();

        let (ok, _) = gate
            .execute("persist_tool", serde_json::json!({}), || async { Ok::<_, anyhow::Error>(()) })
            .await
            .unwrap();
        assert!(ok);
    }

    #[tokio::test]
    async fn prod_mode_denies_without_approver() {
        let dir = tempfile::tempdir().unwrap();
        let mut constraints = test_constraints();
        constraints.evolution_gates.default_mode = "prod".to_string();
        let gate = EvolutionGatekeeper::new(
            &constraints,
            dir.path().join("checkpoints"),
            dir.path().join("gate_audit.jsonl"),
            Box::new(NullApprover),
        )
        .await
        .unwrap();

        let (ok, result) = gate
            .execute("persist_tool", serde_json::json!({}), || async { Ok::<_, anyhow::Error>(()) })
            .await
            .unwrap();
        assert!(!ok);
        assert_eq!(result, None);
    }

    #[tokio::test]
    async fn recover_marks_pending_checkpoints_failed() {
        let dir = tempfile::tempdir().unwrap();
        let cps = CheckpointManager::new(dir.path()).await.unwrap();
        let cp = cps.open("create_tool", serde_json::json!({})).await.unwrap();

        let recovered = cps.recover().await.unwrap();
        assert_eq!(recovered, vec![cp.id]);
    }
}
