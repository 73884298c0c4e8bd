#![forbid(unsafe_code)]
#![deny(missing_docs)]

//! **evo-store** – content-addressed tool library.
//!
//! Architecture: "metadata in the relational store, payload on disk."
//! Five tables: `tool_artifacts`, `execution_traces`, `error_reports`,
//! `tool_patches`, `batch_merge_records`. [`ToolRegistry`] is the only
//! type in this crate allowed to write `tool_artifacts`; everything
//! above it (the gateway) is expected to be the only caller.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use evo_types::{Category, Permission, ToolStatus, VerificationStage};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use sqlx::{Row, SqlitePool};
use tracing::{debug, info, instrument};

/// Errors produced by the registry.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The underlying sqlite pool returned an error.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    /// Writing the code payload to disk failed.
    #[error("failed to write artifact payload to {path}: {source}")]
    Disk {
        /// Path that failed to write.
        path: String,
        /// Underlying IO error.
        #[source]
        source: std::io::Error,
    },
    /// A requested artifact id does not exist.
    #[error("no artifact with id {0}")]
    NotFound(i64),
}

/// Result alias for this crate.
pub type StoreResult<T> = Result<T, StoreError>;

/// A versioned, content-addressed tool record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolArtifact {
    /// Row id.
    pub id: i64,
    /// Tool function name.
    pub name: String,
    /// Semantic version, monotonic per name.
    pub semantic_version: String,
    /// Path to the code payload, relative to the artifacts root.
    pub file_path: String,
    /// SHA-256 hex digest of the code payload.
    pub content_hash: String,
    /// The code payload itself (kept in the DB too, for convenience).
    pub code_content: String,
    /// Declared argument name -> type-hint string.
    pub args_schema: serde_json::Value,
    /// Ids of artifacts this one depends on.
    pub dependencies: Vec<i64>,
    /// Declared execution permissions.
    pub permissions: Vec<Permission>,
    /// Lifecycle status.
    pub status: ToolStatus,
    /// Ids of the parent artifact(s) this was derived from (refinement).
    pub parent_tool_ids: Vec<i64>,
    /// Category, once known.
    pub category: Option<Category>,
    /// Contract id, once known.
    pub contract_id: Option<String>,
    /// Indicator tag (e.g. "rsi"), once known.
    pub indicator: Option<String>,
    /// Data-type tag (e.g. "price", "ohlcv"), once known.
    pub data_type: Option<String>,
    /// Highest verification stage reached.
    pub verification_stage: VerificationStage,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
}

/// Immutable record of one execution attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionTrace {
    /// Trace id.
    pub trace_id: String,
    /// Task id this trace belongs to.
    pub task_id: String,
    /// Tool id, if one was invoked.
    pub tool_id: Option<i64>,
    /// Input arguments passed to the tool.
    pub input_args: serde_json::Value,
    /// Truncated representation of the output.
    pub output_repr: String,
    /// Process exit code.
    pub exit_code: i32,
    /// Captured stdout.
    pub std_out: Option<String>,
    /// Captured stderr.
    pub std_err: Option<String>,
    /// Wall-clock duration, in milliseconds.
    pub execution_time_ms: i64,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
}

/// LLM-analyzed error report created by the refiner.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorReport {
    /// Row id.
    pub id: i64,
    /// Trace this report analyzes.
    pub trace_id: String,
    /// Classified error kind (e.g. "TypeError").
    pub error_type: String,
    /// LLM-produced root-cause explanation.
    pub root_cause: String,
    /// Creation timestamp.
    pub occurred_at: DateTime<Utc>,
}

/// Repair record linking an error to its fix.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolPatch {
    /// Row id.
    pub id: i64,
    /// Error report this patch addresses.
    pub error_report_id: i64,
    /// Tool id the patch was applied against.
    pub base_tool_id: i64,
    /// Diff or description of the change.
    pub patch_diff: String,
    /// Short rationale summary.
    pub rationale: String,
    /// Id of the newly registered, patched tool.
    pub resulting_tool_id: Option<i64>,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
}

/// Tool consolidation record created by the deduplicator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchMergeRecord {
    /// Row id.
    pub id: i64,
    /// Ids of the demoted artifacts.
    pub source_tool_ids: Vec<i64>,
    /// Id of the artifact kept as canonical.
    pub canonical_tool_id: Option<i64>,
    /// Strategy tag, e.g. `"contract_dedup"`.
    pub strategy: String,
    /// Free-form summary statistics.
    pub regression_stats: serde_json::Value,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
}

/// Which artifacts subdirectory a payload belongs in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArtifactOrigin {
    /// Seeded at startup, trusted without gatekeeper review.
    Bootstrap,
    /// Produced by the synthesis/refinement loop.
    Generated,
}

impl ArtifactOrigin {
    fn dirname(self) -> &'static str {
        match self {
            ArtifactOrigin::Bootstrap => "bootstrap",
            ArtifactOrigin::Generated => "generated",
        }
    }
}

fn compute_hash(code: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(code.as_bytes());
    hex::encode(hasher.finalize())
}

/// Bump a `major.minor.patch` string by one patch version, defaulting
/// to `0.1.0` if `current` is `None`.
fn bump_patch(current: Option<&str>) -> String {
    let (major, minor, patch) = current
        .and_then(|v| {
            let mut parts = v.split('.');
            let major: u32 = parts.next()?.parse().ok()?;
            let minor: u32 = parts.next()?.parse().ok()?;
            let patch: u32 = parts.next()?.parse().ok()?;
            Some((major, minor, patch))
        })
        .unwrap_or((0, 0, 0));
    if current.is_none() {
        "0.1.0".to_string()
    } else {
        format!("{major}.{minor}.{}", patch + 1)
    }
}

/// The content-addressed tool registry. Cheap to clone — `SqlitePool`
/// is itself a handle shared across its connections.
#[derive(Clone)]
pub struct ToolRegistry {
    pool: SqlitePool,
    artifacts_root: PathBuf,
}

impl ToolRegistry {
    /// Open (creating if needed) the sqlite database at `db_path`,
    /// running migrations, and rooting on-disk payloads at
    /// `artifacts_root/{bootstrap,generated}/`.
    #[instrument(skip(db_path, artifacts_root))]
    pub async fn open<P: AsRef<Path>>(db_path: P, artifacts_root: P) -> StoreResult<Self> {
        let url = format!("sqlite://{}?mode=rwc", db_path.as_ref().display());
        let pool = SqlitePool::connect(&url).await?;
        let registry = Self {
            pool,
            artifacts_root: artifacts_root.as_ref().to_path_buf(),
        };
        registry.migrate().await?;
        for origin in [ArtifactOrigin::Bootstrap, ArtifactOrigin::Generated] {
            tokio::fs::create_dir_all(registry.artifacts_root.join(origin.dirname()))
                .await
                .map_err(|source| StoreError::Disk {
                    path: registry.artifacts_root.join(origin.dirname()).display().to_string(),
                    source,
                })?;
        }
        Ok(registry)
    }

    /// Open an in-memory database, for tests.
    pub async fn in_memory(artifacts_root: PathBuf) -> StoreResult<Self> {
        let pool = SqlitePool::connect("sqlite::memory:").await?;
        let registry = Self { pool, artifacts_root };
        registry.migrate().await?;
        for origin in [ArtifactOrigin::Bootstrap, ArtifactOrigin::Generated] {
            tokio::fs::create_dir_all(registry.artifacts_root.join(origin.dirname()))
                .await
                .ok();
        }
        Ok(registry)
    }

    async fn migrate(&self) -> StoreResult<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS tool_artifacts (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL,
                semantic_version TEXT NOT NULL,
                file_path TEXT NOT NULL,
                content_hash TEXT NOT NULL UNIQUE,
                code_content TEXT NOT NULL,
                args_schema TEXT NOT NULL,
                dependencies TEXT NOT NULL,
                permissions TEXT NOT NULL,
                status TEXT NOT NULL,
                parent_tool_ids TEXT NOT NULL,
                category TEXT,
                contract_id TEXT,
                indicator TEXT,
                data_type TEXT,
                verification_stage INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_artifacts_name ON tool_artifacts(name)")
            .execute(&self.pool)
            .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_artifacts_status ON tool_artifacts(status)")
            .execute(&self.pool)
            .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_artifacts_contract ON tool_artifacts(contract_id)")
            .execute(&self.pool)
            .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS execution_traces (
                trace_id TEXT PRIMARY KEY,
                task_id TEXT NOT NULL,
                tool_id INTEGER,
                input_args TEXT NOT NULL,
                output_repr TEXT NOT NULL,
                exit_code INTEGER NOT NULL,
                std_out TEXT,
                std_err TEXT,
                execution_time_ms INTEGER NOT NULL,
                created_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS error_reports (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                trace_id TEXT NOT NULL,
                error_type TEXT NOT NULL,
                root_cause TEXT NOT NULL,
                occurred_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS tool_patches (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                error_report_id INTEGER NOT NULL,
                base_tool_id INTEGER NOT NULL,
                patch_diff TEXT NOT NULL,
                rationale TEXT NOT NULL,
                resulting_tool_id INTEGER,
                created_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS batch_merge_records (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                source_tool_ids TEXT NOT NULL,
                canonical_tool_id INTEGER,
                strategy TEXT NOT NULL,
                regression_stats TEXT NOT NULL,
                created_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    fn row_to_artifact(row: &sqlx::sqlite::SqliteRow) -> StoreResult<ToolArtifact> {
        let status_str: String = row.try_get("status")?;
        let status = match status_str.as_str() {
            "verified" => ToolStatus::Verified,
            "deprecated" => ToolStatus::Deprecated,
            "failed" => ToolStatus::Failed,
            _ => ToolStatus::Provisional,
        };
        let permissions: Vec<String> = serde_json::from_str(row.try_get::<String, _>("permissions")?.as_str())
            .unwrap_or_default();
        let permissions = permissions
            .into_iter()
            .filter_map(|p| match p.as_str() {
                "network_read" => Some(Permission::NetworkRead),
                "file_write" => Some(Permission::FileWrite),
                _ => Some(Permission::CalcOnly),
            })
            .collect();

        Ok(ToolArtifact {
            id: row.try_get("id")?,
            name: row.try_get("name")?,
            semantic_version: row.try_get("semantic_version")?,
            file_path: row.try_get("file_path")?,
            content_hash: row.try_get("content_hash")?,
            code_content: row.try_get("code_content")?,
            args_schema: serde_json::from_str(row.try_get::<String, _>("args_schema")?.as_str())
                .unwrap_or(serde_json::json!({})),
            dependencies: serde_json::from_str(row.try_get::<String, _>("dependencies")?.as_str())
                .unwrap_or_default(),
            permissions,
            status,
            parent_tool_ids: serde_json::from_str(row.try_get::<String, _>("parent_tool_ids")?.as_str())
                .unwrap_or_default(),
            category: row
                .try_get::<Option<String>, _>("category")?
                .map(|c| Category::parse_or_default(&c)),
            contract_id: row.try_get("contract_id")?,
            indicator: row.try_get("indicator")?,
            data_type: row.try_get("data_type")?,
            verification_stage: match row.try_get::<i64, _>("verification_stage")? {
                4 => VerificationStage::Integration,
                3 => VerificationStage::ContractValid,
                2 => VerificationStage::SelfTest,
                1 => VerificationStage::AstSecurity,
                _ => VerificationStage::None,
            },
            created_at: row.try_get("created_at")?,
        })
    }

    /// Register a code payload, deduplicating by content hash.
    ///
    /// If an artifact with the same hash already exists it is returned
    /// unchanged (duplicate content is not an error). Otherwise the
    /// next semantic version for `name` is computed, the payload is
    /// written to disk, and the metadata row is inserted.
    #[instrument(skip(self, code))]
    pub async fn register(
        &self,
        name: &str,
        code: &str,
        args_schema: serde_json::Value,
        permissions: Vec<Permission>,
        origin: ArtifactOrigin,
    ) -> StoreResult<ToolArtifact> {
        let hash = compute_hash(code);
        if let Some(existing) = self.get_by_hash(&hash).await? {
            debug!(hash = %hash, "duplicate content hash, returning existing artifact");
            return Ok(existing);
        }

        let current_version = sqlx::query("SELECT MAX(semantic_version) as v FROM tool_artifacts WHERE name = ?")
            .bind(name)
            .fetch_one(&self.pool)
            .await?
            .try_get::<Option<String>, _>("v")?;
        let version = bump_patch(current_version.as_deref());

        let hash8 = &hash[..8];
        let rel_path = format!("{}/{}_v{}_{}.rs", origin.dirname(), name, version, hash8);
        let abs_path = self.artifacts_root.join(&rel_path);
        tokio::fs::write(&abs_path, code)
            .await
            .map_err(|source| StoreError::Disk {
                path: abs_path.display().to_string(),
                source,
            })?;

        let permissions_json = serde_json::to_string(
            &permissions
                .iter()
                .map(|p| match p {
                    Permission::CalcOnly => "calc_only",
                    Permission::NetworkRead => "network_read",
                    Permission::FileWrite => "file_write",
                })
                .collect::<Vec<_>>(),
        )
        .unwrap_or_else(|_| "[]".to_string());

        let created_at = Utc::now();
        let id = sqlx::query(
            r#"
            INSERT INTO tool_artifacts
                (name, semantic_version, file_path, content_hash, code_content,
                 args_schema, dependencies, permissions, status, parent_tool_ids,
                 verification_stage, created_at)
            VALUES (?, ?, ?, ?, ?, ?, '[]', ?, 'provisional', '[]', 0, ?)
            "#,
        )
        .bind(name)
        .bind(&version)
        .bind(&rel_path)
        .bind(&hash)
        .bind(code)
        .bind(args_schema.to_string())
        .bind(permissions_json)
        .bind(created_at.to_rfc3339())
        .execute(&self.pool)
        .await?
        .last_insert_rowid();

        info!(name, version = %version, id, "registered new tool artifact");
        self.get_by_id(id).await?.ok_or(StoreError::NotFound(id))
    }

    /// Fetch an artifact by row id.
    pub async fn get_by_id(&self, id: i64) -> StoreResult<Option<ToolArtifact>> {
        let row = sqlx::query("SELECT * FROM tool_artifacts WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(Self::row_to_artifact).transpose()
    }

    /// Fetch the latest version of the artifact registered under `name`.
    pub async fn get_by_name(&self, name: &str) -> StoreResult<Option<ToolArtifact>> {
        let row = sqlx::query(
            "SELECT * FROM tool_artifacts WHERE name = ? ORDER BY created_at DESC LIMIT 1",
        )
        .bind(name)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(Self::row_to_artifact).transpose()
    }

    /// Fetch an artifact by its content hash.
    pub async fn get_by_hash(&self, hash: &str) -> StoreResult<Option<ToolArtifact>> {
        let row = sqlx::query("SELECT * FROM tool_artifacts WHERE content_hash = ?")
            .bind(hash)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(Self::row_to_artifact).transpose()
    }

    /// All artifacts sharing a contract id, in insertion order.
    pub async fn find_by_contract_id(&self, contract_id: &str) -> StoreResult<Vec<ToolArtifact>> {
        let rows = sqlx::query("SELECT * FROM tool_artifacts WHERE contract_id = ? ORDER BY id")
            .bind(contract_id)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(Self::row_to_artifact).collect()
    }

    /// Update the schema metadata fields populated after LLM-assisted
    /// extraction (category, indicator, data type, input requirements).
    pub async fn update_schema(
        &self,
        id: i64,
        category: Option<Category>,
        contract_id: Option<&str>,
        indicator: Option<&str>,
        data_type: Option<&str>,
        verification_stage: VerificationStage,
    ) -> StoreResult<()> {
        sqlx::query(
            r#"
            UPDATE tool_artifacts
            SET category = ?, contract_id = ?, indicator = ?, data_type = ?, verification_stage = ?
            WHERE id = ?
            "#,
        )
        .bind(category.map(|c| c.to_string()))
        .bind(contract_id)
        .bind(indicator)
        .bind(data_type)
        .bind(verification_stage.as_u8() as i64)
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Update an artifact's lifecycle status.
    pub async fn update_status(&self, id: i64, status: ToolStatus) -> StoreResult<()> {
        sqlx::query("UPDATE tool_artifacts SET status = ? WHERE id = ?")
            .bind(status.to_string())
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// List artifacts, optionally filtered by status.
    pub async fn list(&self, status_filter: Option<ToolStatus>) -> StoreResult<Vec<ToolArtifact>> {
        let rows = match status_filter {
            Some(status) => {
                sqlx::query("SELECT * FROM tool_artifacts WHERE status = ? ORDER BY id")
                    .bind(status.to_string())
                    .fetch_all(&self.pool)
                    .await?
            }
            None => {
                sqlx::query("SELECT * FROM tool_artifacts ORDER BY id")
                    .fetch_all(&self.pool)
                    .await?
            }
        };
        rows.iter().map(Self::row_to_artifact).collect()
    }

    /// Append an execution trace. Traces are never mutated afterward.
    pub async fn insert_trace(&self, trace: &ExecutionTrace) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO execution_traces
                (trace_id, task_id, tool_id, input_args, output_repr, exit_code,
                 std_out, std_err, execution_time_ms, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&trace.trace_id)
        .bind(&trace.task_id)
        .bind(trace.tool_id)
        .bind(trace.input_args.to_string())
        .bind(&trace.output_repr)
        .bind(trace.exit_code)
        .bind(&trace.std_out)
        .bind(&trace.std_err)
        .bind(trace.execution_time_ms)
        .bind(trace.created_at.to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Append an error report, returning its assigned id.
    pub async fn insert_error_report(
        &self,
        trace_id: &str,
        error_type: &str,
        root_cause: &str,
    ) -> StoreResult<i64> {
        let id = sqlx::query(
            "INSERT INTO error_reports (trace_id, error_type, root_cause, occurred_at) VALUES (?, ?, ?, ?)",
        )
        .bind(trace_id)
        .bind(error_type)
        .bind(root_cause)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?
        .last_insert_rowid();
        Ok(id)
    }

    /// Append a tool patch record.
    pub async fn insert_tool_patch(
        &self,
        error_report_id: i64,
        base_tool_id: i64,
        patch_diff: &str,
        rationale: &str,
        resulting_tool_id: Option<i64>,
    ) -> StoreResult<i64> {
        let id = sqlx::query(
            r#"
            INSERT INTO tool_patches
                (error_report_id, base_tool_id, patch_diff, rationale, resulting_tool_id, created_at)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(error_report_id)
        .bind(base_tool_id)
        .bind(patch_diff)
        .bind(rationale)
        .bind(resulting_tool_id)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?
        .last_insert_rowid();
        Ok(id)
    }

    /// Append a batch merge record.
    pub async fn insert_merge_record(
        &self,
        source_tool_ids: &[i64],
        canonical_tool_id: Option<i64>,
        strategy: &str,
        regression_stats: serde_json::Value,
    ) -> StoreResult<BatchMergeRecord> {
        let created_at = Utc::now();
        let id = sqlx::query(
            r#"
            INSERT INTO batch_merge_records
                (source_tool_ids, canonical_tool_id, strategy, regression_stats, created_at)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(serde_json::to_string(source_tool_ids).unwrap())
        .bind(canonical_tool_id)
        .bind(strategy)
        .bind(regression_stats.to_string())
        .bind(created_at.to_rfc3339())
        .execute(&self.pool)
        .await?
        .last_insert_rowid();

        Ok(BatchMergeRecord {
            id,
            source_tool_ids: source_tool_ids.to_vec(),
            canonical_tool_id,
            strategy: strategy.to_string(),
            regression_stats,
            created_at,
        })
    }
}

/// Map a category to its default permission set, per `spec.md` §4.7.
pub fn default_permissions(category: Category) -> Vec<Permission> {
    match category {
        Category::Fetch => vec![Permission::NetworkRead, Permission::CalcOnly],
        _ => vec![Permission::CalcOnly],
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn registry() -> ToolRegistry {
        let dir = tempfile::tempdir().unwrap();
        ToolRegistry::in_memory(dir.path().to_path_buf()).await.unwrap()
    }

    #[tokio::test]
    async fn register_is_idempotent_by_hash() {
        let reg = registry().await;
        let a = reg
            .register("calc_rsi", "pub fn calc_rsi() {}", serde_json::json!({}), vec![], ArtifactOrigin::Generated)
            .await
            .unwrap();
        let b = reg
            .register("calc_rsi", "pub fn calc_rsi() {}", serde_json::json!({}), vec![], ArtifactOrigin::Generated)
            .await
            .unwrap();
        assert_eq!(a.id, b.id);
        assert_eq!(a.content_hash, b.content_hash);
    }

    #[tokio::test]
    async fn registering_different_code_bumps_version() {
        let reg = registry().await;
        let a = reg
            .register("calc_rsi", "pub fn calc_rsi() { 1 }", serde_json::json!({}), vec![], ArtifactOrigin::Generated)
            .await
            .unwrap();
        let b = reg
            .register("calc_rsi", "pub fn calc_rsi() { 2 }", serde_json::json!({}), vec![], ArtifactOrigin::Generated)
            .await
            .unwrap();
        assert_eq!(a.semantic_version, "0.1.0");
        assert_eq!(b.semantic_version, "0.1.1");
    }

    #[tokio::test]
    async fn deprecated_excluded_from_active_filtering() {
        let reg = registry().await;
        let a = reg
            .register("calc_ma", "pub fn calc_ma() {}", serde_json::json!({}), vec![], ArtifactOrigin::Generated)
            .await
            .unwrap();
        reg.update_status(a.id, ToolStatus::Deprecated).await.unwrap();
        let active = reg.list(Some(ToolStatus::Provisional)).await.unwrap();
        assert!(active.iter().all(|t| t.id != a.id));
    }
}
