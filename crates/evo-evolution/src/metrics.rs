//! Per-round evolution metrics, persisted as JSON lines so a run can
//! be replayed or plotted without re-querying the registry.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;
use tokio::io::AsyncWriteExt;

/// Failure modes for metrics persistence.
#[derive(Debug, Error)]
pub enum MetricsError {
    /// Could not open or append to the metrics file.
    #[error("failed to write metrics to {path}: {source}")]
    Io {
        /// Path that failed.
        path: String,
        /// Underlying IO error.
        #[source]
        source: std::io::Error,
    },
    /// Could not serialize a metrics record.
    #[error(transparent)]
    Serde(#[from] serde_json::Error),
}

/// Summary statistics for a single batch-evolution round.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoundMetrics {
    /// 1-based round number within a multi-round run.
    pub round_number: u32,
    /// Identifier of the batch this round ran.
    pub batch_id: String,
    /// When the round completed.
    pub timestamp: DateTime<Utc>,
    /// Number of tasks submitted this round.
    pub total_tasks: usize,
    /// Tasks for which synthesis produced a passing tool.
    pub synthesis_success: usize,
    /// Tasks for which the tool was newly registered (as opposed to reused).
    pub registration_success: usize,
    /// Tasks satisfied by an existing registry entry (warm start).
    pub reused_from_registry: usize,
    /// Tools deprecated by the post-round dedup pass.
    pub dedup_merged: usize,
    /// Wall-clock time for the whole round, in seconds.
    pub total_time_sec: f64,
    /// Mean synthesis time per task that actually ran synthesis, in seconds.
    pub avg_synthesis_time_sec: f64,
    /// Count of failures bucketed by the verification stage they failed at.
    pub failures_by_stage: HashMap<String, usize>,
    /// Total tools in the registry after this round.
    pub total_tools_in_registry: usize,
    /// Tools with `Verified`/`Provisional` status after this round.
    pub active_tools: usize,
    /// Tools with `Deprecated` status after this round.
    pub deprecated_tools: usize,
}

impl RoundMetrics {
    /// Fraction of tasks that produced a passing tool this round.
    pub fn synthesis_rate(&self) -> f64 {
        if self.total_tasks == 0 {
            return 0.0;
        }
        self.synthesis_success as f64 / self.total_tasks as f64
    }

    /// Fraction of tasks satisfied by warm-start reuse rather than fresh synthesis.
    pub fn reuse_rate(&self) -> f64 {
        if self.total_tasks == 0 {
            return 0.0;
        }
        self.reused_from_registry as f64 / self.total_tasks as f64
    }

    /// Net new, still-active tools contributed per task attempted —
    /// a rough throughput signal across rounds.
    pub fn evolution_efficiency(&self) -> f64 {
        if self.total_tasks == 0 {
            return 0.0;
        }
        (self.registration_success as f64 - self.dedup_merged as f64) / self.total_tasks as f64
    }
}

/// Append-only JSONL metrics log for a sequence of evolution rounds.
pub struct EvolutionMetrics {
    path: PathBuf,
}

impl EvolutionMetrics {
    /// Point the metrics log at `path` (created lazily on first write).
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self { path: path.as_ref().to_path_buf() }
    }

    /// Append one round's metrics as a JSON line.
    pub async fn record_round(&self, metrics: &RoundMetrics) -> Result<(), MetricsError> {
        let line = serde_json::to_string(metrics)?;
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .map_err(|source| MetricsError::Io { path: self.path.display().to_string(), source })?;
        file.write_all(line.as_bytes())
            .await
            .map_err(|source| MetricsError::Io { path: self.path.display().to_string(), source })?;
        file.write_all(b"\n").await.map_err(|source| MetricsError::Io { path: self.path.display().to_string(), source })?;
        Ok(())
    }

    /// Read back every recorded round, in append order.
    pub async fn all_rounds(&self) -> Result<Vec<RoundMetrics>, MetricsError> {
        let Ok(contents) = tokio::fs::read_to_string(&self.path).await else {
            return Ok(Vec::new());
        };
        let mut rounds = Vec::new();
        for line in contents.lines() {
            if line.trim().is_empty() {
                continue;
            }
            rounds.push(serde_json::from_str(line)?);
        }
        Ok(rounds)
    }

    /// Render a plain-text summary table across every recorded round.
    pub async fn summary_table(&self) -> Result<String, MetricsError> {
        let rounds = self.all_rounds().await?;
        let mut out = String::from("round  tasks  synth_ok  reused  merged  synth_rate  efficiency\n");
        for r in &rounds {
            out.push_str(&format!(
                "{:5}  {:5}  {:8}  {:6}  {:6}  {:10.2}  {:10.2}\n",
                r.round_number,
                r.total_tasks,
                r.synthesis_success,
                r.reused_from_registry,
                r.dedup_merged,
                r.synthesis_rate(),
                r.evolution_efficiency()
            ));
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(round_number: u32) -> RoundMetrics {
        RoundMetrics {
            round_number,
            batch_id: "batch-1".to_string(),
            timestamp: Utc::now(),
            total_tasks: 4,
            synthesis_success: 3,
            registration_success: 3,
            reused_from_registry: 1,
            dedup_merged: 1,
            total_time_sec: 12.5,
            avg_synthesis_time_sec: 3.1,
            failures_by_stage: HashMap::from([("AstSecurity".to_string(), 1)]),
            total_tools_in_registry: 10,
            active_tools: 8,
            deprecated_tools: 2,
        }
    }

    #[test]
    fn derived_rates_divide_by_total_tasks() {
        let m = sample(1);
        assert!((m.synthesis_rate() - 0.75).abs() < 1e-9);
        assert!((m.reuse_rate() - 0.25).abs() < 1e-9);
    }

    #[test]
    fn zero_tasks_never_divides_by_zero() {
        let mut m = sample(1);
        m.total_tasks = 0;
        assert_eq!(m.synthesis_rate(), 0.0);
        assert_eq!(m.evolution_efficiency(), 0.0);
    }

    #[tokio::test]
    async fn round_trips_through_jsonl() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("evolution_metrics.jsonl");
        let log = EvolutionMetrics::new(&path);
        log.record_round(&sample(1)).await.unwrap();
        log.record_round(&sample(2)).await.unwrap();
        let rounds = log.all_rounds().await.unwrap();
        assert_eq!(rounds.len(), 2);
        assert_eq!(rounds[1].round_number, 2);
    }
}
