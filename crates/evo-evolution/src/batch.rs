//! Batch and multi-round orchestration: warm-start reuse, bounded
//! parallel synthesis, sequential deduplication, metrics handoff.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use evo_contracts::ToolContract;
use evo_store::{ToolArtifact, ToolRegistry, ToolStatus};
use evo_types::Category;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::dedup::Deduplicator;
use crate::metrics::{EvolutionMetrics, RoundMetrics};
use crate::refiner::Refiner;
use crate::synthesizer::Synthesizer;

const DEFAULT_WORKERS: usize = 3;
const DEFAULT_TASK_TIMEOUT: Duration = Duration::from_secs(120);

/// One unit of work to evolve a tool for.
#[derive(Debug, Clone)]
pub struct EvolutionTask {
    /// Natural-language description of what the tool should do.
    pub description: String,
    /// Preferred function name, if any.
    pub tool_name: Option<String>,
    /// Category, if already known.
    pub category: Option<Category>,
    /// Contract to satisfy, if already known.
    pub contract: Option<&'static ToolContract>,
}

/// Outcome of evolving a single task.
#[derive(Debug, Clone)]
pub struct EvolutionResult {
    /// The task description this result is for.
    pub task: String,
    /// The tool produced or reused, if any.
    pub tool: Option<ToolArtifact>,
    /// Whether this result came from the registry rather than fresh synthesis.
    pub reused: bool,
    /// Failure detail, if synthesis/refinement never produced a tool.
    pub error: Option<String>,
    /// Wall-clock time spent on this task, in seconds.
    pub elapsed_sec: f64,
}

/// Full report for one `evolve_batch` call.
#[derive(Debug, Clone)]
pub struct BatchEvolutionReport {
    /// Round number this batch ran as.
    pub round_number: u32,
    /// Generated batch identifier.
    pub batch_id: String,
    /// Per-task outcomes, in task order.
    pub results: Vec<EvolutionResult>,
    /// Tools deprecated by the post-synthesis dedup pass.
    pub dedup_merged: usize,
}

/// Warm-start → bounded parallel synthesis → sequential dedup → metrics.
pub struct BatchEvolutionManager {
    synthesizer: Arc<Synthesizer>,
    refiner: Arc<Refiner>,
    dedup: Deduplicator,
    registry: ToolRegistry,
    metrics: EvolutionMetrics,
    workers: usize,
    task_timeout: Duration,
}

impl BatchEvolutionManager {
    /// Construct a manager with the default worker count (3) and
    /// per-task timeout (120s).
    pub fn new(synthesizer: Arc<Synthesizer>, refiner: Arc<Refiner>, registry: ToolRegistry, metrics_path: impl Into<std::path::PathBuf>) -> Self {
        Self {
            synthesizer,
            refiner,
            dedup: Deduplicator::new(registry.clone()),
            registry,
            metrics: EvolutionMetrics::new(metrics_path.into()),
            workers: DEFAULT_WORKERS,
            task_timeout: DEFAULT_TASK_TIMEOUT,
        }
    }

    /// Override the bounded-parallelism worker count.
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    /// Override the per-task synthesis timeout.
    pub fn with_task_timeout(mut self, timeout: Duration) -> Self {
        self.task_timeout = timeout;
        self
    }

    async fn warm_start(&self, task: &EvolutionTask) -> Option<ToolArtifact> {
        let contract_id = task.contract.map(|c| c.contract_id.clone())?;
        let candidates = self.registry.find_by_contract_id(&contract_id).await.ok()?;
        candidates.into_iter().find(|t| t.status != ToolStatus::Deprecated)
    }

    /// Evolve one batch of tasks.
    #[instrument(skip(self, tasks), fields(round_number = round_number, task_count = tasks.len()))]
    pub async fn evolve_batch(&self, tasks: Vec<EvolutionTask>, round_number: u32) -> BatchEvolutionReport {
        let batch_id = format!("batch_{}", Uuid::new_v4().simple());
        let round_start = Instant::now();
        let semaphore = Arc::new(Semaphore::new(self.workers));
        let mut results: Vec<Option<EvolutionResult>> = vec![None; tasks.len()];
        let mut pending = Vec::new();

        for (idx, task) in tasks.iter().enumerate() {
            if let Some(tool) = self.warm_start(task).await {
                info!(task = %task.description, tool_id = tool.id, "warm-start reuse");
                results[idx] = Some(EvolutionResult {
                    task: task.description.clone(),
                    tool: Some(tool),
                    reused: true,
                    error: None,
                    elapsed_sec: 0.0,
                });
            } else {
                pending.push(idx);
            }
        }

        let mut joins = JoinSet::new();
        for idx in pending {
            let task = tasks[idx].clone();
            let synthesizer = Arc::clone(&self.synthesizer);
            let refiner = Arc::clone(&self.refiner);
            let permit = Arc::clone(&semaphore);
            let timeout = self.task_timeout;

            joins.spawn(async move {
                let _permit = permit.acquire_owned().await.expect("semaphore never closes");
                let started = Instant::now();
                let outcome = tokio::time::timeout(
                    timeout,
                    synthesizer.synthesize_with_refine(&task.description, task.tool_name.as_deref(), task.category, task.contract, refiner.as_ref()),
                )
                .await;

                let result = match outcome {
                    Ok((Some(tool), _trace)) => EvolutionResult {
                        task: task.description.clone(),
                        tool: Some(tool),
                        reused: false,
                        error: None,
                        elapsed_sec: started.elapsed().as_secs_f64(),
                    },
                    Ok((None, trace)) => EvolutionResult {
                        task: task.description.clone(),
                        tool: None,
                        reused: false,
                        error: trace.std_err.clone(),
                        elapsed_sec: started.elapsed().as_secs_f64(),
                    },
                    Err(_) => EvolutionResult {
                        task: task.description.clone(),
                        tool: None,
                        reused: false,
                        error: Some(format!("synthesis timed out after {}s", timeout.as_secs())),
                        elapsed_sec: started.elapsed().as_secs_f64(),
                    },
                };
                (idx, result)
            });
        }

        while let Some(joined) = joins.join_next().await {
            match joined {
                Ok((idx, result)) => results[idx] = Some(result),
                Err(e) => warn!(error = %e, "synthesis task panicked"),
            }
        }

        let final_results: Vec<EvolutionResult> = results
            .into_iter()
            .enumerate()
            .map(|(idx, r)| {
                r.unwrap_or_else(|| EvolutionResult {
                    task: tasks[idx].description.clone(),
                    tool: None,
                    reused: false,
                    error: Some("task never completed".to_string()),
                    elapsed_sec: 0.0,
                })
            })
            .collect();

        let mut dedup_merged = 0usize;
        let mut seen_contracts: HashMap<String, ()> = HashMap::new();
        for (task, result) in tasks.iter().zip(final_results.iter()) {
            let Some(tool) = &result.tool else { continue };
            let Some(contract_id) = task.contract.map(|c| c.contract_id.clone()).or_else(|| tool.contract_id.clone()) else { continue };
            if seen_contracts.contains_key(&contract_id) {
                continue;
            }
            seen_contracts.insert(contract_id.clone(), ());
            match self.dedup.check_and_resolve(tool.id, &contract_id).await {
                Ok(crate::dedup::DedupOutcome::Superseded { .. }) => dedup_merged += 1,
                Ok(_) => {}
                Err(e) => warn!(error = %e, contract_id = %contract_id, "dedup pass failed"),
            }
        }

        let synthesis_success = final_results.iter().filter(|r| r.tool.is_some() && !r.reused).count();
        let reused_from_registry = final_results.iter().filter(|r| r.reused).count();
        let mut failures_by_stage: HashMap<String, usize> = HashMap::new();
        for r in &final_results {
            if r.tool.is_none() {
                *failures_by_stage.entry(r.error.clone().unwrap_or_else(|| "unknown".to_string())).or_insert(0) += 1;
            }
        }
        let synth_times: Vec<f64> = final_results.iter().filter(|r| !r.reused).map(|r| r.elapsed_sec).collect();
        let avg_synthesis_time_sec = if synth_times.is_empty() { 0.0 } else { synth_times.iter().sum::<f64>() / synth_times.len() as f64 };

        let registry_tools = self.registry.list(None).await.unwrap_or_default();
        let active_tools = registry_tools.iter().filter(|t| t.status != ToolStatus::Deprecated).count();
        let deprecated_tools = registry_tools.iter().filter(|t| t.status == ToolStatus::Deprecated).count();

        let round_metrics = RoundMetrics {
            round_number,
            batch_id: batch_id.clone(),
            timestamp: chrono::Utc::now(),
            total_tasks: tasks.len(),
            synthesis_success,
            registration_success: synthesis_success,
            reused_from_registry,
            dedup_merged,
            total_time_sec: round_start.elapsed().as_secs_f64(),
            avg_synthesis_time_sec,
            failures_by_stage,
            total_tools_in_registry: registry_tools.len(),
            active_tools,
            deprecated_tools,
        };
        if let Err(e) = self.metrics.record_round(&round_metrics).await {
            warn!(error = %e, "failed to persist round metrics");
        }

        BatchEvolutionReport { round_number, batch_id, results: final_results, dedup_merged }
    }

    /// Run `num_rounds` successive batches over the same task list.
    pub async fn evolve_multi_round(&self, tasks: Vec<EvolutionTask>, num_rounds: u32) -> Vec<BatchEvolutionReport> {
        let mut reports = Vec::new();
        for round in 1..=num_rounds {
            let report = self.evolve_batch(tasks.clone(), round).await;
            reports.push(report);
        }
        reports
    }
}
