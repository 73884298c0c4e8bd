#![forbid(unsafe_code)]

//! **evo-cli** – command-line entry point wiring the constraints
//! store, tool registry, executor, verifier, gates, LLM gateway,
//! registration gateway, evolution loop, and task executor into one
//! binary.
//!
//! Every subsystem is constructed fresh per invocation from the
//! on-disk layout rooted at `--data-dir`; there is no daemon mode.

mod bootstrap;
mod eval;
mod security_corpus;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use evo_constraints::Constraints;
use evo_contracts::ToolContract;
use evo_gateway::Gateway;
use evo_gates::{AlwaysApprove, EvolutionGatekeeper};
use evo_llm_gateway::{HttpLlmProvider, LlmGateway, LlmProvider, MockLlmProvider};
use evo_store::ToolRegistry;
use evo_task_executor::{StaticDataProvider, Task, TaskExecutor};
use evo_types::Category;
use secrecy::Secret;
use tracing::info;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

#[derive(Parser)]
#[command(name = "evo")]
#[command(about = "Self-evolving tool-synthesis engine for financial analytics")]
#[command(version)]
struct Cli {
    /// Root of the on-disk layout (db/, artifacts/, cache/, logs/, checkpoints/).
    #[arg(long, default_value = "./data")]
    data_dir: PathBuf,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Path to a YAML constraints file. Falls back to built-in defaults.
    #[arg(long)]
    constraints_file: Option<PathBuf>,

    /// Base URL of the LLM provider. Without it, a deterministic mock provider is used.
    #[arg(long)]
    llm_base_url: Option<String>,

    /// Model name passed to the LLM provider.
    #[arg(long, default_value = "gpt-4o-mini")]
    llm_model: String,

    /// API key for the LLM provider, read from the environment rather than the command line where possible.
    #[arg(long, env = "EVO_LLM_API_KEY")]
    llm_api_key: Option<String>,

    /// Create the relational schema.
    #[arg(long)]
    init: bool,

    /// Register the seed tools.
    #[arg(long)]
    bootstrap: bool,

    /// List registered tools.
    #[arg(long)]
    list: bool,

    /// Run the dangerous-code corpus and verify everything is blocked.
    #[arg(long)]
    security_check: bool,

    /// Synthesize-or-reuse and execute one task.
    #[arg(long)]
    task: Option<String>,

    /// Agent mode for the evaluation harness.
    #[arg(long, value_enum, default_value = "evolving")]
    agent: AgentMode,

    /// Identifier stamped into the evaluation result file.
    #[arg(long)]
    run_id: Option<String>,

    /// Line-delimited JSON task file for the evaluation harness.
    #[arg(long)]
    tasks_file: Option<PathBuf>,

    /// Run only the security-corpus tasks from `tasks_file`.
    #[arg(long)]
    security_only: bool,

    /// Wipe the tool registry before running.
    #[arg(long)]
    clear_registry: bool,

    /// Named benchmark preset (currently informational; use `--config-file` for gate thresholds).
    #[arg(long)]
    config: Option<String>,

    /// Path to a benchmark configuration file supplying merge-gate thresholds.
    #[arg(long)]
    config_file: Option<PathBuf>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, clap::ValueEnum)]
enum AgentMode {
    Evolving,
    Static,
    #[value(name = "memory_only")]
    MemoryOnly,
}

fn init_tracing(log_level: &str) -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_new(log_level).unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::registry().with(filter).with(tracing_subscriber::fmt::layer()).init();
    Ok(())
}

/// Paths making up the on-disk layout rooted at `data_dir`.
struct Layout {
    db_path: PathBuf,
    artifacts_root: PathBuf,
    checkpoints_dir: PathBuf,
    gateway_checkpoints_dir: PathBuf,
    security_log_path: PathBuf,
    attempts_log_path: PathBuf,
    gate_audit_log_path: PathBuf,
}

impl Layout {
    fn new(data_dir: &std::path::Path) -> Self {
        Self {
            db_path: data_dir.join("db").join("evolution.db"),
            artifacts_root: data_dir.join("artifacts"),
            checkpoints_dir: data_dir.join("checkpoints"),
            gateway_checkpoints_dir: data_dir.join("checkpoints").join("gateway"),
            security_log_path: data_dir.join("logs").join("security_violations.log"),
            attempts_log_path: data_dir.join("logs").join("gateway_attempts.jsonl"),
            gate_audit_log_path: data_dir.join("logs").join("evolution_gates.log"),
        }
    }

    async fn ensure_dirs(&self) -> Result<()> {
        for dir in [
            self.db_path.parent().unwrap(),
            &self.artifacts_root,
            self.artifacts_root.join("bootstrap").as_path(),
            self.artifacts_root.join("generated").as_path(),
            &self.checkpoints_dir,
            &self.gateway_checkpoints_dir,
            self.security_log_path.parent().unwrap(),
        ] {
            tokio::fs::create_dir_all(dir).await.with_context(|| format!("creating {}", dir.display()))?;
        }
        Ok(())
    }
}

/// The fully wired engine: every crate's top-level handle, constructed
/// once per invocation and shared behind `Arc` where a component needs
/// its own clone (registry is `Clone`, the rest are wrapped).
struct Engine {
    registry: ToolRegistry,
    constraints: Constraints,
    gateway: Arc<Gateway>,
    synthesizer: Arc<evo_evolution::Synthesizer>,
    refiner: Arc<evo_evolution::Refiner>,
    dedup: evo_evolution::Deduplicator,
    task_executor: TaskExecutor,
    layout: Layout,
}

async fn build_engine(cli: &Cli) -> Result<Engine> {
    let layout = Layout::new(&cli.data_dir);
    layout.ensure_dirs().await?;

    let constraints = match &cli.constraints_file {
        Some(path) => Constraints::from_yaml(path).with_context(|| format!("loading constraints from {}", path.display()))?,
        None => Constraints::default(),
    };

    if cli.clear_registry {
        for path in [&layout.db_path, &PathBuf::from(format!("{}-shm", layout.db_path.display())), &PathBuf::from(format!("{}-wal", layout.db_path.display()))] {
            let _ = tokio::fs::remove_file(path).await;
        }
        if layout.artifacts_root.exists() {
            tokio::fs::remove_dir_all(&layout.artifacts_root).await.context("clearing artifacts directory")?;
        }
        info!("registry cleared");
    }
    let registry = ToolRegistry::open(&layout.db_path, &layout.artifacts_root).await.context("opening tool registry")?;

    let gatekeeper = EvolutionGatekeeper::new(
        &constraints,
        &layout.checkpoints_dir,
        &layout.gate_audit_log_path,
        Box::new(AlwaysApprove),
    )
    .await
    .context("constructing evolution gatekeeper")?;

    let gateway = Arc::new(
        Gateway::new(
            registry.clone(),
            constraints.clone(),
            gatekeeper,
            &layout.gateway_checkpoints_dir,
            &layout.security_log_path,
            &layout.attempts_log_path,
        )
        .await
        .context("constructing registration gateway")?,
    );

    let provider: Box<dyn LlmProvider> = match (&cli.llm_base_url, &cli.llm_api_key) {
        (Some(base_url), Some(api_key)) => {
            Box::new(HttpLlmProvider::new(base_url.clone(), cli.llm_model.clone(), Secret::new(api_key.clone()), 0.2))
        }
        _ => Box::new(MockLlmProvider),
    };
    let llm = Arc::new(LlmGateway::new(provider, evo_llm_gateway::DEFAULT_RATE_LIMIT_PER_MINUTE));

    let synthesizer = Arc::new(evo_evolution::Synthesizer::new(llm.clone(), gateway.clone()));
    let refiner = Arc::new(evo_evolution::Refiner::new(llm.clone(), gateway.clone(), registry.clone()));
    let dedup = evo_evolution::Deduplicator::new(registry.clone());

    let data_provider = Arc::new(StaticDataProvider::new(evo_task_executor::OhlcvSeries {
        symbol: String::new(),
        dates: (1..=30).map(|d| format!("2024-01-{d:02}")).collect(),
        open: synthetic_series(30, 100.0),
        high: synthetic_series(30, 101.5),
        low: synthetic_series(30, 98.5),
        close: synthetic_series(30, 100.5),
        volume: (0..30).map(|i| 1_000_000.0 + i as f64 * 1000.0).collect(),
    }));
    let task_executor = TaskExecutor::new(data_provider, constraints.clone(), &layout.security_log_path);

    Ok(Engine { registry, constraints, gateway, synthesizer, refiner, dedup, task_executor, layout })
}

/// A small deterministic walk, not randomness — keeps `--task` and
/// eval-harness runs reproducible without wiring an actual feed.
fn synthetic_series(len: usize, base: f64) -> Vec<f64> {
    (0..len).map(|i| base + (i as f64 * 0.37).sin() * 2.0 + i as f64 * 0.05).collect()
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(&cli.log_level)?;

    let mut exit_ok = true;

    if cli.init {
        let layout = Layout::new(&cli.data_dir);
        layout.ensure_dirs().await?;
        let _registry = ToolRegistry::open(&layout.db_path, &layout.artifacts_root).await.context("initializing schema")?;
        println!("schema initialized at {}", layout.db_path.display());
        return Ok(());
    }

    let engine = build_engine(&cli).await?;

    if cli.bootstrap {
        let registered = bootstrap::register_seed_tools(&engine.gateway).await?;
        for name in &registered {
            println!("bootstrapped {name}");
        }
    }

    if cli.list {
        let tools = engine.registry.list(None).await.context("listing registry")?;
        if tools.is_empty() {
            println!("(registry is empty)");
        }
        for tool in tools {
            println!(
                "{:>4}  {:<28} v{:<8} {:<12} {:?}  stage={:?}  contract={}",
                tool.id,
                tool.name,
                tool.semantic_version,
                format!("{:?}", tool.status),
                tool.category,
                tool.verification_stage,
                tool.contract_id.as_deref().unwrap_or("-"),
            );
        }
    }

    if cli.security_check {
        let report = security_corpus::run(&engine.constraints);
        println!("{} payloads checked, {} blocked, {} unexpectedly allowed", report.total, report.blocked, report.allowed);
        if report.allowed > 0 {
            exit_ok = false;
        }
    }

    if let Some(text) = &cli.task {
        let passed = run_single_task(&engine, text).await?;
        exit_ok = exit_ok && passed;
    }

    if let Some(tasks_file) = &cli.tasks_file {
        let run_id = cli.run_id.clone().unwrap_or_else(|| "run".to_string());
        let gate_config = match &cli.config_file {
            Some(path) => eval::GateConfig::from_file(path).context("loading benchmark configuration")?,
            None => eval::GateConfig::default(),
        };
        let report = eval::run_harness(&engine, tasks_file, &run_id, cli.agent, cli.security_only, gate_config).await?;
        let result_path = engine.layout.db_path.parent().unwrap().parent().unwrap().join(format!("{run_id}_result.json"));
        tokio::fs::write(&result_path, serde_json::to_vec_pretty(&report)?).await?;
        println!("{}", serde_json::to_string_pretty(&report.summary)?);
        exit_ok = exit_ok && report.summary.target_met;
    }

    std::process::exit(if exit_ok { 0 } else { 1 });
}

async fn run_single_task(engine: &Engine, text: &str) -> Result<bool> {
    let category = infer_category_for_cli(text);
    let contract = evo_contracts::infer_contract_from_query(text, category);

    let existing = find_existing_tool(engine, contract).await?;
    let (tool, trace) = match existing {
        Some(tool) => {
            info!(tool_id = tool.id, "reusing existing tool for task");
            let task_id = format!("cli-{}", uuid::Uuid::new_v4().simple());
            let task = Task { task_id, query: text.to_string(), category };
            let trace = engine.task_executor.execute_task(&task, &tool, contract).await;
            (Some(tool), trace)
        }
        None => {
            let (tool, trace) = engine.synthesizer.synthesize_with_refine(text, None, Some(category), contract, engine.refiner.as_ref()).await;
            match &tool {
                Some(tool) => {
                    let task_id = format!("cli-{}", uuid::Uuid::new_v4().simple());
                    let task = Task { task_id, query: text.to_string(), category };
                    let exec_trace = engine.task_executor.execute_task(&task, tool, contract).await;
                    (Some(tool.clone()), exec_trace)
                }
                None => (None, trace),
            }
        }
    };

    if let Some(contract) = contract {
        if let Some(tool) = &tool {
            let _ = engine.dedup.check_and_resolve(tool.id, &contract.contract_id).await;
        }
    }

    println!("exit_code={} output={}", trace.exit_code, trace.output_repr);
    if let Some(stderr) = &trace.std_err {
        eprintln!("{stderr}");
    }
    Ok(trace.exit_code == 0)
}

async fn find_existing_tool(engine: &Engine, contract: Option<&'static ToolContract>) -> Result<Option<evo_store::ToolArtifact>> {
    let Some(contract) = contract else { return Ok(None) };
    let candidates = engine.registry.find_by_contract_id(&contract.contract_id).await?;
    Ok(candidates.into_iter().find(|t| t.status != evo_types::ToolStatus::Deprecated && t.status != evo_types::ToolStatus::Failed))
}

fn infer_category_for_cli(task: &str) -> Category {
    let lower = task.to_lowercase();
    let fetch_kw = ["fetch", "get", "price", "quote", "historical"];
    let calc_kw = ["calculate", "calc", "rsi", "macd", "bollinger", "volatility", "correlation"];
    let composite_kw = ["if ", "return true", "return false", "signal", "divergence", "portfolio"];

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
