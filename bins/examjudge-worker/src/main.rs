mod compiler;
mod config;
mod engine;
#[cfg(test)]
mod engine_tests;
mod evaluator;
mod executor;
mod runner;
mod scratch;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use config::ToolchainRegistry;
use examjudge_common::config::EngineConfig;
use examjudge_common::payload::parse_exam;
use examjudge_common::types::{EvaluationRequest, VerdictStatus};
use executor::TestCaseRunner;
use runner::{run_batch, TestCaseProvider};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info, warn};

#[derive(Parser)]
#[command(name = "examjudge-worker")]
#[command(about = "Judge student exam code against question test cases", long_about = None)]
struct Cli {
    /// Language table to use instead of the built-in one
    #[arg(long, global = true, env = "JUDGE_LANGUAGES")]
    languages: Option<PathBuf>,

    /// Root directory for per-submission scratch directories
    #[arg(long, global = true)]
    scratch_dir: Option<PathBuf>,

    /// Compile timeout in milliseconds
    #[arg(long, global = true)]
    compile_timeout_ms: Option<u64>,

    /// Per-test-case run timeout in milliseconds
    #[arg(long, global = true)]
    run_timeout_ms: Option<u64>,

    /// Submissions judged at the same time
    #[arg(short, long, global = true)]
    jobs: Option<usize>,

    /// Test cases of one submission run at the same time
    #[arg(long, global = true)]
    parallel_tests: Option<usize>,

    /// Emit logs as JSON
    #[arg(long, global = true, default_value = "false")]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Judge one submission described by an evaluation request file
    Judge {
        /// Path to the request JSON (code, language, testCases, pointValue)
        request: PathBuf,
    },

    /// Judge every programming answer of an exam, one JSON line per task
    Batch {
        /// Path to the exam payload JSON
        exam: PathBuf,
    },

    /// List configured languages
    Languages,

    /// Remove scratch directories left behind by crashed runs
    Sweep {
        /// Minimum age in seconds (defaults to JUDGE_ORPHAN_MAX_AGE_SECS)
        #[arg(long)]
        max_age_secs: Option<u64>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_json);

    let config = engine_config(&cli);
    let registry = Arc::new(load_registry(cli.languages.as_deref()).map_err(|e| {
        error!("Failed to load language configurations: {:#}", e);
        e
    })?);

    info!("Loaded language configurations for: {:?}", registry.list_languages());

    match cli.command {
        Commands::Judge { request } => {
            sweep_on_startup(&config);
            judge(&request, registry, config).await
        }
        Commands::Batch { exam } => {
            sweep_on_startup(&config);
            batch(&exam, registry, config).await
        }
        Commands::Languages => {
            for toolchain in registry.toolchains() {
                let kind = if toolchain.needs_compile() {
                    "compiled"
                } else {
                    "interpreted"
                };
                if toolchain.aliases.is_empty() {
                    println!("{} ({})", toolchain.name, kind);
                } else {
                    println!(
                        "{} ({}, aliases: {})",
                        toolchain.name,
                        kind,
                        toolchain.aliases.join(", ")
                    );
                }
            }
            Ok(())
        }
        Commands::Sweep { max_age_secs } => {
            let max_age = max_age_secs
                .map(std::time::Duration::from_secs)
                .unwrap_or_else(|| config.orphan_max_age());
            let removed = scratch::sweep_orphans(&config.scratch_root, max_age)
                .with_context(|| format!("Failed to sweep {}", config.scratch_root.display()))?;
            println!("{}", removed);
            Ok(())
        }
    }
}

fn init_tracing(json: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    // stdout carries verdicts, logs go to stderr
    if json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .with_target(false)
            .with_thread_ids(true)
            .with_line_number(true)
            .init();
    }
}

/// Environment first, then command-line overrides
fn engine_config(cli: &Cli) -> EngineConfig {
    let mut config = EngineConfig::from_env();

    if let Some(dir) = &cli.scratch_dir {
        config.scratch_root = dir.clone();
    }
    if let Some(ms) = cli.compile_timeout_ms {
        config.compile_timeout_ms = ms;
    }
    if let Some(ms) = cli.run_timeout_ms {
        config.run_timeout_ms = ms;
    }
    if let Some(jobs) = cli.jobs {
        config.max_parallel_jobs = jobs.max(1);
    }
    if let Some(tests) = cli.parallel_tests {
        config.max_parallel_tests = tests.max(1);
    }

    config
}

fn load_registry(path: Option<&Path>) -> Result<ToolchainRegistry> {
    match path {
        Some(path) => ToolchainRegistry::load(path)
            .with_context(|| format!("Failed to load {}", path.display())),
        None => ToolchainRegistry::load_default(),
    }
}

fn sweep_on_startup(config: &EngineConfig) {
    match scratch::sweep_orphans(&config.scratch_root, config.orphan_max_age()) {
        Ok(0) => {}
        Ok(removed) => info!(removed, "Removed orphaned scratch directories"),
        Err(e) => warn!(error = %e, "Orphan sweep failed"),
    }
}

async fn judge(path: &Path, registry: Arc<ToolchainRegistry>, config: EngineConfig) -> Result<()> {
    let content = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let request: EvaluationRequest =
        serde_json::from_str(&content).context("Failed to parse evaluation request")?;

    info!(
        language = %request.language,
        test_cases = request.test_cases.len(),
        source_size = request.code.len(),
        "Received evaluation request"
    );

    let verdict = TestCaseRunner::new(registry, config)
        .evaluate_request(&request)
        .await;

    println!("{}", serde_json::to_string_pretty(&verdict)?);
    Ok(())
}

async fn batch(path: &Path, registry: Arc<ToolchainRegistry>, config: EngineConfig) -> Result<()> {
    let content = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let exam = parse_exam(&content).context("Failed to decode exam payload")?;

    let tasks = exam.tasks();
    info!(
        exam = %exam.title,
        students = exam.results.len(),
        tasks = tasks.len(),
        "Judging exam"
    );

    let provider: Arc<dyn TestCaseProvider> = Arc::new(exam.question_specs());
    let mut handle = run_batch(tasks, provider, TestCaseRunner::new(registry, config));

    // Setup graceful shutdown
    let cancel = handle.cancel_flag();
    tokio::spawn(async move {
        if signal::ctrl_c().await.is_ok() {
            warn!("Received shutdown signal, letting running submissions finish...");
            cancel.cancel();
        }
    });

    let mut passed = 0usize;
    let mut errors = 0usize;
    while let Some(task_verdict) = handle.next_verdict().await {
        match task_verdict.verdict.status {
            VerdictStatus::Passed => passed += 1,
            VerdictStatus::EvaluationError => errors += 1,
            _ => {}
        }
        println!("{}", serde_json::to_string(&task_verdict)?);

        let progress = handle.progress();
        info!(
            completed = progress.completed,
            total = progress.total,
            percent = progress.percent().round() as u64,
            student = %task_verdict.student,
            question = %task_verdict.question_title,
            status = %task_verdict.verdict.status,
            "Task judged"
        );
    }

    let progress = handle.progress();
    info!(
        completed = progress.completed,
        total = progress.total,
        passed,
        errors,
        "Batch complete"
    );
    if !progress.is_done() {
        warn!("Batch was cancelled before every task was judged");
    }
    Ok(())
}
