//! `conclave`: run orchestration strategies over task datasets and inspect
//! the traces they leave behind.

#![deny(unsafe_code)]

mod driver;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use tracing::info;

use conclave_core::{SessionRuntime, SessionStats};
use conclave_engine::{PromptLibrary, Strategy, StrategyConfig, Topology};
use conclave_runtime::{ProcessRuntime, ScriptedReply, ScriptedRuntime};
use conclave_settings::{load_settings, load_settings_from_path, ConclaveSettings};
use conclave_telemetry::{init_telemetry, TelemetryConfig};
use conclave_trace::render::{render_summary, render_trace};
use conclave_trace::TraceStore;

use crate::driver::{load_dataset, run_dataset, RunPlan, TargetKind};

#[derive(Debug, Parser)]
#[command(
    name = "conclave",
    version,
    about = "Run multi-session orchestration strategies over task datasets"
)]
struct Cli {
    /// Settings file (default: ~/.conclave/settings.json).
    #[arg(long, global = true)]
    settings: Option<PathBuf>,

    /// Emit JSON log lines.
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run one strategy over every task in a dataset.
    Run(RunArgs),
    /// Print a saved trace.
    Show(ShowArgs),
}

#[derive(Debug, Args)]
struct RunArgs {
    /// single, leader-worker, builder-critic, voting or specialists.
    #[arg(long)]
    strategy: Topology,

    #[arg(long, value_enum)]
    target: TargetKind,

    /// JSONL file of `{task_id, prompt, container?, template_dir?}` records.
    #[arg(long)]
    dataset: PathBuf,

    /// Maximum number of records to load.
    #[arg(long)]
    limit: Option<usize>,

    #[arg(long)]
    output_dir: PathBuf,

    /// Trace file every finished task is merged into.
    #[arg(long)]
    log_file: Option<PathBuf>,

    /// Keep existing output and skip tasks already in the log file.
    #[arg(long)]
    resume: bool,

    /// Run only these task ids, replacing any logged traces for them.
    #[arg(long, value_delimiter = ',')]
    only: Vec<String>,

    /// Render every sealed turn as it happens.
    #[arg(long)]
    debug: bool,

    #[arg(long)]
    model: Option<String>,

    #[arg(long)]
    max_turns: Option<u32>,

    /// Agent program each session runs in.
    #[arg(long)]
    runtime_command: Option<String>,

    /// Directory of prompt templates overriding the built-in ones.
    #[arg(long)]
    prompts_dir: Option<PathBuf>,

    /// Base directory for each project record's `template_dir`.
    #[arg(long)]
    template_dir: Option<PathBuf>,

    /// Answer every session from a script instead of starting agent programs.
    #[arg(long)]
    dry_run: bool,
}

#[derive(Debug, Args)]
struct ShowArgs {
    log_file: PathBuf,

    /// Task to show; all tasks are listed when omitted.
    task_id: Option<String>,

    /// Print every turn, not just the summary.
    #[arg(long)]
    full: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let settings = match &cli.settings {
        Some(path) => load_settings_from_path(path),
        None => load_settings(),
    }
    .context("failed to load settings")?;

    let telemetry = TelemetryConfig::from_directives(
        &settings.logging.level,
        cli.json_logs || settings.logging.json,
    );
    let _guard = init_telemetry(telemetry);

    match cli.command {
        Command::Run(args) => run(args, settings).await,
        Command::Show(args) => show(&args),
    }
}

async fn run(args: RunArgs, settings: ConclaveSettings) -> Result<()> {
    let config = StrategyConfig {
        model: Some(args.model.unwrap_or(settings.model)),
        max_turns: args.max_turns.unwrap_or(settings.max_turns),
        debug: args.debug || settings.debug,
    };
    anyhow::ensure!(config.max_turns > 0, "--max-turns must be at least 1");

    let prompts_dir = args
        .prompts_dir
        .unwrap_or_else(|| PathBuf::from(&settings.prompts_dir));
    let prompts = if prompts_dir.is_dir() {
        PromptLibrary::builtin().with_overrides_from(&prompts_dir)?
    } else {
        PromptLibrary::builtin()
    };

    let runtime: Arc<dyn SessionRuntime> = if args.dry_run {
        Arc::new(ScriptedRuntime::new().with_fallback(ScriptedReply::text(
            "dry run: no agent program was started",
            SessionStats::default(),
        )))
    } else {
        let command = args
            .runtime_command
            .unwrap_or_else(|| settings.runtime.command.clone());
        Arc::new(
            ProcessRuntime::new(command, settings.runtime.args.clone())
                .with_shutdown_grace(Duration::from_millis(settings.runtime.shutdown_grace_ms)),
        )
    };
    info!(
        strategy = %args.strategy,
        runtime = runtime.name(),
        model = config.model.as_deref().unwrap_or_default(),
        max_turns = config.max_turns,
        "starting run"
    );

    let strategy = Strategy::new(args.strategy, runtime, Arc::new(prompts), config);
    let records = load_dataset(&args.dataset, args.limit)?;
    let plan = RunPlan {
        target: args.target,
        output_dir: args.output_dir,
        store: args.log_file.map(TraceStore::new),
        resume: args.resume,
        only: args.only,
        template_root: args.template_dir,
    };

    let report = run_dataset(&strategy, &plan, &records).await?;
    println!(
        "Completed {}, skipped {}, failed {}",
        report.completed.len(),
        report.skipped.len(),
        report.failed.len()
    );
    for (task_id, reason) in &report.failed {
        println!("  {task_id}: {reason}");
    }
    anyhow::ensure!(report.is_success(), "{} task(s) failed", report.failed.len());
    Ok(())
}

fn show(args: &ShowArgs) -> Result<()> {
    let store = TraceStore::new(&args.log_file);
    let ids: Vec<String> = match &args.task_id {
        Some(id) => vec![id.clone()],
        None => store.completed_task_ids().into_iter().collect(),
    };
    for id in ids {
        let snapshot = store
            .load(&id)
            .with_context(|| format!("failed to read trace for {id}"))?
            .with_context(|| format!("no trace for task {id}"))?;
        println!("### {id}");
        if args.full {
            println!("{}", render_trace(&snapshot));
        } else {
            println!("{}", render_summary(&snapshot));
        }
    }
    Ok(())
}
