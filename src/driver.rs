//! Dataset runner: loads task records, prepares the output locations, runs
//! one strategy per task and merges each finished trace into the log file.

use std::collections::BTreeSet;
use std::fs;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::ValueEnum;
use serde::Deserialize;
use tracing::{error, info, warn};
use walkdir::WalkDir;

use conclave_engine::{Strategy, Target};
use conclave_trace::render::render_summary;
use conclave_trace::TraceStore;

/// One line of a JSONL dataset.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct DatasetRecord {
    pub task_id: String,
    pub prompt: String,
    /// Container a patch task works in.
    #[serde(default)]
    pub container: Option<String>,
    /// Template a project task starts from, relative to the template root.
    #[serde(default)]
    pub template_dir: Option<String>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum TargetKind {
    /// A single function written to `agent_sol_{id}.py`.
    Function,
    /// A repository patch written to `agent_sol_{id}.diff`.
    Patch,
    /// A whole project, one subdirectory per task.
    Project,
}

/// Read up to `limit` records. Blank lines are skipped.
pub fn load_dataset(path: &Path, limit: Option<usize>) -> Result<Vec<DatasetRecord>> {
    let file = fs::File::open(path)
        .with_context(|| format!("failed to open dataset: {}", path.display()))?;
    let mut records = Vec::new();
    for (index, line) in BufReader::new(file).lines().enumerate() {
        if limit.is_some_and(|n| records.len() >= n) {
            break;
        }
        let line = line.with_context(|| format!("failed to read dataset: {}", path.display()))?;
        if line.trim().is_empty() {
            continue;
        }
        let record: DatasetRecord = serde_json::from_str(&line)
            .with_context(|| format!("invalid dataset record on line {}", index + 1))?;
        records.push(record);
    }
    Ok(records)
}

/// `HumanEval/7` → `7`.
pub fn short_task_id(task_id: &str) -> &str {
    task_id.rsplit('/').next().unwrap_or(task_id)
}

/// Without `resume`, the output directory and the log file start empty.
pub fn setup_eval_directories(
    output_dir: &Path,
    store: Option<&TraceStore>,
    resume: bool,
) -> Result<()> {
    if !resume && output_dir.exists() {
        fs::remove_dir_all(output_dir)
            .with_context(|| format!("failed to clear {}", output_dir.display()))?;
    }
    fs::create_dir_all(output_dir)
        .with_context(|| format!("failed to create {}", output_dir.display()))?;

    if let Some(store) = store {
        if let Some(parent) = store.path().parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        if !resume {
            store.clear().context("failed to clear log file")?;
        }
    }
    Ok(())
}

/// Replace `dst` with a copy of the `src` tree.
pub fn copy_template(src: &Path, dst: &Path) -> Result<()> {
    anyhow::ensure!(src.is_dir(), "template directory not found: {}", src.display());
    if dst.exists() {
        fs::remove_dir_all(dst).with_context(|| format!("failed to clear {}", dst.display()))?;
    }
    for entry in WalkDir::new(src) {
        let entry = entry.with_context(|| format!("failed to walk {}", src.display()))?;
        let rel = entry.path().strip_prefix(src)?;
        let target = dst.join(rel);
        if entry.file_type().is_dir() {
            fs::create_dir_all(&target)
                .with_context(|| format!("failed to create {}", target.display()))?;
        } else {
            fs::copy(entry.path(), &target)
                .with_context(|| format!("failed to copy {}", entry.path().display()))?;
        }
    }
    info!(template = %src.display(), output = %dst.display(), "copied project template");
    Ok(())
}

fn prepare_project_dir(
    template_root: Option<&Path>,
    record: &DatasetRecord,
    dir: &Path,
) -> Result<()> {
    let template = record
        .template_dir
        .as_deref()
        .with_context(|| format!("project task {} has no template_dir", record.task_id))?;
    let source = match template_root {
        Some(root) => root.join(template),
        None => PathBuf::from(template),
    };
    copy_template(&source, dir)
}

/// What a dataset run should do beyond the strategy itself.
#[derive(Debug)]
pub struct RunPlan {
    pub target: TargetKind,
    pub output_dir: PathBuf,
    pub store: Option<TraceStore>,
    pub resume: bool,
    /// Task ids to run again even when the log already has them.
    pub only: Vec<String>,
    /// Base directory project templates are resolved against.
    pub template_root: Option<PathBuf>,
}

#[derive(Debug, Default)]
pub struct RunReport {
    pub completed: Vec<String>,
    pub skipped: Vec<String>,
    pub failed: Vec<(String, String)>,
}

impl RunReport {
    pub fn is_success(&self) -> bool {
        self.failed.is_empty()
    }
}

fn target_for(kind: TargetKind, strategy: &Strategy, task_id: &str, record: &DatasetRecord) -> Target {
    match kind {
        TargetKind::Function => Target::Function {
            task_id: task_id.to_string(),
        },
        TargetKind::Patch => Target::Patch {
            task_id: task_id.to_string(),
            container: record
                .container
                .clone()
                .unwrap_or_else(|| format!("swebench-{}-{task_id}", strategy.topology())),
        },
        TargetKind::Project => Target::Project {
            task_id: task_id.to_string(),
        },
    }
}

pub async fn run_dataset(
    strategy: &Strategy,
    plan: &RunPlan,
    records: &[DatasetRecord],
) -> Result<RunReport> {
    let mut completed_ids: BTreeSet<String> = match (&plan.store, plan.resume) {
        (Some(store), true) => store.completed_task_ids(),
        _ => BTreeSet::new(),
    };
    if !completed_ids.is_empty() {
        println!("[Resume] Found {} completed tasks", completed_ids.len());
    }
    if !plan.only.is_empty() {
        for id in &plan.only {
            completed_ids.remove(id);
        }
        if let Some(store) = &plan.store {
            let removed = store.remove(plan.only.as_slice()).context("failed to prune log file")?;
            if !removed.is_empty() {
                info!(?removed, "log entries removed for re-run");
            }
        }
    }

    setup_eval_directories(&plan.output_dir, plan.store.as_ref(), plan.resume)?;

    let mut report = RunReport::default();
    for (index, record) in records.iter().enumerate() {
        let task_id = short_task_id(&record.task_id);
        if !plan.only.is_empty() && !plan.only.iter().any(|id| id == task_id) {
            continue;
        }
        if completed_ids.contains(task_id) {
            println!("[Resume] Skipping already completed task: {task_id}");
            report.skipped.push(task_id.to_string());
            continue;
        }

        println!("\n{}", "=".repeat(80));
        println!("Running task {}/{}: {task_id}", index + 1, records.len());
        println!("{}\n", "=".repeat(80));

        let output_dir = match plan.target {
            TargetKind::Project => {
                let dir = plan.output_dir.join(task_id);
                if let Err(e) = prepare_project_dir(plan.template_root.as_deref(), record, &dir) {
                    error!(task_id, error = %e, "failed to prepare project directory");
                    report.failed.push((task_id.to_string(), format!("{e:#}")));
                    continue;
                }
                dir
            }
            _ => plan.output_dir.clone(),
        };
        fs::create_dir_all(&output_dir)
            .with_context(|| format!("failed to create {}", output_dir.display()))?;

        let target = target_for(plan.target, strategy, task_id, record);
        match strategy.run(&record.prompt, &target, &output_dir).await {
            Ok(recorder) => {
                let snapshot = recorder.to_snapshot();
                println!("{}", render_summary(&snapshot));
                if let Some(store) = &plan.store {
                    let path = store
                        .save(task_id, &snapshot)
                        .with_context(|| format!("failed to save trace for {task_id}"))?;
                    println!("Trace saved to: {}\n", path.display());
                }
                report.completed.push(task_id.to_string());
            }
            Err(e) => {
                error!(task_id, error = %e, kind = e.error_kind(), "task failed");
                report.failed.push((task_id.to_string(), e.to_string()));
            }
        }
    }

    if !report.is_success() {
        warn!(failed = report.failed.len(), "some tasks failed");
    }
    Ok(report)
}
