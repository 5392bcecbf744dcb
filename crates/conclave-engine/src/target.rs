use serde::{Deserialize, Serialize};

use crate::error::EngineError;

/// Evaluation environment a prompt is assembled for. Each one has its own
/// instruction template and environment guidelines.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Benchmark {
    HumanEval,
    SweBenchVerified,
    FinanceProject,
    SpamProject,
}

impl Benchmark {
    pub fn instructions_template(self) -> &'static str {
        match self {
            Self::HumanEval => "human_eval_inst.md",
            Self::SweBenchVerified => "swe_bench_verified_inst.md",
            Self::FinanceProject => "end_to_end_eval/finance_tracker_inst.md",
            Self::SpamProject => "end_to_end_eval/spam_classifier_inst.md",
        }
    }

    pub fn guidelines_template(self) -> &'static str {
        match self {
            Self::HumanEval => "human_eval_env.md",
            Self::SweBenchVerified => "swe_bench_env.md",
            Self::FinanceProject => "end_to_end_eval/finance_tracker_env.md",
            Self::SpamProject => "end_to_end_eval/spam_classifier_env.md",
        }
    }
}

/// The shape of one task: what the session must produce and where.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Target {
    /// A single function written to `agent_sol_{id}.py`.
    Function { task_id: String },
    /// A repository patch written to `agent_sol_{id}.diff`, worked on inside
    /// a named container.
    Patch { task_id: String, container: String },
    /// A whole project in the output directory. The task id selects the
    /// project family.
    Project { task_id: String },
}

impl Target {
    pub fn task_id(&self) -> &str {
        match self {
            Self::Function { task_id } | Self::Patch { task_id, .. } | Self::Project { task_id } => {
                task_id
            }
        }
    }

    pub fn container(&self) -> Option<&str> {
        match self {
            Self::Patch { container, .. } => Some(container),
            _ => None,
        }
    }

    pub fn output_file_name(&self) -> Option<String> {
        match self {
            Self::Function { task_id } => Some(format!("agent_sol_{task_id}.py")),
            Self::Patch { task_id, .. } => Some(format!("agent_sol_{task_id}.diff")),
            Self::Project { .. } => None,
        }
    }

    pub fn benchmark(&self) -> Result<Benchmark, EngineError> {
        match self {
            Self::Function { .. } => Ok(Benchmark::HumanEval),
            Self::Patch { .. } => Ok(Benchmark::SweBenchVerified),
            Self::Project { task_id } => {
                let lowered = task_id.to_lowercase();
                if lowered.contains("finance") {
                    Ok(Benchmark::FinanceProject)
                } else if lowered.contains("spam") {
                    Ok(Benchmark::SpamProject)
                } else {
                    Err(EngineError::UnknownProject(task_id.clone()))
                }
            }
        }
    }
}
