use std::path::Path;
use std::sync::Arc;

use tracing::{debug, info, instrument, warn};

use conclave_core::tools::DELEGATION_TOOL;
use conclave_core::{
    ContentBlock, SessionConnection, SessionEvent, SessionRuntime, SessionSpec, ToolOutput,
    ToolUse,
};
use conclave_trace::TraceRecorder;

use crate::error::{EngineError, PoolError};
use crate::pool::SubordinatePool;
use crate::prompts::{assemble, PromptLibrary};
use crate::target::Target;
use crate::topology::{RoleSpec, Topology};

const DEFAULT_MAX_TURNS: u32 = 15;

#[derive(Clone, Debug)]
pub struct StrategyConfig {
    pub model: Option<String>,
    pub max_turns: u32,
    pub debug: bool,
}

impl Default for StrategyConfig {
    fn default() -> Self {
        Self {
            model: None,
            max_turns: DEFAULT_MAX_TURNS,
            debug: false,
        }
    }
}

/// One topology bound to a runtime and a prompt library.
///
/// The `run_*` entry points differ only in the target they describe; all of
/// them go through [`Strategy::run`], which builds the sessions and hands
/// them to a single execution path.
pub struct Strategy {
    topology: Topology,
    runtime: Arc<dyn SessionRuntime>,
    prompts: Arc<PromptLibrary>,
    config: StrategyConfig,
}

impl Strategy {
    pub fn new(
        topology: Topology,
        runtime: Arc<dyn SessionRuntime>,
        prompts: Arc<PromptLibrary>,
        config: StrategyConfig,
    ) -> Self {
        Self {
            topology,
            runtime,
            prompts,
            config,
        }
    }

    pub fn topology(&self) -> Topology {
        self.topology
    }

    /// Write one function to `agent_sol_{task_id}.py` in `output_dir`.
    pub async fn run_function(
        &self,
        task: &str,
        task_id: &str,
        output_dir: &Path,
    ) -> Result<TraceRecorder, EngineError> {
        let target = Target::Function {
            task_id: task_id.to_string(),
        };
        self.run(task, &target, output_dir).await
    }

    /// Produce `agent_sol_{task_id}.diff` for a repository inside `container`.
    pub async fn run_patch(
        &self,
        task: &str,
        task_id: &str,
        output_dir: &Path,
        container: &str,
    ) -> Result<TraceRecorder, EngineError> {
        let target = Target::Patch {
            task_id: task_id.to_string(),
            container: container.to_string(),
        };
        self.run(task, &target, output_dir).await
    }

    /// Build a whole project in `output_dir`.
    pub async fn run_project(
        &self,
        task: &str,
        task_id: &str,
        output_dir: &Path,
    ) -> Result<TraceRecorder, EngineError> {
        let target = Target::Project {
            task_id: task_id.to_string(),
        };
        self.run(task, &target, output_dir).await
    }

    #[instrument(skip_all, fields(strategy = %self.topology, task_id = %target.task_id()))]
    pub async fn run(
        &self,
        task: &str,
        target: &Target,
        output_dir: &Path,
    ) -> Result<TraceRecorder, EngineError> {
        let (primary, subordinates) = self.build_sessions(target, output_dir)?;
        self.execute(primary, subordinates, task).await
    }

    /// Assemble the primary and subordinate sessions for `target`.
    ///
    /// Subordinates get the environment guidelines and working parameters
    /// but not the benchmark's tagged instructions; those are the primary's.
    pub fn build_sessions(
        &self,
        target: &Target,
        output_dir: &Path,
    ) -> Result<(SessionSpec, Vec<SessionSpec>), EngineError> {
        let table = self.topology.table();
        let benchmark = target.benchmark()?;
        let instructions = self.prompts.get(benchmark.instructions_template())?;
        let guidelines = self.prompts.get(benchmark.guidelines_template())?;
        let output_dir_param = output_dir.display().to_string();
        let max_turn = self.config.max_turns.to_string();

        let mut role_params = vec![
            ("max_turn", max_turn.clone()),
            ("output_dir_param", output_dir_param.clone()),
        ];
        if let Some(container) = target.container() {
            role_params.push(("container_name_param", container.to_string()));
        }
        let subordinates = table
            .subordinates
            .iter()
            .map(|role| {
                let base = self.prompts.get(role.prompt)?;
                let prompt = assemble(base, "", guidelines, &role_params);
                Ok(self.session_spec(role, prompt, output_dir))
            })
            .collect::<Result<Vec<_>, EngineError>>()?;

        let ids = table.subordinate_ids();
        let mut params = Vec::new();
        if !ids.is_empty() {
            params.push(("count_param", ids.len().to_string()));
            params.push(("agent_ids_param", ids.join(", ")));
        }
        params.push(("output_dir_param", output_dir_param));
        if let Some(file_name) = target.output_file_name() {
            params.push(("output_file_name_param", file_name));
        }
        if let Some(container) = target.container() {
            params.push(("container_name_param", container.to_string()));
        }
        params.push(("max_turn", max_turn));

        let base = self.prompts.get(table.primary.prompt)?;
        let prompt = assemble(base, instructions, guidelines, &params);
        let primary = subordinates
            .iter()
            .cloned()
            .fold(self.session_spec(&table.primary, prompt, output_dir), |spec, sub| {
                spec.with_sub_session(sub)
            });
        Ok((primary, subordinates))
    }

    fn session_spec(&self, role: &RoleSpec, instructions: String, output_dir: &Path) -> SessionSpec {
        let spec = SessionSpec::new(role.identity, instructions, output_dir)
            .with_max_turns(self.config.max_turns)
            .with_allowed_tools(role.profile.allowed_tools())
            .with_disallowed_tools(role.profile.disallowed_tools().iter().copied())
            .with_debug(self.config.debug);
        match &self.config.model {
            Some(model) => spec.with_model(model.clone()),
            None => spec,
        }
    }

    /// Spawn, drive the primary, and always shut the pool down before
    /// returning, whether the drive succeeded or not.
    async fn execute(
        &self,
        primary: SessionSpec,
        subordinates: Vec<SessionSpec>,
        task: &str,
    ) -> Result<TraceRecorder, EngineError> {
        let mut recorder = TraceRecorder::new(self.config.debug);
        recorder.set_instructions(primary.instructions());
        recorder.set_task(task);

        let mut pool = SubordinatePool::new(Arc::clone(&self.runtime), subordinates);
        info!(
            primary = primary.identity(),
            subordinates = ?pool.identities(),
            "orchestration started"
        );

        let outcome = match pool.spawn().await {
            Ok(()) => self.drive_primary(&primary, task, &mut recorder, &mut pool).await,
            Err(e) => Err(e.into()),
        };

        match pool.shutdown().await {
            Ok(report) if !report.is_clean() => {
                warn!(failed = report.failures.len(), "subordinate shutdown was not clean")
            }
            Ok(_) => {}
            Err(e) => debug!(error = %e, "nothing to shut down"),
        }

        match outcome {
            Ok(()) => {
                let summary = recorder.summary();
                info!(
                    turns = recorder.turns().len(),
                    total_turns = summary.total_turns,
                    cost_usd = summary.total_cost_usd,
                    "orchestration finished"
                );
                Ok(recorder)
            }
            Err(e) => {
                warn!(error = %e, kind = e.error_kind(), "orchestration failed");
                Err(e)
            }
        }
    }

    async fn drive_primary(
        &self,
        primary: &SessionSpec,
        task: &str,
        recorder: &mut TraceRecorder,
        pool: &mut SubordinatePool,
    ) -> Result<(), EngineError> {
        let mut conn = self.runtime.connect(primary).await?;
        let outcome = drive(&mut *conn, primary.identity(), task, recorder, pool).await;
        if let Err(e) = conn.disconnect().await {
            warn!(identity = primary.identity(), error = %e, "primary close failed");
        }
        outcome
    }
}

/// Feed `task` to the primary and record its exchange.
///
/// Each primary turn is sealed by the tool result that answers it, or by the
/// final statistics. A turn requesting delegation is sealed before the
/// requests are relayed so the subordinate's turn can open; each relayed
/// answer is then written back onto that sealed turn.
async fn drive(
    conn: &mut dyn SessionConnection,
    identity: &str,
    task: &str,
    recorder: &mut TraceRecorder,
    pool: &mut SubordinatePool,
) -> Result<(), EngineError> {
    conn.send(task).await?;
    while let Some(event) = conn.next_event().await? {
        match event {
            SessionEvent::AssistantContent { content } => {
                if recorder.open_identity() != Some(identity) {
                    recorder.start_turn(identity)?;
                }
                let mut delegations = Vec::new();
                for block in content {
                    match block {
                        ContentBlock::Text { text } => recorder.add_assistant_text(&text)?,
                        ContentBlock::ToolUse(tool_use) => {
                            recorder
                                .add_tool_invocation(&tool_use.name, tool_use.arguments.clone())?;
                            if tool_use.name == DELEGATION_TOOL {
                                delegations.push(tool_use);
                            }
                        }
                    }
                }
                if delegations.is_empty() {
                    continue;
                }
                recorder.end_turn();
                for tool_use in delegations {
                    let output = relay(pool, recorder, &tool_use).await?;
                    recorder.resolve_sealed_invocation(
                        identity,
                        DELEGATION_TOOL,
                        &output.content,
                        output.is_error,
                    );
                    conn.answer_tool(&tool_use.id, output).await?;
                }
            }
            SessionEvent::ToolResult(result) => {
                recorder.add_tool_result(&result.content, result.is_error);
                recorder.end_turn();
            }
            SessionEvent::Statistics(stats) => {
                recorder.end_turn();
                recorder.set_statistics(stats, None);
            }
        }
    }
    Ok(())
}

/// Pool failures the primary can act on come back as error output; trace
/// contract violations abort the run.
async fn relay(
    pool: &mut SubordinatePool,
    recorder: &mut TraceRecorder,
    tool_use: &ToolUse,
) -> Result<ToolOutput, EngineError> {
    let (Some(agent_id), Some(message)) = (
        tool_use.str_argument("agent_id"),
        tool_use.str_argument("message"),
    ) else {
        return Ok(ToolOutput::error(format!(
            "ERROR: {DELEGATION_TOOL} requires string arguments 'agent_id' and 'message'"
        )));
    };
    match pool.communicate(recorder, agent_id, message).await {
        Ok(reply) => Ok(ToolOutput::ok(reply)),
        Err(PoolError::Trace(e)) => Err(e.into()),
        Err(e) if e.is_recoverable() => {
            warn!(agent_id, error = %e, kind = e.error_kind(), "delegation failed");
            Ok(e.to_tool_output())
        }
        Err(e) => Err(e.into()),
    }
}
