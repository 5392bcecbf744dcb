use conclave_core::{RuntimeError, ToolOutput};
use conclave_trace::TraceError;

/// Failures of the subordinate pool. Lifecycle variants are data for the
/// primary session, rendered through [`PoolError::to_tool_output`].
#[derive(Debug, thiserror::Error)]
pub enum PoolError {
    #[error("ERROR: Subagents not spawned. Call spawn() first.")]
    NotSpawned,

    #[error("ERROR: Subagents already spawned")]
    AlreadySpawned,

    #[error("ERROR: Subagent '{requested}' not found. Available: {known:?}")]
    UnknownAgent { requested: String, known: Vec<String> },

    #[error("ERROR: Subagent '{identity}' failed: {source}")]
    Session {
        identity: String,
        #[source]
        source: RuntimeError,
    },

    #[error("failed to connect subagent '{identity}': {source}")]
    Connect {
        identity: String,
        #[source]
        source: RuntimeError,
    },

    #[error(transparent)]
    Trace(#[from] TraceError),
}

impl PoolError {
    pub fn error_kind(&self) -> &'static str {
        match self {
            Self::NotSpawned => "not_spawned",
            Self::AlreadySpawned => "already_spawned",
            Self::UnknownAgent { .. } => "unknown_agent",
            Self::Session { .. } => "session",
            Self::Connect { .. } => "connect",
            Self::Trace(_) => "trace",
        }
    }

    /// Errors a primary session can see and adapt to, as opposed to ones
    /// that abort the orchestration.
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, Self::Connect { .. } | Self::Trace(_))
    }

    pub fn to_tool_output(&self) -> ToolOutput {
        ToolOutput::error(self.to_string())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("trace error: {0}")]
    Trace(#[from] TraceError),

    #[error("runtime error: {0}")]
    Runtime(#[from] RuntimeError),

    #[error("pool error: {0}")]
    Pool(#[from] PoolError),

    #[error("prompt error: {0}")]
    Prompt(String),

    #[error("unknown project task id: {0}")]
    UnknownProject(String),

    #[error("{0}")]
    Internal(String),
}

impl EngineError {
    pub fn error_kind(&self) -> &'static str {
        match self {
            Self::Trace(_) => "trace",
            Self::Runtime(e) => e.error_kind(),
            Self::Pool(e) => e.error_kind(),
            Self::Prompt(_) => "prompt",
            Self::UnknownProject(_) => "unknown_project",
            Self::Internal(_) => "internal",
        }
    }
}
