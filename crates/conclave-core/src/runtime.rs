use async_trait::async_trait;

use crate::errors::RuntimeError;
use crate::events::SessionEvent;
use crate::ids::ToolCallId;
use crate::session::SessionSpec;
use crate::tools::ToolOutput;

/// Trait implemented by each external agent session runtime.
#[async_trait]
pub trait SessionRuntime: Send + Sync {
    fn name(&self) -> &str;

    /// Open a persistent session for `spec`. No exchange is started.
    async fn connect(&self, spec: &SessionSpec) -> Result<Box<dyn SessionConnection>, RuntimeError>;
}

/// One live session. Exchanges are strictly sequential: `send` starts one,
/// `next_event` drains it, and `None` is returned once its terminal
/// statistics event has been yielded.
#[async_trait]
pub trait SessionConnection: Send {
    fn identity(&self) -> &str;

    async fn send(&mut self, message: &str) -> Result<(), RuntimeError>;

    async fn next_event(&mut self) -> Result<Option<SessionEvent>, RuntimeError>;

    /// Answer a host tool invocation seen in the current exchange.
    async fn answer_tool(&mut self, call_id: &ToolCallId, output: ToolOutput) -> Result<(), RuntimeError>;

    async fn disconnect(&mut self) -> Result<(), RuntimeError>;
}
