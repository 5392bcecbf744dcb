//! Shared vocabulary between the orchestration engine and the external
//! agent session runtime: the event stream a session produces, the
//! statistics it reports, and the handle used to open it.

pub mod errors;
pub mod events;
pub mod ids;
pub mod runtime;
pub mod session;
pub mod stats;
pub mod tools;

pub use errors::RuntimeError;
pub use events::{ContentBlock, SessionEvent, ToolResultBlock, ToolUse};
pub use ids::{SessionId, ToolCallId};
pub use runtime::{SessionConnection, SessionRuntime};
pub use session::SessionSpec;
pub use stats::SessionStats;
pub use tools::ToolOutput;
