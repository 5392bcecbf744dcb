//! Session runtimes: a child-process runtime speaking newline-delimited JSON
//! and a scripted runtime for tests and dry runs.

pub mod mock;
pub mod process;
pub mod protocol;

pub use mock::{ScriptedReply, ScriptedRuntime};
pub use process::ProcessRuntime;
pub use protocol::{InboundFrame, OutboundFrame};
