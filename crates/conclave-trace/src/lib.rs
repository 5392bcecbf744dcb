//! Turn-structured execution trace: the recorder that sessions write into,
//! the frozen snapshot it produces, and the JSON file those snapshots are
//! merged into.

pub mod error;
pub mod recorder;
pub mod render;
pub mod snapshot;
pub mod store;

pub use error::TraceError;
pub use recorder::TraceRecorder;
pub use snapshot::{ToolInvocation, TraceSnapshot, TraceSummary, TurnRecord};
pub use store::{completed_task_ids, TraceStore};
