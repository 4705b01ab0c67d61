//! Per-run isolated working directory (§4.8) and `triggers` file-glob gate
//! used by the Planner to decide whether a step's declared triggers match
//! the event's changed-file list.

mod triggers;
mod workspace;

pub use triggers::{matches_triggers, TriggersError};
pub use workspace::{WorkspaceHandle, WorkspaceManager};
