//! Command lists and the execution tracking of command queues.

mod list;
mod queue;
mod set;

pub use list::{CommandList, CommandListCallback, CommandListState};
pub use queue::CommandQueue;
pub use set::{CommandListSet, CompletedCallback, ExecutionState};
