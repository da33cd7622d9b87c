// Execution graph engine
//
// Drives the nodes of one workflow execution in topological order, assembles
// per-node inputs from typed connections, dispatches to registered node
// executors and owns the pause/resume state machine plus the timeout reaper.
//
// Key design decisions:
// - Executors return result values (status + output), never raise for
//   control flow; the retry policy reads the result tag
// - One execution runs its nodes sequentially; concurrency happens across
//   executions, not inside one
// - The resume cursor (per-node outputs) is persisted in execution_data so a
//   paused execution can continue in another process

pub mod context;
pub mod engine;
pub mod executors;
pub mod reaper;
pub mod state;

pub use context::{NodeExecutionContext, NodeExecutionResult, NodeStatus, PauseRequest};
pub use engine::ExecutionEngine;
pub use executors::{NodeExecutor, NodeExecutorRegistry};
pub use reaper::{ReaperPass, TimeoutReaper};
pub use state::ExecutionStateManager;
