// Domain model for the workflow trigger and orchestration service
//
// Key design decisions:
// - Workflows, nodes and connections are plain serde types; dynamic payloads
//   stay as serde_json values instead of bespoke wrappers
// - Node and trigger kinds are tagged enums dispatched through registries,
//   not trait-object hierarchies per variant
// - Persistence, locking, credentials and notification are trait seams so the
//   engine and triggers never depend on a concrete backend
// - In-memory implementations live here for tests and in-process deployments

pub mod credentials;
pub mod error;
pub mod execution;
pub mod graph;
pub mod locks;
pub mod node_id;
pub mod notify;
pub mod repository;
pub mod trigger;
pub mod workflow;

// In-memory implementations for tests and single-process deployments
pub mod memory;

pub use credentials::{CredentialProvider, NoCredentials};
pub use error::{Error, Result};
pub use execution::{
    Execution, ExecutionStatus, NextStep, PauseReason, PauseRecord, PauseStatus, ResumeReason,
};
pub use graph::{execution_order, has_incoming, incoming_connections};
pub use locks::LockManager;
pub use memory::{InMemoryLockManager, InMemoryRepository};
pub use node_id::{ensure_unique_node_ids, generate_node_id, is_valid_node_id};
pub use notify::Notifier;
pub use repository::{ApiCallLog, ExecutionLogEntry, LogLevel, Repository};
pub use trigger::{DispatchOutcome, DispatchStatus, TriggerHealth, TriggerKind, TriggerStatus};
pub use workflow::{
    Connection, ConnectionType, ConnectionsMap, ErrorPolicy, Node, NodeType, Workflow,
    WorkflowSettings,
};
