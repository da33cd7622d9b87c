// Sequential graph engine for one workflow execution

use std::sync::Arc;
use std::time::{Duration, Instant};

use flowgate_core::{
    execution_order, incoming_connections, ConnectionType, Error, ErrorPolicy, Execution,
    ExecutionLogEntry, ExecutionStatus, LogLevel, Node, Repository, Result, ResumeReason,
    Workflow,
};
use serde::Serialize;
use serde_json::{json, Map, Value};
use tracing::{debug, info, warn};

use crate::context::{NodeExecutionContext, NodeExecutionResult, NodeStatus};
use crate::executors::NodeExecutorRegistry;
use crate::state::ExecutionStateManager;

/// Where one merged piece of a node's input came from, kept for debugging
#[derive(Debug, Clone, Serialize)]
pub struct DataSource {
    pub source_node: String,
    pub connection_type: String,
    pub data_size: usize,
}

pub struct ExecutionEngine {
    repository: Arc<dyn Repository>,
    registry: Arc<NodeExecutorRegistry>,
    state: ExecutionStateManager,
}

impl ExecutionEngine {
    pub fn new(repository: Arc<dyn Repository>, registry: Arc<NodeExecutorRegistry>) -> Self {
        let state = ExecutionStateManager::new(repository.clone());
        Self {
            repository,
            registry,
            state,
        }
    }

    pub fn state(&self) -> &ExecutionStateManager {
        &self.state
    }

    /// Run a workflow from its trigger payload to completion (or the first
    /// pause). The execution must be freshly created (PENDING).
    pub async fn execute_workflow(
        &self,
        workflow: &Workflow,
        mut execution: Execution,
    ) -> Result<Execution> {
        if !workflow.active {
            return Err(Error::validation(format!(
                "workflow {} is not active",
                workflow.id
            )));
        }
        workflow.validate()?;

        self.repository.insert_execution(&execution).await?;
        execution.transition_to(ExecutionStatus::Running)?;
        self.repository.update_execution(&execution).await?;

        self.log_event(
            &execution.execution_id,
            "workflow_started",
            LogLevel::Info,
            format!("Started workflow {}", workflow.name),
            None,
        )
        .await;

        match workflow.settings.timeout_seconds {
            Some(seconds) => {
                let execution_id = execution.execution_id.clone();
                let deadline = Duration::from_secs(seconds);
                match tokio::time::timeout(deadline, self.drive(workflow, execution, None)).await {
                    Ok(result) => result,
                    Err(_) => self.fail_timed_out(&execution_id, seconds).await,
                }
            }
            None => self.drive(workflow, execution, None).await,
        }
    }

    /// Resume a paused execution. Validates resume conditions, then re-enters
    /// the node loop at the paused node with `resume_data` merged into its
    /// input map.
    pub async fn resume_execution(
        &self,
        execution_id: &str,
        reason: ResumeReason,
        resume_data: Value,
    ) -> Result<Execution> {
        let next = self
            .state
            .resume_execution(execution_id, reason, resume_data.clone())
            .await?;

        let execution = self
            .repository
            .get_execution(execution_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("execution {execution_id}")))?;
        let workflow = self
            .repository
            .get_workflow(execution.workflow_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("workflow {}", execution.workflow_id)))?;

        self.drive(&workflow, execution, Some((next.node_id, resume_data)))
            .await
    }

    /// The drive future was dropped at the deadline; reload and fail
    async fn fail_timed_out(&self, execution_id: &str, seconds: u64) -> Result<Execution> {
        warn!(execution_id, seconds, "workflow execution timed out");
        let mut execution = self
            .repository
            .get_execution(execution_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("execution {execution_id}")))?;

        if !execution.status.is_terminal() {
            execution.error_data = Some(json!({
                "error": format!("execution timed out after {seconds}s"),
            }));
            execution.transition_to(ExecutionStatus::Failed)?;
            self.repository.update_execution(&execution).await?;
        }
        Ok(execution)
    }

    /// The node loop. `resume` carries the paused node id and the response
    /// data when re-entering after a pause.
    async fn drive(
        &self,
        workflow: &Workflow,
        mut execution: Execution,
        resume: Option<(String, Value)>,
    ) -> Result<Execution> {
        let order = execution_order(&workflow.nodes, &workflow.connections);
        let total_steps = order.len() as u32;

        let mut node_results: Map<String, Value> = execution
            .execution_data
            .get("node_results")
            .and_then(Value::as_object)
            .cloned()
            .unwrap_or_default();

        for (index, node_id) in order.iter().enumerate() {
            if node_results.contains_key(node_id) {
                continue;
            }

            // Cancellation is cooperative: abort at the next node boundary
            if let Some(current) = self.repository.get_execution(&execution.execution_id).await? {
                if current.status == ExecutionStatus::Cancelled {
                    info!(execution_id = %execution.execution_id, "execution cancelled, stopping");
                    return Ok(current);
                }
            }

            let Some(node) = workflow.node(node_id) else {
                return self
                    .fail_execution(
                        execution,
                        node_results,
                        node_id,
                        format!("node {node_id} not found in workflow definition"),
                        None,
                    )
                    .await;
            };

            if node.disabled {
                debug!(node_id = %node_id, "node disabled, skipping");
                node_results.insert(node_id.clone(), node_result_value(&NodeExecutionResult::skipped()));
                continue;
            }

            let (mut input_data, data_sources) =
                assemble_input(node_id, workflow, &node_results, &execution.trigger_data);

            if let Some((resume_node, resume_data)) = &resume {
                if resume_node == node_id {
                    if let Value::Object(data) = resume_data {
                        for (key, value) in data {
                            input_data.insert(key.clone(), value.clone());
                        }
                    }
                }
            }

            let context = NodeExecutionContext {
                node: node.clone(),
                workflow_id: workflow.id,
                execution_id: execution.execution_id.clone(),
                user_id: execution.user_id.clone(),
                input_data,
                static_data: workflow.static_data.clone(),
                metadata: Map::new(),
            };

            let result = self.run_node(workflow, node, &context).await;

            self.log_node_trace(
                &execution.execution_id,
                node,
                &result,
                index as u32 + 1,
                total_steps,
                &data_sources,
            )
            .await;

            match result.status {
                NodeStatus::Success | NodeStatus::Skipped => {
                    node_results.insert(node_id.clone(), node_result_value(&result));
                }
                NodeStatus::Cancelled => {
                    execution.execution_data = json!({ "node_results": node_results });
                    execution.transition_to(ExecutionStatus::Cancelled)?;
                    self.repository.update_execution(&execution).await?;
                    return Ok(execution);
                }
                NodeStatus::Paused => {
                    let pause = result.pause.clone().ok_or_else(|| {
                        Error::Internal(anyhow::anyhow!("paused result without pause request"))
                    })?;

                    execution.execution_data = json!({ "node_results": node_results });
                    self.repository.update_execution(&execution).await?;

                    self.state
                        .pause_execution(
                            &execution.execution_id,
                            node_id,
                            pause.reason,
                            pause.resume_conditions,
                            pause.timeout,
                        )
                        .await?;

                    return self
                        .repository
                        .get_execution(&execution.execution_id)
                        .await?
                        .ok_or_else(|| {
                            Error::NotFound(format!("execution {}", execution.execution_id))
                        });
                }
                NodeStatus::Error => {
                    let message = result
                        .error_message
                        .clone()
                        .unwrap_or_else(|| "node execution failed".to_string());

                    if node.on_error == ErrorPolicy::ContinueOnError {
                        warn!(node_id = %node_id, %message, "node failed, continuing per policy");
                        node_results.insert(node_id.clone(), node_result_value(&result));
                        continue;
                    }

                    return self
                        .fail_execution(
                            execution,
                            node_results,
                            node_id,
                            message,
                            result.error_details.clone(),
                        )
                        .await;
                }
            }
        }

        // Result of the run: the output of the last node that produced one
        let mut result_data = None;
        for id in order.iter().rev() {
            if let Some(entry) = node_results.get(id) {
                if entry.get("status").and_then(Value::as_str) == Some("SUCCESS") {
                    result_data = entry.get("output_data").cloned();
                    break;
                }
            }
        }

        execution.execution_data = json!({ "node_results": node_results });
        execution.result_data = result_data;
        execution.transition_to(ExecutionStatus::Completed)?;
        self.repository.update_execution(&execution).await?;

        self.log_event(
            &execution.execution_id,
            "workflow_completed",
            LogLevel::Info,
            format!("Completed workflow {}", workflow.name),
            None,
        )
        .await;

        Ok(execution)
    }

    /// Execute one node, applying the RETRY policy when configured
    async fn run_node(
        &self,
        workflow: &Workflow,
        node: &Node,
        context: &NodeExecutionContext,
    ) -> NodeExecutionResult {
        let Some(executor) = self.registry.get(node.node_type) else {
            return NodeExecutionResult::error(format!(
                "no executor registered for node type {}",
                node.node_type
            ));
        };
        if !executor.can_execute(node) {
            return NodeExecutionResult::error(format!(
                "unsupported subtype {:?} for node type {}",
                node.subtype, node.node_type
            ));
        }

        let max_attempts = if node.on_error == ErrorPolicy::Retry {
            1 + workflow.settings.max_retries
        } else {
            1
        };

        let mut attempt = 0;
        loop {
            let started = Instant::now();
            let mut result = executor.execute(context).await;
            result.execution_time_ms = started.elapsed().as_millis() as u64;

            attempt += 1;
            if result.status != NodeStatus::Error
                || attempt >= max_attempts
                || !result.is_retryable()
            {
                return result;
            }

            let backoff = workflow
                .settings
                .retry_backoff_ms
                .saturating_mul(1u64 << u32::min(attempt - 1, 16));
            debug!(
                node_id = %node.id,
                attempt,
                backoff_ms = backoff,
                "node failed, retrying"
            );
            tokio::time::sleep(Duration::from_millis(backoff)).await;
        }
    }

    async fn fail_execution(
        &self,
        mut execution: Execution,
        node_results: Map<String, Value>,
        failed_node: &str,
        message: String,
        details: Option<Value>,
    ) -> Result<Execution> {
        execution.execution_data = json!({ "node_results": node_results });
        execution.error_data = Some(json!({
            "failed_node": failed_node,
            "error": message,
            "details": details,
        }));
        execution.transition_to(ExecutionStatus::Failed)?;
        self.repository.update_execution(&execution).await?;

        self.log_event(
            &execution.execution_id,
            "workflow_failed",
            LogLevel::Error,
            format!("Node {failed_node} failed: {message}"),
            None,
        )
        .await;

        Ok(execution)
    }

    async fn log_node_trace(
        &self,
        execution_id: &str,
        node: &Node,
        result: &NodeExecutionResult,
        step_number: u32,
        total_steps: u32,
        data_sources: &[DataSource],
    ) {
        let (event_type, level) = match result.status {
            NodeStatus::Error => ("node_failed", LogLevel::Error),
            NodeStatus::Paused => ("node_paused", LogLevel::Info),
            NodeStatus::Skipped => ("node_skipped", LogLevel::Info),
            _ => ("node_completed", LogLevel::Info),
        };

        let mut entry = ExecutionLogEntry::new(
            execution_id,
            event_type,
            level,
            match &result.error_message {
                Some(message) => format!("Node {} {}: {message}", node.name, result.status.as_str()),
                None => format!("Node {} {}", node.name, result.status.as_str()),
            },
        );
        entry.node_id = Some(node.id.clone());
        entry.node_name = Some(node.name.clone());
        entry.node_type = Some(node.node_type.as_str().to_string());
        entry.step_number = Some(step_number);
        entry.total_steps = Some(total_steps);
        entry.duration_seconds = Some(result.execution_time_ms as f64 / 1000.0);
        entry.data = json!({
            "output_keys": result.output_data.keys().collect::<Vec<_>>(),
            "data_sources": data_sources,
            "logs": result.logs.clone(),
        });

        if let Err(e) = self.repository.append_execution_log(&entry).await {
            warn!("failed to append execution log: {e}");
        }
    }

    async fn log_event(
        &self,
        execution_id: &str,
        event_type: &str,
        level: LogLevel,
        message: String,
        data: Option<Value>,
    ) {
        let mut entry = ExecutionLogEntry::new(execution_id, event_type, level, message);
        if let Some(data) = data {
            entry.data = data;
        }
        if let Err(e) = self.repository.append_execution_log(&entry).await {
            warn!("failed to append execution log: {e}");
        }
    }
}

/// Assemble a node's input map per the connection rules: the trigger payload
/// seeds nodes with no inbound edges; `main` and `memory` outputs merge
/// flatly; every other connection type is namespaced under its type key.
fn assemble_input(
    node_id: &str,
    workflow: &Workflow,
    node_results: &Map<String, Value>,
    trigger_data: &Value,
) -> (Map<String, Value>, Vec<DataSource>) {
    let incoming = incoming_connections(node_id, &workflow.connections);

    if incoming.is_empty() {
        let base = trigger_data.as_object().cloned().unwrap_or_default();
        return (base, Vec::new());
    }

    let mut input = Map::new();
    let mut sources = Vec::new();

    for (source, conn_type) in incoming {
        let Some(result) = node_results.get(source) else {
            continue;
        };
        if result.get("status").and_then(Value::as_str) != Some("SUCCESS") {
            continue;
        }
        let Some(output) = result.get("output_data").and_then(Value::as_object) else {
            continue;
        };

        match conn_type {
            ConnectionType::Main | ConnectionType::Memory => {
                for (key, value) in output {
                    input.insert(key.clone(), value.clone());
                }
            }
            other => {
                let slot = input
                    .entry(other.as_str().to_string())
                    .or_insert_with(|| Value::Object(Map::new()));
                if let Value::Object(slot) = slot {
                    for (key, value) in output {
                        slot.insert(key.clone(), value.clone());
                    }
                }
            }
        }

        sources.push(DataSource {
            source_node: source.to_string(),
            connection_type: conn_type.as_str().to_string(),
            data_size: serde_json::to_string(output).map(|s| s.len()).unwrap_or(0),
        });
    }

    (input, sources)
}

fn node_result_value(result: &NodeExecutionResult) -> Value {
    json!({
        "status": result.status.as_str(),
        "output_data": result.output_data,
        "error_message": result.error_message,
        "execution_time_ms": result.execution_time_ms,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executors::NodeExecutor;
    use async_trait::async_trait;
    use flowgate_core::{
        InMemoryRepository, NoCredentials, NodeType, PauseStatus,
    };
    use std::sync::atomic::{AtomicU32, Ordering};

    fn node(id: &str, name: &str, ty: NodeType, subtype: &str) -> Node {
        let mut n = Node::new(name, ty, subtype);
        n.id = id.to_string();
        n
    }

    fn engine_with(
        repo: Arc<InMemoryRepository>,
        registry: NodeExecutorRegistry,
    ) -> ExecutionEngine {
        ExecutionEngine::new(repo as Arc<dyn Repository>, Arc::new(registry))
    }

    fn default_engine(repo: Arc<InMemoryRepository>) -> ExecutionEngine {
        engine_with(
            repo,
            NodeExecutorRegistry::with_builtins(Arc::new(NoCredentials)),
        )
    }

    fn execution_for(workflow: &Workflow, trigger_data: Value) -> Execution {
        Execution::new(
            workflow.id,
            workflow.user_id.clone(),
            Some("manual".into()),
            trigger_data,
        )
    }

    #[tokio::test]
    async fn linear_workflow_completes_with_flowing_outputs() {
        let mut wf = Workflow::new("u1", "linear");
        wf.nodes.push(node("trigger_manual_aa000001", "start", NodeType::Trigger, "manual"));
        wf.nodes.push(
            node("action_map_aa000002", "map", NodeType::Action, "data_transformation")
                .with_parameter("mapping", json!({"who": "user"})),
        );
        wf.connect("trigger_manual_aa000001", ConnectionType::Main, "action_map_aa000002");

        let repo = Arc::new(InMemoryRepository::new());
        let engine = default_engine(repo.clone());

        let execution = execution_for(&wf, json!({"user": "dev", "trigger_type": "manual"}));
        let done = engine.execute_workflow(&wf, execution).await.unwrap();

        assert_eq!(done.status, ExecutionStatus::Completed);
        assert_eq!(done.result_data.unwrap(), json!({"who": "dev"}));

        let results = done.execution_data["node_results"].as_object().unwrap();
        assert_eq!(results.len(), 2);
        assert!(done.started_at.is_some());
        assert!(done.completed_at.unwrap() >= done.started_at.unwrap());

        let logs = repo.execution_logs().await;
        assert!(logs.iter().any(|l| l.event_type == "workflow_started"));
        assert!(logs.iter().any(|l| l.event_type == "workflow_completed"));
        let node_log = logs
            .iter()
            .find(|l| l.node_id.as_deref() == Some("action_map_aa000002"))
            .unwrap();
        assert_eq!(node_log.step_number, Some(2));
        assert_eq!(node_log.total_steps, Some(2));
    }

    #[tokio::test]
    async fn inactive_workflow_is_never_run() {
        let mut wf = Workflow::new("u1", "inactive");
        wf.active = false;
        wf.nodes.push(node("trigger_manual_aa000001", "start", NodeType::Trigger, "manual"));

        let repo = Arc::new(InMemoryRepository::new());
        let engine = default_engine(repo.clone());
        let execution = execution_for(&wf, json!({}));

        assert!(engine.execute_workflow(&wf, execution).await.is_err());
        assert!(repo.executions().await.is_empty());
    }

    #[tokio::test]
    async fn disabled_node_is_skipped() {
        let mut wf = Workflow::new("u1", "skippy");
        wf.nodes.push(node("trigger_manual_aa000001", "start", NodeType::Trigger, "manual"));
        let mut disabled = node("action_noop_aa000002", "off", NodeType::Action, "noop");
        disabled.disabled = true;
        wf.nodes.push(disabled);
        wf.connect("trigger_manual_aa000001", ConnectionType::Main, "action_noop_aa000002");

        let repo = Arc::new(InMemoryRepository::new());
        let engine = default_engine(repo.clone());
        let done = engine
            .execute_workflow(&wf, execution_for(&wf, json!({})))
            .await
            .unwrap();

        assert_eq!(done.status, ExecutionStatus::Completed);
        assert_eq!(
            done.execution_data["node_results"]["action_noop_aa000002"]["status"],
            json!("SKIPPED")
        );
    }

    #[tokio::test]
    async fn stop_policy_fails_execution_with_failed_node() {
        let mut wf = Workflow::new("u1", "failing");
        wf.nodes.push(node("trigger_manual_aa000001", "start", NodeType::Trigger, "manual"));
        // data_transformation without mapping fails at run time
        wf.nodes.push(node("action_map_aa000002", "map", NodeType::Action, "data_transformation"));
        wf.connect("trigger_manual_aa000001", ConnectionType::Main, "action_map_aa000002");

        let repo = Arc::new(InMemoryRepository::new());
        let engine = default_engine(repo.clone());
        let done = engine
            .execute_workflow(&wf, execution_for(&wf, json!({})))
            .await
            .unwrap();

        assert_eq!(done.status, ExecutionStatus::Failed);
        let error_data = done.error_data.unwrap();
        assert_eq!(error_data["failed_node"], json!("action_map_aa000002"));
    }

    #[tokio::test]
    async fn continue_policy_records_error_and_proceeds() {
        let mut wf = Workflow::new("u1", "tolerant");
        wf.nodes.push(node("trigger_manual_aa000001", "start", NodeType::Trigger, "manual"));
        let mut failing = node("action_map_aa000002", "map", NodeType::Action, "data_transformation");
        failing.on_error = ErrorPolicy::ContinueOnError;
        wf.nodes.push(failing);
        wf.nodes.push(node("action_noop_aa000003", "after", NodeType::Action, "noop"));
        wf.connect("trigger_manual_aa000001", ConnectionType::Main, "action_map_aa000002");
        wf.connect("action_map_aa000002", ConnectionType::Main, "action_noop_aa000003");

        let repo = Arc::new(InMemoryRepository::new());
        let engine = default_engine(repo.clone());
        let done = engine
            .execute_workflow(&wf, execution_for(&wf, json!({})))
            .await
            .unwrap();

        assert_eq!(done.status, ExecutionStatus::Completed);
        assert_eq!(
            done.execution_data["node_results"]["action_map_aa000002"]["status"],
            json!("ERROR")
        );
        assert_eq!(
            done.execution_data["node_results"]["action_noop_aa000003"]["status"],
            json!("SUCCESS")
        );
    }

    struct FlakyExecutor {
        calls: AtomicU32,
        fail_first: u32,
    }

    #[async_trait]
    impl NodeExecutor for FlakyExecutor {
        fn supported_subtypes(&self) -> Vec<&'static str> {
            Vec::new()
        }

        fn validate(&self, _node: &Node) -> Vec<String> {
            Vec::new()
        }

        async fn execute(&self, context: &NodeExecutionContext) -> NodeExecutionResult {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.fail_first {
                NodeExecutionResult::error("transient upstream failure")
            } else {
                NodeExecutionResult::success(context.input_data.clone())
            }
        }
    }

    #[tokio::test]
    async fn retry_policy_reattempts_until_success() {
        let mut wf = Workflow::new("u1", "retry");
        wf.settings.max_retries = 3;
        wf.settings.retry_backoff_ms = 1;
        let mut flaky = node("ai_agent_chat_aa000001", "agent", NodeType::AiAgent, "chat");
        flaky.on_error = ErrorPolicy::Retry;
        wf.nodes.push(flaky);

        let repo = Arc::new(InMemoryRepository::new());
        let mut registry = NodeExecutorRegistry::with_builtins(Arc::new(NoCredentials));
        registry.register(
            NodeType::AiAgent,
            Arc::new(FlakyExecutor {
                calls: AtomicU32::new(0),
                fail_first: 2,
            }),
        );
        let engine = engine_with(repo, registry);

        let done = engine
            .execute_workflow(&wf, execution_for(&wf, json!({"q": 1})))
            .await
            .unwrap();
        assert_eq!(done.status, ExecutionStatus::Completed);
    }

    #[tokio::test]
    async fn retry_policy_exhaustion_applies_stop_semantics() {
        let mut wf = Workflow::new("u1", "retry-exhausted");
        wf.settings.max_retries = 2;
        wf.settings.retry_backoff_ms = 1;
        let mut flaky = node("ai_agent_chat_aa000001", "agent", NodeType::AiAgent, "chat");
        flaky.on_error = ErrorPolicy::Retry;
        wf.nodes.push(flaky);

        let repo = Arc::new(InMemoryRepository::new());
        let mut registry = NodeExecutorRegistry::with_builtins(Arc::new(NoCredentials));
        registry.register(
            NodeType::AiAgent,
            Arc::new(FlakyExecutor {
                calls: AtomicU32::new(0),
                fail_first: 10,
            }),
        );
        let engine = engine_with(repo, registry);

        let done = engine
            .execute_workflow(&wf, execution_for(&wf, json!({})))
            .await
            .unwrap();
        assert_eq!(done.status, ExecutionStatus::Failed);
    }

    #[tokio::test]
    async fn missing_executor_is_a_runtime_node_error() {
        let mut wf = Workflow::new("u1", "unroutable");
        wf.nodes.push(node("external_action_x_aa000001", "ext", NodeType::ExternalAction, "email"));

        let repo = Arc::new(InMemoryRepository::new());
        let engine = default_engine(repo);
        let done = engine
            .execute_workflow(&wf, execution_for(&wf, json!({})))
            .await
            .unwrap();

        assert_eq!(done.status, ExecutionStatus::Failed);
        let error = done.error_data.unwrap();
        assert!(error["error"].as_str().unwrap().contains("no executor"));
    }

    #[tokio::test]
    async fn hil_node_pauses_then_resume_completes() {
        let mut wf = Workflow::new("u1", "hil");
        wf.nodes.push(node("trigger_manual_aa000001", "start", NodeType::Trigger, "manual"));
        wf.nodes.push(
            node("hil_approval_aa000002", "gate", NodeType::HumanInTheLoop, "approval")
                .with_parameter("timeout_seconds", json!(1))
                .with_parameter("timeout_action", json!("resume"))
                .with_parameter("timeout_default_data", json!({"approved": false})),
        );
        wf.nodes.push(node("action_noop_aa000003", "after", NodeType::Action, "noop"));
        wf.connect("trigger_manual_aa000001", ConnectionType::Main, "hil_approval_aa000002");
        wf.connect("hil_approval_aa000002", ConnectionType::Main, "action_noop_aa000003");

        let repo = Arc::new(InMemoryRepository::new());
        repo.add_workflow(wf.clone()).await;
        let engine = default_engine(repo.clone());

        let paused = engine
            .execute_workflow(&wf, execution_for(&wf, json!({"requested_by": "dev"})))
            .await
            .unwrap();
        assert_eq!(paused.status, ExecutionStatus::Paused);

        let record = repo.active_pause(&paused.execution_id).await.unwrap().unwrap();
        assert_eq!(record.paused_node_id, "hil_approval_aa000002");
        assert_eq!(record.timeout_action(), "resume");

        let done = engine
            .resume_execution(
                &paused.execution_id,
                ResumeReason::HumanResponse,
                json!({"approved": false}),
            )
            .await
            .unwrap();

        assert_eq!(done.status, ExecutionStatus::Completed);
        // Downstream nodes observed the resume data
        assert_eq!(
            done.execution_data["node_results"]["action_noop_aa000003"]["output_data"]["approved"],
            json!(false)
        );
        // The trigger node did not re-run on resume
        let pauses = repo.pauses().await;
        assert_eq!(pauses.len(), 1);
        assert_eq!(pauses[0].status, PauseStatus::Resumed);
    }

    /// A(AI_AGENT) --memory--> B(MEMORY) runs B first; A sees B's fields flat
    #[tokio::test]
    async fn memory_connection_inverts_order_and_merges_flat() {
        struct CaptureAgent;

        #[async_trait]
        impl NodeExecutor for CaptureAgent {
            fn supported_subtypes(&self) -> Vec<&'static str> {
                Vec::new()
            }
            fn validate(&self, _node: &Node) -> Vec<String> {
                Vec::new()
            }
            async fn execute(&self, context: &NodeExecutionContext) -> NodeExecutionResult {
                let mut output = Map::new();
                output.insert(
                    "seen_memory_context".into(),
                    context.input("memory_context").cloned().unwrap_or(Value::Null),
                );
                NodeExecutionResult::success(output)
            }
        }

        let mut wf = Workflow::new("u1", "memory-inversion");
        wf.nodes.push(node("aa_agent_node", "agent", NodeType::AiAgent, "chat"));
        wf.nodes.push(
            node("zz_memory_node", "mem", NodeType::Memory, "buffer")
                .with_parameter("messages", json!(["remembered line"])),
        );
        wf.connect("aa_agent_node", ConnectionType::Memory, "zz_memory_node");

        let repo = Arc::new(InMemoryRepository::new());
        let mut registry = NodeExecutorRegistry::with_builtins(Arc::new(NoCredentials));
        registry.register(NodeType::AiAgent, Arc::new(CaptureAgent));
        let engine = engine_with(repo, registry);

        let done = engine
            .execute_workflow(&wf, execution_for(&wf, json!({})))
            .await
            .unwrap();

        assert_eq!(done.status, ExecutionStatus::Completed);
        assert_eq!(
            done.result_data.unwrap()["seen_memory_context"],
            json!("remembered line")
        );
    }

    struct CancellingExecutor {
        repo: Arc<InMemoryRepository>,
    }

    #[async_trait]
    impl NodeExecutor for CancellingExecutor {
        fn supported_subtypes(&self) -> Vec<&'static str> {
            Vec::new()
        }
        fn validate(&self, _node: &Node) -> Vec<String> {
            Vec::new()
        }
        async fn execute(&self, context: &NodeExecutionContext) -> NodeExecutionResult {
            // Simulate an operator cancelling while this node runs
            let mut execution = self
                .repo
                .get_execution(&context.execution_id)
                .await
                .unwrap()
                .unwrap();
            execution.transition_to(ExecutionStatus::Cancelled).unwrap();
            self.repo.update_execution(&execution).await.unwrap();
            NodeExecutionResult::success(Map::new())
        }
    }

    #[tokio::test]
    async fn cancellation_aborts_at_the_next_node_boundary() {
        let mut wf = Workflow::new("u1", "cancel");
        wf.nodes.push(node("aa_first_node", "first", NodeType::AiAgent, "chat"));
        wf.nodes.push(node("zz_second_node", "second", NodeType::Action, "noop"));
        wf.connect("aa_first_node", ConnectionType::Main, "zz_second_node");

        let repo = Arc::new(InMemoryRepository::new());
        let mut registry = NodeExecutorRegistry::with_builtins(Arc::new(NoCredentials));
        registry.register(
            NodeType::AiAgent,
            Arc::new(CancellingExecutor { repo: repo.clone() }),
        );
        let engine = engine_with(repo.clone(), registry);

        let done = engine
            .execute_workflow(&wf, execution_for(&wf, json!({})))
            .await
            .unwrap();

        assert_eq!(done.status, ExecutionStatus::Cancelled);
        // The second node never ran
        let results = done.execution_data.get("node_results").and_then(Value::as_object);
        assert!(results.map_or(true, |r| !r.contains_key("zz_second_node")));
    }
}
