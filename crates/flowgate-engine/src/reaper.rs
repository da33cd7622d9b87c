// Timeout reaper for expired HIL pauses
//
// A single supervised task scans for active pause records whose timeout has
// passed and applies the record's timeout policy. Shutdown is cooperative:
// the current pass finishes before the task exits.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use flowgate_core::{Repository, ResumeReason};
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::engine::ExecutionEngine;

const DEFAULT_CHECK_INTERVAL: Duration = Duration::from_secs(5 * 60);
const WARNING_WINDOW: Duration = Duration::from_secs(15 * 60);

/// Summary of one reaper pass
#[derive(Debug, Default, PartialEq, Eq)]
pub struct ReaperPass {
    pub resumed: usize,
    pub cancelled: usize,
    pub failed: usize,
    pub warned: usize,
}

pub struct TimeoutReaper {
    engine: Arc<ExecutionEngine>,
    repository: Arc<dyn Repository>,
    check_interval: Duration,
    /// Pause ids already warned about, so each record warns at most once
    warned: Mutex<HashSet<Uuid>>,
}

impl TimeoutReaper {
    pub fn new(engine: Arc<ExecutionEngine>, repository: Arc<dyn Repository>) -> Self {
        Self {
            engine,
            repository,
            check_interval: DEFAULT_CHECK_INTERVAL,
            warned: Mutex::new(HashSet::new()),
        }
    }

    pub fn with_check_interval(mut self, check_interval: Duration) -> Self {
        self.check_interval = check_interval;
        self
    }

    /// One scan over expired and soon-to-expire pauses. Failures on a single
    /// record are logged and do not stop the pass.
    pub async fn run_once(&self) -> ReaperPass {
        let mut pass = ReaperPass::default();
        let now = Utc::now();

        let expired = match self.repository.expired_active_pauses(now).await {
            Ok(expired) => expired,
            Err(e) => {
                error!("failed to query expired pauses: {e}");
                return pass;
            }
        };

        for pause in expired {
            let execution_id = pause.execution_id.clone();
            match pause.timeout_action() {
                "resume" => {
                    let result = self
                        .engine
                        .resume_execution(
                            &execution_id,
                            ResumeReason::TimeoutReached,
                            pause.timeout_default_data(),
                        )
                        .await;
                    match result {
                        Ok(_) => {
                            pass.resumed += 1;
                            info!(%execution_id, "auto-resumed execution after pause timeout");
                        }
                        Err(e) => error!(%execution_id, "timeout auto-resume failed: {e}"),
                    }
                }
                "cancel" => {
                    let result = self
                        .engine
                        .state()
                        .cancel_paused_execution(&execution_id, "timeout_cancellation")
                        .await;
                    match result {
                        Ok(()) => {
                            pass.cancelled += 1;
                            info!(%execution_id, "cancelled execution after pause timeout");
                        }
                        Err(e) => error!(%execution_id, "timeout cancellation failed: {e}"),
                    }
                }
                _ => match self.engine.state().fail_expired_pause(&pause).await {
                    Ok(()) => pass.failed += 1,
                    Err(e) => error!(%execution_id, "timeout failure handling failed: {e}"),
                },
            }
        }

        // Advance warnings for pauses expiring inside the window
        let deadline = now + chrono::Duration::from_std(WARNING_WINDOW).expect("window fits");
        match self.repository.active_pauses_expiring_before(deadline).await {
            Ok(expiring) => {
                let mut warned = self.warned.lock().await;
                for pause in expiring {
                    if warned.insert(pause.id) {
                        let minutes_left = pause
                            .timeout_at
                            .map(|t| (t - now).num_minutes())
                            .unwrap_or(0);
                        warn!(
                            execution_id = %pause.execution_id,
                            node_id = %pause.paused_node_id,
                            minutes_left,
                            "pause approaching timeout"
                        );
                        pass.warned += 1;
                    }
                }
            }
            Err(e) => error!("failed to query expiring pauses: {e}"),
        }

        pass
    }

    /// Spawn the reaper loop. Dropping or sending on the returned channel
    /// stops the loop after the in-flight pass completes.
    pub fn spawn(self: Arc<Self>) -> (watch::Sender<bool>, JoinHandle<()>) {
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);

        let handle = tokio::spawn(async move {
            info!(
                interval_seconds = self.check_interval.as_secs(),
                "timeout reaper started"
            );
            let mut ticker = tokio::time::interval(self.check_interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        self.run_once().await;
                    }
                    changed = shutdown_rx.changed() => {
                        if changed.is_err() || *shutdown_rx.borrow() {
                            break;
                        }
                    }
                }
            }
            info!("timeout reaper stopped");
        });

        (shutdown_tx, handle)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executors::NodeExecutorRegistry;
    use flowgate_core::{
        ConnectionType, Execution, ExecutionStatus, InMemoryRepository, NoCredentials, Node,
        NodeType, PauseReason, PauseStatus, Workflow,
    };
    use serde_json::{json, Map};

    fn hil_workflow(timeout_action: &str) -> Workflow {
        let mut wf = Workflow::new("u1", "hil");
        let mut start = Node::new("start", NodeType::Trigger, "manual");
        start.id = "trigger_manual_aa000001".into();
        wf.nodes.push(start);

        let mut gate = Node::new("gate", NodeType::HumanInTheLoop, "approval")
            .with_parameter("timeout_seconds", json!(1))
            .with_parameter("timeout_action", json!(timeout_action));
        if timeout_action == "resume" {
            gate = gate.with_parameter("timeout_default_data", json!({"approved": false}));
        }
        gate.id = "hil_approval_aa000002".into();
        wf.nodes.push(gate);

        let mut after = Node::new("after", NodeType::Action, "noop");
        after.id = "action_noop_aa000003".into();
        wf.nodes.push(after);

        wf.connect("trigger_manual_aa000001", ConnectionType::Main, "hil_approval_aa000002");
        wf.connect("hil_approval_aa000002", ConnectionType::Main, "action_noop_aa000003");
        wf
    }

    async fn paused_execution(
        repo: &Arc<InMemoryRepository>,
        engine: &ExecutionEngine,
        wf: &Workflow,
    ) -> Execution {
        repo.add_workflow(wf.clone()).await;
        let execution = Execution::new(wf.id, wf.user_id.clone(), Some("manual".into()), json!({}));
        let paused = engine.execute_workflow(wf, execution).await.unwrap();
        assert_eq!(paused.status, ExecutionStatus::Paused);

        // Force the pause into the past so the reaper sees it as expired
        let mut pause = repo.active_pause(&paused.execution_id).await.unwrap().unwrap();
        pause.timeout_at = Some(Utc::now() - chrono::Duration::seconds(5));
        repo.update_pause(&pause).await.unwrap();
        paused
    }

    fn build(repo: Arc<InMemoryRepository>) -> (Arc<ExecutionEngine>, TimeoutReaper) {
        let registry = Arc::new(NodeExecutorRegistry::with_builtins(Arc::new(NoCredentials)));
        let engine = Arc::new(ExecutionEngine::new(
            repo.clone() as Arc<dyn Repository>,
            registry,
        ));
        let reaper = TimeoutReaper::new(engine.clone(), repo as Arc<dyn Repository>);
        (engine, reaper)
    }

    #[tokio::test]
    async fn expired_pause_with_resume_action_completes_downstream() {
        let repo = Arc::new(InMemoryRepository::new());
        let (engine, reaper) = build(repo.clone());
        let wf = hil_workflow("resume");
        let paused = paused_execution(&repo, &engine, &wf).await;

        let pass = reaper.run_once().await;
        assert_eq!(pass.resumed, 1);

        let done = repo.get_execution(&paused.execution_id).await.unwrap().unwrap();
        assert_eq!(done.status, ExecutionStatus::Completed);
        assert_eq!(
            done.execution_data["node_results"]["action_noop_aa000003"]["output_data"]["approved"],
            json!(false)
        );
        assert_eq!(repo.pauses().await[0].status, PauseStatus::Resumed);
    }

    #[tokio::test]
    async fn expired_pause_with_cancel_action_cancels_execution() {
        let repo = Arc::new(InMemoryRepository::new());
        let (engine, reaper) = build(repo.clone());
        let wf = hil_workflow("cancel");
        let paused = paused_execution(&repo, &engine, &wf).await;

        let pass = reaper.run_once().await;
        assert_eq!(pass.cancelled, 1);

        let done = repo.get_execution(&paused.execution_id).await.unwrap().unwrap();
        assert_eq!(done.status, ExecutionStatus::Cancelled);

        let pause = &repo.pauses().await[0];
        assert_eq!(pause.status, PauseStatus::Cancelled);
        assert_eq!(pause.cancellation_reason.as_deref(), Some("timeout_cancellation"));
    }

    #[tokio::test]
    async fn expired_pause_defaults_to_fail() {
        let repo = Arc::new(InMemoryRepository::new());
        let (engine, reaper) = build(repo.clone());
        let wf = hil_workflow("fail");
        let paused = paused_execution(&repo, &engine, &wf).await;

        let pass = reaper.run_once().await;
        assert_eq!(pass.failed, 1);

        let done = repo.get_execution(&paused.execution_id).await.unwrap().unwrap();
        assert_eq!(done.status, ExecutionStatus::Failed);
        assert_eq!(repo.pauses().await[0].status, PauseStatus::Timeout);
    }

    #[tokio::test]
    async fn warning_is_emitted_once_per_record() {
        let repo = Arc::new(InMemoryRepository::new());
        let (_engine, reaper) = build(repo.clone());

        // An active pause expiring in 10 minutes
        let mut execution = Execution::new(uuid::Uuid::new_v4(), "u1", None, json!({}));
        execution.transition_to(ExecutionStatus::Running).unwrap();
        repo.insert_execution(&execution).await.unwrap();
        let pause = flowgate_core::PauseRecord::new(
            execution.execution_id.clone(),
            "hil_node",
            PauseReason::HumanInteraction,
            Map::new(),
            Some(Duration::from_secs(600)),
        );
        repo.insert_pause(&pause).await.unwrap();

        let first = reaper.run_once().await;
        assert_eq!(first.warned, 1);

        let second = reaper.run_once().await;
        assert_eq!(second.warned, 0);
    }

    #[tokio::test]
    async fn spawned_reaper_shuts_down_cooperatively() {
        let repo = Arc::new(InMemoryRepository::new());
        let (_engine, reaper) = build(repo);
        let reaper = Arc::new(reaper.with_check_interval(Duration::from_millis(10)));

        let (shutdown, handle) = reaper.spawn();
        tokio::time::sleep(Duration::from_millis(30)).await;
        shutdown.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("reaper should stop promptly")
            .unwrap();
    }
}
