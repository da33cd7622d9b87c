// Cron trigger: schedule loop with jitter and cross-replica single-flight

use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use chrono_tz::Tz;
use cron::Schedule;
use flowgate_core::{
    DispatchStatus, Error, Result, TriggerHealth, TriggerKind, TriggerStatus,
};
use serde_json::json;
use sha2::{Digest, Sha256};
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::CronTriggerConfig;
use crate::trigger::{Trigger, TriggerContext, TriggerState};

/// Covers the jitter window plus the dispatch timeout, then expires so a
/// crashed replica cannot block the schedule
const LOCK_TTL: Duration = Duration::from_secs(90);

pub struct CronTrigger {
    state: Arc<TriggerState>,
    context: Arc<TriggerContext>,
    cron_expression: String,
    schedule: Schedule,
    timezone: Tz,
    timezone_name: String,
    task: Mutex<Option<(watch::Sender<bool>, JoinHandle<()>)>>,
}

impl CronTrigger {
    pub fn new(
        workflow_id: Uuid,
        enabled: bool,
        config: CronTriggerConfig,
        context: Arc<TriggerContext>,
    ) -> Result<Self> {
        let normalized = normalize_cron_expression(&config.cron_expression)?;
        let schedule = Schedule::from_str(&normalized).map_err(|e| {
            Error::validation(format!(
                "invalid cron expression {:?}: {e}",
                config.cron_expression
            ))
        })?;

        let (timezone, timezone_name) = match config.timezone.parse::<Tz>() {
            Ok(tz) => (tz, config.timezone.clone()),
            Err(_) => {
                warn!(
                    timezone = %config.timezone,
                    "unknown timezone, falling back to UTC"
                );
                (chrono_tz::UTC, "UTC".to_string())
            }
        };

        Ok(Self {
            state: Arc::new(TriggerState::new(workflow_id, enabled)),
            context,
            cron_expression: config.cron_expression,
            schedule,
            timezone,
            timezone_name,
            task: Mutex::new(None),
        })
    }

    pub fn timezone_name(&self) -> &str {
        &self.timezone_name
    }

    async fn schedule_loop(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let workflow_id = self.state.workflow_id;
        let lock_key = format!("workflow_{workflow_id}");
        let jitter = Duration::from_millis(jitter_ms(workflow_id));

        loop {
            let now = Utc::now().with_timezone(&self.timezone);
            let Some(next) = self.schedule.after(&now).next() else {
                warn!(%workflow_id, "cron schedule has no future occurrences, stopping");
                break;
            };
            let wait = (next - now).to_std().unwrap_or(Duration::ZERO);

            tokio::select! {
                _ = tokio::time::sleep(wait) => {}
                _ = shutdown.changed() => break,
            }

            // Deterministic jitter smears replicas of *different* workflows;
            // replicas of the same workflow still collide on purpose and are
            // deduplicated by the lock below.
            debug!(%workflow_id, jitter_ms = jitter.as_millis() as u64, "cron tick, applying jitter");
            tokio::select! {
                _ = tokio::time::sleep(jitter) => {}
                _ = shutdown.changed() => break,
            }

            match self.context.locks.try_acquire(&lock_key, LOCK_TTL).await {
                Ok(true) => {
                    let trigger_data = json!({
                        "trigger_type": "cron",
                        "cron_expression": self.cron_expression,
                        "scheduled_time": next.to_rfc3339(),
                        "timezone": self.timezone_name,
                    });

                    let outcome = self
                        .context
                        .fire(
                            workflow_id,
                            TriggerKind::Cron,
                            self.state.enabled,
                            trigger_data,
                        )
                        .await;

                    if outcome.status == DispatchStatus::Started {
                        info!(
                            %workflow_id,
                            execution_id = outcome.execution_id.as_deref().unwrap_or(""),
                            "cron trigger dispatched"
                        );
                    } else {
                        warn!(%workflow_id, message = %outcome.message, "cron dispatch had issues");
                    }

                    if let Err(e) = self.context.locks.release(&lock_key).await {
                        warn!(%workflow_id, "failed to release cron lock: {e}");
                    }
                }
                Ok(false) => {
                    info!(%workflow_id, "cron tick already handled by another replica, skipping");
                }
                Err(e) => {
                    error!(%workflow_id, "cron lock acquisition failed: {e}");
                }
            }

            if *shutdown.borrow() {
                break;
            }
        }
    }

    #[cfg(test)]
    pub(crate) fn state(&self) -> &TriggerState {
        &self.state
    }
}

/// Normalize to the seconds-first form the schedule parser expects:
/// 5 fields get a `0` seconds column, 6 fields pass through.
pub fn normalize_cron_expression(expression: &str) -> Result<String> {
    let fields: Vec<&str> = expression.split_whitespace().collect();
    match fields.len() {
        5 => Ok(format!("0 {}", fields.join(" "))),
        6 => Ok(fields.join(" ")),
        n => Err(Error::validation(format!(
            "invalid cron expression format: expected 5 or 6 fields, got {n}"
        ))),
    }
}

/// Deterministic per-workflow jitter in `[0, 30_000)` milliseconds. Every
/// replica computes the same value for the same workflow.
pub fn jitter_ms(workflow_id: Uuid) -> u64 {
    let digest = Sha256::digest(workflow_id.to_string().as_bytes());
    let mut prefix = [0u8; 8];
    prefix.copy_from_slice(&digest[..8]);
    u64::from_be_bytes(prefix) % 30_000
}

#[async_trait]
impl Trigger for CronTrigger {
    fn kind(&self) -> TriggerKind {
        TriggerKind::Cron
    }

    fn workflow_id(&self) -> Uuid {
        self.state.workflow_id
    }

    async fn start(&self) -> Result<()> {
        if !self.state.enabled {
            info!(workflow_id = %self.state.workflow_id, "cron trigger disabled");
            self.state.set_status(TriggerStatus::Paused).await;
            return Ok(());
        }

        let mut task = self.task.lock().await;
        if task.as_ref().is_some_and(|(_, handle)| !handle.is_finished()) {
            return Ok(());
        }

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let this = Arc::new(Self {
            state: self.state.clone(),
            context: self.context.clone(),
            cron_expression: self.cron_expression.clone(),
            schedule: self.schedule.clone(),
            timezone: self.timezone,
            timezone_name: self.timezone_name.clone(),
            task: Mutex::new(None),
        });
        let handle = tokio::spawn(this.schedule_loop(shutdown_rx));
        *task = Some((shutdown_tx, handle));

        self.state.set_status(TriggerStatus::Active).await;
        info!(
            workflow_id = %self.state.workflow_id,
            cron_expression = %self.cron_expression,
            timezone = %self.timezone_name,
            "cron trigger started"
        );
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        if let Some((shutdown, handle)) = self.task.lock().await.take() {
            let _ = shutdown.send(true);
            handle.abort();
        }

        self.state.set_status(TriggerStatus::Stopped).await;
        info!(workflow_id = %self.state.workflow_id, "cron trigger stopped");
        Ok(())
    }

    async fn health_check(&self) -> TriggerHealth {
        let now = Utc::now().with_timezone(&self.timezone);
        let next_run = self.schedule.after(&now).next().map(|t| t.to_rfc3339());
        let job_running = self
            .task
            .lock()
            .await
            .as_ref()
            .is_some_and(|(_, handle)| !handle.is_finished());

        self.state
            .base_health(TriggerKind::Cron)
            .await
            .with_detail("cron_expression", json!(self.cron_expression))
            .with_detail("timezone", json!(self.timezone_name))
            .with_detail("job_running", json!(job_running))
            .with_detail("next_run_time", json!(next_run))
    }
}
