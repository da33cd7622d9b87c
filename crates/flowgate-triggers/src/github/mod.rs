// GitHub App trigger: repository events routed in by the gateway

pub mod app;
pub mod filters;

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use flowgate_core::{
    DispatchOutcome, Error, Result, TriggerHealth, TriggerKind, TriggerStatus,
};
use serde_json::{json, Map, Value};
use tracing::{debug, info, warn};
use uuid::Uuid;

pub use app::{GithubAppClient, GithubAppConfig};

use crate::config::GithubTriggerConfig;
use crate::trigger::{Trigger, TriggerContext, TriggerState};

pub struct GithubTrigger {
    state: TriggerState,
    context: Arc<TriggerContext>,
    config: GithubTriggerConfig,
    app_config: Option<GithubAppConfig>,
    app: tokio::sync::Mutex<Option<Arc<GithubAppClient>>>,
}

impl GithubTrigger {
    pub fn new(
        workflow_id: Uuid,
        enabled: bool,
        config: GithubTriggerConfig,
        app_config: Option<GithubAppConfig>,
        context: Arc<TriggerContext>,
    ) -> Self {
        Self {
            state: TriggerState::new(workflow_id, enabled),
            context,
            config,
            app_config,
            app: tokio::sync::Mutex::new(None),
        }
    }

    pub fn repository(&self) -> &str {
        &self.config.repository
    }

    pub fn require_signature_verification(&self) -> bool {
        self.config.require_signature_verification
    }

    /// Process an inbound GitHub event. Returns None when the event was
    /// filtered out, Some(outcome) when a dispatch was attempted.
    pub async fn process_github_event(
        &self,
        event_type: &str,
        payload: &Value,
    ) -> Option<DispatchOutcome> {
        if !self.state.enabled {
            debug!(workflow_id = %self.state.workflow_id, "github trigger disabled");
            return None;
        }
        if !self.state.is_active().await {
            warn!(workflow_id = %self.state.workflow_id, "github trigger not active");
            return None;
        }

        if !self.config.event_config.contains_key(event_type) {
            debug!(event_type, "event type not configured");
            return None;
        }

        let repository = payload["repository"]["full_name"].as_str().unwrap_or("");
        if repository != self.config.repository {
            debug!(repository, expected = %self.config.repository, "repository mismatch");
            return None;
        }

        if !self.matches_filters(event_type, payload).await {
            debug!(workflow_id = %self.state.workflow_id, "event filtered out");
            return None;
        }

        let trigger_data = self.enhance_event_data(event_type, payload).await;

        let outcome = self
            .context
            .fire(
                self.state.workflow_id,
                TriggerKind::Github,
                self.state.enabled,
                trigger_data,
            )
            .await;

        Some(outcome)
    }

    /// Filter order: bot filter, global author regex, then the per-event
    /// filter set from event_config.
    async fn matches_filters(&self, event_type: &str, payload: &Value) -> bool {
        if self.config.ignore_bots && filters::is_bot_sender(payload) {
            debug!("ignoring bot event");
            return false;
        }

        if let Some(pattern) = &self.config.author_filter {
            if let Some(author) = filters::event_author(event_type, payload) {
                if !filters::author_matches(author, pattern) {
                    debug!(author, "author does not match global filter");
                    return false;
                }
            }
        }

        let Some(event_filters) = self.config.event_config.get(event_type) else {
            return true;
        };

        // PR path filters need the files API; a fetch failure yields an
        // empty list and the filter rejects
        let pr_changed_files = if event_filters.paths.is_some() && event_type == "pull_request" {
            Some(self.pull_request_files(payload).await)
        } else {
            None
        };

        filters::matches_event_filters(
            event_type,
            payload,
            event_filters,
            pr_changed_files.as_deref(),
        )
    }

    async fn pull_request_files(&self, payload: &Value) -> Vec<String> {
        let Some(number) = payload["pull_request"]["number"].as_u64() else {
            return Vec::new();
        };
        let Some(app) = self.app.lock().await.clone() else {
            return Vec::new();
        };

        match app
            .pull_request_files(&self.config.repository, number)
            .await
        {
            Ok(files) => files,
            Err(e) => {
                warn!("failed to fetch PR files: {e}");
                Vec::new()
            }
        }
    }

    /// Assemble trigger data, enriched with repository context where the API
    /// allows. Enhancement failures never block the dispatch.
    async fn enhance_event_data(&self, event_type: &str, payload: &Value) -> Value {
        let mut data = Map::new();
        data.insert("trigger_type".into(), json!("github"));
        data.insert("event_type".into(), json!(event_type));
        data.insert("action".into(), payload["action"].clone());
        data.insert("repository".into(), payload["repository"].clone());
        data.insert("sender".into(), payload["sender"].clone());
        data.insert("payload".into(), payload.clone());
        data.insert("installation_id".into(), json!(self.config.installation_id));
        data.insert("timestamp".into(), json!(Utc::now().to_rfc3339()));

        let app = self.app.lock().await.clone();
        if let Some(app) = app {
            match event_type {
                "pull_request" => {
                    if let Some(context) = self.pull_request_context(&app, payload).await {
                        data.insert("pr_context".into(), context);
                    }
                }
                "push" => {
                    let contexts = self.commit_contexts(&app, payload).await;
                    if !contexts.is_empty() {
                        data.insert("commit_contexts".into(), Value::Array(contexts));
                    }
                }
                _ => {}
            }
        }

        Value::Object(data)
    }

    async fn pull_request_context(
        &self,
        app: &GithubAppClient,
        payload: &Value,
    ) -> Option<Value> {
        let number = payload["pull_request"]["number"].as_u64()?;
        let repository = &self.config.repository;

        let details = match app.pull_request(repository, number).await {
            Ok(details) => Some(details),
            Err(e) => {
                warn!("failed to fetch PR details: {e}");
                None
            }
        };
        let files = match app.pull_request_files(repository, number).await {
            Ok(files) => files,
            Err(e) => {
                warn!("failed to fetch PR files: {e}");
                Vec::new()
            }
        };
        let diff = match app.pull_request_diff(repository, number).await {
            Ok(diff) => Some(diff),
            Err(e) => {
                debug!("could not fetch PR diff: {e}");
                None
            }
        };

        Some(json!({
            "pr_details": details,
            "files": files,
            "diff": diff,
        }))
    }

    async fn commit_contexts(&self, app: &GithubAppClient, payload: &Value) -> Vec<Value> {
        let mut contexts = Vec::new();
        let Some(commits) = payload["commits"].as_array() else {
            return contexts;
        };

        for commit in commits {
            let Some(sha) = commit["id"].as_str() else {
                continue;
            };
            match app.commit(&self.config.repository, sha).await {
                Ok(context) => contexts.push(context),
                Err(e) => warn!(sha, "failed to fetch commit context: {e}"),
            }
        }

        contexts
    }

    #[cfg(test)]
    pub(crate) fn state(&self) -> &TriggerState {
        &self.state
    }
}

#[async_trait]
impl Trigger for GithubTrigger {
    fn kind(&self) -> TriggerKind {
        TriggerKind::Github
    }

    fn workflow_id(&self) -> Uuid {
        self.state.workflow_id
    }

    /// Builds the App client and proves it can mint an installation token.
    /// Failure leaves the trigger in ERROR, inert but deployed.
    async fn start(&self) -> Result<()> {
        if !self.state.enabled {
            info!(workflow_id = %self.state.workflow_id, "github trigger disabled");
            self.state.set_status(TriggerStatus::Paused).await;
            return Ok(());
        }

        let Some(app_config) = &self.app_config else {
            self.state.set_status(TriggerStatus::Error).await;
            return Err(Error::configuration(
                "GitHub App configuration incomplete (GITHUB_APP_ID / GITHUB_APP_PRIVATE_KEY)",
            ));
        };

        let app = match GithubAppClient::new(app_config, &self.config.installation_id) {
            Ok(app) => Arc::new(app),
            Err(e) => {
                self.state.set_status(TriggerStatus::Error).await;
                return Err(e);
            }
        };

        if let Err(e) = app.installation_token().await {
            self.state.set_status(TriggerStatus::Error).await;
            return Err(Error::trigger(format!(
                "failed to obtain GitHub access token: {e}"
            )));
        }

        *self.app.lock().await = Some(app);
        self.state.set_status(TriggerStatus::Active).await;
        info!(
            workflow_id = %self.state.workflow_id,
            repository = %self.config.repository,
            "github trigger started"
        );
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        *self.app.lock().await = None;
        self.state.set_status(TriggerStatus::Stopped).await;
        info!(workflow_id = %self.state.workflow_id, "github trigger stopped");
        Ok(())
    }

    async fn health_check(&self) -> TriggerHealth {
        let has_client = self.app.lock().await.is_some();
        self.state
            .base_health(TriggerKind::Github)
            .await
            .with_detail("repository", json!(self.config.repository))
            .with_detail("installation_id", json!(self.config.installation_id))
            .with_detail("events", json!(self.config.event_types()))
            .with_detail("has_access_token", json!(has_client))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatcher::Dispatcher;
    use crate::notifier::TracingNotifier;
    use flowgate_core::{InMemoryLockManager, Node, NodeType};

    fn trigger_with(config_json: Value) -> GithubTrigger {
        let mut node = Node::new("gh", NodeType::Trigger, "github");
        if let Value::Object(params) = config_json {
            node.parameters = params;
        }
        let config = GithubTriggerConfig::from_node(&node).unwrap();

        // Dispatcher pointed at a closed port: any dispatch that slips
        // through a filter test fails loudly instead of silently passing
        let context = Arc::new(TriggerContext::new(
            Arc::new(Dispatcher::new("http://127.0.0.1:9")),
            Arc::new(TracingNotifier),
            Arc::new(InMemoryLockManager::new()),
        ));

        GithubTrigger::new(Uuid::new_v4(), true, config, None, context)
    }

    fn pr_payload(base_ref: &str, sender_type: &str) -> Value {
        json!({
            "action": "opened",
            "repository": {"full_name": "acme/widgets"},
            "sender": {"type": sender_type, "login": "alice"},
            "pull_request": {
                "number": 7,
                "base": {"ref": base_ref},
                "user": {"login": "alice"},
                "draft": false,
            },
        })
    }

    fn seed_config() -> Value {
        json!({
            "installation_id": "12345",
            "repository": "acme/widgets",
            "event_config": {
                "pull_request": {"actions": ["opened", "reopened"], "branches": ["main"]}
            },
        })
    }

    #[tokio::test]
    async fn events_are_dropped_when_not_active() {
        let trigger = trigger_with(seed_config());
        // Status is PENDING until start()
        let outcome = trigger
            .process_github_event("pull_request", &pr_payload("main", "User"))
            .await;
        assert!(outcome.is_none());
    }

    #[tokio::test]
    async fn unconfigured_event_types_are_dropped() {
        let trigger = trigger_with(seed_config());
        trigger.state().set_status(TriggerStatus::Active).await;

        let outcome = trigger
            .process_github_event("issues", &pr_payload("main", "User"))
            .await;
        assert!(outcome.is_none());
    }

    #[tokio::test]
    async fn repository_mismatch_is_dropped() {
        let trigger = trigger_with(seed_config());
        trigger.state().set_status(TriggerStatus::Active).await;

        let mut payload = pr_payload("main", "User");
        payload["repository"]["full_name"] = json!("acme/other");
        let outcome = trigger.process_github_event("pull_request", &payload).await;
        assert!(outcome.is_none());
    }

    #[tokio::test]
    async fn base_branch_filter_drops_other_branches() {
        let trigger = trigger_with(seed_config());
        trigger.state().set_status(TriggerStatus::Active).await;

        let outcome = trigger
            .process_github_event("pull_request", &pr_payload("dev", "User"))
            .await;
        assert!(outcome.is_none());
    }

    #[tokio::test]
    async fn bot_sender_is_dropped_when_ignore_bots() {
        let trigger = trigger_with(seed_config());
        trigger.state().set_status(TriggerStatus::Active).await;

        let outcome = trigger
            .process_github_event("pull_request", &pr_payload("main", "Bot"))
            .await;
        assert!(outcome.is_none());
    }

    #[tokio::test]
    async fn matching_event_attempts_dispatch() {
        let trigger = trigger_with(seed_config());
        trigger.state().set_status(TriggerStatus::Active).await;

        // Passes every filter; the dispatcher target is unreachable so the
        // outcome is a transport error, which proves dispatch was attempted
        let outcome = trigger
            .process_github_event("pull_request", &pr_payload("main", "User"))
            .await
            .expect("event should pass filters");
        assert_eq!(outcome.status, flowgate_core::DispatchStatus::Error);
    }

    #[tokio::test]
    async fn global_author_filter_applies() {
        let mut config = seed_config();
        config["author_filter"] = json!("^release-");
        let trigger = trigger_with(config);
        trigger.state().set_status(TriggerStatus::Active).await;

        let outcome = trigger
            .process_github_event("pull_request", &pr_payload("main", "User"))
            .await;
        assert!(outcome.is_none());
    }
}
