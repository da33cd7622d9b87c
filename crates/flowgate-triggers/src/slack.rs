// Slack trigger and the process-wide event router
//
// Slack events arrive once per workspace at the gateway; the router fans
// them out to every registered trigger whose filters match.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use flowgate_core::{
    DispatchOutcome, Result, TriggerHealth, TriggerKind, TriggerStatus,
};
use regex::Regex;
use serde_json::{json, Value};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::SlackTriggerConfig;
use crate::trigger::{Trigger, TriggerContext, TriggerState};

/// Process-wide registry of Slack triggers keyed by workspace id
#[derive(Default)]
pub struct SlackEventRouter {
    inner: RwLock<HashMap<String, Vec<Arc<SlackTrigger>>>>,
}

impl SlackEventRouter {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn register(&self, workspace_id: &str, trigger: Arc<SlackTrigger>) {
        self.inner
            .write()
            .await
            .entry(workspace_id.to_string())
            .or_default()
            .push(trigger);
    }

    pub async fn unregister(&self, workspace_id: &str, trigger: &Arc<SlackTrigger>) {
        if let Some(triggers) = self.inner.write().await.get_mut(workspace_id) {
            triggers.retain(|t| !Arc::ptr_eq(t, trigger));
        }
    }

    /// Fan an inbound event out to every matching trigger of the workspace
    pub async fn route_event(&self, workspace_id: &str, payload: &Value) -> Vec<DispatchOutcome> {
        let triggers = self
            .inner
            .read()
            .await
            .get(workspace_id)
            .cloned()
            .unwrap_or_default();

        let mut outcomes = Vec::new();
        for trigger in triggers {
            if trigger.matches_event(payload).await {
                outcomes.push(trigger.fire_from_event(payload).await);
            }
        }
        outcomes
    }

    pub async fn registered_count(&self, workspace_id: &str) -> usize {
        self.inner
            .read()
            .await
            .get(workspace_id)
            .map_or(0, Vec::len)
    }
}

pub struct SlackTrigger {
    state: TriggerState,
    context: Arc<TriggerContext>,
    config: SlackTriggerConfig,
    router: Arc<SlackEventRouter>,
    /// Self-reference handed to the router at start()
    this: std::sync::Weak<SlackTrigger>,
}

impl SlackTrigger {
    pub fn new(
        workflow_id: Uuid,
        enabled: bool,
        config: SlackTriggerConfig,
        router: Arc<SlackEventRouter>,
        context: Arc<TriggerContext>,
    ) -> Arc<Self> {
        Arc::new_cyclic(|this| Self {
            state: TriggerState::new(workflow_id, enabled),
            context,
            config,
            router,
            this: this.clone(),
        })
    }

    pub fn workspace_id(&self) -> &str {
        &self.config.workspace_id
    }

    /// Whether the inbound payload passes this trigger's filter chain. The
    /// Slack event proper sits under `event` in the payload.
    pub async fn matches_event(&self, payload: &Value) -> bool {
        if !self.state.enabled || !self.state.is_active().await {
            return false;
        }

        let event = &payload["event"];
        let event_type = event["type"].as_str().unwrap_or("");

        if !self.config.event_types.iter().any(|t| t == event_type) {
            debug!(event_type, "slack event type not configured");
            return false;
        }

        let channel_id = event["channel"].as_str().unwrap_or("");
        if !matches_id_or_regex(channel_id, self.config.channel_filter.as_deref(), 'C') {
            debug!(channel_id, "channel does not match filter");
            return false;
        }

        let user_id = event["user"].as_str().unwrap_or("");
        if !matches_id_or_regex(user_id, self.config.user_filter.as_deref(), 'U') {
            debug!(user_id, "user does not match filter");
            return false;
        }

        if self.config.ignore_bots && event.get("bot_id").is_some_and(|b| !b.is_null()) {
            debug!("ignoring bot message");
            return false;
        }

        if self.config.mention_required && !has_bot_mention(event) {
            debug!("required mention not found");
            return false;
        }

        if self.config.require_thread && event.get("thread_ts").map_or(true, Value::is_null) {
            debug!("required thread not found");
            return false;
        }

        if event_type == "message" && !self.config.command_prefix.is_empty() {
            let text = event["text"].as_str().unwrap_or("");
            if !text.trim_start().starts_with(&self.config.command_prefix) {
                debug!("message does not start with command prefix");
                return false;
            }
        }

        true
    }

    /// Dispatch the workflow from a matched event
    pub async fn fire_from_event(&self, payload: &Value) -> DispatchOutcome {
        let event = &payload["event"];

        let trigger_data = json!({
            "trigger_type": "slack",
            "event_type": event["type"],
            "message": event["text"],
            "user_id": event["user"],
            "channel_id": event["channel"],
            "team_id": payload["team_id"],
            "timestamp": event["ts"],
            "thread_ts": event["thread_ts"],
            "workspace_id": self.config.workspace_id,
            "event_data": payload,
        });

        self.context
            .fire(
                self.state.workflow_id,
                TriggerKind::Slack,
                self.state.enabled,
                trigger_data,
            )
            .await
    }

    #[cfg(test)]
    pub(crate) fn state(&self) -> &TriggerState {
        &self.state
    }
}

/// Exact match when the filter looks like a Slack id (leading marker
/// letter), regex over the id otherwise. No filter matches everything.
fn matches_id_or_regex(id: &str, filter: Option<&str>, id_marker: char) -> bool {
    let Some(filter) = filter else {
        return true;
    };
    if filter.starts_with(id_marker) {
        return id == filter;
    }
    match Regex::new(filter) {
        Ok(re) => re.is_match(id),
        Err(e) => {
            warn!(filter, "invalid slack filter regex: {e}");
            false
        }
    }
}

/// An app_mention event, a `<@U...>` token in the text, or a rich_text block
/// containing a user element all count as a mention.
fn has_bot_mention(event: &Value) -> bool {
    if event["type"].as_str() == Some("app_mention") {
        return true;
    }

    if event["text"].as_str().is_some_and(|text| text.contains("<@U")) {
        return true;
    }

    let Some(blocks) = event["blocks"].as_array() else {
        return false;
    };
    blocks.iter().any(block_contains_mention)
}

fn block_contains_mention(block: &Value) -> bool {
    if block["type"].as_str() != Some("rich_text") {
        return false;
    }
    let Some(elements) = block["elements"].as_array() else {
        return false;
    };
    elements
        .iter()
        .filter(|e| e["type"].as_str() == Some("rich_text_section"))
        .filter_map(|e| e["elements"].as_array())
        .flatten()
        .any(|e| e["type"].as_str() == Some("user") && e.get("user_id").is_some())
}

#[async_trait]
impl Trigger for SlackTrigger {
    fn kind(&self) -> TriggerKind {
        TriggerKind::Slack
    }

    fn workflow_id(&self) -> Uuid {
        self.state.workflow_id
    }

    async fn start(&self) -> Result<()> {
        if !self.state.enabled {
            info!(workflow_id = %self.state.workflow_id, "slack trigger disabled");
            self.state.set_status(TriggerStatus::Paused).await;
            return Ok(());
        }

        if let Some(this) = self.this.upgrade() {
            self.router
                .register(&self.config.workspace_id, this)
                .await;
        }

        self.state.set_status(TriggerStatus::Active).await;
        info!(
            workflow_id = %self.state.workflow_id,
            workspace_id = %self.config.workspace_id,
            "slack trigger started"
        );
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        if let Some(this) = self.this.upgrade() {
            self.router
                .unregister(&self.config.workspace_id, &this)
                .await;
        }

        self.state.set_status(TriggerStatus::Stopped).await;
        info!(workflow_id = %self.state.workflow_id, "slack trigger stopped");
        Ok(())
    }

    async fn health_check(&self) -> TriggerHealth {
        self.state
            .base_health(TriggerKind::Slack)
            .await
            .with_detail("workspace_id", json!(self.config.workspace_id))
            .with_detail("channel_filter", json!(self.config.channel_filter))
            .with_detail("event_types", json!(self.config.event_types))
            .with_detail("mention_required", json!(self.config.mention_required))
            .with_detail("ignore_bots", json!(self.config.ignore_bots))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatcher::Dispatcher;
    use crate::notifier::TracingNotifier;
    use flowgate_core::{InMemoryLockManager, Node, NodeType};

    fn trigger_with(config_json: Value) -> Arc<SlackTrigger> {
        let mut node = Node::new("slack", NodeType::Trigger, "slack");
        if let Value::Object(params) = config_json {
            node.parameters = params;
        }
        let config = SlackTriggerConfig::from_node(&node).unwrap();

        let context = Arc::new(TriggerContext::new(
            Arc::new(Dispatcher::new("http://127.0.0.1:9")),
            Arc::new(TracingNotifier),
            Arc::new(InMemoryLockManager::new()),
        ));

        SlackTrigger::new(
            Uuid::new_v4(),
            true,
            config,
            Arc::new(SlackEventRouter::new()),
            context,
        )
    }

    fn event(payload: Value) -> Value {
        json!({"team_id": "T123", "event": payload})
    }

    #[tokio::test]
    async fn mention_required_accepts_app_mention_only() {
        let trigger = trigger_with(json!({
            "workspace_id": "T123",
            "channel_filter": "C123",
            "mention_required": true,
        }));
        trigger.state().set_status(TriggerStatus::Active).await;

        let mention = event(json!({
            "type": "app_mention",
            "channel": "C123",
            "user": "U1",
            "text": "<@UBOT> hi",
        }));
        assert!(trigger.matches_event(&mention).await);

        let plain = event(json!({
            "type": "message",
            "channel": "C123",
            "user": "U1",
            "text": "hello",
        }));
        assert!(!trigger.matches_event(&plain).await);
    }

    #[tokio::test]
    async fn channel_filter_exact_and_regex() {
        let exact = trigger_with(json!({
            "workspace_id": "T123",
            "channel_filter": "C123",
            "command_prefix": "",
        }));
        exact.state().set_status(TriggerStatus::Active).await;

        let right = event(json!({"type": "message", "channel": "C123", "user": "U1", "text": "x"}));
        let wrong = event(json!({"type": "message", "channel": "C999", "user": "U1", "text": "x"}));
        assert!(exact.matches_event(&right).await);
        assert!(!exact.matches_event(&wrong).await);

        let pattern = trigger_with(json!({
            "workspace_id": "T123",
            "channel_filter": "^D",
            "command_prefix": "",
        }));
        pattern.state().set_status(TriggerStatus::Active).await;
        let dm = event(json!({"type": "message", "channel": "D42", "user": "U1", "text": "x"}));
        assert!(pattern.matches_event(&dm).await);
    }

    #[tokio::test]
    async fn bot_messages_are_ignored_by_default() {
        let trigger = trigger_with(json!({"workspace_id": "T123", "command_prefix": ""}));
        trigger.state().set_status(TriggerStatus::Active).await;

        let bot = event(json!({
            "type": "message",
            "channel": "C1",
            "user": "U1",
            "bot_id": "B99",
            "text": "automated",
        }));
        assert!(!trigger.matches_event(&bot).await);
    }

    #[tokio::test]
    async fn command_prefix_gates_plain_messages() {
        let trigger = trigger_with(json!({"workspace_id": "T123"}));
        trigger.state().set_status(TriggerStatus::Active).await;

        let command = event(json!({"type": "message", "channel": "C1", "user": "U1", "text": "!deploy"}));
        let chatter = event(json!({"type": "message", "channel": "C1", "user": "U1", "text": "deploy"}));
        assert!(trigger.matches_event(&command).await);
        assert!(!trigger.matches_event(&chatter).await);
    }

    #[tokio::test]
    async fn thread_requirement() {
        let trigger = trigger_with(json!({
            "workspace_id": "T123",
            "require_thread": true,
            "command_prefix": "",
        }));
        trigger.state().set_status(TriggerStatus::Active).await;

        let threaded = event(json!({
            "type": "message", "channel": "C1", "user": "U1",
            "text": "x", "thread_ts": "123.456",
        }));
        let top_level = event(json!({"type": "message", "channel": "C1", "user": "U1", "text": "x"}));
        assert!(trigger.matches_event(&threaded).await);
        assert!(!trigger.matches_event(&top_level).await);
    }

    #[test]
    fn rich_text_mentions_are_detected() {
        let event = json!({
            "type": "message",
            "text": "no plain mention",
            "blocks": [{
                "type": "rich_text",
                "elements": [{
                    "type": "rich_text_section",
                    "elements": [{"type": "user", "user_id": "UBOT"}],
                }],
            }],
        });
        assert!(has_bot_mention(&event));

        let plain = json!({"type": "message", "text": "hello"});
        assert!(!has_bot_mention(&plain));
    }

    #[tokio::test]
    async fn router_registration_follows_lifecycle() {
        let router = Arc::new(SlackEventRouter::new());
        let context = Arc::new(TriggerContext::new(
            Arc::new(Dispatcher::new("http://127.0.0.1:9")),
            Arc::new(TracingNotifier),
            Arc::new(InMemoryLockManager::new()),
        ));

        let mut node = Node::new("slack", NodeType::Trigger, "slack");
        node.parameters = json!({"workspace_id": "T777"})
            .as_object()
            .cloned()
            .unwrap();
        let config = SlackTriggerConfig::from_node(&node).unwrap();
        let trigger = SlackTrigger::new(Uuid::new_v4(), true, config, router.clone(), context);

        trigger.start().await.unwrap();
        assert_eq!(router.registered_count("T777").await, 1);

        trigger.stop().await.unwrap();
        assert_eq!(router.registered_count("T777").await, 0);
    }
}
