// Trigger registry: owns every live trigger instance
//
// Reads (lookups, health) take the map read lock; register/unregister take
// the write lock. Trigger lifetimes follow workflow deployment.

use std::collections::HashMap;
use std::sync::Arc;

use flowgate_core::{
    Error, Result, TriggerHealth, TriggerKind, Workflow,
};
use tokio::sync::RwLock;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::config::{
    CronTriggerConfig, EmailTriggerConfig, GithubTriggerConfig, SlackTriggerConfig,
    WebhookTriggerConfig,
};
use crate::cron::CronTrigger;
use crate::email::{EmailEnv, EmailTrigger};
use crate::github::{GithubAppConfig, GithubTrigger};
use crate::manual::ManualTrigger;
use crate::slack::{SlackEventRouter, SlackTrigger};
use crate::trigger::{Trigger, TriggerContext};
use crate::webhook::WebhookTrigger;

/// Tagged trigger variants. The registry needs the concrete types back for
/// gateway routing (webhook paths, GitHub fan-out, manual fires).
#[derive(Clone)]
pub enum TriggerInstance {
    Manual(Arc<ManualTrigger>),
    Webhook(Arc<WebhookTrigger>),
    Cron(Arc<CronTrigger>),
    Github(Arc<GithubTrigger>),
    Slack(Arc<SlackTrigger>),
    Email(Arc<EmailTrigger>),
}

impl TriggerInstance {
    pub fn as_trigger(&self) -> &dyn Trigger {
        match self {
            TriggerInstance::Manual(t) => t.as_ref(),
            TriggerInstance::Webhook(t) => t.as_ref(),
            TriggerInstance::Cron(t) => t.as_ref(),
            TriggerInstance::Github(t) => t.as_ref(),
            TriggerInstance::Slack(t) => t.as_ref(),
            TriggerInstance::Email(t) => t.as_ref(),
        }
    }

    pub fn kind(&self) -> TriggerKind {
        self.as_trigger().kind()
    }
}

pub struct TriggerRegistry {
    inner: RwLock<HashMap<Uuid, HashMap<String, TriggerInstance>>>,
    context: Arc<TriggerContext>,
    slack_router: Arc<SlackEventRouter>,
    github_app: Option<GithubAppConfig>,
    email_env: Option<EmailEnv>,
    gateway_base: String,
}

impl TriggerRegistry {
    pub fn new(
        context: Arc<TriggerContext>,
        slack_router: Arc<SlackEventRouter>,
        github_app: Option<GithubAppConfig>,
        email_env: Option<EmailEnv>,
        gateway_base: impl Into<String>,
    ) -> Self {
        Self {
            inner: RwLock::new(HashMap::new()),
            context,
            slack_router,
            github_app,
            email_env,
            gateway_base: gateway_base.into(),
        }
    }

    pub fn slack_router(&self) -> &Arc<SlackEventRouter> {
        &self.slack_router
    }

    /// Instantiate and start one trigger per enabled TRIGGER node. Triggers
    /// whose start fails stay registered in ERROR state (deployed but
    /// inert); nodes with invalid configuration are skipped.
    pub async fn deploy_workflow(&self, workflow: &Workflow) -> Result<usize> {
        if !workflow.active {
            return Err(Error::validation(format!(
                "workflow {} is not active",
                workflow.id
            )));
        }

        let mut instances = HashMap::new();
        for node in workflow.trigger_nodes() {
            let enabled = node.parameter_bool("enabled", true) && !node.disabled;
            let instance = match self.build_trigger(workflow.id, node, enabled) {
                Ok(instance) => instance,
                Err(e) => {
                    error!(
                        workflow_id = %workflow.id,
                        node_id = %node.id,
                        "invalid trigger configuration, skipping: {e}"
                    );
                    continue;
                }
            };

            if let Err(e) = instance.as_trigger().start().await {
                warn!(
                    workflow_id = %workflow.id,
                    node_id = %node.id,
                    "trigger failed to start, keeping it inert: {e}"
                );
            }
            instances.insert(node.id.clone(), instance);
        }

        let deployed = instances.len();
        if deployed > 0 {
            self.inner.write().await.insert(workflow.id, instances);
        }
        info!(workflow_id = %workflow.id, deployed, "workflow triggers deployed");
        Ok(deployed)
    }

    fn build_trigger(
        &self,
        workflow_id: Uuid,
        node: &flowgate_core::Node,
        enabled: bool,
    ) -> Result<TriggerInstance> {
        let kind: TriggerKind = node.subtype.parse()?;
        let context = self.context.clone();

        Ok(match kind {
            TriggerKind::Manual => {
                TriggerInstance::Manual(Arc::new(ManualTrigger::new(workflow_id, enabled, context)))
            }
            TriggerKind::Webhook => TriggerInstance::Webhook(Arc::new(WebhookTrigger::new(
                workflow_id,
                enabled,
                WebhookTriggerConfig::from_node(node)?,
                self.gateway_base.clone(),
                context,
            ))),
            TriggerKind::Cron => TriggerInstance::Cron(Arc::new(CronTrigger::new(
                workflow_id,
                enabled,
                CronTriggerConfig::from_node(node)?,
                context,
            )?)),
            TriggerKind::Github => TriggerInstance::Github(Arc::new(GithubTrigger::new(
                workflow_id,
                enabled,
                GithubTriggerConfig::from_node(node)?,
                self.github_app.clone(),
                context,
            ))),
            TriggerKind::Slack => TriggerInstance::Slack(SlackTrigger::new(
                workflow_id,
                enabled,
                SlackTriggerConfig::from_node(node)?,
                self.slack_router.clone(),
                context,
            )),
            TriggerKind::Email => TriggerInstance::Email(Arc::new(EmailTrigger::new(
                workflow_id,
                enabled,
                EmailTriggerConfig::from_node(node)?,
                self.email_env.clone(),
                context,
            ))),
        })
    }

    /// Stop and drop every trigger of a workflow
    pub async fn undeploy_workflow(&self, workflow_id: Uuid) -> Result<bool> {
        let Some(instances) = self.inner.write().await.remove(&workflow_id) else {
            return Ok(false);
        };

        for (node_id, instance) in instances {
            if let Err(e) = instance.as_trigger().stop().await {
                warn!(%workflow_id, %node_id, "trigger failed to stop cleanly: {e}");
            }
        }
        info!(%workflow_id, "workflow triggers undeployed");
        Ok(true)
    }

    /// Stop everything; used at shutdown
    pub async fn stop_all(&self) {
        let all: Vec<Uuid> = self.inner.read().await.keys().copied().collect();
        for workflow_id in all {
            let _ = self.undeploy_workflow(workflow_id).await;
        }
    }

    /// Health of every registered trigger
    pub async fn health_report(&self) -> Vec<TriggerHealth> {
        let inner = self.inner.read().await;
        let mut report = Vec::new();
        for instances in inner.values() {
            for instance in instances.values() {
                report.push(instance.as_trigger().health_check().await);
            }
        }
        report
    }

    /// The webhook trigger registered for `path`, if any
    pub async fn find_webhook(&self, path: &str) -> Option<Arc<WebhookTrigger>> {
        let inner = self.inner.read().await;
        for instances in inner.values() {
            for instance in instances.values() {
                if let TriggerInstance::Webhook(webhook) = instance {
                    if webhook.webhook_path() == path {
                        return Some(webhook.clone());
                    }
                }
            }
        }
        None
    }

    /// Every GitHub trigger in the registry (the gateway fans events out and
    /// lets each trigger filter by repository)
    pub async fn github_triggers(&self) -> Vec<Arc<GithubTrigger>> {
        let inner = self.inner.read().await;
        inner
            .values()
            .flat_map(|instances| instances.values())
            .filter_map(|instance| match instance {
                TriggerInstance::Github(github) => Some(github.clone()),
                _ => None,
            })
            .collect()
    }

    /// The manual trigger of a workflow, if one is deployed
    pub async fn manual_trigger(&self, workflow_id: Uuid) -> Option<Arc<ManualTrigger>> {
        let inner = self.inner.read().await;
        inner.get(&workflow_id).and_then(|instances| {
            instances.values().find_map(|instance| match instance {
                TriggerInstance::Manual(manual) => Some(manual.clone()),
                _ => None,
            })
        })
    }

    pub async fn deployed_workflow_count(&self) -> usize {
        self.inner.read().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatcher::Dispatcher;
    use crate::notifier::TracingNotifier;
    use flowgate_core::{InMemoryLockManager, Node, NodeType, TriggerStatus};
    use serde_json::{json, Value};

    fn registry() -> TriggerRegistry {
        let context = Arc::new(TriggerContext::new(
            Arc::new(Dispatcher::new("http://127.0.0.1:9")),
            Arc::new(TracingNotifier),
            Arc::new(InMemoryLockManager::new()),
        ));
        TriggerRegistry::new(
            context,
            Arc::new(SlackEventRouter::new()),
            None,
            None,
            "https://gateway.example.com",
        )
    }

    fn workflow_with_triggers(nodes: Vec<Node>) -> Workflow {
        let mut wf = Workflow::new("u1", "triggers");
        wf.nodes = nodes;
        wf
    }

    fn trigger_node(id: &str, subtype: &str, params: Value) -> Node {
        let mut node = Node::new(id, NodeType::Trigger, subtype);
        node.id = id.to_string();
        if let Value::Object(map) = params {
            node.parameters = map;
        }
        node
    }

    #[tokio::test]
    async fn deploys_and_undeploys_triggers() {
        let registry = registry();
        let wf = workflow_with_triggers(vec![
            trigger_node("trigger_manual_aa000001", "manual", json!({})),
            trigger_node(
                "trigger_webhook_aa000002",
                "webhook",
                json!({"webhook_path": "hooks/build"}),
            ),
        ]);

        let deployed = registry.deploy_workflow(&wf).await.unwrap();
        assert_eq!(deployed, 2);
        assert_eq!(registry.deployed_workflow_count().await, 1);

        // Webhook path was normalized with a leading slash
        let webhook = registry.find_webhook("/hooks/build").await.unwrap();
        assert_eq!(webhook.workflow_id(), wf.id);
        assert!(registry.find_webhook("/hooks/other").await.is_none());

        let manual = registry.manual_trigger(wf.id).await.unwrap();
        assert_eq!(manual.kind(), TriggerKind::Manual);

        let health = registry.health_report().await;
        assert_eq!(health.len(), 2);
        assert!(health.iter().all(|h| h.status == TriggerStatus::Active));

        assert!(registry.undeploy_workflow(wf.id).await.unwrap());
        assert_eq!(registry.deployed_workflow_count().await, 0);
        assert!(registry.find_webhook("/hooks/build").await.is_none());
    }

    #[tokio::test]
    async fn inactive_workflows_are_rejected() {
        let registry = registry();
        let mut wf =
            workflow_with_triggers(vec![trigger_node("trigger_manual_aa000001", "manual", json!({}))]);
        wf.active = false;

        assert!(registry.deploy_workflow(&wf).await.is_err());
        assert_eq!(registry.deployed_workflow_count().await, 0);
    }

    #[tokio::test]
    async fn disabled_trigger_deploys_paused() {
        let registry = registry();
        let wf = workflow_with_triggers(vec![trigger_node(
            "trigger_manual_aa000001",
            "manual",
            json!({"enabled": false}),
        )]);

        registry.deploy_workflow(&wf).await.unwrap();
        let health = registry.health_report().await;
        assert_eq!(health[0].status, TriggerStatus::Paused);
        assert!(!health[0].enabled);
    }

    #[tokio::test]
    async fn invalid_trigger_config_is_skipped() {
        let registry = registry();
        let wf = workflow_with_triggers(vec![
            // Missing cron_expression
            trigger_node("trigger_cron_aa000001", "cron", json!({})),
            trigger_node("trigger_manual_aa000002", "manual", json!({})),
        ]);

        let deployed = registry.deploy_workflow(&wf).await.unwrap();
        assert_eq!(deployed, 1);
    }

    #[tokio::test]
    async fn github_trigger_without_app_config_stays_error() {
        let registry = registry();
        let wf = workflow_with_triggers(vec![trigger_node(
            "trigger_github_aa000001",
            "github",
            json!({
                "installation_id": "1",
                "repository": "acme/widgets",
                "event_config": {"push": {}},
            }),
        )]);

        let deployed = registry.deploy_workflow(&wf).await.unwrap();
        assert_eq!(deployed, 1);

        let health = registry.health_report().await;
        assert_eq!(health[0].status, TriggerStatus::Error);

        // Still listed for fan-out, but will drop events while not active
        assert_eq!(registry.github_triggers().await.len(), 1);
    }

    #[tokio::test]
    async fn start_stop_start_returns_to_active() {
        let registry = registry();
        let wf = workflow_with_triggers(vec![trigger_node("trigger_manual_aa000001", "manual", json!({}))]);
        registry.deploy_workflow(&wf).await.unwrap();

        let manual = registry.manual_trigger(wf.id).await.unwrap();
        manual.stop().await.unwrap();
        manual.start().await.unwrap();
        // start() twice is a no-op
        manual.start().await.unwrap();

        let health = manual.health_check().await;
        assert_eq!(health.status, TriggerStatus::Active);
    }
}
