// Per-variant trigger configuration parsed from trigger node parameters

use std::collections::BTreeMap;

use flowgate_core::{Error, Node, Result};
use serde::Deserialize;
use serde_json::Value;

fn parse_config<T: for<'de> Deserialize<'de>>(node: &Node) -> Result<T> {
    serde_json::from_value(Value::Object(node.parameters.clone()))
        .map_err(|e| Error::validation(format!("invalid trigger configuration: {e}")))
}

/// Webhook trigger configuration
#[derive(Debug, Clone, Deserialize)]
pub struct WebhookTriggerConfig {
    pub webhook_path: Option<String>,
    #[serde(default = "default_methods")]
    pub methods: Vec<String>,
    #[serde(default)]
    pub require_auth: bool,
}

fn default_methods() -> Vec<String> {
    vec!["POST".to_string()]
}

impl WebhookTriggerConfig {
    pub fn from_node(node: &Node) -> Result<Self> {
        parse_config(node)
    }
}

/// Cron trigger configuration
#[derive(Debug, Clone, Deserialize)]
pub struct CronTriggerConfig {
    pub cron_expression: String,
    #[serde(default = "default_timezone")]
    pub timezone: String,
}

fn default_timezone() -> String {
    "UTC".to_string()
}

impl CronTriggerConfig {
    pub fn from_node(node: &Node) -> Result<Self> {
        let config: Self = parse_config(node)?;
        if config.cron_expression.trim().is_empty() {
            return Err(Error::validation("cron_expression is required"));
        }
        Ok(config)
    }
}

/// Event-specific GitHub filters, keyed per event type in `event_config`
#[derive(Debug, Clone, Default, Deserialize)]
pub struct GithubEventFilters {
    pub branches: Option<Vec<String>>,
    pub actions: Option<Vec<String>>,
    pub labels: Option<Vec<String>>,
    /// ignore | only | any
    pub draft_handling: Option<String>,
    pub paths: Option<Vec<String>>,
    pub authors: Option<Vec<String>>,
    pub states: Option<Vec<String>>,
    pub workflows: Option<Vec<String>>,
    pub conclusions: Option<Vec<String>>,
    pub ref_types: Option<Vec<String>>,
}

/// GitHub App trigger configuration
#[derive(Debug, Clone, Deserialize)]
pub struct GithubTriggerConfig {
    #[serde(alias = "github_app_installation_id")]
    pub installation_id: String,
    /// owner/repo
    pub repository: String,
    #[serde(default)]
    pub event_config: BTreeMap<String, GithubEventFilters>,
    pub author_filter: Option<String>,
    #[serde(default = "default_true")]
    pub ignore_bots: bool,
    #[serde(default = "default_true")]
    pub require_signature_verification: bool,
}

fn default_true() -> bool {
    true
}

impl GithubTriggerConfig {
    pub fn from_node(node: &Node) -> Result<Self> {
        let config: Self = parse_config(node)?;
        if !config.repository.contains('/') {
            return Err(Error::validation(format!(
                "repository must be owner/repo, got {:?}",
                config.repository
            )));
        }
        Ok(config)
    }

    /// Event types this trigger listens for
    pub fn event_types(&self) -> Vec<&str> {
        self.event_config.keys().map(String::as_str).collect()
    }
}

/// Slack trigger configuration
#[derive(Debug, Clone, Deserialize)]
pub struct SlackTriggerConfig {
    pub workspace_id: String,
    /// Channel id (starts with C) for an exact match, anything else is a
    /// regex over the channel id
    pub channel_filter: Option<String>,
    #[serde(default = "default_slack_events")]
    pub event_types: Vec<String>,
    #[serde(default)]
    pub mention_required: bool,
    #[serde(default = "default_command_prefix")]
    pub command_prefix: String,
    /// User id (starts with U) for an exact match, anything else is a regex
    pub user_filter: Option<String>,
    #[serde(default = "default_true")]
    pub ignore_bots: bool,
    #[serde(default)]
    pub require_thread: bool,
}

fn default_slack_events() -> Vec<String> {
    vec!["message".to_string(), "app_mention".to_string()]
}

fn default_command_prefix() -> String {
    "!".to_string()
}

impl SlackTriggerConfig {
    pub fn from_node(node: &Node) -> Result<Self> {
        parse_config(node)
    }
}

/// Email trigger configuration
#[derive(Debug, Clone, Deserialize)]
pub struct EmailTriggerConfig {
    /// `from:|subject:|to:|body:value`, or a free substring matched across
    /// subject + sender + body
    #[serde(default)]
    pub email_filter: String,
    #[serde(default = "default_folder")]
    pub folder: String,
    #[serde(default = "default_true")]
    pub mark_as_read: bool,
    /// include | exclude
    #[serde(default = "default_attachment_processing")]
    pub attachment_processing: String,
    /// Poll interval in seconds; the environment default applies when unset
    pub check_interval: Option<u64>,
}

fn default_folder() -> String {
    "INBOX".to_string()
}

fn default_attachment_processing() -> String {
    "include".to_string()
}

impl EmailTriggerConfig {
    pub fn from_node(node: &Node) -> Result<Self> {
        let config: Self = parse_config(node)?;
        if !matches!(config.attachment_processing.as_str(), "include" | "exclude") {
            return Err(Error::validation(format!(
                "attachment_processing must be include or exclude, got {:?}",
                config.attachment_processing
            )));
        }
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flowgate_core::NodeType;
    use serde_json::json;

    #[test]
    fn webhook_defaults_apply() {
        let node = Node::new("hook", NodeType::Trigger, "webhook");
        let config = WebhookTriggerConfig::from_node(&node).unwrap();
        assert_eq!(config.methods, vec!["POST"]);
        assert!(!config.require_auth);
        assert!(config.webhook_path.is_none());
    }

    #[test]
    fn cron_requires_expression() {
        let node = Node::new("tick", NodeType::Trigger, "cron");
        assert!(CronTriggerConfig::from_node(&node).is_err());

        let node = node.with_parameter("cron_expression", json!("*/5 * * * *"));
        let config = CronTriggerConfig::from_node(&node).unwrap();
        assert_eq!(config.timezone, "UTC");
    }

    #[test]
    fn github_accepts_legacy_installation_key() {
        let node = Node::new("gh", NodeType::Trigger, "github")
            .with_parameter("github_app_installation_id", json!("12345"))
            .with_parameter("repository", json!("acme/widgets"))
            .with_parameter(
                "event_config",
                json!({"pull_request": {"actions": ["opened"], "branches": ["main"]}}),
            );
        let config = GithubTriggerConfig::from_node(&node).unwrap();
        assert_eq!(config.installation_id, "12345");
        assert!(config.ignore_bots);
        assert!(config.require_signature_verification);
        assert_eq!(config.event_types(), vec!["pull_request"]);
    }

    #[test]
    fn github_rejects_bare_repository_name() {
        let node = Node::new("gh", NodeType::Trigger, "github")
            .with_parameter("installation_id", json!("12345"))
            .with_parameter("repository", json!("widgets"));
        assert!(GithubTriggerConfig::from_node(&node).is_err());
    }

    #[test]
    fn slack_defaults_apply() {
        let node = Node::new("slack", NodeType::Trigger, "slack")
            .with_parameter("workspace_id", json!("T123"));
        let config = SlackTriggerConfig::from_node(&node).unwrap();
        assert_eq!(config.event_types, vec!["message", "app_mention"]);
        assert_eq!(config.command_prefix, "!");
        assert!(config.ignore_bots);
        assert!(!config.mention_required);
    }

    #[test]
    fn email_validates_attachment_mode() {
        let node = Node::new("mail", NodeType::Trigger, "email")
            .with_parameter("attachment_processing", json!("compress"));
        assert!(EmailTriggerConfig::from_node(&node).is_err());

        let node = Node::new("mail", NodeType::Trigger, "email");
        let config = EmailTriggerConfig::from_node(&node).unwrap();
        assert_eq!(config.folder, "INBOX");
        assert!(config.mark_as_read);
        assert_eq!(config.attachment_processing, "include");
    }
}
