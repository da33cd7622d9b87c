// Trigger lifecycle and dispatch outcome types

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::error::{Error, Result};

/// The six trigger variants
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerKind {
    Manual,
    Webhook,
    Cron,
    Github,
    Slack,
    Email,
}

impl TriggerKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TriggerKind::Manual => "manual",
            TriggerKind::Webhook => "webhook",
            TriggerKind::Cron => "cron",
            TriggerKind::Github => "github",
            TriggerKind::Slack => "slack",
            TriggerKind::Email => "email",
        }
    }
}

impl fmt::Display for TriggerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TriggerKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "manual" => Ok(TriggerKind::Manual),
            "webhook" => Ok(TriggerKind::Webhook),
            "cron" => Ok(TriggerKind::Cron),
            "github" => Ok(TriggerKind::Github),
            "slack" => Ok(TriggerKind::Slack),
            "email" => Ok(TriggerKind::Email),
            other => Err(Error::validation(format!("unknown trigger kind: {other}"))),
        }
    }
}

/// Lifecycle state of a trigger instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerStatus {
    Pending,
    Active,
    Paused,
    Stopped,
    Error,
}

impl TriggerStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TriggerStatus::Pending => "pending",
            TriggerStatus::Active => "active",
            TriggerStatus::Paused => "paused",
            TriggerStatus::Stopped => "stopped",
            TriggerStatus::Error => "error",
        }
    }
}

impl fmt::Display for TriggerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of one dispatch attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DispatchStatus {
    /// The engine accepted the execution (HTTP 202)
    Started,
    /// The trigger was disabled; no HTTP call was made
    Skipped,
    /// The engine rejected the request (non-202 status)
    Failed,
    /// Transport-level failure or local error
    Error,
}

impl DispatchStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DispatchStatus::Started => "started",
            DispatchStatus::Skipped => "skipped",
            DispatchStatus::Failed => "failed",
            DispatchStatus::Error => "error",
        }
    }
}

/// What a trigger firing produced
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchOutcome {
    pub status: DispatchStatus,
    pub execution_id: Option<String>,
    pub message: String,
}

impl DispatchOutcome {
    pub fn started(execution_id: impl Into<String>) -> Self {
        Self {
            status: DispatchStatus::Started,
            execution_id: Some(execution_id.into()),
            message: "Workflow execution started".to_string(),
        }
    }

    pub fn skipped(message: impl Into<String>) -> Self {
        Self {
            status: DispatchStatus::Skipped,
            execution_id: None,
            message: message.into(),
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            status: DispatchStatus::Failed,
            execution_id: None,
            message: message.into(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            status: DispatchStatus::Error,
            execution_id: None,
            message: message.into(),
        }
    }
}

/// Health snapshot reported by a trigger. Variant-specific fields go into
/// `details`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TriggerHealth {
    pub trigger_type: TriggerKind,
    pub workflow_id: Uuid,
    pub status: TriggerStatus,
    pub enabled: bool,
    pub last_check: DateTime<Utc>,
    #[serde(default)]
    pub details: Map<String, Value>,
}

impl TriggerHealth {
    pub fn new(
        trigger_type: TriggerKind,
        workflow_id: Uuid,
        status: TriggerStatus,
        enabled: bool,
    ) -> Self {
        Self {
            trigger_type,
            workflow_id,
            status,
            enabled,
            last_check: Utc::now(),
            details: Map::new(),
        }
    }

    pub fn with_detail(mut self, key: impl Into<String>, value: Value) -> Self {
        self.details.insert(key.into(), value);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_round_trips() {
        for kind in [
            TriggerKind::Manual,
            TriggerKind::Webhook,
            TriggerKind::Cron,
            TriggerKind::Github,
            TriggerKind::Slack,
            TriggerKind::Email,
        ] {
            assert_eq!(kind.as_str().parse::<TriggerKind>().unwrap(), kind);
        }
    }

    #[test]
    fn outcome_serializes_with_lowercase_status() {
        let outcome = DispatchOutcome::started("exec_123");
        let json = serde_json::to_value(&outcome).unwrap();
        assert_eq!(json["status"], "started");
        assert_eq!(json["execution_id"], "exec_123");
    }
}
