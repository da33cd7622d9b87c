// Gateway configuration from the environment

use flowgate_core::{Error, Result};

#[derive(Debug, Clone)]
pub struct ApiConfig {
    /// Base URL of the workflow engine executions are dispatched to
    pub workflow_engine_url: String,
    /// Public base URL used to build absolute webhook URLs
    pub api_gateway_url: String,
    pub bind_addr: String,
    pub slack_signing_secret: Option<String>,
}

impl ApiConfig {
    pub fn from_env() -> Result<Self> {
        let workflow_engine_url = std::env::var("WORKFLOW_ENGINE_URL")
            .map_err(|_| Error::configuration("WORKFLOW_ENGINE_URL environment variable required"))?;

        let bind_addr =
            std::env::var("BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:8080".to_string());

        let api_gateway_url = std::env::var("API_GATEWAY_URL")
            .unwrap_or_else(|_| format!("http://{bind_addr}"));

        Ok(Self {
            workflow_engine_url,
            api_gateway_url,
            bind_addr,
            slack_signing_secret: std::env::var("SLACK_SIGNING_SECRET").ok(),
        })
    }
}
