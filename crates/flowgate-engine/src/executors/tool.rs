// Tool node executor: outbound HTTP calls
//
// Failures are classified into result variants by status class so the retry
// policy can read the tag: 429 and 5xx are retryable, 4xx are not.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use flowgate_core::{CredentialProvider, Node};
use serde_json::{json, Map, Value};

use super::NodeExecutor;
use crate::context::{NodeExecutionContext, NodeExecutionResult};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

pub struct ToolNodeExecutor {
    client: reqwest::Client,
    credentials: Arc<dyn CredentialProvider>,
}

impl ToolNodeExecutor {
    pub fn new(credentials: Arc<dyn CredentialProvider>) -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(REQUEST_TIMEOUT)
                .build()
                .expect("reqwest client"),
            credentials,
        }
    }
}

#[async_trait]
impl NodeExecutor for ToolNodeExecutor {
    fn supported_subtypes(&self) -> Vec<&'static str> {
        vec!["http"]
    }

    fn validate(&self, node: &Node) -> Vec<String> {
        let mut errors = Vec::new();
        if node.parameter_str("url").is_none() {
            errors.push("missing required parameter: url".to_string());
        }
        if let Some(method) = node.parameter_str("method") {
            if !matches!(
                method.to_ascii_uppercase().as_str(),
                "GET" | "POST" | "PUT" | "PATCH" | "DELETE" | "HEAD"
            ) {
                errors.push(format!("unsupported HTTP method: {method}"));
            }
        }
        errors
    }

    async fn execute(&self, context: &NodeExecutionContext) -> NodeExecutionResult {
        let Some(url) = context.parameter_str("url") else {
            return NodeExecutionResult::error("missing required parameter: url");
        };
        let method = context
            .parameter_str("method")
            .unwrap_or("GET")
            .to_ascii_uppercase();
        let method = match reqwest::Method::from_bytes(method.as_bytes()) {
            Ok(m) => m,
            Err(_) => return NodeExecutionResult::error(format!("unsupported HTTP method: {method}")),
        };

        let mut request = self.client.request(method, url);

        if let Some(Value::Object(headers)) = context.parameter("headers") {
            for (name, value) in headers {
                if let Some(value) = value.as_str() {
                    request = request.header(name, value);
                }
            }
        }

        // Tokens come from the credential capability, never from parameters
        if let Some(provider) = context.parameter_str("auth_provider") {
            match self
                .credentials
                .get_valid_token(&context.user_id, provider)
                .await
            {
                Ok(Some(token)) => {
                    request = request.bearer_auth(token);
                }
                Ok(None) => {
                    return NodeExecutionResult::error(format!(
                        "no valid credential for provider {provider}"
                    ))
                    .with_error_details(json!({"kind": "unauthorized", "retryable": false}));
                }
                Err(e) => {
                    return NodeExecutionResult::error(format!("credential lookup failed: {e}"));
                }
            }
        }

        if let Some(body) = context.parameter("body") {
            request = request.json(body);
        }

        let response = match request.send().await {
            Ok(response) => response,
            Err(e) => {
                let kind = if e.is_timeout() { "timeout" } else { "connect" };
                return NodeExecutionResult::error(format!("request failed: {e}"))
                    .with_error_details(json!({"kind": kind, "retryable": true}));
            }
        };

        let status = response.status();
        let body: Value = match response.text().await {
            Ok(text) => serde_json::from_str(&text).unwrap_or(Value::String(text)),
            Err(e) => {
                return NodeExecutionResult::error(format!("failed to read response body: {e}"))
                    .with_error_details(json!({"kind": "transport", "retryable": true}));
            }
        };

        if status.is_success() {
            let mut output = Map::new();
            output.insert("status_code".into(), json!(status.as_u16()));
            output.insert("body".into(), body);
            return NodeExecutionResult::success(output);
        }

        let (kind, retryable) = match status.as_u16() {
            401 => ("unauthorized", false),
            403 => ("forbidden", false),
            429 => ("rate_limited", true),
            code if code >= 500 => ("server_error", true),
            _ => ("client_error", false),
        };

        NodeExecutionResult::error(format!("HTTP {}", status.as_u16())).with_error_details(json!({
            "kind": kind,
            "retryable": retryable,
            "status_code": status.as_u16(),
            "body": body,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flowgate_core::{NoCredentials, NodeType};
    use serde_json::json;

    #[test]
    fn validation_requires_url_and_known_method() {
        let executor = ToolNodeExecutor::new(Arc::new(NoCredentials));

        let node = Node::new("call", NodeType::Tool, "http");
        assert_eq!(
            executor.validate(&node),
            vec!["missing required parameter: url"]
        );

        let node = Node::new("call", NodeType::Tool, "http")
            .with_parameter("url", json!("https://example.com"))
            .with_parameter("method", json!("TRACE"));
        assert_eq!(executor.validate(&node), vec!["unsupported HTTP method: TRACE"]);
    }
}
