// GitHub App integration: app JWT, installation tokens, repository context

use std::time::Duration;

use chrono::{DateTime, Utc};
use flowgate_core::{Error, Result};
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::debug;

const API_BASE: &str = "https://api.github.com";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
/// Installation tokens are refreshed this long before their expiry
const TOKEN_REFRESH_MARGIN_SECONDS: i64 = 60;

/// GitHub App identity from the environment
#[derive(Clone)]
pub struct GithubAppConfig {
    pub app_id: String,
    pub private_key: String,
    pub webhook_secret: Option<String>,
}

impl GithubAppConfig {
    /// None when the app is not configured at all; Err when it is half
    /// configured.
    pub fn from_env() -> Result<Option<Self>> {
        let app_id = std::env::var("GITHUB_APP_ID").ok();
        let private_key = std::env::var("GITHUB_APP_PRIVATE_KEY").ok();
        let webhook_secret = std::env::var("GITHUB_WEBHOOK_SECRET").ok();

        match (app_id, private_key) {
            (None, None) => Ok(None),
            (Some(app_id), Some(private_key)) => Ok(Some(Self {
                app_id,
                private_key,
                webhook_secret,
            })),
            _ => Err(Error::configuration(
                "GITHUB_APP_ID and GITHUB_APP_PRIVATE_KEY must be set together",
            )),
        }
    }
}

#[derive(Serialize)]
struct AppJwtClaims {
    iat: i64,
    exp: i64,
    iss: String,
}

#[derive(Deserialize)]
struct InstallationTokenResponse {
    token: String,
    expires_at: Option<String>,
}

struct CachedToken {
    token: String,
    expires_at: DateTime<Utc>,
}

/// Per-trigger GitHub client bound to one installation. Token refresh is
/// single-flight within the trigger (callers serialize on the cache lock).
pub struct GithubAppClient {
    client: reqwest::Client,
    api_base: String,
    app_id: String,
    encoding_key: EncodingKey,
    installation_id: String,
    token: Mutex<Option<CachedToken>>,
}

impl GithubAppClient {
    pub fn new(config: &GithubAppConfig, installation_id: impl Into<String>) -> Result<Self> {
        let encoding_key = EncodingKey::from_rsa_pem(config.private_key.as_bytes())
            .map_err(|e| Error::configuration(format!("invalid GitHub App private key: {e}")))?;

        Ok(Self {
            client: reqwest::Client::builder()
                .timeout(REQUEST_TIMEOUT)
                .user_agent("flowgate")
                .build()
                .expect("reqwest client"),
            api_base: API_BASE.to_string(),
            app_id: config.app_id.clone(),
            encoding_key,
            installation_id: installation_id.into(),
            token: Mutex::new(None),
        })
    }

    /// Override the API base, for tests against a local server
    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into().trim_end_matches('/').to_string();
        self
    }

    fn app_jwt(&self) -> Result<String> {
        let now = Utc::now().timestamp();
        let claims = AppJwtClaims {
            // Clock-drift allowance per GitHub's recommendation
            iat: now - 60,
            exp: now + 600,
            iss: self.app_id.clone(),
        };
        encode(&Header::new(Algorithm::RS256), &claims, &self.encoding_key)
            .map_err(|e| Error::authentication(format!("failed to sign app JWT: {e}")))
    }

    /// A valid installation access token, minted on demand and cached until
    /// shortly before expiry.
    pub async fn installation_token(&self) -> Result<String> {
        let mut cached = self.token.lock().await;

        if let Some(token) = cached.as_ref() {
            let margin = chrono::Duration::seconds(TOKEN_REFRESH_MARGIN_SECONDS);
            if token.expires_at - margin > Utc::now() {
                return Ok(token.token.clone());
            }
            debug!(installation_id = %self.installation_id, "installation token near expiry, refreshing");
        }

        let jwt = self.app_jwt()?;
        let url = format!(
            "{}/app/installations/{}/access_tokens",
            self.api_base, self.installation_id
        );

        let response = self
            .client
            .post(&url)
            .bearer_auth(jwt)
            .header("Accept", "application/vnd.github+json")
            .send()
            .await
            .map_err(|e| Error::temporary(format!("installation token request failed: {e}")))?;

        if !response.status().is_success() {
            return Err(Error::authentication(format!(
                "installation token request rejected: HTTP {}",
                response.status().as_u16()
            )));
        }

        let body: InstallationTokenResponse = response
            .json()
            .await
            .map_err(|e| Error::temporary(format!("invalid installation token response: {e}")))?;

        let expires_at = body
            .expires_at
            .as_deref()
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|t| t.with_timezone(&Utc))
            // GitHub tokens live one hour; assume that when unparsable
            .unwrap_or_else(|| Utc::now() + chrono::Duration::seconds(3540));

        let token = body.token.clone();
        *cached = Some(CachedToken {
            token: body.token,
            expires_at,
        });

        Ok(token)
    }

    async fn get_json(&self, url: &str) -> Result<Value> {
        let token = self.installation_token().await?;
        let response = self
            .client
            .get(url)
            .bearer_auth(token)
            .header("Accept", "application/vnd.github+json")
            .send()
            .await
            .map_err(|e| Error::temporary(format!("GitHub API request failed: {e}")))?;

        match response.status().as_u16() {
            200 => response
                .json()
                .await
                .map_err(|e| Error::temporary(format!("invalid GitHub API response: {e}"))),
            401 | 403 => Err(Error::authentication(format!("GitHub API: HTTP {}", response.status()))),
            429 => Err(Error::RateLimited("GitHub API rate limit".to_string())),
            code if code >= 500 => Err(Error::temporary(format!("GitHub API: HTTP {code}"))),
            code => Err(Error::permanent(format!("GitHub API: HTTP {code}"))),
        }
    }

    pub async fn pull_request(&self, repository: &str, number: u64) -> Result<Value> {
        self.get_json(&format!("{}/repos/{repository}/pulls/{number}", self.api_base))
            .await
    }

    /// Changed file names of a pull request
    pub async fn pull_request_files(&self, repository: &str, number: u64) -> Result<Vec<String>> {
        let files = self
            .get_json(&format!(
                "{}/repos/{repository}/pulls/{number}/files",
                self.api_base
            ))
            .await?;

        Ok(files
            .as_array()
            .map(|entries| {
                entries
                    .iter()
                    .filter_map(|f| f.get("filename").and_then(Value::as_str))
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default())
    }

    pub async fn pull_request_diff(&self, repository: &str, number: u64) -> Result<String> {
        let token = self.installation_token().await?;
        let url = format!("{}/repos/{repository}/pulls/{number}", self.api_base);

        let response = self
            .client
            .get(&url)
            .bearer_auth(token)
            .header("Accept", "application/vnd.github.diff")
            .send()
            .await
            .map_err(|e| Error::temporary(format!("GitHub API request failed: {e}")))?;

        if !response.status().is_success() {
            return Err(Error::temporary(format!(
                "GitHub diff request: HTTP {}",
                response.status().as_u16()
            )));
        }

        response
            .text()
            .await
            .map_err(|e| Error::temporary(format!("invalid diff response: {e}")))
    }

    pub async fn commit(&self, repository: &str, sha: &str) -> Result<Value> {
        self.get_json(&format!("{}/repos/{repository}/commits/{sha}", self.api_base))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::extract::State;
    use axum::http::StatusCode;
    use axum::routing::post;
    use axum::{Json, Router};
    use serde_json::json;
    use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};
    use std::sync::Arc;

    const TEST_APP_KEY: &str = include_str!("../../testdata/github_app_key.pem");

    #[derive(Clone)]
    struct TokenServer {
        mints: Arc<AtomicUsize>,
        /// Lifetime of the next minted token, seconds from now
        lifetime: Arc<AtomicI64>,
    }

    async fn mint_token(State(server): State<TokenServer>) -> (StatusCode, Json<Value>) {
        let n = server.mints.fetch_add(1, Ordering::SeqCst) + 1;
        let expires_at = Utc::now() + chrono::Duration::seconds(server.lifetime.load(Ordering::SeqCst));
        (
            StatusCode::CREATED,
            Json(json!({
                "token": format!("ghs_test_{n}"),
                "expires_at": expires_at.to_rfc3339(),
            })),
        )
    }

    async fn spawn_token_server() -> (String, TokenServer) {
        let server = TokenServer {
            mints: Arc::new(AtomicUsize::new(0)),
            lifetime: Arc::new(AtomicI64::new(3600)),
        };
        let app = Router::new()
            .route("/app/installations/:id/access_tokens", post(mint_token))
            .with_state(server.clone());
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        (format!("http://{addr}"), server)
    }

    fn client(api_base: &str) -> GithubAppClient {
        let config = GithubAppConfig {
            app_id: "314159".to_string(),
            private_key: TEST_APP_KEY.to_string(),
            webhook_secret: None,
        };
        GithubAppClient::new(&config, "77")
            .unwrap()
            .with_api_base(api_base)
    }

    #[tokio::test]
    async fn long_lived_tokens_are_cached() {
        let (base, server) = spawn_token_server().await;
        let client = client(&base);

        let first = client.installation_token().await.unwrap();
        let second = client.installation_token().await.unwrap();

        assert_eq!(first, second);
        assert_eq!(server.mints.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn tokens_inside_the_refresh_margin_are_reminted() {
        let (base, server) = spawn_token_server().await;
        // 30 seconds of lifetime is inside the 60-second refresh margin
        server.lifetime.store(30, Ordering::SeqCst);
        let client = client(&base);

        let first = client.installation_token().await.unwrap();
        let second = client.installation_token().await.unwrap();

        assert_ne!(first, second);
        assert_eq!(server.mints.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn invalid_private_key_is_a_configuration_error() {
        let config = GithubAppConfig {
            app_id: "314159".to_string(),
            private_key: "not a pem".to_string(),
            webhook_secret: None,
        };
        assert!(GithubAppClient::new(&config, "77").is_err());
    }
}
