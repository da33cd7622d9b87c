// Credential access seam
//
// Executors and triggers never see raw stored secrets; they ask for a valid
// token for (user, provider) and get None when nothing usable exists.

use async_trait::async_trait;

use crate::error::Result;

#[async_trait]
pub trait CredentialProvider: Send + Sync {
    /// A currently valid access token for the user and provider, or None
    /// when the stored credential is missing, invalid or expired.
    async fn get_valid_token(&self, user_id: &str, provider: &str) -> Result<Option<String>>;
}

/// Provider that never yields a token. Default for deployments without a
/// credential store and for tests that must not reach external services.
pub struct NoCredentials;

#[async_trait]
impl CredentialProvider for NoCredentials {
    async fn get_valid_token(&self, _user_id: &str, _provider: &str) -> Result<Option<String>> {
        Ok(None)
    }
}
