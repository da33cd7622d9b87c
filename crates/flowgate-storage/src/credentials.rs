// Credential provider backed by user_external_credentials

use async_trait::async_trait;
use chrono::{Duration, Utc};
use flowgate_core::{CredentialProvider, Result};
use tracing::debug;

use crate::encryption::CredentialEncryption;
use crate::repositories::Database;

/// Tokens expiring inside this margin are treated as already expired so a
/// caller never receives a token that dies mid-request.
const EXPIRY_MARGIN_SECONDS: i64 = 300;

pub struct CredentialStore {
    db: Database,
    encryption: CredentialEncryption,
}

impl CredentialStore {
    pub fn new(db: Database, encryption: CredentialEncryption) -> Self {
        Self { db, encryption }
    }
}

#[async_trait]
impl CredentialProvider for CredentialStore {
    async fn get_valid_token(&self, user_id: &str, provider: &str) -> Result<Option<String>> {
        let Some(row) = self.db.get_credential(user_id, provider).await? else {
            return Ok(None);
        };

        if !row.is_valid {
            debug!(user_id, provider, "stored credential marked invalid");
            return Ok(None);
        }

        if let Some(expires_at) = row.token_expires_at {
            if expires_at <= Utc::now() + Duration::seconds(EXPIRY_MARGIN_SECONDS) {
                debug!(user_id, provider, "stored credential expired or expiring");
                return Ok(None);
            }
        }

        let token = self.encryption.decrypt(&row.encrypted_access_token)?;
        Ok(Some(token))
    }
}
