// Storage configuration from the environment

use flowgate_core::{Error, Result};

/// Where the repository connects. `DATABASE_URL` wins when both it and the
/// Supabase settings are present.
#[derive(Debug, Clone)]
pub struct StorageConfig {
    pub database_url: String,
}

impl StorageConfig {
    pub fn from_env() -> Result<Self> {
        if let Ok(url) = std::env::var("DATABASE_URL") {
            if !url.is_empty() {
                return Ok(Self { database_url: url });
            }
        }

        if let Ok(url) = std::env::var("SUPABASE_DB_URL") {
            if !url.is_empty() {
                return Ok(Self { database_url: url });
            }
        }

        Err(Error::configuration(
            "neither DATABASE_URL nor SUPABASE_DB_URL is set",
        ))
    }
}
