// Postgres storage layer with sqlx

pub mod config;
pub mod credentials;
pub mod encryption;
pub mod locks;
pub mod models;
pub mod repositories;

pub use config::StorageConfig;
pub use credentials::CredentialStore;
pub use encryption::{generate_credential_key, CredentialEncryption};
pub use locks::PgLockManager;
pub use models::*;
pub use repositories::Database;
