//! Rehearsal Core - Domain models, configuration and credential storage
//!
//! This crate defines the pieces shared by the API server and the client:
//! - User and profile models
//! - Common error types
//! - Configuration management
//! - Credential store (PostgreSQL and in-memory)

pub mod config;
pub mod store;

pub use config::{
    AppConfig, AuthConfig, ConfigError, DatabaseConfig, Environment, LoggingConfig,
    RateLimitConfig, ServerConfig,
};
pub use store::{CredentialRepository, MemoryCredentialStore, PgCredentialStore};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use utoipa::ToSchema;
use uuid::Uuid;

// ============================================================================
// Error Types
// ============================================================================

/// Core error types
#[derive(Error, Debug)]
pub enum CoreError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, CoreError>;

// ============================================================================
// Users
// ============================================================================

/// Default time zone assigned to new profiles
pub const DEFAULT_TIME_ZONE: &str = "UTC";

/// Per-user preferences created alongside the account
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct Profile {
    /// IANA time zone name
    pub time_zone: String,

    /// Free-form notification settings
    #[schema(value_type = Object)]
    pub notification_preferences: serde_json::Value,

    /// Instruments the user plays
    pub instruments: Vec<String>,
}

impl Default for Profile {
    fn default() -> Self {
        Self {
            time_zone: DEFAULT_TIME_ZONE.to_string(),
            notification_preferences: serde_json::Value::Object(serde_json::Map::new()),
            instruments: Vec::new(),
        }
    }
}

/// A registered user as exposed outside the credential store.
///
/// There is deliberately no password hash on this type; see
/// [`UserCredentials`] for the store-internal pairing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct User {
    pub id: Uuid,
    pub email: String,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub phone_number: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub profile: Profile,
}

/// Registration payload after validation and hashing
#[derive(Debug, Clone)]
pub struct NewUser {
    pub email: String,
    pub password_hash: String,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub phone_number: Option<String>,
}

/// A user together with the stored password hash
#[derive(Debug, Clone)]
pub struct UserCredentials {
    pub user: User,
    pub password_hash: String,
}
