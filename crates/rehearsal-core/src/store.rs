//! Credential store
//!
//! Persists user identities and password hashes. The PostgreSQL store is the
//! production backend; the in-memory store backs tests and local runs.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::FromRow;
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::{CoreError, DatabaseConfig, NewUser, Profile, Result, User, UserCredentials};

/// Trait for credential operations
#[async_trait]
pub trait CredentialRepository: Send + Sync {
    /// Look up a user and their password hash by exact email
    async fn find_by_email(&self, email: &str) -> Result<Option<UserCredentials>>;

    /// Get a user by ID
    async fn find_by_id(&self, id: Uuid) -> Result<Option<User>>;

    /// Create a user with a default profile.
    ///
    /// Fails with [`CoreError::Conflict`] when the email is already taken.
    async fn create_user(&self, user: NewUser) -> Result<User>;

    /// Whether the backend is reachable
    async fn health_check(&self) -> bool;

    /// Release backend resources
    async fn close(&self);
}

// ============================================================================
// PostgreSQL
// ============================================================================

/// PostgreSQL credential store
pub struct PgCredentialStore {
    pool: PgPool,
}

impl PgCredentialStore {
    /// Connect, then apply pending migrations
    pub async fn connect(config: &DatabaseConfig) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.pool_size)
            .connect(&config.url)
            .await
            .map_err(|e| CoreError::Database(format!("PostgreSQL connection failed: {e}")))?;

        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .map_err(|e| CoreError::Database(format!("Migration failed: {e}")))?;

        tracing::info!(pool_size = config.pool_size, "credential store connected");
        Ok(Self { pool })
    }

    /// Create from an existing pool
    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Get the connection pool
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

/// User row joined with its profile
#[derive(Debug, FromRow)]
struct UserRow {
    id: Uuid,
    email: String,
    password_hash: String,
    first_name: Option<String>,
    last_name: Option<String>,
    phone_number: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    time_zone: Option<String>,
    notification_preferences: Option<serde_json::Value>,
    instruments: Option<Vec<String>>,
}

impl From<UserRow> for UserCredentials {
    fn from(row: UserRow) -> Self {
        let defaults = Profile::default();
        let profile = Profile {
            time_zone: row.time_zone.unwrap_or(defaults.time_zone),
            notification_preferences: row
                .notification_preferences
                .unwrap_or(defaults.notification_preferences),
            instruments: row.instruments.unwrap_or(defaults.instruments),
        };

        UserCredentials {
            user: User {
                id: row.id,
                email: row.email,
                first_name: row.first_name,
                last_name: row.last_name,
                phone_number: row.phone_number,
                created_at: row.created_at,
                updated_at: row.updated_at,
                profile,
            },
            password_hash: row.password_hash,
        }
    }
}

const SELECT_USER: &str = r#"
    SELECT u.id, u.email, u.password_hash, u.first_name, u.last_name, u.phone_number,
           u.created_at, u.updated_at,
           p.time_zone, p.notification_preferences, p.instruments
    FROM users u
    LEFT JOIN profiles p ON p.user_id = u.id
"#;

fn db_error(context: &str, err: sqlx::Error) -> CoreError {
    match &err {
        sqlx::Error::Database(db) if db.is_unique_violation() => {
            CoreError::Conflict("User already exists".to_string())
        }
        _ => CoreError::Database(format!("{context}: {err}")),
    }
}

#[async_trait]
impl CredentialRepository for PgCredentialStore {
    async fn find_by_email(&self, email: &str) -> Result<Option<UserCredentials>> {
        let row = sqlx::query_as::<_, UserRow>(&format!("{SELECT_USER} WHERE u.email = $1"))
            .bind(email)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| db_error("Failed to fetch user", e))?;

        Ok(row.map(UserCredentials::from))
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<User>> {
        let row = sqlx::query_as::<_, UserRow>(&format!("{SELECT_USER} WHERE u.id = $1"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| db_error("Failed to fetch user", e))?;

        Ok(row.map(|r| UserCredentials::from(r).user))
    }

    async fn create_user(&self, user: NewUser) -> Result<User> {
        let user_id = Uuid::new_v4();
        let profile = Profile::default();

        // Dropping the transaction without commit rolls it back.
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| db_error("Failed to begin transaction", e))?;

        sqlx::query(
            r#"
            INSERT INTO users (id, email, password_hash, first_name, last_name, phone_number, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, NOW(), NOW())
            "#,
        )
        .bind(user_id)
        .bind(&user.email)
        .bind(&user.password_hash)
        .bind(&user.first_name)
        .bind(&user.last_name)
        .bind(&user.phone_number)
        .execute(&mut *tx)
        .await
        .map_err(|e| db_error("Failed to create user", e))?;

        sqlx::query(
            r#"
            INSERT INTO profiles (id, user_id, time_zone, notification_preferences, instruments)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(user_id)
        .bind(&profile.time_zone)
        .bind(&profile.notification_preferences)
        .bind(&profile.instruments)
        .execute(&mut *tx)
        .await
        .map_err(|e| db_error("Failed to create profile", e))?;

        let row = sqlx::query_as::<_, UserRow>(&format!("{SELECT_USER} WHERE u.id = $1"))
            .bind(user_id)
            .fetch_one(&mut *tx)
            .await
            .map_err(|e| db_error("Failed to reload user", e))?;

        tx.commit()
            .await
            .map_err(|e| db_error("Failed to commit user", e))?;

        Ok(UserCredentials::from(row).user)
    }

    async fn health_check(&self) -> bool {
        sqlx::query("SELECT 1").execute(&self.pool).await.is_ok()
    }

    async fn close(&self) {
        self.pool.close().await;
        tracing::info!("credential store closed");
    }
}

// ============================================================================
// In-memory
// ============================================================================

/// In-memory credential store keyed by email
#[derive(Default)]
pub struct MemoryCredentialStore {
    users: RwLock<HashMap<String, UserCredentials>>,
}

impl MemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored users
    pub async fn len(&self) -> usize {
        self.users.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.users.read().await.is_empty()
    }
}

#[async_trait]
impl CredentialRepository for MemoryCredentialStore {
    async fn find_by_email(&self, email: &str) -> Result<Option<UserCredentials>> {
        Ok(self.users.read().await.get(email).cloned())
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<User>> {
        Ok(self
            .users
            .read()
            .await
            .values()
            .find(|c| c.user.id == id)
            .map(|c| c.user.clone()))
    }

    async fn create_user(&self, user: NewUser) -> Result<User> {
        let mut users = self.users.write().await;
        if users.contains_key(&user.email) {
            return Err(CoreError::Conflict("User already exists".to_string()));
        }

        let now = Utc::now();
        let created = User {
            id: Uuid::new_v4(),
            email: user.email.clone(),
            first_name: user.first_name,
            last_name: user.last_name,
            phone_number: user.phone_number,
            created_at: now,
            updated_at: now,
            profile: Profile::default(),
        };

        users.insert(
            user.email,
            UserCredentials {
                user: created.clone(),
                password_hash: user.password_hash,
            },
        );

        Ok(created)
    }

    async fn health_check(&self) -> bool {
        true
    }

    async fn close(&self) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_user(email: &str) -> NewUser {
        NewUser {
            email: email.to_string(),
            password_hash: "$argon2id$v=19$stub".to_string(),
            first_name: Some("Test".to_string()),
            last_name: None,
            phone_number: None,
        }
    }

    #[tokio::test]
    async fn test_create_and_find() {
        let store = MemoryCredentialStore::new();
        let user = store.create_user(new_user("a@b.com")).await.unwrap();

        assert_eq!(user.profile, Profile::default());

        let found = store.find_by_email("a@b.com").await.unwrap().unwrap();
        assert_eq!(found.user.id, user.id);
        assert_eq!(found.password_hash, "$argon2id$v=19$stub");

        let by_id = store.find_by_id(user.id).await.unwrap().unwrap();
        assert_eq!(by_id.email, "a@b.com");
    }

    #[tokio::test]
    async fn test_duplicate_email_conflicts() {
        let store = MemoryCredentialStore::new();
        store.create_user(new_user("a@b.com")).await.unwrap();

        let err = store.create_user(new_user("a@b.com")).await.unwrap_err();
        assert!(matches!(err, CoreError::Conflict(_)));
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn test_email_lookup_is_case_sensitive() {
        let store = MemoryCredentialStore::new();
        store.create_user(new_user("a@b.com")).await.unwrap();

        assert!(store.find_by_email("A@B.com").await.unwrap().is_none());
        assert!(store.create_user(new_user("A@B.com")).await.is_ok());
    }

    #[tokio::test]
    async fn test_missing_user() {
        let store = MemoryCredentialStore::new();
        assert!(store.is_empty().await);
        assert!(store.find_by_email("nobody@b.com").await.unwrap().is_none());
        assert!(store.find_by_id(Uuid::new_v4()).await.unwrap().is_none());
    }
}
