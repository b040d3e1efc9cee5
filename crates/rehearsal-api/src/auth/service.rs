//! Authentication service layer
//!
//! Provides business logic for user registration, login, token refresh, and
//! logout. The credential store handle is injected; the service itself holds
//! no session state.

use super::clock::Clock;
use super::jwt::{Claims, JwtError, JwtKeys, TokenIssuer, TokenKind, TokenVerifier};
use super::password::{hash_password_with_config, verify_password, PasswordConfig};
use crate::audit::{audit_log, AuditEvent, ClientContext};
use crate::error::AppError;
use rehearsal_core::{AuthConfig, CoreError, CredentialRepository, NewUser, User};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::OnceCell;
use utoipa::ToSchema;
use uuid::Uuid;
use validator::ValidateEmail;

const INVALID_CREDENTIALS: &str = "Invalid credentials";
const REFRESH_TOKEN_REQUIRED: &str = "Refresh token is required";
const INVALID_REFRESH_TOKEN: &str = "Invalid or expired refresh token";

/// Verified against when the email is unknown, so both login failures cost
/// one Argon2 verification.
const DUMMY_PASSWORD: &str = "rehearsal-unknown-user";

/// User registration request
#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct RegisterRequest {
    pub email: Option<String>,
    pub password: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub phone_number: Option<String>,
}

/// User login request
#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
pub struct LoginRequest {
    pub email: Option<String>,
    pub password: Option<String>,
}

/// Token refresh request
#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct RefreshRequest {
    pub refresh_token: Option<String>,
}

/// Logout request
#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct LogoutRequest {
    pub refresh_token: Option<String>,
}

/// Successful login
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct LoginResponse {
    pub message: String,
    pub user: User,
    pub access_token: String,
    pub refresh_token: String,
}

/// Successful refresh; the refresh token itself is not rotated
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct RefreshResponse {
    pub access_token: String,
}

/// Authentication service
#[derive(Clone)]
pub struct AuthService {
    store: Arc<dyn CredentialRepository>,
    issuer: TokenIssuer,
    verifier: TokenVerifier,
    password_config: PasswordConfig,
    dummy_hash: Arc<OnceCell<String>>,
}

impl AuthService {
    /// Create a new authentication service
    pub fn new(
        store: Arc<dyn CredentialRepository>,
        auth_config: &AuthConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let keys = Arc::new(JwtKeys::from_config(auth_config));
        Self {
            store,
            issuer: TokenIssuer::new(keys.clone(), clock.clone()),
            verifier: TokenVerifier::new(keys, clock),
            password_config: PasswordConfig::default(),
            dummy_hash: Arc::new(OnceCell::new()),
        }
    }

    /// Override Argon2 cost parameters
    pub fn with_password_config(mut self, config: PasswordConfig) -> Self {
        self.password_config = config;
        self.dummy_hash = Arc::new(OnceCell::new());
        self
    }

    pub fn store(&self) -> &Arc<dyn CredentialRepository> {
        &self.store
    }

    /// Register a new user
    ///
    /// Fails with `BadRequest` for a missing or malformed email or missing
    /// password, and `Conflict` when the email is taken.
    pub async fn register(
        &self,
        request: RegisterRequest,
        ctx: &ClientContext,
    ) -> Result<User, AppError> {
        let email = required(request.email, "Email is required")?;
        let password = required(request.password, "Password is required")?;

        if !email.validate_email() {
            return Err(AppError::BadRequest("Invalid email format".to_string()));
        }

        if self.store.find_by_email(&email).await?.is_some() {
            return Err(self.registration_conflict(email, ctx));
        }

        let password_hash = self.hash(password).await?;

        let new_user = NewUser {
            email: email.clone(),
            password_hash,
            first_name: request.first_name,
            last_name: request.last_name,
            phone_number: request.phone_number,
        };

        // A concurrent registration can still win the race past the lookup.
        let user = match self.store.create_user(new_user).await {
            Ok(user) => user,
            Err(CoreError::Conflict(_)) => return Err(self.registration_conflict(email, ctx)),
            Err(e) => return Err(e.into()),
        };

        audit_log(&AuditEvent::RegistrationSuccess {
            user_id: user.id,
            email: user.email.clone(),
            ip_address: ctx.ip_address.clone(),
        });

        Ok(user)
    }

    /// Login with email and password
    ///
    /// Unknown email and wrong password produce the same error.
    pub async fn login(
        &self,
        request: LoginRequest,
        ctx: &ClientContext,
    ) -> Result<LoginResponse, AppError> {
        let email = required(request.email, "Email and password are required")?;
        let password = required(request.password, "Email and password are required")?;

        let Some(credentials) = self.store.find_by_email(&email).await? else {
            let dummy_hash = self.dummy_hash().await?;
            self.verify(password, dummy_hash).await?;
            return Err(self.login_failure(email, "unknown email", ctx));
        };

        if !self.verify(password, credentials.password_hash).await? {
            return Err(self.login_failure(email, "password mismatch", ctx));
        }

        let user = credentials.user;
        let access = self.issuer.issue_access_token(user.id).map_err(token_error)?;
        let refresh = self.issuer.issue_refresh_token(user.id).map_err(token_error)?;

        audit_log(&AuditEvent::LoginSuccess {
            user_id: user.id,
            email: user.email.clone(),
            ip_address: ctx.ip_address.clone(),
            user_agent: ctx.user_agent.clone(),
        });

        Ok(LoginResponse {
            message: "Login successful".to_string(),
            user,
            access_token: access.token,
            refresh_token: refresh.token,
        })
    }

    /// Exchange a refresh token for a new access token
    pub async fn refresh(
        &self,
        request: RefreshRequest,
        ctx: &ClientContext,
    ) -> Result<RefreshResponse, AppError> {
        let token = required(request.refresh_token, REFRESH_TOKEN_REQUIRED)
            .map_err(|_| AppError::Unauthorized(REFRESH_TOKEN_REQUIRED.to_string()))?;

        let user_id = self
            .verifier
            .verify_subject(&token, TokenKind::Refresh)
            .map_err(|e| {
                audit_log(&AuditEvent::RefreshFailure {
                    reason: e.to_string(),
                    ip_address: ctx.ip_address.clone(),
                });
                AppError::Unauthorized(INVALID_REFRESH_TOKEN.to_string())
            })?;

        let access = self.issuer.issue_access_token(user_id).map_err(token_error)?;

        audit_log(&AuditEvent::TokenRefresh {
            user_id,
            ip_address: ctx.ip_address.clone(),
        });

        Ok(RefreshResponse {
            access_token: access.token,
        })
    }

    /// Logout
    ///
    /// Tokens are stateless, so this only validates that a refresh token was
    /// supplied. Nothing is invalidated server-side.
    pub async fn logout(&self, request: LogoutRequest, ctx: &ClientContext) -> Result<(), AppError> {
        required(request.refresh_token, REFRESH_TOKEN_REQUIRED)?;

        audit_log(&AuditEvent::Logout {
            ip_address: ctx.ip_address.clone(),
        });

        Ok(())
    }

    /// Validate an access token presented on a protected route
    pub fn authenticate(&self, access_token: &str) -> Result<Claims, JwtError> {
        self.verifier.verify(access_token, TokenKind::Access)
    }

    /// Get user by ID
    pub async fn current_user(&self, user_id: Uuid) -> Result<User, AppError> {
        self.store
            .find_by_id(user_id)
            .await?
            .ok_or_else(|| AppError::NotFound("User not found".to_string()))
    }

    async fn hash(&self, password: String) -> Result<String, AppError> {
        let config = self.password_config.clone();
        tokio::task::spawn_blocking(move || hash_password_with_config(&password, &config))
            .await
            .map_err(|e| AppError::Internal(format!("Password hashing task failed: {e}")))?
            .map_err(|e| AppError::Internal(format!("Failed to hash password: {e}")))
    }

    /// Hash of [`DUMMY_PASSWORD`] under the current cost parameters
    async fn dummy_hash(&self) -> Result<String, AppError> {
        self.dummy_hash
            .get_or_try_init(|| self.hash(DUMMY_PASSWORD.to_string()))
            .await
            .cloned()
    }

    async fn verify(&self, password: String, hash: String) -> Result<bool, AppError> {
        tokio::task::spawn_blocking(move || verify_password(&password, &hash))
            .await
            .map_err(|e| AppError::Internal(format!("Password verification task failed: {e}")))?
            .map_err(|e| AppError::Internal(format!("Failed to verify password: {e}")))
    }

    fn registration_conflict(&self, email: String, ctx: &ClientContext) -> AppError {
        audit_log(&AuditEvent::RegistrationFailure {
            email,
            reason: "email already registered".to_string(),
            ip_address: ctx.ip_address.clone(),
        });
        AppError::Conflict("User already exists".to_string())
    }

    fn login_failure(&self, email: String, reason: &str, ctx: &ClientContext) -> AppError {
        audit_log(&AuditEvent::LoginFailure {
            email,
            reason: reason.to_string(),
            ip_address: ctx.ip_address.clone(),
            user_agent: ctx.user_agent.clone(),
        });
        AppError::Unauthorized(INVALID_CREDENTIALS.to_string())
    }
}

/// Reject absent or blank fields with `BadRequest`
fn required(value: Option<String>, message: &str) -> Result<String, AppError> {
    match value {
        Some(v) if !v.trim().is_empty() => Ok(v),
        _ => Err(AppError::BadRequest(message.to_string())),
    }
}

fn token_error(err: JwtError) -> AppError {
    AppError::Internal(format!("Failed to issue token: {err}"))
}
