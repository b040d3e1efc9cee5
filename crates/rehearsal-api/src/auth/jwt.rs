//! JWT token issuance and verification
//!
//! Access and refresh tokens are HMAC-SHA256 signed with two distinct
//! secrets. Both embed the subject (user ID), issue time and absolute
//! expiry. Expiry is checked against an injected [`Clock`] rather than the
//! library's wall-clock check so lifetimes are exact and testable.

use super::clock::Clock;
use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use rehearsal_core::AuthConfig;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use uuid::Uuid;

/// Access token lifetime (15 minutes)
pub const ACCESS_TOKEN_TTL_SECS: i64 = 15 * 60;

/// Refresh token lifetime (7 days)
pub const REFRESH_TOKEN_TTL_SECS: i64 = 7 * 24 * 60 * 60;

/// Kind of bearer token; each kind has its own signing secret
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenKind {
    Access,
    Refresh,
}

impl TokenKind {
    /// Fixed lifetime of this token kind
    pub fn ttl(self) -> Duration {
        match self {
            Self::Access => Duration::seconds(ACCESS_TOKEN_TTL_SECS),
            Self::Refresh => Duration::seconds(REFRESH_TOKEN_TTL_SECS),
        }
    }
}

impl std::fmt::Display for TokenKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Access => write!(f, "access"),
            Self::Refresh => write!(f, "refresh"),
        }
    }
}

/// JWT Claims structure
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    /// Token issuer
    pub iss: String,
    /// Subject - user ID
    pub sub: Uuid,
    /// JWT ID - unique token identifier
    pub jti: String,
    /// Issued at timestamp (Unix epoch seconds)
    pub iat: i64,
    /// Expiration timestamp (Unix epoch seconds)
    pub exp: i64,
    /// Token kind
    pub typ: TokenKind,
}

impl Claims {
    pub fn expires_at(&self) -> DateTime<Utc> {
        DateTime::from_timestamp(self.exp, 0).unwrap_or(DateTime::<Utc>::MIN_UTC)
    }
}

/// JWT token generation and validation errors
#[derive(Debug, Error)]
pub enum JwtError {
    #[error("Failed to encode JWT: {0}")]
    EncodingError(#[from] jsonwebtoken::errors::Error),

    #[error("Invalid token format")]
    InvalidToken,

    #[error("Token has expired")]
    ExpiredToken,

    #[error("Invalid token signature")]
    InvalidSignature,
}

struct SigningKeys {
    encoding: EncodingKey,
    decoding: DecodingKey,
}

impl SigningKeys {
    fn from_secret(secret: &str) -> Self {
        Self {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
        }
    }
}

/// Signing material for both token kinds
pub struct JwtKeys {
    issuer: String,
    access: SigningKeys,
    refresh: SigningKeys,
}

impl JwtKeys {
    /// Build keys from validated configuration
    pub fn from_config(config: &AuthConfig) -> Self {
        Self {
            issuer: config.issuer.clone(),
            access: SigningKeys::from_secret(&config.access_secret),
            refresh: SigningKeys::from_secret(&config.refresh_secret),
        }
    }

    fn for_kind(&self, kind: TokenKind) -> &SigningKeys {
        match kind {
            TokenKind::Access => &self.access,
            TokenKind::Refresh => &self.refresh,
        }
    }
}

/// A freshly signed token and the claims it carries
#[derive(Debug, Clone)]
pub struct IssuedToken {
    pub token: String,
    pub claims: Claims,
}

/// Mints signed, time-bound tokens
#[derive(Clone)]
pub struct TokenIssuer {
    keys: Arc<JwtKeys>,
    clock: Arc<dyn Clock>,
}

impl TokenIssuer {
    pub fn new(keys: Arc<JwtKeys>, clock: Arc<dyn Clock>) -> Self {
        Self { keys, clock }
    }

    /// Issue a token of the given kind for `user_id`
    pub fn issue(&self, user_id: Uuid, kind: TokenKind) -> Result<IssuedToken, JwtError> {
        let now = self.clock.now();

        let claims = Claims {
            iss: self.keys.issuer.clone(),
            sub: user_id,
            jti: Uuid::new_v4().to_string(),
            iat: now.timestamp(),
            exp: (now + kind.ttl()).timestamp(),
            typ: kind,
        };

        let token = encode(
            &Header::new(Algorithm::HS256),
            &claims,
            &self.keys.for_kind(kind).encoding,
        )?;

        Ok(IssuedToken { token, claims })
    }

    pub fn issue_access_token(&self, user_id: Uuid) -> Result<IssuedToken, JwtError> {
        self.issue(user_id, TokenKind::Access)
    }

    pub fn issue_refresh_token(&self, user_id: Uuid) -> Result<IssuedToken, JwtError> {
        self.issue(user_id, TokenKind::Refresh)
    }
}

/// Validates signature, issuer, kind and expiry
#[derive(Clone)]
pub struct TokenVerifier {
    keys: Arc<JwtKeys>,
    clock: Arc<dyn Clock>,
}

impl TokenVerifier {
    pub fn new(keys: Arc<JwtKeys>, clock: Arc<dyn Clock>) -> Self {
        Self { keys, clock }
    }

    /// Verify `token` as a token of `kind` and return its claims.
    ///
    /// A token is valid up to and including its `exp` second.
    pub fn verify(&self, token: &str, kind: TokenKind) -> Result<Claims, JwtError> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_issuer(&[&self.keys.issuer]);
        validation.set_required_spec_claims(&["exp", "sub", "iss"]);
        validation.validate_exp = false;

        let token_data = decode::<Claims>(token, &self.keys.for_kind(kind).decoding, &validation)
            .map_err(|e| match e.kind() {
                jsonwebtoken::errors::ErrorKind::InvalidSignature => JwtError::InvalidSignature,
                _ => JwtError::InvalidToken,
            })?;

        let claims = token_data.claims;
        if claims.typ != kind {
            return Err(JwtError::InvalidToken);
        }
        if self.clock.now().timestamp() > claims.exp {
            return Err(JwtError::ExpiredToken);
        }

        Ok(claims)
    }

    /// Verify and return only the bound user ID
    pub fn verify_subject(&self, token: &str, kind: TokenKind) -> Result<Uuid, JwtError> {
        self.verify(token, kind).map(|claims| claims.sub)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::clock::{ManualClock, SystemClock};
    use chrono::TimeZone;
    use proptest::prelude::*;

    fn config() -> AuthConfig {
        AuthConfig {
            access_secret: "access-secret-for-tests".to_string(),
            refresh_secret: "refresh-secret-for-tests".to_string(),
            ..Default::default()
        }
    }

    fn start() -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000, 0).unwrap()
    }

    fn pair(config: &AuthConfig, clock: Arc<dyn Clock>) -> (TokenIssuer, TokenVerifier) {
        let keys = Arc::new(JwtKeys::from_config(config));
        (
            TokenIssuer::new(keys.clone(), clock.clone()),
            TokenVerifier::new(keys, clock),
        )
    }

    #[test]
    fn test_issue_and_verify_both_kinds() {
        let (issuer, verifier) = pair(&config(), Arc::new(SystemClock));
        let user_id = Uuid::new_v4();

        let access = issuer.issue_access_token(user_id).unwrap();
        let refresh = issuer.issue_refresh_token(user_id).unwrap();

        let claims = verifier.verify(&access.token, TokenKind::Access).unwrap();
        assert_eq!(claims.sub, user_id);
        assert_eq!(claims.iss, "rehearsal-api");
        assert_eq!(claims.typ, TokenKind::Access);

        assert_eq!(
            verifier
                .verify_subject(&refresh.token, TokenKind::Refresh)
                .unwrap(),
            user_id
        );
    }

    #[test]
    fn test_expiry_horizons() {
        let clock = Arc::new(ManualClock::new(start()));
        let (issuer, _) = pair(&config(), clock);
        let user_id = Uuid::new_v4();

        let access = issuer.issue_access_token(user_id).unwrap();
        assert_eq!(access.claims.iat, start().timestamp());
        assert_eq!(access.claims.expires_at(), start() + Duration::minutes(15));

        let refresh = issuer.issue_refresh_token(user_id).unwrap();
        assert_eq!(refresh.claims.expires_at(), start() + Duration::days(7));
    }

    #[test]
    fn test_kinds_are_not_interchangeable() {
        let (issuer, verifier) = pair(&config(), Arc::new(SystemClock));
        let user_id = Uuid::new_v4();

        let access = issuer.issue_access_token(user_id).unwrap();
        let refresh = issuer.issue_refresh_token(user_id).unwrap();

        assert!(matches!(
            verifier.verify(&access.token, TokenKind::Refresh),
            Err(JwtError::InvalidSignature)
        ));
        assert!(matches!(
            verifier.verify(&refresh.token, TokenKind::Access),
            Err(JwtError::InvalidSignature)
        ));
    }

    #[test]
    fn test_kind_claim_checked_even_with_shared_secret() {
        let shared = AuthConfig {
            access_secret: "shared".to_string(),
            refresh_secret: "shared".to_string(),
            ..Default::default()
        };
        let (issuer, verifier) = pair(&shared, Arc::new(SystemClock));

        let access = issuer.issue_access_token(Uuid::new_v4()).unwrap();
        assert!(matches!(
            verifier.verify(&access.token, TokenKind::Refresh),
            Err(JwtError::InvalidToken)
        ));
    }

    #[test]
    fn test_wrong_secret() {
        let (issuer, _) = pair(&config(), Arc::new(SystemClock));
        let other = AuthConfig {
            access_secret: "another-access-secret".to_string(),
            ..config()
        };
        let (_, verifier) = pair(&other, Arc::new(SystemClock));

        let token = issuer.issue_access_token(Uuid::new_v4()).unwrap();
        assert!(matches!(
            verifier.verify(&token.token, TokenKind::Access),
            Err(JwtError::InvalidSignature)
        ));
    }

    #[test]
    fn test_wrong_issuer() {
        let (issuer, _) = pair(&config(), Arc::new(SystemClock));
        let other = AuthConfig {
            issuer: "someone-else".to_string(),
            ..config()
        };
        let (_, verifier) = pair(&other, Arc::new(SystemClock));

        let token = issuer.issue_access_token(Uuid::new_v4()).unwrap();
        assert!(matches!(
            verifier.verify(&token.token, TokenKind::Access),
            Err(JwtError::InvalidToken)
        ));
    }

    #[test]
    fn test_invalid_token() {
        let (_, verifier) = pair(&config(), Arc::new(SystemClock));
        assert!(matches!(
            verifier.verify("invalid.token.here", TokenKind::Access),
            Err(JwtError::InvalidToken)
        ));
        assert!(verifier.verify("", TokenKind::Refresh).is_err());
    }

    #[test]
    fn test_expiry_boundary() {
        let clock = Arc::new(ManualClock::new(start()));
        let (issuer, verifier) = pair(&config(), clock.clone());
        let token = issuer.issue_access_token(Uuid::new_v4()).unwrap();

        clock.advance(Duration::seconds(ACCESS_TOKEN_TTL_SECS));
        assert!(verifier.verify(&token.token, TokenKind::Access).is_ok());

        clock.advance(Duration::seconds(1));
        assert!(matches!(
            verifier.verify(&token.token, TokenKind::Access),
            Err(JwtError::ExpiredToken)
        ));
    }

    #[test]
    fn test_refresh_token_expires_after_seven_days() {
        let clock = Arc::new(ManualClock::new(start()));
        let (issuer, verifier) = pair(&config(), clock.clone());
        let token = issuer.issue_refresh_token(Uuid::new_v4()).unwrap();

        clock.advance(Duration::days(8));
        assert!(matches!(
            verifier.verify(&token.token, TokenKind::Refresh),
            Err(JwtError::ExpiredToken)
        ));
    }

    proptest! {
        #[test]
        fn prop_round_trip_recovers_subject(raw in any::<u128>(), refresh in any::<bool>()) {
            let clock = Arc::new(ManualClock::new(start()));
            let (issuer, verifier) = pair(&config(), clock);
            let user_id = Uuid::from_u128(raw);
            let kind = if refresh { TokenKind::Refresh } else { TokenKind::Access };

            let issued = issuer.issue(user_id, kind).unwrap();
            prop_assert_eq!(verifier.verify_subject(&issued.token, kind).unwrap(), user_id);
        }

        #[test]
        fn prop_access_token_valid_exactly_until_expiry(elapsed in 0i64..(2 * ACCESS_TOKEN_TTL_SECS)) {
            let clock = Arc::new(ManualClock::new(start()));
            let (issuer, verifier) = pair(&config(), clock.clone());
            let issued = issuer.issue_access_token(Uuid::new_v4()).unwrap();

            clock.advance(Duration::seconds(elapsed));
            let result = verifier.verify(&issued.token, TokenKind::Access);

            if elapsed <= ACCESS_TOKEN_TTL_SECS {
                prop_assert!(result.is_ok());
            } else {
                prop_assert!(matches!(result, Err(JwtError::ExpiredToken)));
            }
        }
    }
}
