//! Authentication module
//!
//! - Token issuance and verification (HS256, separate access/refresh secrets)
//! - Password hashing with Argon2id
//! - Bearer token middleware
//! - Authentication service for register/login/refresh/logout

pub mod clock;
pub mod jwt;
pub mod middleware;
pub mod password;
pub mod service;

pub use clock::{Clock, ManualClock, SystemClock};
pub use jwt::{Claims, JwtError, JwtKeys, TokenIssuer, TokenKind, TokenVerifier};
pub use middleware::{require_auth, AuthenticatedUser};
pub use password::{hash_password, verify_password, PasswordConfig, PasswordError};
pub use service::{
    AuthService, LoginRequest, LoginResponse, LogoutRequest, RefreshRequest, RefreshResponse,
    RegisterRequest,
};
