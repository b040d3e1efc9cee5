//! Rehearsal Client - session management for the rehearsal scheduler API
//!
//! - [`api`]: HTTP transport behind the [`AuthApi`] trait
//! - [`session`]: signed-in state with background token refresh
//! - [`routes`]: page routing with login redirects

pub mod api;
pub mod config;
pub mod error;
pub mod routes;
pub mod session;

pub use api::{AuthApi, HttpAuthApi, LoginResponse, RegisterForm};
pub use config::{ClientConfig, DEFAULT_API_URL, SESSION_REFRESH_INTERVAL};
pub use error::{ClientError, Result};
pub use routes::Route;
pub use session::{AuthStatus, SessionManager, SessionState};
