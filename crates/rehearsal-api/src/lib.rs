//! Rehearsal API - REST server for account registration and authentication
//!
//! Exposes register/login/refresh/logout over JSON, a bearer-protected
//! profile endpoint, health probes and Swagger UI.

pub mod audit;
pub mod auth;
pub mod error;
pub mod handlers;
pub mod middleware;
pub mod openapi;
pub mod routes;
pub mod state;

use crate::handlers::health;
use crate::middleware::{rate_limit_middleware, security_headers_middleware};
use crate::openapi::ApiDoc;
use crate::state::AppState;
use axum::{
    http::{header, HeaderValue, Method},
    middleware as axum_middleware,
    routing::get,
    Router,
};
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

/// Build the application router with all layers
pub fn create_router(state: AppState) -> Router {
    let cors = cors_layer(&state.config.server.cors_origins);

    Router::new()
        .route("/health", get(health::health_check))
        .route("/ready", get(health::readiness_check))
        .nest("/api", routes::api_routes(state.clone()))
        .merge(SwaggerUi::new("/api-docs").url("/openapi.json", ApiDoc::openapi()))
        .layer(axum_middleware::from_fn_with_state(
            state.clone(),
            rate_limit_middleware,
        ))
        .layer(axum_middleware::from_fn(security_headers_middleware))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// CORS policy; an empty origin list allows any origin
fn cors_layer(origins: &[String]) -> CorsLayer {
    if origins.is_empty() {
        return CorsLayer::permissive();
    }

    let origins: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| match origin.parse() {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::warn!(origin = %origin, "ignoring invalid CORS origin");
                None
            }
        })
        .collect();

    CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE])
}

#[cfg(any(test, feature = "test-utils"))]
pub mod testing {
    //! In-memory application wiring for integration tests

    use super::*;
    use crate::auth::{AuthService, ManualClock, PasswordConfig};
    use crate::middleware::RateLimiter;
    use chrono::Utc;
    use rehearsal_core::{AppConfig, AuthConfig, MemoryCredentialStore};
    use std::sync::Arc;

    /// Router plus handles to the injected clock, store and rate limiter
    pub struct TestApp {
        pub router: Router,
        pub clock: Arc<ManualClock>,
        pub store: Arc<MemoryCredentialStore>,
        pub rate_limiter: Arc<RateLimiter>,
    }

    pub fn test_config() -> AppConfig {
        AppConfig {
            auth: AuthConfig {
                access_secret: "test-access-secret".to_string(),
                refresh_secret: "test-refresh-secret".to_string(),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    pub fn test_app() -> TestApp {
        test_app_with_config(test_config())
    }

    pub fn test_app_with_config(config: AppConfig) -> TestApp {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let store = Arc::new(MemoryCredentialStore::new());
        let auth = AuthService::new(store.clone(), &config.auth, clock.clone())
            .with_password_config(PasswordConfig::minimal());

        let state = AppState::new(config, auth);
        let rate_limiter = state.rate_limiter.clone();

        TestApp {
            router: create_router(state),
            clock,
            store,
            rate_limiter,
        }
    }
}

/// Router backed by an in-memory store and a manual clock
#[cfg(any(test, feature = "test-utils"))]
pub fn create_router_for_testing() -> Router {
    testing::test_app().router
}
