/// Authentication middleware for protecting routes
///
/// Extracts and validates the bearer access token from the Authorization
/// header. On success, adds the authenticated user to request extensions.
use crate::audit::{audit_log, AuditEvent, ClientContext};
use crate::error::AppError;
use crate::state::AppState;
use axum::{
    body::Body,
    extract::{Request, State},
    http::header,
    middleware::Next,
    response::Response,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Authenticated user information extracted from a verified access token
///
/// Handlers read it with `Extension<AuthenticatedUser>`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthenticatedUser {
    pub user_id: Uuid,
    pub jti: String,
}

/// Require a valid access token
///
/// ```ignore
/// let protected = Router::new()
///     .route("/me", get(handlers::users::me))
///     .route_layer(middleware::from_fn_with_state(state.clone(), require_auth));
/// ```
pub async fn require_auth(
    State(state): State<AppState>,
    mut request: Request<Body>,
    next: Next,
) -> Result<Response, AppError> {
    let token = bearer_token(&request)
        .ok_or_else(|| AppError::Unauthorized("Access token is required".to_string()))?;

    let claims = match state.auth.authenticate(token) {
        Ok(claims) => claims,
        Err(e) => {
            let ctx = ClientContext::new(request.extensions(), request.headers());
            audit_log(&AuditEvent::InvalidToken {
                reason: e.to_string(),
                ip_address: ctx.ip_address,
                user_agent: ctx.user_agent,
            });
            return Err(AppError::Unauthorized(
                "Invalid or expired token".to_string(),
            ));
        }
    };

    request.extensions_mut().insert(AuthenticatedUser {
        user_id: claims.sub,
        jti: claims.jti,
    });

    Ok(next.run(request).await)
}

fn bearer_token(request: &Request<Body>) -> Option<&str> {
    request
        .headers()
        .get(header::AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|token| !token.is_empty())
}
