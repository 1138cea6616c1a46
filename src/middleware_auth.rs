use std::sync::Arc;

use axum::{body::Body, extract::State, http::Request, middleware::Next, response::Response};

use crate::{
    AppState,
    errors::AppError,
    models::{CallerIdentity, Claims},
    utils::decode_jwt,
};

/// Authentication middleware validating JWT access tokens and resolving the caller.
///
/// # Errors
/// Returns unauthorized if the token is missing, invalid, a refresh token, or
/// names a user that no longer exists; rate-limited if the caller exceeded the quota.
pub async fn auth_middleware(
    State(state): State<Arc<AppState>>,
    mut req: Request<Body>,
    next: Next,
) -> Result<Response, AppError> {
    let auth_header = req
        .headers()
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .ok_or(AppError::Unauthorized)?;

    let token = auth_header
        .strip_prefix("Bearer ")
        .ok_or(AppError::Unauthorized)?;
    let claims: Claims = decode_jwt(token, &state.config)?;
    if claims.refresh {
        return Err(AppError::Unauthorized);
    }

    if state.rate_limiter.check_key(&claims.sub.to_string()).is_err() {
        tracing::warn!(user_id = %claims.sub, "rate limit exceeded");
        return Err(AppError::RateLimited);
    }

    let user = state
        .store
        .find_user(claims.sub)
        .await?
        .ok_or(AppError::Unauthorized)?;

    req.extensions_mut().insert(CallerIdentity::from(&user));

    Ok(next.run(req).await)
}
