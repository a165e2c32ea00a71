//! services/api/src/web/middleware.rs
//!
//! Authentication middleware for protecting routes.

use axum::{
    extract::{Request, State},
    http::{header, HeaderMap},
    middleware::Next,
    response::Response,
};
use std::sync::Arc;

use crate::error::{ApiError, ApiResult};
use crate::web::state::AppState;

pub const SESSION_COOKIE: &str = "session";

/// Pulls the auth session token out of the `Cookie` header, if any.
pub fn session_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::COOKIE)
        .and_then(|v| v.to_str().ok())?
        .split(';')
        .find_map(|c| {
            c.trim()
                .strip_prefix(SESSION_COOKIE)
                .and_then(|rest| rest.strip_prefix('='))
        })
        .filter(|token| !token.is_empty())
}

/// Middleware that resolves the session cookie to a `Principal`.
///
/// If valid, inserts the principal into request extensions for handlers to use.
/// If invalid, expired or missing, returns 401 Unauthorized.
pub async fn require_auth(
    State(state): State<Arc<AppState>>,
    mut req: Request,
    next: Next,
) -> ApiResult<Response> {
    let token = session_token(req.headers()).ok_or(ApiError::Unauthenticated)?;
    let principal = state
        .identity
        .current_principal(token)
        .await?
        .ok_or(ApiError::Unauthenticated)?;

    req.extensions_mut().insert(principal);
    Ok(next.run(req).await)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn with_cookie(value: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(header::COOKIE, HeaderValue::from_str(value).unwrap());
        headers
    }

    #[test]
    fn finds_the_session_among_other_cookies() {
        let headers = with_cookie("theme=dark; session=abc-123; lang=en");
        assert_eq!(session_token(&headers), Some("abc-123"));
    }

    #[test]
    fn ignores_lookalike_and_empty_cookies() {
        assert_eq!(session_token(&with_cookie("session_hint=x")), None);
        assert_eq!(session_token(&with_cookie("session=")), None);
        assert_eq!(session_token(&HeaderMap::new()), None);
    }
}
