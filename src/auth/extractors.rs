use axum::{
    async_trait,
    extract::{FromRequestParts, OriginalUri, Request, State},
    http::request::Parts,
    middleware::Next,
    response::{IntoResponse, Response},
};
use tracing::debug;

use crate::{
    auth::session::Principal,
    error::{ApiError, AuthError},
    state::AppState,
};

/// Gate for protected routes: resolves the session cookie into a
/// [`Principal`] and stores it in the request extensions, or rejects with 401.
pub async fn require_session(State(state): State<AppState>, mut req: Request, next: Next) -> Response {
    match state.sessions.principal(req.headers()) {
        Some(principal) => {
            req.extensions_mut().insert(principal);
            next.run(req).await
        }
        None => {
            debug!(path = %req.uri().path(), "no valid session");
            AuthError::Unauthenticated
                .at(original_path(&req))
                .into_response()
        }
    }
}

fn original_path(req: &Request) -> String {
    req.extensions()
        .get::<OriginalUri>()
        .map(|u| u.0.path().to_owned())
        .unwrap_or_else(|| req.uri().path().to_owned())
}

#[async_trait]
impl FromRequestParts<AppState> for Principal {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        // Set by `require_session`; fall back to the cookie for routes outside it.
        if let Some(p) = parts.extensions.get::<Principal>() {
            return Ok(p.clone());
        }
        state
            .sessions
            .principal(&parts.headers)
            .ok_or_else(|| AuthError::Unauthenticated.at(parts.uri.path()))
    }
}
