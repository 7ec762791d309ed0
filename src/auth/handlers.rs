use axum::{
    extract::{rejection::JsonRejection, OriginalUri, State},
    http::{header, HeaderMap, HeaderName, HeaderValue},
    routing::{get, post},
    Json, Router,
};
use tracing::{info, instrument, warn};

use crate::{
    auth::{
        dto::{LoginRequest, MeResponse, RegisterRequest},
        services::{authenticate, register_user},
        session::Principal,
    },
    error::{ApiError, AuthError},
    state::AppState,
};

type SetCookie = [(HeaderName, HeaderValue); 1];

/// Unwraps a JSON body, turning axum's rejection into the uniform 400 error body.
fn json_body<T>(body: Result<Json<T>, JsonRejection>, path: &str) -> Result<T, ApiError> {
    match body {
        Ok(Json(payload)) => Ok(payload),
        Err(rejection) => {
            warn!(%path, status = %rejection.status(), "rejected request body");
            Err(AuthError::MalformedBody(rejection.body_text()).at(path))
        }
    }
}

pub fn auth_routes() -> Router<AppState> {
    Router::new()
        .route("/auth/register", post(register))
        .route("/auth/login", post(login))
        .route("/auth/logout", post(logout))
}

pub fn protected_routes() -> Router<AppState> {
    Router::new()
        .route("/auth/hello", get(hello))
        .route("/auth/me", get(get_me))
}

#[instrument(skip(state, body))]
pub async fn register(
    State(state): State<AppState>,
    OriginalUri(uri): OriginalUri,
    body: Result<Json<RegisterRequest>, JsonRejection>,
) -> Result<String, ApiError> {
    let payload = json_body(body, uri.path())?;
    let user = register_user(
        state.users.as_ref(),
        &state.hasher,
        &payload.username,
        &payload.email,
        &payload.password,
    )
    .await
    .map_err(|e| e.at(uri.path()))?;

    Ok(format!(
        "User registered successfully! Username: {}",
        user.username
    ))
}

#[instrument(skip(state, headers, body))]
pub async fn login(
    State(state): State<AppState>,
    OriginalUri(uri): OriginalUri,
    headers: HeaderMap,
    body: Result<Json<LoginRequest>, JsonRejection>,
) -> Result<(SetCookie, String), ApiError> {
    let payload = json_body(body, uri.path())?;
    let principal = authenticate(
        state.users.as_ref(),
        &state.hasher,
        &payload.username,
        &payload.password,
    )
    .await
    .map_err(|e| e.at(uri.path()))?;

    // A session presented at login is never reused.
    if let Some(old) = state.sessions.session_id(&headers) {
        state.sessions.invalidate(&old);
    }

    let username = principal.username.clone();
    let session_id = state.sessions.create(principal);
    let cookie = match state.sessions.cookie(&session_id) {
        Ok(c) => c,
        Err(e) => {
            state.sessions.invalidate(&session_id);
            return Err(AuthError::Unexpected(e).at(uri.path()));
        }
    };
    info!(%username, active_sessions = state.sessions.len(), "session established");

    Ok((
        [(header::SET_COOKIE, cookie)],
        format!("User logged in successfully. Welcome {}!", username),
    ))
}

#[instrument(skip(state, headers))]
pub async fn logout(State(state): State<AppState>, headers: HeaderMap) -> (SetCookie, &'static str) {
    if let Some(id) = state.sessions.session_id(&headers) {
        if state.sessions.invalidate(&id) {
            info!("session invalidated");
        }
    }
    (
        [(header::SET_COOKIE, state.sessions.expired_cookie())],
        "Logged out successfully.",
    )
}

#[instrument(skip(principal), fields(username = %principal.username))]
pub async fn hello(principal: Principal) -> String {
    format!("Hello, {}!", principal.username)
}

#[instrument(skip(principal), fields(username = %principal.username))]
pub async fn get_me(principal: Principal) -> Json<MeResponse> {
    Json(MeResponse {
        id: principal.id,
        username: principal.username,
        roles: principal.roles,
    })
}
