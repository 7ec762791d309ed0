use crate::state::AppState;
use axum::{middleware, Router};

mod dto;
pub mod extractors;
pub mod handlers;
pub mod password;
pub mod repo;
pub mod repo_types;
pub mod services;
pub mod session;

/// Public auth routes plus the protected ones behind the session gate.
pub fn router(state: AppState) -> Router<AppState> {
    Router::new().merge(handlers::auth_routes()).merge(
        handlers::protected_routes()
            .route_layer(middleware::from_fn_with_state(state, extractors::require_session)),
    )
}
