use std::net::SocketAddr;

use axum::{
    extract::OriginalUri,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use time::OffsetDateTime;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::auth::{self, session::Principal};
use crate::error::{ApiError, ErrorBody};
use crate::state::AppState;

pub fn build_app(state: AppState) -> Router {
    Router::new()
        .merge(auth::router(state.clone()))
        .route("/error", get(error_page))
        .route("/health", get(|| async { "ok" }))
        .fallback(fallback)
        .with_state(state)
        .layer(CorsLayer::permissive())
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(|req: &axum::http::Request<_>| {
                    let method = req.method().clone();
                    let uri = req.uri().clone();
                    tracing::info_span!("http_request", %method, uri = %uri, status = tracing::field::Empty)
                })
                .on_response(
                    |res: &axum::http::Response<_>,
                     _latency: std::time::Duration,
                     span: &tracing::Span| {
                        let status = res.status();
                        span.record("status", tracing::field::display(status));
                        if status.is_server_error() {
                            tracing::error!(%status, "response");
                        } else {
                            tracing::info!(%status, "response");
                        }
                    },
                ),
        )
}

fn error_body(status: StatusCode, message: &str, path: &str) -> Response {
    let body = ErrorBody {
        timestamp: OffsetDateTime::now_utc(),
        message: message.to_owned(),
        path: path.to_owned(),
    };
    (status, Json(body)).into_response()
}

/// Public landing route for error reporting; always a generic 500.
async fn error_page() -> Response {
    error_body(
        StatusCode::INTERNAL_SERVER_ERROR,
        "An unexpected error occurred",
        "/error",
    )
}

/// Unknown paths are protected like any other route: 401 first, then 404.
async fn fallback(
    principal: Result<Principal, ApiError>,
    OriginalUri(uri): OriginalUri,
) -> Response {
    match principal {
        Ok(_) => error_body(StatusCode::NOT_FOUND, "Not Found", uri.path()),
        Err(rejection) => rejection.into_response(),
    }
}

pub async fn serve(app: Router) -> anyhow::Result<()> {
    let addr: SocketAddr = format!(
        "{}:{}",
        std::env::var("APP_HOST").unwrap_or_else(|_| "0.0.0.0".into()),
        std::env::var("APP_PORT").unwrap_or_else(|_| "8080".into())
    )
    .parse()?;

    tracing::info!("listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}
