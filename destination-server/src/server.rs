//! Axum server setup
//!
//! - `/ready` outside the declarative tree
//! - destination routes built by [`crate::router`]
//! - a request span per inbound request, with the route template and status
//! - a cancellation scope per request, canceled when the request is dropped
//! - graceful shutdown on SIGTERM/Ctrl+C, then the pool is closed

use std::net::SocketAddr;
use std::time::Duration;

use axum::extract::Request;
use axum::middleware::{self, Next};
use axum::response::Response;
use axum::routing::get;
use axum::Router;
use destination_db::{Database, Scope};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing::field::Empty;
use tracing::Span;

use crate::handlers;
use crate::router::{self, RouteError};
use crate::state::AppState;
use crate::tracing_setup;

/// Server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind to (default: 0.0.0.0:9001)
    pub bind_addr: SocketAddr,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 9001)),
        }
    }
}

/// Build the application: readiness check plus the declared routes.
pub fn build_app(state: AppState) -> Result<Router, RouteError> {
    let routes = router::build(handlers::routes)?;

    Ok(Router::new()
        .route("/ready", get(ready))
        .merge(routes)
        .layer(middleware::from_fn(attach_scope))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(request_span)
                .on_response(record_status),
        )
        .with_state(state))
}

/// GET /ready
async fn ready() -> &'static str {
    "ok"
}

/// Give the request a cancellation scope. The token is canceled when this
/// future completes or is dropped, which aborts any statement still running
/// on the request's behalf.
async fn attach_scope(mut req: Request, next: Next) -> Response {
    let token = CancellationToken::new();
    let _guard = token.clone().drop_guard();
    req.extensions_mut().insert(Scope::from_token(token));
    next.run(req).await
}

fn request_span(req: &Request) -> Span {
    let span = tracing::info_span!(
        "request",
        otel.name = %format!("{} {}", req.method(), req.uri().path()),
        otel.kind = "server",
        http.method = %req.method(),
        http.target = %req.uri(),
        http.route = Empty,
        http.status_code = Empty,
        error.reason = Empty,
    );
    tracing_setup::link_remote_parent(&span, req.headers());
    span
}

fn record_status(response: &Response, latency: Duration, span: &Span) {
    let status = response.status();
    span.record("http.status_code", status.as_u16());
    if status.is_server_error() {
        tracing::warn!(parent: span, status = status.as_u16(), ?latency, "request failed");
    } else {
        tracing::debug!(parent: span, status = status.as_u16(), ?latency, "request finished");
    }
}

/// Run the HTTP server until a shutdown signal, then close the pool.
///
/// # Example
///
/// ```ignore
/// let db = Database::new(PostgresPool::connect(&url).await?);
/// run_server(db, ServerConfig::default()).await?;
/// ```
pub async fn run_server(db: Database, config: ServerConfig) -> Result<(), ServerError> {
    let app = build_app(AppState::new(db.clone()))?;

    let listener = TcpListener::bind(config.bind_addr).await?;
    tracing::info!("Server listening on {}", config.bind_addr);

    let served = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await;

    db.close().await;
    served?;
    tracing::info!("Server shutdown complete");
    Ok(())
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %err, "failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                tracing::error!(error = %err, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, starting shutdown");
        }
        _ = terminate => {
            tracing::info!("Received SIGTERM, starting shutdown");
        }
    }
}

/// Server error type
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid route tree: {0}")]
    Routes(#[from] RouteError),
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::StatusCode;
    use destination_db::MemoryPool;
    use tower::ServiceExt;

    #[test]
    fn default_config() {
        let config = ServerConfig::default();
        assert_eq!(config.bind_addr.port(), 9001);
    }

    #[tokio::test]
    async fn ready_bypasses_router() {
        let app = build_app(AppState::new(Database::new(MemoryPool::from_rows(vec![])))).unwrap();
        let response = app
            .oneshot(axum::http::Request::get("/ready").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }
}
