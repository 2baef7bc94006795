//! HTTP boundary. Each route group declares the permission it needs; one
//! middleware enforces it before any handler runs.

pub mod auth;
pub mod error;
pub mod handlers;

use anyhow::{Context, Result};
use axum::extract::Request;
use axum::middleware::{self, Next};
use axum::response::Response;
use axum::routing::{delete, get, post};
use axum::Router;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::time::Instant;
use tracing::{debug, info};

use crate::context::AppContext;
use crate::TARGET_WEB_REQUEST;
use auth::{JwtKeys, Permission, PermissionGuard};

#[derive(Clone)]
pub struct ApiState {
    pub ctx: AppContext,
    pub keys: Arc<JwtKeys>,
}

pub fn router(state: ApiState) -> Router {
    let guard = |permission| PermissionGuard::new(&state.keys, permission);

    let classify = Router::new()
        .route("/api/v1/classify", post(handlers::classify))
        .route("/api/v1/classify/{task_variant}", post(handlers::classify_task))
        .route("/api/v1/normalize", post(handlers::normalize))
        .route("/api/v1/models/{task_variant}", get(handlers::describe_model))
        .route_layer(middleware::from_fn_with_state(
            guard(Permission::Classify),
            auth::authorize,
        ));

    let read = Router::new()
        .route("/api/v1/companies/search", get(handlers::search_companies))
        .route("/api/v1/companies/industry/{industry}", get(handlers::list_by_industry))
        .route("/api/v1/companies/stats", get(handlers::statistics))
        .route("/api/v1/companies/resolve/{name}", get(handlers::resolve_company))
        .route_layer(middleware::from_fn_with_state(
            guard(Permission::CompaniesRead),
            auth::authorize,
        ));

    let admin = Router::new()
        .route("/api/v1/companies", post(handlers::add_company))
        .route("/api/v1/companies/{name}", delete(handlers::remove_company))
        // `search`, `stats`, `export` and `reload` shadow `{name}` above
        .route("/api/v1/companies/by-name/{name}", delete(handlers::remove_company))
        .route("/api/v1/companies/export", get(handlers::export_registry))
        .route("/api/v1/companies/reload", post(handlers::reload_registry))
        .route("/api/v1/models/{task_variant}/load", post(handlers::load_model))
        .route("/api/v1/models/{task_variant}/unload", post(handlers::unload_model))
        .route_layer(middleware::from_fn_with_state(
            guard(Permission::CompaniesAdmin),
            auth::authorize,
        ));

    Router::new()
        .route("/health", get(handlers::health))
        .merge(classify)
        .merge(read)
        .merge(admin)
        .layer(middleware::from_fn(log_requests))
        .with_state(state)
}

async fn log_requests(request: Request, next: Next) -> Response {
    let started = Instant::now();
    let method = request.method().clone();
    let path = request.uri().path().to_string();
    debug!(target: TARGET_WEB_REQUEST, "{} {}", method, path);

    let response = next.run(request).await;
    info!(
        target: TARGET_WEB_REQUEST,
        "{} {} -> {} in {:?}",
        method,
        path,
        response.status().as_u16(),
        started.elapsed()
    );
    response
}

/// Bind `0.0.0.0:<port>` and serve until ctrl-c.
pub async fn serve(state: ApiState, port: u16) -> Result<()> {
    let addr = format!("0.0.0.0:{}", port);
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;

    info!(target: TARGET_WEB_REQUEST, "Server running on http://{}", addr);

    axum::serve(listener, router(state).into_make_service())
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!(target: TARGET_WEB_REQUEST, "Shutdown signal received");
        })
        .await
        .context("Server error")?;
    Ok(())
}
