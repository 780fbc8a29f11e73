//! HTTP API application wiring (Axum router + service wiring).
//!
//! - `services.rs`: adapter selection (in-memory or Postgres) and the orchestrator
//! - `routes/`: HTTP routes + handlers
//! - `dto.rs`: request DTOs and their mapping to orchestrator inputs
//! - `errors.rs`: consistent error responses

use std::sync::Arc;

use axum::{Extension, Router, routing::get};
use tower::ServiceBuilder;

use campus_infra::config::Settings;

use crate::middleware;

pub mod dto;
pub mod errors;
pub mod routes;
pub mod services;

/// Build the full HTTP router (public entrypoint used by `main.rs`).
pub async fn build_app(settings: &Settings) -> anyhow::Result<Router> {
    let services = Arc::new(services::build_services(settings).await?);
    Ok(router(services))
}

/// Router over already-wired services.
pub fn router(services: Arc<services::AppServices>) -> Router {
    Router::new()
        .route("/health", get(routes::system::health))
        .merge(routes::router().layer(Extension(services)))
        .layer(ServiceBuilder::new().layer(axum::middleware::from_fn(middleware::request_id)))
}
