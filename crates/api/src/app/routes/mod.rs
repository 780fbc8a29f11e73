use axum::Router;

pub mod common;
pub mod enrollments;
pub mod system;

/// Router for all enrollment endpoints.
pub fn router() -> Router {
    Router::new().nest("/enrollments", enrollments::router())
}
