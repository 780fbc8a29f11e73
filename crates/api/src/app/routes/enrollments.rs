use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Extension, Path, Query, rejection::JsonRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};

use campus_core::EnrollmentId;

use crate::app::routes::common::run_cancellable;
use crate::app::services::AppServices;
use crate::app::{dto, errors};

pub fn router() -> Router {
    Router::new()
        .route("/", post(create_enrollment).get(list_enrollments))
        .route(
            "/:id",
            get(get_enrollment)
                .patch(update_enrollment)
                .delete(delete_enrollment),
        )
}

pub async fn create_enrollment(
    Extension(services): Extension<Arc<AppServices>>,
    body: Result<Json<dto::CreateEnrollmentRequest>, JsonRejection>,
) -> Response {
    let Json(body) = match body {
        Ok(b) => b,
        Err(e) => return invalid_body(e),
    };
    let request = body.into();

    match run_cancellable(move |cancel| async move {
        services.orchestrator.create(request, &cancel).await
    })
    .await
    {
        Ok(enrollment) => (StatusCode::CREATED, Json(enrollment)).into_response(),
        Err(e) => errors::orchestrator_error_to_response(e),
    }
}

pub async fn list_enrollments(
    Extension(services): Extension<Arc<AppServices>>,
    Query(params): Query<dto::ListEnrollmentsParams>,
) -> Response {
    let query = match params.to_query() {
        Ok(q) => q,
        Err(e) => return errors::orchestrator_error_to_response(e),
    };

    match run_cancellable(move |cancel| async move {
        services.orchestrator.list(&query, &cancel).await
    })
    .await
    {
        Ok(page) => Json(page).into_response(),
        Err(e) => errors::orchestrator_error_to_response(e),
    }
}

pub async fn get_enrollment(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
) -> Response {
    let id = match parse_id(&id) {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    match run_cancellable(move |cancel| async move {
        services.orchestrator.get(id, &cancel).await
    })
    .await
    {
        Ok(details) => Json(details).into_response(),
        Err(e) => errors::orchestrator_error_to_response(e),
    }
}

pub async fn update_enrollment(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
    body: Result<Json<dto::UpdateEnrollmentRequest>, JsonRejection>,
) -> Response {
    let id = match parse_id(&id) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let Json(body) = match body {
        Ok(b) => b,
        Err(e) => return invalid_body(e),
    };
    let patch = body.into();

    match run_cancellable(move |cancel| async move {
        services.orchestrator.update(id, patch, &cancel).await
    })
    .await
    {
        Ok(enrollment) => Json(enrollment).into_response(),
        Err(e) => errors::orchestrator_error_to_response(e),
    }
}

pub async fn delete_enrollment(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
) -> Response {
    let id = match parse_id(&id) {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    match run_cancellable(move |cancel| async move {
        services.orchestrator.delete(id, &cancel).await
    })
    .await
    {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => errors::orchestrator_error_to_response(e),
    }
}

fn parse_id(raw: &str) -> Result<EnrollmentId, Response> {
    raw.parse()
        .map_err(|_| errors::json_error(StatusCode::BAD_REQUEST, "invalid_id", "invalid enrollment id"))
}

fn invalid_body(rejection: JsonRejection) -> Response {
    errors::json_error(
        StatusCode::BAD_REQUEST,
        "validation_error",
        rejection.body_text(),
    )
}
