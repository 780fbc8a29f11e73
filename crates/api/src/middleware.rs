//! Request correlation.
//!
//! Every request runs inside an `http_request` span carrying a request id, taken from
//! the caller's `x-request-id` header when present and generated otherwise. The id is
//! echoed on the response.

use std::time::Instant;

use axum::{
    body::Body,
    http::{HeaderValue, Request},
    middleware::Next,
    response::Response,
};
use tracing::{Instrument, info, info_span};
use uuid::Uuid;

pub const REQUEST_ID_HEADER: &str = "x-request-id";

const MAX_REQUEST_ID_LEN: usize = 128;

pub async fn request_id(req: Request<Body>, next: Next) -> Response {
    let id = incoming_request_id(&req).unwrap_or_else(|| Uuid::now_v7().to_string());

    let span = info_span!(
        "http_request",
        method = %req.method(),
        path = %req.uri().path(),
        request_id = %id,
    );
    let started = Instant::now();

    let mut res = next.run(req).instrument(span.clone()).await;

    span.in_scope(|| {
        info!(
            status = res.status().as_u16(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "request completed"
        )
    });

    if let Ok(value) = HeaderValue::from_str(&id) {
        res.headers_mut().insert(REQUEST_ID_HEADER, value);
    }
    res
}

fn incoming_request_id(req: &Request<Body>) -> Option<String> {
    let value = req.headers().get(REQUEST_ID_HEADER)?.to_str().ok()?.trim();
    if value.is_empty() || value.len() > MAX_REQUEST_ID_LEN {
        return None;
    }
    Some(value.to_string())
}
