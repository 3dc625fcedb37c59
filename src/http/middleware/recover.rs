//! Panic containment.
//!
//! Installed through `tower_http::catch_panic::CatchPanicLayer` around the
//! whole request pipeline. A panic anywhere below it becomes a single
//! generic 500 with `Connection: close`, so the possibly corrupted
//! connection is not reused for a pipelined request.

use std::any::Any;

use axum::{
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

use crate::http::error::SERVER_ERROR_MESSAGE;

pub fn handle_panic(payload: Box<dyn Any + Send + 'static>) -> Response {
    let detail = if let Some(s) = payload.downcast_ref::<String>() {
        s.as_str()
    } else if let Some(s) = payload.downcast_ref::<&str>() {
        s
    } else {
        "non-string panic payload"
    };
    tracing::error!(panic = %detail, "Recovered from panic while handling request");

    let mut response = (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({ "error": SERVER_ERROR_MESSAGE })),
    )
        .into_response();
    response
        .headers_mut()
        .insert(header::CONNECTION, HeaderValue::from_static("close"));
    response
}
