use crate::error::{AppError, ErrorPayload};
use actix_web::{http::StatusCode, HttpResponse};

pub fn status_of(err: &AppError) -> StatusCode {
    StatusCode::from_u16(err.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
}

// map domain errors to HTTP responses
pub fn map_error(err: &AppError) -> (StatusCode, ErrorPayload) {
    let status = status_of(err);
    if err.is_internal() {
        tracing::error!(error = %err, "request failed with internal error");
    } else {
        tracing::debug!(error = %err, code = err.code(), "request rejected");
    }
    (status, err.payload())
}

pub fn into_response(err: &AppError) -> HttpResponse {
    let (status, body) = map_error(err);
    HttpResponse::build(status).json(body)
}
