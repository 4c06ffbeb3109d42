// Route exports
pub mod matching;
pub mod signal;

use actix_web::{http::StatusCode, web, HttpResponse};

use crate::core::MatchError;
use crate::models::ErrorResponse;

pub use matching::AppState;

pub fn configure_routes(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/api/v1")
            .configure(matching::configure)
            .configure(signal::configure),
    );
}

/// Map a core error onto its HTTP response
pub(crate) fn error_response(err: &MatchError) -> HttpResponse {
    let (status, error) = match err {
        MatchError::Conflict(_) => (StatusCode::CONFLICT, "Conflict"),
        MatchError::NotFound(_) => (StatusCode::NOT_FOUND, "Not found"),
        MatchError::NotParticipant { .. } => (StatusCode::FORBIDDEN, "Not a participant"),
        MatchError::InvalidInput(_) => (StatusCode::BAD_REQUEST, "Invalid input"),
        MatchError::Store(e) => {
            tracing::error!("Storage failure: {}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, "Internal error")
        }
    };

    HttpResponse::build(status).json(ErrorResponse {
        error: error.to_string(),
        message: err.to_string(),
        status_code: status.as_u16(),
    })
}

pub(crate) fn validation_error(errors: validator::ValidationErrors) -> HttpResponse {
    tracing::info!("Validation failed: field_errors={:?}", errors);
    HttpResponse::BadRequest().json(ErrorResponse {
        error: "Validation failed".to_string(),
        message: errors.to_string(),
        status_code: 400,
    })
}
