use actix_web::{web, HttpResponse, Responder};
use std::sync::Arc;
use validator::Validate;

use crate::core::{JoinOutcome, Matcher, SessionRegistry};
use crate::models::{
    ActiveSessionResponse, EndSessionRequest, EndSessionResponse, HealthResponse, JoinRequest,
    JoinResponse, LeaveRequest, RateSessionRequest, RateSessionResponse, SessionView,
    SuccessResponse,
};
use crate::relay::RelayHub;
use crate::routes::{error_response, validation_error};
use crate::services::SessionStore;

/// Application state shared across all handlers
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn SessionStore>,
    pub matcher: Matcher,
    pub registry: SessionRegistry,
    pub relay: RelayHub,
}

/// Configure matching and session routes
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg
        .route("/health", web::get().to(health_check))
        .route("/matching/join", web::post().to(join))
        .route("/matching/leave", web::post().to(leave))
        .route("/matching/session/{user_id}", web::get().to(get_session))
        .route("/matching/end", web::post().to(end_session))
        .route("/matching/rate", web::post().to(rate_session));
}

/// Health check endpoint
async fn health_check(state: web::Data<AppState>) -> impl Responder {
    let store_healthy = state.store.health_check().await.unwrap_or(false);

    let status = if store_healthy { "healthy" } else { "degraded" };

    HttpResponse::Ok().json(HealthResponse {
        status: status.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        timestamp: chrono::Utc::now(),
    })
}

/// Join the matching queue
///
/// POST /api/v1/matching/join
///
/// Request body:
/// ```json
/// {
///   "user_id": "string",
///   "compatibility_key": "beginner"
/// }
/// ```
async fn join(state: web::Data<AppState>, req: web::Json<JoinRequest>) -> impl Responder {
    if let Err(errors) = req.validate() {
        return validation_error(errors);
    }

    let outcome = match state.matcher.join(&req.user_id, &req.compatibility_key).await {
        Ok(outcome) => outcome,
        Err(e) => return error_response(&e),
    };

    let duration_limit_secs = state.registry.duration_limit_secs(req.compatibility_key.trim());

    match outcome {
        JoinOutcome::Matched { session, partner_id } => {
            let partner = state.registry.partner_profile(&partner_id).await;
            HttpResponse::Ok().json(JoinResponse {
                success: true,
                matched: true,
                session_id: Some(session.id),
                partner_id: Some(partner_id),
                partner,
                duration_limit_secs,
                message: None,
            })
        }
        JoinOutcome::Waiting { .. } => HttpResponse::Ok().json(JoinResponse {
            success: true,
            matched: false,
            session_id: None,
            partner_id: None,
            partner: None,
            duration_limit_secs,
            message: Some("Searching for a conversation partner...".to_string()),
        }),
    }
}

/// Leave the matching queue
///
/// POST /api/v1/matching/leave
async fn leave(state: web::Data<AppState>, req: web::Json<LeaveRequest>) -> impl Responder {
    if let Err(errors) = req.validate() {
        return validation_error(errors);
    }

    match state.matcher.leave(&req.user_id).await {
        Ok(_) => HttpResponse::Ok().json(SuccessResponse { success: true }),
        Err(e) => error_response(&e),
    }
}

/// Get the active session of a user
///
/// GET /api/v1/matching/session/{user_id}
///
/// Partners learn about a match by polling this endpoint.
async fn get_session(state: web::Data<AppState>, path: web::Path<String>) -> impl Responder {
    let user_id = path.into_inner();

    match state.registry.active_session(&user_id).await {
        Ok(Some(active)) => HttpResponse::Ok().json(ActiveSessionResponse {
            active_session: true,
            session: Some(SessionView {
                id: active.session.id,
                partner_id: active.partner_id,
                partner: active.partner,
                compatibility_key: active.session.compatibility_key,
                created_at: active.session.created_at,
                duration_limit_secs: active.duration_limit_secs,
            }),
        }),
        Ok(None) => HttpResponse::Ok().json(ActiveSessionResponse {
            active_session: false,
            session: None,
        }),
        Err(e) => error_response(&e),
    }
}

/// End a session
///
/// POST /api/v1/matching/end
///
/// Request body:
/// ```json
/// {
///   "session_id": "uuid",
///   "user_id": "string",
///   "reason": "call_completed"
/// }
/// ```
async fn end_session(state: web::Data<AppState>, req: web::Json<EndSessionRequest>) -> impl Responder {
    if let Err(errors) = req.validate() {
        return validation_error(errors);
    }

    match state.registry.end(req.session_id, &req.user_id, &req.reason).await {
        Ok(outcome) => HttpResponse::Ok().json(EndSessionResponse {
            success: true,
            status: outcome.status,
            already_ended: outcome.already_ended,
            duration_secs: outcome.duration_secs,
            points_awarded: outcome.points_awarded,
        }),
        Err(e) => error_response(&e),
    }
}

/// Rate the partner of a session
///
/// POST /api/v1/matching/rate
///
/// Request body:
/// ```json
/// {
///   "session_id": "uuid",
///   "user_id": "string",
///   "rating": "good|neutral|bad"
/// }
/// ```
async fn rate_session(state: web::Data<AppState>, req: web::Json<RateSessionRequest>) -> impl Responder {
    if let Err(errors) = req.validate() {
        return validation_error(errors);
    }

    match state.registry.rate(req.session_id, &req.user_id, &req.rating).await {
        Ok(outcome) => HttpResponse::Ok().json(RateSessionResponse {
            success: true,
            status: outcome.status,
            both_rated: outcome.both_rated,
            points_awarded: outcome.points_awarded,
        }),
        Err(e) => error_response(&e),
    }
}
