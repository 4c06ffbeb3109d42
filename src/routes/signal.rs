use actix_web::{http::header, http::StatusCode, web, HttpRequest, HttpResponse};
use actix_ws::{AggregatedMessage, CloseReason};
use futures_util::StreamExt;
use uuid::Uuid;

use crate::core::MatchError;
use crate::models::{ErrorResponse, SessionStatus, SignalResponse};
use crate::relay::{DisconnectCause, Frame, RelayConnection};
use crate::routes::{error_response, AppState};

/// Largest reassembled message accepted from a client
const MAX_MESSAGE_SIZE: usize = 1024 * 1024;

/// Configure signaling relay routes
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg
        .route("/signal/{session_id}/{user_id}", web::get().to(signal_socket))
        .route("/signal/{session_id}/{user_id}", web::post().to(signal_http));
}

fn is_websocket_upgrade(req: &HttpRequest) -> bool {
    req.headers()
        .get(header::UPGRADE)
        .and_then(|value| value.to_str().ok())
        .map(|value| value.eq_ignore_ascii_case("websocket"))
        .unwrap_or(false)
}

fn session_missing(session_id: Uuid) -> HttpResponse {
    HttpResponse::NotFound().json(ErrorResponse {
        error: "Session not found".to_string(),
        message: format!("No active session {}", session_id),
        status_code: 404,
    })
}

/// Check that the session is still active and that `user_id` takes part in it
async fn require_participant(
    state: &AppState,
    session_id: Uuid,
    user_id: &str,
) -> Result<(), HttpResponse> {
    let session = match state.registry.session(session_id).await {
        Ok(Some(session)) if session.status == SessionStatus::Active => session,
        Ok(_) => return Err(session_missing(session_id)),
        Err(e) => return Err(error_response(&e)),
    };

    if session.side_of(user_id).is_none() {
        tracing::info!("Rejected signaling from {} for session {}", user_id, session_id);
        return Err(error_response(&MatchError::NotParticipant {
            session_id,
            user_id: user_id.to_string(),
        }));
    }

    Ok(())
}

/// WebSocket signaling endpoint
///
/// GET /api/v1/signal/{session_id}/{user_id}
///
/// Only the two participants of an active session may attach. Frames
/// received on the socket are relayed verbatim to the other sockets of the
/// same session.
async fn signal_socket(
    state: web::Data<AppState>,
    path: web::Path<(Uuid, String)>,
    req: HttpRequest,
    body: web::Payload,
) -> Result<HttpResponse, actix_web::Error> {
    let (session_id, user_id) = path.into_inner();

    if !is_websocket_upgrade(&req) {
        tracing::info!("Rejected non-upgrade signaling request for session {}", session_id);
        return Ok(HttpResponse::build(StatusCode::UPGRADE_REQUIRED).json(ErrorResponse {
            error: "Upgrade required".to_string(),
            message: "Expected Upgrade: websocket".to_string(),
            status_code: 426,
        }));
    }

    if let Err(response) = require_participant(&state, session_id, &user_id).await {
        return Ok(response);
    }

    let connection = match state.relay.connect(session_id, &user_id).await {
        Ok(connection) => connection,
        Err(e) => {
            tracing::error!("Failed to attach to relay for session {}: {}", session_id, e);
            return Ok(HttpResponse::ServiceUnavailable().json(ErrorResponse {
                error: "Relay unavailable".to_string(),
                message: e.to_string(),
                status_code: 503,
            }));
        }
    };

    // A failed handshake drops `connection`, which detaches it again
    let (response, socket, stream) = actix_ws::handle(&req, body)?;

    tracing::debug!(
        "Signaling socket {} of {} attached to session {}",
        connection.connection_id(),
        user_id,
        session_id
    );

    actix_web::rt::spawn(pump(connection, socket, stream));

    Ok(response)
}

/// Shuttle frames between one WebSocket and its relay connection
async fn pump(mut connection: RelayConnection, mut socket: actix_ws::Session, stream: actix_ws::MessageStream) {
    let mut stream = stream
        .aggregate_continuations()
        .max_continuation_size(MAX_MESSAGE_SIZE);

    let (cause, close_reason): (DisconnectCause, Option<CloseReason>) = loop {
        tokio::select! {
            inbound = stream.next() => match inbound {
                Some(Ok(AggregatedMessage::Text(text))) => {
                    if connection.send(Frame::Text(text.to_string())).await.is_err() {
                        break (DisconnectCause::Closed, None);
                    }
                }
                Some(Ok(AggregatedMessage::Binary(bin))) => {
                    if connection.send(Frame::Binary(bin)).await.is_err() {
                        break (DisconnectCause::Closed, None);
                    }
                }
                Some(Ok(AggregatedMessage::Ping(payload))) => {
                    if socket.pong(&payload).await.is_err() {
                        break (DisconnectCause::Closed, None);
                    }
                }
                Some(Ok(AggregatedMessage::Close(reason))) => break (DisconnectCause::Closed, reason),
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    tracing::warn!(
                        "Signaling socket error in session {}: {}",
                        connection.session_id(),
                        e
                    );
                    break (DisconnectCause::Error, None);
                }
                None => break (DisconnectCause::Closed, None),
            },
            outbound = connection.recv() => match outbound {
                Some(Frame::Text(text)) => {
                    if socket.text(text).await.is_err() {
                        break (DisconnectCause::Closed, None);
                    }
                }
                Some(Frame::Binary(bin)) => {
                    if socket.binary(bin).await.is_err() {
                        break (DisconnectCause::Closed, None);
                    }
                }
                None => break (DisconnectCause::Closed, None),
            },
        }
    };

    tracing::debug!(
        "Signaling socket {} left session {} ({:?})",
        connection.connection_id(),
        connection.session_id(),
        cause
    );
    connection.finish(cause);
    let _ = socket.close(close_reason).await;
}

/// HTTP signaling fallback
///
/// POST /api/v1/signal/{session_id}/{user_id}
///
/// Delivers the request body as one frame to the partner's sockets. Nothing
/// is queued when the partner has no socket attached.
async fn signal_http(
    state: web::Data<AppState>,
    path: web::Path<(Uuid, String)>,
    body: web::Bytes,
) -> HttpResponse {
    let (session_id, user_id) = path.into_inner();

    if let Err(response) = require_participant(&state, session_id, &user_id).await {
        return response;
    }

    let frame = match String::from_utf8(body.to_vec()) {
        Ok(text) => Frame::Text(text),
        Err(_) => Frame::Binary(body),
    };

    let delivered = state.relay.inject(session_id, &user_id, frame).await;
    tracing::debug!("HTTP signal for session {} delivered to {} sockets", session_id, delivered);

    HttpResponse::Ok().json(SignalResponse {
        success: true,
        delivered,
    })
}
