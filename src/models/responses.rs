use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use crate::models::domain::{PublicProfile, SessionStatus};

/// Response for the join endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JoinResponse {
    pub success: bool,
    pub matched: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub partner_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub partner: Option<PublicProfile>,
    pub duration_limit_secs: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Generic acknowledgement
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SuccessResponse {
    pub success: bool,
}

/// Session details as seen by one participant
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionView {
    pub id: Uuid,
    pub partner_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub partner: Option<PublicProfile>,
    pub compatibility_key: String,
    pub created_at: DateTime<Utc>,
    pub duration_limit_secs: u64,
}

/// Response for the active session lookup
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActiveSessionResponse {
    pub active_session: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session: Option<SessionView>,
}

/// Response for the end endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EndSessionResponse {
    pub success: bool,
    pub status: SessionStatus,
    pub already_ended: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_secs: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub points_awarded: Option<i32>,
}

/// Response for the rate endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateSessionResponse {
    pub success: bool,
    pub status: SessionStatus,
    pub both_rated: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub points_awarded: Option<i32>,
}

/// Response for the HTTP signaling fallback
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignalResponse {
    pub success: bool,
    pub delivered: usize,
}

/// Health check response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub timestamp: DateTime<Utc>,
}

/// Error response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
    pub status_code: u16,
}
