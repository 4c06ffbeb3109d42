use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

/// Request to join the matching queue
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct JoinRequest {
    #[validate(length(min = 1))]
    #[serde(alias = "userId")]
    pub user_id: String,
    #[validate(length(min = 1, max = 64))]
    #[serde(alias = "compatibilityKey", alias = "english_level", alias = "englishLevel")]
    pub compatibility_key: String,
}

/// Request to leave the matching queue
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct LeaveRequest {
    #[validate(length(min = 1))]
    #[serde(alias = "userId")]
    pub user_id: String,
}

/// Request to end a session
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct EndSessionRequest {
    #[serde(alias = "sessionId")]
    pub session_id: Uuid,
    #[validate(length(min = 1))]
    #[serde(alias = "userId")]
    pub user_id: String,
    #[serde(default = "default_end_reason")]
    pub reason: String,
}

fn default_end_reason() -> String {
    "call_completed".to_string()
}

/// Request to rate the partner of a session
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct RateSessionRequest {
    #[serde(alias = "sessionId")]
    pub session_id: Uuid,
    #[validate(length(min = 1))]
    #[serde(alias = "userId")]
    pub user_id: String,
    #[validate(length(min = 1))]
    pub rating: String,
}
