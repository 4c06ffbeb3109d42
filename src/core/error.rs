use thiserror::Error;
use uuid::Uuid;

use crate::services::StoreError;

/// Errors surfaced by matching and session operations
#[derive(Debug, Error)]
pub enum MatchError {
    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("User {user_id} is not a participant of session {session_id}")]
    NotParticipant { session_id: Uuid, user_id: String },

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Storage error: {0}")]
    Store(#[from] StoreError),
}
