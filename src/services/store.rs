use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;
use uuid::Uuid;

use crate::core::policy::RewardPolicy;
use crate::models::{Rating, RewardEvent, Session, SessionStatus, Side, Ticket};

/// Errors raised by a session store backend
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("SQLx error: {0}")]
    SqlxError(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    MigrateError(#[from] sqlx::migrate::MigrateError),

    #[error("Invalid stored data: {0}")]
    InvalidData(String),
}

/// Terminal state written by `SessionStore::finish_session`
#[derive(Debug, Clone)]
pub struct SessionClose {
    pub status: SessionStatus,
    pub reason: String,
    pub ended_at: DateTime<Utc>,
    pub duration_secs: i64,
}

/// Outcome of `SessionStore::record_rating`
#[derive(Debug, Clone)]
pub struct RatingUpdate {
    /// Session state after the call
    pub session: Session,
    /// Whether the caller's rating was written by this call
    pub recorded: bool,
    /// Reward events written by this call; non-empty only for the call that
    /// filled the last missing rating
    pub rewards: Vec<RewardEvent>,
}

/// Outcome of `SessionStore::claim_and_pair`
#[derive(Debug, Clone)]
pub enum ClaimOutcome {
    /// A waiting ticket was claimed and the new session opened
    Paired(Session),
    /// No ticket could be claimed; nothing was changed
    NoCandidate,
    /// The caller already holds an active session; nothing was changed
    CallerInSession,
}

/// Durable storage for tickets, sessions and the reward outbox.
///
/// Implementations must make `claim_and_pair`, `upsert_ticket`,
/// `finish_session` and `record_rating` atomic with respect to concurrent
/// callers, including callers in other processes sharing the same backend.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Delete every ticket enqueued strictly before `cutoff`
    async fn purge_expired_tickets(&self, cutoff: DateTime<Utc>) -> Result<u64, StoreError>;

    async fn has_active_session(&self, user_id: &str) -> Result<bool, StoreError>;

    /// Claim the oldest ticket with `compatibility_key` enqueued at or after
    /// `cutoff` and not owned by `caller`, then, in the same atomic unit,
    /// drop the caller's own ticket and insert the new active session.
    ///
    /// Neither participant may hold another active session when the session
    /// is inserted; the caller is checked inside the same atomic unit.
    async fn claim_and_pair(
        &self,
        caller: &str,
        compatibility_key: &str,
        cutoff: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<ClaimOutcome, StoreError>;

    /// Insert or refresh the caller's ticket with `enqueued_at = now`
    async fn upsert_ticket(
        &self,
        user_id: &str,
        compatibility_key: &str,
        now: DateTime<Utc>,
    ) -> Result<Ticket, StoreError>;

    /// Remove the caller's ticket; returns whether one existed
    async fn remove_ticket(&self, user_id: &str) -> Result<bool, StoreError>;

    async fn get_ticket(&self, user_id: &str) -> Result<Option<Ticket>, StoreError>;

    /// Most recent active session the user participates in
    async fn active_session_for(&self, user_id: &str) -> Result<Option<Session>, StoreError>;

    async fn get_session(&self, session_id: Uuid) -> Result<Option<Session>, StoreError>;

    /// Move an active session to a terminal state and write `rewards` in the
    /// same transaction. Returns `false` (and writes nothing) if the session
    /// was no longer active.
    async fn finish_session(
        &self,
        session_id: Uuid,
        close: &SessionClose,
        rewards: &[RewardEvent],
    ) -> Result<bool, StoreError>;

    /// Write the caller's rating if their side is still empty. When this
    /// fills the last empty side, the mutual rating rewards from `policy`
    /// are written in the same transaction.
    ///
    /// Returns `None` if the session does not exist.
    async fn record_rating(
        &self,
        session_id: Uuid,
        side: Side,
        rating: Rating,
        policy: &RewardPolicy,
        now: DateTime<Utc>,
    ) -> Result<Option<RatingUpdate>, StoreError>;

    /// Reward events written for a session, oldest first
    async fn rewards_for_session(&self, session_id: Uuid) -> Result<Vec<RewardEvent>, StoreError>;

    async fn health_check(&self) -> Result<bool, StoreError>;
}
