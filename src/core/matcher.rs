use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;

use crate::core::MatchError;
use crate::models::{Session, Ticket};
use crate::services::{ClaimOutcome, SessionStore};

/// Result of a join attempt
#[derive(Debug, Clone)]
pub enum JoinOutcome {
    /// The caller was paired with a waiting user
    Matched { session: Session, partner_id: String },
    /// No compatible ticket was available; the caller's ticket is queued
    Waiting { ticket: Ticket },
}

impl JoinOutcome {
    pub fn is_matched(&self) -> bool {
        matches!(self, JoinOutcome::Matched { .. })
    }
}

/// Matching queue orchestrator
///
/// # Join Pipeline
/// 1. Reject callers that already hold an active session
/// 2. Purge tickets older than the TTL
/// 3. Atomically claim the oldest compatible ticket and open a session
/// 4. Otherwise upsert the caller's own ticket (doubles as a heartbeat)
#[derive(Clone)]
pub struct Matcher {
    store: Arc<dyn SessionStore>,
    ticket_ttl: Duration,
}

impl Matcher {
    pub fn new(store: Arc<dyn SessionStore>, ticket_ttl_secs: u64) -> Self {
        let secs = i64::try_from(ticket_ttl_secs).unwrap_or(i64::MAX).min(i64::from(u32::MAX));
        Self {
            store,
            ticket_ttl: Duration::seconds(secs),
        }
    }

    pub fn ticket_ttl(&self) -> Duration {
        self.ticket_ttl
    }

    /// Tickets enqueued strictly before the returned instant are expired
    fn cutoff(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        now - self.ticket_ttl
    }

    /// Join the queue for `compatibility_key`
    pub async fn join(&self, user_id: &str, compatibility_key: &str) -> Result<JoinOutcome, MatchError> {
        self.join_at(user_id, compatibility_key, Utc::now()).await
    }

    /// Join the queue as of `now`
    pub async fn join_at(
        &self,
        user_id: &str,
        compatibility_key: &str,
        now: DateTime<Utc>,
    ) -> Result<JoinOutcome, MatchError> {
        let user_id = user_id.trim();
        let compatibility_key = compatibility_key.trim();
        if user_id.is_empty() || compatibility_key.is_empty() {
            return Err(MatchError::InvalidInput(
                "user_id and compatibility_key are required".to_string(),
            ));
        }

        if self.store.has_active_session(user_id).await? {
            return Err(already_in_session(user_id));
        }

        self.sweep_at(now).await?;

        let cutoff = self.cutoff(now);
        match self
            .store
            .claim_and_pair(user_id, compatibility_key, cutoff, now)
            .await?
        {
            ClaimOutcome::Paired(session) => {
                let partner_id = session.participant_a.clone();
                tracing::info!(
                    "Matched {} with {} (key: {}, session: {})",
                    user_id,
                    partner_id,
                    compatibility_key,
                    session.id
                );
                return Ok(JoinOutcome::Matched { session, partner_id });
            }
            // A concurrent join by the same user paired first
            ClaimOutcome::CallerInSession => return Err(already_in_session(user_id)),
            ClaimOutcome::NoCandidate => {}
        }

        let ticket = self.store.upsert_ticket(user_id, compatibility_key, now).await?;
        tracing::debug!("User {} waiting for a partner (key: {})", user_id, compatibility_key);

        Ok(JoinOutcome::Waiting { ticket })
    }

    /// Leave the queue; succeeds whether or not a ticket existed
    pub async fn leave(&self, user_id: &str) -> Result<bool, MatchError> {
        let user_id = user_id.trim();
        let removed = self.store.remove_ticket(user_id).await?;
        if removed {
            tracing::debug!("User {} left the queue", user_id);
        }
        Ok(removed)
    }

    /// Purge expired tickets
    pub async fn sweep(&self) -> Result<u64, MatchError> {
        self.sweep_at(Utc::now()).await
    }

    pub async fn sweep_at(&self, now: DateTime<Utc>) -> Result<u64, MatchError> {
        let purged = self.store.purge_expired_tickets(self.cutoff(now)).await?;
        if purged > 0 {
            tracing::debug!("Purged {} expired tickets", purged);
        }
        Ok(purged)
    }
}

fn already_in_session(user_id: &str) -> MatchError {
    tracing::info!("Join rejected for {}: already in an active session", user_id);
    MatchError::Conflict(format!("User {} already has an active session", user_id))
}
