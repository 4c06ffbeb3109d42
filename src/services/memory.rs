use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::core::policy::RewardPolicy;
use crate::models::{Rating, RewardEvent, Session, SessionStatus, Side, Ticket};
use crate::services::store::{ClaimOutcome, RatingUpdate, SessionClose, SessionStore, StoreError};

#[derive(Default)]
struct MemoryState {
    tickets: HashMap<String, Ticket>,
    sessions: HashMap<Uuid, Session>,
    rewards: Vec<RewardEvent>,
    next_seq: i64,
}

impl MemoryState {
    fn has_active_session(&self, user_id: &str) -> bool {
        self.sessions
            .values()
            .any(|s| s.status == SessionStatus::Active && s.side_of(user_id).is_some())
    }

    /// Users taking part in any active session
    fn busy_users(&self) -> HashSet<&str> {
        self.sessions
            .values()
            .filter(|s| s.status == SessionStatus::Active)
            .flat_map(|s| [s.participant_a.as_str(), s.participant_b.as_str()])
            .collect()
    }
}

/// In-process session store
///
/// Every operation runs under a single lock, which makes each of them atomic
/// within this process. It does not coordinate across processes, so it is
/// only suitable for tests and single-instance deployments.
#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every reward event written so far, in write order
    pub async fn reward_events(&self) -> Vec<RewardEvent> {
        self.state.lock().await.rewards.clone()
    }

    pub async fn ticket_count(&self) -> usize {
        self.state.lock().await.tickets.len()
    }
}

#[async_trait]
impl SessionStore for MemoryStore {
    async fn purge_expired_tickets(&self, cutoff: DateTime<Utc>) -> Result<u64, StoreError> {
        let mut state = self.state.lock().await;
        let before = state.tickets.len();
        state.tickets.retain(|_, ticket| ticket.enqueued_at >= cutoff);
        Ok((before - state.tickets.len()) as u64)
    }

    async fn has_active_session(&self, user_id: &str) -> Result<bool, StoreError> {
        Ok(self.state.lock().await.has_active_session(user_id))
    }

    async fn claim_and_pair(
        &self,
        caller: &str,
        compatibility_key: &str,
        cutoff: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<ClaimOutcome, StoreError> {
        let mut state = self.state.lock().await;

        let busy = state.busy_users();
        if busy.contains(caller) {
            return Ok(ClaimOutcome::CallerInSession);
        }

        let candidate = state
            .tickets
            .values()
            .filter(|t| {
                t.compatibility_key == compatibility_key
                    && t.user_id != caller
                    && t.enqueued_at >= cutoff
                    && !busy.contains(t.user_id.as_str())
            })
            .min_by_key(|t| (t.enqueued_at, t.seq))
            .map(|t| t.user_id.clone());
        drop(busy);

        let Some(waiting) = candidate else {
            return Ok(ClaimOutcome::NoCandidate);
        };

        state.tickets.remove(&waiting);
        state.tickets.remove(caller);

        let session = Session::pair(&waiting, caller, compatibility_key, now);
        state.sessions.insert(session.id, session.clone());

        Ok(ClaimOutcome::Paired(session))
    }

    async fn upsert_ticket(
        &self,
        user_id: &str,
        compatibility_key: &str,
        now: DateTime<Utc>,
    ) -> Result<Ticket, StoreError> {
        let mut state = self.state.lock().await;
        state.next_seq += 1;

        let ticket = Ticket {
            user_id: user_id.to_string(),
            compatibility_key: compatibility_key.to_string(),
            enqueued_at: now,
            seq: state.next_seq,
        };
        state.tickets.insert(user_id.to_string(), ticket.clone());

        Ok(ticket)
    }

    async fn remove_ticket(&self, user_id: &str) -> Result<bool, StoreError> {
        Ok(self.state.lock().await.tickets.remove(user_id).is_some())
    }

    async fn get_ticket(&self, user_id: &str) -> Result<Option<Ticket>, StoreError> {
        Ok(self.state.lock().await.tickets.get(user_id).cloned())
    }

    async fn active_session_for(&self, user_id: &str) -> Result<Option<Session>, StoreError> {
        let state = self.state.lock().await;
        Ok(state
            .sessions
            .values()
            .filter(|s| s.status == SessionStatus::Active && s.side_of(user_id).is_some())
            .max_by_key(|s| s.created_at)
            .cloned())
    }

    async fn get_session(&self, session_id: Uuid) -> Result<Option<Session>, StoreError> {
        Ok(self.state.lock().await.sessions.get(&session_id).cloned())
    }

    async fn finish_session(
        &self,
        session_id: Uuid,
        close: &SessionClose,
        rewards: &[RewardEvent],
    ) -> Result<bool, StoreError> {
        let mut state = self.state.lock().await;

        let Some(session) = state.sessions.get_mut(&session_id) else {
            return Ok(false);
        };
        if session.status != SessionStatus::Active {
            return Ok(false);
        }

        session.status = close.status;
        session.ended_at = Some(close.ended_at);
        session.end_reason = Some(close.reason.clone());
        session.duration_secs = Some(close.duration_secs);
        state.rewards.extend_from_slice(rewards);

        Ok(true)
    }

    async fn record_rating(
        &self,
        session_id: Uuid,
        side: Side,
        rating: Rating,
        policy: &RewardPolicy,
        now: DateTime<Utc>,
    ) -> Result<Option<RatingUpdate>, StoreError> {
        let mut state = self.state.lock().await;

        let Some(session) = state.sessions.get_mut(&session_id) else {
            return Ok(None);
        };

        let slot = match side {
            Side::A => &mut session.rating_a,
            Side::B => &mut session.rating_b,
        };
        if slot.is_some() {
            return Ok(Some(RatingUpdate {
                session: session.clone(),
                recorded: false,
                rewards: Vec::new(),
            }));
        }
        *slot = Some(rating);

        let session = session.clone();
        let rewards = policy.rating_rewards(&session, now);
        state.rewards.extend_from_slice(&rewards);

        Ok(Some(RatingUpdate {
            session,
            recorded: true,
            rewards,
        }))
    }

    async fn rewards_for_session(&self, session_id: Uuid) -> Result<Vec<RewardEvent>, StoreError> {
        let state = self.state.lock().await;
        Ok(state
            .rewards
            .iter()
            .filter(|r| r.session_id == session_id)
            .cloned()
            .collect())
    }

    async fn health_check(&self) -> Result<bool, StoreError> {
        Ok(true)
    }
}
