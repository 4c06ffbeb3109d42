use chrono::{DateTime, Utc};
use std::sync::Arc;
use uuid::Uuid;

use crate::core::policy::{status_for_reason, CallLimits, RewardPolicy};
use crate::core::MatchError;
use crate::models::{PublicProfile, Rating, RewardEvent, Session, SessionStatus, Side};
use crate::services::{ProfileDirectory, SessionClose, SessionStore};

/// A user's active session as seen from their side
#[derive(Debug, Clone)]
pub struct ActiveSession {
    pub session: Session,
    pub partner_id: String,
    pub partner: Option<PublicProfile>,
    pub duration_limit_secs: u64,
}

/// Result of ending a session
#[derive(Debug, Clone)]
pub struct EndOutcome {
    pub status: SessionStatus,
    /// The session was already terminal; nothing was changed
    pub already_ended: bool,
    pub duration_secs: Option<i64>,
    /// Points each participant earned, for a completion performed by this call
    pub points_awarded: Option<i32>,
    pub rewards: Vec<RewardEvent>,
}

/// Result of rating a session
#[derive(Debug, Clone)]
pub struct RateOutcome {
    pub status: SessionStatus,
    pub both_rated: bool,
    /// The caller's award, when this call completed the mutual rating
    pub points_awarded: Option<i32>,
    pub rewards: Vec<RewardEvent>,
}

/// Session lifecycle: lookup, termination and mutual rating
///
/// Sessions are created by the `Matcher`. The registry owns every later
/// transition and is the only producer of reward events.
#[derive(Clone)]
pub struct SessionRegistry {
    store: Arc<dyn SessionStore>,
    rewards: RewardPolicy,
    limits: CallLimits,
    profiles: Option<Arc<ProfileDirectory>>,
}

impl SessionRegistry {
    pub fn new(
        store: Arc<dyn SessionStore>,
        rewards: RewardPolicy,
        limits: CallLimits,
        profiles: Option<Arc<ProfileDirectory>>,
    ) -> Self {
        Self {
            store,
            rewards,
            limits,
            profiles,
        }
    }

    pub fn duration_limit_secs(&self, compatibility_key: &str) -> u64 {
        self.limits.duration_limit_secs(compatibility_key)
    }

    pub async fn session(&self, session_id: Uuid) -> Result<Option<Session>, MatchError> {
        Ok(self.store.get_session(session_id).await?)
    }

    /// Public profile of a user, best effort
    ///
    /// Directory failures are logged and reported as a missing profile so
    /// that session discovery never fails on account lookups.
    pub async fn partner_profile(&self, user_id: &str) -> Option<PublicProfile> {
        let profiles = self.profiles.as_ref()?;
        match profiles.lookup(user_id).await {
            Ok(profile) => profile,
            Err(e) => {
                tracing::warn!("Failed to fetch profile for {}: {}", user_id, e);
                None
            }
        }
    }

    /// The user's active session, enriched with the partner's public profile
    pub async fn active_session(&self, user_id: &str) -> Result<Option<ActiveSession>, MatchError> {
        let Some(session) = self.store.active_session_for(user_id).await? else {
            return Ok(None);
        };

        let partner_id = session
            .partner_of(user_id)
            .map(str::to_string)
            .ok_or_else(|| MatchError::NotParticipant {
                session_id: session.id,
                user_id: user_id.to_string(),
            })?;
        let partner = self.partner_profile(&partner_id).await;
        let duration_limit_secs = self.duration_limit_secs(&session.compatibility_key);

        Ok(Some(ActiveSession {
            session,
            partner_id,
            partner,
            duration_limit_secs,
        }))
    }

    /// Load a session together with the side `user_id` plays in it
    async fn participant_session(
        &self,
        session_id: Uuid,
        user_id: &str,
    ) -> Result<(Session, Side), MatchError> {
        let session = self
            .store
            .get_session(session_id)
            .await?
            .ok_or_else(|| MatchError::NotFound(format!("Session {} not found", session_id)))?;

        let side = session.side_of(user_id).ok_or_else(|| MatchError::NotParticipant {
            session_id,
            user_id: user_id.to_string(),
        })?;

        Ok((session, side))
    }

    pub async fn end(&self, session_id: Uuid, user_id: &str, reason: &str) -> Result<EndOutcome, MatchError> {
        self.end_at(session_id, user_id, reason, Utc::now()).await
    }

    /// End a session as of `now`
    ///
    /// Ending a terminal session is a successful no-op.
    pub async fn end_at(
        &self,
        session_id: Uuid,
        user_id: &str,
        reason: &str,
        now: DateTime<Utc>,
    ) -> Result<EndOutcome, MatchError> {
        let (session, _) = self.participant_session(session_id, user_id).await?;

        if session.status.is_terminal() {
            return Ok(already_ended(&session));
        }

        let status = status_for_reason(reason);
        let duration_secs = (now - session.created_at).num_seconds().max(0);
        let rewards = match status {
            SessionStatus::Completed => self.rewards.completion_rewards(&session, duration_secs, now),
            _ => Vec::new(),
        };
        let close = SessionClose {
            status,
            reason: reason.to_string(),
            ended_at: now,
            duration_secs,
        };

        if !self.store.finish_session(session_id, &close, &rewards).await? {
            // Another End won the race
            let (current, _) = self.participant_session(session_id, user_id).await?;
            return Ok(already_ended(&current));
        }

        let points_awarded = rewards.first().map(|r| r.points);
        tracing::info!(
            "Session {} {} by {} after {}s (reason: {}, rewards: {})",
            session_id,
            status,
            user_id,
            duration_secs,
            reason,
            rewards.len()
        );

        Ok(EndOutcome {
            status,
            already_ended: false,
            duration_secs: Some(duration_secs),
            points_awarded,
            rewards,
        })
    }

    pub async fn rate(&self, session_id: Uuid, user_id: &str, rating: &str) -> Result<RateOutcome, MatchError> {
        self.rate_at(session_id, user_id, rating, Utc::now()).await
    }

    /// Record the caller's rating of their partner as of `now`
    pub async fn rate_at(
        &self,
        session_id: Uuid,
        user_id: &str,
        rating: &str,
        now: DateTime<Utc>,
    ) -> Result<RateOutcome, MatchError> {
        let rating: Rating = rating.parse().map_err(MatchError::InvalidInput)?;
        let (_, side) = self.participant_session(session_id, user_id).await?;

        let update = self
            .store
            .record_rating(session_id, side, rating, &self.rewards, now)
            .await?
            .ok_or_else(|| MatchError::NotFound(format!("Session {} not found", session_id)))?;

        if !update.recorded {
            tracing::debug!("Rating for session {} by {} already recorded", session_id, user_id);
        } else if !update.rewards.is_empty() {
            tracing::info!(
                "Session {} rated by both participants, {} rewards emitted",
                session_id,
                update.rewards.len()
            );
        }

        let points_awarded = update
            .rewards
            .iter()
            .find(|r| r.user_id == user_id)
            .map(|r| r.points);

        Ok(RateOutcome {
            status: update.session.status,
            both_rated: update.session.both_rated(),
            points_awarded,
            rewards: update.rewards,
        })
    }
}

fn already_ended(session: &Session) -> EndOutcome {
    EndOutcome {
        status: session.status,
        already_ended: true,
        duration_secs: session.duration_secs,
        points_awarded: None,
        rewards: Vec::new(),
    }
}
