use chrono::{DateTime, Utc};
use std::collections::HashMap;

use crate::config::{CallSettings, RatingPointsConfig, RewardSettings};
use crate::models::{ActivityType, Rating, RewardEvent, Session, SessionStatus};

/// End reasons that count as a successful call
const COMPLETION_REASONS: &[&str] = &["call_completed", "completed", "time_limit_reached"];

/// Map a caller-supplied end reason onto a terminal status
pub fn status_for_reason(reason: &str) -> SessionStatus {
    let reason = reason.trim().to_lowercase();
    if COMPLETION_REASONS.contains(&reason.as_str()) {
        SessionStatus::Completed
    } else {
        SessionStatus::Cancelled
    }
}

/// Points granted for completed calls and peer ratings
#[derive(Debug, Clone)]
pub struct RewardPolicy {
    default_base_points: i32,
    base_points: HashMap<String, i32>,
    rating_points: RatingPointsConfig,
}

impl RewardPolicy {
    pub fn new(
        default_base_points: i32,
        base_points: HashMap<String, i32>,
        rating_points: RatingPointsConfig,
    ) -> Self {
        Self {
            default_base_points,
            base_points,
            rating_points,
        }
    }

    /// Points each participant earns for completing a call in this tier
    pub fn completion_points(&self, compatibility_key: &str) -> i32 {
        self.base_points
            .get(compatibility_key)
            .copied()
            .unwrap_or(self.default_base_points)
    }

    pub fn rating_points(&self, rating: Rating) -> i32 {
        match rating {
            Rating::Good => self.rating_points.good,
            Rating::Neutral => self.rating_points.neutral,
            Rating::Bad => self.rating_points.bad,
        }
    }

    /// One `video_call` reward per participant, carrying the call length
    pub fn completion_rewards(
        &self,
        session: &Session,
        duration_secs: i64,
        now: DateTime<Utc>,
    ) -> Vec<RewardEvent> {
        let points = self.completion_points(&session.compatibility_key);
        [&session.participant_a, &session.participant_b]
            .into_iter()
            .map(|user| {
                RewardEvent::new(user, points, ActivityType::VideoCall, session.id, now)
                    .with_duration(duration_secs)
            })
            .collect()
    }

    /// One `peer_rating` reward per participant, each valued by the rating
    /// the *other* participant submitted. Empty until both sides have rated.
    pub fn rating_rewards(&self, session: &Session, now: DateTime<Utc>) -> Vec<RewardEvent> {
        let (Some(rating_a), Some(rating_b)) = (session.rating_a, session.rating_b) else {
            return Vec::new();
        };

        vec![
            RewardEvent::new(
                &session.participant_a,
                self.rating_points(rating_b),
                ActivityType::PeerRating,
                session.id,
                now,
            ),
            RewardEvent::new(
                &session.participant_b,
                self.rating_points(rating_a),
                ActivityType::PeerRating,
                session.id,
                now,
            ),
        ]
    }
}

impl Default for RewardPolicy {
    fn default() -> Self {
        Self::from(&RewardSettings::default())
    }
}

impl From<&RewardSettings> for RewardPolicy {
    fn from(settings: &RewardSettings) -> Self {
        Self::new(
            settings.default_base_points,
            settings.base_points.clone(),
            settings.rating_points.clone(),
        )
    }
}

/// Maximum call length per compatibility tier
#[derive(Debug, Clone)]
pub struct CallLimits {
    default_secs: u64,
    per_key: HashMap<String, u64>,
}

impl CallLimits {
    pub fn new(default_secs: u64, per_key: HashMap<String, u64>) -> Self {
        Self { default_secs, per_key }
    }

    pub fn duration_limit_secs(&self, compatibility_key: &str) -> u64 {
        self.per_key
            .get(compatibility_key)
            .copied()
            .unwrap_or(self.default_secs)
    }
}

impl Default for CallLimits {
    fn default() -> Self {
        Self::from(&CallSettings::default())
    }
}

impl From<&CallSettings> for CallLimits {
    fn from(settings: &CallSettings) -> Self {
        Self::new(settings.default_duration_limit_secs, settings.duration_limits.clone())
    }
}
