use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// A user's standing request to be paired with a partner
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ticket {
    pub user_id: String,
    pub compatibility_key: String,
    pub enqueued_at: DateTime<Utc>,
    /// Insertion counter, breaks `enqueued_at` ties in FIFO order
    pub seq: i64,
}

/// Lifecycle state of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Active,
    Completed,
    Cancelled,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Active => "active",
            SessionStatus::Completed => "completed",
            SessionStatus::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, SessionStatus::Active)
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Peer rating submitted after a call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Rating {
    Good,
    Neutral,
    Bad,
}

impl Rating {
    pub fn as_str(&self) -> &'static str {
        match self {
            Rating::Good => "good",
            Rating::Neutral => "neutral",
            Rating::Bad => "bad",
        }
    }
}

impl FromStr for Rating {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "good" => Ok(Rating::Good),
            "neutral" => Ok(Rating::Neutral),
            "bad" => Ok(Rating::Bad),
            other => Err(format!("unknown rating '{}', expected good, neutral or bad", other)),
        }
    }
}

/// Which participant slot of a session a user occupies
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    A,
    B,
}

/// A paired interaction between two users
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub id: Uuid,
    /// The user who was waiting in the queue
    pub participant_a: String,
    /// The user whose join completed the pair
    pub participant_b: String,
    pub compatibility_key: String,
    pub status: SessionStatus,
    pub created_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub end_reason: Option<String>,
    pub duration_secs: Option<i64>,
    pub rating_a: Option<Rating>,
    pub rating_b: Option<Rating>,
}

impl Session {
    /// Build a fresh active session pairing a waiting ticket holder with the caller
    pub fn pair(waiting: &str, caller: &str, compatibility_key: &str, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            participant_a: waiting.to_string(),
            participant_b: caller.to_string(),
            compatibility_key: compatibility_key.to_string(),
            status: SessionStatus::Active,
            created_at: now,
            ended_at: None,
            end_reason: None,
            duration_secs: None,
            rating_a: None,
            rating_b: None,
        }
    }

    pub fn side_of(&self, user_id: &str) -> Option<Side> {
        if self.participant_a == user_id {
            Some(Side::A)
        } else if self.participant_b == user_id {
            Some(Side::B)
        } else {
            None
        }
    }

    pub fn partner_of(&self, user_id: &str) -> Option<&str> {
        match self.side_of(user_id)? {
            Side::A => Some(&self.participant_b),
            Side::B => Some(&self.participant_a),
        }
    }

    pub fn rating_of(&self, side: Side) -> Option<Rating> {
        match side {
            Side::A => self.rating_a,
            Side::B => self.rating_b,
        }
    }

    pub fn both_rated(&self) -> bool {
        self.rating_a.is_some() && self.rating_b.is_some()
    }
}

/// Kind of activity a reward is granted for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityType {
    VideoCall,
    PeerRating,
}

impl ActivityType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActivityType::VideoCall => "video_call",
            ActivityType::PeerRating => "peer_rating",
        }
    }
}

/// Reward trigger handed to the external points ledger
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RewardEvent {
    pub id: Uuid,
    pub user_id: String,
    pub points: i32,
    pub activity_type: ActivityType,
    pub session_id: Uuid,
    /// Length of the call in seconds, on `video_call` rewards
    pub duration_secs: Option<i64>,
    pub created_at: DateTime<Utc>,
}

impl RewardEvent {
    pub fn new(
        user_id: &str,
        points: i32,
        activity_type: ActivityType,
        session_id: Uuid,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id: user_id.to_string(),
            points,
            activity_type,
            session_id,
            duration_secs: None,
            created_at,
        }
    }

    pub fn with_duration(mut self, duration_secs: i64) -> Self {
        self.duration_secs = Some(duration_secs);
        self
    }
}

/// Public profile fields of a partner, served by the profile directory
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PublicProfile {
    #[serde(alias = "id")]
    pub user_id: String,
    pub username: String,
    #[serde(default)]
    pub english_level: Option<String>,
}
