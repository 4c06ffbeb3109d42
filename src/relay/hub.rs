use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use uuid::Uuid;

use super::actor::{RelayActor, RelayConnection, RelayHandle};
use super::{Frame, RelayError};

/// Attempts to reach a live actor before giving up on a connect
const CONNECT_ATTEMPTS: usize = 3;

/// Directory of relay actors keyed by session id
///
/// The hub stores only mailbox handles. Connection state lives inside each
/// session's actor, and an actor's lifetime ends with its last channel.
#[derive(Clone, Default)]
pub struct RelayHub {
    actors: Arc<Mutex<HashMap<Uuid, RelayHandle>>>,
}

impl RelayHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a new channel for `user_id` to a session, starting its actor
    /// if needed
    pub async fn connect(
        &self,
        session_id: Uuid,
        user_id: &str,
    ) -> Result<RelayConnection, RelayError> {
        let mut last_error = RelayError::Retired;

        for _ in 0..CONNECT_ATTEMPTS {
            let handle = self.live_handle(session_id).await;
            match handle.connect(user_id).await {
                Ok(connection) => return Ok(connection),
                Err(e) => {
                    // Actor retired between lookup and connect
                    tracing::debug!("Relay for session {} unavailable: {}", session_id, e);
                    last_error = e;
                }
            }
        }

        Err(last_error)
    }

    /// Deliver a frame from `from_user` to the other participant's channels;
    /// 0 if none is connected
    pub async fn inject(&self, session_id: Uuid, from_user: &str, frame: Frame) -> usize {
        let Some(handle) = self.existing_handle(session_id).await else {
            return 0;
        };

        handle.inject(from_user, frame).await.unwrap_or(0)
    }

    /// Number of channels connected to a session
    pub async fn connection_count(&self, session_id: Uuid) -> usize {
        let Some(handle) = self.existing_handle(session_id).await else {
            return 0;
        };

        handle.connection_count().await.unwrap_or(0)
    }

    /// Drop handles of retired actors; returns how many were removed
    pub async fn prune(&self) -> usize {
        let mut actors = self.actors.lock().await;
        let before = actors.len();
        actors.retain(|_, handle| !handle.is_closed());
        before - actors.len()
    }

    /// Number of sessions with a live relay actor
    pub async fn active_relays(&self) -> usize {
        let actors = self.actors.lock().await;
        actors.values().filter(|handle| !handle.is_closed()).count()
    }

    async fn existing_handle(&self, session_id: Uuid) -> Option<RelayHandle> {
        let actors = self.actors.lock().await;
        actors
            .get(&session_id)
            .filter(|handle| !handle.is_closed())
            .cloned()
    }

    async fn live_handle(&self, session_id: Uuid) -> RelayHandle {
        let mut actors = self.actors.lock().await;

        if let Some(handle) = actors.get(&session_id) {
            if !handle.is_closed() {
                return handle.clone();
            }
        }

        let (handle, _task) = RelayActor::spawn(session_id);
        actors.insert(session_id, handle.clone());
        tracing::debug!("Started relay for session {}", session_id);
        handle
    }
}
