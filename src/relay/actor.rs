//! `RelayActor` - per-session frame relay.
//!
//! Each actor owns the set of transport channels connected to one session
//! and processes connect, message and disconnect events strictly in mailbox
//! order. Frames are forwarded verbatim to every other connected channel;
//! nothing is buffered for channels that connect later.
//!
//! # Lifecycle
//!
//! 1. Spawned by the `RelayHub` on the first connect for a session
//! 2. Runs while at least one channel is connected
//! 3. Retires once the last channel leaves: the mailbox is closed and any
//!    queued connect attempts are rejected with `RelayError::Retired`, which
//!    tells the hub to spawn a fresh actor

use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, instrument, warn};
use uuid::Uuid;

use super::{DisconnectCause, Frame, RelayError};

/// Commands queued per actor before senders wait
const RELAY_CHANNEL_BUFFER: usize = 256;

/// Outbound frames queued per channel before new frames are dropped
const OUTBOUND_BUFFER: usize = 64;

pub type ConnectionId = u64;

/// Events processed by a `RelayActor`
#[derive(Debug)]
pub(crate) enum RelayCommand {
    Connect {
        user_id: String,
        respond_to: oneshot::Sender<Result<RelayConnection, RelayError>>,
    },
    Message {
        from: ConnectionId,
        frame: Frame,
    },
    Inject {
        from_user: String,
        frame: Frame,
        respond_to: oneshot::Sender<usize>,
    },
    Disconnect {
        connection_id: ConnectionId,
        cause: DisconnectCause,
    },
    ConnectionCount {
        respond_to: oneshot::Sender<usize>,
    },
}

/// Handle to a running `RelayActor`
#[derive(Clone, Debug)]
pub struct RelayHandle {
    sender: mpsc::Sender<RelayCommand>,
    session_id: Uuid,
}

impl RelayHandle {
    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    /// Whether the actor behind this handle has retired
    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }

    /// Register a new channel for `user_id` with the session
    pub async fn connect(&self, user_id: &str) -> Result<RelayConnection, RelayError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(RelayCommand::Connect {
                user_id: user_id.to_string(),
                respond_to: tx,
            })
            .await
            .map_err(|_| RelayError::MailboxClosed)?;

        // A dropped responder means the actor exited with our request queued
        rx.await.map_err(|_| RelayError::Retired)?
    }

    /// Forward a frame from `from` to every other channel
    ///
    /// Waits while the mailbox is full.
    pub async fn send(&self, from: ConnectionId, frame: Frame) -> Result<(), RelayError> {
        self.sender
            .send(RelayCommand::Message { from, frame })
            .await
            .map_err(|_| RelayError::MailboxClosed)
    }

    /// Deliver a frame on behalf of `from_user` to every channel held by
    /// someone else; returns the delivery count
    pub async fn inject(&self, from_user: &str, frame: Frame) -> Result<usize, RelayError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(RelayCommand::Inject {
                from_user: from_user.to_string(),
                frame,
                respond_to: tx,
            })
            .await
            .map_err(|_| RelayError::MailboxClosed)?;

        rx.await.map_err(|_| RelayError::Retired)
    }

    pub fn disconnect(&self, connection_id: ConnectionId, cause: DisconnectCause) {
        let command = RelayCommand::Disconnect { connection_id, cause };
        match self.sender.try_send(command) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(command)) => {
                // Called from Drop, so finish the send on the runtime
                if let Ok(runtime) = tokio::runtime::Handle::try_current() {
                    let sender = self.sender.clone();
                    runtime.spawn(async move {
                        let _ = sender.send(command).await;
                    });
                }
            }
            // Nothing to remove if the actor is already gone
            Err(mpsc::error::TrySendError::Closed(_)) => {}
        }
    }

    pub async fn connection_count(&self) -> Result<usize, RelayError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(RelayCommand::ConnectionCount { respond_to: tx })
            .await
            .map_err(|_| RelayError::MailboxClosed)?;

        rx.await.map_err(|_| RelayError::Retired)
    }
}

/// One transport channel attached to a session's relay
///
/// Dropping the connection removes it from the session.
#[derive(Debug)]
pub struct RelayConnection {
    connection_id: ConnectionId,
    user_id: String,
    connected_at: DateTime<Utc>,
    outbound: mpsc::Receiver<Frame>,
    handle: RelayHandle,
    cause: DisconnectCause,
}

impl RelayConnection {
    pub fn connection_id(&self) -> ConnectionId {
        self.connection_id
    }

    /// The participant this channel belongs to
    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    pub fn session_id(&self) -> Uuid {
        self.handle.session_id
    }

    pub fn connected_at(&self) -> DateTime<Utc> {
        self.connected_at
    }

    /// Send a frame to the other channels of the session
    pub async fn send(&self, frame: Frame) -> Result<(), RelayError> {
        self.handle.send(self.connection_id, frame).await
    }

    /// Next frame relayed from another channel; `None` once the actor is gone
    pub async fn recv(&mut self) -> Option<Frame> {
        self.outbound.recv().await
    }

    /// Detach from the session, recording why the transport went away
    pub fn finish(mut self, cause: DisconnectCause) {
        self.cause = cause;
    }
}

impl Drop for RelayConnection {
    fn drop(&mut self) {
        self.handle.disconnect(self.connection_id, self.cause);
    }
}

struct ConnectionSlot {
    user_id: String,
    outbound: mpsc::Sender<Frame>,
    connected_at: DateTime<Utc>,
}

/// The `RelayActor` implementation.
pub struct RelayActor {
    session_id: Uuid,
    receiver: mpsc::Receiver<RelayCommand>,
    handle: RelayHandle,
    connections: BTreeMap<ConnectionId, ConnectionSlot>,
    next_connection_id: ConnectionId,
}

impl RelayActor {
    /// Spawn a relay actor for a session.
    ///
    /// Returns a handle and the task join handle.
    pub fn spawn(session_id: Uuid) -> (RelayHandle, JoinHandle<()>) {
        let (sender, receiver) = mpsc::channel(RELAY_CHANNEL_BUFFER);
        let handle = RelayHandle { sender, session_id };

        let actor = Self {
            session_id,
            receiver,
            handle: handle.clone(),
            connections: BTreeMap::new(),
            next_connection_id: 1,
        };

        let task = tokio::spawn(actor.run());

        (handle, task)
    }

    #[instrument(skip_all, name = "relay.actor", fields(session_id = %self.session_id))]
    async fn run(mut self) {
        debug!("RelayActor started");

        while let Some(command) = self.receiver.recv().await {
            self.handle_command(command);

            if self.connections.is_empty() {
                self.retire();
                break;
            }
        }

        debug!("RelayActor stopped");
    }

    fn handle_command(&mut self, command: RelayCommand) {
        match command {
            RelayCommand::Connect { user_id, respond_to } => {
                let connection = self.add_connection(user_id);
                let connection_id = connection.connection_id;
                if respond_to.send(Ok(connection)).is_err() {
                    // Caller went away; its connection is dropped with the
                    // failed response and will queue its own disconnect
                    debug!(connection_id, "Connect requester gone");
                }
            }
            RelayCommand::Message { from, frame } => {
                if self.connections.contains_key(&from) {
                    self.forward(|id, _| id != from, frame);
                } else {
                    debug!(connection_id = from, "Ignoring frame from detached channel");
                }
            }
            RelayCommand::Inject {
                from_user,
                frame,
                respond_to,
            } => {
                let delivered = self.forward(|_, slot| slot.user_id != from_user, frame);
                let _ = respond_to.send(delivered);
            }
            RelayCommand::Disconnect { connection_id, cause } => {
                if let Some(slot) = self.connections.remove(&connection_id) {
                    debug!(
                        connection_id,
                        user_id = %slot.user_id,
                        ?cause,
                        remaining = self.connections.len(),
                        "Channel disconnected"
                    );
                }
            }
            RelayCommand::ConnectionCount { respond_to } => {
                let _ = respond_to.send(self.connections.len());
            }
        }
    }

    fn add_connection(&mut self, user_id: String) -> RelayConnection {
        let connection_id = self.next_connection_id;
        self.next_connection_id += 1;

        let (outbound_tx, outbound_rx) = mpsc::channel(OUTBOUND_BUFFER);
        let connected_at = Utc::now();
        self.connections.insert(
            connection_id,
            ConnectionSlot {
                user_id: user_id.clone(),
                outbound: outbound_tx,
                connected_at,
            },
        );

        debug!(
            connection_id,
            user_id = %user_id,
            connected = self.connections.len(),
            "Channel connected"
        );

        RelayConnection {
            connection_id,
            user_id,
            connected_at,
            outbound: outbound_rx,
            handle: self.handle.clone(),
            cause: DisconnectCause::Closed,
        }
    }

    /// Fan a frame out to every channel accepted by `recipient`; returns how
    /// many channels took it
    fn forward<F>(&mut self, recipient: F, frame: Frame) -> usize
    where
        F: Fn(ConnectionId, &ConnectionSlot) -> bool,
    {
        let mut delivered = 0;
        let mut dead = Vec::new();

        for (&id, slot) in &self.connections {
            if !recipient(id, slot) {
                continue;
            }
            match slot.outbound.try_send(frame.clone()) {
                Ok(()) => delivered += 1,
                Err(mpsc::error::TrySendError::Full(_)) => {
                    warn!(connection_id = id, "Outbound buffer full, dropping frame");
                }
                Err(mpsc::error::TrySendError::Closed(_)) => dead.push(id),
            }
        }

        for id in dead {
            if let Some(slot) = self.connections.remove(&id) {
                debug!(
                    connection_id = id,
                    since = %slot.connected_at,
                    "Removed channel with closed outbound queue"
                );
            }
        }

        if delivered == 0 {
            debug!(len = frame.len(), "No partner connected, frame dropped");
        }

        delivered
    }

    /// Stop accepting work and turn away anything still queued
    fn retire(&mut self) {
        self.receiver.close();

        while let Ok(command) = self.receiver.try_recv() {
            match command {
                RelayCommand::Connect { respond_to, .. } => {
                    let _ = respond_to.send(Err(RelayError::Retired));
                }
                RelayCommand::Inject { respond_to, .. } => {
                    let _ = respond_to.send(0);
                }
                RelayCommand::ConnectionCount { respond_to } => {
                    let _ = respond_to.send(0);
                }
                RelayCommand::Message { .. } | RelayCommand::Disconnect { .. } => {}
            }
        }

        debug!("RelayActor retired");
    }
}
