//! Per-session signaling relay.
//!
//! The relay is a transparent transport: frames are opaque and forwarded
//! verbatim between the channels attached to the same session.

pub mod actor;
pub mod hub;

pub use actor::{ConnectionId, RelayActor, RelayConnection, RelayHandle};
pub use hub::RelayHub;

use bytes::Bytes;
use thiserror::Error;

/// An opaque frame carried through the relay
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Text(String),
    Binary(Bytes),
}

impl Frame {
    pub fn len(&self) -> usize {
        match self {
            Frame::Text(text) => text.len(),
            Frame::Binary(bytes) => bytes.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Why a channel left the session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectCause {
    Closed,
    Error,
}

/// Errors returned by relay handles
#[derive(Debug, Error)]
pub enum RelayError {
    #[error("relay mailbox closed")]
    MailboxClosed,

    #[error("relay actor retired")]
    Retired,
}
