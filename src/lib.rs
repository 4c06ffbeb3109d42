//! Lume Session - partner matching and call signaling for Lume practice calls
//!
//! This library provides the matching queue that pairs waiting users by
//! compatibility key, the session registry that owns termination and mutual
//! rating, and the per-session relay that carries signaling frames between
//! the two participants.

pub mod config;
pub mod core;
pub mod models;
pub mod relay;
pub mod routes;
pub mod services;

// Re-export commonly used types
pub use core::{JoinOutcome, MatchError, Matcher, SessionRegistry};
pub use models::{Rating, Session, SessionStatus, Ticket};
pub use relay::{Frame, RelayHub};
pub use services::{MemoryStore, PostgresStore, SessionStore};
