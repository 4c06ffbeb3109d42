// Core matching and session lifecycle
pub mod error;
pub mod matcher;
pub mod policy;
pub mod registry;
pub mod sweeper;

pub use error::MatchError;
pub use matcher::{JoinOutcome, Matcher};
pub use policy::{status_for_reason, CallLimits, RewardPolicy};
pub use registry::{ActiveSession, EndOutcome, RateOutcome, SessionRegistry};
pub use sweeper::{ExpirySweeper, SweepReport};
