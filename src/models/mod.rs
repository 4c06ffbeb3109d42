// Model exports
pub mod domain;
pub mod requests;
pub mod responses;

pub use domain::{ActivityType, PublicProfile, Rating, RewardEvent, Session, SessionStatus, Side, Ticket};
pub use requests::{EndSessionRequest, JoinRequest, LeaveRequest, RateSessionRequest};
pub use responses::{
    ActiveSessionResponse, EndSessionResponse, ErrorResponse, HealthResponse, JoinResponse,
    RateSessionResponse, SessionView, SignalResponse, SuccessResponse,
};
