// Service exports
pub mod cache;
pub mod memory;
pub mod postgres;
pub mod profiles;
pub mod store;

pub use cache::ProfileDirectory;
pub use memory::MemoryStore;
pub use postgres::{DbSessionStatus, PostgresStore};
pub use profiles::{ProfileClient, ProfileError};
pub use store::{ClaimOutcome, RatingUpdate, SessionClose, SessionStore, StoreError};
