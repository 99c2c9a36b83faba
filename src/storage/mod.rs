//! In-process stores for sessions and rate windows.
//!
//! Each store owns its map behind a `std::sync::Mutex` held for exactly one
//! operation, never across an `.await`. State lives in this process only, so
//! running more than one instance needs an external keyed store with TTL
//! support in place of these.

pub mod rate_limit;
pub mod session;

pub use rate_limit::RateLimiter;
pub use session::SessionStore;
