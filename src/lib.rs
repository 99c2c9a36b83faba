//! Control plane for short-lived remote browser sessions.
//!
//! Browsers talk to this service; it provisions VMs from an external provider
//! and guards every API call with rate limiting and anti-forgery tokens.
//!
//! All state (sessions, tokens, rate windows) lives in process memory. Running
//! more than one instance behind a load balancer splits that state, so a
//! horizontally scaled deployment needs an external keyed store with TTLs.

pub mod auth;
pub mod cleanup;
pub mod clock;
pub mod config;
pub mod cookies;
pub mod error;
pub mod middleware;
pub mod models;
pub mod routes;
pub mod storage;
pub mod vm;
