//! Anti-forgery tokens, random identifiers and the request gate.

pub mod csrf;
pub mod middleware;
pub mod session;

pub use csrf::{IssuedToken, TokenAuthority, TokenPolicy};
pub use middleware::{request_gate, AppState, ClientAddress};
pub use session::{generate_session_id, generate_token_nonce};
