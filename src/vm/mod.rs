//! External VM provider boundary.
//!
//! The provider is consumed as a black box: create a remote browser, tear it
//! down. Nothing here retries; callers decide what a failure means.

pub mod demo;
pub mod hyperbeam;

pub use demo::DemoProvisioner;
pub use hyperbeam::HyperbeamClient;

use crate::models::RemoteSession;
use async_trait::async_trait;
use serde::Serialize;

/// Settings sent to the provider when creating a VM.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VmConfig {
    pub width: u32,
    pub height: u32,
    pub ublock: bool,
    pub autoplay: bool,
}

impl Default for VmConfig {
    fn default() -> Self {
        Self {
            width: 1280,
            height: 720,
            ublock: true,
            autoplay: false,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ProvisionError {
    #[error("Provider request timed out")]
    Timeout,

    #[error("Provider returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Provider transport error: {0}")]
    Transport(String),

    #[error("Invalid provider response: {0}")]
    InvalidResponse(String),
}

impl From<reqwest::Error> for ProvisionError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            ProvisionError::Timeout
        } else if err.is_decode() {
            ProvisionError::InvalidResponse(err.to_string())
        } else {
            ProvisionError::Transport(err.to_string())
        }
    }
}

#[async_trait]
pub trait VmProvisioner: Send + Sync {
    /// Start a remote browser.
    async fn create_session(&self, config: &VmConfig) -> Result<RemoteSession, ProvisionError>;

    /// Stop a remote browser. Best-effort: `false` on any failure.
    async fn terminate_session(&self, remote_session_id: &str) -> bool;

    /// Provider-side description of a remote browser, `None` if unknown or on failure.
    ///
    /// Completes the provider contract for operators and tooling. No route
    /// calls it: session state is served from the local store.
    async fn session_info(&self, remote_session_id: &str) -> Option<serde_json::Value>;
}
