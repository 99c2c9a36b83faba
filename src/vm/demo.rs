//! Offline provider for running without a Hyperbeam API key.
//!
//! Hands out placeholder embed URLs so the session flow can be exercised
//! end to end. No VM exists behind them.

use super::{ProvisionError, VmConfig, VmProvisioner};
use crate::auth::session::generate_token_nonce;
use crate::models::RemoteSession;
use async_trait::async_trait;

pub const DEMO_EMBED_BASE: &str = "https://demo.hyperbeam.com/demo-session";

#[derive(Debug, Default, Clone, Copy)]
pub struct DemoProvisioner;

#[async_trait]
impl VmProvisioner for DemoProvisioner {
    async fn create_session(&self, config: &VmConfig) -> Result<RemoteSession, ProvisionError> {
        let id = format!("demo-{}", generate_token_nonce());
        tracing::debug!(remote_session_id = %id, width = config.width, height = config.height, "Demo VM created");
        Ok(RemoteSession {
            embed_url: format!("{}?id={}", DEMO_EMBED_BASE, id),
            admin_token: format!("demo-admin-{}", generate_token_nonce()),
            remote_session_id: id,
        })
    }

    async fn terminate_session(&self, remote_session_id: &str) -> bool {
        remote_session_id.starts_with("demo-")
    }

    async fn session_info(&self, remote_session_id: &str) -> Option<serde_json::Value> {
        remote_session_id.starts_with("demo-").then(|| {
            serde_json::json!({
                "session_id": remote_session_id,
                "embed_url": format!("{}?id={}", DEMO_EMBED_BASE, remote_session_id),
                "demo": true,
            })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_demo_session() {
        let remote = DemoProvisioner
            .create_session(&VmConfig::default())
            .await
            .unwrap();
        assert!(remote.remote_session_id.starts_with("demo-"));
        assert!(remote.embed_url.starts_with(DEMO_EMBED_BASE));
        assert!(remote.embed_url.ends_with(&remote.remote_session_id));
        let info = DemoProvisioner
            .session_info(&remote.remote_session_id)
            .await
            .unwrap();
        assert_eq!(info["embed_url"], remote.embed_url.as_str());
        assert!(DemoProvisioner.session_info("real-vm").await.is_none());

        assert!(DemoProvisioner.terminate_session(&remote.remote_session_id).await);
        assert!(!DemoProvisioner.terminate_session("real-vm").await);
    }
}
