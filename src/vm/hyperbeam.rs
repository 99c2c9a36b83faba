//! Hyperbeam REST client.
//!
//! - `POST {base}/vm` creates a VM and returns `{session_id, embed_url, admin_token}`
//! - `GET {base}/vm/{id}` describes it
//! - `DELETE {base}/vm/{id}` terminates it

use super::{ProvisionError, VmConfig, VmProvisioner};
use crate::models::RemoteSession;
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;

pub const DEFAULT_BASE_URL: &str = "https://engine.hyperbeam.com/v0";

#[derive(Debug, Deserialize)]
struct CreateVmResponse {
    session_id: String,
    embed_url: String,
    admin_token: String,
}

pub struct HyperbeamClient {
    client: Client,
    api_key: String,
    base_url: String,
}

impl HyperbeamClient {
    pub fn new(api_key: impl Into<String>, timeout: Duration) -> Self {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_else(|e| {
                tracing::error!(error = %e, "Failed to build HTTP client with timeout, using default client");
                Client::new()
            });

        Self {
            client,
            api_key: api_key.into(),
            base_url: DEFAULT_BASE_URL.to_string(),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    fn vm_url(&self) -> String {
        format!("{}/vm", self.base_url)
    }

    fn session_url(&self, remote_session_id: &str) -> String {
        format!("{}/{}", self.vm_url(), remote_session_id)
    }
}

#[async_trait]
impl VmProvisioner for HyperbeamClient {
    async fn create_session(&self, config: &VmConfig) -> Result<RemoteSession, ProvisionError> {
        let response = self
            .client
            .post(self.vm_url())
            .bearer_auth(&self.api_key)
            .json(config)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ProvisionError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let vm: CreateVmResponse = response.json().await?;
        Ok(RemoteSession {
            remote_session_id: vm.session_id,
            embed_url: vm.embed_url,
            admin_token: vm.admin_token,
        })
    }

    async fn terminate_session(&self, remote_session_id: &str) -> bool {
        match self
            .client
            .delete(self.session_url(remote_session_id))
            .bearer_auth(&self.api_key)
            .send()
            .await
        {
            Ok(response) if response.status().is_success() => true,
            Ok(response) => {
                tracing::warn!(
                    remote_session_id = %remote_session_id,
                    status = response.status().as_u16(),
                    "Provider refused VM termination"
                );
                false
            }
            Err(e) => {
                tracing::warn!(remote_session_id = %remote_session_id, error = %e, "VM termination failed");
                false
            }
        }
    }

    async fn session_info(&self, remote_session_id: &str) -> Option<serde_json::Value> {
        let response = self
            .client
            .get(self.session_url(remote_session_id))
            .bearer_auth(&self.api_key)
            .send()
            .await
            .map_err(|e| {
                tracing::warn!(remote_session_id = %remote_session_id, error = %e, "VM info request failed");
            })
            .ok()?;

        if !response.status().is_success() {
            return None;
        }
        response.json().await.ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base_url_trailing_slash() {
        let client = HyperbeamClient::new("key", Duration::from_secs(5))
            .with_base_url("http://localhost:9000/v0/");
        assert_eq!(client.vm_url(), "http://localhost:9000/v0/vm");
    }

    #[test]
    fn test_session_url() {
        let client = HyperbeamClient::new("key", Duration::from_secs(5))
            .with_base_url("http://localhost:9000/v0");
        assert_eq!(client.session_url("abc"), "http://localhost:9000/v0/vm/abc");
    }

    #[test]
    fn test_default_base_url() {
        let client = HyperbeamClient::new("key", Duration::from_secs(5));
        assert_eq!(client.vm_url(), "https://engine.hyperbeam.com/v0/vm");
    }

    #[test]
    fn test_vm_config_wire_format() {
        let body = serde_json::to_value(VmConfig::default()).unwrap();
        assert_eq!(
            body,
            serde_json::json!({"width": 1280, "height": 720, "ublock": true, "autoplay": false})
        );
    }

    #[test]
    fn test_create_response_parsing() {
        let vm: CreateVmResponse = serde_json::from_str(
            r#"{"session_id":"abc","embed_url":"https://x/abc","admin_token":"t","extra":1}"#,
        )
        .unwrap();
        assert_eq!(vm.session_id, "abc");
        assert_eq!(vm.embed_url, "https://x/abc");
    }
}
