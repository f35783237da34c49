//! Outbound web-push collaborator.
//!
//! The subscription descriptor is an opaque JSON document registered by the
//! client (at minimum an `endpoint` URL). Delivery failures are terminal
//! for the attempt — no retry.

use async_trait::async_trait;
use serde_json::json;

use crate::error::CoreError;

#[async_trait]
pub trait PushTransport: Send + Sync {
    async fn deliver(&self, subscription: &str, body: &str, kind: &str) -> Result<(), CoreError>;
}

/// Production transport: POSTs the payload to the subscription endpoint.
pub struct HttpPushClient {
    client: reqwest::Client,
    api_key: String,
}

impl HttpPushClient {
    pub fn new(api_key: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key,
        }
    }
}

#[async_trait]
impl PushTransport for HttpPushClient {
    async fn deliver(&self, subscription: &str, body: &str, kind: &str) -> Result<(), CoreError> {
        let descriptor: serde_json::Value = serde_json::from_str(subscription)
            .map_err(|e| CoreError::Delivery(format!("invalid push subscription: {e}")))?;
        let endpoint = descriptor
            .get("endpoint")
            .and_then(|v| v.as_str())
            .ok_or_else(|| CoreError::Delivery("push subscription has no endpoint".into()))?;

        let response = self
            .client
            .post(endpoint)
            .bearer_auth(&self.api_key)
            .json(&json!({ "kind": kind, "body": body }))
            .send()
            .await
            .map_err(|e| CoreError::Delivery(format!("push request failed: {e}")))?;

        if !response.status().is_success() {
            return Err(CoreError::Delivery(format!(
                "push service returned {}",
                response.status()
            )));
        }
        Ok(())
    }
}

/// Dev-mode sandbox: logs the attempt and reports success.
pub struct SandboxPush;

#[async_trait]
impl PushTransport for SandboxPush {
    async fn deliver(&self, _subscription: &str, body: &str, kind: &str) -> Result<(), CoreError> {
        tracing::info!(kind = %kind, body = %body, "Sandbox push delivery");
        Ok(())
    }
}
