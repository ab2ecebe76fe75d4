//! HTTP client for the engine's external collaborators.
//!
//! Trigger and llm nodes delegate their real work to HTTP endpoints outside
//! the engine's control; this module owns the shared `reqwest` client and the
//! request/response conventions for both.

use crate::settings::EngineSettings;
use crate::types::NodeId;
use chrono::Utc;
use reqwest::{Client, Response};
use serde_json::{json, Value};
use tracing::debug;

/// Errors from collaborator calls.
#[derive(Debug, thiserror::Error)]
pub enum CollaboratorError {
    /// Transport-level failure.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// The collaborator answered with a non-success status.
    #[error("collaborator returned status {status}: {body}")]
    Api { status: u16, body: String },
}

/// Client for the webhook and generative-text collaborators.
#[derive(Debug, Clone)]
pub struct CollaboratorClient {
    client: Client,
    trigger_url: String,
    llm_url: String,
}

impl CollaboratorClient {
    pub fn new(settings: &EngineSettings) -> Result<Self, CollaboratorError> {
        let client = Client::builder()
            .timeout(settings.request_timeout())
            .build()?;

        Ok(Self {
            client,
            trigger_url: settings.trigger_url.clone(),
            llm_url: settings.llm_url.clone(),
        })
    }

    /// The underlying HTTP client, shared with the api-node executor so the
    /// whole engine pools connections and honors one request timeout.
    pub fn http(&self) -> &Client {
        &self.client
    }

    /// Fire the webhook collaborator for a trigger node. The response body is
    /// the trigger's raw data payload.
    pub async fn fire_trigger(&self, node_id: &NodeId) -> Result<Value, CollaboratorError> {
        debug!(node = %node_id, url = %self.trigger_url, "calling trigger collaborator");

        let payload = json!({
            "triggerNodeId": node_id,
            "timestamp": Utc::now().to_rfc3339(),
            "simulatedData": { "message": "Workflow triggered", "source": "weft" },
        });

        let response = self
            .client
            .post(&self.trigger_url)
            .query(&[("triggerNodeId", node_id.as_str())])
            .json(&payload)
            .send()
            .await?;

        Self::json_body(response).await
    }

    /// Ask the generative-text collaborator to process `input_data` with the
    /// rendered prompt.
    pub async fn generate(
        &self,
        input_data: &Value,
        prompt: &str,
        model: &str,
    ) -> Result<Value, CollaboratorError> {
        debug!(url = %self.llm_url, model, "calling llm collaborator");

        let response = self
            .client
            .post(&self.llm_url)
            .json(&json!({
                "inputData": input_data,
                "prompt": prompt,
                "model": model,
            }))
            .send()
            .await?;

        Self::json_body(response).await
    }

    async fn json_body(response: Response) -> Result<Value, CollaboratorError> {
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(CollaboratorError::Api {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response.json().await?)
    }
}
