use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Engine configuration: collaborator endpoints and execution bounds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineSettings {
    /// Webhook collaborator invoked by trigger nodes.
    #[serde(default = "default_trigger_url")]
    pub trigger_url: String,

    /// Generative-text collaborator invoked by llm nodes.
    #[serde(default = "default_llm_url")]
    pub llm_url: String,

    /// Timeout applied to every outbound HTTP request.
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    /// Optional wall-clock budget for a single node execution. A node that
    /// exceeds it records a failure envelope and the chain continues.
    #[serde(default)]
    pub node_timeout_secs: Option<u64>,

    /// Operation budget for function-node script evaluation.
    #[serde(default = "default_script_max_operations")]
    pub script_max_operations: u64,
}

fn default_trigger_url() -> String {
    "http://127.0.0.1:54321/functions/v1/http-trigger".to_string()
}

fn default_llm_url() -> String {
    "http://127.0.0.1:54321/functions/v1/llm-processor".to_string()
}

fn default_request_timeout_secs() -> u64 {
    30
}

fn default_script_max_operations() -> u64 {
    100_000
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            trigger_url: default_trigger_url(),
            llm_url: default_llm_url(),
            request_timeout_secs: default_request_timeout_secs(),
            node_timeout_secs: None,
            script_max_operations: default_script_max_operations(),
        }
    }
}

impl EngineSettings {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn node_timeout(&self) -> Option<Duration> {
        self.node_timeout_secs.map(Duration::from_secs)
    }
}
