use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use tokio::sync::RwLock;
use weft_core::engine::WorkflowExecutor;
use weft_core::graph::WorkflowGraph;
use weft_core::settings::EngineSettings;
use weft_core::types::RunOutcome;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default)]
    pub engine: EngineSettings,
}

impl ServerConfig {
    pub fn load(config_path: &Path) -> Result<Self> {
        if config_path.exists() {
            let content = std::fs::read_to_string(config_path)
                .context("Failed to read configuration file")?;
            toml::from_str(&content).context("Failed to parse configuration file")
        } else {
            tracing::info!("Configuration file not found, using defaults");
            Ok(Self::default())
        }
    }
}

/// Shared server state: the graph under construction, the executor, and the
/// last settled run for display.
pub struct AppState {
    pub graph: RwLock<WorkflowGraph>,
    pub executor: Arc<WorkflowExecutor>,
    pub last_outcome: RwLock<Option<RunOutcome>>,
}

impl AppState {
    pub fn new(config: &ServerConfig) -> Result<Self> {
        let executor = Arc::new(WorkflowExecutor::new(&config.engine)?);

        Ok(Self {
            graph: RwLock::new(WorkflowGraph::new()),
            executor,
            last_outcome: RwLock::new(None),
        })
    }
}
