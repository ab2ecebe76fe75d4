use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use uuid::Uuid;

/// Unique identifier for a workflow run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RunId(pub Uuid);

impl RunId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for RunId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Unique identifier for a workflow node
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NodeId(pub String);

impl NodeId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The kind of work a node performs.
///
/// The set is closed: each kind has exactly one executor registered in the
/// `NodeRegistry`, and adding a kind means adding a variant plus an executor,
/// not touching the orchestrator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeKind {
    Trigger,
    Function,
    Api,
    Utility,
    Llm,
}

impl std::fmt::Display for NodeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Trigger => "trigger",
            Self::Function => "function",
            Self::Api => "api",
            Self::Utility => "utility",
            Self::Llm => "llm",
        };
        write!(f, "{name}")
    }
}

/// A typed, configurable unit of work in the workflow graph.
///
/// `config` is a free JSON object whose meaning depends on `kind`; each
/// executor deserializes its own typed view of it. Keys use camelCase so a
/// graph exported from the canvas loads unchanged.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Node {
    pub id: NodeId,
    pub kind: NodeKind,
    pub label: String,
    #[serde(default)]
    pub config: Map<String, Value>,
}

impl Node {
    pub fn new(id: impl Into<String>, kind: NodeKind, label: impl Into<String>) -> Self {
        Self {
            id: NodeId::new(id),
            kind,
            label: label.into(),
            config: Map::new(),
        }
    }

    pub fn with_config(mut self, key: impl Into<String>, value: Value) -> Self {
        self.config.insert(key.into(), value);
        self
    }

    /// Explicit field mappings declared under the `inputMappings` config key.
    /// Malformed entries are ignored with a warning rather than failing the node.
    pub fn input_mappings(&self) -> Vec<InputMapping> {
        let Some(raw) = self.config.get("inputMappings") else {
            return Vec::new();
        };
        match serde_json::from_value(raw.clone()) {
            Ok(mappings) => mappings,
            Err(e) => {
                tracing::warn!(node = %self.id, error = %e, "ignoring malformed inputMappings");
                Vec::new()
            }
        }
    }
}

/// A directed data-flow dependency: `target` consumes `source`'s output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Edge {
    pub id: String,
    pub source: NodeId,
    pub target: NodeId,
}

impl Edge {
    pub fn new(id: impl Into<String>, source: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            source: NodeId::new(source),
            target: NodeId::new(target),
        }
    }

    /// Connect two nodes with a generated edge id.
    pub fn between(source: impl Into<String>, target: impl Into<String>) -> Self {
        Self::new(Uuid::new_v4().to_string(), source, target)
    }
}

/// Projects one field of a predecessor's output into a named input field.
///
/// `target_path` defaults to the last dotted segment of `source_path`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InputMapping {
    pub source_node: NodeId,
    pub source_path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_path: Option<String>,
}

/// The structured success/failure envelope produced by executing one node.
///
/// Collaborator-specific fields (the trigger endpoint's `message`, the LLM
/// endpoint's echo metadata) survive in `extra` so the envelope round-trips
/// whatever the collaborator answered.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeResult {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(rename = "inputData", skip_serializing_if = "Option::is_none")]
    pub input_data: Option<Value>,
    #[serde(rename = "statusCode", skip_serializing_if = "Option::is_none")]
    pub status_code: Option<u16>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl NodeResult {
    pub fn success(data: Value) -> Self {
        Self {
            success: true,
            data: Some(data),
            ..Default::default()
        }
    }

    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
            ..Default::default()
        }
    }

    /// Adopt a collaborator's JSON response as the envelope. Objects are
    /// taken field-for-field; anything else is carried under `data`, which
    /// resolves identically downstream.
    pub fn from_json(value: Value) -> Self {
        match value {
            Value::Object(_) => match serde_json::from_value(value.clone()) {
                Ok(result) => result,
                Err(_) => Self {
                    success: true,
                    data: Some(value),
                    ..Default::default()
                },
            },
            other => Self {
                success: true,
                data: Some(other),
                ..Default::default()
            },
        }
    }

    /// The whole envelope as a JSON value.
    pub fn as_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }

    /// What downstream nodes consume: the `data` field when the envelope has
    /// one, otherwise the whole envelope.
    pub fn resolved_data(&self) -> Value {
        match &self.data {
            Some(data) => data.clone(),
            None => self.as_value(),
        }
    }
}

/// Results recorded during a run, keyed by node id.
pub type Results = HashMap<NodeId, NodeResult>;

/// Everything a run settles into: the per-node results map, plus a run-level
/// error when the orchestrator itself failed. On a run-level failure the
/// partial results are discarded and only `error` is populated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunOutcome {
    pub run_id: RunId,
    #[serde(default)]
    pub results: Results,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl RunOutcome {
    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_node_result_prefers_data_field() {
        let result = NodeResult::success(json!({"v": 1}));
        assert_eq!(result.resolved_data(), json!({"v": 1}));
    }

    #[test]
    fn test_node_result_falls_back_to_whole_envelope() {
        let result = NodeResult::failure("boom");
        let value = result.resolved_data();
        assert_eq!(value["success"], json!(false));
        assert_eq!(value["error"], json!("boom"));
    }

    #[test]
    fn test_from_json_keeps_collaborator_fields() {
        let result = NodeResult::from_json(json!({
            "success": true,
            "message": "HTTP trigger executed successfully",
            "data": {"method": "POST"},
            "triggerNodeId": "t1",
        }));
        assert!(result.success);
        assert_eq!(result.data, Some(json!({"method": "POST"})));
        assert_eq!(
            result.extra["message"],
            json!("HTTP trigger executed successfully")
        );
        assert_eq!(result.extra["triggerNodeId"], json!("t1"));
    }

    #[test]
    fn test_from_json_wraps_non_objects() {
        let result = NodeResult::from_json(json!("plain text"));
        assert!(result.success);
        assert_eq!(result.data, Some(json!("plain text")));
    }

    #[test]
    fn test_input_mappings_parse_camel_case() {
        let node = Node::new("n1", NodeKind::Function, "Fn").with_config(
            "inputMappings",
            json!([{"sourceNode": "a", "sourcePath": "data.value", "targetPath": "x"}]),
        );
        let mappings = node.input_mappings();
        assert_eq!(mappings.len(), 1);
        assert_eq!(mappings[0].source_node, NodeId::new("a"));
        assert_eq!(mappings[0].target_path.as_deref(), Some("x"));
    }

    #[test]
    fn test_malformed_input_mappings_are_ignored() {
        let node =
            Node::new("n1", NodeKind::Function, "Fn").with_config("inputMappings", json!("nope"));
        assert!(node.input_mappings().is_empty());
    }
}
