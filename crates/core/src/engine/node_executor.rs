use crate::collaborator::CollaboratorClient;
use crate::engine::resolver::InputResolver;
use crate::graph::WorkflowGraph;
use crate::sandbox::ScriptHost;
use crate::template::TemplateEngine;
use crate::types::{Node, NodeKind, NodeResult, Results};
use async_trait::async_trait;
use reqwest::Method;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::warn;

/// What a node executor sees while its node runs.
pub struct ExecutionContext<'a> {
    pub graph: &'a WorkflowGraph,
    /// Results recorded so far in this run.
    pub results: &'a Results,
    /// Raw envelope of the node whose edge led here. Executors may consult
    /// it; the built-in kinds derive their input from the resolver instead.
    pub upstream: Option<&'a NodeResult>,
}

impl ExecutionContext<'_> {
    /// The node's effective input: explicit mappings when configured,
    /// otherwise the fallback combination of its predecessors' outputs.
    pub fn resolved_input(&self, node: &Node) -> Value {
        InputResolver::resolve(self.graph, &node.id, self.results, &node.input_mappings())
    }
}

/// Per-node-kind execution contract.
///
/// Executors never propagate errors: every internal fault is converted into
/// a `{success: false, error}` envelope so a failing node cannot abort the
/// chain it belongs to.
#[async_trait]
pub trait NodeExecutor: Send + Sync {
    async fn execute(&self, node: &Node, ctx: ExecutionContext<'_>) -> NodeResult;
}

/// Lookup of executors keyed by node kind.
#[derive(Default)]
pub struct NodeRegistry {
    executors: HashMap<NodeKind, Arc<dyn NodeExecutor>>,
}

impl NodeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, kind: NodeKind, executor: Arc<dyn NodeExecutor>) {
        self.executors.insert(kind, executor);
    }

    pub fn get(&self, kind: NodeKind) -> Option<Arc<dyn NodeExecutor>> {
        self.executors.get(&kind).cloned()
    }

    /// The built-in executor set covering every node kind.
    pub fn standard(collaborators: Arc<CollaboratorClient>, scripts: Arc<ScriptHost>) -> Self {
        let mut registry = Self::new();
        registry.register(
            NodeKind::Trigger,
            Arc::new(TriggerExecutor {
                collaborators: collaborators.clone(),
            }),
        );
        registry.register(NodeKind::Function, Arc::new(FunctionExecutor { scripts }));
        registry.register(
            NodeKind::Api,
            Arc::new(ApiExecutor {
                http: collaborators.http().clone(),
            }),
        );
        registry.register(NodeKind::Utility, Arc::new(UtilityExecutor));
        registry.register(NodeKind::Llm, Arc::new(LlmExecutor { collaborators }));
        registry
    }
}

/// Deserialize a node's config map into a kind-specific view, falling back to
/// the view's defaults when the map does not fit.
fn config_view<T>(node: &Node) -> T
where
    T: for<'de> Deserialize<'de> + Default,
{
    match serde_json::from_value(Value::Object(node.config.clone())) {
        Ok(view) => view,
        Err(e) => {
            warn!(node = %node.id, error = %e, "node config did not parse, using defaults");
            T::default()
        }
    }
}

/// Fires the webhook collaborator and adopts its response as the envelope.
pub struct TriggerExecutor {
    collaborators: Arc<CollaboratorClient>,
}

#[async_trait]
impl NodeExecutor for TriggerExecutor {
    async fn execute(&self, node: &Node, _ctx: ExecutionContext<'_>) -> NodeResult {
        match self.collaborators.fire_trigger(&node.id).await {
            Ok(body) => NodeResult::from_json(body),
            Err(e) => NodeResult::failure(format!("Trigger failed: {e}")),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct FunctionConfig {
    code: String,
}

impl Default for FunctionConfig {
    fn default() -> Self {
        Self {
            // Identity snippet: pass the resolved input through unchanged
            code: "input".to_string(),
        }
    }
}

/// Evaluates the configured snippet in the sandbox against the resolved input.
pub struct FunctionExecutor {
    scripts: Arc<ScriptHost>,
}

#[async_trait]
impl NodeExecutor for FunctionExecutor {
    async fn execute(&self, node: &Node, ctx: ExecutionContext<'_>) -> NodeResult {
        let config: FunctionConfig = config_view(node);
        let input = ctx.resolved_input(node);

        match self.scripts.eval(&config.code, &input) {
            Ok(data) => NodeResult {
                success: true,
                data: Some(data),
                input_data: Some(input),
                ..Default::default()
            },
            Err(e) => NodeResult::failure(e.to_string()),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct ApiConfig {
    url: String,
    method: String,
    headers: String,
    body_template: Option<String>,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            url: "https://jsonplaceholder.typicode.com/posts/1".to_string(),
            method: "GET".to_string(),
            headers: "{}".to_string(),
            body_template: None,
        }
    }
}

/// Issues a caller-specified HTTP request, rendering headers and body through
/// the template engine against the resolved input.
pub struct ApiExecutor {
    http: reqwest::Client,
}

impl ApiExecutor {
    fn headers(node: &Node, config: &ApiConfig, input: &Value) -> Map<String, Value> {
        let rendered = TemplateEngine::render(&config.headers, input);
        match serde_json::from_str(&rendered) {
            Ok(headers) => headers,
            Err(e) => {
                warn!(node = %node.id, error = %e, "header template did not parse as JSON, sending none");
                Map::new()
            }
        }
    }

    /// Body for non-GET requests: the rendered template when it parses (raw
    /// input when it does not), otherwise the raw input when non-empty.
    fn body(node: &Node, config: &ApiConfig, input: &Value) -> Option<Value> {
        if let Some(template) = config.body_template.as_deref().filter(|t| !t.is_empty()) {
            let rendered = TemplateEngine::render(template, input);
            return match serde_json::from_str(&rendered) {
                Ok(body) => Some(body),
                Err(e) => {
                    warn!(node = %node.id, error = %e, "body template did not parse as JSON, sending raw input");
                    Some(input.clone())
                }
            };
        }

        match input {
            Value::Object(map) if map.is_empty() => None,
            Value::Null => None,
            other => Some(other.clone()),
        }
    }
}

#[async_trait]
impl NodeExecutor for ApiExecutor {
    async fn execute(&self, node: &Node, ctx: ExecutionContext<'_>) -> NodeResult {
        let config: ApiConfig = config_view(node);
        let input = ctx.resolved_input(node);

        let method = match Method::from_bytes(config.method.to_uppercase().as_bytes()) {
            Ok(method) => method,
            Err(_) => {
                return NodeResult::failure(format!(
                    "API call failed: invalid method '{}'",
                    config.method
                ))
            }
        };

        let mut request = self.http.request(method.clone(), &config.url);
        for (name, value) in Self::headers(node, &config, &input) {
            let value = match value {
                Value::String(text) => text,
                other => other.to_string(),
            };
            request = request.header(name, value);
        }

        if method != Method::GET {
            if let Some(body) = Self::body(node, &config, &input) {
                request = request.json(&body);
            }
        }

        let response = match request.send().await {
            Ok(response) => response,
            Err(e) => return NodeResult::failure(format!("API call failed: {e}")),
        };

        let status = response.status();
        let text = response.text().await.unwrap_or_default();
        if !status.is_success() {
            return NodeResult::failure(format!("API call failed: {status} - {text}"));
        }

        let data = if text.is_empty() {
            json!({})
        } else {
            match serde_json::from_str(&text) {
                Ok(value) => value,
                Err(_) => Value::String(text),
            }
        };

        NodeResult {
            success: true,
            data: Some(data),
            input_data: Some(input),
            status_code: Some(status.as_u16()),
            ..Default::default()
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct UtilityConfig {
    operation: String,
    parameters: String,
}

impl Default for UtilityConfig {
    fn default() -> Self {
        Self {
            operation: "transform".to_string(),
            parameters: "{}".to_string(),
        }
    }
}

/// Structured pass-through for user-defined transforms: echoes the operation,
/// its parsed parameters, and the resolved input.
pub struct UtilityExecutor;

#[async_trait]
impl NodeExecutor for UtilityExecutor {
    async fn execute(&self, node: &Node, ctx: ExecutionContext<'_>) -> NodeResult {
        let config: UtilityConfig = config_view(node);
        let input = ctx.resolved_input(node);

        let parameters: Value = match serde_json::from_str(&config.parameters) {
            Ok(parameters) => parameters,
            Err(e) => return NodeResult::failure(format!("invalid utility parameters: {e}")),
        };

        NodeResult::success(json!({
            "operation": config.operation,
            "parameters": parameters,
            "inputData": input,
            "result": format!("Utility operation '{}' completed successfully", config.operation),
        }))
    }
}

#[derive(Debug, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct LlmConfig {
    prompt: String,
    model: String,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            prompt: "Process this data".to_string(),
            model: "gemini-1.5-flash".to_string(),
        }
    }
}

/// Renders the prompt template and delegates to the generative-text
/// collaborator.
pub struct LlmExecutor {
    collaborators: Arc<CollaboratorClient>,
}

#[async_trait]
impl NodeExecutor for LlmExecutor {
    async fn execute(&self, node: &Node, ctx: ExecutionContext<'_>) -> NodeResult {
        let config: LlmConfig = config_view(node);
        let input = ctx.resolved_input(node);
        let prompt = TemplateEngine::render(&config.prompt, &input);

        match self
            .collaborators
            .generate(&input, &prompt, &config.model)
            .await
        {
            Ok(body) => NodeResult::from_json(body),
            Err(e) => NodeResult::failure(format!("LLM processing failed: {e}")),
        }
    }
}
