use crate::collaborator::CollaboratorClient;
use crate::engine::node_executor::{ExecutionContext, NodeRegistry};
use crate::graph::WorkflowGraph;
use crate::sandbox::ScriptHost;
use crate::settings::EngineSettings;
use crate::types::{Node, NodeId, NodeKind, NodeResult, Results, RunId, RunOutcome};
use anyhow::{anyhow, bail, Result};
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::timeout;

/// Workflow executor: walks the graph depth-first from its entry nodes and
/// records one result envelope per node.
///
/// Entry selection: every `trigger` node starts its own chain, in node-list
/// order, strictly sequentially; a graph with no triggers runs a single chain
/// from the first node. Each chain owns its visited set, so fan-in within a
/// chain executes a node exactly once, while a node reached from a second
/// trigger chain executes again and overwrites the shared results entry —
/// the re-execution is deliberate, pending a product decision on whether
/// shared downstream side effects should fire once per chain.
///
/// Node failures are recorded and traversal continues; only an error escaping
/// the executor machinery itself aborts the run, discarding partial results
/// and surfacing a single run-level error.
pub struct WorkflowExecutor {
    registry: NodeRegistry,
    node_timeout: Option<Duration>,
    running: AtomicBool,
    cancel: Mutex<Option<watch::Sender<bool>>>,
}

impl WorkflowExecutor {
    pub fn new(settings: &EngineSettings) -> Result<Self> {
        let collaborators = Arc::new(CollaboratorClient::new(settings)?);
        let scripts = Arc::new(ScriptHost::new(settings.script_max_operations));
        Ok(Self::with_registry(
            NodeRegistry::standard(collaborators, scripts),
            settings.node_timeout(),
        ))
    }

    /// Build an executor over a custom registry. The registry must cover
    /// every kind present in the graphs it will run.
    pub fn with_registry(registry: NodeRegistry, node_timeout: Option<Duration>) -> Self {
        Self {
            registry,
            node_timeout,
            running: AtomicBool::new(false),
            cancel: Mutex::new(None),
        }
    }

    /// Whether a run is currently in flight.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Signal the active run to stop. The run aborts with a run-level error
    /// before the next node would execute; returns false when no run is
    /// active.
    pub fn cancel(&self) -> bool {
        match self.cancel.lock() {
            Ok(slot) => slot
                .as_ref()
                .map(|tx| tx.send(true).is_ok())
                .unwrap_or(false),
            Err(_) => false,
        }
    }

    /// Execute the graph and settle into a `RunOutcome`. One run at a time:
    /// a second call while a run is active fails without touching the graph.
    pub async fn run(&self, graph: &WorkflowGraph) -> RunOutcome {
        let run_id = RunId::new();
        let started_at = chrono::Utc::now();

        if self.running.swap(true, Ordering::SeqCst) {
            return RunOutcome {
                run_id,
                results: Results::new(),
                error: Some("a run is already active".to_string()),
                started_at,
                finished_at: chrono::Utc::now(),
            };
        }
        let _guard = RunningGuard {
            flag: &self.running,
        };

        let (cancel_tx, cancel_rx) = watch::channel(false);
        if let Ok(mut slot) = self.cancel.lock() {
            *slot = Some(cancel_tx);
        }

        tracing::info!(%run_id, nodes = graph.nodes().len(), "starting workflow run");

        let mut results = Results::new();
        let outcome = self.run_chains(graph, &mut results, &cancel_rx).await;

        if let Ok(mut slot) = self.cancel.lock() {
            *slot = None;
        }

        let finished_at = chrono::Utc::now();
        match outcome {
            Ok(()) => {
                tracing::info!(%run_id, recorded = results.len(), "workflow run completed");
                RunOutcome {
                    run_id,
                    results,
                    error: None,
                    started_at,
                    finished_at,
                }
            }
            Err(e) => {
                tracing::error!(%run_id, error = %e, "workflow run failed");
                RunOutcome {
                    run_id,
                    results: Results::new(),
                    error: Some(e.to_string()),
                    started_at,
                    finished_at,
                }
            }
        }
    }

    async fn run_chains(
        &self,
        graph: &WorkflowGraph,
        results: &mut Results,
        cancel: &watch::Receiver<bool>,
    ) -> Result<()> {
        let Some(first) = graph.nodes().first() else {
            tracing::warn!("workflow has no nodes, nothing to execute");
            return Ok(());
        };

        let triggers: Vec<&Node> = graph
            .nodes()
            .iter()
            .filter(|n| n.kind == NodeKind::Trigger)
            .collect();

        if triggers.is_empty() {
            tracing::debug!(node = %first.id, "no trigger nodes, starting from first node");
            let mut visited = HashSet::new();
            self.execute_node(graph, first, None, &mut visited, results, cancel)
                .await?;
        } else {
            for trigger in triggers {
                tracing::debug!(node = %trigger.id, "starting trigger chain");
                let mut visited = HashSet::new();
                self.execute_node(graph, trigger, None, &mut visited, results, cancel)
                    .await?;
            }
        }

        Ok(())
    }

    async fn execute_node(
        &self,
        graph: &WorkflowGraph,
        node: &Node,
        upstream: Option<&NodeResult>,
        visited: &mut HashSet<NodeId>,
        results: &mut Results,
        cancel: &watch::Receiver<bool>,
    ) -> Result<NodeResult> {
        if visited.contains(&node.id) {
            return results
                .get(&node.id)
                .cloned()
                .ok_or_else(|| anyhow!("node {} marked visited without a recorded result", node.id));
        }
        visited.insert(node.id.clone());

        if *cancel.borrow() {
            bail!("run cancelled");
        }

        let executor = self
            .registry
            .get(node.kind)
            .ok_or_else(|| anyhow!("no executor registered for node kind '{}'", node.kind))?;

        tracing::debug!(node = %node.id, kind = %node.kind, "executing node");
        let ctx = ExecutionContext {
            graph,
            results: &*results,
            upstream,
        };
        let envelope = match self.node_timeout {
            Some(limit) => match timeout(limit, executor.execute(node, ctx)).await {
                Ok(envelope) => envelope,
                Err(_) => {
                    tracing::warn!(node = %node.id, "node timed out");
                    NodeResult::failure(format!("node timed out after {}s", limit.as_secs()))
                }
            },
            None => executor.execute(node, ctx).await,
        };

        if !envelope.success {
            tracing::warn!(node = %node.id, error = ?envelope.error, "node failed, continuing chain");
        }
        results.insert(node.id.clone(), envelope.clone());

        for edge in graph.outgoing(&node.id) {
            if let Some(next) = graph.node(&edge.target) {
                Box::pin(self.execute_node(graph, next, Some(&envelope), visited, results, cancel))
                    .await?;
            }
        }

        Ok(envelope)
    }
}

struct RunningGuard<'a> {
    flag: &'a AtomicBool,
}

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::node_executor::NodeExecutor;
    use crate::types::Edge;
    use async_trait::async_trait;
    use serde_json::json;
    use std::collections::HashMap;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    /// Records how often each node executes and echoes the upstream envelope.
    struct CountingExecutor {
        calls: Arc<Mutex<HashMap<NodeId, usize>>>,
    }

    #[async_trait]
    impl NodeExecutor for CountingExecutor {
        async fn execute(&self, node: &Node, ctx: ExecutionContext<'_>) -> NodeResult {
            if let Ok(mut calls) = self.calls.lock() {
                *calls.entry(node.id.clone()).or_insert(0) += 1;
            }
            NodeResult::success(json!({
                "node": node.id,
                "sawUpstream": ctx.upstream.is_some(),
            }))
        }
    }

    fn counting_executor() -> (WorkflowExecutor, Arc<Mutex<HashMap<NodeId, usize>>>) {
        let calls = Arc::new(Mutex::new(HashMap::new()));
        let mut registry = NodeRegistry::new();
        for kind in [
            NodeKind::Trigger,
            NodeKind::Function,
            NodeKind::Api,
            NodeKind::Utility,
            NodeKind::Llm,
        ] {
            registry.register(
                kind,
                Arc::new(CountingExecutor {
                    calls: calls.clone(),
                }),
            );
        }
        (WorkflowExecutor::with_registry(registry, None), calls)
    }

    fn count(calls: &Arc<Mutex<HashMap<NodeId, usize>>>, id: &str) -> usize {
        calls
            .lock()
            .map(|map| map.get(&NodeId::new(id)).copied().unwrap_or(0))
            .unwrap_or(0)
    }

    fn diamond_graph() -> WorkflowGraph {
        let mut graph = WorkflowGraph::new();
        graph
            .add_node(Node::new("t", NodeKind::Trigger, "Start"))
            .unwrap();
        for id in ["a", "b", "c", "d"] {
            graph
                .add_node(Node::new(id, NodeKind::Utility, id))
                .unwrap();
        }
        graph.add_edge(Edge::new("e1", "t", "a")).unwrap();
        graph.add_edge(Edge::new("e2", "a", "b")).unwrap();
        graph.add_edge(Edge::new("e3", "a", "c")).unwrap();
        graph.add_edge(Edge::new("e4", "b", "d")).unwrap();
        graph.add_edge(Edge::new("e5", "c", "d")).unwrap();
        graph
    }

    #[tokio::test]
    async fn test_diamond_fan_in_executes_shared_node_once() {
        let (executor, calls) = counting_executor();
        let outcome = executor.run(&diamond_graph()).await;

        assert!(outcome.is_success());
        assert_eq!(outcome.results.len(), 5);
        assert!(outcome.results.contains_key(&NodeId::new("d")));
        assert_eq!(count(&calls, "d"), 1);
    }

    #[tokio::test]
    async fn test_zero_triggers_starts_at_first_node() {
        let mut graph = WorkflowGraph::new();
        graph
            .add_node(Node::new("f1", NodeKind::Function, "First"))
            .unwrap();
        graph
            .add_node(Node::new("f2", NodeKind::Function, "Second"))
            .unwrap();
        graph.add_edge(Edge::new("e1", "f1", "f2")).unwrap();

        let (executor, calls) = counting_executor();
        let outcome = executor.run(&graph).await;

        assert!(outcome.is_success());
        assert_eq!(count(&calls, "f1"), 1);
        assert_eq!(count(&calls, "f2"), 1);
    }

    #[tokio::test]
    async fn test_empty_graph_yields_empty_outcome() {
        let (executor, _calls) = counting_executor();
        let outcome = executor.run(&WorkflowGraph::new()).await;

        assert!(outcome.is_success());
        assert!(outcome.results.is_empty());
    }

    #[tokio::test]
    async fn test_second_trigger_chain_re_executes_shared_node() {
        let mut graph = WorkflowGraph::new();
        graph
            .add_node(Node::new("t1", NodeKind::Trigger, "One"))
            .unwrap();
        graph
            .add_node(Node::new("t2", NodeKind::Trigger, "Two"))
            .unwrap();
        graph
            .add_node(Node::new("s", NodeKind::Utility, "Shared"))
            .unwrap();
        graph.add_edge(Edge::new("e1", "t1", "s")).unwrap();
        graph.add_edge(Edge::new("e2", "t2", "s")).unwrap();

        let (executor, calls) = counting_executor();
        let outcome = executor.run(&graph).await;

        assert!(outcome.is_success());
        // One entry in the shared map, but the node ran once per chain
        assert_eq!(outcome.results.len(), 3);
        assert_eq!(count(&calls, "s"), 2);
    }

    #[tokio::test]
    async fn test_upstream_envelope_reaches_successors() {
        let mut graph = WorkflowGraph::new();
        graph
            .add_node(Node::new("f1", NodeKind::Function, "First"))
            .unwrap();
        graph
            .add_node(Node::new("f2", NodeKind::Function, "Second"))
            .unwrap();
        graph.add_edge(Edge::new("e1", "f1", "f2")).unwrap();

        let (executor, _calls) = counting_executor();
        let outcome = executor.run(&graph).await;

        let root = &outcome.results[&NodeId::new("f1")];
        let successor = &outcome.results[&NodeId::new("f2")];
        assert_eq!(root.data.as_ref().unwrap()["sawUpstream"], json!(false));
        assert_eq!(successor.data.as_ref().unwrap()["sawUpstream"], json!(true));
    }

    #[tokio::test]
    async fn test_failed_node_does_not_stop_the_chain() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/broken"))
            .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
            .mount(&server)
            .await;

        let mut graph = WorkflowGraph::new();
        graph
            .add_node(
                Node::new("a1", NodeKind::Api, "Broken call")
                    .with_config("url", json!(format!("{}/broken", server.uri()))),
            )
            .unwrap();
        graph
            .add_node(
                Node::new("f1", NodeKind::Function, "After").with_config("code", json!("input")),
            )
            .unwrap();
        graph.add_edge(Edge::new("e1", "a1", "f1")).unwrap();

        let executor = WorkflowExecutor::new(&EngineSettings::default()).unwrap();
        let outcome = executor.run(&graph).await;

        assert!(outcome.is_success());
        let failed = &outcome.results[&NodeId::new("a1")];
        assert!(!failed.success);
        assert!(failed.error.as_deref().unwrap_or("").contains("500"));

        // The successor consumed the failure envelope as its input
        let successor = &outcome.results[&NodeId::new("f1")];
        assert!(successor.success);
        assert_eq!(
            successor.data.as_ref().unwrap()["success"],
            json!(false),
            "failure envelope should flow into the successor"
        );
    }

    #[tokio::test]
    async fn test_node_timeout_records_failure_and_continues() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/slow"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"ok": true}))
                    .set_delay(Duration::from_secs(5)),
            )
            .mount(&server)
            .await;

        let mut graph = WorkflowGraph::new();
        graph
            .add_node(
                Node::new("a1", NodeKind::Api, "Slow call")
                    .with_config("url", json!(format!("{}/slow", server.uri()))),
            )
            .unwrap();
        graph
            .add_node(
                Node::new("f1", NodeKind::Function, "After").with_config("code", json!("input")),
            )
            .unwrap();
        graph.add_edge(Edge::new("e1", "a1", "f1")).unwrap();

        let settings = EngineSettings {
            node_timeout_secs: Some(1),
            ..Default::default()
        };
        let executor = WorkflowExecutor::new(&settings).unwrap();
        let outcome = executor.run(&graph).await;

        assert!(outcome.is_success());
        let timed_out = &outcome.results[&NodeId::new("a1")];
        assert!(!timed_out.success);
        assert!(timed_out.error.as_deref().unwrap_or("").contains("timed out"));
        assert!(outcome.results.contains_key(&NodeId::new("f1")));
    }

    #[tokio::test]
    async fn test_cancel_aborts_run_and_discards_partials() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/slow"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"ok": true}))
                    .set_delay(Duration::from_millis(500)),
            )
            .mount(&server)
            .await;

        let mut graph = WorkflowGraph::new();
        graph
            .add_node(
                Node::new("a1", NodeKind::Api, "Slow call")
                    .with_config("url", json!(format!("{}/slow", server.uri()))),
            )
            .unwrap();
        graph
            .add_node(
                Node::new("f1", NodeKind::Function, "Never runs")
                    .with_config("code", json!("input")),
            )
            .unwrap();
        graph.add_edge(Edge::new("e1", "a1", "f1")).unwrap();

        let executor = Arc::new(WorkflowExecutor::new(&EngineSettings::default()).unwrap());
        let runner = {
            let executor = executor.clone();
            tokio::spawn(async move { executor.run(&graph).await })
        };

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(executor.is_running());
        assert!(executor.cancel());

        let outcome = runner.await.expect("run task panicked");
        assert!(!outcome.is_success());
        assert!(outcome.error.as_deref().unwrap_or("").contains("cancelled"));
        assert!(outcome.results.is_empty());
        assert!(!executor.is_running());
    }

    #[tokio::test]
    async fn test_rejects_concurrent_runs() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/slow"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"ok": true}))
                    .set_delay(Duration::from_millis(300)),
            )
            .mount(&server)
            .await;

        let mut graph = WorkflowGraph::new();
        graph
            .add_node(
                Node::new("a1", NodeKind::Api, "Slow call")
                    .with_config("url", json!(format!("{}/slow", server.uri()))),
            )
            .unwrap();

        let executor = Arc::new(WorkflowExecutor::new(&EngineSettings::default()).unwrap());
        let first = {
            let executor = executor.clone();
            let graph = graph.clone();
            tokio::spawn(async move { executor.run(&graph).await })
        };

        tokio::time::sleep(Duration::from_millis(100)).await;
        let second = executor.run(&graph).await;
        assert!(!second.is_success());
        assert!(second
            .error
            .as_deref()
            .unwrap_or("")
            .contains("already active"));

        let first = first.await.expect("run task panicked");
        assert!(first.is_success());
    }

    #[tokio::test]
    async fn test_trigger_chain_end_to_end() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/trigger"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "success": true,
                "message": "HTTP trigger executed successfully",
                "data": {"value": 5},
            })))
            .expect(1)
            .mount(&server)
            .await;

        let mut graph = WorkflowGraph::new();
        graph
            .add_node(Node::new("t1", NodeKind::Trigger, "Start"))
            .unwrap();
        graph
            .add_node(
                Node::new("f1", NodeKind::Function, "Double")
                    .with_config("code", json!("#{ result: input.value * 2 }")),
            )
            .unwrap();
        graph.add_edge(Edge::new("e1", "t1", "f1")).unwrap();

        let settings = EngineSettings {
            trigger_url: format!("{}/trigger", server.uri()),
            ..Default::default()
        };
        let executor = WorkflowExecutor::new(&settings).unwrap();
        let outcome = executor.run(&graph).await;

        assert!(outcome.is_success());
        let trigger = &outcome.results[&NodeId::new("t1")];
        assert!(trigger.success);

        let doubled = &outcome.results[&NodeId::new("f1")];
        assert_eq!(doubled.data, Some(json!({"result": 10})));
        assert_eq!(doubled.input_data, Some(json!({"value": 5})));
    }
}
