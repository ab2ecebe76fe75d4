use crate::graph::WorkflowGraph;
use crate::template::resolve_path;
use crate::types::{InputMapping, NodeId, NodeResult, Results};
use serde_json::{Map, Value};

/// Computes the effective input payload for a node from its predecessors'
/// recorded results.
///
/// Without explicit mappings the resolver falls back to a combination
/// policy: a single predecessor contributes its output directly, several
/// predecessors are merged under their node ids. With mappings, only the
/// projected fields are produced, and an empty projection stays empty —
/// explicit mode never falls back.
pub struct InputResolver;

impl InputResolver {
    pub fn resolve(
        graph: &WorkflowGraph,
        target: &NodeId,
        results: &Results,
        mappings: &[InputMapping],
    ) -> Value {
        let incoming: Vec<_> = graph.incoming(target).collect();
        if incoming.is_empty() {
            return Value::Object(Map::new());
        }

        if mappings.is_empty() {
            return Self::combine(&incoming, results);
        }
        Self::project(mappings, results)
    }

    /// Fallback mode: pass a lone predecessor's output through, or merge
    /// several predecessors namespaced by source node id. Predecessors with
    /// no recorded result are skipped.
    fn combine(incoming: &[&crate::types::Edge], results: &Results) -> Value {
        if let [edge] = incoming {
            return results
                .get(&edge.source)
                .map(NodeResult::resolved_data)
                .unwrap_or_else(|| Value::Object(Map::new()));
        }

        let mut combined = Map::new();
        for edge in incoming {
            if let Some(result) = results.get(&edge.source) {
                combined.insert(edge.source.to_string(), result.resolved_data());
            }
        }
        Value::Object(combined)
    }

    /// Explicit mode: each mapping projects one field of a source result into
    /// the output. The path is tried against the source's `data` first, then
    /// against the whole envelope; entries whose source result is missing or
    /// whose path does not resolve are skipped silently.
    fn project(mappings: &[InputMapping], results: &Results) -> Value {
        let mut mapped = Map::new();

        for mapping in mappings {
            let Some(result) = results.get(&mapping.source_node) else {
                continue;
            };

            let data = result.resolved_data();
            let envelope = result.as_value();
            let Some(value) = resolve_path(&data, &mapping.source_path)
                .or_else(|| resolve_path(&envelope, &mapping.source_path))
            else {
                continue;
            };

            let key = mapping
                .target_path
                .clone()
                .unwrap_or_else(|| last_segment(&mapping.source_path));
            mapped.insert(key, value.clone());
        }

        Value::Object(mapped)
    }
}

fn last_segment(path: &str) -> String {
    path.rsplit('.').next().unwrap_or(path).to_string()
}
