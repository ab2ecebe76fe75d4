// Sandboxed evaluation of user-supplied function-node snippets

use anyhow::{anyhow, Result};
use rhai::{Dynamic, Engine, Scope};
use serde_json::Value;

/// Evaluates function-node snippets in an isolated rhai engine.
///
/// Each evaluation gets a fresh engine with nothing registered beyond the
/// language built-ins: no filesystem, network, or process access is reachable
/// from a snippet. Evaluation is bounded by an operation budget and by size
/// and depth limits, so a runaway script terminates with an error instead of
/// stalling the run.
///
/// The snippet sees a single `input` binding holding the node's resolved
/// input; its final expression value becomes the node's output.
pub struct ScriptHost {
    max_operations: u64,
}

impl ScriptHost {
    pub fn new(max_operations: u64) -> Self {
        Self { max_operations }
    }

    pub fn eval(&self, code: &str, input: &Value) -> Result<Value> {
        let mut engine = Engine::new();
        engine.set_max_operations(self.max_operations);
        engine.set_max_call_levels(32);
        engine.set_max_expr_depths(64, 64);
        engine.set_max_string_size(1_000_000);
        engine.set_max_array_size(100_000);
        engine.set_max_map_size(100_000);

        let bound = rhai::serde::to_dynamic(input)
            .map_err(|e| anyhow!("failed to bind script input: {e}"))?;
        let mut scope = Scope::new();
        scope.push_dynamic("input", bound);

        let result = engine
            .eval_with_scope::<Dynamic>(&mut scope, code)
            .map_err(|e| anyhow!("script evaluation failed: {e}"))?;

        rhai::serde::from_dynamic(&result)
            .map_err(|e| anyhow!("script produced a non-serializable value: {e}"))
    }
}

impl Default for ScriptHost {
    fn default() -> Self {
        Self::new(100_000)
    }
}
