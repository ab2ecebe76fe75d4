// Placeholder substitution for templated node configuration

use serde_json::{json, Value};

/// Resolves `{{dotted.path}}` placeholders against a data context.
///
/// Paths are written relative to a synthetic `input` root, so a prompt or
/// body template reads `{{input.data.name}}`. Substitution is best-effort:
/// a path that does not fully resolve leaves the placeholder untouched, and
/// rendering never fails.
pub struct TemplateEngine;

impl TemplateEngine {
    /// Render a template string against `context`.
    pub fn render(template: &str, context: &Value) -> String {
        let root = json!({ "input": context });
        let mut out = String::with_capacity(template.len());
        let mut rest = template;

        while let Some(start) = rest.find("{{") {
            out.push_str(&rest[..start]);
            let after = &rest[start + 2..];

            let Some(end) = after.find("}}") else {
                // Unterminated placeholder, emit the rest verbatim
                out.push_str("{{");
                rest = after;
                break;
            };

            let raw = &after[..end];
            match resolve_path(&root, raw.trim()) {
                Some(value) => out.push_str(&Self::stringify(value)),
                None => {
                    out.push_str("{{");
                    out.push_str(raw);
                    out.push_str("}}");
                }
            }
            rest = &after[end + 2..];
        }

        out.push_str(rest);
        out
    }

    /// Render a config value: strings are templated, everything else passes
    /// through unchanged.
    pub fn render_value(template: &Value, context: &Value) -> Value {
        match template {
            Value::String(text) => Value::String(Self::render(text, context)),
            other => other.clone(),
        }
    }

    fn stringify(value: &Value) -> String {
        match value {
            Value::String(text) => text.clone(),
            other => other.to_string(),
        }
    }
}

/// Walk a dotted path into a JSON value. Object keys are matched literally;
/// array segments must parse as indices. Returns `None` as soon as any
/// segment fails to resolve.
pub(crate) fn resolve_path<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    let mut current = value;
    for segment in path.split('.') {
        current = match current {
            Value::Object(map) => map.get(segment)?,
            Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    Some(current)
}
