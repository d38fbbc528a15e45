//! Document shorthand normalization
//!
//! Flow documents accept several convenience shorthands that the tagged
//! `Step`/`StepBody` model does not understand directly. This pass rewrites
//! a parsed document into the canonical shape (`exec`/`parallel`/`foreach`/
//! `await_event`/`wait`, each with its full field set) before it is handed
//! to `Step`'s `Deserialize` impl.
//!
//! Recognized shorthands:
//! - `use: <tool>` with a sibling `with: {...}` becomes `exec: {use, with}`.
//! - `parallel: true` with a sibling `steps: [...]` becomes `parallel: {steps}`.
//! - `foreach: <expr>` with sibling `as: <alias>` and `do: [...]` becomes
//!   `foreach: {list_expr, as, do}`. The expression is stripped of `{{ }}`
//!   delimiters so the engine can evaluate it directly.
//!
//! Canonical (already-object) forms are passed through unchanged except for
//! recursing into any nested step lists they carry, since shorthands can
//! appear at any nesting level.

use serde_json::Value;

/// Normalize an entire flow document in place.
pub fn normalize_flow(mut doc: Value) -> Value {
    if let Some(obj) = doc.as_object_mut() {
        if let Some(steps) = obj.get_mut("steps")
            && let Some(arr) = steps.as_array_mut()
        {
            normalize_steps(arr);
        }
        if let Some(catch) = obj.get_mut("catch")
            && let Some(arr) = catch.as_array_mut()
        {
            normalize_steps(arr);
        }
    }
    doc
}

fn normalize_steps(steps: &mut Vec<Value>) {
    for step in steps.iter_mut() {
        normalize_step(step);
    }
}

fn normalize_step(step: &mut Value) {
    let Some(obj) = step.as_object_mut() else {
        return;
    };

    // exec shorthand: bare `use`/`with` at the step's top level.
    if !obj.contains_key("exec") && obj.contains_key("use") {
        let use_ = obj.remove("use").unwrap_or(Value::Null);
        let with = obj.remove("with").unwrap_or_else(|| Value::Object(Default::default()));
        let mut exec = serde_json::Map::new();
        exec.insert("use".to_string(), use_);
        exec.insert("with".to_string(), with);
        obj.insert("exec".to_string(), Value::Object(exec));
    }

    // parallel shorthand: `parallel: true` with sibling `steps`.
    let is_parallel_shorthand = matches!(obj.get("parallel"), Some(Value::Bool(true)));
    if is_parallel_shorthand {
        let mut nested = obj
            .remove("steps")
            .and_then(|v| v.as_array().cloned())
            .unwrap_or_default();
        normalize_steps(&mut nested);
        let mut parallel = serde_json::Map::new();
        parallel.insert("steps".to_string(), Value::Array(nested));
        obj.insert("parallel".to_string(), Value::Object(parallel));
    } else if let Some(Value::Object(parallel)) = obj.get_mut("parallel") {
        if let Some(Value::Array(nested)) = parallel.get_mut("steps") {
            normalize_steps(nested);
        }
    }

    // foreach shorthand: `foreach: <expr string>` with sibling `as`/`do`.
    let is_foreach_shorthand = matches!(obj.get("foreach"), Some(Value::String(_)));
    if is_foreach_shorthand {
        let expr = match obj.remove("foreach") {
            Some(Value::String(s)) => s,
            _ => String::new(),
        };
        let list_expr = strip_template_delimiters(&expr);
        let alias = obj
            .remove("as")
            .and_then(|v| v.as_str().map(|s| s.to_string()))
            .unwrap_or_default();
        let mut nested = obj
            .remove("do")
            .and_then(|v| v.as_array().cloned())
            .unwrap_or_default();
        normalize_steps(&mut nested);

        let mut foreach = serde_json::Map::new();
        foreach.insert("list_expr".to_string(), Value::String(list_expr));
        foreach.insert("as".to_string(), Value::String(alias));
        foreach.insert("do".to_string(), Value::Array(nested));
        obj.insert("foreach".to_string(), Value::Object(foreach));
    } else if let Some(Value::Object(foreach)) = obj.get_mut("foreach") {
        if let Some(Value::Array(nested)) = foreach.get_mut("do") {
            normalize_steps(nested);
        }
    }

    // await_event and wait have no further shorthands and carry no nested
    // step lists, so they pass through untouched.

    // catch blocks can appear at any nesting level.
    if let Some(Value::Array(catch)) = obj.get_mut("catch") {
        normalize_steps(catch);
    }
}

/// Strip `{{ }}` template delimiters from a foreach list expression so the
/// engine evaluates it as a bare expression instead of rendering it as text.
fn strip_template_delimiters(expr: &str) -> String {
    let trimmed = expr.trim();
    if let Some(inner) = trimmed
        .strip_prefix("{{")
        .and_then(|s| s.strip_suffix("}}"))
    {
        inner.trim().to_string()
    } else {
        trimmed.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn exec_shorthand_promotes_use_and_with() {
        let mut step = json!({
            "id": "a",
            "use": "core.echo",
            "with": {"text": "hi"}
        });
        normalize_step(&mut step);
        assert_eq!(step["exec"]["use"], json!("core.echo"));
        assert_eq!(step["exec"]["with"]["text"], json!("hi"));
        assert!(step.get("use").is_none());
    }

    #[test]
    fn parallel_shorthand_wraps_steps() {
        let mut step = json!({
            "id": "p",
            "parallel": true,
            "steps": [
                {"id": "c1", "use": "core.echo", "with": {}}
            ]
        });
        normalize_step(&mut step);
        assert!(step["parallel"]["steps"].is_array());
        assert_eq!(step["parallel"]["steps"][0]["exec"]["use"], json!("core.echo"));
    }

    #[test]
    fn foreach_shorthand_strips_template_delimiters() {
        let mut step = json!({
            "id": "f",
            "foreach": "{{ vars.items }}",
            "as": "item",
            "do": [
                {"id": "inner", "use": "core.echo", "with": {}}
            ]
        });
        normalize_step(&mut step);
        assert_eq!(step["foreach"]["list_expr"], json!("vars.items"));
        assert_eq!(step["foreach"]["as"], json!("item"));
        assert!(step["foreach"]["do"].is_array());
    }

    #[test]
    fn canonical_forms_pass_through_with_recursion() {
        let mut step = json!({
            "id": "p",
            "parallel": {
                "steps": [
                    {"id": "c1", "use": "core.echo", "with": {}}
                ]
            }
        });
        normalize_step(&mut step);
        assert_eq!(step["parallel"]["steps"][0]["exec"]["use"], json!("core.echo"));
    }

    #[test]
    fn nested_catch_blocks_are_normalized() {
        let mut doc = json!({
            "steps": [
                {
                    "id": "a",
                    "use": "core.echo",
                    "with": {},
                    "catch": [
                        {"id": "b", "use": "core.log", "with": {}}
                    ]
                }
            ]
        });
        doc = normalize_flow(doc);
        assert_eq!(
            doc["steps"][0]["catch"][0]["exec"]["use"],
            json!("core.log")
        );
    }
}
