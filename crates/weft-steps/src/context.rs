use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use weft_core::types::RunId;
use weft_core::workflow::Node;

use crate::coerce;
use crate::interpolate::interpolate;

/// Name under which the run input is reachable from `${…}` when no variable shadows it.
pub const INPUT_ALIAS: &str = "input";

/// A variable value tagged with the store version of its last write.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VariableEntry {
    pub value: Value,
    pub version: u64,
}

/// Run-scoped shared variables.
///
/// Every write bumps a monotonically increasing version and stamps it on the
/// entry, so readers can tell which step wrote a value last. Last write wins.
#[derive(Debug, Clone, Default)]
pub struct VariableStore {
    entries: HashMap<String, VariableEntry>,
    version: u64,
}

impl VariableStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store seeded from initial data, one write per key.
    pub fn from_map(initial: &Map<String, Value>) -> Self {
        let mut store = Self::new();
        store.extend(initial);
        store
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.entries.get(name).map(|e| &e.value)
    }

    pub fn entry(&self, name: &str) -> Option<&VariableEntry> {
        self.entries.get(name)
    }

    /// Write a value and return the version assigned to it.
    pub fn set(&mut self, name: impl Into<String>, value: Value) -> u64 {
        self.version += 1;
        let version = self.version;
        self.entries.insert(name.into(), VariableEntry { value, version });
        version
    }

    /// Write every entry of `values` (overwrites on conflict).
    pub fn extend(&mut self, values: &Map<String, Value>) {
        for (k, v) in values {
            self.set(k.clone(), v.clone());
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    /// Version of the most recent write; 0 for an untouched store.
    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn snapshot(&self) -> Map<String, Value> {
        self.entries
            .iter()
            .map(|(k, e)| (k.clone(), e.value.clone()))
            .collect()
    }
}

/// What a handler sees while it executes one node of one run.
///
/// The context owns the run's [`VariableStore`] for the duration of the call;
/// the engine takes it back with [`ExecutionContext::into_parts`].
pub struct ExecutionContext {
    run_id: RunId,
    workflow_id: String,
    node: Node,
    variables: VariableStore,
    input: Arc<Value>,
    run_output: Option<Map<String, Value>>,
}

impl ExecutionContext {
    pub fn new(
        run_id: RunId,
        workflow_id: impl Into<String>,
        node: Node,
        variables: VariableStore,
        input: Arc<Value>,
    ) -> Self {
        Self {
            run_id,
            workflow_id: workflow_id.into(),
            node,
            variables,
            input,
            run_output: None,
        }
    }

    pub fn run_id(&self) -> &RunId {
        &self.run_id
    }

    pub fn workflow_id(&self) -> &str {
        &self.workflow_id
    }

    pub fn node(&self) -> &Node {
        &self.node
    }

    // ── Variables ────────────────────────────────────────────────

    pub fn get_variable(&self, name: &str) -> Option<&Value> {
        self.variables.get(name)
    }

    pub fn set_variable(&mut self, name: impl Into<String>, value: Value) {
        self.variables.set(name, value);
    }

    pub fn variables(&self) -> &VariableStore {
        &self.variables
    }

    pub fn variables_snapshot(&self) -> Map<String, Value> {
        self.variables.snapshot()
    }

    /// Expand `${…}` references against the shared variables.
    pub fn resolve_variables(&self, text: &str) -> String {
        interpolate(text, |name| self.lookup(name))
    }

    fn lookup(&self, name: &str) -> Option<&Value> {
        self.variables.get(name).or_else(|| {
            if name == INPUT_ALIAS {
                Some(self.input.as_ref())
            } else {
                None
            }
        })
    }

    // ── Input ────────────────────────────────────────────────────

    pub fn get_input(&self, key: &str) -> Option<&Value> {
        self.input.get(key)
    }

    /// The run input as submitted.
    pub fn input(&self) -> &Value {
        &self.input
    }

    // ── Config ───────────────────────────────────────────────────

    pub fn get_config(&self, key: &str) -> Option<&Value> {
        self.node.config.get(key)
    }

    pub fn get_config_or(&self, key: &str, default: Value) -> Value {
        self.get_config(key).cloned().unwrap_or(default)
    }

    /// Scalar config values as text; containers and null are `None`.
    pub fn config_string(&self, key: &str) -> Option<String> {
        match self.get_config(key)? {
            Value::String(s) => Some(s.clone()),
            v @ (Value::Number(_) | Value::Bool(_)) => Some(coerce::to_text(v)),
            _ => None,
        }
    }

    /// `config_string` followed by `${…}` expansion.
    pub fn resolved_config(&self, key: &str) -> Option<String> {
        self.config_string(key).map(|s| self.resolve_variables(&s))
    }

    pub fn config_bool(&self, key: &str) -> Option<bool> {
        self.get_config(key).and_then(coerce::to_bool)
    }

    pub fn config_i64(&self, key: &str) -> Option<i64> {
        self.get_config(key).and_then(coerce::to_i64)
    }

    pub fn config_f64(&self, key: &str) -> Option<f64> {
        self.get_config(key).and_then(coerce::to_number)
    }

    // ── Run output ───────────────────────────────────────────────

    pub fn set_run_output(&mut self, output: Map<String, Value>) {
        self.run_output = Some(output);
    }

    /// Hand the variable store (and any run output) back to the engine.
    pub fn into_parts(self) -> (VariableStore, Option<Map<String, Value>>) {
        (self.variables, self.run_output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn ctx_with(config: Value, vars: Value, input: Value) -> ExecutionContext {
        let node = Node::new("n1", "test").with_config(config);
        let store = VariableStore::from_map(vars.as_object().unwrap());
        ExecutionContext::new(RunId::new(), "wf", node, store, Arc::new(input))
    }

    #[test]
    fn test_versions_increase_per_write() {
        let mut store = VariableStore::new();
        assert_eq!(store.version(), 0);
        let v1 = store.set("a", json!(1));
        let v2 = store.set("b", json!(2));
        let v3 = store.set("a", json!(3));
        assert!(v1 < v2 && v2 < v3);
        assert_eq!(store.entry("a").unwrap().version, v3);
        assert_eq!(store.get("a"), Some(&json!(3)));
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn test_resolve_variables() {
        let ctx = ctx_with(json!({}), json!({"a": 5, "obj": {"b": "x"}}), json!({}));
        assert_eq!(ctx.resolve_variables("${a}"), "5");
        assert_eq!(ctx.resolve_variables("${obj.b}"), "x");
        assert_eq!(ctx.resolve_variables("${missing}"), "");
        assert_eq!(ctx.resolve_variables("plain"), "plain");
    }

    #[test]
    fn test_input_alias_and_shadowing() {
        let ctx = ctx_with(json!({}), json!({}), json!({"city": "Oslo"}));
        assert_eq!(ctx.resolve_variables("${input.city}"), "Oslo");
        assert_eq!(ctx.get_input("city"), Some(&json!("Oslo")));

        let shadowed = ctx_with(json!({}), json!({"input": {"city": "Rome"}}), json!({"city": "Oslo"}));
        assert_eq!(shadowed.resolve_variables("${input.city}"), "Rome");
    }

    #[test]
    fn test_typed_config_getters() {
        let ctx = ctx_with(
            json!({"url": "http://x/${a}", "timeout": "15", "flag": "true", "temp": 0.2, "list": [1]}),
            json!({"a": "p"}),
            json!({}),
        );
        assert_eq!(ctx.config_string("url").as_deref(), Some("http://x/${a}"));
        assert_eq!(ctx.resolved_config("url").as_deref(), Some("http://x/p"));
        assert_eq!(ctx.config_i64("timeout"), Some(15));
        assert_eq!(ctx.config_bool("flag"), Some(true));
        assert_eq!(ctx.config_f64("temp"), Some(0.2));
        assert_eq!(ctx.config_string("list"), None);
        assert_eq!(ctx.config_i64("missing"), None);
        assert_eq!(ctx.get_config_or("missing", json!("d")), json!("d"));
    }

    #[test]
    fn test_into_parts_returns_writes() {
        let mut ctx = ctx_with(json!({}), json!({}), json!({}));
        ctx.set_variable("x", json!(1));
        let mut out = Map::new();
        out.insert("done".into(), json!(true));
        ctx.set_run_output(out);
        let (store, output) = ctx.into_parts();
        assert_eq!(store.get("x"), Some(&json!(1)));
        assert_eq!(output.unwrap()["done"], json!(true));
    }
}
