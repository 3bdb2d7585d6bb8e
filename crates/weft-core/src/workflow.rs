use std::collections::{HashMap, HashSet, VecDeque};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{Result, WeftError};

/// Node type of the unique entry node.
pub const START_TYPE: &str = "start";
/// Node type of terminal nodes.
pub const END_TYPE: &str = "end";
/// Node type whose boolean result drives edge routing.
pub const CONDITION_TYPE: &str = "condition";

/// Lifecycle state of a stored definition.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkflowStatus {
    #[default]
    Draft,
    Published,
    Archived,
}

/// Immutable, versioned description of a workflow graph.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowDefinition {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default = "default_version")]
    pub version: u32,
    #[serde(default)]
    pub status: WorkflowStatus,
    #[serde(default)]
    pub nodes: Vec<Node>,
    #[serde(default)]
    pub edges: Vec<Edge>,
    /// Initial shared variables for every run.
    #[serde(default)]
    pub variables: Map<String, Value>,
    #[serde(default)]
    pub settings: Map<String, Value>,
}

fn default_version() -> u32 {
    1
}

/// A typed, configured step in the graph.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Node {
    pub id: String,
    #[serde(rename = "type")]
    pub node_type: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub config: Map<String, Value>,
    /// Free-form payload; for `start` it is merged into the run's variables.
    #[serde(default)]
    pub data: Map<String, Value>,
}

impl Node {
    pub fn new(id: impl Into<String>, node_type: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            node_type: node_type.into(),
            name: String::new(),
            config: Map::new(),
            data: Map::new(),
        }
    }

    /// Set the display name.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Replace the handler config. Non-object values are ignored.
    pub fn with_config(mut self, config: Value) -> Self {
        if let Value::Object(map) = config {
            self.config = map;
        }
        self
    }

    /// Replace the free-form data payload. Non-object values are ignored.
    pub fn with_data(mut self, data: Value) -> Self {
        if let Value::Object(map) = data {
            self.data = map;
        }
        self
    }

    /// Name for messages and records; falls back to the id.
    pub fn display_name(&self) -> &str {
        if self.name.is_empty() {
            &self.id
        } else {
            &self.name
        }
    }

    /// Whether a failure of this node is recorded and then ignored.
    pub fn continue_on_error(&self) -> bool {
        self.config
            .get("continueOnError")
            .and_then(flag_value)
            .unwrap_or(false)
    }

    pub fn is_condition(&self) -> bool {
        self.node_type == CONDITION_TYPE
    }
}

/// A directed link between two nodes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Edge {
    #[serde(default)]
    pub id: String,
    pub source: String,
    pub target: String,
    /// May carry `condition: "true" | "false"` after a condition node.
    #[serde(default)]
    pub data: Map<String, Value>,
}

impl Edge {
    /// Create an untagged edge.
    pub fn new(source: impl Into<String>, target: impl Into<String>) -> Self {
        let source = source.into();
        let target = target.into();
        Self {
            id: format!("{}->{}", source, target),
            source,
            target,
            data: Map::new(),
        }
    }

    /// Create an edge taken when the source condition evaluates to `branch`.
    pub fn conditional(
        source: impl Into<String>,
        target: impl Into<String>,
        branch: bool,
    ) -> Self {
        let mut edge = Self::new(source, target);
        edge.data
            .insert("condition".into(), Value::String(branch.to_string()));
        edge
    }

    /// Routing tag, accepting both `"true"` and `true`.
    pub fn condition_tag(&self) -> Option<bool> {
        match self.data.get("condition")? {
            Value::Bool(b) => Some(*b),
            Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
                "true" => Some(true),
                "false" => Some(false),
                _ => None,
            },
            _ => None,
        }
    }
}

impl WorkflowDefinition {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            version: default_version(),
            status: WorkflowStatus::default(),
            nodes: Vec::new(),
            edges: Vec::new(),
            variables: Map::new(),
            settings: Map::new(),
        }
    }

    /// Parse a definition from JSON text.
    pub fn from_json(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn node(&self, id: &str) -> Option<&Node> {
        self.nodes.iter().find(|n| n.id == id)
    }

    /// The unique start node, if the definition is well formed.
    pub fn start_node(&self) -> Option<&Node> {
        let mut starts = self.nodes.iter().filter(|n| n.node_type == START_TYPE);
        let first = starts.next()?;
        if starts.next().is_some() {
            None
        } else {
            Some(first)
        }
    }

    /// Check the structural invariants of the graph.
    pub fn validate(&self) -> Result<()> {
        let starts = self
            .nodes
            .iter()
            .filter(|n| n.node_type == START_TYPE)
            .count();
        if starts == 0 {
            return Err(WeftError::Definition("workflow has no start node".into()));
        }
        if starts > 1 {
            return Err(WeftError::Definition(format!(
                "workflow has {} start nodes, expected exactly one",
                starts
            )));
        }
        if !self.nodes.iter().any(|n| n.node_type == END_TYPE) {
            return Err(WeftError::Definition("workflow has no end node".into()));
        }

        let mut ids = HashSet::new();
        for node in &self.nodes {
            if !ids.insert(node.id.as_str()) {
                return Err(WeftError::Definition(format!(
                    "duplicate node id '{}'",
                    node.id
                )));
            }
        }

        for edge in &self.edges {
            for endpoint in [&edge.source, &edge.target] {
                if !ids.contains(endpoint.as_str()) {
                    return Err(WeftError::Definition(format!(
                        "edge '{}' references unknown node '{}'",
                        edge.id, endpoint
                    )));
                }
            }
        }

        if let Some(node) = self.find_cycle() {
            return Err(WeftError::Definition(format!(
                "cycle detected through node '{}'",
                node
            )));
        }

        Ok(())
    }

    /// Kahn's algorithm; returns a node left on a cycle, if any.
    fn find_cycle(&self) -> Option<&str> {
        let mut in_degree: HashMap<&str, usize> =
            self.nodes.iter().map(|n| (n.id.as_str(), 0)).collect();
        for edge in &self.edges {
            if let Some(d) = in_degree.get_mut(edge.target.as_str()) {
                *d += 1;
            }
        }

        let mut queue: VecDeque<&str> = in_degree
            .iter()
            .filter(|(_, d)| **d == 0)
            .map(|(id, _)| *id)
            .collect();
        let mut visited = 0usize;

        while let Some(id) = queue.pop_front() {
            visited += 1;
            for edge in self.edges.iter().filter(|e| e.source == id) {
                if let Some(d) = in_degree.get_mut(edge.target.as_str()) {
                    *d -= 1;
                    if *d == 0 {
                        queue.push_back(edge.target.as_str());
                    }
                }
            }
        }

        if visited == self.nodes.len() {
            return None;
        }
        self.nodes
            .iter()
            .map(|n| n.id.as_str())
            .find(|id| in_degree.get(id).copied().unwrap_or(0) > 0)
    }
}

/// Loose reading of a config flag: booleans, `"true"`/`"false"` in any
/// case, or a number (non-zero is true).
pub fn flag_value(value: &Value) -> Option<bool> {
    match value {
        Value::Bool(b) => Some(*b),
        Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
            "true" => Some(true),
            "false" => Some(false),
            _ => None,
        },
        Value::Number(n) => n.as_f64().map(|f| f != 0.0),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn linear() -> WorkflowDefinition {
        let mut def = WorkflowDefinition::new("wf", "Linear");
        def.nodes = vec![Node::new("s", "start"), Node::new("e", "end")];
        def.edges = vec![Edge::new("s", "e")];
        def
    }

    #[test]
    fn test_valid_definition() {
        assert!(linear().validate().is_ok());
    }

    #[test]
    fn test_missing_start_rejected() {
        let mut def = linear();
        def.nodes[0].node_type = "variable_set".into();
        let err = def.validate().unwrap_err();
        assert!(matches!(err, WeftError::Definition(_)));
    }

    #[test]
    fn test_two_starts_rejected() {
        let mut def = linear();
        def.nodes.push(Node::new("s2", "start"));
        assert!(def.validate().is_err());
        assert!(def.start_node().is_none());
    }

    #[test]
    fn test_missing_end_rejected() {
        let mut def = linear();
        def.nodes[1].node_type = "llm_chat".into();
        assert!(def.validate().is_err());
    }

    #[test]
    fn test_duplicate_node_id_rejected() {
        let mut def = linear();
        def.nodes.push(Node::new("e", "end"));
        let err = def.validate().unwrap_err();
        assert!(err.to_string().contains("duplicate node id"));
    }

    #[test]
    fn test_dangling_edge_rejected() {
        let mut def = linear();
        def.edges.push(Edge::new("e", "ghost"));
        let err = def.validate().unwrap_err();
        assert!(err.to_string().contains("ghost"));
    }

    #[test]
    fn test_edge_ids_need_not_be_unique() {
        let mut def = linear();
        def.nodes.push(Node::new("a", "variable_set"));
        let mut first = Edge::new("s", "a");
        first.id = "e1".into();
        let mut second = Edge::new("a", "e");
        second.id = "e1".into();
        def.edges.extend([first, second]);
        assert!(def.validate().is_ok());
    }

    #[test]
    fn test_edge_into_start_accepted() {
        let mut def = linear();
        def.nodes.push(Node::new("o", "variable_set"));
        def.edges.push(Edge::new("o", "s"));
        assert!(def.validate().is_ok());
    }

    #[test]
    fn test_cycle_rejected() {
        let mut def = linear();
        def.nodes.push(Node::new("a", "variable_set"));
        def.nodes.push(Node::new("b", "variable_set"));
        def.edges.push(Edge::new("s", "a"));
        def.edges.push(Edge::new("a", "b"));
        def.edges.push(Edge::new("b", "a"));
        let err = def.validate().unwrap_err();
        assert!(err.to_string().contains("cycle"));
    }

    #[test]
    fn test_condition_tag_forms() {
        let tagged = Edge::conditional("c", "a", true);
        assert_eq!(tagged.condition_tag(), Some(true));

        let mut edge = Edge::new("c", "b");
        edge.data.insert("condition".into(), json!(false));
        assert_eq!(edge.condition_tag(), Some(false));

        assert_eq!(Edge::new("c", "d").condition_tag(), None);
    }

    #[test]
    fn test_parse_json_definition() {
        let text = r#"{
            "id": "greeting",
            "name": "Greeting",
            "version": 3,
            "status": "published",
            "nodes": [
                {"id": "start", "type": "start"},
                {"id": "end", "type": "end", "config": {"message": "hi ${name}"}}
            ],
            "edges": [{"id": "e1", "source": "start", "target": "end"}],
            "variables": {"name": "world"}
        }"#;
        let def = WorkflowDefinition::from_json(text).unwrap();
        assert_eq!(def.version, 3);
        assert_eq!(def.status, WorkflowStatus::Published);
        assert_eq!(def.nodes[1].config["message"], json!("hi ${name}"));
        assert_eq!(def.variables["name"], json!("world"));
        assert!(def.validate().is_ok());
    }

    #[test]
    fn test_continue_on_error_flag() {
        let node = Node::new("h", "http_request").with_config(json!({"continueOnError": true}));
        assert!(node.continue_on_error());
        assert!(!Node::new("x", "end").continue_on_error());

        let quoted = Node::new("h", "http_request").with_config(json!({"continueOnError": "TRUE"}));
        assert!(quoted.continue_on_error());
        let off = Node::new("h", "http_request").with_config(json!({"continueOnError": "false"}));
        assert!(!off.continue_on_error());
        assert_eq!(Node::new("x", "end").display_name(), "x");
    }
}
