use std::path::Path;

use serde_json::{Map, Value};

use weft_core::workflow::{Edge, Node, WorkflowDefinition, WorkflowStatus};

/// A node with `config` taken from a JSON object (anything else means no config).
pub fn node(id: &str, node_type: &str, config: Value) -> Node {
    Node::new(id, node_type).with_config(config)
}

pub fn edge(source: &str, target: &str) -> Edge {
    Edge::new(source, target)
}

pub fn conditional_edge(source: &str, target: &str, branch: bool) -> Edge {
    Edge::conditional(source, target, branch)
}

/// A published definition with the given graph.
pub fn definition(id: &str, nodes: Vec<Node>, edges: Vec<Edge>) -> WorkflowDefinition {
    let mut def = WorkflowDefinition::new(id, id);
    def.status = WorkflowStatus::Published;
    def.nodes = nodes;
    def.edges = edges;
    def
}

/// `start → end` with an end message.
pub fn trivial_definition(id: &str) -> WorkflowDefinition {
    definition(
        id,
        vec![
            node("start", "start", Value::Null),
            node("end", "end", serde_json::json!({"message": "done"})),
        ],
        vec![edge("start", "end")],
    )
}

/// JSON object literal as a `Map`, for run inputs.
pub fn object(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        _ => Map::new(),
    }
}

/// Write each definition to `<dir>/<id>.json`.
pub fn write_workflows(dir: &Path, definitions: &[WorkflowDefinition]) -> std::io::Result<()> {
    std::fs::create_dir_all(dir)?;
    for def in definitions {
        let json = serde_json::to_string_pretty(def)?;
        std::fs::write(dir.join(format!("{}.json", def.id)), json)?;
    }
    Ok(())
}

/// A temp directory holding the given workflows.
pub fn workflows_dir(definitions: &[WorkflowDefinition]) -> std::io::Result<tempfile::TempDir> {
    let dir = tempfile::tempdir()?;
    write_workflows(dir.path(), definitions)?;
    Ok(dir)
}
