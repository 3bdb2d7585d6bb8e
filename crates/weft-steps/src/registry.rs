use std::collections::HashMap;

use futures::future::BoxFuture;
use serde_json::{Map, Value};

use weft_core::error::{Result, WeftError};
use weft_core::workflow::WorkflowDefinition;

use crate::builtin::*;
use crate::context::ExecutionContext;
use crate::handler::{StepDescriptor, StepHandler, StepOutput};
use crate::services::StepServices;

/// The closed set of step handlers.
pub enum BuiltinStep {
    Start(StartStep),
    End(EndStep),
    Condition(ConditionStep),
    VariableSet(VariableSetStep),
    HttpRequest(HttpRequestStep),
    LlmChat(LlmChatStep),
    KnowledgeRetrieval(KnowledgeRetrievalStep),
    CodeExecution(CodeExecutionStep),
}

impl BuiltinStep {
    fn handler(&self) -> &dyn StepHandler {
        match self {
            Self::Start(h) => h,
            Self::End(h) => h,
            Self::Condition(h) => h,
            Self::VariableSet(h) => h,
            Self::HttpRequest(h) => h,
            Self::LlmChat(h) => h,
            Self::KnowledgeRetrieval(h) => h,
            Self::CodeExecution(h) => h,
        }
    }
}

impl StepHandler for BuiltinStep {
    fn step_type(&self) -> &'static str {
        self.handler().step_type()
    }

    fn display_name(&self) -> &'static str {
        self.handler().display_name()
    }

    fn description(&self) -> &'static str {
        self.handler().description()
    }

    fn config_schema(&self) -> Value {
        self.handler().config_schema()
    }

    fn validate_config(&self, config: &Map<String, Value>) -> Result<()> {
        self.handler().validate_config(config)
    }

    fn supports_retry(&self) -> bool {
        self.handler().supports_retry()
    }

    fn execute<'a>(&'a self, ctx: &'a mut ExecutionContext) -> BoxFuture<'a, Result<StepOutput>> {
        self.handler().execute(ctx)
    }
}

/// Lookup table from node type to handler, built once at startup.
pub struct StepRegistry {
    steps: HashMap<String, BuiltinStep>,
}

impl StepRegistry {
    pub fn new() -> Self {
        Self {
            steps: HashMap::new(),
        }
    }

    /// Register a step under its own type name.
    pub fn register(&mut self, step: BuiltinStep) {
        self.steps.insert(step.step_type().to_string(), step);
    }

    /// Create a registry with every built-in step wired to `services`.
    pub fn with_builtins(services: &StepServices) -> Self {
        let mut registry = Self::new();

        // ── Control flow ────────────────────────────────────────
        registry.register(BuiltinStep::Start(StartStep));
        registry.register(BuiltinStep::End(EndStep));
        registry.register(BuiltinStep::Condition(ConditionStep));
        registry.register(BuiltinStep::VariableSet(VariableSetStep));

        // ── Boundaries ──────────────────────────────────────────
        registry.register(BuiltinStep::HttpRequest(HttpRequestStep::new(
            services.http.clone(),
        )));
        registry.register(BuiltinStep::LlmChat(LlmChatStep::new(services.chat.clone())));
        registry.register(BuiltinStep::KnowledgeRetrieval(
            KnowledgeRetrievalStep::new(services.knowledge.clone()),
        ));
        registry.register(BuiltinStep::CodeExecution(CodeExecutionStep::new(
            services.scripts.clone(),
        )));

        registry
    }

    pub fn get(&self, step_type: &str) -> Option<&BuiltinStep> {
        self.steps.get(step_type)
    }

    pub fn contains(&self, step_type: &str) -> bool {
        self.steps.contains_key(step_type)
    }

    /// Registered type names, sorted.
    pub fn list(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.steps.keys().map(|s| s.as_str()).collect();
        names.sort_unstable();
        names
    }

    /// Metadata for every handler, sorted by type.
    pub fn describe(&self) -> Vec<StepDescriptor> {
        self.list()
            .into_iter()
            .filter_map(|name| self.steps.get(name))
            .map(|step| StepDescriptor::of(step))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Authoring-time check: graph structure, known types, and per-node config.
    pub fn validate_definition(&self, definition: &WorkflowDefinition) -> Result<()> {
        definition.validate()?;
        for node in &definition.nodes {
            let step = self
                .get(&node.node_type)
                .ok_or_else(|| WeftError::UnknownStepType(node.node_type.clone()))?;
            step.validate_config(&node.config).map_err(|e| match e {
                WeftError::ConfigValidation { step_type, message } => {
                    WeftError::ConfigValidation {
                        step_type,
                        message: format!("node '{}': {}", node.id, message),
                    }
                }
                other => other,
            })?;
        }
        Ok(())
    }
}

impl Default for StepRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use weft_core::workflow::{Edge, Node};

    fn registry() -> StepRegistry {
        StepRegistry::with_builtins(&StepServices::unconfigured())
    }

    #[test]
    fn test_builtins_registered() {
        let registry = registry();
        assert_eq!(
            registry.list(),
            vec![
                "code_execution",
                "condition",
                "end",
                "http_request",
                "knowledge_retrieval",
                "llm_chat",
                "start",
                "variable_set",
            ]
        );
        assert!(registry.contains("llm_chat"));
        assert!(registry.get("teleport").is_none());
    }

    #[test]
    fn test_describe_carries_metadata() {
        let described = registry().describe();
        assert_eq!(described.len(), 8);
        let start = described.iter().find(|d| d.step_type == "start").unwrap();
        assert!(!start.supports_retry);
        let http = described.iter().find(|d| d.step_type == "http_request").unwrap();
        assert_eq!(http.config_schema["required"], json!(["url"]));
    }

    fn definition(extra: Node) -> WorkflowDefinition {
        let mut def = WorkflowDefinition::new("wf", "Test");
        let id = extra.id.clone();
        def.nodes = vec![Node::new("s", "start"), extra, Node::new("e", "end")];
        def.edges = vec![Edge::new("s", id.clone()), Edge::new(id, "e")];
        def
    }

    #[test]
    fn test_validate_definition_unknown_type() {
        let err = registry()
            .validate_definition(&definition(Node::new("x", "teleport")))
            .unwrap_err();
        assert!(err.is_unknown_step_type());
    }

    #[test]
    fn test_validate_definition_bad_config() {
        let node = Node::new("c", "condition").with_config(json!({"operator": "maybe"}));
        let err = registry().validate_definition(&definition(node)).unwrap_err();
        assert!(matches!(err, WeftError::ConfigValidation { .. }));
        assert!(err.to_string().contains("node 'c'"));
    }

    #[test]
    fn test_validate_definition_ok() {
        let node = Node::new("h", "http_request").with_config(json!({"url": "https://example.com"}));
        assert!(registry().validate_definition(&definition(node)).is_ok());
    }
}
