use std::sync::Arc;

use futures::future::BoxFuture;
use serde_json::{json, Map, Value};

use weft_core::error::{Result, WeftError};
use weft_core::traits::KnowledgeSearch;

use crate::context::ExecutionContext;
use crate::handler::{output, StepHandler, StepOutput};

const STEP_TYPE: &str = "knowledge_retrieval";
const DEFAULT_TOP_K: i64 = 5;
const DEFAULT_THRESHOLD: f64 = 0.7;

/// Retrieves relevant chunks from a knowledge base.
pub struct KnowledgeRetrievalStep {
    search: Arc<dyn KnowledgeSearch>,
}

impl KnowledgeRetrievalStep {
    pub fn new(search: Arc<dyn KnowledgeSearch>) -> Self {
        Self { search }
    }
}

impl StepHandler for KnowledgeRetrievalStep {
    fn step_type(&self) -> &'static str {
        STEP_TYPE
    }

    fn display_name(&self) -> &'static str {
        "Knowledge Retrieval"
    }

    fn description(&self) -> &'static str {
        "Search a knowledge base and return the best matching chunks."
    }

    fn config_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "query": { "type": "string", "description": "Search text; supports ${var}" },
                "knowledgeBaseId": { "type": "string" },
                "topK": { "type": "integer", "default": DEFAULT_TOP_K },
                "threshold": { "type": "number", "default": DEFAULT_THRESHOLD }
            },
            "required": ["query", "knowledgeBaseId"]
        })
    }

    fn validate_config(&self, config: &Map<String, Value>) -> Result<()> {
        for key in ["query", "knowledgeBaseId"] {
            match config.get(key).and_then(Value::as_str) {
                Some(v) if !v.trim().is_empty() => {}
                _ => {
                    return Err(WeftError::invalid_config(
                        STEP_TYPE,
                        format!("{} is required", key),
                    ))
                }
            }
        }
        Ok(())
    }

    fn execute<'a>(&'a self, ctx: &'a mut ExecutionContext) -> BoxFuture<'a, Result<StepOutput>> {
        Box::pin(async move {
            let query = ctx.resolved_config("query").unwrap_or_default();
            if query.trim().is_empty() {
                return Err(WeftError::handler(STEP_TYPE, "query is empty"));
            }
            let kb_id = ctx.resolved_config("knowledgeBaseId").unwrap_or_default();
            if kb_id.trim().is_empty() {
                return Err(WeftError::handler(STEP_TYPE, "knowledgeBaseId is empty"));
            }
            let top_k = usize::try_from(
                ctx.config_i64("topK")
                    .filter(|k| *k > 0)
                    .unwrap_or(DEFAULT_TOP_K),
            )
            .unwrap_or(usize::MAX);
            let threshold = ctx.config_f64("threshold").unwrap_or(DEFAULT_THRESHOLD) as f32;

            let hits = self
                .search
                .search(&kb_id, &query, top_k, threshold)
                .await
                .map_err(|e| WeftError::handler(STEP_TYPE, e.to_string()))?;

            let context_text = hits
                .iter()
                .map(|h| h.content.as_str())
                .collect::<Vec<_>>()
                .join("\n\n");
            let count = hits.len();

            Ok(output(json!({
                "query": query,
                "results": hits,
                "count": count,
                "contextText": context_text,
            })))
        })
    }
}
