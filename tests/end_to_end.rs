use std::sync::Arc;

use serde_json::json;

use weft_core::traits::RunStore;
use weft_core::types::{RunStatus, StepStatus};
use weft_core::workflow::WorkflowDefinition;
use weft_engine::{Engine, RunLogger};
use weft_steps::{RhaiEvaluator, StepRegistry, StepServices};
use weft_store::{FileDefinitionStore, SqliteRunStore};
use weft_test_utils::*;

/// start → retrieve → score (rhai) → check(score > 5) → (true) answer | (false) fallback → end
fn rag_pipeline() -> WorkflowDefinition {
    definition(
        "rag",
        vec![
            node("start", "start", json!({})),
            node(
                "retrieve",
                "knowledge_retrieval",
                json!({"query": "${input.question}", "knowledgeBaseId": "docs", "topK": 3, "threshold": 0.5}),
            ),
            node(
                "score",
                "code_execution",
                json!({"code": "let hits = retrieve_output.count; hits * 10"}),
            ),
            node(
                "check",
                "condition",
                json!({"leftValue": "${score_output.result}", "operator": "greater_than", "rightValue": "5", "valueType": "number"}),
            ),
            node(
                "answer",
                "llm_chat",
                json!({"prompt": "Context:\n${retrieve_output.contextText}\n\nQ: ${input.question}"}),
            ),
            node(
                "fallback",
                "variable_set",
                json!({"variables": [{"name": "answer_output", "value": "no context"}]}),
            ),
            node(
                "end",
                "end",
                json!({"message": "answered", "outputData": {"answer": "${answer_output.response}", "score": "${score_output.result}"}}),
            ),
        ],
        vec![
            edge("start", "retrieve"),
            edge("retrieve", "score"),
            edge("score", "check"),
            conditional_edge("check", "answer", true),
            conditional_edge("check", "fallback", false),
            edge("answer", "end"),
            edge("fallback", "end"),
        ],
    )
}

fn services(chat: Arc<MockChatModel>) -> StepServices {
    StepServices::unconfigured()
        .with_chat(chat)
        .with_knowledge(Arc::new(StaticKnowledge::scored(&[
            ("Tokio is an async runtime.", 0.92),
            ("Rhai is an embedded scripting language.", 0.71),
            ("Tomatoes need sun.", 0.12),
        ])))
        .with_scripts(Arc::new(RhaiEvaluator::default()))
}

#[tokio::test]
async fn rag_pipeline_runs_against_real_stores() {
    let workflows = workflows_dir(&[rag_pipeline()]).unwrap();
    let data = tempfile::tempdir().unwrap();
    let db_path = data.path().join("weft.db");

    let chat = Arc::new(MockChatModel::new("Tokio schedules tasks.").with_usage(12, 4));
    let registry = Arc::new(StepRegistry::with_builtins(&services(chat.clone())));
    let runs = Arc::new(SqliteRunStore::open(&db_path).unwrap());
    let logger = RunLogger::new(data.path().join("logs"), 3);
    let engine = Engine::new(
        registry,
        Arc::new(FileDefinitionStore::new(workflows.path())),
        runs,
    )
    .with_run_logger(logger.clone());

    let run = engine
        .execute(
            "rag",
            object(json!({"question": "What is Tokio?"})),
            Some("e2e".into()),
        )
        .await
        .unwrap();

    assert_eq!(run.status, RunStatus::Completed, "error: {:?}", run.error);
    let output = run.output.clone().unwrap();
    assert_eq!(output["message"], json!("answered"));
    assert_eq!(output["data"]["answer"], json!("Tokio schedules tasks."));
    assert_eq!(output["data"]["score"], json!("20"));

    let requests = chat.requests();
    assert_eq!(requests.len(), 1);
    assert!(requests[0].prompt.contains("Tokio is an async runtime."));
    assert!(requests[0].prompt.contains("Rhai is an embedded scripting language."));
    assert!(!requests[0].prompt.contains("Tomatoes"));
    assert!(requests[0].prompt.ends_with("Q: What is Tokio?"));

    // Everything survives a reopen of the database.
    drop(engine);
    let reopened = SqliteRunStore::open(&db_path).unwrap();
    let stored = reopened.get_run(&run.id).await.unwrap().unwrap();
    assert_eq!(stored.status, RunStatus::Completed);
    assert_eq!(stored.requested_by.as_deref(), Some("e2e"));
    assert_eq!(stored.context.variables["score_output"]["result"], json!(20));

    let steps = reopened.list_steps(&run.id).await.unwrap();
    let status_of = |id: &str| {
        steps
            .iter()
            .find(|s| s.node_id == id)
            .map(|s| s.status)
            .unwrap()
    };
    assert_eq!(steps.len(), 7);
    assert_eq!(status_of("fallback"), StepStatus::Skipped);
    for id in ["start", "retrieve", "score", "check", "answer", "end"] {
        assert_eq!(status_of(id), StepStatus::Completed, "node {}", id);
    }

    let history = reopened.list_runs(10).await.unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].id, run.id);

    // The logger stops on its own after run_finished.
    let log_path = logger.log_path(&run.id);
    let mut lines = 0;
    for _ in 0..100 {
        let text = std::fs::read_to_string(&log_path).unwrap_or_default();
        lines = text.lines().count();
        if text.contains("run_finished") {
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    }
    // run_started + 7 × (started|skipped) + 6 completions + run_finished
    assert_eq!(lines, 1 + 6 + 1 + 6 + 1);
}

#[tokio::test]
async fn low_scores_take_the_fallback_branch() {
    let workflows = workflows_dir(&[rag_pipeline()]).unwrap();
    let chat = Arc::new(MockChatModel::new("unused"));
    let services = services(chat.clone())
        .with_knowledge(Arc::new(StaticKnowledge::scored(&[("noise", 0.1)])));
    let engine = Engine::new(
        Arc::new(StepRegistry::with_builtins(&services)),
        Arc::new(FileDefinitionStore::new(workflows.path())),
        Arc::new(SqliteRunStore::in_memory().unwrap()),
    );

    let run = engine
        .execute("rag", object(json!({"question": "anything"})), None)
        .await
        .unwrap();

    assert_eq!(run.status, RunStatus::Completed, "error: {:?}", run.error);
    assert_eq!(run.context.variables["answer_output"], json!("no context"));
    assert!(chat.requests().is_empty());

    let steps = engine.steps(&run.id).await.unwrap();
    let answer = steps.iter().find(|s| s.node_id == "answer").unwrap();
    assert_eq!(answer.status, StepStatus::Skipped);
}

#[tokio::test]
async fn script_errors_fail_the_run_with_the_node_name() {
    let def = definition(
        "broken",
        vec![
            node("start", "start", json!({})),
            node("boom", "code_execution", json!({"code": "let x = ; x"})),
            node("end", "end", json!({})),
        ],
        vec![edge("start", "boom"), edge("boom", "end")],
    );
    let workflows = workflows_dir(&[def]).unwrap();
    let engine = Engine::new(
        Arc::new(StepRegistry::with_builtins(
            &StepServices::unconfigured().with_scripts(Arc::new(RhaiEvaluator::default())),
        )),
        Arc::new(FileDefinitionStore::new(workflows.path())),
        Arc::new(SqliteRunStore::in_memory().unwrap()),
    );

    let run = engine.execute("broken", Default::default(), None).await.unwrap();
    assert_eq!(run.status, RunStatus::Failed);
    assert!(run.error.as_deref().unwrap().starts_with("boom: "));

    let steps = engine.steps(&run.id).await.unwrap();
    assert_eq!(steps.len(), 2);
    assert!(steps.iter().all(|s| s.node_id != "end"));
}
