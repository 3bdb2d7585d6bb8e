pub mod code_execution;
pub mod condition;
pub mod end;
pub mod http_request;
pub mod knowledge_retrieval;
pub mod llm_chat;
pub mod start;
pub mod variable_set;

pub use code_execution::CodeExecutionStep;
pub use condition::ConditionStep;
pub use end::EndStep;
pub use http_request::HttpRequestStep;
pub use knowledge_retrieval::KnowledgeRetrievalStep;
pub use llm_chat::LlmChatStep;
pub use start::StartStep;
pub use variable_set::VariableSetStep;
