use thiserror::Error;

#[derive(Debug, Error)]
pub enum WeftError {
    // Authoring errors
    #[error("Invalid workflow definition: {0}")]
    Definition(String),

    #[error("Invalid config for step '{step_type}': {message}")]
    ConfigValidation { step_type: String, message: String },

    // Execution errors
    #[error("Step '{step_type}' failed: {message}")]
    HandlerExecution { step_type: String, message: String },

    #[error("Unknown step type: {0}")]
    UnknownStepType(String),

    #[error("Run cancelled: {0}")]
    Cancelled(String),

    // Lookup errors
    #[error("Workflow not found: {0}")]
    WorkflowNotFound(String),

    #[error("Run not found: {0}")]
    RunNotFound(String),

    #[error("Run is not active: {0}")]
    RunNotActive(String),

    // Boundary errors
    #[error("{0} is not configured")]
    Unavailable(String),

    #[error("HTTP request failed: {0}")]
    Http(String),

    #[error("LLM request failed: {0}")]
    LlmRequest(String),

    #[error("LLM streaming error: {0}")]
    LlmStream(String),

    #[error("Knowledge search failed: {0}")]
    Knowledge(String),

    #[error("Script error: {0}")]
    Script(String),

    // Config errors
    #[error("Config error: {0}")]
    Config(String),

    #[error("Config file not found: {0}")]
    ConfigNotFound(String),

    // Storage errors
    #[error("Database error: {0}")]
    Database(String),

    // I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // JSON errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl WeftError {
    /// Shorthand for a handler failure.
    pub fn handler(step_type: impl Into<String>, message: impl Into<String>) -> Self {
        Self::HandlerExecution {
            step_type: step_type.into(),
            message: message.into(),
        }
    }

    /// Shorthand for a rejected step config.
    pub fn invalid_config(step_type: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ConfigValidation {
            step_type: step_type.into(),
            message: message.into(),
        }
    }

    /// Unknown step types halt a run even when the node tolerates errors.
    pub fn is_unknown_step_type(&self) -> bool {
        matches!(self, Self::UnknownStepType(_))
    }
}

pub type Result<T> = std::result::Result<T, WeftError>;
