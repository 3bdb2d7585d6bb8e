use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::future::BoxFuture;
use serde_json::{json, Map, Value};
use tracing::warn;

use weft_core::error::{Result, WeftError};
use weft_core::traits::HttpClient;
use weft_core::types::HttpRequest;

use crate::coerce::to_text;
use crate::context::ExecutionContext;
use crate::handler::{output, StepHandler, StepOutput};

const STEP_TYPE: &str = "http_request";
const DEFAULT_TIMEOUT_SECS: u64 = 30;
const METHODS: &[&str] = &["GET", "POST", "PUT", "PATCH", "DELETE", "HEAD", "OPTIONS"];

/// Calls an HTTP endpoint through the configured client.
pub struct HttpRequestStep {
    client: Arc<dyn HttpClient>,
}

impl HttpRequestStep {
    pub fn new(client: Arc<dyn HttpClient>) -> Self {
        Self { client }
    }
}

fn build_request(ctx: &ExecutionContext) -> Result<HttpRequest> {
    let url = ctx.resolved_config("url").unwrap_or_default();
    if url.trim().is_empty() {
        return Err(WeftError::handler(STEP_TYPE, "url is empty"));
    }

    let method = ctx
        .config_string("method")
        .unwrap_or_else(|| "GET".to_string())
        .to_uppercase();
    if !METHODS.contains(&method.as_str()) {
        return Err(WeftError::handler(
            STEP_TYPE,
            format!("unsupported method '{}'", method),
        ));
    }

    let mut headers = BTreeMap::new();
    if let Some(Value::Object(map)) = ctx.get_config("headers") {
        for (name, value) in map {
            headers.insert(name.clone(), ctx.resolve_variables(&to_text(value)));
        }
    }

    let body = match ctx.get_config("body") {
        None | Some(Value::Null) => None,
        Some(Value::String(text)) => Some(ctx.resolve_variables(text)),
        Some(structured) => {
            if !headers.keys().any(|k| k.eq_ignore_ascii_case("content-type")) {
                headers.insert("Content-Type".into(), "application/json".into());
            }
            Some(serde_json::to_string(structured)?)
        }
    };

    let timeout_secs = ctx
        .config_i64("timeout")
        .filter(|t| *t > 0)
        .map(|t| t as u64)
        .unwrap_or(DEFAULT_TIMEOUT_SECS);

    Ok(HttpRequest {
        method,
        url,
        headers,
        body,
        timeout: Duration::from_secs(timeout_secs),
    })
}

impl StepHandler for HttpRequestStep {
    fn step_type(&self) -> &'static str {
        STEP_TYPE
    }

    fn display_name(&self) -> &'static str {
        "HTTP Request"
    }

    fn description(&self) -> &'static str {
        "Make an HTTP request. Returns status, headers, and body."
    }

    fn config_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "url": { "type": "string", "description": "Target URL; supports ${var}" },
                "method": { "type": "string", "enum": METHODS, "default": "GET" },
                "headers": { "type": "object", "description": "Header values support ${var}" },
                "body": { "description": "Text (with ${var}) or JSON sent as application/json" },
                "timeout": { "type": "integer", "description": "Seconds (default: 30)" },
                "continueOnError": { "type": "boolean" }
            },
            "required": ["url"]
        })
    }

    fn validate_config(&self, config: &Map<String, Value>) -> Result<()> {
        match config.get("url").and_then(Value::as_str) {
            Some(url) if !url.trim().is_empty() => {}
            _ => return Err(WeftError::invalid_config(STEP_TYPE, "url is required")),
        }
        if let Some(method) = config.get("method").and_then(Value::as_str) {
            if !METHODS.contains(&method.to_uppercase().as_str()) {
                return Err(WeftError::invalid_config(
                    STEP_TYPE,
                    format!("unsupported method '{}'", method),
                ));
            }
        }
        if let Some(headers) = config.get("headers") {
            if !headers.is_object() && !headers.is_null() {
                return Err(WeftError::invalid_config(
                    STEP_TYPE,
                    "headers must be an object",
                ));
            }
        }
        Ok(())
    }

    fn execute<'a>(&'a self, ctx: &'a mut ExecutionContext) -> BoxFuture<'a, Result<StepOutput>> {
        Box::pin(async move {
            let request = build_request(ctx)?;
            let started = Instant::now();

            match self.client.send(request).await {
                Ok(response) => {
                    let body = serde_json::from_str::<Value>(&response.body)
                        .unwrap_or(Value::String(response.body));
                    Ok(output(json!({
                        "statusCode": response.status,
                        "headers": response.headers,
                        "body": body,
                        "durationMs": started.elapsed().as_millis() as u64,
                        "success": (200..300).contains(&response.status),
                    })))
                }
                Err(e) if ctx.node().continue_on_error() => {
                    warn!(node_id = %ctx.node().id, error = %e, "HTTP request failed, continuing");
                    Ok(output(json!({
                        "success": false,
                        "error": e.to_string(),
                        "statusCode": 0,
                        "durationMs": started.elapsed().as_millis() as u64,
                    })))
                }
                Err(e) => Err(WeftError::handler(STEP_TYPE, e.to_string())),
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::VariableStore;
    use std::sync::Mutex;
    use weft_core::types::{HttpResponse, RunId};
    use weft_core::workflow::Node;

    struct Echo {
        seen: Mutex<Vec<HttpRequest>>,
        fail: bool,
    }

    impl HttpClient for Echo {
        fn send(&self, request: HttpRequest) -> BoxFuture<'_, Result<HttpResponse>> {
            self.seen.lock().unwrap().push(request);
            let fail = self.fail;
            Box::pin(async move {
                if fail {
                    return Err(WeftError::Http("connection refused".into()));
                }
                Ok(HttpResponse {
                    status: 201,
                    headers: BTreeMap::from([("x-id".to_string(), "7".to_string())]),
                    body: r#"{"ok":true}"#.into(),
                })
            })
        }
    }

    fn ctx(config: Value) -> ExecutionContext {
        let node = Node::new("h", STEP_TYPE).with_config(config);
        let store = VariableStore::from_map(json!({"id": 42, "token": "t0k"}).as_object().unwrap());
        ExecutionContext::new(RunId::new(), "wf", node, store, Arc::new(json!({})))
    }

    #[tokio::test]
    async fn test_request_is_resolved_and_response_decoded() {
        let client = Arc::new(Echo { seen: Mutex::new(Vec::new()), fail: false });
        let step = HttpRequestStep::new(client.clone());
        let mut ctx = ctx(json!({
            "url": "https://api.example.com/items/${id}",
            "method": "post",
            "headers": {"Authorization": "Bearer ${token}"},
            "body": {"name": "widget"},
            "timeout": 5
        }));

        let out = step.execute(&mut ctx).await.unwrap();
        assert_eq!(out["statusCode"], json!(201));
        assert_eq!(out["body"], json!({"ok": true}));
        assert_eq!(out["success"], json!(true));
        assert_eq!(out["headers"]["x-id"], json!("7"));

        let seen = client.seen.lock().unwrap();
        let req = &seen[0];
        assert_eq!(req.method, "POST");
        assert_eq!(req.url, "https://api.example.com/items/42");
        assert_eq!(req.headers["Authorization"], "Bearer t0k");
        assert_eq!(req.headers["Content-Type"], "application/json");
        assert_eq!(req.body.as_deref(), Some(r#"{"name":"widget"}"#));
        assert_eq!(req.timeout, Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_transport_error_fails_step() {
        let step = HttpRequestStep::new(Arc::new(Echo { seen: Mutex::new(Vec::new()), fail: true }));
        let mut ctx = ctx(json!({"url": "http://localhost:1"}));
        let err = step.execute(&mut ctx).await.unwrap_err();
        assert!(err.to_string().contains("connection refused"));
    }

    #[tokio::test]
    async fn test_transport_error_with_continue_on_error() {
        let step = HttpRequestStep::new(Arc::new(Echo { seen: Mutex::new(Vec::new()), fail: true }));
        let mut ctx = ctx(json!({"url": "http://localhost:1", "continueOnError": true}));
        let out = step.execute(&mut ctx).await.unwrap();
        assert_eq!(out["success"], json!(false));
        assert_eq!(out["statusCode"], json!(0));
        assert!(out["error"].as_str().unwrap().contains("connection refused"));
    }

    #[test]
    fn test_validate_config() {
        let step = HttpRequestStep::new(Arc::new(crate::services::Disabled));
        assert!(step.validate_config(json!({"url": "http://x"}).as_object().unwrap()).is_ok());
        assert!(step.validate_config(json!({}).as_object().unwrap()).is_err());
        assert!(step
            .validate_config(json!({"url": "http://x", "method": "FETCH"}).as_object().unwrap())
            .is_err());
    }
}
