use std::collections::BTreeMap;
use std::time::Duration;

use futures::future::BoxFuture;
use tracing::debug;

use weft_core::config::HttpConfig;
use weft_core::error::{Result, WeftError};
use weft_core::traits::HttpClient;
use weft_core::types::{HttpRequest, HttpResponse};

/// `HttpClient` backed by a shared reqwest client.
pub struct ReqwestHttpClient {
    client: reqwest::Client,
}

impl ReqwestHttpClient {
    pub fn new(config: &HttpConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs.max(1)))
            .user_agent(config.user_agent.clone())
            .build()
            .map_err(|e| WeftError::Http(e.to_string()))?;
        Ok(Self { client })
    }
}

impl HttpClient for ReqwestHttpClient {
    fn send(&self, request: HttpRequest) -> BoxFuture<'_, Result<HttpResponse>> {
        Box::pin(async move {
            let method = request
                .method
                .parse::<reqwest::Method>()
                .map_err(|e| WeftError::Http(format!("Invalid method: {}", e)))?;

            debug!(method = %method, url = %request.url, "Sending HTTP request");

            let mut req = self
                .client
                .request(method, &request.url)
                .timeout(request.timeout);
            for (k, v) in &request.headers {
                req = req.header(k.as_str(), v.as_str());
            }
            if let Some(body) = request.body {
                req = req.body(body);
            }

            let resp = req.send().await.map_err(|e| {
                if e.is_timeout() {
                    WeftError::Http(format!(
                        "request timed out after {}s",
                        request.timeout.as_secs()
                    ))
                } else {
                    WeftError::Http(e.to_string())
                }
            })?;

            let status = resp.status().as_u16();
            let headers: BTreeMap<String, String> = resp
                .headers()
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_str().unwrap_or("?").to_string()))
                .collect();
            let body = resp
                .text()
                .await
                .map_err(|e| WeftError::Http(e.to_string()))?;

            Ok(HttpResponse {
                status,
                headers,
                body,
            })
        })
    }
}
