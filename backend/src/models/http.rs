//! HTTP model backend invoker.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use super::ModelInvoker;
use crate::error::ModelError;

/// Invoker that forwards model calls to a model-serving HTTP backend.
///
/// Calls `POST {base_url}/models/{model}/invoke` with `{"model", "input"}` and
/// expects `{"output": ...}` back. Timeouts are enforced by the registry.
pub struct HttpModelInvoker {
    http_client: Client,
    base_url: String,
}

impl HttpModelInvoker {
    pub fn new(base_url: &str) -> Self {
        Self {
            http_client: Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    fn invoke_url(&self, model: &str) -> String {
        format!("{}/models/{}/invoke", self.base_url, model)
    }
}

#[derive(Debug, Serialize)]
struct InvokeRequest<'a> {
    model: &'a str,
    input: &'a serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct InvokeResponse {
    #[serde(default)]
    output: Option<serde_json::Value>,
    #[serde(default)]
    error: Option<String>,
}

#[async_trait]
impl ModelInvoker for HttpModelInvoker {
    async fn invoke(
        &self,
        model: &str,
        input: &serde_json::Value,
    ) -> Result<serde_json::Value, ModelError> {
        let response = self
            .http_client
            .post(self.invoke_url(model))
            .json(&InvokeRequest { model, input })
            .send()
            .await
            .map_err(|e| ModelError::Backend(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let message = serde_json::from_str::<InvokeResponse>(&body)
                .ok()
                .and_then(|r| r.error)
                .unwrap_or(body);
            return Err(ModelError::Backend(format!("HTTP {}: {}", status, message)));
        }

        let body: InvokeResponse = response
            .json()
            .await
            .map_err(|e| ModelError::InvalidResponse(e.to_string()))?;

        match (body.output, body.error) {
            (_, Some(error)) => Err(ModelError::Backend(error)),
            (Some(output), None) => Ok(output),
            (None, None) => Err(ModelError::InvalidResponse("missing output".to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_util::mock_backend::{error_json, output_json};
    use serde_json::json;
    use wiremock::matchers::{body_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn test_invoke_success() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/models/skills-extraction/invoke"))
            .and(body_json(json!({
                "model": "skills-extraction",
                "input": {"text": "Rust and SQL"}
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(output_json(json!({
                "skills": ["rust", "sql"]
            }))))
            .mount(&server)
            .await;

        let invoker = HttpModelInvoker::new(&format!("{}/", server.uri()));
        let output = invoker
            .invoke("skills-extraction", &json!({"text": "Rust and SQL"}))
            .await
            .unwrap();
        assert_eq!(output, json!({"skills": ["rust", "sql"]}));
    }

    #[tokio::test]
    async fn test_invoke_http_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500).set_body_json(error_json("model crashed")))
            .mount(&server)
            .await;

        let invoker = HttpModelInvoker::new(&server.uri());
        let err = invoker.invoke("job-matching", &json!({})).await.unwrap_err();
        match err {
            ModelError::Backend(message) => {
                assert!(message.contains("500"));
                assert!(message.contains("model crashed"));
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_invoke_error_body_with_ok_status() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(error_json("malformed input")))
            .mount(&server)
            .await;

        let invoker = HttpModelInvoker::new(&server.uri());
        let err = invoker.invoke("job-matching", &json!({})).await.unwrap_err();
        assert!(matches!(err, ModelError::Backend(m) if m == "malformed input"));
    }

    #[tokio::test]
    async fn test_invoke_missing_output() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
            .mount(&server)
            .await;

        let invoker = HttpModelInvoker::new(&server.uri());
        let err = invoker.invoke("job-matching", &json!({})).await.unwrap_err();
        assert!(matches!(err, ModelError::InvalidResponse(_)));
    }

    #[tokio::test]
    async fn test_backend_unreachable() {
        let invoker = HttpModelInvoker::new("http://127.0.0.1:1");
        let err = invoker.invoke("job-matching", &json!({})).await.unwrap_err();
        assert!(matches!(err, ModelError::Backend(_)));
    }
}
