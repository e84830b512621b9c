//! Ollama `/api/generate` backend.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::Instrument;

use super::{http_client, truncate_body, FilenameBackend, NamingError, NAMING_PROMPT};
use crate::retry::{RetryError, RetryPolicy};

#[derive(Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    system: &'a str,
    stream: bool,
}

#[derive(Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    response: String,
}

pub struct OllamaBackend {
    client: reqwest::Client,
    endpoint: String,
    model: String,
    policy: RetryPolicy,
}

impl OllamaBackend {
    /// Connection failures are retried with exponential backoff (2s to 10s).
    pub fn new(
        server_url: &str,
        server_port: u16,
        model: &str,
        max_attempts: u32,
    ) -> Result<Self, NamingError> {
        let policy =
            RetryPolicy::exponential(max_attempts, Duration::from_secs(2), Duration::from_secs(10));
        Self::with_policy(server_url, server_port, model, policy)
    }

    pub fn with_policy(
        server_url: &str,
        server_port: u16,
        model: &str,
        policy: RetryPolicy,
    ) -> Result<Self, NamingError> {
        Ok(Self {
            client: http_client()?,
            endpoint: generate_endpoint(server_url, server_port),
            model: model.to_string(),
            policy,
        })
    }

    async fn request_once(&self, text: &str) -> Result<String, NamingError> {
        let response = self
            .client
            .post(&self.endpoint)
            .json(&GenerateRequest {
                model: &self.model,
                prompt: text,
                system: NAMING_PROMPT,
                stream: false,
            })
            .send()
            .await
            .map_err(|e| NamingError::Connection(e.to_string()))?;

        let status = response.status().as_u16();
        let body = response
            .text()
            .await
            .map_err(|e| NamingError::Connection(e.to_string()))?;
        classify_response(status, &body, &self.model)
    }
}

/// `http://host:port/api/generate`, adding a scheme when none is given.
fn generate_endpoint(server_url: &str, server_port: u16) -> String {
    let base = server_url.trim_end_matches('/');
    let base = if base.contains("://") {
        base.to_string()
    } else {
        format!("http://{}", base)
    };
    format!("{}:{}/api/generate", base, server_port)
}

/// Interprets an `/api/generate` reply.
///
/// Ollama answers an unknown model with 404 and a JSON error body.
pub fn classify_response(status: u16, body: &str, model: &str) -> Result<String, NamingError> {
    match status {
        200 => {
            let parsed: GenerateResponse = serde_json::from_str(body)
                .map_err(|e| NamingError::InvalidResponse(e.to_string()))?;
            let text = parsed.response.trim();
            if text.is_empty() {
                Err(NamingError::EmptyResponse)
            } else {
                Ok(text.to_string())
            }
        }
        404 if serde_json::from_str::<serde_json::Value>(body).is_ok() => {
            Err(NamingError::ModelNotFound(model.to_string()))
        }
        _ => Err(NamingError::Http {
            status,
            body: truncate_body(body),
        }),
    }
}

#[async_trait]
impl FilenameBackend for OllamaBackend {
    fn method(&self) -> &'static str {
        "ollama"
    }

    fn model(&self) -> &str {
        &self.model
    }

    async fn propose(&self, text: &str) -> Result<String, NamingError> {
        let span = tracing::info_span!("naming.ollama", model = %self.model);
        self.policy
            .run(
                "ollama.generate",
                |_| self.request_once(text),
                |e| matches!(e, NamingError::Connection(_)),
            )
            .instrument(span)
            .await
            .map_err(RetryError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_endpoint() {
        assert_eq!(
            generate_endpoint("http://ollama/", 11434),
            "http://ollama:11434/api/generate"
        );
        assert_eq!(
            generate_endpoint("192.168.1.20", 8080),
            "http://192.168.1.20:8080/api/generate"
        );
    }

    #[test]
    fn test_classify_success() {
        let body = r#"{"model":"llama3","response":"Kontoauszug_Maerz\n","done":true}"#;
        assert_eq!(classify_response(200, body, "llama3").unwrap(), "Kontoauszug_Maerz");
    }

    #[test]
    fn test_classify_not_found() {
        let body = r#"{"error":"model \"llama3\" not found, try pulling it first"}"#;
        assert!(matches!(
            classify_response(404, body, "llama3"),
            Err(NamingError::ModelNotFound(ref m)) if m == "llama3"
        ));
        assert!(matches!(
            classify_response(404, "<html>not found</html>", "llama3"),
            Err(NamingError::Http { status: 404, .. })
        ));
    }

    #[test]
    fn test_classify_other_failures() {
        assert!(matches!(
            classify_response(500, "{}", "m"),
            Err(NamingError::Http { status: 500, .. })
        ));
        assert!(matches!(
            classify_response(200, r#"{"response":"  "}"#, "m"),
            Err(NamingError::EmptyResponse)
        ));
    }
}
