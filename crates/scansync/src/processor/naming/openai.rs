//! OpenAI Responses API backend.

use std::time::Duration;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::Serialize;
use tracing::Instrument;

use super::{http_client, truncate_body, FilenameBackend, NamingError, NAMING_PROMPT};
use crate::retry::{RetryError, RetryPolicy};

#[derive(Serialize)]
struct ResponsesRequest<'a> {
    model: &'a str,
    instructions: &'a str,
    input: &'a str,
}

pub struct OpenAiBackend {
    client: reqwest::Client,
    endpoint: String,
    api_key: SecretString,
    model: String,
    policy: RetryPolicy,
}

impl OpenAiBackend {
    /// Rate-limited requests are retried with exponential backoff (10s to 30s).
    pub fn new(
        base_url: &str,
        api_key: SecretString,
        model: &str,
        max_attempts: u32,
    ) -> Result<Self, NamingError> {
        let policy =
            RetryPolicy::exponential(max_attempts, Duration::from_secs(10), Duration::from_secs(30));
        Self::with_policy(base_url, api_key, model, policy)
    }

    pub fn with_policy(
        base_url: &str,
        api_key: SecretString,
        model: &str,
        policy: RetryPolicy,
    ) -> Result<Self, NamingError> {
        Ok(Self {
            client: http_client()?,
            endpoint: format!("{}/v1/responses", base_url.trim_end_matches('/')),
            api_key,
            model: model.to_string(),
            policy,
        })
    }

    async fn request_once(&self, text: &str) -> Result<String, NamingError> {
        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(self.api_key.expose_secret())
            .json(&ResponsesRequest {
                model: &self.model,
                instructions: NAMING_PROMPT,
                input: text,
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

/// Interprets a Responses API reply.
pub fn classify_response(status: u16, body: &str, model: &str) -> Result<String, NamingError> {
    match status {
        200..=299 => {
            let value: serde_json::Value = serde_json::from_str(body)
                .map_err(|e| NamingError::InvalidResponse(e.to_string()))?;
            let text = output_text(&value);
            if text.trim().is_empty() {
                Err(NamingError::EmptyResponse)
            } else {
                Ok(text.trim().to_string())
            }
        }
        401 | 403 => Err(NamingError::Auth),
        429 => Err(NamingError::RateLimited),
        404 => Err(NamingError::ModelNotFound(model.to_string())),
        _ => Err(NamingError::Http {
            status,
            body: truncate_body(body),
        }),
    }
}

/// Concatenates every `output_text` part of the `output` array.
fn output_text(value: &serde_json::Value) -> String {
    let Some(output) = value.get("output").and_then(|o| o.as_array()) else {
        return String::new();
    };
    output
        .iter()
        .filter_map(|entry| entry.get("content").and_then(|c| c.as_array()))
        .flatten()
        .filter(|part| part.get("type").and_then(|t| t.as_str()) == Some("output_text"))
        .filter_map(|part| part.get("text").and_then(|t| t.as_str()))
        .collect()
}

#[async_trait]
impl FilenameBackend for OpenAiBackend {
    fn method(&self) -> &'static str {
        "openai"
    }

    fn model(&self) -> &str {
        &self.model
    }

    async fn propose(&self, text: &str) -> Result<String, NamingError> {
        let span = tracing::info_span!("naming.openai", model = %self.model);
        self.policy
            .run(
                "openai.responses",
                |_| self.request_once(text),
                |e| matches!(e, NamingError::RateLimited),
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
    fn test_classify_success() {
        let body = r#"{
            "output": [
                {"type": "reasoning", "content": []},
                {"type": "message", "content": [
                    {"type": "output_text", "text": " Rechnung_ACME_2024 "}
                ]}
            ]
        }"#;
        assert_eq!(
            classify_response(200, body, "gpt-4.1-nano").unwrap(),
            "Rechnung_ACME_2024"
        );
    }

    #[test]
    fn test_classify_errors() {
        assert!(matches!(
            classify_response(401, "{}", "m"),
            Err(NamingError::Auth)
        ));
        assert!(matches!(
            classify_response(429, "{}", "m"),
            Err(NamingError::RateLimited)
        ));
        assert!(matches!(
            classify_response(404, "{}", "m"),
            Err(NamingError::ModelNotFound(ref m)) if m == "m"
        ));
        assert!(matches!(
            classify_response(500, "boom", "m"),
            Err(NamingError::Http { status: 500, .. })
        ));
        assert!(matches!(
            classify_response(200, r#"{"output": []}"#, "m"),
            Err(NamingError::EmptyResponse)
        ));
        assert!(matches!(
            classify_response(200, "not json", "m"),
            Err(NamingError::InvalidResponse(_))
        ));
    }

    #[test]
    fn test_endpoint() {
        let backend = OpenAiBackend::new(
            "https://api.openai.com/",
            SecretString::from("sk".to_string()),
            "gpt-4.1-nano",
            3,
        )
        .unwrap();
        assert_eq!(backend.endpoint, "https://api.openai.com/v1/responses");
    }
}
