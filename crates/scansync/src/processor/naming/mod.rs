//! LLM backends that propose a file name from document text.

pub mod ollama;
pub mod openai;

use std::time::Duration;

use async_trait::async_trait;
use secrecy::SecretString;
use thiserror::Error;

use crate::config::NamingConfig;
use crate::item::FileNamingStatus;
use crate::settings::FileNamingBackend;

pub use ollama::OllamaBackend;
pub use openai::OpenAiBackend;

/// System prompt sent with every naming request.
pub const NAMING_PROMPT: &str = "Identify a suitable filename for the following pdf content. \
Keep the language of the file name in the original language and do not add any other language. \
Make the filename safe for SMB. Do not add a file extension. Separate words with a underscore. \
Have a maximum filename length of 30 characters. Only return the filename without any additional text.";

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

#[derive(Error, Debug)]
pub enum NamingError {
    #[error("Authentication with the naming backend failed")]
    Auth,

    #[error("Rate limit of the naming backend exceeded")]
    RateLimited,

    #[error("Model '{0}' not found")]
    ModelNotFound(String),

    #[error("Could not reach naming server: {0}")]
    Connection(String),

    #[error("Naming backend returned HTTP {status}: {body}")]
    Http { status: u16, body: String },

    #[error("Naming backend returned no text")]
    EmptyResponse,

    #[error("Invalid response from naming backend: {0}")]
    InvalidResponse(String),

    #[error("Failed to build HTTP client: {0}")]
    Client(String),
}

impl NamingError {
    /// Job status recorded for this failure.
    pub fn status(&self) -> FileNamingStatus {
        match self {
            NamingError::Auth => FileNamingStatus::AuthenticationError,
            NamingError::RateLimited => FileNamingStatus::RateLimitError,
            NamingError::ModelNotFound(_) => FileNamingStatus::ModelNotFound,
            NamingError::Connection(_) => FileNamingStatus::NoServerConnection,
            NamingError::Http { .. }
            | NamingError::EmptyResponse
            | NamingError::InvalidResponse(_)
            | NamingError::Client(_) => FileNamingStatus::Failed,
        }
    }
}

#[async_trait]
pub trait FilenameBackend: Send + Sync {
    /// Value stored in `file_naming_jobs.method`.
    fn method(&self) -> &'static str;

    fn model(&self) -> &str;

    /// Proposes a file name (without extension) for `text`.
    async fn propose(&self, text: &str) -> Result<String, NamingError>;
}

/// Builds the backend selected in the runtime settings.
pub fn backend_for(
    selected: &FileNamingBackend,
    config: &NamingConfig,
) -> Result<Option<Box<dyn FilenameBackend>>, NamingError> {
    let backend: Box<dyn FilenameBackend> = match selected {
        FileNamingBackend::None => return Ok(None),
        FileNamingBackend::OpenAi { api_key, model } => Box::new(OpenAiBackend::new(
            &config.openai_base_url,
            SecretString::from(api_key.clone()),
            model.as_deref().unwrap_or(&config.openai_model),
            config.max_attempts,
        )?),
        FileNamingBackend::Ollama {
            server_url,
            server_port,
            model,
        } => Box::new(OllamaBackend::new(
            server_url,
            *server_port,
            model,
            config.max_attempts,
        )?),
    };
    Ok(Some(backend))
}

pub(crate) fn http_client() -> Result<reqwest::Client, NamingError> {
    reqwest::Client::builder()
        .connect_timeout(CONNECT_TIMEOUT)
        .timeout(REQUEST_TIMEOUT)
        .build()
        .map_err(|e| NamingError::Client(e.to_string()))
}

pub(crate) fn truncate_body(body: &str) -> String {
    body.chars().take(200).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_status_mapping() {
        assert_eq!(NamingError::Auth.status(), FileNamingStatus::AuthenticationError);
        assert_eq!(NamingError::RateLimited.status(), FileNamingStatus::RateLimitError);
        assert_eq!(
            NamingError::ModelNotFound("llama3".into()).status(),
            FileNamingStatus::ModelNotFound
        );
        assert_eq!(
            NamingError::Connection("refused".into()).status(),
            FileNamingStatus::NoServerConnection
        );
        assert_eq!(
            NamingError::Http { status: 500, body: String::new() }.status(),
            FileNamingStatus::Failed
        );
    }

    #[test]
    fn test_backend_for_settings() {
        let config = NamingConfig::default();
        assert!(backend_for(&FileNamingBackend::None, &config).unwrap().is_none());

        let openai = backend_for(
            &FileNamingBackend::OpenAi {
                api_key: "sk-test".into(),
                model: None,
            },
            &config,
        )
        .unwrap()
        .unwrap();
        assert_eq!(openai.method(), "openai");
        assert_eq!(openai.model(), "gpt-4.1-nano");

        let ollama = backend_for(
            &FileNamingBackend::Ollama {
                server_url: "http://ollama".into(),
                server_port: 11434,
                model: "llama3".into(),
            },
            &config,
        )
        .unwrap()
        .unwrap();
        assert_eq!(ollama.method(), "ollama");
        assert_eq!(ollama.model(), "llama3");
    }

    #[test]
    fn test_prompt_limits_length() {
        assert!(NAMING_PROMPT.contains("maximum filename length of 30 characters"));
        assert!(!NAMING_PROMPT.contains("  "));
    }
}
