use std::path::{Component, Path};

use crate::config::schema::{Config, CHUNK_GRANULARITY};
use crate::error::ConfigError;

const SCHEMA_JSON: &str = include_str!("../../../../schema/config-v1.json");

pub fn load_config<P: AsRef<Path>>(path: P) -> Result<Config, ConfigError> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadFile {
        path: path.to_path_buf(),
        source: e,
    })?;

    let config = load_config_from_str(&content)?;
    log::info!("Loaded configuration from {}", path.display());
    Ok(config)
}

pub fn load_config_from_str(content: &str) -> Result<Config, ConfigError> {
    let json_value: serde_json::Value = serde_json::from_str(content)?;

    validate_schema(&json_value)?;

    let config: Config = serde_json::from_value(json_value)?;

    validate_config(&config)?;

    Ok(config)
}

fn validate_schema(json_value: &serde_json::Value) -> Result<(), ConfigError> {
    let schema: serde_json::Value =
        serde_json::from_str(SCHEMA_JSON).map_err(|e| ConfigError::Validation {
            message: format!("Invalid embedded schema JSON: {}", e),
        })?;

    let validator = jsonschema::validator_for(&schema).map_err(|e| ConfigError::Validation {
        message: format!("Failed to compile JSON schema: {}", e),
    })?;

    let error_messages: Vec<String> = validator
        .iter_errors(json_value)
        .map(|e| e.to_string())
        .collect();
    if !error_messages.is_empty() {
        return Err(ConfigError::SchemaValidation {
            errors: error_messages.join("; "),
        });
    }

    Ok(())
}

fn invalid(message: impl Into<String>) -> ConfigError {
    ConfigError::Validation {
        message: message.into(),
    }
}

pub fn validate_config(config: &Config) -> Result<(), ConfigError> {
    if config.version != "1.0" {
        return Err(invalid(format!(
            "Unsupported config version: {}",
            config.version
        )));
    }

    if config.watch_directory.as_os_str().is_empty() {
        return Err(invalid("watch_directory must not be empty"));
    }

    // The failed-items area is a single directory directly below the watch root.
    let failed = Path::new(&config.failed_directory);
    let mut components = failed.components();
    match (components.next(), components.next()) {
        (Some(Component::Normal(_)), None) => {}
        _ => {
            return Err(invalid(format!(
                "failed_directory must be a plain directory name, got '{}'",
                config.failed_directory
            )))
        }
    }

    if config.detection.poll_interval_ms == 0 {
        return Err(invalid("detection.poll_interval_ms must be greater than 0"));
    }
    if config.detection.debounce_secs == 0 {
        return Err(invalid("detection.debounce_secs must be greater than 0"));
    }
    if config.detection.hash_chunk_bytes == 0 {
        return Err(invalid("detection.hash_chunk_bytes must be greater than 0"));
    }

    if config.metadata.classification_poll_secs == 0 {
        return Err(invalid(
            "metadata.classification_poll_secs must be greater than 0",
        ));
    }
    if !(1..=100).contains(&config.metadata.preview_quality) {
        return Err(invalid("metadata.preview_quality must be between 1 and 100"));
    }

    let upload = &config.upload;
    if upload.chunk_size_bytes == 0 || upload.chunk_size_bytes % CHUNK_GRANULARITY != 0 {
        return Err(invalid(format!(
            "upload.chunk_size_bytes must be a non-zero multiple of {}",
            CHUNK_GRANULARITY
        )));
    }
    if upload.chunk_size_bytes > upload.small_upload_limit_bytes {
        return Err(invalid(
            "upload.chunk_size_bytes must not exceed upload.small_upload_limit_bytes",
        ));
    }

    if config.ocr.languages.is_empty() {
        return Err(invalid("ocr.languages must not be empty"));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_load_minimal_config() {
        let config_json = r#"
        {
            "version": "1.0",
            "watch_directory": "/app/data/scans"
        }
        "#;

        let config = load_config_from_str(config_json).unwrap();
        assert_eq!(config.watch_directory, PathBuf::from("/app/data/scans"));
        assert_eq!(config.failed_directory, "failed-documents");
        assert_eq!(
            config.failed_path(),
            PathBuf::from("/app/data/scans/failed-documents")
        );
        assert_eq!(config.broker.connect_attempts, 10);
        assert_eq!(config.broker.heartbeat_secs, 600);
        assert_eq!(config.detection.debounce_secs, 5);
        assert_eq!(config.metadata.classification_timeout_secs, 300);
        assert_eq!(config.metadata.preview_height, 512);
        assert_eq!(config.upload.chunk_size_bytes, 3_276_800);
        assert_eq!(config.upload.small_upload_limit_bytes, 262_144_000);
        assert_eq!(config.ocr.languages, vec!["eng", "deu"]);
        assert!(!config.keep_originals);
    }

    #[test]
    fn test_load_full_config() {
        let config_json = r#"
        {
            "version": "1.0",
            "watch_directory": "/scans",
            "failed_directory": "failed",
            "preview_directory": "/previews",
            "database_path": "/data/scansync.db",
            "keep_originals": true,
            "broker": { "url": "amqp://rabbitmq:5672/%2f", "heartbeat_secs": 60 },
            "detection": { "debounce_secs": 10 },
            "metadata": { "classification_timeout_secs": 180 },
            "ocr": { "languages": ["eng"], "timeout_secs": 60 },
            "upload": { "access_token_file": "/run/secrets/token" },
            "naming": { "openai_model": "gpt-4.1-mini" }
        }
        "#;

        let config = load_config_from_str(config_json).unwrap();
        assert!(config.keep_originals);
        assert_eq!(config.broker.url, "amqp://rabbitmq:5672/%2f");
        assert_eq!(config.broker.heartbeat_secs, 60);
        assert_eq!(config.detection.debounce_secs, 10);
        assert_eq!(config.metadata.classification_timeout_secs, 180);
        assert_eq!(config.ocr.timeout_secs, 60);
        assert_eq!(
            config.upload.access_token_file.as_deref(),
            Some("/run/secrets/token")
        );
        assert_eq!(config.naming.openai_model, "gpt-4.1-mini");
        assert_eq!(
            config.resolved_database_path(),
            Some(PathBuf::from("/data/scansync.db"))
        );
    }

    #[test]
    fn test_invalid_version() {
        let result = load_config_from_str(r#"{"version": "2.0", "watch_directory": "/scans"}"#);
        assert!(result.is_err());
    }

    #[test]
    fn test_missing_watch_directory_fails_schema() {
        let result = load_config_from_str(r#"{"version": "1.0"}"#);
        assert!(matches!(result, Err(ConfigError::SchemaValidation { .. })));
    }

    #[test]
    fn test_nested_failed_directory_rejected() {
        for failed in ["a/b", "/abs", "..", ""] {
            let json = format!(
                r#"{{"version": "1.0", "watch_directory": "/scans", "failed_directory": "{}"}}"#,
                failed
            );
            assert!(load_config_from_str(&json).is_err(), "accepted {:?}", failed);
        }
    }

    #[test]
    fn test_chunk_size_must_be_aligned() {
        let mut config = Config::with_watch_directory("/scans");
        config.upload.chunk_size_bytes = 1_000_000;
        assert!(validate_config(&config).is_err());

        config.upload.chunk_size_bytes = 5 * CHUNK_GRANULARITY;
        assert!(validate_config(&config).is_ok());
    }

    #[test]
    fn test_zero_debounce_rejected() {
        let mut config = Config::with_watch_directory("/scans");
        config.detection.debounce_secs = 0;
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_load_config_missing_file() {
        let result = load_config("/nonexistent/scansync.json");
        assert!(matches!(result, Err(ConfigError::ReadFile { .. })));
    }
}
