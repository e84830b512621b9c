//! Runtime settings that can change while stages are running.
//!
//! Settings live in the `app_settings` table so every stage process sees
//! the same values. Stages take one [`SettingsSnapshot`] per message via
//! [`SettingsService::get`], which re-reads the store and never changes
//! under their feet.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::watch;

use crate::db::{settings_repo, Database, DatabaseError};

const SETTINGS_KEY: &str = "app:settings";

fn default_ollama_port() -> u16 {
    11434
}

/// Which LLM backend, if any, proposes file names.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(tag = "method", rename_all = "lowercase")]
pub enum FileNamingBackend {
    #[default]
    None,
    #[serde(rename = "openai")]
    OpenAi {
        api_key: String,
        #[serde(default)]
        model: Option<String>,
    },
    Ollama {
        server_url: String,
        #[serde(default = "default_ollama_port")]
        server_port: u16,
        model: String,
    },
}

impl FileNamingBackend {
    pub fn is_enabled(&self) -> bool {
        !matches!(self, FileNamingBackend::None)
    }

    /// Value stored in `file_naming_jobs.method`.
    pub fn method(&self) -> &'static str {
        match self {
            FileNamingBackend::None => "none",
            FileNamingBackend::OpenAi { .. } => "openai",
            FileNamingBackend::Ollama { .. } => "ollama",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct Settings {
    #[serde(default)]
    pub file_naming: FileNamingBackend,
}

/// Immutable view of the settings at one revision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SettingsSnapshot {
    pub revision: i64,
    pub settings: Settings,
}

pub struct SettingsService {
    db: Database,
    tx: watch::Sender<Arc<SettingsSnapshot>>,
}

impl SettingsService {
    /// Loads the current settings, writing defaults when none are stored yet.
    pub fn open(db: Database) -> Result<Self, DatabaseError> {
        let snapshot = match load(&db)? {
            Some(snapshot) => snapshot,
            None => {
                let settings = Settings::default();
                let revision = settings_repo::put(&db, SETTINGS_KEY, &encode(&settings)?)?;
                log::info!("Initialized default settings");
                SettingsSnapshot { revision, settings }
            }
        };
        let (tx, _rx) = watch::channel(Arc::new(snapshot));
        Ok(Self { db, tx })
    }

    /// Current settings. Re-reads the store and notifies subscribers when
    /// another process changed them.
    pub fn get(&self) -> Result<Arc<SettingsSnapshot>, DatabaseError> {
        let current = self.tx.borrow().clone();
        match load(&self.db)? {
            Some(fresh) if fresh.revision != current.revision => {
                log::info!(
                    "Settings changed (revision {} -> {})",
                    current.revision,
                    fresh.revision
                );
                let fresh = Arc::new(fresh);
                self.tx.send_replace(fresh.clone());
                Ok(fresh)
            }
            _ => Ok(current),
        }
    }

    /// Applies `change` to the current settings and stores the result.
    pub fn update<F>(&self, change: F) -> Result<Arc<SettingsSnapshot>, DatabaseError>
    where
        F: FnOnce(&mut Settings),
    {
        let mut settings = self.get()?.settings.clone();
        change(&mut settings);
        let revision = settings_repo::put(&self.db, SETTINGS_KEY, &encode(&settings)?)?;
        let snapshot = Arc::new(SettingsSnapshot { revision, settings });
        self.tx.send_replace(snapshot.clone());
        Ok(snapshot)
    }

    /// Receiver that observes every snapshot this service publishes.
    pub fn subscribe(&self) -> watch::Receiver<Arc<SettingsSnapshot>> {
        self.tx.subscribe()
    }
}

fn encode(settings: &Settings) -> Result<String, DatabaseError> {
    serde_json::to_string(settings).map_err(|e| DatabaseError::Value {
        key: SETTINGS_KEY.to_string(),
        source: e,
    })
}

fn load(db: &Database) -> Result<Option<SettingsSnapshot>, DatabaseError> {
    let Some(stored) = settings_repo::get(db, SETTINGS_KEY)? else {
        return Ok(None);
    };
    let settings = serde_json::from_str(&stored.value).map_err(|e| DatabaseError::Value {
        key: SETTINGS_KEY.to_string(),
        source: e,
    })?;
    Ok(Some(SettingsSnapshot {
        revision: stored.revision,
        settings,
    }))
}
