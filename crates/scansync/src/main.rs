//! scansync - scan ingestion pipeline
//!
//! Every pipeline stage runs as its own process:
//!
//!     scansync detect     # watch the scan share, publish new files
//!     scansync metadata   # create records, resolve targets, previews
//!     scansync ocr        # add a text layer
//!     scansync name       # let an LLM propose a file name
//!     scansync upload     # push to remote storage, clean up
//!
//! The remaining subcommands manage targets, settings and the database.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, NaiveDateTime, Utc};
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;

use scansync::broadcast::FanoutNotifier;
use scansync::config::BrokerConfig;
use scansync::db::target_repo::{self, NewTarget};
use scansync::db::{scanned_repo, DatabaseError};
use scansync::logging::{self, LogFormat};
use scansync::processor::{OcrMyPdf, PopplerPreview};
use scansync::storage::{FailedArea, GraphStorage, TargetManager};
use scansync::transport::amqp::{subscribe_updates, AmqpBroker};
use scansync::transport::{Deliveries, UPDATES_EXCHANGE};
use scansync::worker::naming::BackendSource;
use scansync::{
    load_config, Broker, Config, ConfigError, Database, DirectoryScanner, FileNamingBackend,
    MetadataStage, NamingStage, OcrStage, Result, ScanSyncError, SettingsService, Stage,
    StatusSink, Supervisor, UploadStage,
};

#[derive(Parser)]
#[command(name = "scansync")]
#[command(about = "Scan ingestion pipeline: detect, classify, OCR, name and upload documents")]
#[command(version, propagate_version = true)]
struct Cli {
    /// Configuration file
    #[arg(
        short,
        long,
        global = true,
        env = "SCANSYNC_CONFIG",
        default_value = "/app/config/scansync.json"
    )]
    config: PathBuf,

    /// Log output format (text or json)
    #[arg(long, global = true, default_value = "text", env = "SCANSYNC_LOG_FORMAT")]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Watch the scan directory and publish detected files
    Detect,
    /// Run the metadata stage
    Metadata,
    /// Run the OCR stage
    Ocr,
    /// Run the file-naming stage
    Name,
    /// Run the upload stage
    Upload,
    /// Create or upgrade the database schema
    Migrate,
    /// Manage watched folders and their remote destinations
    Targets {
        #[command(subcommand)]
        action: TargetCommand,
    },
    /// Show or change runtime settings
    Settings {
        #[command(subcommand)]
        action: SettingsCommand,
    },
    /// Inspect processed items
    Items {
        #[command(subcommand)]
        action: ItemsCommand,
    },
    /// Print live item updates as JSON lines
    Updates,
}

#[derive(Subcommand)]
enum TargetCommand {
    List,
    Add {
        /// Folder name below the watch directory
        name: String,
        #[arg(long)]
        drive_id: String,
        #[arg(long)]
        folder_id: String,
        /// Human readable remote path, e.g. /Documents/Finance
        #[arg(long)]
        remote_path: String,
        #[arg(long)]
        web_url: Option<String>,
    },
    Rename {
        id: i64,
        new_name: String,
    },
    Remove {
        id: i64,
    },
}

#[derive(Subcommand)]
enum SettingsCommand {
    Show,
    /// Select the file-naming backend
    Naming {
        #[command(subcommand)]
        backend: NamingCommand,
    },
}

#[derive(Subcommand)]
enum NamingCommand {
    None,
    Openai {
        #[arg(long, env = "SCANSYNC_OPENAI_API_KEY", hide_env_values = true)]
        api_key: String,
        #[arg(long)]
        model: Option<String>,
    },
    Ollama {
        #[arg(long)]
        url: String,
        #[arg(long, default_value_t = 11434)]
        port: u16,
        #[arg(long)]
        model: String,
    },
}

#[derive(Subcommand)]
enum ItemsCommand {
    List {
        /// Only items that ended in a failure status
        #[arg(long)]
        failed: bool,
        #[arg(long, default_value_t = 20)]
        limit: u32,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    if let Err(e) = logging::init(cli.log_format) {
        eprintln!("Failed to initialize logging: {}", e);
    }

    let exit_code = match run(cli).await {
        Ok(()) => 0,
        Err(e) => {
            tracing::error!(error = %e, "Exiting");
            e.exit_code()
        }
    };
    std::process::exit(exit_code);
}

async fn run(cli: Cli) -> Result<()> {
    let config = load_config(&cli.config)?;
    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        config = %cli.config.display(),
        "Starting scansync"
    );

    match cli.command {
        Command::Detect => {
            let scanner = DirectoryScanner::from_config(&config)?;
            let broker = amqp_broker(&config.broker, config.broker.heartbeat_secs);
            let poll = Duration::from_millis(config.detection.poll_interval_ms);
            scanner
                .run(broker, &config.broker, poll, shutdown_token())
                .await?;
        }
        Command::Metadata => {
            let db = open_database(&config)?;
            let preview = PopplerPreview::new(
                config.metadata.preview_height,
                config.metadata.preview_quality,
            );
            let stage = MetadataStage::new(&config, status_sink(&config, db), Arc::new(preview));
            run_stage(&stage, &config.broker, config.broker.heartbeat_secs).await?;
        }
        Command::Ocr => {
            let db = open_database(&config)?;
            let settings = Arc::new(SettingsService::open(db.clone())?);
            let stage = OcrStage::new(
                status_sink(&config, db),
                Arc::new(OcrMyPdf::new(&config.ocr)),
                settings,
            );
            run_stage(&stage, &config.broker, config.broker.heartbeat_secs).await?;
        }
        Command::Name => {
            let db = open_database(&config)?;
            let backends = BackendSource::Settings {
                service: Arc::new(SettingsService::open(db.clone())?),
                config: config.naming.clone(),
            };
            let stage = NamingStage::new(status_sink(&config, db), backends);
            // Separate heartbeat for long-running LLM calls.
            run_stage(&stage, &config.broker, config.broker.naming_heartbeat_secs).await?;
        }
        Command::Upload => {
            let db = open_database(&config)?;
            let token = scansync::secrets::resolve_access_token(&config.upload)?;
            let remote = GraphStorage::new(&config.upload, token).map_err(|e| {
                ConfigError::Validation {
                    message: format!("upload: {}", e),
                }
            })?;
            let stage = UploadStage::new(
                status_sink(&config, db),
                Arc::new(remote),
                FailedArea::new(config.failed_path()),
                config.keep_originals,
            );
            run_stage(&stage, &config.broker, config.broker.heartbeat_secs).await?;
        }
        Command::Migrate => {
            let db = open_database(&config)?;
            println!("Database schema at version {}", db.schema_version()?);
        }
        Command::Targets { action } => targets(&config, action)?,
        Command::Settings { action } => settings(&config, action)?,
        Command::Items { action } => items(&config, action)?,
        Command::Updates => updates(&config).await?,
    }
    Ok(())
}

/// Token cancelled on Ctrl-C.
fn shutdown_token() -> CancellationToken {
    let token = CancellationToken::new();
    let handler_token = token.clone();
    if let Err(e) = ctrlc::set_handler(move || {
        tracing::info!("Shutdown requested");
        handler_token.cancel();
    }) {
        tracing::warn!(error = %e, "Could not install signal handler");
    }
    token
}

fn amqp_broker(config: &BrokerConfig, heartbeat_secs: u16) -> Arc<dyn Broker> {
    Arc::new(AmqpBroker::new(&config.url, heartbeat_secs))
}

async fn run_stage(stage: &dyn Stage, config: &BrokerConfig, heartbeat_secs: u16) -> Result<()> {
    let supervisor = Supervisor::new(amqp_broker(config, heartbeat_secs), config);
    supervisor.run(stage, shutdown_token()).await?;
    Ok(())
}

fn open_database(config: &Config) -> Result<Database> {
    let path = config
        .resolved_database_path()
        .ok_or_else(|| ConfigError::Validation {
            message: "database_path is not set and no home directory was found".to_string(),
        })?;
    Ok(Database::open(&path)?)
}

fn status_sink(config: &Config, db: Database) -> StatusSink {
    let notifier = FanoutNotifier::new(&config.broker.url, config.broker.heartbeat_secs);
    StatusSink::new(db, Arc::new(notifier))
}

fn targets(config: &Config, action: TargetCommand) -> Result<()> {
    let db = open_database(config)?;
    let manager = TargetManager::new(db.clone(), &config.watch_directory);

    match action {
        TargetCommand::List => {
            let rows = target_repo::list(&db)?;
            if rows.is_empty() {
                println!("No targets configured.");
            }
            for row in rows {
                println!(
                    "{:>4}  {:<24} -> {} (drive {}, folder {})",
                    row.id, row.smb_name, row.onedrive_path, row.drive_id, row.folder_id
                );
            }
        }
        TargetCommand::Add {
            name,
            drive_id,
            folder_id,
            remote_path,
            web_url,
        } => {
            let id = manager.add(&NewTarget {
                smb_name: name.clone(),
                drive_id,
                folder_id,
                onedrive_path: remote_path,
                web_url,
            })?;
            println!("Added target '{}' with id {}", name, id);
        }
        TargetCommand::Rename { id, new_name } => {
            let existing =
                target_repo::find_by_id(&db, id)?.ok_or(DatabaseError::NotFound {
                    table: "smb_onedrive",
                    id,
                })?;
            manager.edit(
                id,
                &NewTarget {
                    smb_name: new_name.clone(),
                    drive_id: existing.drive_id,
                    folder_id: existing.folder_id,
                    onedrive_path: existing.onedrive_path,
                    web_url: existing.web_url,
                },
            )?;
            println!("Renamed target {} from '{}' to '{}'", id, existing.smb_name, new_name);
        }
        TargetCommand::Remove { id } => {
            manager.remove(id)?;
            println!("Removed target {}", id);
        }
    }
    Ok(())
}

fn settings(config: &Config, action: SettingsCommand) -> Result<()> {
    let service = SettingsService::open(open_database(config)?)?;

    let snapshot = match action {
        SettingsCommand::Show => service.get()?,
        SettingsCommand::Naming { backend } => {
            let selected = match backend {
                NamingCommand::None => FileNamingBackend::None,
                NamingCommand::Openai { api_key, model } => {
                    FileNamingBackend::OpenAi { api_key, model }
                }
                NamingCommand::Ollama { url, port, model } => FileNamingBackend::Ollama {
                    server_url: url,
                    server_port: port,
                    model,
                },
            };
            service.update(|settings| settings.file_naming = selected)?
        }
    };

    println!("Settings revision {}", snapshot.revision);
    println!("File naming: {}", describe_naming(&snapshot.settings.file_naming));
    Ok(())
}

fn describe_naming(backend: &FileNamingBackend) -> String {
    match backend {
        FileNamingBackend::None => "disabled".to_string(),
        FileNamingBackend::OpenAi { api_key, model } => format!(
            "openai (model {}, key {})",
            model.as_deref().unwrap_or("default"),
            mask(api_key)
        ),
        FileNamingBackend::Ollama {
            server_url,
            server_port,
            model,
        } => format!("ollama at {}:{} (model {})", server_url, server_port, model),
    }
}

fn mask(secret: &str) -> String {
    let chars: Vec<char> = secret.chars().collect();
    if chars.len() <= 8 {
        return "****".to_string();
    }
    let tail: String = chars[chars.len() - 4..].iter().collect();
    format!("****{}", tail)
}

fn items(config: &Config, action: ItemsCommand) -> Result<()> {
    let db = open_database(config)?;
    let ItemsCommand::List { failed, limit } = action;

    let rows = if failed {
        scanned_repo::list_failed(&db, limit)?
    } else {
        scanned_repo::list_recent(&db, limit)?
    };
    if rows.is_empty() {
        println!("No items found.");
    }

    let now = Utc::now();
    for row in rows {
        let modified = parse_timestamp(&row.modified)
            .map(|then| relative_time(then, now))
            .unwrap_or_else(|| row.modified.clone());
        println!(
            "{:>6}  {:<40} {:<22} {}",
            row.id, row.file_name, row.file_status, modified
        );
    }
    Ok(())
}

async fn updates(config: &Config) -> Result<()> {
    let (connection, mut deliveries) = subscribe_updates(
        &config.broker.url,
        config.broker.heartbeat_secs,
        UPDATES_EXCHANGE,
    )
    .await?;
    tracing::info!("Listening for item updates");

    let cancel = shutdown_token();
    loop {
        let next = tokio::select! {
            _ = cancel.cancelled() => break,
            next = deliveries.next() => next,
        };
        match next {
            Some(Ok(delivery)) => println!("{}", String::from_utf8_lossy(&delivery.payload)),
            Some(Err(e)) => return Err(ScanSyncError::Transport(e)),
            None => break,
        }
    }

    if let Err(e) = connection.close(200, "shutdown").await {
        tracing::debug!(error = %e, "Error while closing broker connection");
    }
    Ok(())
}

/// Parses SQLite's `datetime('now')` format, which is UTC.
fn parse_timestamp(value: &str) -> Option<DateTime<Utc>> {
    NaiveDateTime::parse_from_str(value, "%Y-%m-%d %H:%M:%S")
        .ok()
        .map(|naive| naive.and_utc())
}

fn relative_time(then: DateTime<Utc>, now: DateTime<Utc>) -> String {
    let seconds = (now - then).num_seconds().max(0);
    let (value, unit) = match seconds {
        s if s < 60 => return "just now".to_string(),
        s if s < 3_600 => (s / 60, "minute"),
        s if s < 86_400 => (s / 3_600, "hour"),
        s if s < 7 * 86_400 => (s / 86_400, "day"),
        s if s < 30 * 86_400 => (s / (7 * 86_400), "week"),
        s if s < 365 * 86_400 => (s / (30 * 86_400), "month"),
        s => (s / (365 * 86_400), "year"),
    };
    let plural = if value == 1 { "" } else { "s" };
    format!("{} {}{} ago", value, unit, plural)
}
