pub mod broadcast;
pub mod config;
pub mod db;
pub mod error;
pub mod item;
pub mod logging;
pub mod processor;
pub mod retry;
pub mod sanitize;
pub mod secrets;
pub mod settings;
pub mod storage;
pub mod transport;
pub mod worker;

pub use broadcast::{ItemUpdateBroadcaster, StatusSink};
pub use config::{load_config, Config};
pub use db::{Database, DatabaseError};
pub use error::{ConfigError, ItemError, ProcessError, Result, ScanSyncError, StorageError};
pub use item::{FileNamingStatus, Item, ItemType, OcrStatus, ProcessStatus};
pub use sanitize::sanitize_filename;
pub use settings::{FileNamingBackend, SettingsService};
pub use transport::{Broker, Supervisor, TransportError};
pub use worker::{
    DirectoryScanner, MetadataStage, NamingStage, OcrStage, Stage, StageError, UploadStage,
};
