//! Database migration system.
//!
//! Tracks applied migrations in a `_migrations` table and applies
//! pending ones in order. Column additions are skipped when the column
//! already exists, so databases created by older deployments upgrade cleanly.

use rusqlite::Connection;

use super::error::DatabaseError;

/// A single migration definition.
struct Migration {
    version: u32,
    description: &'static str,
    sql: &'static str,
    kind: MigrationKind,
}

enum MigrationKind {
    /// Execute the SQL directly.
    Standard,
    /// ALTER TABLE ADD COLUMN, skipped if the column already exists.
    AddColumn {
        table: &'static str,
        column: &'static str,
    },
}

/// All migrations in order. Each is applied at most once.
const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        description: "create_scanneddata_table",
        sql: include_str!("sql/001_create_scanneddata.sql"),
        kind: MigrationKind::Standard,
    },
    Migration {
        version: 2,
        description: "create_file_naming_jobs_table",
        sql: include_str!("sql/002_create_file_naming_jobs.sql"),
        kind: MigrationKind::Standard,
    },
    Migration {
        version: 3,
        description: "create_smb_onedrive_table",
        sql: include_str!("sql/003_create_smb_onedrive.sql"),
        kind: MigrationKind::Standard,
    },
    Migration {
        version: 4,
        description: "create_app_settings_table",
        sql: include_str!("sql/004_create_app_settings.sql"),
        kind: MigrationKind::Standard,
    },
    Migration {
        version: 5,
        description: "add_ocr_status_to_scanneddata",
        sql: include_str!("sql/005_add_ocr_status.sql"),
        kind: MigrationKind::AddColumn {
            table: "scanneddata",
            column: "ocr_status",
        },
    },
    Migration {
        version: 6,
        description: "add_current_uploading_to_scanneddata",
        sql: include_str!("sql/006_add_current_uploading.sql"),
        kind: MigrationKind::AddColumn {
            table: "scanneddata",
            column: "current_uploading",
        },
    },
    Migration {
        version: 7,
        description: "add_current_upload_target_to_scanneddata",
        sql: include_str!("sql/007_add_current_upload_target.sql"),
        kind: MigrationKind::AddColumn {
            table: "scanneddata",
            column: "current_upload_target",
        },
    },
];

/// Runs all pending migrations on the given connection.
pub fn run_all(conn: &Connection) -> Result<(), DatabaseError> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS _migrations (
            version INTEGER PRIMARY KEY,
            description TEXT NOT NULL,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        );",
    )?;

    let applied = current_version(conn)?;

    for migration in MIGRATIONS {
        if migration.version <= applied {
            continue;
        }

        log::info!(
            "Running migration v{}: {}",
            migration.version,
            migration.description
        );

        let should_run = match &migration.kind {
            MigrationKind::Standard => true,
            MigrationKind::AddColumn { table, column } => !column_exists(conn, table, column)?,
        };

        if should_run {
            conn.execute_batch(migration.sql)
                .map_err(|e| DatabaseError::Migration {
                    version: migration.version,
                    reason: e.to_string(),
                })?;
        } else {
            log::info!(
                "Skipping migration v{} (column already present)",
                migration.version
            );
        }

        conn.execute(
            "INSERT INTO _migrations (version, description) VALUES (?1, ?2)",
            rusqlite::params![migration.version, migration.description],
        )?;
    }

    Ok(())
}

/// Highest applied migration version, 0 for an empty database.
pub fn current_version(conn: &Connection) -> Result<u32, DatabaseError> {
    Ok(conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM _migrations",
        [],
        |r| r.get(0),
    )?)
}

fn column_exists(conn: &Connection, table: &str, column: &str) -> Result<bool, DatabaseError> {
    if !table.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return Err(DatabaseError::Migration {
            version: 0,
            reason: format!("Invalid table name: {}", table),
        });
    }
    let mut stmt = conn.prepare(&format!("PRAGMA table_info({})", table))?;
    let exists = stmt
        .query_map([], |row| row.get::<_, String>(1))?
        .any(|r| r.map(|name| name == column).unwrap_or(false));
    Ok(exists)
}
