//! SQLite pools for the control-plane database.
//!
//! Writes are funneled through a single connection: SQLite accepts one
//! writer at a time, and handing sqlx a wider pool just trades lock errors
//! for busy-timeout churn. Reads get their own small pool so snapshot
//! queries and startup hydration never queue behind an upsert. WAL journal
//! mode lets the two sides coexist.

use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};

use deskpilot_types::config::RunControlConfig;

/// Connections in the read-side pool.
const READER_CONNECTIONS: u32 = 8;

/// How long a connection waits on the write lock before erroring out.
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// File name used when the config carries no `database_file` override.
const DEFAULT_DATABASE_FILE: &str = "deskpilot.db";

/// Paired read/write pools over one SQLite file.
#[derive(Clone)]
pub struct DatabasePool {
    pub reader: SqlitePool,
    pub writer: SqlitePool,
}

impl DatabasePool {
    /// Open the control-plane database inside `data_dir`, creating the file
    /// if needed. `database_file` in the config overrides the default name.
    pub async fn open(config: &RunControlConfig, data_dir: &Path) -> Result<Self, sqlx::Error> {
        Self::from_url(&database_url(config, data_dir)).await
    }

    /// Open pools for an explicit SQLite URL.
    ///
    /// Migrations run on the writer before the reader pool opens, so a
    /// reader never observes a half-migrated schema.
    pub async fn from_url(database_url: &str) -> Result<Self, sqlx::Error> {
        let options = SqliteConnectOptions::from_str(database_url)?
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(BUSY_TIMEOUT)
            .create_if_missing(true);

        let writer = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options.clone())
            .await?;

        sqlx::migrate!("../../migrations").run(&writer).await?;

        let reader = SqlitePoolOptions::new()
            .max_connections(READER_CONNECTIONS)
            .connect_with(options.read_only(true))
            .await?;

        Ok(Self { reader, writer })
    }
}

/// SQLite URL for the configured database file inside the data directory.
pub fn database_url(config: &RunControlConfig, data_dir: &Path) -> String {
    let file = config
        .database_file
        .as_deref()
        .unwrap_or(DEFAULT_DATABASE_FILE);
    format!("sqlite://{}?mode=rwc", data_dir.join(file).display())
}
