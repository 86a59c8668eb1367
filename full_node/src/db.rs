use log::info;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::SqlitePool;
use std::io::{Error, ErrorKind};
use std::path::Path;
use std::str::FromStr;

pub fn db_err(e: sqlx::Error) -> Error {
    Error::new(ErrorKind::Other, format!("{e:?}"))
}

pub(crate) fn u32_from_db(v: i64) -> Result<u32, Error> {
    u32::try_from(v).map_err(|_| Error::new(ErrorKind::InvalidData, format!("Invalid u32 in db: {v}")))
}

pub(crate) fn u64_from_db(v: i64) -> Result<u64, Error> {
    u64::try_from(v).map_err(|_| Error::new(ErrorKind::InvalidData, format!("Invalid u64 in db: {v}")))
}

/// Opens (creating if needed) the sqlite database backing the node.
pub async fn open_pool(path: &Path) -> Result<SqlitePool, Error> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    info!("Opening blockchain database at {}", path.display());
    let options = SqliteConnectOptions::new()
        .filename(path)
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .synchronous(SqliteSynchronous::Full);
    SqlitePoolOptions::new()
        .max_connections(4)
        .connect_with(options)
        .await
        .map_err(db_err)
}

/// Single connection pool over a private in-memory database.
pub async fn memory_pool() -> Result<SqlitePool, Error> {
    let options = SqliteConnectOptions::from_str("sqlite::memory:").map_err(db_err)?;
    SqlitePoolOptions::new()
        .max_connections(1)
        .min_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect_with(options)
        .await
        .map_err(db_err)
}
