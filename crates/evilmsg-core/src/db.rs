//! Shared database types and utilities.
//!
//! Provides `DatabaseError`, `unix_timestamp()`, `format_timestamp()`, pool
//! creation helpers and the `define_database!` macro used by the server's
//! storage layer.

use std::path::Path;
use std::str::FromStr;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::{Pool, Sqlite};
use tracing::info;

/// Database errors.
#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    #[error("I/O error: {0}")]
    Io(String),

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Migration error: {0}")]
    Migration(String),

    #[error("Query error: {0}")]
    Query(String),
}

impl From<sqlx::Error> for DatabaseError {
    fn from(e: sqlx::Error) -> Self {
        Self::Query(e.to_string())
    }
}

/// Open (or create) a `SQLite` connection pool at the given file path.
///
/// Creates the parent directory if it does not exist, enables WAL journal
/// mode and sets a 5-second busy timeout so concurrent writers queue instead
/// of failing with `SQLITE_BUSY`.
pub async fn open_pool(path: &Path) -> Result<Pool<Sqlite>, DatabaseError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent).map_err(|e| DatabaseError::Io(e.to_string()))?;
        }
    }

    let options = SqliteConnectOptions::from_str(&format!("sqlite:{}?mode=rwc", path.display()))
        .map_err(|e| DatabaseError::Connection(e.to_string()))?
        .journal_mode(SqliteJournalMode::Wal)
        .busy_timeout(Duration::from_secs(5));

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await
        .map_err(|e| DatabaseError::Connection(e.to_string()))?;

    info!(path = %path.display(), "Database opened");

    Ok(pool)
}

/// Open an in-memory `SQLite` connection pool (for testing).
///
/// The single connection is never recycled: dropping it would discard the
/// whole database.
pub async fn open_pool_in_memory() -> Result<Pool<Sqlite>, DatabaseError> {
    let options = SqliteConnectOptions::from_str("sqlite::memory:")
        .map_err(|e| DatabaseError::Connection(e.to_string()))?;

    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect_with(options)
        .await
        .map_err(|e| DatabaseError::Connection(e.to_string()))?;

    Ok(pool)
}

/// Returns the current time as a Unix timestamp (seconds since epoch).
#[allow(clippy::cast_possible_wrap)]
pub fn unix_timestamp() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64
}

/// Render a Unix timestamp as `YYYY-MM-DD HH:MM:SS` in UTC, the same shape
/// `SQLite`'s `datetime()` produces.
pub fn format_timestamp(ts: i64) -> String {
    let days = ts.div_euclid(86_400);
    let secs = ts.rem_euclid(86_400);

    // Civil-from-days over 400-year eras, epoch shifted to 0000-03-01.
    let z = days + 719_468;
    let era = z.div_euclid(146_097);
    let doe = z - era * 146_097;
    let yoe = (doe - doe / 1460 + doe / 36_524 - doe / 146_096) / 365;
    let doy = doe - (365 * yoe + yoe / 4 - yoe / 100);
    let mp = (5 * doy + 2) / 153;
    let day = doy - (153 * mp + 2) / 5 + 1;
    let month = if mp < 10 { mp + 3 } else { mp - 9 };
    let year = yoe + era * 400 + i64::from(month <= 2);

    format!(
        "{year:04}-{month:02}-{day:02} {:02}:{:02}:{:02}",
        secs / 3600,
        (secs % 3600) / 60,
        secs % 60
    )
}

/// Macro to define a `Database`-like struct with `open`, `open_in_memory`,
/// `run_migrations`, `pool` and `close` methods.
///
/// Usage:
/// ```ignore
/// evilmsg_core::define_database!(AppDatabase, "Database migrations complete");
/// ```
///
/// Migrations are read from `./migrations` relative to the invoking crate.
#[macro_export]
macro_rules! define_database {
    ($name:ident, $migration_msg:expr) => {
        /// Pooled handle to the application database. Cheap to clone.
        #[derive(Clone)]
        pub struct $name {
            pool: ::sqlx::Pool<::sqlx::Sqlite>,
        }

        impl $name {
            /// Open or create a database at the given path.
            pub async fn open(
                path: &::std::path::Path,
            ) -> ::std::result::Result<Self, $crate::db::DatabaseError> {
                let pool = $crate::db::open_pool(path).await?;
                let db = Self { pool };
                db.run_migrations().await?;
                Ok(db)
            }

            /// Open an in-memory database (for testing).
            pub async fn open_in_memory() -> ::std::result::Result<Self, $crate::db::DatabaseError>
            {
                let pool = $crate::db::open_pool_in_memory().await?;
                let db = Self { pool };
                db.run_migrations().await?;
                Ok(db)
            }

            async fn run_migrations(&self) -> ::std::result::Result<(), $crate::db::DatabaseError> {
                ::sqlx::migrate!("./migrations")
                    .run(&self.pool)
                    .await
                    .map_err(|e| $crate::db::DatabaseError::Migration(e.to_string()))?;

                ::tracing::info!($migration_msg);
                Ok(())
            }

            /// Get a reference to the connection pool.
            pub const fn pool(&self) -> &::sqlx::Pool<::sqlx::Sqlite> {
                &self.pool
            }

            /// Close every pooled connection. Clones share the pool, so this
            /// closes them too.
            pub async fn close(&self) {
                self.pool.close().await;
                ::tracing::info!("Database closed");
            }
        }
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unix_timestamp_is_reasonable() {
        let ts = unix_timestamp();
        // Should be after 2024-01-01
        assert!(ts > 1_704_067_200);
    }

    #[test]
    fn format_epoch() {
        assert_eq!(format_timestamp(0), "1970-01-01 00:00:00");
    }

    #[test]
    fn format_new_year_2024() {
        assert_eq!(format_timestamp(1_704_067_200), "2024-01-01 00:00:00");
    }

    #[test]
    fn format_leap_day() {
        assert_eq!(format_timestamp(951_782_400), "2000-02-29 00:00:00");
    }

    #[test]
    fn format_time_of_day() {
        assert_eq!(format_timestamp(1_700_000_000), "2023-11-14 22:13:20");
    }

    #[test]
    fn sqlx_errors_become_query_errors() {
        let err: DatabaseError = sqlx::Error::RowNotFound.into();
        assert!(matches!(err, DatabaseError::Query(_)));
    }

    #[tokio::test]
    async fn file_pool_creates_parent_dir() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("evilmsg.db");
        let pool = open_pool(&path).await.unwrap();
        assert!(path.parent().unwrap().is_dir());
        pool.close().await;
    }
}
