//! Database connection and initialization.

pub use evilmsg_core::db::DatabaseError;

evilmsg_core::define_database!(AppDatabase, "Database migrations complete");

/// Errors from project operations.
#[derive(Debug, thiserror::Error)]
pub enum ProjectError {
    #[error("Project name is empty")]
    EmptyName,

    #[error("Project {0} not found")]
    NotFound(i64),

    #[error(transparent)]
    Storage(#[from] DatabaseError),
}

impl From<sqlx::Error> for ProjectError {
    fn from(e: sqlx::Error) -> Self {
        Self::Storage(e.into())
    }
}
