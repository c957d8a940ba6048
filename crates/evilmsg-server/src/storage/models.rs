//! Data models for evilmsg storage.

use serde::{Deserialize, Serialize};

/// Lifecycle state of a project. Only ever moves `Active` -> `Stopped`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProjectStatus {
    Active,
    Stopped,
}

impl ProjectStatus {
    pub const fn is_active(self) -> bool {
        matches!(self, Self::Active)
    }
}

impl From<bool> for ProjectStatus {
    fn from(active: bool) -> Self {
        if active { Self::Active } else { Self::Stopped }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Project {
    pub id: i64,
    pub name: String,
    pub status: ProjectStatus,
    pub time_created: i64,
    /// Set once the project is stopped.
    pub time_stopped: Option<i64>,
}

/// Raw `projects` row; `status` is stored as an integer flag.
#[derive(sqlx::FromRow)]
pub(crate) struct ProjectRow {
    pub id: i64,
    pub name: String,
    pub status: bool,
    pub time_created: i64,
    pub time_stopped: Option<i64>,
}

impl From<ProjectRow> for Project {
    fn from(row: ProjectRow) -> Self {
        Self {
            id: row.id,
            name: row.name,
            status: row.status.into(),
            time_created: row.time_created,
            time_stopped: row.time_stopped,
        }
    }
}

/// One recorded beacon callback.
#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct Hit {
    pub id: i64,
    pub project_id: i64,
    pub time: i64,
    pub ip: String,
    pub data: Vec<u8>,
}
