//! Hit ingestion gate.
//!
//! Every beacon callback passes through [`IngestionGate::ingest`], which
//! accepts it only while the owning project is active. The status read goes
//! straight to the database on every call, so a stop that committed before
//! the read always wins.

use tracing::{debug, error, info, warn};

use crate::project_id::{InvalidProjectId, parse_project_id};
use crate::storage::{AppDatabase, DatabaseError};

/// Decides whether an incoming callback becomes a hit.
#[derive(Clone)]
pub struct IngestionGate {
    db: AppDatabase,
}

impl IngestionGate {
    pub const fn new(db: AppDatabase) -> Self {
        Self { db }
    }

    /// Run one callback through the gate. `raw_id` is the untrusted path
    /// segment. Returns the id of the recorded hit.
    pub async fn ingest(&self, raw_id: &str, ip: &str, data: &[u8]) -> Result<i64, IngestError> {
        let project_id = parse_project_id(raw_id).inspect_err(|e| {
            warn!(error = %e, ip, "Rejected hit with malformed project id");
        })?;
        self.ingest_for(project_id, ip, data).await
    }

    /// Gate a callback for an already parsed project id.
    pub async fn ingest_for(
        &self,
        project_id: i64,
        ip: &str,
        data: &[u8],
    ) -> Result<i64, IngestError> {
        let status = match self.db.project_status(project_id).await {
            Ok(Some(status)) => status,
            Ok(None) => {
                warn!(project_id, ip, "Rejected hit for unknown project");
                return Err(IngestError::UnknownProject(project_id));
            }
            Err(e) => {
                error!(project_id, error = %e, "Failed to read project status");
                return Err(IngestError::StorageFailure(e));
            }
        };

        if !status.is_active() {
            warn!(project_id, ip, "Rejected hit for stopped project");
            return Err(IngestError::ProjectStopped(project_id));
        }

        let hit_id = self
            .db
            .insert_hit(project_id, ip, data)
            .await
            .inspect_err(|e| error!(project_id, error = %e, "Failed to store hit"))
            .map_err(IngestError::StorageFailure)?;

        info!(project_id, hit_id, ip, bytes = data.len(), "Hit accepted");
        debug!(project_id, hit_id, payload = %String::from_utf8_lossy(data), "Hit payload");
        Ok(hit_id)
    }
}

/// Why a callback was rejected.
#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    #[error(transparent)]
    InvalidProjectId(#[from] InvalidProjectId),

    #[error("project {0} does not exist")]
    UnknownProject(i64),

    #[error("project {0} is stopped")]
    ProjectStopped(i64),

    #[error("failed to store hit: {0}")]
    StorageFailure(DatabaseError),
}
