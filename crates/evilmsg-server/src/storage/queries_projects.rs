//! Project queries.

use evilmsg_core::db::unix_timestamp;
use tracing::info;

use super::db::{AppDatabase, DatabaseError, ProjectError};
use super::models::{Project, ProjectRow, ProjectStatus};
use super::queries_hits::delete_hits_with;

const PROJECT_COLUMNS: &str = "id, name, status, time_created, time_stopped";

impl AppDatabase {
    /// Create a new, active project.
    pub async fn create_project(&self, name: &str) -> Result<Project, ProjectError> {
        if name.trim().is_empty() {
            return Err(ProjectError::EmptyName);
        }

        let now = unix_timestamp();
        let result = sqlx::query("INSERT INTO projects (name, status, time_created) VALUES (?, 1, ?)")
            .bind(name)
            .bind(now)
            .execute(self.pool())
            .await?;

        let id = result.last_insert_rowid();
        info!(project_id = id, project_name = name, "Project created");

        self.get_project(id).await
    }

    /// Get a project by ID.
    pub async fn get_project(&self, id: i64) -> Result<Project, ProjectError> {
        sqlx::query_as::<_, ProjectRow>(&format!(
            "SELECT {PROJECT_COLUMNS} FROM projects WHERE id = ?"
        ))
        .bind(id)
        .fetch_optional(self.pool())
        .await?
        .map(Project::from)
        .ok_or(ProjectError::NotFound(id))
    }

    /// List all projects in creation order.
    pub async fn list_projects(&self) -> Result<Vec<Project>, ProjectError> {
        let rows = sqlx::query_as::<_, ProjectRow>(&format!(
            "SELECT {PROJECT_COLUMNS} FROM projects ORDER BY id ASC"
        ))
        .fetch_all(self.pool())
        .await?;

        Ok(rows.into_iter().map(Project::from).collect())
    }

    /// Current status of a project, read straight from the table on every
    /// call. `None` when the project does not exist.
    pub async fn project_status(&self, id: i64) -> Result<Option<ProjectStatus>, DatabaseError> {
        let row: Option<(bool,)> = sqlx::query_as("SELECT status FROM projects WHERE id = ?")
            .bind(id)
            .fetch_optional(self.pool())
            .await?;

        Ok(row.map(|(active,)| ProjectStatus::from(active)))
    }

    /// Stop a project. Stopping an already stopped project re-stamps
    /// `time_stopped`; the status never returns to active.
    pub async fn stop_project(&self, id: i64) -> Result<(), ProjectError> {
        let now = unix_timestamp();

        let result = sqlx::query("UPDATE projects SET status = 0, time_stopped = ? WHERE id = ?")
            .bind(now)
            .bind(id)
            .execute(self.pool())
            .await?;

        if result.rows_affected() == 0 {
            return Err(ProjectError::NotFound(id));
        }

        info!(project_id = id, "Project stopped");
        Ok(())
    }

    /// Delete a project together with all of its hits.
    ///
    /// Both deletes run in one transaction; when the project does not exist
    /// the transaction is rolled back and no hit is touched. Returns the
    /// number of hits removed.
    pub async fn delete_project(&self, id: i64) -> Result<u64, ProjectError> {
        let mut tx = self.pool().begin().await?;

        let hits_removed = delete_hits_with(&mut *tx, id).await?;

        let result = sqlx::query("DELETE FROM projects WHERE id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;

        if result.rows_affected() == 0 {
            tx.rollback().await?;
            return Err(ProjectError::NotFound(id));
        }

        tx.commit().await?;

        info!(project_id = id, hits_removed, "Project deleted");
        Ok(hits_removed)
    }
}
