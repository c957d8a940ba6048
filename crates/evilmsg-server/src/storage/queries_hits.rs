//! Hit queries.

use evilmsg_core::db::unix_timestamp;
use sqlx::{Executor, Sqlite};

use super::db::{AppDatabase, DatabaseError};
use super::models::Hit;

impl AppDatabase {
    /// Record a hit. The project id is not checked against `projects`.
    pub async fn insert_hit(
        &self,
        project_id: i64,
        ip: &str,
        data: &[u8],
    ) -> Result<i64, DatabaseError> {
        let now = unix_timestamp();

        let result = sqlx::query("INSERT INTO data (project_id, time, ip, data) VALUES (?, ?, ?, ?)")
            .bind(project_id)
            .bind(now)
            .bind(ip)
            .bind(data)
            .execute(self.pool())
            .await?;

        Ok(result.last_insert_rowid())
    }

    /// List hits for a project in arrival order.
    pub async fn list_hits(&self, project_id: i64) -> Result<Vec<Hit>, DatabaseError> {
        let hits = sqlx::query_as::<_, Hit>(
            "SELECT id, project_id, time, ip, data FROM data WHERE project_id = ? ORDER BY id ASC",
        )
        .bind(project_id)
        .fetch_all(self.pool())
        .await?;

        Ok(hits)
    }

    /// Delete every hit of a project. Deleting nothing is not an error.
    pub async fn delete_hits(&self, project_id: i64) -> Result<u64, DatabaseError> {
        delete_hits_with(self.pool(), project_id).await
    }
}

pub(super) async fn delete_hits_with<'e, E>(executor: E, project_id: i64) -> Result<u64, DatabaseError>
where
    E: Executor<'e, Database = Sqlite>,
{
    let result = sqlx::query("DELETE FROM data WHERE project_id = ?")
        .bind(project_id)
        .execute(executor)
        .await?;

    Ok(result.rows_affected())
}
