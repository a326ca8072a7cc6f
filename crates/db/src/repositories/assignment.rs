use sqlx::{Row, Sqlite, SqliteConnection, Transaction};

use leadflow_core::domain::advisor::AdvisorId;
use leadflow_core::domain::lead::LeadStatus;
use leadflow_core::domain::rotation::RotationState;

use super::{
    format_timestamp, parse_timestamp, parse_u64, storage_now, version_param,
    AssignmentRepository, CommitOutcome, RepositoryError, RotationCommit, RotationUnit,
};
use crate::DbPool;

const ROTATION_STATE_ID: i64 = 1;

pub struct SqlAssignmentRepository {
    pool: DbPool,
}

impl SqlAssignmentRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl AssignmentRepository for SqlAssignmentRepository {
    async fn ensure_rotation_state(&self) -> Result<bool, RepositoryError> {
        let mut conn = self.pool.acquire().await?;
        insert_rotation_state(&mut conn).await
    }

    async fn load_rotation_state(&self) -> Result<Option<RotationState>, RepositoryError> {
        let mut conn = self.pool.acquire().await?;
        read_rotation_state(&mut conn).await
    }

    async fn list_active_advisors(&self) -> Result<Vec<AdvisorId>, RepositoryError> {
        let mut conn = self.pool.acquire().await?;
        read_active_advisors(&mut conn).await
    }

    async fn begin_rotation(&self) -> Result<Box<dyn RotationUnit>, RepositoryError> {
        // IMMEDIATE takes the write lock up front; contenders wait out
        // busy_timeout instead of failing on a lock upgrade.
        let tx = self.pool.begin_with("BEGIN IMMEDIATE").await?;
        Ok(Box::new(SqlRotationUnit { tx: Some(tx) }))
    }
}

/// Rotation unit backed by an immediate SQLite transaction.
pub struct SqlRotationUnit {
    tx: Option<Transaction<'static, Sqlite>>,
}

impl SqlRotationUnit {
    fn tx(&mut self) -> Result<&mut Transaction<'static, Sqlite>, RepositoryError> {
        self.tx.as_mut().ok_or(RepositoryError::UnitFinished)
    }
}

#[async_trait::async_trait]
impl RotationUnit for SqlRotationUnit {
    async fn ensure_rotation_state(&mut self) -> Result<bool, RepositoryError> {
        insert_rotation_state(self.tx()?).await
    }

    async fn load_rotation_state(&mut self) -> Result<Option<RotationState>, RepositoryError> {
        read_rotation_state(self.tx()?).await
    }

    async fn list_active_advisors(&mut self) -> Result<Vec<AdvisorId>, RepositoryError> {
        read_active_advisors(self.tx()?).await
    }

    async fn is_advisor_active(&mut self, id: AdvisorId) -> Result<bool, RepositoryError> {
        let found: Option<i64> =
            sqlx::query_scalar("SELECT id FROM advisor WHERE id = ? AND active = 1")
                .bind(id.0)
                .fetch_optional(&mut **self.tx()?)
                .await?;

        Ok(found.is_some())
    }

    async fn commit_rotation(
        &mut self,
        commit: RotationCommit,
    ) -> Result<CommitOutcome, RepositoryError> {
        let expected = version_param(commit.expected_version())?;
        let next = version_param(commit.expected_version() + 1)?;
        let committed_at = format_timestamp(commit.committed_at());

        let mut tx = self.tx.take().ok_or(RepositoryError::UnitFinished)?;

        let swapped = sqlx::query(
            "UPDATE rotation_state
             SET last_assigned_advisor_id = ?, version = ?, updated_at = ?
             WHERE id = ? AND version = ?",
        )
        .bind(commit.chosen().map(|advisor| advisor.0))
        .bind(next)
        .bind(&committed_at)
        .bind(ROTATION_STATE_ID)
        .bind(expected)
        .execute(&mut *tx)
        .await?;

        if swapped.rows_affected() == 0 {
            tx.rollback().await?;
            return Ok(CommitOutcome::VersionConflict);
        }

        if let (Some(advisor), Some(lead_id)) = (commit.chosen(), commit.lead_id()) {
            let linked = sqlx::query(
                "UPDATE lead
                 SET advisor_id = ?, assigned_at = ?, status = ?
                 WHERE id = ? AND status = ?",
            )
            .bind(advisor.0)
            .bind(&committed_at)
            .bind(LeadStatus::New.as_str())
            .bind(lead_id.0)
            .bind(LeadStatus::PendingAssignment.as_str())
            .execute(&mut *tx)
            .await?;

            if linked.rows_affected() == 0 {
                let exists: i64 =
                    sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM lead WHERE id = ?)")
                        .bind(lead_id.0)
                        .fetch_one(&mut *tx)
                        .await?;
                tx.rollback().await?;
                return Ok(if exists == 1 {
                    CommitOutcome::LeadNotPending
                } else {
                    CommitOutcome::LeadNotFound
                });
            }
        }

        tx.commit().await?;
        Ok(CommitOutcome::Committed(commit.resulting_state()))
    }
}

async fn insert_rotation_state(conn: &mut SqliteConnection) -> Result<bool, RepositoryError> {
    let inserted = sqlx::query(
        "INSERT OR IGNORE INTO rotation_state
             (id, last_assigned_advisor_id, version, updated_at)
         VALUES (?, NULL, 0, ?)",
    )
    .bind(ROTATION_STATE_ID)
    .bind(format_timestamp(storage_now()))
    .execute(conn)
    .await?;

    Ok(inserted.rows_affected() > 0)
}

async fn read_rotation_state(
    conn: &mut SqliteConnection,
) -> Result<Option<RotationState>, RepositoryError> {
    let row = sqlx::query(
        "SELECT last_assigned_advisor_id, version, updated_at
         FROM rotation_state
         WHERE id = ?",
    )
    .bind(ROTATION_STATE_ID)
    .fetch_optional(conn)
    .await?;

    let Some(row) = row else {
        return Ok(None);
    };

    Ok(Some(RotationState {
        last_assigned: row.try_get::<Option<i64>, _>("last_assigned_advisor_id")?.map(AdvisorId),
        version: parse_u64("version", row.try_get("version")?)?,
        updated_at: parse_timestamp("updated_at", row.try_get("updated_at")?)?,
    }))
}

async fn read_active_advisors(
    conn: &mut SqliteConnection,
) -> Result<Vec<AdvisorId>, RepositoryError> {
    let ids: Vec<i64> =
        sqlx::query_scalar("SELECT id FROM advisor WHERE active = 1 ORDER BY id ASC")
            .fetch_all(conn)
            .await?;

    Ok(ids.into_iter().map(AdvisorId).collect())
}
