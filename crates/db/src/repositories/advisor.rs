use sqlx::{sqlite::SqliteRow, Row};

use leadflow_core::domain::advisor::{Advisor, AdvisorId, NewAdvisor};

use super::{format_timestamp, parse_timestamp, storage_now, AdvisorRepository, RepositoryError};
use crate::DbPool;

pub struct SqlAdvisorRepository {
    pool: DbPool,
}

impl SqlAdvisorRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl AdvisorRepository for SqlAdvisorRepository {
    async fn insert(&self, advisor: NewAdvisor) -> Result<Advisor, RepositoryError> {
        let created_at = storage_now();

        let result = sqlx::query(
            "INSERT INTO advisor (name, email, active, created_at) VALUES (?, ?, ?, ?)",
        )
        .bind(&advisor.name)
        .bind(&advisor.email)
        .bind(advisor.active)
        .bind(format_timestamp(created_at))
        .execute(&self.pool)
        .await?;

        Ok(Advisor {
            id: AdvisorId(result.last_insert_rowid()),
            name: advisor.name,
            email: advisor.email,
            active: advisor.active,
            created_at,
        })
    }

    async fn find_by_id(&self, id: AdvisorId) -> Result<Option<Advisor>, RepositoryError> {
        let row = sqlx::query(
            "SELECT id, name, email, active, created_at FROM advisor WHERE id = ?",
        )
        .bind(id.0)
        .fetch_optional(&self.pool)
        .await?;

        row.map(advisor_from_row).transpose()
    }

    async fn set_active(&self, id: AdvisorId, active: bool) -> Result<Advisor, RepositoryError> {
        let updated = sqlx::query("UPDATE advisor SET active = ? WHERE id = ?")
            .bind(active)
            .bind(id.0)
            .execute(&self.pool)
            .await?;

        if updated.rows_affected() == 0 {
            return Err(RepositoryError::NotFound(format!("advisor {id}")));
        }

        self.find_by_id(id)
            .await?
            .ok_or_else(|| RepositoryError::NotFound(format!("advisor {id}")))
    }

    async fn list_all(&self) -> Result<Vec<Advisor>, RepositoryError> {
        let rows =
            sqlx::query("SELECT id, name, email, active, created_at FROM advisor ORDER BY id ASC")
                .fetch_all(&self.pool)
                .await?;

        rows.into_iter().map(advisor_from_row).collect()
    }
}

fn advisor_from_row(row: SqliteRow) -> Result<Advisor, RepositoryError> {
    Ok(Advisor {
        id: AdvisorId(row.try_get("id")?),
        name: row.try_get("name")?,
        email: row.try_get("email")?,
        active: row.try_get("active")?,
        created_at: parse_timestamp("created_at", row.try_get("created_at")?)?,
    })
}
