use chrono::{DateTime, Utc};
use sqlx::{sqlite::SqliteRow, Row};

use leadflow_core::domain::advisor::AdvisorId;
use leadflow_core::domain::lead::{Lead, LeadId, LeadStatus, NewLead};

use super::{
    format_timestamp, parse_optional_timestamp, parse_timestamp, parse_u64, storage_now,
    LeadRepository, RepositoryError,
};
use crate::DbPool;

const LEAD_COLUMNS: &str = "id, first_name, last_name, email, phone, city, status, advisor_id,
                            assigned_at, created_at";

pub struct SqlLeadRepository {
    pool: DbPool,
}

impl SqlLeadRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl LeadRepository for SqlLeadRepository {
    async fn insert_pending(&self, lead: NewLead) -> Result<Lead, RepositoryError> {
        let created_at = storage_now();

        let result = sqlx::query(
            "INSERT INTO lead (first_name, last_name, email, phone, city, status, created_at)
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&lead.first_name)
        .bind(&lead.last_name)
        .bind(&lead.email)
        .bind(&lead.phone)
        .bind(&lead.city)
        .bind(LeadStatus::PendingAssignment.as_str())
        .bind(format_timestamp(created_at))
        .execute(&self.pool)
        .await?;

        Ok(Lead {
            id: LeadId(result.last_insert_rowid()),
            first_name: lead.first_name,
            last_name: lead.last_name,
            email: lead.email,
            phone: lead.phone,
            city: lead.city,
            status: LeadStatus::PendingAssignment,
            advisor_id: None,
            assigned_at: None,
            created_at,
        })
    }

    async fn find_by_id(&self, id: LeadId) -> Result<Option<Lead>, RepositoryError> {
        let row = sqlx::query(&format!("SELECT {LEAD_COLUMNS} FROM lead WHERE id = ?"))
            .bind(id.0)
            .fetch_optional(&self.pool)
            .await?;

        row.map(lead_from_row).transpose()
    }

    async fn list_pending(&self, limit: u32) -> Result<Vec<Lead>, RepositoryError> {
        let rows = sqlx::query(&format!(
            "SELECT {LEAD_COLUMNS}
             FROM lead
             WHERE status = ?
             ORDER BY created_at ASC, id ASC
             LIMIT ?"
        ))
        .bind(LeadStatus::PendingAssignment.as_str())
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(lead_from_row).collect()
    }

    async fn count_pending(&self) -> Result<u64, RepositoryError> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM lead WHERE status = ?")
            .bind(LeadStatus::PendingAssignment.as_str())
            .fetch_one(&self.pool)
            .await?;

        parse_u64("count", count)
    }

    async fn reassign(
        &self,
        id: LeadId,
        advisor: AdvisorId,
        at: DateTime<Utc>,
    ) -> Result<Lead, RepositoryError> {
        let mut tx = self.pool.begin().await?;

        let advisor_exists: Option<i64> =
            sqlx::query_scalar("SELECT id FROM advisor WHERE id = ?")
                .bind(advisor.0)
                .fetch_optional(&mut *tx)
                .await?;
        if advisor_exists.is_none() {
            return Err(RepositoryError::NotFound(format!("advisor {advisor}")));
        }

        let updated = sqlx::query(
            "UPDATE lead
             SET advisor_id = ?,
                 assigned_at = ?,
                 status = CASE WHEN status = ? THEN ? ELSE status END
             WHERE id = ?",
        )
        .bind(advisor.0)
        .bind(format_timestamp(at))
        .bind(LeadStatus::PendingAssignment.as_str())
        .bind(LeadStatus::New.as_str())
        .bind(id.0)
        .execute(&mut *tx)
        .await?;

        if updated.rows_affected() == 0 {
            return Err(RepositoryError::NotFound(format!("lead {id}")));
        }

        let row = sqlx::query(&format!("SELECT {LEAD_COLUMNS} FROM lead WHERE id = ?"))
            .bind(id.0)
            .fetch_one(&mut *tx)
            .await?;
        let lead = lead_from_row(row)?;

        tx.commit().await?;
        Ok(lead)
    }

    async fn count_by_advisor(&self) -> Result<Vec<(AdvisorId, u64)>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT advisor_id, COUNT(*) AS lead_count
             FROM lead
             WHERE advisor_id IS NOT NULL
             GROUP BY advisor_id
             ORDER BY advisor_id ASC",
        )
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|row| {
                Ok((
                    AdvisorId(row.try_get("advisor_id")?),
                    parse_u64("lead_count", row.try_get("lead_count")?)?,
                ))
            })
            .collect()
    }
}

fn lead_from_row(row: SqliteRow) -> Result<Lead, RepositoryError> {
    let status_raw = row.try_get::<String, _>("status")?;
    let status = LeadStatus::parse(&status_raw)
        .ok_or_else(|| RepositoryError::Decode(format!("unknown lead status `{status_raw}`")))?;

    Ok(Lead {
        id: LeadId(row.try_get("id")?),
        first_name: row.try_get("first_name")?,
        last_name: row.try_get("last_name")?,
        email: row.try_get("email")?,
        phone: row.try_get("phone")?,
        city: row.try_get("city")?,
        status,
        advisor_id: row.try_get::<Option<i64>, _>("advisor_id")?.map(AdvisorId),
        assigned_at: parse_optional_timestamp("assigned_at", row.try_get("assigned_at")?)?,
        created_at: parse_timestamp("created_at", row.try_get("created_at")?)?,
    })
}
