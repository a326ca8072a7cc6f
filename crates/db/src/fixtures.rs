use chrono::{Duration, TimeZone, Utc};
use serde::Serialize;

use leadflow_core::domain::lead::LeadStatus;

use crate::connection::DbPool;
use crate::repositories::{format_timestamp, RepositoryError};

struct SeedAdvisor {
    name: &'static str,
    email: &'static str,
    active: bool,
}

struct SeedLead {
    first_name: &'static str,
    last_name: &'static str,
    email: &'static str,
    phone: Option<&'static str>,
    city: Option<&'static str>,
}

/// Demo roster: three active advisors and one on leave, so a drain shows both
/// the rotation order and the active filter.
const SEED_ADVISORS: &[SeedAdvisor] = &[
    SeedAdvisor { name: "Andrea Gomez", email: "andrea.gomez@leadflow.test", active: true },
    SeedAdvisor { name: "Bruno Salas", email: "bruno.salas@leadflow.test", active: true },
    SeedAdvisor { name: "Camila Ortiz", email: "camila.ortiz@leadflow.test", active: true },
    SeedAdvisor { name: "Diego Ruiz", email: "diego.ruiz@leadflow.test", active: false },
];

const SEED_LEADS: &[SeedLead] = &[
    SeedLead {
        first_name: "Laura",
        last_name: "Diaz",
        email: "laura.diaz@example.test",
        phone: Some("+57 300 111 2233"),
        city: Some("Medellin"),
    },
    SeedLead {
        first_name: "Mateo",
        last_name: "Herrera",
        email: "mateo.herrera@example.test",
        phone: None,
        city: Some("Bogota"),
    },
    SeedLead {
        first_name: "Sofia",
        last_name: "Castro",
        email: "sofia.castro@example.test",
        phone: Some("+57 310 444 5566"),
        city: None,
    },
    SeedLead {
        first_name: "Julian",
        last_name: "Pardo",
        email: "julian.pardo@example.test",
        phone: None,
        city: Some("Cali"),
    },
    SeedLead {
        first_name: "Valentina",
        last_name: "Rios",
        email: "valentina.rios@example.test",
        phone: Some("+57 320 777 8899"),
        city: Some("Cartagena"),
    },
];

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct SeedResult {
    /// Rows inserted by this run. Re-running the seed inserts nothing.
    pub advisors_inserted: u64,
    pub leads_inserted: u64,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct VerificationResult {
    pub all_present: bool,
    pub checks: Vec<(String, bool)>,
}

/// Deterministic demo data for local runs of the CLI.
pub struct DemoDataset;

impl DemoDataset {
    pub fn advisor_count() -> usize {
        SEED_ADVISORS.len()
    }

    pub fn lead_count() -> usize {
        SEED_LEADS.len()
    }

    /// Inserts the demo advisors and pending leads, skipping rows whose email
    /// already exists.
    pub async fn load(pool: &DbPool) -> Result<SeedResult, RepositoryError> {
        let mut tx = pool.begin().await?;
        let mut result = SeedResult::default();

        let base = Utc
            .with_ymd_and_hms(2026, 3, 2, 8, 0, 0)
            .single()
            .ok_or_else(|| RepositoryError::Decode("invalid seed base timestamp".to_string()))?;

        for advisor in SEED_ADVISORS {
            let inserted = sqlx::query(
                "INSERT OR IGNORE INTO advisor (name, email, active, created_at)
                 VALUES (?, ?, ?, ?)",
            )
            .bind(advisor.name)
            .bind(advisor.email)
            .bind(advisor.active)
            .bind(format_timestamp(base))
            .execute(&mut *tx)
            .await?;
            result.advisors_inserted += inserted.rows_affected();
        }

        for (offset, lead) in SEED_LEADS.iter().enumerate() {
            // Staggered creation times keep the pending order stable.
            let created_at = base + Duration::minutes(offset as i64 + 1);
            let inserted = sqlx::query(
                "INSERT INTO lead (first_name, last_name, email, phone, city, status, created_at)
                 SELECT ?, ?, ?, ?, ?, ?, ?
                 WHERE NOT EXISTS (SELECT 1 FROM lead WHERE email = ?)",
            )
            .bind(lead.first_name)
            .bind(lead.last_name)
            .bind(lead.email)
            .bind(lead.phone)
            .bind(lead.city)
            .bind(LeadStatus::PendingAssignment.as_str())
            .bind(format_timestamp(created_at))
            .bind(lead.email)
            .execute(&mut *tx)
            .await?;
            result.leads_inserted += inserted.rows_affected();
        }

        tx.commit().await?;
        Ok(result)
    }

    /// Checks that every demo row is present with the seeded active flag.
    pub async fn verify(pool: &DbPool) -> Result<VerificationResult, RepositoryError> {
        let mut checks = Vec::new();

        for advisor in SEED_ADVISORS {
            let present: i64 = sqlx::query_scalar(
                "SELECT EXISTS(SELECT 1 FROM advisor WHERE email = ?1 AND active = ?2)",
            )
            .bind(advisor.email)
            .bind(advisor.active)
            .fetch_one(pool)
            .await?;
            checks.push((format!("advisor {}", advisor.email), present == 1));
        }

        for lead in SEED_LEADS {
            let present: i64 =
                sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM lead WHERE email = ?1)")
                    .bind(lead.email)
                    .fetch_one(pool)
                    .await?;
            checks.push((format!("lead {}", lead.email), present == 1));
        }

        let all_present = checks.iter().all(|(_, present)| *present);
        Ok(VerificationResult { all_present, checks })
    }
}

#[cfg(test)]
mod tests {
    use super::DemoDataset;
    use crate::repositories::{AssignmentRepository, LeadRepository};
    use crate::repositories::{SqlAssignmentRepository, SqlLeadRepository};
    use crate::{connect_with_settings, migrations, DbPool};

    async fn setup_pool() -> DbPool {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        migrations::run_pending(&pool).await.expect("migrations");
        pool
    }

    #[tokio::test]
    async fn load_is_idempotent() {
        let pool = setup_pool().await;

        let first = DemoDataset::load(&pool).await.expect("first load");
        assert_eq!(first.advisors_inserted, DemoDataset::advisor_count() as u64);
        assert_eq!(first.leads_inserted, DemoDataset::lead_count() as u64);

        let second = DemoDataset::load(&pool).await.expect("second load");
        assert_eq!(second.advisors_inserted, 0);
        assert_eq!(second.leads_inserted, 0);

        let verification = DemoDataset::verify(&pool).await.expect("verify");
        assert!(verification.all_present, "{:?}", verification.checks);

        pool.close().await;
    }

    #[tokio::test]
    async fn seeded_roster_excludes_advisor_on_leave() {
        let pool = setup_pool().await;
        DemoDataset::load(&pool).await.expect("load");

        let roster = SqlAssignmentRepository::new(pool.clone())
            .list_active_advisors()
            .await
            .expect("roster");
        assert_eq!(roster.len(), DemoDataset::advisor_count() - 1);

        let pending = SqlLeadRepository::new(pool.clone()).list_pending(10).await.expect("pending");
        let emails: Vec<&str> = pending.iter().map(|lead| lead.email.as_str()).collect();
        assert_eq!(emails.first(), Some(&"laura.diaz@example.test"));
        assert_eq!(emails.last(), Some(&"valentina.rios@example.test"));

        pool.close().await;
    }

    #[tokio::test]
    async fn verify_reports_missing_rows_on_empty_database() {
        let pool = setup_pool().await;

        let verification = DemoDataset::verify(&pool).await.expect("verify");

        assert!(!verification.all_present);
        assert!(verification.checks.iter().all(|(_, present)| !present));

        pool.close().await;
    }
}
