use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, SubsecRound, Utc};
use thiserror::Error;

use leadflow_core::domain::advisor::{Advisor, AdvisorId, NewAdvisor};
use leadflow_core::domain::lead::{Lead, LeadId, NewLead};
use leadflow_core::domain::rotation::RotationState;

pub mod advisor;
pub mod assignment;
pub mod lead;
pub mod memory;

pub use advisor::SqlAdvisorRepository;
pub use assignment::SqlAssignmentRepository;
pub use lead::SqlLeadRepository;
pub use memory::InMemoryRepository;

// SQLite primary result codes that clear up on their own.
const SQLITE_BUSY: i32 = 5;
const SQLITE_LOCKED: i32 = 6;

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("decode error: {0}")]
    Decode(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("rotation unit already committed")]
    UnitFinished,
}

impl RepositoryError {
    /// Whether retrying the same operation may succeed: lock contention,
    /// pool exhaustion or I/O trouble rather than bad data.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Database(sqlx::Error::PoolTimedOut | sqlx::Error::Io(_)) => true,
            Self::Database(sqlx::Error::Database(error)) => error
                .code()
                .and_then(|code| code.parse::<i32>().ok())
                .map(|code| matches!(code & 0xff, SQLITE_BUSY | SQLITE_LOCKED))
                .unwrap_or(false),
            _ => false,
        }
    }
}

/// A single rotation write: the compare-and-swap on the singleton plus the
/// optional lead link that must land with it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RotationCommit {
    expected_version: u64,
    chosen: Option<AdvisorId>,
    lead_id: Option<LeadId>,
    committed_at: DateTime<Utc>,
}

impl RotationCommit {
    pub fn assign(
        expected_version: u64,
        chosen: AdvisorId,
        lead_id: Option<LeadId>,
        committed_at: DateTime<Utc>,
    ) -> Self {
        Self { expected_version, chosen: Some(chosen), lead_id, committed_at }
    }

    /// Resets `last_assigned` after the active roster came back empty.
    pub fn clear(expected_version: u64, committed_at: DateTime<Utc>) -> Self {
        Self { expected_version, chosen: None, lead_id: None, committed_at }
    }

    pub fn expected_version(&self) -> u64 {
        self.expected_version
    }

    pub fn chosen(&self) -> Option<AdvisorId> {
        self.chosen
    }

    pub fn lead_id(&self) -> Option<LeadId> {
        self.lead_id
    }

    pub fn committed_at(&self) -> DateTime<Utc> {
        self.committed_at
    }

    pub fn resulting_state(&self) -> RotationState {
        RotationState {
            last_assigned: self.chosen,
            version: self.expected_version + 1,
            updated_at: self.committed_at,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CommitOutcome {
    Committed(RotationState),
    /// Another writer replaced the singleton since it was read.
    VersionConflict,
    /// The lead was linked by someone else; nothing was written.
    LeadNotPending,
    /// The lead does not exist; nothing was written.
    LeadNotFound,
}

/// One read-compute-write pass over the rotation state. The unit holds the
/// rotation write lock from creation until it is committed or dropped, so
/// concurrent assigners queue up instead of racing on a stale version.
/// Dropping a unit without committing discards it.
#[async_trait]
pub trait RotationUnit: Send {
    /// Creates the singleton if it does not exist. Returns `true` when a row
    /// was inserted.
    async fn ensure_rotation_state(&mut self) -> Result<bool, RepositoryError>;

    async fn load_rotation_state(&mut self) -> Result<Option<RotationState>, RepositoryError>;

    /// Active advisor identities, ascending.
    async fn list_active_advisors(&mut self) -> Result<Vec<AdvisorId>, RepositoryError>;

    async fn is_advisor_active(&mut self, id: AdvisorId) -> Result<bool, RepositoryError>;

    /// Applies `commit` atomically and releases the lock. Anything other than
    /// `Committed` leaves storage untouched.
    async fn commit_rotation(
        &mut self,
        commit: RotationCommit,
    ) -> Result<CommitOutcome, RepositoryError>;
}

/// Transactional persistence handle used by the assigner.
#[async_trait]
pub trait AssignmentRepository: Send + Sync {
    /// Creates the singleton if it does not exist. Returns `true` when a row
    /// was inserted.
    async fn ensure_rotation_state(&self) -> Result<bool, RepositoryError>;

    async fn load_rotation_state(&self) -> Result<Option<RotationState>, RepositoryError>;

    /// Active advisor identities, ascending. Always read from storage.
    async fn list_active_advisors(&self) -> Result<Vec<AdvisorId>, RepositoryError>;

    /// Waits for the rotation write lock and opens a unit holding it.
    async fn begin_rotation(&self) -> Result<Box<dyn RotationUnit>, RepositoryError>;

    async fn is_advisor_active(&self, id: AdvisorId) -> Result<bool, RepositoryError> {
        Ok(self.list_active_advisors().await?.contains(&id))
    }

    /// Applies `commit` in a unit of its own.
    async fn commit_rotation(
        &self,
        commit: RotationCommit,
    ) -> Result<CommitOutcome, RepositoryError> {
        let mut unit = self.begin_rotation().await?;
        unit.commit_rotation(commit).await
    }
}

#[async_trait]
pub trait LeadRepository: Send + Sync {
    async fn insert_pending(&self, lead: NewLead) -> Result<Lead, RepositoryError>;

    async fn find_by_id(&self, id: LeadId) -> Result<Option<Lead>, RepositoryError>;

    /// Pending leads, oldest first.
    async fn list_pending(&self, limit: u32) -> Result<Vec<Lead>, RepositoryError>;

    async fn count_pending(&self) -> Result<u64, RepositoryError>;

    /// Manual reassignment. Leaves the rotation state alone.
    async fn reassign(
        &self,
        id: LeadId,
        advisor: AdvisorId,
        at: DateTime<Utc>,
    ) -> Result<Lead, RepositoryError>;

    /// Number of leads currently linked to each advisor, ordered by advisor.
    async fn count_by_advisor(&self) -> Result<Vec<(AdvisorId, u64)>, RepositoryError>;
}

#[async_trait]
pub trait AdvisorRepository: Send + Sync {
    async fn insert(&self, advisor: NewAdvisor) -> Result<Advisor, RepositoryError>;

    async fn find_by_id(&self, id: AdvisorId) -> Result<Option<Advisor>, RepositoryError>;

    async fn set_active(&self, id: AdvisorId, active: bool) -> Result<Advisor, RepositoryError>;

    async fn list_all(&self) -> Result<Vec<Advisor>, RepositoryError>;
}

/// Current time at the precision storage keeps.
pub fn storage_now() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(6)
}

/// Fixed-width RFC 3339 so that text ordering matches time ordering.
pub(crate) fn format_timestamp(value: DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub(crate) fn parse_timestamp(
    column: &str,
    value: String,
) -> Result<DateTime<Utc>, RepositoryError> {
    DateTime::parse_from_rfc3339(&value).map(|timestamp| timestamp.with_timezone(&Utc)).map_err(
        |error| {
            RepositoryError::Decode(format!("invalid timestamp in `{column}`: `{value}` ({error})"))
        },
    )
}

pub(crate) fn parse_optional_timestamp(
    column: &str,
    value: Option<String>,
) -> Result<Option<DateTime<Utc>>, RepositoryError> {
    value.map(|timestamp| parse_timestamp(column, timestamp)).transpose()
}

pub(crate) fn parse_u64(column: &str, value: i64) -> Result<u64, RepositoryError> {
    u64::try_from(value).map_err(|_| {
        RepositoryError::Decode(format!(
            "invalid value for `{column}` (expected non-negative integer): {value}"
        ))
    })
}

pub(crate) fn version_param(version: u64) -> Result<i64, RepositoryError> {
    i64::try_from(version)
        .map_err(|_| RepositoryError::Decode(format!("rotation version {version} overflows i64")))
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};

    use super::{format_timestamp, parse_timestamp, RepositoryError, RotationCommit};
    use leadflow_core::domain::advisor::AdvisorId;
    use leadflow_core::domain::lead::LeadId;

    #[test]
    fn timestamps_are_fixed_width() {
        let whole = Utc.with_ymd_and_hms(2026, 3, 1, 9, 0, 0).single().expect("timestamp");
        let formatted = format_timestamp(whole);

        assert_eq!(formatted, "2026-03-01T09:00:00.000000Z");
        assert_eq!(parse_timestamp("created_at", formatted).expect("parse"), whole);
    }

    #[test]
    fn clear_commit_never_links_a_lead() {
        let now = Utc::now();
        let commit = RotationCommit::clear(4, now);

        assert_eq!(commit.chosen(), None);
        assert_eq!(commit.lead_id(), None);
        assert_eq!(commit.resulting_state().version, 5);

        let assign = RotationCommit::assign(4, AdvisorId(2), Some(LeadId(9)), now);
        assert_eq!(assign.resulting_state().last_assigned, Some(AdvisorId(2)));
        assert_eq!(assign.lead_id(), Some(LeadId(9)));
    }

    #[test]
    fn pool_timeout_is_transient_but_decode_is_not() {
        assert!(RepositoryError::Database(sqlx::Error::PoolTimedOut).is_transient());
        assert!(!RepositoryError::Decode("bad row".to_string()).is_transient());
        assert!(!RepositoryError::NotFound("lead 1".to_string()).is_transient());
    }
}
