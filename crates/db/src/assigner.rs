//! Round-robin lead assignment over the durable rotation state.
//!
//! Every call opens a [`RotationUnit`], which holds the rotation write lock,
//! reads the singleton and a fresh active roster through it, picks the next
//! advisor with [`RoundRobinPolicy`], and commits the new state together with
//! the lead link. The commit still checks the state version. Lock timeouts and
//! lost versions restart the whole sequence; attempts are bounded by
//! [`AssignmentSettings`].

use std::time::Duration;

use rand::Rng;
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info, warn};
use uuid::Uuid;

use leadflow_core::config::AssignmentConfig;
use leadflow_core::domain::advisor::AdvisorId;
use leadflow_core::domain::lead::{Lead, LeadId, NewLead};
use leadflow_core::errors::{ApplicationError, DomainError};
use leadflow_core::round_robin::{ActiveRoster, Confirmation, RoundRobinPolicy};

use crate::repositories::{
    storage_now, AssignmentRepository, CommitOutcome, LeadRepository, RepositoryError,
    RotationCommit, RotationUnit,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AssignmentSettings {
    pub max_attempts: u32,
    pub retry_backoff_ms: u64,
}

impl Default for AssignmentSettings {
    fn default() -> Self {
        Self { max_attempts: 3, retry_backoff_ms: 10 }
    }
}

impl From<&AssignmentConfig> for AssignmentSettings {
    fn from(config: &AssignmentConfig) -> Self {
        Self { max_attempts: config.max_attempts, retry_backoff_ms: config.retry_backoff_ms }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", content = "advisor_id", rename_all = "snake_case")]
pub enum AssignmentOutcome {
    Assigned(AdvisorId),
    /// No advisor is active. The lead, if any, stays pending.
    NoAdvisorsAvailable,
}

impl AssignmentOutcome {
    pub fn advisor(&self) -> Option<AdvisorId> {
        match self {
            Self::Assigned(advisor) => Some(*advisor),
            Self::NoAdvisorsAvailable => None,
        }
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum AssignmentError {
    #[error("assignment did not commit after {attempts} attempt(s): {message}")]
    Transient { attempts: u32, message: String },
    #[error("assignment invariant violated: {0}")]
    InvariantViolation(String),
    #[error("lead {0} is not pending assignment")]
    LeadNotPending(LeadId),
    #[error("lead {0} does not exist")]
    LeadNotFound(LeadId),
}

impl From<AssignmentError> for ApplicationError {
    fn from(value: AssignmentError) -> Self {
        match value {
            AssignmentError::Transient { .. } => Self::Persistence(value.to_string()),
            AssignmentError::InvariantViolation(message) => {
                Self::Domain(DomainError::InvariantViolation(message))
            }
            AssignmentError::LeadNotPending(_) => Self::Conflict(value.to_string()),
            AssignmentError::LeadNotFound(_) => Self::NotFound(value.to_string()),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct LeadAssignment {
    pub lead_id: LeadId,
    pub advisor_id: AdvisorId,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct AssignPendingReport {
    pub assigned: u64,
    /// Leads linked or removed by someone else before this batch reached them.
    pub skipped: Vec<LeadId>,
    pub halted_on_exhaustion: bool,
    pub assignments: Vec<LeadAssignment>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct IntakeResult {
    pub lead: Lead,
    pub outcome: AssignmentOutcome,
}

enum Step {
    Finished(AssignmentOutcome),
    Conflict,
    LeadNotPending,
    LeadNotFound,
}

enum AttemptError {
    Storage(RepositoryError),
    Domain(DomainError),
}

impl From<RepositoryError> for AttemptError {
    fn from(value: RepositoryError) -> Self {
        Self::Storage(value)
    }
}

impl From<DomainError> for AttemptError {
    fn from(value: DomainError) -> Self {
        Self::Domain(value)
    }
}

pub struct Assigner<R> {
    repository: R,
    policy: RoundRobinPolicy,
    settings: AssignmentSettings,
}

impl<R: AssignmentRepository> Assigner<R> {
    pub fn new(repository: R) -> Self {
        Self::with_settings(repository, AssignmentSettings::default())
    }

    pub fn with_settings(repository: R, settings: AssignmentSettings) -> Self {
        Self { repository, policy: RoundRobinPolicy, settings }
    }

    pub fn repository(&self) -> &R {
        &self.repository
    }

    pub fn settings(&self) -> AssignmentSettings {
        self.settings
    }

    /// Creates the rotation singleton when it is missing. Safe to call on
    /// every startup.
    pub async fn initialize(&self) -> Result<bool, AssignmentError> {
        let created = self
            .repository
            .ensure_rotation_state()
            .await
            .map_err(|error| storage_failure(error, 1))?;

        if created {
            info!(
                event_name = "assignment.rotation_state.initialized",
                correlation_id = "bootstrap",
                "rotation state created"
            );
        }
        Ok(created)
    }

    /// Advances the rotation without linking a lead.
    pub async fn next_advisor(&self) -> Result<AssignmentOutcome, AssignmentError> {
        self.assign(None).await
    }

    /// Picks the next advisor and links `lead_id` to it in the same commit.
    pub async fn assign_lead(&self, lead_id: LeadId) -> Result<AssignmentOutcome, AssignmentError> {
        self.assign(Some(lead_id)).await
    }

    /// Assigns `leads` in order, stopping at the first exhausted roster.
    ///
    /// Each lead is its own commit, so an error part-way through leaves the
    /// earlier assignments in place.
    pub async fn assign_pending(
        &self,
        leads: &[LeadId],
    ) -> Result<AssignPendingReport, AssignmentError> {
        let correlation_id = Uuid::new_v4().to_string();
        let mut report = AssignPendingReport::default();

        for &lead_id in leads {
            match self.assign_lead(lead_id).await {
                Ok(AssignmentOutcome::Assigned(advisor_id)) => {
                    report.assigned += 1;
                    report.assignments.push(LeadAssignment { lead_id, advisor_id });
                }
                Ok(AssignmentOutcome::NoAdvisorsAvailable) => {
                    report.halted_on_exhaustion = true;
                    break;
                }
                Err(
                    AssignmentError::LeadNotPending(skipped)
                    | AssignmentError::LeadNotFound(skipped),
                ) => {
                    debug!(
                        event_name = "assignment.batch.lead_skipped",
                        correlation_id = %correlation_id,
                        lead_id = %skipped,
                        "lead left the pending state before its turn"
                    );
                    report.skipped.push(skipped);
                }
                Err(error) => {
                    warn!(
                        event_name = "assignment.batch.aborted",
                        correlation_id = %correlation_id,
                        lead_id = %lead_id,
                        assigned = report.assigned,
                        error = %error,
                        "pending batch aborted"
                    );
                    return Err(error);
                }
            }
        }

        info!(
            event_name = "assignment.batch.completed",
            correlation_id = %correlation_id,
            requested = leads.len(),
            assigned = report.assigned,
            skipped = report.skipped.len(),
            halted_on_exhaustion = report.halted_on_exhaustion,
            "pending batch finished"
        );
        Ok(report)
    }

    /// Reads up to `limit` pending leads, oldest first, and assigns them.
    pub async fn drain_pending<L>(
        &self,
        leads: &L,
        limit: u32,
    ) -> Result<AssignPendingReport, AssignmentError>
    where
        L: LeadRepository + ?Sized,
    {
        let pending = leads.list_pending(limit).await.map_err(|error| storage_failure(error, 1))?;
        let ids: Vec<LeadId> = pending.iter().map(|lead| lead.id).collect();
        self.assign_pending(&ids).await
    }

    /// Stores a new lead as pending and tries to assign it right away. An
    /// empty roster is not a failure: the lead simply stays pending.
    pub async fn intake<L>(&self, leads: &L, lead: NewLead) -> Result<IntakeResult, AssignmentError>
    where
        L: LeadRepository + ?Sized,
    {
        let created = leads.insert_pending(lead).await.map_err(|error| storage_failure(error, 1))?;
        let outcome = self.assign_lead(created.id).await?;

        let lead = match outcome {
            AssignmentOutcome::NoAdvisorsAvailable => created,
            AssignmentOutcome::Assigned(_) => leads
                .find_by_id(created.id)
                .await
                .map_err(|error| storage_failure(error, 1))?
                .ok_or_else(|| {
                    AssignmentError::InvariantViolation(format!(
                        "lead {} vanished after assignment",
                        created.id
                    ))
                })?,
        };

        Ok(IntakeResult { lead, outcome })
    }

    async fn assign(&self, lead_id: Option<LeadId>) -> Result<AssignmentOutcome, AssignmentError> {
        let correlation_id = Uuid::new_v4().to_string();
        let max_attempts = self.settings.max_attempts.max(1);
        let mut last_failure = String::new();

        for attempt in 1..=max_attempts {
            match self.attempt(lead_id, &correlation_id).await {
                Ok(Step::Finished(outcome)) => {
                    info!(
                        event_name = "assignment.committed",
                        correlation_id = %correlation_id,
                        lead_id = ?lead_id.map(|id| id.0),
                        advisor_id = ?outcome.advisor().map(|id| id.0),
                        attempt,
                        "rotation committed"
                    );
                    return Ok(outcome);
                }
                Ok(step @ (Step::LeadNotPending | Step::LeadNotFound)) => {
                    let lead_id = lead_id.ok_or_else(|| {
                        AssignmentError::InvariantViolation(
                            "lead link rejected for a commit without a lead".to_string(),
                        )
                    })?;
                    return Err(match step {
                        Step::LeadNotFound => AssignmentError::LeadNotFound(lead_id),
                        _ => AssignmentError::LeadNotPending(lead_id),
                    });
                }
                Ok(Step::Conflict) => {
                    last_failure = "rotation state changed concurrently".to_string();
                }
                Err(AttemptError::Storage(error)) if error.is_transient() => {
                    last_failure = error.to_string();
                }
                Err(AttemptError::Storage(error)) => {
                    return Err(AssignmentError::InvariantViolation(error.to_string()));
                }
                Err(AttemptError::Domain(error)) => {
                    return Err(AssignmentError::InvariantViolation(error.to_string()));
                }
            }

            if attempt == max_attempts {
                break;
            }
            debug!(
                event_name = "assignment.retry",
                correlation_id = %correlation_id,
                attempt,
                max_attempts,
                reason = %last_failure,
                "assignment attempt lost, retrying"
            );
            let base = self.settings.retry_backoff_ms.saturating_mul(u64::from(attempt));
            // Jitter spreads out callers that lost the same round.
            let delay = base.saturating_add(rand::thread_rng().gen_range(0..=base));
            if delay > 0 {
                tokio::time::sleep(Duration::from_millis(delay)).await;
            }
        }

        warn!(
            event_name = "assignment.retries_exhausted",
            correlation_id = %correlation_id,
            max_attempts,
            reason = %last_failure,
            "assignment gave up"
        );
        Err(AssignmentError::Transient { attempts: max_attempts, message: last_failure })
    }

    async fn attempt(
        &self,
        lead_id: Option<LeadId>,
        correlation_id: &str,
    ) -> Result<Step, AttemptError> {
        let mut unit: Box<dyn RotationUnit> = self.repository.begin_rotation().await?;
        let state = match unit.load_rotation_state().await? {
            Some(state) => state,
            None => {
                unit.ensure_rotation_state().await?;
                unit.load_rotation_state().await?.ok_or_else(|| {
                    DomainError::InvariantViolation(
                        "rotation state missing after initialization".to_string(),
                    )
                })?
            }
        };

        let roster = ActiveRoster::new(unit.list_active_advisors().await?)?;
        let decision = self.policy.select(&roster, state.last_assigned);
        debug!(
            event_name = "assignment.candidate_selected",
            correlation_id,
            decision = decision.kind(),
            roster_size = roster.len(),
            version = state.version,
            "round-robin candidate computed"
        );

        let Some(candidate) = decision.candidate() else {
            let outcome =
                unit.commit_rotation(RotationCommit::clear(state.version, storage_now())).await?;
            return Ok(step_for(outcome, AssignmentOutcome::NoAdvisorsAvailable));
        };

        let still_active = unit.is_advisor_active(candidate).await?;
        let confirmation = self.policy.confirm(&roster, candidate, still_active)?;
        if let Confirmation::FellBack { rejected, replacement } = confirmation {
            warn!(
                event_name = "assignment.candidate_deactivated",
                correlation_id,
                rejected = rejected.0,
                replacement = replacement.0,
                "candidate left the roster after the snapshot; using first active advisor"
            );
        }

        let chosen = confirmation.advisor();
        let outcome = unit
            .commit_rotation(RotationCommit::assign(state.version, chosen, lead_id, storage_now()))
            .await?;
        Ok(step_for(outcome, AssignmentOutcome::Assigned(chosen)))
    }
}

fn step_for(outcome: CommitOutcome, finished: AssignmentOutcome) -> Step {
    match outcome {
        CommitOutcome::Committed(_) => Step::Finished(finished),
        CommitOutcome::VersionConflict => Step::Conflict,
        CommitOutcome::LeadNotPending => Step::LeadNotPending,
        CommitOutcome::LeadNotFound => Step::LeadNotFound,
    }
}

fn storage_failure(error: RepositoryError, attempts: u32) -> AssignmentError {
    if error.is_transient() {
        AssignmentError::Transient { attempts, message: error.to_string() }
    } else {
        AssignmentError::InvariantViolation(error.to_string())
    }
}
