use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::{OwnedRwLockWriteGuard, RwLock};

use leadflow_core::domain::advisor::{Advisor, AdvisorId, NewAdvisor};
use leadflow_core::domain::lead::{Lead, LeadId, LeadStatus, NewLead};
use leadflow_core::domain::rotation::RotationState;

use super::{
    storage_now, AdvisorRepository, AssignmentRepository, CommitOutcome, LeadRepository,
    RepositoryError, RotationCommit, RotationUnit,
};

#[derive(Default)]
struct StoreState {
    advisors: BTreeMap<AdvisorId, Advisor>,
    leads: BTreeMap<LeadId, Lead>,
    rotation: Option<RotationState>,
    next_advisor_id: i64,
    next_lead_id: i64,
}

/// Process-local store implementing every repository trait over one shared
/// lock. Clones share the same data.
#[derive(Clone, Default)]
pub struct InMemoryRepository {
    state: Arc<RwLock<StoreState>>,
}

impl InMemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

impl StoreState {
    fn ensure_rotation(&mut self) -> bool {
        if self.rotation.is_some() {
            return false;
        }
        self.rotation = Some(RotationState::initial(storage_now()));
        true
    }

    fn active_advisors(&self) -> Vec<AdvisorId> {
        self.advisors.values().filter(|advisor| advisor.active).map(|advisor| advisor.id).collect()
    }

    fn apply(&mut self, commit: RotationCommit) -> Result<CommitOutcome, RepositoryError> {
        match &self.rotation {
            Some(current) if current.version == commit.expected_version() => {}
            _ => return Ok(CommitOutcome::VersionConflict),
        }

        if let (Some(advisor), Some(lead_id)) = (commit.chosen(), commit.lead_id()) {
            let Some(lead) = self.leads.get_mut(&lead_id) else {
                return Ok(CommitOutcome::LeadNotFound);
            };
            if !lead.is_pending() {
                return Ok(CommitOutcome::LeadNotPending);
            }
            lead.assign_to(advisor, commit.committed_at())
                .map_err(|error| RepositoryError::Decode(error.to_string()))?;
        }

        let next = commit.resulting_state();
        self.rotation = Some(next.clone());
        Ok(CommitOutcome::Committed(next))
    }
}

#[async_trait::async_trait]
impl AssignmentRepository for InMemoryRepository {
    async fn ensure_rotation_state(&self) -> Result<bool, RepositoryError> {
        Ok(self.state.write().await.ensure_rotation())
    }

    async fn load_rotation_state(&self) -> Result<Option<RotationState>, RepositoryError> {
        Ok(self.state.read().await.rotation.clone())
    }

    async fn list_active_advisors(&self) -> Result<Vec<AdvisorId>, RepositoryError> {
        Ok(self.state.read().await.active_advisors())
    }

    async fn begin_rotation(&self) -> Result<Box<dyn RotationUnit>, RepositoryError> {
        let guard = Arc::clone(&self.state).write_owned().await;
        Ok(Box::new(MemoryRotationUnit { guard: Some(guard) }))
    }
}

/// Holds the store's write lock for the whole unit. Nothing is staged: a
/// unit only mutates storage through `ensure` and `commit`.
struct MemoryRotationUnit {
    guard: Option<OwnedRwLockWriteGuard<StoreState>>,
}

impl MemoryRotationUnit {
    fn store(&mut self) -> Result<&mut StoreState, RepositoryError> {
        self.guard.as_deref_mut().ok_or(RepositoryError::UnitFinished)
    }
}

#[async_trait::async_trait]
impl RotationUnit for MemoryRotationUnit {
    async fn ensure_rotation_state(&mut self) -> Result<bool, RepositoryError> {
        Ok(self.store()?.ensure_rotation())
    }

    async fn load_rotation_state(&mut self) -> Result<Option<RotationState>, RepositoryError> {
        Ok(self.store()?.rotation.clone())
    }

    async fn list_active_advisors(&mut self) -> Result<Vec<AdvisorId>, RepositoryError> {
        Ok(self.store()?.active_advisors())
    }

    async fn is_advisor_active(&mut self, id: AdvisorId) -> Result<bool, RepositoryError> {
        Ok(self.store()?.advisors.get(&id).is_some_and(|advisor| advisor.active))
    }

    async fn commit_rotation(
        &mut self,
        commit: RotationCommit,
    ) -> Result<CommitOutcome, RepositoryError> {
        let mut guard = self.guard.take().ok_or(RepositoryError::UnitFinished)?;
        guard.apply(commit)
    }
}

#[async_trait::async_trait]
impl LeadRepository for InMemoryRepository {
    async fn insert_pending(&self, lead: NewLead) -> Result<Lead, RepositoryError> {
        let mut state = self.state.write().await;
        state.next_lead_id += 1;

        let stored = Lead {
            id: LeadId(state.next_lead_id),
            first_name: lead.first_name,
            last_name: lead.last_name,
            email: lead.email,
            phone: lead.phone,
            city: lead.city,
            status: LeadStatus::PendingAssignment,
            advisor_id: None,
            assigned_at: None,
            created_at: storage_now(),
        };
        state.leads.insert(stored.id, stored.clone());
        Ok(stored)
    }

    async fn find_by_id(&self, id: LeadId) -> Result<Option<Lead>, RepositoryError> {
        Ok(self.state.read().await.leads.get(&id).cloned())
    }

    async fn list_pending(&self, limit: u32) -> Result<Vec<Lead>, RepositoryError> {
        let state = self.state.read().await;
        let mut pending: Vec<Lead> =
            state.leads.values().filter(|lead| lead.is_pending()).cloned().collect();
        pending.sort_by(|left, right| {
            left.created_at.cmp(&right.created_at).then_with(|| left.id.cmp(&right.id))
        });
        pending.truncate(limit as usize);
        Ok(pending)
    }

    async fn count_pending(&self) -> Result<u64, RepositoryError> {
        let state = self.state.read().await;
        Ok(state.leads.values().filter(|lead| lead.is_pending()).count() as u64)
    }

    async fn reassign(
        &self,
        id: LeadId,
        advisor: AdvisorId,
        at: DateTime<Utc>,
    ) -> Result<Lead, RepositoryError> {
        let mut state = self.state.write().await;
        if !state.advisors.contains_key(&advisor) {
            return Err(RepositoryError::NotFound(format!("advisor {advisor}")));
        }

        let lead = state
            .leads
            .get_mut(&id)
            .ok_or_else(|| RepositoryError::NotFound(format!("lead {id}")))?;
        lead.assign_to(advisor, at).map_err(|error| RepositoryError::Decode(error.to_string()))?;
        Ok(lead.clone())
    }

    async fn count_by_advisor(&self) -> Result<Vec<(AdvisorId, u64)>, RepositoryError> {
        let state = self.state.read().await;
        let mut counts: BTreeMap<AdvisorId, u64> = BTreeMap::new();
        for advisor in state.leads.values().filter_map(|lead| lead.advisor_id) {
            *counts.entry(advisor).or_default() += 1;
        }
        Ok(counts.into_iter().collect())
    }
}

#[async_trait::async_trait]
impl AdvisorRepository for InMemoryRepository {
    async fn insert(&self, advisor: NewAdvisor) -> Result<Advisor, RepositoryError> {
        let mut state = self.state.write().await;
        state.next_advisor_id += 1;

        let stored = Advisor {
            id: AdvisorId(state.next_advisor_id),
            name: advisor.name,
            email: advisor.email,
            active: advisor.active,
            created_at: storage_now(),
        };
        state.advisors.insert(stored.id, stored.clone());
        Ok(stored)
    }

    async fn find_by_id(&self, id: AdvisorId) -> Result<Option<Advisor>, RepositoryError> {
        Ok(self.state.read().await.advisors.get(&id).cloned())
    }

    async fn set_active(&self, id: AdvisorId, active: bool) -> Result<Advisor, RepositoryError> {
        let mut state = self.state.write().await;
        let advisor = state
            .advisors
            .get_mut(&id)
            .ok_or_else(|| RepositoryError::NotFound(format!("advisor {id}")))?;
        advisor.active = active;
        Ok(advisor.clone())
    }

    async fn list_all(&self) -> Result<Vec<Advisor>, RepositoryError> {
        Ok(self.state.read().await.advisors.values().cloned().collect())
    }
}
