use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::advisor::AdvisorId;
use crate::errors::DomainError;

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct LeadId(pub i64);

impl fmt::Display for LeadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LeadStatus {
    PendingAssignment,
    New,
    Contacted,
    InProgress,
    Closed,
    Discarded,
}

impl LeadStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PendingAssignment => "pending_assignment",
            Self::New => "new",
            Self::Contacted => "contacted",
            Self::InProgress => "in_progress",
            Self::Closed => "closed",
            Self::Discarded => "discarded",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "pending_assignment" => Some(Self::PendingAssignment),
            "new" => Some(Self::New),
            "contacted" => Some(Self::Contacted),
            "in_progress" => Some(Self::InProgress),
            "closed" => Some(Self::Closed),
            "discarded" => Some(Self::Discarded),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lead {
    pub id: LeadId,
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub phone: Option<String>,
    pub city: Option<String>,
    pub status: LeadStatus,
    pub advisor_id: Option<AdvisorId>,
    pub assigned_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// Intake payload for a lead that has not been persisted yet.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewLead {
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub phone: Option<String>,
    pub city: Option<String>,
}

impl Lead {
    pub fn is_pending(&self) -> bool {
        self.status == LeadStatus::PendingAssignment
    }

    pub fn can_transition_to(&self, next: LeadStatus) -> bool {
        matches!(
            (self.status, next),
            (LeadStatus::PendingAssignment, LeadStatus::New)
                | (LeadStatus::New, LeadStatus::Contacted)
                | (LeadStatus::Contacted, LeadStatus::InProgress)
                | (LeadStatus::InProgress, LeadStatus::Closed)
                | (
                    LeadStatus::New | LeadStatus::Contacted | LeadStatus::InProgress,
                    LeadStatus::Discarded
                )
        )
    }

    pub fn transition_to(&mut self, next: LeadStatus) -> Result<(), DomainError> {
        if self.can_transition_to(next) {
            self.status = next;
            return Ok(());
        }

        Err(DomainError::InvalidLeadTransition { from: self.status, to: next })
    }

    /// Links the lead to `advisor`. A pending lead moves to `New`; a lead that
    /// already left the pending state keeps its status (manual reassignment).
    pub fn assign_to(&mut self, advisor: AdvisorId, at: DateTime<Utc>) -> Result<(), DomainError> {
        if self.is_pending() {
            self.transition_to(LeadStatus::New)?;
        }
        self.advisor_id = Some(advisor);
        self.assigned_at = Some(at);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::{Lead, LeadId, LeadStatus};
    use crate::domain::advisor::AdvisorId;
    use crate::errors::DomainError;

    fn pending_lead() -> Lead {
        Lead {
            id: LeadId(7),
            first_name: "Ana".to_string(),
            last_name: "Rojas".to_string(),
            email: "ana@example.com".to_string(),
            phone: None,
            city: Some("Bogota".to_string()),
            status: LeadStatus::PendingAssignment,
            advisor_id: None,
            assigned_at: None,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn status_storage_form_round_trips() {
        for status in [
            LeadStatus::PendingAssignment,
            LeadStatus::New,
            LeadStatus::Contacted,
            LeadStatus::InProgress,
            LeadStatus::Closed,
            LeadStatus::Discarded,
        ] {
            assert_eq!(LeadStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(LeadStatus::parse("NUEVO"), None);
    }

    #[test]
    fn assigning_pending_lead_moves_it_to_new() {
        let mut lead = pending_lead();
        let now = Utc::now();

        lead.assign_to(AdvisorId(3), now).expect("assign");

        assert_eq!(lead.status, LeadStatus::New);
        assert_eq!(lead.advisor_id, Some(AdvisorId(3)));
        assert_eq!(lead.assigned_at, Some(now));
    }

    #[test]
    fn reassigning_contacted_lead_keeps_status() {
        let mut lead = pending_lead();
        lead.assign_to(AdvisorId(1), Utc::now()).expect("assign");
        lead.transition_to(LeadStatus::Contacted).expect("contact");

        lead.assign_to(AdvisorId(2), Utc::now()).expect("reassign");

        assert_eq!(lead.status, LeadStatus::Contacted);
        assert_eq!(lead.advisor_id, Some(AdvisorId(2)));
    }

    #[test]
    fn pending_lead_cannot_skip_to_closed() {
        let mut lead = pending_lead();
        let error = lead.transition_to(LeadStatus::Closed).expect_err("invalid transition");

        assert_eq!(
            error,
            DomainError::InvalidLeadTransition {
                from: LeadStatus::PendingAssignment,
                to: LeadStatus::Closed
            }
        );
    }
}
